//! Bridges stored turns and each provider's history and payload shapes.
//!
//! Images are only ever sent as part of the live turn. History replays the
//! caption text of image-bearing turns and nothing else.

use crate::types::{
    Content, DisplayContent, HistoryEntry, Payload, PayloadPart, ProviderKind, Role, Turn,
};

/// Builds provider-shaped history from stored turns.
///
/// With `exclude_last` the most recent turn (the one about to be submitted
/// live) is left out. A failed turn leaves its user message unanswered, so
/// consecutive user turns collapse into one entry.
pub fn to_provider_history(
    turns: &[Turn],
    provider: ProviderKind,
    exclude_last: bool,
) -> Vec<HistoryEntry> {
    let upto = if exclude_last {
        turns.len().saturating_sub(1)
    } else {
        turns.len()
    };
    let mut history: Vec<HistoryEntry> = Vec::with_capacity(upto);
    for turn in &turns[..upto] {
        let role = provider.role_token(turn.role());
        match history.last_mut() {
            Some(last) if last.role == role => join_text(&mut last.text, turn.text()),
            _ => history.push(HistoryEntry {
                role,
                text: turn.text().to_string(),
            }),
        }
    }
    history
}

/// Moves a trailing unanswered user entry out of `history` and in front of
/// the live payload text, so the request never holds two user messages in a
/// row.
pub fn fold_unanswered(history: &mut Vec<HistoryEntry>, payload: &mut Payload, provider: ProviderKind) {
    if history.last().map(|entry| entry.role) != Some(provider.role_token(Role::User)) {
        return;
    }
    let Some(pending) = history.pop() else {
        return;
    };
    match payload.parts.first_mut() {
        Some(PayloadPart::Text(live)) => {
            let mut merged = pending.text;
            join_text(&mut merged, live);
            *live = merged;
        }
        _ => payload.parts.insert(0, PayloadPart::Text(pending.text)),
    }
}

/// A verbatim resubmission is not repeated.
fn join_text(into: &mut String, next: &str) {
    if next.is_empty() || into == next {
        return;
    }
    if !into.is_empty() {
        into.push_str("\n\n");
    }
    into.push_str(next);
}

/// Builds the payload for the turn being submitted now.
///
/// An image is only attached when the provider accepts image input; for
/// text-only providers it is dropped here.
pub fn current_turn_payload(turn: &Turn, provider: ProviderKind) -> Payload {
    let mut parts = vec![PayloadPart::Text(turn.text().to_string())];
    if let Content::TextWithImage(_, image) = turn.content() {
        if provider.capabilities().supports_image_input {
            parts.push(PayloadPart::Image(image.clone()));
        } else {
            tracing::warn!(
                provider = provider.as_str(),
                mime_type = image.mime_type(),
                "dropping image for provider without image input"
            );
        }
    }
    Payload { parts }
}

pub fn display_content(turn: &Turn) -> DisplayContent {
    match turn.content() {
        Content::Text(text) => DisplayContent::Text(text.clone()),
        Content::TextWithImage(text, image) => DisplayContent::TextWithImage {
            text: text.clone(),
            image: image.clone(),
        },
    }
}

/// Plain-text transcript. Image bytes are replaced with a one-line marker.
pub fn export_text(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let marker = match turn.role() {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        };
        out.push_str(marker);
        out.push_str(": ");
        out.push_str(turn.text());
        out.push('\n');
        if let Some(image) = turn.content().image() {
            out.push_str(&format!(
                "[image attached: {}, {} bytes]\n",
                image.mime_type(),
                image.len()
            ));
        }
        out.push('\n');
    }
    out
}

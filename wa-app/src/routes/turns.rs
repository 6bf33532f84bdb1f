use crate::http_auth::ApiError;
use crate::image_input;
use crate::server::AppState;
use axum::extract::DefaultBodyLimit;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::{Extension, Json};
use futures_util::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use wa_channels::{ChannelSurface, SurfaceEvent};
use wa_llm::ImageData;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TurnRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    image: Option<ImageUpload>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageUpload {
    mime_type: String,
    data_base64: String,
}

impl ImageUpload {
    fn decode(self) -> Result<ImageData, ApiError> {
        let image = ImageData::from_base64(self.mime_type, &self.data_base64)?;
        image_input::check_size(image.len()).map_err(ApiError::bad_request)?;
        Ok(image)
    }
}

/// Room for a base64 image at the size cap plus the JSON around it.
pub(crate) const TURN_BODY_LIMIT: usize = image_input::MAX_IMAGE_BYTES.div_ceil(3) * 4 + 64 * 1024;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/session/turns", post(submit_turn))
        .layer(DefaultBodyLimit::max(TURN_BODY_LIMIT))
}

/// Runs one turn and streams `turn`, `partial` and `error` events.
///
/// The turn runs in its own task holding the session; if the client goes
/// away the turn is abandoned and nothing is committed for it.
#[tracing::instrument(level = "info", skip_all)]
async fn submit_turn(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<TurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut session = state.try_session()?;
    session.ensure_authenticated()?;
    let image = req.image.map(ImageUpload::decode).transpose()?;
    let text = req.text;

    let (surface, rx) = ChannelSurface::new();
    let task_state = state.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = task_state.assistant.submit(&mut session, &text, image, &surface) => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "turn ended with error");
                }
            }
            _ = surface.closed() => {
                tracing::info!("client disconnected; turn abandoned");
            }
        }
        drop(session);
        drop(surface);
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(to_sse(&event)), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &SurfaceEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_with_bad_base64_is_validation_error() {
        let upload = ImageUpload {
            mime_type: "image/png".to_string(),
            data_base64: "not base64!".to_string(),
        };
        let err = upload.decode().expect_err("bad base64");
        assert_eq!(err.code, "validation");
    }

    #[test]
    fn upload_with_unsupported_mime_is_rejected() {
        let upload = ImageUpload {
            mime_type: "image/tiff".to_string(),
            data_base64: "AQID".to_string(),
        };
        assert!(upload.decode().is_err());
    }
}

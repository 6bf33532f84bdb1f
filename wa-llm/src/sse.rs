use crate::error::{LlmError, Result};
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub data: String,
}

/// Splits a byte stream into server-sent events.
///
/// Bytes are buffered until a whole event has arrived, so a multi-byte
/// character or a CRLF pair split across chunks decodes intact. Events without
/// any `data:` line are skipped. A trailing event that is not followed by a
/// blank line is still emitted when the body ends.
pub(crate) fn decode_sse<S, E>(bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (bytes_stream, Vec::<u8>::new(), false),
        |(mut stream, mut buffer, mut ended)| async move {
            loop {
                if let Some(idx) = find_event_end(&buffer) {
                    let raw: Vec<u8> = buffer.drain(..idx + 2).take(idx).collect();
                    match parse_event(&String::from_utf8_lossy(&raw)) {
                        Some(event) => return Some((Ok(event), (stream, buffer, ended))),
                        None => continue,
                    }
                }

                if ended {
                    let raw = std::mem::take(&mut buffer);
                    let raw = String::from_utf8_lossy(&raw);
                    if raw.trim().is_empty() {
                        return None;
                    }
                    return parse_event(&raw).map(|event| (Ok(event), (stream, buffer, ended)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                        strip_crlf(&mut buffer);
                    }
                    Some(Err(e)) => {
                        ended = true;
                        return Some((
                            Err(LlmError::Transport(format!("stream read failed: {e}"))),
                            (stream, buffer, ended),
                        ));
                    }
                    None => ended = true,
                }
            }
        },
    )
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Rewrites every complete `\r\n` pair in the buffer to `\n`. A lone trailing
/// `\r` stays until the next chunk shows what follows it.
fn strip_crlf(buffer: &mut Vec<u8>) {
    if !buffer.windows(2).any(|w| w == b"\r\n") {
        return;
    }
    let mut out = Vec::with_capacity(buffer.len());
    let mut bytes = buffer.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    *buffer = out;
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let data_lines: Vec<&str> = raw
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(
        parts: Vec<&'static str>,
    ) -> impl Stream<Item = std::result::Result<Bytes, String>> + Unpin {
        let owned: Vec<std::result::Result<Bytes, String>> = parts
            .into_iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        futures_util::stream::iter(owned)
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let stream = decode_sse(chunks(vec!["data: {\"a\"", ":1}\n\nda", "ta: [DONE]\n\n"]));
        let events: Vec<_> = stream.collect().await;
        let data: Vec<String> = events
            .into_iter()
            .map(|e| e.expect("event").data)
            .collect();
        assert_eq!(data, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    async fn collect_data(parts: &[&[u8]]) -> Vec<String> {
        let owned: Vec<std::result::Result<Bytes, String>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        decode_sse(futures_util::stream::iter(owned))
            .map(|e| e.expect("event").data)
            .collect()
            .await
    }

    #[tokio::test]
    async fn crlf_delimiters_and_trailing_event_are_handled() {
        let data = collect_data(&[
            &b": keep-alive\r\n\r\n"[..],
            &b"event: delta\r\ndata: one\r\n\r\n"[..],
            &b"data: two"[..],
        ])
        .await;
        assert_eq!(data, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn crlf_split_across_chunks_still_separates_events() {
        let data = collect_data(&[&b"data: one\r\n\r"[..], &b"\ndata: two\r\n\r\n"[..]]).await;
        assert_eq!(data, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn utf8_split_across_chunks_is_not_corrupted() {
        // "Grüße": ü = C3 BC, ß = C3 9F.
        let data = collect_data(&[&b"data: Gr\xc3"[..], &b"\xbc\xc3\x9fe\n\n"[..]]).await;
        assert_eq!(data, vec!["Grüße".to_string()]);
    }

    #[tokio::test]
    async fn four_byte_character_split_three_ways_is_reassembled() {
        // 👋 = F0 9F 91 8B.
        let data = collect_data(&[&b"data: hi \xf0\x9f"[..], &b"\x91"[..], &b"\x8b!\n\n"[..]]).await;
        assert_eq!(data, vec!["hi 👋!".to_string()]);
    }

    #[tokio::test]
    async fn read_errors_surface_as_transport() {
        let parts: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err("connection reset".to_string()),
        ];
        let events: Vec<_> = decode_sse(futures_util::stream::iter(parts)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        let err = events[1].as_ref().expect_err("read error");
        assert!(err.to_string().contains("connection reset"));
    }
}

use std::ops::ControlFlow;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::models::OpenAiStreamChunk;
use crate::providers::types::{ProviderError, StreamEvent};

#[derive(Debug, Default)]
struct Usage {
    tokens_in: Option<i64>,
    tokens_out: Option<i64>,
}

/// Parse an OpenAI-style SSE body into `StreamEvent`s.
///
/// Finishes with `Done` on `data: [DONE]`. A body that ends before that is
/// reported as `StreamInterrupted`.
pub async fn parse_sse_stream<S, B, E>(stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut byte_buf: Vec<u8> = Vec::new();
    let mut buffer = String::new();
    let mut usage = Usage::default();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(ProviderError::StreamInterrupted(
                        e.to_string(),
                    )))
                    .await;
                return;
            }
        };

        byte_buf.extend_from_slice(bytes.as_ref());
        buffer.push_str(&decode_utf8_prefix(&mut byte_buf));

        // Normalize CRLF to LF, including pairs split across chunks
        if buffer.contains("\r\n") {
            buffer = buffer.replace("\r\n", "\n");
        }

        // Process complete SSE events (delimited by double newline)
        while let Some(event_end) = buffer.find("\n\n") {
            let event_text: String = buffer.drain(..event_end + 2).collect();
            if dispatch_event(&event_text, &tx, &mut usage).await.is_break() {
                return;
            }
        }
    }

    // The last event may arrive without its closing blank line.
    if !byte_buf.is_empty() {
        buffer.push_str(&String::from_utf8_lossy(&byte_buf));
    }
    if !buffer.trim().is_empty()
        && dispatch_event(&buffer.replace("\r\n", "\n"), &tx, &mut usage)
            .await
            .is_break()
    {
        return;
    }

    let _ = tx
        .send(StreamEvent::Error(ProviderError::StreamInterrupted(
            "Stream ended before completion".to_string(),
        )))
        .await;
}

/// Handle the `data:` lines of one event. Breaks once the stream is
/// finished or the receiver is gone.
async fn dispatch_event(
    event_text: &str,
    tx: &mpsc::Sender<StreamEvent>,
    usage: &mut Usage,
) -> ControlFlow<()> {
    for line in event_text.lines() {
        let payload = if let Some(p) = line.strip_prefix("data: ") {
            p
        } else if let Some(p) = line.strip_prefix("data:") {
            p
        } else {
            continue;
        };

        if payload.trim() == "[DONE]" {
            let _ = tx
                .send(StreamEvent::Done {
                    tokens_in: usage.tokens_in,
                    tokens_out: usage.tokens_out,
                })
                .await;
            return ControlFlow::Break(());
        }

        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Failed to parse SSE data: {}", e);
                continue;
            }
        };

        if let Some(err) = chunk.error {
            let _ = tx
                .send(StreamEvent::Error(ProviderError::RequestFailed(
                    err.message,
                )))
                .await;
            return ControlFlow::Break(());
        }
        if let Some(u) = chunk.usage {
            usage.tokens_in = u.prompt_tokens.or(usage.tokens_in);
            usage.tokens_out = u.completion_tokens.or(usage.tokens_out);
        }
        let content = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content);
        if let Some(content) = content {
            if !content.is_empty() && tx.send(StreamEvent::Token(content)).await.is_err() {
                return ControlFlow::Break(()); // receiver dropped
            }
        }
    }
    ControlFlow::Continue(())
}

/// Decode everything in `byte_buf` except an incomplete trailing character,
/// which stays for the next chunk. Invalid bytes become U+FFFD.
fn decode_utf8_prefix(byte_buf: &mut Vec<u8>) -> String {
    let mut decoded = String::new();
    loop {
        match std::str::from_utf8(byte_buf) {
            Ok(s) => {
                decoded.push_str(s);
                byte_buf.clear();
                return decoded;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                decoded.push_str(&String::from_utf8_lossy(&byte_buf[..valid]));
                match e.error_len() {
                    Some(len) => {
                        decoded.push(char::REPLACEMENT_CHARACTER);
                        byte_buf.drain(..valid + len);
                    }
                    None => {
                        byte_buf.drain(..valid);
                        return decoded;
                    }
                }
            }
        }
    }
}

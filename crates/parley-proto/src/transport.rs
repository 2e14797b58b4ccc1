//! Transport abstraction for the chat service

use std::pin::Pin;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    event::{StreamEvent, decode_line},
    types::{ChatRequest, ConversationMeta, Message},
};

/// A stream of decoded events. Item-level `Err` values with
/// [`Error::is_decode`] are per-line and skippable; any other `Err` is fatal
/// to the session.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Operations the chat service exposes to this client
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Create a server-side conversation
    async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationMeta>;

    /// Send a turn and stream back the assistant's events
    async fn send(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<EventStream>;

    /// Fetch the stored messages of a conversation
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Ask the service to stop the running task for a conversation.
    /// Idempotent: safe to call when nothing is running.
    async fn stop(&self, conversation_id: &str) -> Result<()>;

    /// Rename a conversation
    async fn rename(&self, conversation_id: &str, title: &str) -> Result<()>;

    /// Delete a conversation
    async fn delete(&self, conversation_id: &str) -> Result<()>;
}

/// Reassembles complete lines from arbitrarily chunked stream bytes
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk, returning every complete line it closed
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim().to_string();
            self.buf.drain(..=pos);
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Take the trailing partial line, if any content remains
    pub fn finish(self) -> Option<String> {
        let line = self.buf.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

/// HTTP transport - talks line-delimited JSON to the chat service
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for a service base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-success response into an API error carrying the body text
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::api(status.as_u16(), message))
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationMeta> {
        let response = self
            .client
            .post(self.url("/api/conversations"))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;
        let meta = check_status(response).await?.json().await?;
        Ok(meta)
    }

    async fn send(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<EventStream> {
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        tracing::debug!(conversation = %request.conversation_id, "chat stream open");

        let mut bytes = response.bytes_stream();
        let event_stream: EventStream = Box::pin(stream! {
            let mut lines = LineBuffer::new();
            while let Some(chunk) = bytes.next().await {
                if cancel.is_cancelled() {
                    yield Err(Error::Aborted);
                    return;
                }
                match chunk {
                    Ok(chunk) => {
                        for line in lines.push(&String::from_utf8_lossy(&chunk)) {
                            yield decode_line(&line);
                        }
                    }
                    Err(e) => {
                        yield Err(Error::Http(e));
                        return;
                    }
                }
            }
            if let Some(line) = lines.finish() {
                yield decode_line(&line);
            }
        });

        Ok(event_stream)
    }

    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let response = self
            .client
            .get(self.url(&format!("/api/conversations/{conversation_id}/messages")))
            .send()
            .await?;
        let messages = check_status(response).await?.json().await?;
        Ok(messages)
    }

    async fn stop(&self, conversation_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/conversations/{conversation_id}/stop")))
            .send()
            .await?;
        // Nothing running (or already gone) counts as stopped.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn rename(&self, conversation_id: &str, title: &str) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/api/conversations/{conversation_id}/title")))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/conversations/{conversation_id}")))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_single_chunk() {
        let mut buf = LineBuffer::new();
        let lines = buf.push("{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_split_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push("{\"a\"").is_empty());
        assert_eq!(buf.push(":1}\n"), vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_line_buffer_skips_blank_lines() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("\n\n{\"a\":1}\n\n"), vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_line_buffer_trailing_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push("{\"a\":1}").is_empty());
        assert_eq!(buf.finish(), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn test_line_buffer_crlf() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("{\"a\":1}\r\n"), vec!["{\"a\":1}"]);
    }
}

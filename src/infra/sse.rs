//! Server-sent events push transport over HTTP.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::{header, Client, StatusCode};

use crate::{
    domain::UserId,
    realtime::connection_manager::{FrameStream, PushTransport, TransportError},
};

/// Splits an SSE byte stream into event payloads.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence or a
/// line ending. Consecutive `data:` lines of one event are joined with `\n`.
/// Other fields and `:` comment lines are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }

            if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_owned());
            }
        }
        events
    }
}

#[derive(Debug, Clone)]
pub struct HttpPushTransport {
    client: Client,
    stream_url: String,
    auth_token: Option<String>,
}

impl HttpPushTransport {
    pub fn new(client: Client, stream_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client,
            stream_url: stream_url.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn open(&self, identity: UserId) -> Result<FrameStream, TransportError> {
        let mut request = self
            .client
            .get(&self.stream_url)
            .query(&[("identity", identity)])
            .header(header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TransportError::Unauthorized)
            }
            status if !status.is_success() => {
                return Err(TransportError::Connect(format!(
                    "stream endpoint answered {status}"
                )))
            }
            _ => {}
        }

        let mut decoder = SseDecoder::default();
        let frames = response.bytes_stream().flat_map(move |chunk| {
            let items: Vec<Result<String, TransportError>> = match chunk {
                Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect(),
                Err(error) => vec![Err(TransportError::Stream(error.to_string()))],
            };
            stream::iter(items)
        });

        Ok(Box::pin(frames))
    }
}

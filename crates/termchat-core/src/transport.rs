use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Written over the response buffer when an exchange fails.
pub const FAILURE_SENTINEL: &str = "Could not complete request";

/// One fully built request, owned so it can move onto a worker task.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub endpoint: String,
    pub api_key: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response exceeded {limit} bytes")]
    Capacity { limit: usize },

    #[error("exchange worker failed: {0}")]
    Worker(String),

    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Per-exchange accumulation buffer. Chunks land at the running offset and
/// the total may never exceed `limit`.
#[derive(Debug)]
pub struct ResponseBuffer {
    bytes: Vec<u8>,
    offset: usize,
    limit: usize,
}

impl ResponseBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            offset: 0,
            limit,
        }
    }

    /// Append one chunk as delivered by the transport.
    pub fn write(&mut self, chunk: &[u8]) -> Result<usize, TransportError> {
        let end = self.offset + chunk.len();
        if end > self.limit {
            return Err(TransportError::Capacity { limit: self.limit });
        }

        self.bytes.truncate(self.offset);
        self.bytes.extend_from_slice(chunk);
        self.offset = end;
        Ok(chunk.len())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Replace whatever was received with [`FAILURE_SENTINEL`].
    pub fn fail(&mut self) {
        self.bytes.clear();
        self.bytes.extend_from_slice(FAILURE_SENTINEL.as_bytes());
        self.offset = 0;
    }

    /// Finalize the exchange and hand the text to the caller. Invalid UTF-8
    /// is replaced rather than rejected; the lookup reports anything unusable.
    pub fn into_text(self) -> String {
        match String::from_utf8(self.bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("response contained invalid UTF-8");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        }
    }
}

/// HTTP capability the pipeline depends on. Implementations stream the
/// response body into `sink` chunk by chunk.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(
        &self,
        request: &ExchangeRequest,
        sink: &mut ResponseBuffer,
    ) -> Result<(), TransportError>;
}

#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(
        &self,
        request: &ExchangeRequest,
        sink: &mut ResponseBuffer,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&request.endpoint)
            .header("Authorization", format!("Bearer {}", request.api_key))
            .header("Content-Type", "application/json")
            .body(request.body.clone())
            .send()
            .await?;

        // Error bodies are still delivered; the lookup decides whether they
        // hold a reply.
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, endpoint = %request.endpoint, "completion endpoint returned an error status");
        }

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            sink.write(&chunk)?;
            tracing::trace!(len = chunk.len(), offset = sink.offset(), "received chunk");
        }

        Ok(())
    }
}

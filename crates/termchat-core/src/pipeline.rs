//! Completion request pipeline
//!
//! One call to [`CompletionPipeline::complete`] is one exchange: record the
//! user's input, send the whole conversation, pull the reply out of the
//! response and record it. Every step is a hard gate; a failure returns
//! immediately and leaves the context as the previous step left it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::context::{ContextBuffer, ContextError, Message, Role};
use crate::json::{DocumentLookup, JsonLookup};
use crate::transport::{ExchangeRequest, ResponseBuffer, Transport, TransportError};
use crate::MAX_DOCUMENT_LEN;

/// Field holding the model's reply in a completion response.
pub const REPLY_KEY: &str = "content";

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub api_key: String,
    pub model: String,
    /// Role used for the leading instruction message, e.g. `system`.
    pub system_role: String,
    pub instruction: String,
    pub endpoint: String,
}

/// Receives at most one tick per elapsed second while a worker exchange is
/// pending.
pub trait ProgressReporter: Send + Sync {
    fn tick(&self, elapsed: Duration);

    fn finish(&self) {}
}

#[derive(Clone)]
pub enum ExchangeMode {
    /// Await the transport on the calling task.
    Inline,
    /// Run the transport on a spawned worker task and report progress while
    /// waiting for it.
    Worker(Arc<dyn ProgressReporter>),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Overflow(#[from] ContextError),

    #[error("{response}: {source}")]
    Transport {
        response: String,
        #[source]
        source: TransportError,
    },

    #[error("could not read a reply from the response ({reason}). Attempted to parse {response}")]
    MalformedResponse { reason: String, response: String },

    #[error("another completion request is already in flight")]
    Busy,
}

pub struct CompletionPipeline {
    transport: Arc<dyn Transport>,
    lookup: Box<dyn JsonLookup>,
    context: Mutex<ContextBuffer>,
    mode: ExchangeMode,
    in_flight: AtomicBool,
    response_limit: usize,
}

impl CompletionPipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            lookup: Box::new(DocumentLookup),
            context: Mutex::new(ContextBuffer::new()),
            mode: ExchangeMode::Inline,
            in_flight: AtomicBool::new(false),
            response_limit: MAX_DOCUMENT_LEN,
        }
    }

    pub fn with_lookup(mut self, lookup: impl JsonLookup + 'static) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    pub fn with_mode(mut self, mode: ExchangeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_context(mut self, context: ContextBuffer) -> Self {
        self.context = Mutex::new(context);
        self
    }

    pub fn with_response_limit(mut self, limit: usize) -> Self {
        self.response_limit = limit;
        self
    }

    /// Locks the conversation. Drop the guard before calling [`record`] or
    /// [`complete`] on the same pipeline; both take this lock and would wait
    /// on it forever. [`history`] avoids holding it.
    ///
    /// [`record`]: Self::record
    /// [`complete`]: Self::complete
    /// [`history`]: Self::history
    pub fn context(&self) -> MutexGuard<'_, ContextBuffer> {
        // Appends are single pushes, so a poisoned buffer is still consistent
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of every message so far, in order.
    pub fn history(&self) -> Vec<Message> {
        self.context().messages().to_vec()
    }

    /// Add a message outside of an exchange, e.g. captured command output.
    pub fn record(&self, content: &str, role: Role) -> Result<(), ContextError> {
        self.context().append(content, role)
    }

    /// Run one exchange and return the model's reply.
    ///
    /// Only one exchange may be in flight; a concurrent call is rejected with
    /// [`PipelineError::Busy`] before it touches the context. There is no
    /// timeout and no cancellation. `Worker` mode must run inside a tokio
    /// runtime.
    pub async fn complete(
        &self,
        settings: &CompletionSettings,
        input: &str,
    ) -> Result<String, PipelineError> {
        let _exchange = ExchangeGuard::acquire(&self.in_flight).ok_or(PipelineError::Busy)?;

        let history = {
            let mut context = self.context();
            context.append(input, Role::User)?;
            context.serialize(MAX_DOCUMENT_LEN)?
        };

        let request = ExchangeRequest {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            body: build_body(settings, &history),
        };
        tracing::debug!(
            model = %settings.model,
            bytes = request.body.len(),
            "issuing completion request"
        );

        let (mut buffer, outcome) = match &self.mode {
            ExchangeMode::Inline => {
                let mut buffer = ResponseBuffer::new(self.response_limit);
                let outcome = self.transport.exchange(&request, &mut buffer).await;
                (buffer, outcome)
            }
            ExchangeMode::Worker(progress) => self.exchange_on_worker(request, progress.as_ref()).await,
        };

        if let Err(source) = outcome {
            tracing::error!(error = %source, "completion exchange failed");
            buffer.fail();
            return Err(PipelineError::Transport {
                response: buffer.into_text(),
                source,
            });
        }

        let response = buffer.into_text();
        let reply = match self.lookup.lookup(&response, REPLY_KEY) {
            Ok(reply) if !reply.is_empty() => reply,
            Ok(_) => {
                return Err(PipelineError::MalformedResponse {
                    reason: "empty reply".to_string(),
                    response,
                })
            }
            Err(e) => {
                return Err(PipelineError::MalformedResponse {
                    reason: e.to_string(),
                    response,
                })
            }
        };

        self.context().append(&reply, Role::Assistant)?;
        tracing::debug!(bytes = reply.len(), "recorded reply");
        Ok(reply)
    }

    /// The worker owns the response buffer until it finishes and hands it
    /// back through its join handle, so the buffer is never shared.
    async fn exchange_on_worker(
        &self,
        request: ExchangeRequest,
        progress: &dyn ProgressReporter,
    ) -> (ResponseBuffer, Result<(), TransportError>) {
        let transport = Arc::clone(&self.transport);
        let limit = self.response_limit;

        let mut worker = tokio::spawn(async move {
            let mut buffer = ResponseBuffer::new(limit);
            let outcome = transport.exchange(&request, &mut buffer).await;
            (buffer, outcome)
        });

        let started = Instant::now();
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let joined = loop {
            tokio::select! {
                joined = &mut worker => break joined,
                _ = ticker.tick() => progress.tick(started.elapsed()),
            }
        };
        progress.finish();

        joined.unwrap_or_else(|e| {
            (
                ResponseBuffer::new(limit),
                Err(TransportError::Worker(e.to_string())),
            )
        })
    }
}

/// `{"model": .., "messages": [<instruction>, <history>...]}`
fn build_body(settings: &CompletionSettings, history: &str) -> String {
    let instruction = json!({
        "role": settings.system_role,
        "content": settings.instruction,
    });

    let mut body = format!(
        r#"{{"model":{},"messages":[{}"#,
        Value::from(settings.model.as_str()),
        instruction
    );
    if !history.is_empty() {
        body.push(',');
        body.push_str(history);
    }
    body.push_str("]}");
    body
}

struct ExchangeGuard<'a>(&'a AtomicBool);

impl<'a> ExchangeGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

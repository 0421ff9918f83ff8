pub mod config;
pub mod context;
pub mod json;
pub mod pipeline;
pub mod text;
pub mod transport;

// Re-export main types for convenience
pub use config::Config;
pub use context::{ContextBuffer, ContextError, Message, Role};
pub use json::{DocumentLookup, JsonLookup, LookupError, ScanningLookup};
pub use pipeline::{CompletionPipeline, CompletionSettings, ExchangeMode, PipelineError, ProgressReporter};
pub use transport::{ExchangeRequest, HttpTransport, ResponseBuffer, Transport, TransportError};

/// Messages kept per conversation.
pub const CONTEXT_CAPACITY: usize = 255;
/// Bytes kept per message; longer content is truncated on a char boundary.
pub const MAX_MESSAGE_LEN: usize = 4096;
/// Upper bound for a serialized history and for a response document.
pub const MAX_DOCUMENT_LEN: usize = 65536;

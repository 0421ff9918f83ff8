//! Diagnostics for termchat. Events go to stderr; stdout belongs to the chat
//! window and the prompt.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is unset or unparsable. Only warnings, so a
/// normal session shows nothing but the conversation.
const DEFAULT_DIRECTIVES: &str = "warn";

/// Install the global subscriber. `RUST_LOG` selects what is shown, e.g.
/// `RUST_LOG=termchat_core=debug` to trace request sizes and recorded replies,
/// or `RUST_LOG=termchat=info` to see which commands get run.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

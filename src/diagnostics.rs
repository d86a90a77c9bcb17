//! Error message shaping and logging setup.

use tracing_subscriber::EnvFilter;

/// Longest message body we print before eliding the tail.
const MAX_MESSAGE_CHARS: usize = 400;

/// Normalize a message for display: collapse line breaks and cap the length.
pub fn error_message(msg: impl Into<String>) -> String {
    let msg = msg.into();
    let mut out = String::with_capacity(msg.len().min(MAX_MESSAGE_CHARS + 3));
    for (count, ch) in msg.chars().enumerate() {
        if count == MAX_MESSAGE_CHARS {
            out.push_str("...");
            break;
        }
        match ch {
            '\r' => {}
            '\n' | '\t' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Map the `-v` count onto a default log level.
fn level_for(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Initialize the stderr subscriber. `RUST_LOG` directives apply on top of
/// the verbosity level.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

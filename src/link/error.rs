use std::time::Duration;

/// Errors raised by the bot link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Socket connect, read or write failed
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect attempt did not complete in time
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// An inbound line grew past the length limit without a newline
    #[error("inbound line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// An inbound line was not valid JSON
    #[error("malformed message: {0}")]
    Protocol(#[source] serde_json::Error),

    /// Outbound command data could not be turned into a JSON object
    #[error("cannot serialize data for command `{command}`: {reason}")]
    Serialization { command: String, reason: String },

    /// A server field does not fit the status snapshot
    #[error("cannot apply `{field}` from `{kind}` to status snapshot: {source}")]
    SnapshotMerge {
        kind: String,
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

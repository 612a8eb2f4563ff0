use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a recording ended in FAILED. Cancel and finish are not errors.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("connection to {url} timed out after {after:?} without a response")]
    Timeout { url: String, after: Duration },

    #[error("still connecting when the recording window closed")]
    WindowClosed,

    #[error("{url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("{url} did not send a usable icy-metaint header")]
    MissingMetaInterval { url: String },

    #[error("stream i/o failed: {0}")]
    StreamIo(#[from] std::io::Error),

    #[error("source closed the stream before the recording was finished")]
    SourceClosed,

    #[error("finalizing {} failed: {message}", path.display())]
    Finalize { path: PathBuf, message: String },

    #[error("capture task ended without reporting")]
    SessionLost,
}

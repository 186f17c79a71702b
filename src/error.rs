//! Error types for the chat client and the visual markup pipeline.
//!
//! Stream-level problems (malformed event payloads, transport failures while
//! reading the body) are not represented here: the stream consumer recovers
//! from them and reports them as [`crate::stream::StreamEvent`]s instead.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn one visual segment into a renderable artifact.
///
/// Every variant is recovered at the segment boundary: the segment is
/// replaced by an inline error indicator and the rest of the transcript
/// renders normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisualError {
    /// The segment is not a well-formed markup document.
    #[error("malformed visual markup: {0}")]
    MalformedVisualMarkup(String),
    /// The root `type` attribute is missing, empty, or not a known kind.
    #[error("unknown visual type: {0:?}")]
    UnknownVisualType(String),
    /// A required positional attribute is absent from a child element.
    #[error("<{element}> is missing required attribute `{attribute}`")]
    MissingLayoutAttribute { element: String, attribute: String },
    /// A positional attribute is present but does not start with an integer.
    #[error("attribute `{attribute}` has non-integer value {value:?}")]
    InvalidLayoutAttribute { attribute: String, value: String },
}

/// Failure to load [`crate::config::Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors surfaced by [`crate::ChatSession`] to its caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("cannot attach {path}: {detail}")]
    Attachment { path: PathBuf, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

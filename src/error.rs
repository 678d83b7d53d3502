//! Error types for mp3cast
//!
//! Every failure the encoder layer can hit is surfaced as an [`Error`]
//! value. The [`ErrorCode`] trait maps each variant to a stable negative
//! integer so boundary callers that only understand numbers still get a
//! distinct code per failure.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid encoder config: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot open input {path:?}: {source}")]
    OpenInput { path: PathBuf, source: io::Error },

    #[error("cannot open output {path:?}: {source}")]
    OpenOutput { path: PathBuf, source: io::Error },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to create LAME encoder")]
    EncoderInit,

    #[error("LAME rejected configuration ({stage}): {detail}")]
    Build { stage: &'static str, detail: String },

    #[error("LAME encode failed: {0}")]
    Encode(String),

    #[error("encoder session is not initialized")]
    NotInitialized,

    #[error("listener failed: {0}")]
    Listener(String),

    #[error("no LAME tag frame at offset {offset} of the output file")]
    TagMissing { offset: u64 },

    #[error("LAME rejected ID3 tag: {0}")]
    Id3Tag(String),

    #[error("encoder is busy with a conversion on this thread")]
    Busy,
}

impl From<mp3lame_encoder::EncodeError> for Error {
    fn from(value: mp3lame_encoder::EncodeError) -> Self {
        Self::Encode(format!("{:?}", value))
    }
}

impl From<mp3lame_encoder::Id3TagError> for Error {
    fn from(value: mp3lame_encoder::Id3TagError) -> Self {
        Self::Id3Tag(format!("{:?}", value))
    }
}

/// Numeric error codes for callers across a language boundary
pub trait ErrorCode {
    /// Negative code identifying the failure
    fn code(&self) -> i32;

    /// Human-readable message
    fn message(&self) -> String;
}

impl ErrorCode for Error {
    fn code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) => -1,
            Error::InvalidInput(_) => -2,
            Error::OpenInput { .. } => -3,
            Error::OpenOutput { .. } => -4,
            Error::Io(_) => -5,
            Error::EncoderInit => -6,
            Error::Build { .. } => -7,
            Error::Encode(_) => -8,
            Error::NotInitialized => -9,
            Error::Listener(_) => -10,
            Error::TagMissing { .. } => -11,
            Error::Id3Tag(_) => -12,
            Error::Busy => -13,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Log an error with its code and the operation that hit it
pub fn log_error(err: &Error, context: &str) {
    log::error!("{} failed: code={}, message={}", context, err.code(), err);
}

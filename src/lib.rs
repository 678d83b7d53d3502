//! mp3cast - PCM/WAV to MP3 over LAME
//!
//! Two ways in:
//! - [`convert_file`] converts a whole PCM or WAV file, reporting progress
//!   to a [`ConvertListener`]
//! - [`Mp3Session`] encodes live buffers that the caller feeds, flushes
//!   and closes explicitly
//!
//! [`bridge`] wraps both behind flat entry points for foreign callers.

pub mod bridge;
pub mod config;
pub mod convert;
pub mod encoder;
pub mod error;
pub mod pcm;
pub mod probe;
pub mod session;
pub mod tags;
pub mod wav;

pub use convert::{convert_file, ConvertEvent, ConvertJob, ConvertListener, ConvertSummary, InputFormat};
pub use encoder::{encoder_version, BitrateMode, EncoderConfig};
pub use error::{Error, ErrorCode, Result};
pub use session::{Mp3Recorder, Mp3Session};
pub use tags::Id3Tags;

//! Boundary facade for callers that cannot own Rust objects
//!
//! Exposes the encoder as six flat entry points over one process-wide
//! session. Every entry point takes the same lock, so streaming calls and
//! batch conversions never overlap. Failures come back as the negative
//! codes from [`ErrorCode`]; successful calls return zero or a byte count.
//!
//! A conversion holds the lock while its listener runs. Calling back into
//! the session entry points from inside that listener fails with
//! [`Error::Busy`] instead of deadlocking.

#[cfg(feature = "jni")]
pub mod jni;

use once_cell::sync::Lazy;
use std::cell::Cell;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::convert::{self, ConvertJob, ConvertListener, InputFormat};
use crate::encoder::{self, EncoderConfig, LameBackend};
use crate::error::{log_error, Error, ErrorCode, Result};
use crate::session::Mp3Session;

static SESSION: Lazy<Mutex<Mp3Session<LameBackend>>> = Lazy::new(|| Mutex::new(Mp3Session::new()));

thread_local! {
    /// Set while this thread runs a conversion and holds the lock
    static CONVERTING: Cell<bool> = Cell::new(false);
}

/// Marks the current thread as converting until dropped
struct ConvertingGuard;

impl ConvertingGuard {
    fn enter() -> Self {
        CONVERTING.with(|c| c.set(true));
        ConvertingGuard
    }
}

impl Drop for ConvertingGuard {
    fn drop(&mut self) {
        CONVERTING.with(|c| c.set(false));
    }
}

fn session() -> Result<MutexGuard<'static, Mp3Session<LameBackend>>> {
    if CONVERTING.with(Cell::get) {
        return Err(Error::Busy);
    }
    Ok(SESSION.lock().unwrap_or_else(PoisonError::into_inner))
}

fn to_code(result: Result<usize>, context: &str) -> i32 {
    match result {
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(e) => {
            log_error(&e, context);
            e.code()
        }
    }
}

fn non_negative(value: i32, name: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidInput(format!("{} must not be negative, got {}", name, value)))
}

fn encoder_config(input_sample_rate: i32, channels: i32, output_sample_rate: i32, quality: i32) -> Result<EncoderConfig> {
    let channels = non_negative(channels, "channels")?;
    let quality = non_negative(quality, "quality")?;
    Ok(EncoderConfig::new(
        non_negative(input_sample_rate, "input sample rate")?,
        u16::try_from(channels).unwrap_or(u16::MAX),
        non_negative(output_sample_rate, "output sample rate")?,
    )
    .with_quality(u8::try_from(quality).unwrap_or(u8::MAX)))
}

/// Version of the linked LAME library
pub fn encoder_version() -> String {
    encoder::encoder_version()
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn try_convert(
    input_path: &str,
    input_sample_rate: i32,
    channels: i32,
    output_path: &str,
    output_sample_rate: i32,
    is_wav: bool,
    quality: i32,
    listener: &mut dyn ConvertListener,
) -> Result<usize> {
    let config = encoder_config(input_sample_rate, channels, output_sample_rate, quality)?;
    let format = if is_wav { InputFormat::Wav } else { InputFormat::Pcm };
    let job = ConvertJob::new(PathBuf::from(input_path), PathBuf::from(output_path), config).with_format(format);

    let _lock = session()?;
    let _converting = ConvertingGuard::enter();
    convert::convert_file(&job, listener)?;
    Ok(0)
}

/// Convert a PCM or WAV file to MP3, reporting progress to `listener`.
///
/// Returns 0 on success.
#[allow(clippy::too_many_arguments)]
pub fn convert_file_to_mp3(
    input_path: &str,
    input_sample_rate: i32,
    channels: i32,
    output_path: &str,
    output_sample_rate: i32,
    is_wav: bool,
    quality: i32,
    listener: &mut dyn ConvertListener,
) -> i32 {
    to_code(
        try_convert(
            input_path,
            input_sample_rate,
            channels,
            output_path,
            output_sample_rate,
            is_wav,
            quality,
            listener,
        ),
        "convert_file_to_mp3",
    )
}

pub(crate) fn try_init_encoder(
    input_sample_rate: i32,
    channels: i32,
    output_sample_rate: i32,
    quality: i32,
) -> Result<usize> {
    let config = encoder_config(input_sample_rate, channels, output_sample_rate, quality)?;
    session()?.initialize(config)?;
    Ok(0)
}

/// Open the process-wide encoder, replacing any open one. Returns 0 on success.
pub fn init_encoder(input_sample_rate: i32, channels: i32, output_sample_rate: i32, quality: i32) -> i32 {
    to_code(
        try_init_encoder(input_sample_rate, channels, output_sample_rate, quality),
        "init_encoder",
    )
}

pub(crate) fn try_encode(left: &[i16], right: &[i16], sample_count: i32, out: &mut [u8]) -> Result<usize> {
    let sample_count = non_negative(sample_count, "sample count")? as usize;
    session()?.encode(left, right, sample_count, out)
}

/// Encode `sample_count` frames into `out`; bytes written or a negative code
pub fn encode(left: &[i16], right: &[i16], sample_count: i32, out: &mut [u8]) -> i32 {
    to_code(try_encode(left, right, sample_count, out), "encode")
}

pub(crate) fn try_flush(out: &mut [u8], output_path: &str) -> Result<usize> {
    session()?.flush(out, std::path::Path::new(output_path))
}

/// Flush into `out` and finalize the file at `output_path`; bytes flushed or a negative code
pub fn flush(out: &mut [u8], output_path: &str) -> i32 {
    to_code(try_flush(out, output_path), "flush")
}

/// Close the process-wide encoder; no-op when none is open
pub fn close_encoder() {
    match session() {
        Ok(mut session) => session.close(),
        Err(e) => log_error(&e, "close_encoder"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::NoopListener;
    use crate::probe::FrameHeader;
    use crate::session::FLUSH_BUFFER_LEN;
    use std::io::Write;

    #[test]
    fn version_is_reported() {
        assert!(!encoder_version().is_empty());
    }

    // The bridge holds one global session, so its lifecycle is exercised in a single test
    #[test]
    fn global_session_lifecycle() {
        close_encoder();
        let mut out = vec![0u8; 16 * 1024];

        assert_eq!(encode(&[0; 8], &[0; 8], 8, &mut out), Error::NotInitialized.code());
        assert_eq!(init_encoder(44100, 2, 44100, 5), 0);
        assert_eq!(init_encoder(44100, 2, 44100, 5), 0);
        assert_eq!(init_encoder(44100, -2, 44100, 5), Error::InvalidInput(String::new()).code());

        assert_eq!(init_encoder(44100, 2, 44100, 5), 0);
        assert_eq!(encode(&[0; 8], &[0; 8], -1, &mut out), Error::InvalidInput(String::new()).code());
        assert_eq!(encode(&[0; 8], &[0; 8], 9, &mut out), Error::InvalidInput(String::new()).code());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.mp3");
        let mut file = std::fs::File::create(&path).unwrap();
        let left = vec![0i16; 4410];
        for _ in 0..10 {
            let n = encode(&left, &left, left.len() as i32, &mut out);
            assert!(n >= 0);
            file.write_all(&out[..n as usize]).unwrap();
        }
        drop(file);
        let before = std::fs::read(&path).unwrap();

        let mut flush_out = vec![0u8; FLUSH_BUFFER_LEN];
        let flushed = flush(&mut flush_out, path.to_str().unwrap());
        assert!(flushed >= 0);

        // first frame now carries the VBR tag, the audio after it is untouched
        let after = std::fs::read(&path).unwrap();
        assert_eq!(after.len(), before.len());
        let header = FrameHeader::parse(&after).unwrap();
        assert!(header.is_tag_frame(&after[..header.frame_len]));
        assert_eq!(&after[header.frame_len..], &before[header.frame_len..]);

        close_encoder();
        close_encoder();
        assert_eq!(encode(&[0; 8], &[0; 8], 8, &mut out), Error::NotInitialized.code());
    }

    #[test]
    fn convert_reports_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.pcm");
        let output = dir.path().join("out.mp3");
        let code = convert_file_to_mp3(
            input.to_str().unwrap(),
            44100,
            2,
            output.to_str().unwrap(),
            44100,
            false,
            5,
            &mut NoopListener,
        );
        assert_eq!(
            code,
            Error::OpenInput {
                path: input,
                source: std::io::Error::from(std::io::ErrorKind::NotFound)
            }
            .code()
        );
    }

    #[test]
    fn listener_cannot_reenter_the_session() {
        struct Reentrant {
            codes: Vec<i32>,
        }

        impl ConvertListener for Reentrant {
            fn on_progress(&mut self, _percent: f32) -> Result<()> {
                let mut out = [0u8; 64];
                self.codes.push(encode(&[0; 4], &[0; 4], 4, &mut out));
                self.codes.push(init_encoder(44100, 2, 44100, 5));
                close_encoder();
                Ok(())
            }

            fn on_end(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcm");
        let output = dir.path().join("out.mp3");
        std::fs::write(&input, vec![0u8; 4096]).unwrap();

        let mut listener = Reentrant { codes: Vec::new() };
        let code = convert_file_to_mp3(
            input.to_str().unwrap(),
            44100,
            2,
            output.to_str().unwrap(),
            44100,
            false,
            5,
            &mut listener,
        );

        assert_eq!(code, 0);
        assert_eq!(listener.codes, vec![Error::Busy.code(), Error::Busy.code()]);
        assert!(session().is_ok());
    }
}

//! Batch PCM/WAV to MP3 file conversion
//!
//! Reads the input in fixed-size chunks, encodes each through a local
//! [`Mp3Session`], and reports progress to a [`ConvertListener`] after
//! every chunk.

use crossbeam_channel::Sender;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use crate::encoder::{EncoderBackend, EncoderConfig, LameBackend};
use crate::error::{Error, Result};
use crate::pcm;
use crate::session::{self, Mp3Session, FLUSH_BUFFER_LEN};

/// Frames read per chunk unless the job says otherwise
pub const DEFAULT_CHUNK_FRAMES: usize = 8192;

/// Bytes skipped at the start of a WAV input
pub const WAV_HEADER_LEN: u64 = 44;

/// Layout of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Headerless little-endian 16-bit PCM
    Pcm,
    /// PCM behind a canonical 44-byte WAV header
    Wav,
}

/// One file conversion
#[derive(Debug, Clone)]
pub struct ConvertJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub encoder: EncoderConfig,
    pub format: InputFormat,
    pub chunk_frames: usize,
}

impl ConvertJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, encoder: EncoderConfig) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            encoder,
            format: InputFormat::Pcm,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }

    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_chunk_frames(mut self, chunk_frames: usize) -> Self {
        self.chunk_frames = chunk_frames;
        self
    }
}

/// What a finished conversion produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvertSummary {
    /// Size of the input file
    pub input_bytes: u64,
    /// PCM frames read and encoded
    pub frames: u64,
    /// Size of the MP3 file
    pub mp3_bytes: u64,
}

/// Receives progress while a conversion runs.
///
/// Both callbacks run synchronously on the converting thread. Returning an
/// error aborts the conversion.
pub trait ConvertListener {
    /// Percentage of the input consumed so far, 0.0 to 100.0
    fn on_progress(&mut self, percent: f32) -> Result<()>;

    /// Output file is complete and closed
    fn on_end(&mut self) -> Result<()>;
}

/// Listener that ignores everything
pub struct NoopListener;

impl ConvertListener for NoopListener {
    fn on_progress(&mut self, _percent: f32) -> Result<()> {
        Ok(())
    }

    fn on_end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Conversion events for a listener on another thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvertEvent {
    Progress(f32),
    Finished,
}

impl ConvertListener for Sender<ConvertEvent> {
    fn on_progress(&mut self, percent: f32) -> Result<()> {
        self.send(ConvertEvent::Progress(percent))
            .map_err(|_| Error::Listener("progress receiver disconnected".into()))
    }

    fn on_end(&mut self) -> Result<()> {
        self.send(ConvertEvent::Finished)
            .map_err(|_| Error::Listener("progress receiver disconnected".into()))
    }
}

/// Convert a PCM or WAV file to MP3 with LAME
pub fn convert_file<L: ConvertListener + ?Sized>(job: &ConvertJob, listener: &mut L) -> Result<ConvertSummary> {
    convert_with::<LameBackend, L>(job, listener)
}

/// Convert with an explicit encoder backend
pub fn convert_with<B: EncoderBackend, L: ConvertListener + ?Sized>(
    job: &ConvertJob,
    listener: &mut L,
) -> Result<ConvertSummary> {
    if job.chunk_frames == 0 {
        return Err(Error::InvalidInput("chunk size must be at least one frame".into()));
    }
    job.encoder.validate()?;

    // Both files are open before any encoder exists
    let input = File::open(&job.input).map_err(|source| Error::OpenInput {
        path: job.input.clone(),
        source,
    })?;
    let file_size = input.metadata()?.len();
    let output = session::create_output(&job.output)?;

    log::info!("Converting {:?} -> {:?} ({} bytes)", job.input, job.output, file_size);

    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(output);
    let mut consumed: u64 = 0;

    if job.format == InputFormat::Wav {
        consumed += io::copy(&mut (&mut reader).take(WAV_HEADER_LEN), &mut io::sink())?;
    }

    let mut session: Mp3Session<B> = Mp3Session::open(job.encoder.clone())?;

    let frame_len = job.encoder.channels as usize * pcm::BYTES_PER_SAMPLE;
    let mut chunk = vec![0u8; job.chunk_frames * frame_len];
    let mut samples: Vec<i16> = Vec::with_capacity(job.chunk_frames * job.encoder.channels as usize);
    let mut out = vec![0u8; session.output_capacity(job.chunk_frames).max(FLUSH_BUFFER_LEN)];
    let mut summary = ConvertSummary {
        input_bytes: file_size,
        ..Default::default()
    };

    loop {
        let read = read_chunk(&mut reader, &mut chunk)?;
        if read == 0 {
            break;
        }
        consumed += read as u64;

        let whole = read / frame_len * frame_len;
        samples.clear();
        pcm::decode_le(&chunk[..whole], &mut samples);
        summary.frames += (whole / frame_len) as u64;

        let written = session.encode_interleaved(&samples, &mut out)?;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "chunk: {} frames, {:.1} dB, {} bytes out",
                whole / frame_len,
                pcm::volume_db(&samples),
                written
            );
        }
        writer.write_all(&out[..written])?;
        summary.mp3_bytes += written as u64;

        listener.on_progress(progress(consumed, file_size))?;
    }

    let flushed = session.flush_buffer(&mut out)?;
    writer.write_all(&out[..flushed])?;
    summary.mp3_bytes += flushed as u64;

    let mut output = writer.into_inner().map_err(|e| e.into_error())?;
    session.finalize_file(&mut output)?;
    session.close();
    drop(output);
    drop(reader);

    log::info!(
        "Conversion finished: {} frames, {} MP3 bytes",
        summary.frames,
        summary.mp3_bytes
    );
    listener.on_end()?;
    Ok(summary)
}

/// Fill `buf` from `reader`, short only at end of input
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn progress(consumed: u64, total: u64) -> f32 {
    if total == 0 {
        return 100.0;
    }
    (consumed as f64 * 100.0 / total as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{FakeBackend, TagFrameBackend, FRAME_LEN};

    #[derive(Default)]
    struct Recording {
        progress: Vec<f32>,
        ended: bool,
    }

    impl ConvertListener for Recording {
        fn on_progress(&mut self, percent: f32) -> Result<()> {
            assert!(!self.ended, "progress after end");
            self.progress.push(percent);
            Ok(())
        }

        fn on_end(&mut self) -> Result<()> {
            self.ended = true;
            Ok(())
        }
    }

    fn write_input(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn progress_is_monotonic_and_reaches_100() {
        let dir = tempfile::tempdir().unwrap();
        // 1000 stereo frames, chunks of 64
        let input = write_input(&dir, "in.pcm", &vec![0u8; 4000]);
        let job = ConvertJob::new(&input, dir.path().join("out.mp3"), EncoderConfig::new(44100, 2, 44100))
            .with_chunk_frames(64);

        let mut listener = Recording::default();
        let summary = convert_with::<FakeBackend, _>(&job, &mut listener).unwrap();

        assert_eq!(summary.frames, 1000);
        assert_eq!(listener.progress.len(), 16);
        assert!(listener.progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*listener.progress.last().unwrap(), 100.0);
        assert!(listener.ended);
        // one byte per frame plus three flushed
        assert_eq!(summary.mp3_bytes, 1003);
        assert_eq!(std::fs::metadata(dir.path().join("out.mp3")).unwrap().len(), 1003);
    }

    #[test]
    fn wav_header_is_skipped_but_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0x52u8; 44];
        bytes.extend_from_slice(&[0u8; 400]);
        let input = write_input(&dir, "in.wav", &bytes);
        let job = ConvertJob::new(&input, dir.path().join("out.mp3"), EncoderConfig::new(8000, 1, 8000))
            .with_format(InputFormat::Wav);

        let mut listener = Recording::default();
        let summary = convert_with::<FakeBackend, _>(&job, &mut listener).unwrap();

        assert_eq!(summary.frames, 200);
        assert_eq!(listener.progress, vec![100.0]);
    }

    #[test]
    fn empty_input_still_ends() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "empty.pcm", &[]);
        let job = ConvertJob::new(&input, dir.path().join("out.mp3"), EncoderConfig::new(44100, 2, 44100));

        let mut listener = Recording::default();
        let summary = convert_with::<FakeBackend, _>(&job, &mut listener).unwrap();

        assert!(listener.progress.is_empty());
        assert!(listener.ended);
        assert_eq!(summary.mp3_bytes, 3);
    }

    #[test]
    fn missing_input_is_reported_before_output_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp3");
        let job = ConvertJob::new(dir.path().join("nope.pcm"), &output, EncoderConfig::new(44100, 2, 44100));

        let err = convert_with::<FakeBackend, _>(&job, &mut NoopListener).unwrap_err();
        assert!(matches!(err, Error::OpenInput { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn unwritable_output_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.pcm", &[0u8; 8]);
        let job = ConvertJob::new(&input, dir.path().join("no/such/dir/out.mp3"), EncoderConfig::new(44100, 2, 44100));

        let err = convert_with::<FakeBackend, _>(&job, &mut NoopListener).unwrap_err();
        assert!(matches!(err, Error::OpenOutput { .. }));
    }

    #[test]
    fn conversion_finalizes_lame_tag_in_place() {
        let dir = tempfile::tempdir().unwrap();
        // 0.5 s of mono 8 kHz
        let input = write_input(&dir, "in.pcm", &vec![0u8; 8000]);
        let output = dir.path().join("out.mp3");
        let job = ConvertJob::new(&input, &output, EncoderConfig::new(8000, 1, 8000)).with_chunk_frames(1000);

        let summary = convert_with::<TagFrameBackend, _>(&job, &mut NoopListener).unwrap();

        let data = std::fs::read(&output).unwrap();
        assert_eq!(data.len() as u64, summary.mp3_bytes);
        assert_eq!(data.len(), FRAME_LEN + 4000 + 3);
        assert_eq!(&data[36..40], b"Info");
        assert_eq!(&data[40..44], &4000u32.to_be_bytes());
        assert!(data[FRAME_LEN..FRAME_LEN + 4000].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn listener_error_aborts() {
        struct Failing;
        impl ConvertListener for Failing {
            fn on_progress(&mut self, _percent: f32) -> Result<()> {
                Err(Error::Listener("gone".into()))
            }
            fn on_end(&mut self) -> Result<()> {
                panic!("must not end");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.pcm", &[0u8; 64]);
        let job = ConvertJob::new(&input, dir.path().join("out.mp3"), EncoderConfig::new(44100, 2, 44100));
        let err = convert_with::<FakeBackend, _>(&job, &mut Failing).unwrap_err();
        assert!(matches!(err, Error::Listener(_)));
    }

    #[test]
    fn channel_listener_forwards_events() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, "in.pcm", &[0u8; 64]);
        let job = ConvertJob::new(&input, dir.path().join("out.mp3"), EncoderConfig::new(44100, 2, 44100));

        let (mut tx, rx) = crossbeam_channel::unbounded::<ConvertEvent>();
        convert_with::<FakeBackend, _>(&job, &mut tx).unwrap();
        drop(tx);

        let events: Vec<ConvertEvent> = rx.iter().collect();
        assert_eq!(events, vec![ConvertEvent::Progress(100.0), ConvertEvent::Finished]);
    }

    #[test]
    fn zero_size_total_reports_complete() {
        assert_eq!(progress(0, 0), 100.0);
        assert_eq!(progress(50, 200), 25.0);
    }
}

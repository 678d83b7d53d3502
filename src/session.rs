//! Streaming encoder session
//!
//! An [`Mp3Session`] owns at most one encoder. It starts uninitialized,
//! becomes ready on [`Mp3Session::initialize`], and goes back to
//! uninitialized on [`Mp3Session::close`] or drop. PCM is copied in from
//! caller buffers and encoded bytes are copied out into caller buffers;
//! nothing the caller owns is retained between calls.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::encoder::{max_encoded_size, EncoderBackend, EncoderConfig, LameBackend};
use crate::error::{Error, Result};
use crate::pcm;

/// Output buffer size that always fits a flush
pub const FLUSH_BUFFER_LEN: usize = 7200;

struct Active<B> {
    backend: B,
    config: EncoderConfig,
    /// Planes split from interleaved input
    split_left: Vec<i16>,
    split_right: Vec<i16>,
    scratch: Vec<u8>,
    frames_in: u64,
    flushed: bool,
}

impl<B: EncoderBackend> Active<B> {
    fn open(config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        let backend = B::open(&config)?;

        Ok(Self {
            backend,
            config,
            split_left: Vec::new(),
            split_right: Vec::new(),
            scratch: Vec::new(),
            frames_in: 0,
            flushed: false,
        })
    }

    fn duration_ms(&self) -> u64 {
        self.frames_in * 1000 / self.config.input_sample_rate as u64
    }

    fn encode_planes(&mut self, left: &[i16], right: &[i16], out: &mut [u8]) -> Result<usize> {
        let right = if self.config.channels == 1 { left } else { right };

        self.scratch.clear();
        self.scratch.reserve(out.len());
        let written = self
            .backend
            .encode(left, right, &mut self.scratch.spare_capacity_mut()[..out.len()])?;
        // SAFETY: the backend initialized exactly `written` bytes of spare capacity
        unsafe { self.scratch.set_len(written) };

        out[..written].copy_from_slice(&self.scratch);
        self.frames_in += left.len() as u64;

        if written == 0 {
            log::debug!("encoder buffered {} frames without output", left.len());
        }
        Ok(written)
    }

    fn flush_into(&mut self, out: &mut [u8]) -> Result<usize> {
        self.scratch.clear();
        self.scratch.reserve(out.len());
        let written = self
            .backend
            .flush(&mut self.scratch.spare_capacity_mut()[..out.len()])?;
        // SAFETY: the backend initialized exactly `written` bytes of spare capacity
        unsafe { self.scratch.set_len(written) };

        out[..written].copy_from_slice(&self.scratch);
        self.flushed = true;

        log::debug!("encoder flushed {} bytes", written);
        Ok(written)
    }

    /// LAME tag frame for the finished stream, empty when the backend writes none
    fn lame_tag(&self) -> Result<Vec<u8>> {
        let size = self.backend.lame_tag_size();
        let mut tag: Vec<u8> = Vec::with_capacity(size);
        if size == 0 {
            return Ok(tag);
        }
        let written = self
            .backend
            .lame_tag(tag.spare_capacity_mut())
            .ok_or_else(|| Error::Encode(format!("LAME tag frame of {} bytes not rendered", size)))?;
        if written < 4 || written > size {
            return Err(Error::Encode(format!("LAME tag frame has bad length {}", written)));
        }
        // SAFETY: the backend initialized exactly `written` bytes of spare capacity
        unsafe { tag.set_len(written) };
        Ok(tag)
    }
}

/// Caller-owned MP3 encoder session
pub struct Mp3Session<B: EncoderBackend = LameBackend> {
    active: Option<Active<B>>,
}

impl<B: EncoderBackend> Default for Mp3Session<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: EncoderBackend> Mp3Session<B> {
    /// Create an uninitialized session
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Create a session and initialize it in one step
    pub fn open(config: EncoderConfig) -> Result<Self> {
        let mut session = Self::new();
        session.initialize(config)?;
        Ok(session)
    }

    /// Check if an encoder is open
    pub fn is_ready(&self) -> bool {
        self.active.is_some()
    }

    /// Config of the open encoder
    pub fn config(&self) -> Option<&EncoderConfig> {
        self.active.as_ref().map(|a| &a.config)
    }

    /// Open a new encoder, closing the current one first if there is one
    pub fn initialize(&mut self, config: EncoderConfig) -> Result<()> {
        if self.active.is_some() {
            log::info!("Re-initializing: closing previous encoder");
            self.close();
        }
        self.active = Some(Active::open(config)?);
        Ok(())
    }

    /// Encode `sample_count` frames from two channel buffers into `out`.
    ///
    /// Returns the number of bytes written. For a mono session only `left`
    /// is encoded.
    pub fn encode(&mut self, left: &[i16], right: &[i16], sample_count: usize, out: &mut [u8]) -> Result<usize> {
        let active = self.active.as_mut().ok_or(Error::NotInitialized)?;
        if sample_count > left.len() || sample_count > right.len() {
            return Err(Error::InvalidInput(format!(
                "sample count {} exceeds channel buffers ({} left, {} right)",
                sample_count,
                left.len(),
                right.len()
            )));
        }
        active.encode_planes(&left[..sample_count], &right[..sample_count], out)
    }

    /// Encode interleaved frames into `out`.
    ///
    /// An incomplete trailing frame is ignored.
    pub fn encode_interleaved(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize> {
        let active = self.active.as_mut().ok_or(Error::NotInitialized)?;

        let mut left = std::mem::take(&mut active.split_left);
        let mut right = std::mem::take(&mut active.split_right);
        pcm::split_channels(pcm, active.config.channels, &mut left, &mut right);
        let result = active.encode_planes(&left, &right, out);
        active.split_left = left;
        active.split_right = right;

        result
    }

    /// Bytes of output buffer that always fit an encode of `frames` input frames
    pub fn output_capacity(&self, frames: usize) -> usize {
        let frames = match self.config() {
            Some(c) if c.output_sample_rate > c.input_sample_rate => {
                (frames as u64 * c.output_sample_rate as u64).div_ceil(c.input_sample_rate as u64) as usize
            }
            _ => frames,
        };
        max_encoded_size(frames)
    }

    /// Flush buffered audio into `out` without touching any file
    pub fn flush_buffer(&mut self, out: &mut [u8]) -> Result<usize> {
        let active = self.active.as_mut().ok_or(Error::NotInitialized)?;
        active.flush_into(out)
    }

    /// Flush buffered audio into `out`, then reopen `output_path` and
    /// write the LAME tag frame over its placeholder.
    ///
    /// The file is opened read/write without truncation, so everything
    /// already written to it is kept.
    pub fn flush(&mut self, out: &mut [u8], output_path: &Path) -> Result<usize> {
        let flushed = self.flush_buffer(out)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(output_path)
            .map_err(|source| Error::OpenOutput {
                path: output_path.to_path_buf(),
                source,
            })?;
        self.finalize_file(&mut file)?;

        log::info!(
            "Flushed {} bytes, finalized {:?} ({} ms)",
            flushed,
            output_path,
            self.encoded_duration_ms()
        );
        Ok(flushed)
    }

    /// Overwrite the placeholder frame LAME emitted after its ID3v2 tag
    /// with the final Xing/Info frame. Call after the flush.
    ///
    /// A stream shorter than the ID3v2 tag plus the frame is left alone,
    /// since the caller never wrote the placeholder.
    pub fn finalize_file<F: Read + Write + Seek>(&self, file: &mut F) -> Result<()> {
        let active = self.active.as_ref().ok_or(Error::NotInitialized)?;
        if !active.flushed {
            return Err(Error::InvalidInput("finalize called before flush".into()));
        }

        let tag = active.lame_tag()?;
        if tag.is_empty() {
            return Ok(());
        }

        let offset = active.backend.id3v2_tag_size() as u64;
        let len = file.seek(SeekFrom::End(0))?;
        if len < offset + tag.len() as u64 {
            log::warn!("stream of {} bytes has no room for the LAME tag, not finalized", len);
            return Ok(());
        }

        // LAME's placeholder is the tag's own frame header over a zeroed body
        file.seek(SeekFrom::Start(offset))?;
        let mut placeholder = vec![0u8; tag.len()];
        file.read_exact(&mut placeholder)?;
        let (head, body) = placeholder.split_at(4);
        let header_ok = head == &tag[..4] || head.iter().all(|&b| b == 0);
        if !header_ok || body.iter().any(|&b| b != 0) {
            return Err(Error::TagMissing { offset });
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&tag)?;
        file.flush()?;

        log::debug!("LAME tag frame ({} bytes) written at offset {}", tag.len(), offset);
        Ok(())
    }

    /// Duration of the PCM encoded so far, in milliseconds
    pub fn encoded_duration_ms(&self) -> u64 {
        self.active.as_ref().map_or(0, Active::duration_ms)
    }

    /// Close the encoder. Does nothing if none is open.
    pub fn close(&mut self) {
        if self.active.take().is_some() {
            log::info!("Encoder closed");
        }
    }
}

/// Create or truncate `path`, readable so the LAME tag can be finalized in place
pub(crate) fn create_output(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| Error::OpenOutput {
            path: path.to_path_buf(),
            source,
        })
}

/// Session that writes into its own output file.
///
/// Accepts raw little-endian interleaved PCM bytes as they arrive from a
/// capture device.
pub struct Mp3Recorder<B: EncoderBackend = LameBackend> {
    session: Mp3Session<B>,
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes of an incomplete frame held for the next call
    carry: Vec<u8>,
    samples: Vec<i16>,
    out: Vec<u8>,
    bytes_written: u64,
}

impl<B: EncoderBackend> Mp3Recorder<B> {
    pub fn create(path: impl AsRef<Path>, config: EncoderConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let session = Mp3Session::open(config)?;
        let file = create_output(&path)?;

        Ok(Self {
            session,
            writer: BufWriter::new(file),
            path,
            carry: Vec::new(),
            samples: Vec::new(),
            out: Vec::new(),
            bytes_written: 0,
        })
    }

    /// Encode a block of raw PCM bytes and append the result to the file
    pub fn write_pcm(&mut self, bytes: &[u8]) -> Result<usize> {
        let channels = self.session.config().map_or(1, |c| c.channels as usize);
        let frame_len = channels * pcm::BYTES_PER_SAMPLE;

        self.carry.extend_from_slice(bytes);
        let whole = self.carry.len() / frame_len * frame_len;
        if whole == 0 {
            return Ok(0);
        }

        self.samples.clear();
        pcm::decode_le(&self.carry[..whole], &mut self.samples);
        self.carry.drain(..whole);

        let frames = self.samples.len() / channels;
        self.out.resize(self.session.output_capacity(frames), 0);
        let written = self.session.encode_interleaved(&self.samples, &mut self.out)?;
        self.writer.write_all(&self.out[..written])?;
        self.bytes_written += written as u64;
        Ok(written)
    }

    /// Flush the encoder, finalize the tag and close the file.
    ///
    /// Returns the total MP3 bytes in the file.
    pub fn finish(mut self) -> Result<u64> {
        if !self.carry.is_empty() {
            log::debug!("dropping {} bytes of incomplete frame", self.carry.len());
        }

        self.out.resize(FLUSH_BUFFER_LEN, 0);
        let flushed = self.session.flush_buffer(&mut self.out)?;
        self.writer.write_all(&self.out[..flushed])?;
        self.bytes_written += flushed as u64;

        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        self.session.finalize_file(&mut file)?;
        self.session.close();

        log::info!("Recorded {} bytes to {:?}", self.bytes_written, self.path);
        Ok(self.bytes_written)
    }
}

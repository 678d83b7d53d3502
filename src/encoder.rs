//! MP3 encoding module
//! Configures LAME and encodes planar 16-bit PCM into MP3 frames

use mp3lame_encoder::{Bitrate, Builder, DualPcm, Encoder, FlushNoGap, Quality, VbrMode};
use std::mem::MaybeUninit;
use std::num::NonZeroU32;

use crate::error::{Error, Result};
use crate::tags::Id3Tags;

/// Quality used when the caller doesn't pick one (LAME's own default)
pub const DEFAULT_QUALITY: u8 = 5;

/// Sample rates an MPEG audio stream can carry
pub const MPEG_SAMPLE_RATES: [u32; 9] = [8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];

/// Worst-case MP3 bytes LAME may emit for `samples` frames per channel
pub fn max_encoded_size(samples: usize) -> usize {
    mp3lame_encoder::max_required_buffer_size(samples)
}

/// Version string of the linked LAME library
pub fn encoder_version() -> String {
    mp3lame_encoder::mp3lame_version().into_owned()
}

/// Bitrate strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateMode {
    /// LAME's default variable bitrate mode
    Vbr,
    /// Constant bitrate in kbps
    Cbr(u32),
}

/// Everything needed to open an encoder
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub input_sample_rate: u32,
    pub channels: u16,
    pub output_sample_rate: u32,
    /// 0 (best, slowest) to 9 (worst, fastest)
    pub quality: u8,
    pub bitrate: BitrateMode,
    /// ID3v2 tag LAME writes ahead of the first frame
    pub tags: Option<Id3Tags>,
}

impl EncoderConfig {
    pub fn new(input_sample_rate: u32, channels: u16, output_sample_rate: u32) -> Self {
        Self {
            input_sample_rate,
            channels,
            output_sample_rate,
            quality: DEFAULT_QUALITY,
            bitrate: BitrateMode::Vbr,
            tags: None,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_bitrate(mut self, bitrate: BitrateMode) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_tags(mut self, tags: Option<Id3Tags>) -> Self {
        self.tags = tags;
        self
    }

    /// Input and output rates differ, so LAME resamples
    pub fn needs_resampling(&self) -> bool {
        self.input_sample_rate != self.output_sample_rate
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels != 1 && self.channels != 2 {
            return Err(Error::InvalidConfig(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.input_sample_rate == 0 {
            return Err(Error::InvalidConfig("input sample rate must be positive".into()));
        }
        if !MPEG_SAMPLE_RATES.contains(&self.output_sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "output sample rate {} is not an MPEG audio rate",
                self.output_sample_rate
            )));
        }
        if self.quality > 9 {
            return Err(Error::InvalidConfig(format!(
                "quality must be 0..=9, got {}",
                self.quality
            )));
        }
        if let BitrateMode::Cbr(0) = self.bitrate {
            return Err(Error::InvalidConfig("CBR bitrate must be positive".into()));
        }
        Ok(())
    }
}

/// The encoder engine a session drives.
///
/// Dropping a backend closes it.
pub trait EncoderBackend: Sized {
    /// Create and configure a new encoder
    fn open(config: &EncoderConfig) -> Result<Self>;

    /// Encode one block of planar samples, returning bytes written into `out`
    fn encode(&mut self, left: &[i16], right: &[i16], out: &mut [MaybeUninit<u8>]) -> Result<usize>;

    /// Emit whatever the encoder still buffers
    fn flush(&mut self, out: &mut [MaybeUninit<u8>]) -> Result<usize>;

    /// Size of the LAME (Xing/Info) tag frame, 0 when none is written
    fn lame_tag_size(&self) -> usize;

    /// Render the LAME tag frame for everything encoded so far.
    ///
    /// Only complete after a flush. `None` when no tag is written or `out`
    /// is too small.
    fn lame_tag(&self, out: &mut [MaybeUninit<u8>]) -> Option<usize>;

    /// Bytes of ID3v2 tag ahead of the first MP3 frame
    fn id3v2_tag_size(&self) -> usize;
}

/// MP3 encoder wrapper
pub struct LameBackend {
    encoder: Encoder,
}

impl EncoderBackend for LameBackend {
    fn open(config: &EncoderConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Builder::new().ok_or(Error::EncoderInit)?;

        builder
            .set_sample_rate(config.input_sample_rate)
            .map_err(|e| build_error("set_sample_rate", e))?;
        builder
            .set_output_sample_rate(NonZeroU32::new(config.output_sample_rate))
            .map_err(|e| build_error("set_output_sample_rate", e))?;
        builder
            .set_num_channels(config.channels as u8)
            .map_err(|e| build_error("set_num_channels", e))?;
        builder
            .set_quality(quality_level(config.quality))
            .map_err(|e| build_error("set_quality", e))?;

        match config.bitrate {
            BitrateMode::Vbr => builder
                .set_vbr_mode(VbrMode::Mtrh)
                .map_err(|e| build_error("set_vbr_mode", e))?,
            BitrateMode::Cbr(kbps) => builder
                .set_brate(cbr_bitrate(kbps))
                .map_err(|e| build_error("set_brate", e))?,
        }

        if let Some(tags) = &config.tags {
            builder.set_id3_tag(tags.as_lame())?;
        }

        let encoder = builder.build().map_err(|e| build_error("build", e))?;

        log::info!(
            "LAME encoder ready: {}Hz -> {}Hz, {} channel(s), quality {}, {:?}",
            config.input_sample_rate,
            config.output_sample_rate,
            config.channels,
            config.quality,
            config.bitrate
        );

        Ok(Self { encoder })
    }

    fn encode(&mut self, left: &[i16], right: &[i16], out: &mut [MaybeUninit<u8>]) -> Result<usize> {
        let input = DualPcm { left, right };
        Ok(self.encoder.encode(input, out)?)
    }

    fn flush(&mut self, out: &mut [MaybeUninit<u8>]) -> Result<usize> {
        Ok(self.encoder.flush::<FlushNoGap>(out)?)
    }

    fn lame_tag_size(&self) -> usize {
        if !self.encoder.is_lame_tag_written() {
            return 0;
        }
        self.encoder.lame_tag_size()
    }

    fn lame_tag(&self, out: &mut [MaybeUninit<u8>]) -> Option<usize> {
        self.encoder.lame_tag_encode(out).map(|n| n.get())
    }

    fn id3v2_tag_size(&self) -> usize {
        self.encoder.id3v2_tag_size()
    }
}

fn build_error(stage: &'static str, err: impl std::fmt::Debug) -> Error {
    Error::Build {
        stage,
        detail: format!("{:?}", err),
    }
}

/// Map a 0..=9 level onto LAME's quality presets
fn quality_level(level: u8) -> Quality {
    match level {
        0 => Quality::Best,
        1 => Quality::SecondBest,
        2 => Quality::NearBest,
        3 => Quality::VeryNice,
        4 => Quality::Nice,
        5 => Quality::Good,
        6 => Quality::Decent,
        7 => Quality::Ok,
        8 => Quality::SecondWorst,
        _ => Quality::Worst,
    }
}

/// Round a kbps value up to the nearest bitrate LAME offers
fn cbr_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=64 => Bitrate::Kbps64,
        65..=96 => Bitrate::Kbps96,
        97..=112 => Bitrate::Kbps112,
        113..=128 => Bitrate::Kbps128,
        129..=160 => Bitrate::Kbps160,
        161..=192 => Bitrate::Kbps192,
        193..=224 => Bitrate::Kbps224,
        225..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_bad_channels() {
        let config = EncoderConfig::new(44100, 3, 44100);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_non_mpeg_output_rate() {
        let config = EncoderConfig::new(44100, 2, 44000);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_quality_above_nine() {
        let config = EncoderConfig::new(44100, 2, 44100).with_quality(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_resampling_config() {
        let config = EncoderConfig::new(96000, 1, 48000).with_bitrate(BitrateMode::Cbr(128));
        assert!(config.validate().is_ok());
        assert!(config.needs_resampling());
    }

    #[test]
    fn cbr_rounds_up() {
        assert!(matches!(cbr_bitrate(100), Bitrate::Kbps112));
        assert!(matches!(cbr_bitrate(192), Bitrate::Kbps192));
        assert!(matches!(cbr_bitrate(999), Bitrate::Kbps320));
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!encoder_version().is_empty());
    }

    #[test]
    fn version_starts_with_a_digit() {
        assert!(encoder_version().starts_with(|c: char| c.is_ascii_digit()));
    }

    #[test]
    fn lame_tag_frame_is_rendered_after_flush() {
        let config = EncoderConfig::new(44100, 2, 44100);
        let mut backend = LameBackend::open(&config).expect("open");

        let left = vec![1000i16; 44100];
        let mut out: Vec<u8> = Vec::with_capacity(max_encoded_size(left.len()));
        backend.encode(&left, &left, out.spare_capacity_mut()).expect("encode");
        backend.flush(out.spare_capacity_mut()).expect("flush");

        let size = backend.lame_tag_size();
        assert!(size > 0);
        let mut tag: Vec<u8> = Vec::with_capacity(size);
        let written = backend.lame_tag(tag.spare_capacity_mut()).expect("lame tag");
        unsafe { tag.set_len(written) };
        assert_eq!(written, size);
        assert!(tag.windows(4).any(|w| w == b"Xing" || w == b"Info"));
        assert_eq!(backend.id3v2_tag_size(), 0);
    }

    #[test]
    fn id3_tags_put_a_tag_ahead_of_the_frames() {
        let tags = Id3Tags {
            title: "Tone".into(),
            ..Default::default()
        };
        let config = EncoderConfig::new(44100, 1, 44100).with_tags(Some(tags));
        let backend = LameBackend::open(&config).expect("open");
        assert!(backend.id3v2_tag_size() > 0);
    }

    #[test]
    fn lame_backend_encodes_and_flushes() {
        let config = EncoderConfig::new(44100, 2, 44100);
        let mut backend = LameBackend::open(&config).expect("open");

        let left = vec![0i16; 4608];
        let right = vec![0i16; 4608];
        let mut out: Vec<u8> = Vec::with_capacity(max_encoded_size(left.len()));
        let written = backend
            .encode(&left, &right, out.spare_capacity_mut())
            .expect("encode");
        let flushed = backend.flush(&mut out.spare_capacity_mut()[written..]).expect("flush");
        assert!(written + flushed > 0);
    }
}

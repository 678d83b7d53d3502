//! WAV header inspection

use std::path::Path;

use crate::error::{Error, Result};

/// Format fields the converter cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Read the format of a WAV file, rejecting anything but 16-bit integer PCM
pub fn read_format(path: impl AsRef<Path>) -> Result<WavFormat> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path)
        .map_err(|e| Error::InvalidInput(format!("{:?} is not a readable WAV file: {}", path, e)))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::InvalidInput(format!(
            "{:?}: only 16-bit integer PCM is supported, got {}-bit {:?}",
            path, spec.bits_per_sample, spec.sample_format
        )));
    }

    Ok(WavFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    })
}

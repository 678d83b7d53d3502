//! MP3 stream inspection
//! Walks MPEG audio Layer III frame headers to count frames and measure duration

use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::tags;

const MPEG1_L3_KBPS: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const MPEG2_L3_KBPS: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// One parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub mono: bool,
    /// Whole frame size in bytes, header included
    pub frame_len: usize,
    /// A 16-bit CRC follows the header
    pub crc: bool,
}

impl FrameHeader {
    /// Parse a 4-byte Layer III header; `None` if it isn't one
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // Layer III only
        if (bytes[1] >> 1) & 0b11 != 0b01 {
            return None;
        }

        let bitrate_index = (bytes[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => MPEG1_L3_KBPS[bitrate_index],
            _ => MPEG2_L3_KBPS[bitrate_index],
        };

        let base_rate = match (bytes[2] >> 2) & 0b11 {
            0 => 44100,
            1 => 48000,
            2 => 32000,
            _ => return None,
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        let padding = ((bytes[2] >> 1) & 1) as usize;
        let coefficient = match version {
            MpegVersion::Mpeg1 => 144,
            _ => 72,
        };
        let frame_len = (coefficient * bitrate_kbps * 1000 / sample_rate) as usize + padding;

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            mono: bytes[3] >> 6 == 0b11,
            frame_len,
            crc: bytes[1] & 1 == 0,
        })
    }

    /// PCM frames per channel carried by one MP3 frame
    pub fn samples(&self) -> u32 {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            _ => 576,
        }
    }

    /// Offset of the first byte after the side information
    pub fn side_info_end(&self) -> usize {
        let side_info = match (self.version, self.mono) {
            (MpegVersion::Mpeg1, false) => 32,
            (MpegVersion::Mpeg1, true) | (_, false) => 17,
            (_, true) => 9,
        };
        4 + if self.crc { 2 } else { 0 } + side_info
    }

    /// The frame carries a Xing/Info tag instead of audio
    pub fn is_tag_frame(&self, frame: &[u8]) -> bool {
        let at = self.side_info_end();
        matches!(frame.get(at..at + 4), Some(b"Xing") | Some(b"Info"))
    }
}

/// Summary of an MP3 stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mp3Info {
    pub frames: u64,
    pub samples: u64,
    pub sample_rate: u32,
    pub mono: bool,
    /// Length of a leading ID3v2 tag, 0 when absent
    pub tag_len: usize,
    /// The first frame is a Xing/Info tag, not counted in `frames`
    pub tag_frame: bool,
    pub duration: Duration,
}

/// Scan an in-memory MP3 stream
pub fn probe_bytes(data: &[u8]) -> Mp3Info {
    let mut info = Mp3Info::default();
    let mut pos = tags::tag_len(data).unwrap_or(0);
    info.tag_len = pos;

    while pos + 4 <= data.len() {
        if &data[pos..pos + 3] == b"TAG" {
            break; // ID3v1 trailer
        }
        match FrameHeader::parse(&data[pos..]) {
            Some(header) if pos + header.frame_len <= data.len() => {
                let first = info.frames == 0 && !info.tag_frame;
                if first && header.is_tag_frame(&data[pos..pos + header.frame_len]) {
                    info.tag_frame = true;
                    pos += header.frame_len;
                    continue;
                }
                if info.frames == 0 {
                    info.sample_rate = header.sample_rate;
                    info.mono = header.mono;
                }
                info.frames += 1;
                info.samples += header.samples() as u64;
                pos += header.frame_len;
            }
            Some(_) => break, // truncated last frame
            None => pos += 1,
        }
    }

    if info.sample_rate > 0 {
        info.duration = Duration::from_secs_f64(info.samples as f64 / info.sample_rate as f64);
    }
    info
}

/// Scan an MP3 file
pub fn probe_file(path: impl AsRef<Path>) -> Result<Mp3Info> {
    let data = std::fs::read(path.as_ref())?;
    Ok(probe_bytes(&data))
}

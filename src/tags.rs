//! ID3 metadata
//!
//! LAME writes the ID3v2 tag itself, ahead of the first MP3 frame. This
//! module holds the configurable fields and a small reader for the text
//! frames of an existing tag.

use mp3lame_encoder::Id3Tag;
use serde::{Deserialize, Serialize};

const HEADER_LEN: usize = 10;

/// Text metadata handed to LAME. Written as Latin-1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Id3Tags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: String,
    pub comment: String,
}

impl Id3Tags {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.artist.is_empty()
            && self.album.is_empty()
            && self.year.is_empty()
            && self.comment.is_empty()
    }

    /// Borrow the fields in the shape LAME's builder takes
    pub fn as_lame(&self) -> Id3Tag<'_> {
        Id3Tag {
            title: self.title.as_bytes(),
            artist: self.artist.as_bytes(),
            album: self.album.as_bytes(),
            album_art: &[],
            year: self.year.as_bytes(),
            comment: self.comment.as_bytes(),
        }
    }
}

/// Total length of an ID3v2 tag at the start of `bytes`, header included
pub fn tag_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < HEADER_LEN || &bytes[..3] != b"ID3" {
        return None;
    }
    let size = decode_synchsafe(&bytes[6..10])?;
    Some(HEADER_LEN + size as usize)
}

/// Read a text frame (`TIT2`, `TPE1`, ...) out of a v2.3 or v2.4 tag
pub fn read_text_frame(bytes: &[u8], id: &[u8; 4]) -> Option<String> {
    let end = tag_len(bytes)?.min(bytes.len());
    let major = bytes[3];
    let mut pos = HEADER_LEN;

    while pos + HEADER_LEN <= end {
        let frame_id = &bytes[pos..pos + 4];
        if frame_id[0] == 0 {
            break; // padding
        }
        // v2.4 frame sizes are synchsafe, v2.3 ones are plain big-endian
        let size_bytes = &bytes[pos + 4..pos + 8];
        let size = if major >= 4 {
            decode_synchsafe(size_bytes)?
        } else {
            u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
        } as usize;

        let body_start = pos + HEADER_LEN;
        let body_end = body_start.checked_add(size)?;
        if body_end > end {
            return None;
        }
        if frame_id == id {
            let (&encoding, text) = bytes[body_start..body_end].split_first()?;
            return Some(decode_text(encoding, text));
        }
        pos = body_end;
    }
    None
}

fn decode_text(encoding: u8, text: &[u8]) -> String {
    let decoded = match encoding {
        0 => text.iter().map(|&b| char::from(b)).collect(),
        1 | 2 => decode_utf16(encoding, text),
        _ => String::from_utf8_lossy(text).into_owned(),
    };
    decoded.trim_end_matches('\0').to_string()
}

fn decode_utf16(encoding: u8, text: &[u8]) -> String {
    let (little_endian, body) = match text {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (encoding == 1, text),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_synchsafe(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 4 || bytes[..4].iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    Some(bytes[..4].iter().fold(0u32, |acc, &b| (acc << 7) | b as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synchsafe(n: u32) -> [u8; 4] {
        [(n >> 21) as u8 & 0x7f, (n >> 14) as u8 & 0x7f, (n >> 7) as u8 & 0x7f, n as u8 & 0x7f]
    }

    /// Tag with the given frames; `major` picks the frame size encoding
    fn build_tag(major: u8, frames: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (id, content) in frames {
            body.extend_from_slice(*id);
            let len = content.len() as u32;
            if major >= 4 {
                body.extend_from_slice(&synchsafe(len));
            } else {
                body.extend_from_slice(&len.to_be_bytes());
            }
            body.extend_from_slice(&[0, 0]);
            body.extend_from_slice(content);
        }
        body.resize(body.len() + 16, 0); // padding

        let size = body.len() as u32;
        let mut tag = vec![b'I', b'D', b'3', major, 0, 0];
        tag.extend_from_slice(&synchsafe(size));
        tag.extend(body);
        tag
    }

    #[test]
    fn reads_latin1_frames_from_v23() {
        let tag = build_tag(3, &[(b"TIT2", &b"\x00Caf\xe9"[..]), (b"TYER", &b"\x002024\x00"[..])]);
        assert_eq!(tag_len(&tag), Some(tag.len()));
        assert_eq!(read_text_frame(&tag, b"TIT2").as_deref(), Some("Café"));
        assert_eq!(read_text_frame(&tag, b"TYER").as_deref(), Some("2024"));
        assert_eq!(read_text_frame(&tag, b"TALB"), None);
    }

    #[test]
    fn reads_utf16_and_utf8_frames() {
        let tag = build_tag(4, &[
            (b"TPE1", &b"\x01\xff\xfeK\x00a\x00m\x00i\x00"[..]),
            (b"TALB", "\u{3}Ünder".as_bytes()),
        ]);
        assert_eq!(read_text_frame(&tag, b"TPE1").as_deref(), Some("Kami"));
        assert_eq!(read_text_frame(&tag, b"TALB").as_deref(), Some("Ünder"));
    }

    #[test]
    fn truncated_frame_is_not_read() {
        let mut tag = build_tag(3, &[(b"TIT2", &b"\x00long title"[..])]);
        tag.truncate(HEADER_LEN + 12);
        assert_eq!(read_text_frame(&tag, b"TIT2"), None);
    }

    #[test]
    fn no_tag_without_id3_magic() {
        assert_eq!(tag_len(&[0xFF, 0xFB, 0x90, 0x64, 0, 0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn lame_view_borrows_fields() {
        let tags = Id3Tags {
            title: "Night Drive".into(),
            year: "2024".into(),
            ..Default::default()
        };
        let lame = tags.as_lame();
        assert_eq!(lame.title, b"Night Drive");
        assert_eq!(lame.year, b"2024");
        assert!(lame.artist.is_empty());
        assert!(lame.is_any_set());
        assert!(!Id3Tags::default().as_lame().is_any_set());
    }
}

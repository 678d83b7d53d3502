//! PCM buffer helpers
//! Byte decoding, channel splitting and loudness for 16-bit little-endian PCM

/// Bytes in one 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode little-endian 16-bit samples, appending to `out`.
/// A trailing odd byte is ignored.
pub fn decode_le(bytes: &[u8], out: &mut Vec<i16>) {
    out.extend(
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

/// Split interleaved frames into left/right planes.
///
/// Mono input is copied into both planes. For stereo, an incomplete
/// trailing frame is dropped.
pub fn split_channels(interleaved: &[i16], channels: u16, left: &mut Vec<i16>, right: &mut Vec<i16>) {
    left.clear();
    right.clear();

    if channels <= 1 {
        left.extend_from_slice(interleaved);
        right.extend_from_slice(interleaved);
        return;
    }

    for frame in interleaved.chunks_exact(channels as usize) {
        left.push(frame[0]);
        right.push(frame[1]);
    }
}

/// Loudness of a buffer in dB: 10 * log10(mean square).
///
/// Silence yields negative infinity.
pub fn volume_db(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    10.0 * (sum / samples.len() as f64).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_and_drops_odd_byte() {
        let mut out = Vec::new();
        decode_le(&[0x01, 0x00, 0xFF, 0xFF, 0x7F], &mut out);
        assert_eq!(out, vec![1, -1]);
    }

    #[test]
    fn splits_stereo_frames() {
        let (mut l, mut r) = (Vec::new(), Vec::new());
        split_channels(&[1, 2, 3, 4, 5], 2, &mut l, &mut r);
        assert_eq!(l, vec![1, 3]);
        assert_eq!(r, vec![2, 4]);
    }

    #[test]
    fn mono_fills_both_planes() {
        let (mut l, mut r) = (vec![9], vec![9]);
        split_channels(&[1, 2, 3], 1, &mut l, &mut r);
        assert_eq!(l, vec![1, 2, 3]);
        assert_eq!(l, r);
    }

    #[test]
    fn volume_of_silence_and_full_scale() {
        assert_eq!(volume_db(&[0, 0, 0]), f64::NEG_INFINITY);
        let loud = volume_db(&[i16::MAX, i16::MIN]);
        assert!(loud > 90.0 && loud < 91.0);
    }
}

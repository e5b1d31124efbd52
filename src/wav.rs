//! Minimal RIFF/WAV plumbing shared by the validator, the sandbox, and the
//! backend seam: little-endian field readers, a mono/16-bit writer for
//! handing samples to backend CLIs, and a parser for the transcoder's
//! normalized output.

use crate::error::{GwError, GwResult};

/// Size of the canonical fixed WAV header (RIFF + fmt + data headers).
pub const WAV_HEADER_LEN: usize = 44;

#[must_use]
pub fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[must_use]
pub fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Serialize mono 16-bit PCM samples as a canonical 44-byte-header WAV file.
#[must_use]
pub fn write_mono16(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let byte_rate = sample_rate * 2;
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&u32::try_from(36 + data_len).unwrap_or(u32::MAX).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&u32::try_from(data_len).unwrap_or(u32::MAX).to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Decode a 16-bit PCM WAV buffer into interleaved samples plus sample rate.
///
/// Used on the sandbox's normalized output, which is always mono/16-bit;
/// anything else is rejected as a format failure rather than resampled.
pub fn parse_mono16(bytes: &[u8]) -> GwResult<(Vec<i16>, u32)> {
    if bytes.len() < WAV_HEADER_LEN || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(GwError::validation("not a RIFF/WAVE buffer"));
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None;
    let mut data: Option<&[u8]> = None;

    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = read_u32_le(bytes, pos + 4).unwrap_or(0) as usize;
        let body_start = pos + 8;
        let body_end = body_start.saturating_add(chunk_size).min(bytes.len());

        match chunk_id {
            b"fmt " => {
                let audio_format = read_u16_le(bytes, body_start)
                    .ok_or_else(|| GwError::validation("truncated fmt chunk"))?;
                let channels = read_u16_le(bytes, body_start + 2)
                    .ok_or_else(|| GwError::validation("truncated fmt chunk"))?;
                let sample_rate = read_u32_le(bytes, body_start + 4)
                    .ok_or_else(|| GwError::validation("truncated fmt chunk"))?;
                let bits = read_u16_le(bytes, body_start + 14)
                    .ok_or_else(|| GwError::validation("truncated fmt chunk"))?;
                fmt = Some((audio_format, channels, sample_rate, bits));
            }
            b"data" => {
                data = Some(&bytes[body_start..body_end]);
            }
            _ => {}
        }

        // Chunk bodies are word-aligned.
        pos = body_start + chunk_size + (chunk_size % 2);
        if chunk_size == 0 && chunk_id != b"data" {
            break;
        }
    }

    let (audio_format, channels, sample_rate, bits) =
        fmt.ok_or_else(|| GwError::validation("fmt chunk not found"))?;
    if audio_format != 1 || bits != 16 {
        return Err(GwError::validation(format!(
            "expected 16-bit PCM, got format {audio_format} at {bits} bits"
        )));
    }
    if channels == 0 {
        return Err(GwError::validation("zero channel count"));
    }
    let data = data.ok_or_else(|| GwError::validation("data chunk not found"))?;

    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_parse_round_trip() {
        let samples: Vec<i16> = (0..1600).map(|i| (i % 128) as i16).collect();
        let wav = write_mono16(&samples, 16_000);
        assert_eq!(wav.len(), WAV_HEADER_LEN + samples.len() * 2);

        let (decoded, rate) = parse_mono16(&wav).expect("parse");
        assert_eq!(rate, 16_000);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn rejects_non_riff() {
        let err = parse_mono16(b"OggS........................................").unwrap_err();
        assert_eq!(err.error_code(), "GW-VALIDATION");
    }

    #[test]
    fn rejects_eight_bit_audio() {
        let mut wav = write_mono16(&[0i16; 32], 8_000);
        // Patch bits-per-sample to 8.
        wav[34] = 8;
        wav[35] = 0;
        let err = parse_mono16(&wav).unwrap_err();
        assert!(err.to_string().contains("16-bit"), "got: {err}");
    }

    #[test]
    fn header_fields_are_little_endian() {
        let wav = write_mono16(&[1i16, -1, 1000], 16_000);
        assert_eq!(read_u32_le(&wav, 24), Some(16_000)); // sample rate
        assert_eq!(read_u16_le(&wav, 22), Some(1)); // channels
        assert_eq!(read_u32_le(&wav, 40), Some(6)); // data size
    }

    #[test]
    fn parse_skips_unknown_chunks() {
        // RIFF with a LIST chunk between fmt and data.
        let base = write_mono16(&[7i16; 4], 16_000);
        let mut wav = Vec::new();
        wav.extend_from_slice(&base[..36]); // RIFF + fmt
        wav.extend_from_slice(b"LIST");
        wav.extend_from_slice(&4u32.to_le_bytes());
        wav.extend_from_slice(b"INFO");
        wav.extend_from_slice(&base[36..]); // data chunk
        let riff_size = (wav.len() - 8) as u32;
        wav[4..8].copy_from_slice(&riff_size.to_le_bytes());

        let (samples, rate) = parse_mono16(&wav).expect("parse with LIST chunk");
        assert_eq!(rate, 16_000);
        assert_eq!(samples, vec![7i16; 4]);
    }
}

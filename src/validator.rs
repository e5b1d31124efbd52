//! Static attack-pattern inspection of untrusted audio buffers.
//!
//! Every check here is a pure function over the raw bytes: nothing is
//! decoded, no subprocess is spawned, and each pass is linear in the buffer
//! size. The goal is to reject compression bombs, metadata bombs, cyclic
//! container structures, and polyglot files before the transcoder ever sees
//! the input.

use std::collections::HashSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::wav::{WAV_HEADER_LEN, read_u16_le, read_u32_le};

/// Declared sizes more than this multiple of the actual buffer length are
/// treated as compression bombs. Legitimate audio compresses well under 20x.
const MAX_COMPRESSION_RATIO: u64 = 100;

/// Upper bound on a declared ID3 tag block.
const MAX_METADATA_SIZE: u64 = 10 * 1024 * 1024;

/// Upper bound on comment-style metadata tag occurrences.
const MAX_METADATA_TAGS: usize = 1000;

/// Upper bound on RIFF INFO/LIST chunk occurrences.
const MAX_RIFF_INFO_CHUNKS: usize = 100;

/// Hard cap on RIFF chunk traversal.
const MAX_CHUNKS: usize = 10_000;

/// Cap on chunks smaller than a chunk header (chunk bombs).
const MAX_TINY_CHUNKS: usize = 1000;

/// Declared durations above this are rejected outright.
const MAX_DURATION_SECONDS: f64 = 3600.0;

/// Foreign-format signatures that must never appear inside an audio payload.
const SUSPICIOUS_PATTERNS: &[&[u8]] = &[
    b"%PDF",                         // PDF
    b"PK\x03\x04",                   // ZIP
    b"\x1f\x8b\x08",                 // GZIP
    b"Rar!",                         // RAR
    b"\x42\x5a\x68",                 // BZIP2
    b"\x37\x7a\xbc\xaf\x27\x1c",     // 7-Zip
    b"MZ",                           // PE executable
    b"\x7fELF",                      // ELF executable
    b"#!/",                          // shell script
    b"<?php",                        // PHP
    b"<script",                      // script tag
];

/// Magic-number table for container detection.
const AUDIO_MAGIC_NUMBERS: &[(&[u8], &str)] = &[
    (b"RIFF", "wav"),
    (b"ID3", "mp3"),
    (b"\xff\xfb", "mp3"),
    (b"\xff\xf3", "mp3"),
    (b"\xff\xf2", "mp3"),
    (b"fLaC", "flac"),
    (b"OggS", "ogg"),
    (b"\x00\x00\x00\x20ftypM4A", "m4a"),
    (b"\x00\x00\x00\x18ftyp", "mp4"),
    (b"\x1a\x45\xdf\xa3", "webm"),
    (b"#!AMR", "amr"),
];

/// Structural metadata extracted while validating; serialized into logs and
/// gateway responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioMetadata {
    pub file_size: u64,
    pub file_hash: String,
    pub detected_format: Option<String>,
    pub audio_format: Option<u16>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub bits_per_sample: Option<u16>,
    pub data_size: Option<u32>,
    pub duration_seconds: Option<f64>,
}

/// Outcome of a full validation pass. Produced fresh per call and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub reason: Option<String>,
    pub metadata: AudioMetadata,
}

impl ValidationVerdict {
    fn rejected(reason: String, metadata: AudioMetadata) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            metadata,
        }
    }
}

/// Identify the container format from its magic number, if any.
#[must_use]
pub fn detect_format(buf: &[u8]) -> Option<&'static str> {
    for (magic, name) in AUDIO_MAGIC_NUMBERS {
        if buf.starts_with(magic) {
            return Some(name);
        }
    }
    // MP4 family carries `ftyp` at offset 4 behind a variable box length.
    if buf.len() > 8 && &buf[4..8] == b"ftyp" {
        return Some("mp4");
    }
    None
}

/// Detect declared sizes wildly exceeding the actual byte count, plus
/// foreign-format signatures embedded after the WAV header.
#[must_use]
pub fn check_compression_ratio(buf: &[u8]) -> Option<String> {
    let actual = buf.len() as u64;

    if buf.starts_with(b"RIFF") {
        if buf.len() < WAV_HEADER_LEN {
            return Some("invalid WAV header - too small".to_owned());
        }

        let claimed = u64::from(read_u32_le(buf, 4)?) + 8;
        if claimed > actual.saturating_mul(MAX_COMPRESSION_RATIO) {
            let ratio = claimed as f64 / actual as f64;
            return Some(format!(
                "potential compression bomb - declared size {ratio:.1}x actual"
            ));
        }

        // Check the declared data chunk against the same ratio, walking at
        // most the first 1MB of chunk headers.
        let scan_end = buf.len().saturating_sub(8).min(1024 * 1024);
        let mut pos = 12usize;
        while pos < scan_end {
            let Some(chunk_size) = read_u32_le(buf, pos + 4) else {
                break;
            };
            if &buf[pos..pos + 4] == b"data" {
                if u64::from(chunk_size) > actual.saturating_mul(MAX_COMPRESSION_RATIO) {
                    let ratio = f64::from(chunk_size) / actual as f64;
                    return Some(format!(
                        "potential audio bomb - data chunk declares {ratio:.1}x file size"
                    ));
                }
                break;
            }
            if u64::from(chunk_size) > actual {
                return Some("invalid chunk size in WAV container".to_owned());
            }
            pos = pos.saturating_add(8).saturating_add(chunk_size as usize);
        }
    }

    // Nested containers (e.g. a WAV wrapping a ZIP) hide past the header.
    let body = &buf[buf.len().min(WAV_HEADER_LEN)..];
    for pattern in SUSPICIOUS_PATTERNS {
        if contains(body, pattern) {
            return Some("suspicious embedded content detected".to_owned());
        }
    }

    None
}

/// Detect metadata volume attacks: oversized ID3 blocks, comment floods in
/// Vorbis/FLAC streams, and RIFF INFO/LIST chunk floods.
#[must_use]
pub fn check_metadata_bombs(buf: &[u8]) -> Option<String> {
    if buf.starts_with(b"ID3") && buf.len() >= 10 {
        // ID3v2 tag size is a 4-byte synchsafe integer (7 bits per byte).
        let tag_size = (u64::from(buf[6] & 0x7f) << 21)
            | (u64::from(buf[7] & 0x7f) << 14)
            | (u64::from(buf[8] & 0x7f) << 7)
            | u64::from(buf[9] & 0x7f);
        if tag_size > MAX_METADATA_SIZE {
            return Some(format!("ID3 metadata too large: {tag_size} bytes"));
        }
    }

    if contains(&buf[..buf.len().min(1024)], b"vorbis") || buf.starts_with(b"fLaC") {
        let tag_count: usize = [
            b"TITLE=".as_slice(),
            b"ARTIST=",
            b"ALBUM=",
            b"COMMENT=",
        ]
        .iter()
        .map(|marker| count_occurrences(buf, marker))
        .sum();
        if tag_count > MAX_METADATA_TAGS {
            return Some(format!("too many metadata tags: {tag_count}"));
        }
    }

    if buf.starts_with(b"RIFF") {
        let info_chunks = count_occurrences(buf, b"INFO") + count_occurrences(buf, b"LIST");
        if info_chunks > MAX_RIFF_INFO_CHUNKS {
            return Some(format!("too many RIFF metadata chunks: {info_chunks}"));
        }
    }

    None
}

/// Walk the RIFF chunk list detecting cycles, runaway chunk sizes, and chunk
/// bombs. Traversal is bounded by `MAX_CHUNKS` regardless of input.
#[must_use]
pub fn check_recursive_structures(buf: &[u8]) -> Option<String> {
    if !buf.starts_with(b"RIFF") {
        return None;
    }

    let mut seen_offsets: HashSet<usize> = HashSet::new();
    let mut pos = 12usize;
    let mut chunk_count = 0usize;
    let mut tiny_chunks = 0usize;

    while pos + 8 <= buf.len() && chunk_count < MAX_CHUNKS {
        if !seen_offsets.insert(pos) {
            return Some("cyclic chunk structure detected".to_owned());
        }

        let Some(chunk_size) = read_u32_le(buf, pos + 4) else {
            break;
        };
        let chunk_size = chunk_size as usize;

        if chunk_size > buf.len() - pos - 8 {
            return Some("invalid chunk size - declared body reads past buffer".to_owned());
        }

        if chunk_size < 8 {
            tiny_chunks += 1;
            if tiny_chunks > MAX_TINY_CHUNKS {
                return Some("too many small chunks - potential chunk bomb".to_owned());
            }
        }

        // Word alignment: odd-sized bodies consume one pad byte.
        pos = pos + 8 + chunk_size + (chunk_size % 2);
        chunk_count += 1;
    }

    if chunk_count >= MAX_CHUNKS {
        return Some(format!("too many chunks: {chunk_count}"));
    }

    None
}

/// Reject buffers matching several container signatures at once, and any
/// buffer carrying document markup near the start.
#[must_use]
pub fn check_polyglot(buf: &[u8]) -> Option<String> {
    let head = &buf[..buf.len().min(1024)];
    if contains(head, b"%PDF") {
        return Some("PDF signature found in audio buffer".to_owned());
    }
    if contains(head, b"<html") || contains(head, b"<HTML") {
        return Some("HTML content found in audio buffer".to_owned());
    }
    if contains(head, b"<?xml") {
        return Some("XML content found in audio buffer".to_owned());
    }

    let mut signatures: Vec<&str> = Vec::new();
    if buf.starts_with(b"RIFF") {
        signatures.push("WAV");
    }
    if buf.starts_with(b"ID3") || buf.starts_with(b"\xff\xfb") {
        signatures.push("MP3");
    }
    if buf.starts_with(b"fLaC") {
        signatures.push("FLAC");
    }
    if buf.starts_with(b"OggS") {
        signatures.push("OGG");
    }
    if signatures.len() > 1 {
        return Some(format!(
            "multiple container signatures found: {}",
            signatures.join(", ")
        ));
    }

    None
}

/// Structural validation of a RIFF/WAVE buffer: fmt-chunk sanity, field
/// ranges, byte-rate consistency, declared duration, and declared-versus-
/// actual length. Fills `metadata` with whatever was parsed before any
/// failure.
#[must_use]
pub fn validate_wav_structure(buf: &[u8], metadata: &mut AudioMetadata) -> Option<String> {
    if !buf.starts_with(b"RIFF") {
        return Some("not a RIFF container".to_owned());
    }
    if buf.len() < WAV_HEADER_LEN {
        return Some("file too small to be valid WAV".to_owned());
    }
    if &buf[8..12] != b"WAVE" {
        return Some("missing WAVE signature".to_owned());
    }

    let fmt_pos = match find(buf, b"fmt ") {
        Some(pos) if pos <= 1000 => pos,
        _ => return Some("fmt chunk not found near start of file".to_owned()),
    };

    let Some(fmt_size) = read_u32_le(buf, fmt_pos + 4) else {
        return Some("truncated fmt chunk header".to_owned());
    };
    let fmt_size = fmt_size as usize;
    if !(16..=1000).contains(&fmt_size) {
        return Some(format!("invalid fmt chunk size: {fmt_size}"));
    }
    let Some(fmt_data) = buf.get(fmt_pos + 8..fmt_pos + 8 + fmt_size) else {
        return Some("incomplete fmt chunk".to_owned());
    };

    let (Some(audio_format), Some(channels), Some(sample_rate), Some(byte_rate), Some(bits_per_sample)) = (
        read_u16_le(fmt_data, 0),
        read_u16_le(fmt_data, 2),
        read_u32_le(fmt_data, 4),
        read_u32_le(fmt_data, 8),
        read_u16_le(fmt_data, 14),
    ) else {
        return Some("incomplete fmt chunk".to_owned());
    };

    metadata.audio_format = Some(audio_format);
    metadata.channels = Some(channels);
    metadata.sample_rate = Some(sample_rate);
    metadata.bits_per_sample = Some(bits_per_sample);

    if audio_format != 1 && audio_format != 3 {
        // PCM or IEEE float only.
        return Some(format!("unsupported audio format code: {audio_format}"));
    }
    if channels == 0 || channels > 32 {
        return Some(format!("invalid channel count: {channels}"));
    }
    if !(1000..=384_000).contains(&sample_rate) {
        return Some(format!("invalid sample rate: {sample_rate}"));
    }
    if ![8, 16, 24, 32].contains(&bits_per_sample) {
        return Some(format!("invalid bits per sample: {bits_per_sample}"));
    }

    let expected_byte_rate =
        u64::from(sample_rate) * u64::from(channels) * u64::from(bits_per_sample) / 8;
    if u64::from(byte_rate).abs_diff(expected_byte_rate) > 100 {
        return Some(format!(
            "inconsistent byte rate: {byte_rate} vs expected {expected_byte_rate}"
        ));
    }

    let Some(data_pos) = find(buf, b"data") else {
        return Some("data chunk not found".to_owned());
    };
    let Some(data_size) = read_u32_le(buf, data_pos + 4) else {
        return Some("truncated data chunk header".to_owned());
    };
    metadata.data_size = Some(data_size);

    if byte_rate > 0 {
        let duration = f64::from(data_size) / f64::from(byte_rate);
        metadata.duration_seconds = Some(duration);
        if duration > MAX_DURATION_SECONDS {
            return Some(format!(
                "unreasonably long declared duration: {duration:.1} seconds"
            ));
        }
    }

    let expected_size = data_pos as u64 + 8 + u64::from(data_size);
    if (buf.len() as u64).abs_diff(expected_size) > 1000 {
        return Some(format!(
            "file size mismatch: {} vs expected {expected_size}",
            buf.len()
        ));
    }

    None
}

/// Run every check in a fixed order and return the first failure; on success
/// the verdict carries the content hash and parsed container metadata.
#[must_use]
pub fn validate(buf: &[u8]) -> ValidationVerdict {
    let mut metadata = AudioMetadata {
        file_size: buf.len() as u64,
        file_hash: sha256_hex(buf),
        detected_format: detect_format(buf).map(str::to_owned),
        ..AudioMetadata::default()
    };

    if let Some(reason) = check_compression_ratio(buf) {
        return ValidationVerdict::rejected(reason, metadata);
    }
    if let Some(reason) = check_metadata_bombs(buf) {
        return ValidationVerdict::rejected(reason, metadata);
    }
    if let Some(reason) = check_recursive_structures(buf) {
        return ValidationVerdict::rejected(reason, metadata);
    }
    if let Some(reason) = check_polyglot(buf) {
        return ValidationVerdict::rejected(reason, metadata);
    }

    if buf.starts_with(b"RIFF")
        && let Some(reason) = validate_wav_structure(buf, &mut metadata)
    {
        return ValidationVerdict::rejected(reason, metadata);
    }

    ValidationVerdict {
        valid: true,
        reason: None,
        metadata,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    let mut count = 0;
    let mut pos = 0;
    while let Some(found) = find(&haystack[pos..], needle) {
        count += 1;
        pos += found + needle.len();
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::write_mono16;

    /// One second of silence: a well-formed 16kHz mono 16-bit WAV.
    fn good_wav() -> Vec<u8> {
        write_mono16(&vec![0i16; 16_000], 16_000)
    }

    #[test]
    fn short_buffers_fail_with_size_reason() {
        for len in 0..WAV_HEADER_LEN {
            let mut buf = vec![0u8; len];
            if len >= 4 {
                buf[..4].copy_from_slice(b"RIFF");
            }
            let verdict = validate(&buf);
            if buf.starts_with(b"RIFF") {
                assert!(!verdict.valid, "len {len} should be invalid");
                let reason = verdict.reason.unwrap();
                assert!(
                    reason.contains("too small") || reason.contains("small"),
                    "len {len}: {reason}"
                );
            }
        }
    }

    #[test]
    fn well_formed_wav_passes_every_check() {
        let wav = good_wav();
        assert_eq!(check_compression_ratio(&wav), None);
        assert_eq!(check_metadata_bombs(&wav), None);
        assert_eq!(check_recursive_structures(&wav), None);
        assert_eq!(check_polyglot(&wav), None);

        let verdict = validate(&wav);
        assert!(verdict.valid, "reason: {:?}", verdict.reason);
        assert_eq!(verdict.metadata.sample_rate, Some(16_000));
        assert_eq!(verdict.metadata.channels, Some(1));
        assert_eq!(verdict.metadata.bits_per_sample, Some(16));
        assert_eq!(verdict.metadata.detected_format.as_deref(), Some("wav"));
        assert!((verdict.metadata.duration_seconds.unwrap() - 1.0).abs() < 0.01);
        assert_eq!(verdict.metadata.file_hash.len(), 64);
    }

    #[test]
    fn declared_riff_size_over_ratio_is_a_bomb() {
        let mut wav = good_wav();
        // Declare a container size 101x larger than the actual buffer.
        let bogus = (wav.len() as u32) * 101;
        wav[4..8].copy_from_slice(&bogus.to_le_bytes());
        let reason = check_compression_ratio(&wav).expect("should fail");
        assert!(reason.contains("compression bomb"), "got: {reason}");
    }

    #[test]
    fn declared_data_chunk_over_ratio_is_a_bomb() {
        // 1KB actual buffer, data chunk declaring 2^31 - 1 bytes.
        let mut wav = write_mono16(&vec![0i16; 490], 16_000);
        assert!(wav.len() >= 1000 && wav.len() <= 1024, "len {}", wav.len());
        wav[40..44].copy_from_slice(&(i32::MAX as u32).to_le_bytes());
        let reason = check_compression_ratio(&wav).expect("should fail");
        assert!(reason.contains("audio bomb"), "got: {reason}");
    }

    #[test]
    fn ratio_at_threshold_is_accepted() {
        // Declared sizes at or below 100x must pass the ratio check.
        let wav = good_wav();
        assert_eq!(check_compression_ratio(&wav), None);
    }

    #[test]
    fn embedded_zip_signature_is_rejected() {
        let mut wav = good_wav();
        let insert_at = WAV_HEADER_LEN + 100;
        wav[insert_at..insert_at + 4].copy_from_slice(b"PK\x03\x04");
        let reason = check_compression_ratio(&wav).expect("should fail");
        assert!(reason.contains("embedded content"), "got: {reason}");
    }

    #[test]
    fn embedded_elf_signature_is_rejected() {
        let mut wav = good_wav();
        let insert_at = wav.len() - 8;
        wav[insert_at..insert_at + 4].copy_from_slice(b"\x7fELF");
        assert!(check_compression_ratio(&wav).is_some());
    }

    #[test]
    fn oversized_id3_tag_is_rejected() {
        // Synchsafe encoding of 16MB: each byte carries 7 bits.
        let mut buf = b"ID3\x04\x00\x00".to_vec();
        buf.extend_from_slice(&[0x08, 0x00, 0x00, 0x00]); // 0x08 << 21 = 16MB
        buf.extend_from_slice(&[0u8; 64]);
        let reason = check_metadata_bombs(&buf).expect("should fail");
        assert!(reason.contains("ID3 metadata too large"), "got: {reason}");
    }

    #[test]
    fn modest_id3_tag_is_accepted() {
        let mut buf = b"ID3\x04\x00\x00".to_vec();
        buf.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]); // 256 bytes
        buf.extend_from_slice(&[0u8; 300]);
        assert_eq!(check_metadata_bombs(&buf), None);
    }

    #[test]
    fn vorbis_comment_flood_is_rejected() {
        let mut buf = b"fLaC".to_vec();
        for _ in 0..1100 {
            buf.extend_from_slice(b"TITLE=x;");
        }
        let reason = check_metadata_bombs(&buf).expect("should fail");
        assert!(reason.contains("too many metadata tags"), "got: {reason}");
    }

    #[test]
    fn riff_list_chunk_flood_is_rejected() {
        let mut wav = good_wav();
        for _ in 0..120 {
            wav.extend_from_slice(b"LIST");
        }
        let reason = check_metadata_bombs(&wav).expect("should fail");
        assert!(reason.contains("RIFF metadata chunks"), "got: {reason}");
    }

    #[test]
    fn chunk_reading_past_buffer_is_rejected() {
        let mut wav = good_wav();
        // Truncate so the declared data size exceeds the remaining bytes.
        wav.truncate(WAV_HEADER_LEN + 100);
        let reason = check_recursive_structures(&wav).expect("should fail");
        assert!(reason.contains("invalid chunk size"), "got: {reason}");
    }

    #[test]
    fn chunk_bomb_is_rejected_within_bounds() {
        // Thousands of zero-length chunks after a RIFF/WAVE preamble.
        let mut buf = b"RIFF".to_vec();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        for _ in 0..1200 {
            buf.extend_from_slice(b"JUNK");
            buf.extend_from_slice(&0u32.to_le_bytes());
        }
        let reason = check_recursive_structures(&buf).expect("should fail");
        assert!(reason.contains("chunk bomb"), "got: {reason}");
    }

    #[test]
    fn traversal_is_bounded_by_max_chunk_count() {
        // 8-byte chunks avoid the tiny-chunk counter; build more than
        // MAX_CHUNKS of them and confirm traversal stops with a reason
        // instead of walking forever.
        let mut buf = b"RIFF".to_vec();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        for _ in 0..(MAX_CHUNKS + 10) {
            buf.extend_from_slice(b"JUNK");
            buf.extend_from_slice(&8u32.to_le_bytes());
            buf.extend_from_slice(&[0u8; 8]);
        }
        let reason = check_recursive_structures(&buf).expect("should fail");
        assert!(reason.contains("too many chunks"), "got: {reason}");
    }

    #[test]
    fn word_alignment_consumes_pad_byte() {
        // An odd-sized chunk followed by a well-aligned data chunk must
        // traverse cleanly.
        let mut buf = b"RIFF".to_vec();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"JUNK");
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]); // 3 body bytes + 1 pad
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 2]);
        let riff_size = (buf.len() - 8) as u32;
        buf[4..8].copy_from_slice(&riff_size.to_le_bytes());
        assert_eq!(check_recursive_structures(&buf), None);
    }

    #[test]
    fn pdf_marker_in_head_is_rejected() {
        let mut buf = b"%PDF-1.7 ".to_vec();
        buf.extend_from_slice(&[0u8; 64]);
        let reason = check_polyglot(&buf).expect("should fail");
        assert!(reason.contains("PDF"), "got: {reason}");
    }

    #[test]
    fn html_and_xml_markers_are_rejected() {
        assert!(check_polyglot(b"<html><body>hi</body></html>").is_some());
        assert!(check_polyglot(b"<?xml version=\"1.0\"?>").is_some());
    }

    #[test]
    fn single_signature_is_not_polyglot() {
        assert_eq!(check_polyglot(&good_wav()), None);
        assert_eq!(check_polyglot(b"OggS\x00\x02 rest of page"), None);
    }

    #[test]
    fn unsupported_format_code_is_rejected() {
        let mut wav = good_wav();
        wav[20] = 0x55; // not PCM (1) or IEEE float (3)
        wav[21] = 0;
        let mut meta = AudioMetadata::default();
        let reason = validate_wav_structure(&wav, &mut meta).expect("should fail");
        assert!(reason.contains("unsupported audio format"), "got: {reason}");
        assert_eq!(meta.audio_format, Some(0x55));
    }

    #[test]
    fn zero_channels_is_rejected() {
        let mut wav = good_wav();
        wav[22] = 0;
        wav[23] = 0;
        let mut meta = AudioMetadata::default();
        let reason = validate_wav_structure(&wav, &mut meta).expect("should fail");
        assert!(reason.contains("channel count"), "got: {reason}");
    }

    #[test]
    fn out_of_range_sample_rate_is_rejected() {
        for rate in [500u32, 999, 384_001, 1_000_000] {
            let mut wav = good_wav();
            wav[24..28].copy_from_slice(&rate.to_le_bytes());
            // Keep byte rate consistent so only the rate check fires.
            wav[28..32].copy_from_slice(&(rate * 2).to_le_bytes());
            let mut meta = AudioMetadata::default();
            let reason = validate_wav_structure(&wav, &mut meta).expect("should fail");
            assert!(reason.contains("sample rate"), "rate {rate}: {reason}");
        }
    }

    #[test]
    fn inconsistent_byte_rate_is_rejected() {
        let mut wav = good_wav();
        wav[28..32].copy_from_slice(&999_999u32.to_le_bytes());
        let mut meta = AudioMetadata::default();
        let reason = validate_wav_structure(&wav, &mut meta).expect("should fail");
        assert!(reason.contains("byte rate"), "got: {reason}");
    }

    #[test]
    fn overlong_declared_duration_is_rejected() {
        // A 16kHz mono stream at 32000 B/s declaring > 3600s of data needs a
        // data size > 115.2MB; declare it without carrying the bytes, and
        // pad the riff size check out of the equation by checking the
        // structure call directly.
        let mut wav = good_wav();
        let huge = 32_000u32 * 3700;
        wav[40..44].copy_from_slice(&huge.to_le_bytes());
        let mut meta = AudioMetadata::default();
        let reason = validate_wav_structure(&wav, &mut meta).expect("should fail");
        assert!(reason.contains("duration"), "got: {reason}");
        assert!(meta.duration_seconds.unwrap() > 3600.0);
    }

    #[test]
    fn truncated_file_fails_size_consistency() {
        let mut wav = good_wav();
        wav.truncate(wav.len() - 2048);
        let mut meta = AudioMetadata::default();
        let reason = validate_wav_structure(&wav, &mut meta).expect("should fail");
        // Either the structural size check or an earlier bound fires.
        assert!(
            reason.contains("mismatch") || reason.contains("size"),
            "got: {reason}"
        );
    }

    #[test]
    fn validation_is_deterministic() {
        let wav = good_wav();
        let first = validate(&wav);
        let second = validate(&wav);
        assert_eq!(first, second);

        let mut bomb = good_wav();
        bomb[40..44].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(validate(&bomb), validate(&bomb));
    }

    #[test]
    fn detect_format_covers_common_containers() {
        assert_eq!(detect_format(&good_wav()), Some("wav"));
        assert_eq!(detect_format(b"ID3\x04\x00\x00\x00\x00\x00\x00"), Some("mp3"));
        assert_eq!(detect_format(b"fLaC\x00\x00\x00\x22"), Some("flac"));
        assert_eq!(detect_format(b"OggS\x00\x02"), Some("ogg"));
        assert_eq!(detect_format(b"\x00\x00\x00\x1cftypisom"), Some("mp4"));
        assert_eq!(detect_format(b"random bytes"), None);
    }

    #[test]
    fn count_occurrences_is_non_overlapping() {
        assert_eq!(count_occurrences(b"aaaa", b"aa"), 2);
        assert_eq!(count_occurrences(b"TITLE=TITLE=", b"TITLE="), 2);
        assert_eq!(count_occurrences(b"", b"x"), 0);
    }
}

//! Characterization: technical metadata extracted from file bytes.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use curator_core::types::{BinaryRef, FileSet, TechnicalMetadata};

use crate::error::CharacterizationError;

/// Populates a file set's technical metadata from a local copy of one of its
/// binaries.
#[async_trait]
pub trait Characterizer: Send + Sync {
    /// Read `path`, extract metadata and write it onto `file_set` before
    /// returning.
    async fn characterize(
        &self,
        file_set: &mut FileSet,
        binary: &BinaryRef,
        path: &Path,
    ) -> Result<(), CharacterizationError>;
}

/// Built-in characterizer based on magic-byte sniffing and header parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCharacterizer;

#[async_trait]
impl Characterizer for FileCharacterizer {
    async fn characterize(
        &self,
        file_set: &mut FileSet,
        binary: &BinaryRef,
        path: &Path,
    ) -> Result<(), CharacterizationError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| CharacterizationError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        let metadata = inspect(&bytes, binary, path)?;
        debug!(
            file_set = %file_set.id,
            relation = %binary.relation,
            mime_type = ?metadata.mime_type,
            size = ?metadata.file_size,
            "File characterized"
        );
        file_set.characteristics = metadata;
        Ok(())
    }
}

/// Extract metadata from in-memory bytes.
pub fn inspect(
    bytes: &[u8],
    binary: &BinaryRef,
    path: &Path,
) -> Result<TechnicalMetadata, CharacterizationError> {
    if bytes.is_empty() {
        return Err(CharacterizationError::Empty(path.to_path_buf()));
    }

    let (mime_type, format_label) = match sniff(bytes) {
        Some((mime, label)) => (mime.to_string(), Some(label.to_string())),
        None => {
            let mime = declared_mime(binary)
                .or_else(|| guessed_mime(&binary.original_name))
                .or_else(|| {
                    std::str::from_utf8(bytes)
                        .ok()
                        .map(|_| "text/plain".to_string())
                })
                .ok_or_else(|| CharacterizationError::Unrecognized(path.to_path_buf()))?;
            (mime, None)
        }
    };

    let (width, height) = dimensions(bytes, &mime_type).unzip();
    let duration_ms = if mime_type == "audio/x-wav" {
        wav_duration_ms(bytes)
    } else {
        None
    };

    Ok(TechnicalMetadata {
        mime_type: Some(mime_type),
        format_label,
        file_size: Some(bytes.len() as u64),
        checksum: Some(hex::encode(Sha256::digest(bytes))),
        width,
        height,
        duration_ms,
        original_name: Some(binary.original_name.clone()),
        characterized_at: Some(Utc::now()),
    })
}

fn declared_mime(binary: &BinaryRef) -> Option<String> {
    binary
        .mime_type
        .as_deref()
        .filter(|m| !m.is_empty() && *m != "application/octet-stream")
        .map(str::to_string)
}

fn guessed_mime(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// Identify well-known formats from their leading bytes.
fn sniff(b: &[u8]) -> Option<(&'static str, &'static str)> {
    let riff_kind: Option<&[u8]> = (b.len() >= 12 && &b[0..4] == b"RIFF").then(|| &b[8..12]);
    let ftyp_brand: Option<&[u8]> = (b.len() >= 12 && &b[4..8] == b"ftyp").then(|| &b[8..12]);

    if b.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(("image/jpeg", "JPEG image"))
    } else if b.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(("image/png", "PNG image"))
    } else if b.starts_with(b"GIF87a") || b.starts_with(b"GIF89a") {
        Some(("image/gif", "GIF image"))
    } else if b.starts_with(b"II*\0") || b.starts_with(b"MM\0*") {
        Some(("image/tiff", "TIFF image"))
    } else if b.starts_with(b"%PDF-") {
        Some(("application/pdf", "PDF document"))
    } else if riff_kind == Some(b"WAVE".as_slice()) {
        Some(("audio/x-wav", "WAVE audio"))
    } else if riff_kind == Some(b"AVI ".as_slice()) {
        Some(("video/x-msvideo", "AVI video"))
    } else if riff_kind == Some(b"WEBP".as_slice()) {
        Some(("image/webp", "WebP image"))
    } else if b.starts_with(b"fLaC") {
        Some(("audio/flac", "FLAC audio"))
    } else if b.starts_with(b"OggS") {
        Some(("audio/ogg", "Ogg audio"))
    } else if b.starts_with(b"ID3") || (b.len() >= 2 && b[0] == 0xFF && b[1] & 0xE0 == 0xE0) {
        Some(("audio/mpeg", "MP3 audio"))
    } else if b.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        Some(("video/webm", "Matroska video"))
    } else if let Some(brand) = ftyp_brand {
        match brand {
            b"qt  " => Some(("video/quicktime", "QuickTime video")),
            b"M4A " => Some(("audio/mp4", "MPEG-4 audio")),
            _ => Some(("video/mp4", "MPEG-4 video")),
        }
    } else {
        None
    }
}

fn dimensions(b: &[u8], mime: &str) -> Option<(u32, u32)> {
    match mime {
        "image/png" if b.len() >= 24 && &b[12..16] == b"IHDR" => Some((
            u32::from_be_bytes([b[16], b[17], b[18], b[19]]),
            u32::from_be_bytes([b[20], b[21], b[22], b[23]]),
        )),
        "image/gif" if b.len() >= 10 => Some((
            u16::from_le_bytes([b[6], b[7]]) as u32,
            u16::from_le_bytes([b[8], b[9]]) as u32,
        )),
        "image/jpeg" => jpeg_dimensions(b),
        _ => None,
    }
}

/// Walk JPEG segments until a start-of-frame marker.
fn jpeg_dimensions(b: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 9 < b.len() {
        if b[i] != 0xFF {
            return None;
        }
        let marker = b[i + 1];
        let len = u16::from_be_bytes([b[i + 2], b[i + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let height = u16::from_be_bytes([b[i + 5], b[i + 6]]) as u32;
            let width = u16::from_be_bytes([b[i + 7], b[i + 8]]) as u32;
            return Some((width, height));
        }
        i += 2 + len;
    }
    None
}

/// Duration from the `fmt ` byte rate and the `data` chunk size.
fn wav_duration_ms(b: &[u8]) -> Option<u64> {
    let mut i = 12;
    let mut byte_rate = None;
    while i + 8 <= b.len() {
        let id = &b[i..i + 4];
        let size = u32::from_le_bytes([b[i + 4], b[i + 5], b[i + 6], b[i + 7]]) as u64;
        match id {
            b"fmt " if i + 20 <= b.len() => {
                byte_rate = Some(u32::from_le_bytes([
                    b[i + 16],
                    b[i + 17],
                    b[i + 18],
                    b[i + 19],
                ]) as u64)
                .filter(|r| *r > 0);
            }
            b"data" => return byte_rate.map(|rate| size * 1000 / rate),
            _ => {}
        }
        // Chunks are padded to even sizes.
        i += 8 + size as usize + (size as usize & 1);
    }
    None
}

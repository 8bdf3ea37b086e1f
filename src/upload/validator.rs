//! File validation gates (spec §4.6 File Validator).
//!
//! Grounded on `FileValidator` in `bridge_server/security.py`: four
//! ordered gates, each returning on first failure — filename safety, MIME
//! allow-list (sniffed from content, not trusted from the filename),
//! extension/MIME cross-check, and a suspicious-byte-signature scan.
//!
//! Content-based MIME sniffing has no counterpart crate anywhere in the
//! retrieval pack (no `infer`/`tree_magic` dependency appears in any
//! example), so the signature table below is hand-rolled rather than
//! reaching for a crate that isn't actually part of this ecosystem slice.
//! `mime_guess` is still used, but only for its role in the original:
//! mapping a canonical extension to a MIME type and back, never for
//! sniffing file content.

use std::collections::HashMap;

use crate::error::ServerError;

/// Byte sequences that flag a file as suspicious regardless of its
/// validated MIME type, matching the literal needle list in
/// `FileValidator.is_suspicious_file`.
const SUSPICIOUS_NEEDLES: &[&[u8]] = &[
    b"<script",
    b"<?php",
    b"#!/",
    b"import ",
    b"eval(",
    b"exec(",
    b"system(",
];

/// Magic-byte signatures for the file kinds this bridge accepts. Checked
/// in order; the first matching prefix wins.
const MAGIC_SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"RIFF", "image/webp"), // narrowed further below (RIFF....WEBP)
];

/// Outcome of validating one uploaded (or outbound) file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    pub mime_type: String,
}

/// Validates uploaded file bytes against an allow-list of MIME types
/// mapped to their canonical extensions.
#[derive(Debug, Clone)]
pub struct FileValidator {
    allowed_mime_extension_map: HashMap<String, String>,
}

impl FileValidator {
    pub fn new(allowed_mime_extension_map: HashMap<String, String>) -> Self {
        Self {
            allowed_mime_extension_map,
        }
    }

    /// Run all four gates in order against `filename` and `bytes`.
    pub fn validate(&self, filename: &str, bytes: &[u8]) -> Result<ValidatedFile, ServerError> {
        self.check_safe_filename(filename)?;
        let mime_type = self.sniff_allowed_mime(bytes, filename)?;
        self.check_extension_matches(filename, &mime_type)?;
        self.check_not_suspicious(bytes, filename)?;
        Ok(ValidatedFile { mime_type })
    }

    fn check_safe_filename(&self, filename: &str) -> Result<(), ServerError> {
        if filename.starts_with('/') || filename.contains("..") {
            return Err(ServerError::UnsafeUpload(format!(
                "unsafe filename: {filename}"
            )));
        }
        Ok(())
    }

    fn sniff_allowed_mime(&self, bytes: &[u8], filename: &str) -> Result<String, ServerError> {
        let sniffed = sniff_mime_type(bytes).ok_or_else(|| {
            ServerError::UnsafeUpload(format!("{filename}: unrecognized file content"))
        })?;
        if !self.allowed_mime_extension_map.contains_key(sniffed) {
            return Err(ServerError::UnsafeUpload(format!(
                "{filename}: mime type {sniffed} is not allowed"
            )));
        }
        Ok(sniffed.to_owned())
    }

    /// Canonical extension bound to `mime_type` in the configured
    /// `allowedMimeExtensionMap`, e.g. `".png"` for `image/png`. Used by the
    /// workflow engine to name a forwarded staged upload (spec §4.4).
    pub fn canonical_extension(&self, mime_type: &str) -> Option<&str> {
        self.allowed_mime_extension_map.get(mime_type).map(String::as_str)
    }

    fn check_extension_matches(&self, filename: &str, mime_type: &str) -> Result<(), ServerError> {
        let canonical = self
            .allowed_mime_extension_map
            .get(mime_type)
            .map(String::as_str)
            .unwrap_or("");
        let actual_ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default();
        if actual_ext != canonical {
            return Err(ServerError::UnsafeUpload(format!(
                "{filename}: extension does not match detected type {mime_type}"
            )));
        }
        Ok(())
    }

    fn check_not_suspicious(&self, bytes: &[u8], filename: &str) -> Result<(), ServerError> {
        for needle in SUSPICIOUS_NEEDLES {
            if contains_subslice(bytes, needle) {
                return Err(ServerError::UnsafeUpload(format!(
                    "{filename}: contains suspicious content"
                )));
            }
        }
        Ok(())
    }
}

fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    for (signature, mime) in MAGIC_SIGNATURES {
        if bytes.starts_with(signature) {
            if *mime == "image/webp" {
                if bytes.len() >= 12 && &bytes[8..12] == b"WEBP" {
                    return Some("image/webp");
                }
                continue;
            }
            return Some(mime);
        }
    }
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    if bytes.iter().all(|b| b.is_ascii() && !b.is_ascii_control() || matches!(b, b'\n' | b'\r' | b'\t')) {
        return Some("text/plain");
    }
    None
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    fn validator() -> FileValidator {
        FileValidator::new(
            [("image/png", ".png"), ("text/plain", ".txt")]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        )
    }

    #[test]
    fn rejects_leading_slash() {
        let v = validator();
        let png = b"\x89PNG\r\n\x1a\n...";
        assert!(v.validate("/etc/passwd.png", png).is_err());
    }

    #[test]
    fn rejects_path_traversal() {
        let v = validator();
        let png = b"\x89PNG\r\n\x1a\n...";
        assert!(v.validate("../../x.png", png).is_err());
    }

    #[test]
    fn accepts_valid_png() {
        let v = validator();
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(b"rest of file");
        let result = v.validate("photo.png", &png).unwrap();
        assert_eq!(result.mime_type, "image/png");
    }

    #[test]
    fn rejects_mismatched_extension() {
        let v = validator();
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(b"rest of file");
        assert!(v.validate("photo.txt", &png).is_err());
    }

    #[test]
    fn rejects_disallowed_mime_even_if_sniffable() {
        let v = FileValidator::new(
            [("image/jpeg", ".jpg")]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        );
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(b"rest");
        assert!(v.validate("photo.png", &png).is_err());
    }

    #[test]
    fn rejects_suspicious_script_content() {
        let v = FileValidator::new(
            [("text/plain", ".txt")]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        );
        let content = b"hello <script>alert(1)</script>";
        assert!(v.validate("note.txt", content).is_err());
    }

    #[test]
    fn rejects_unrecognized_content() {
        let v = validator();
        let garbage = [0u8, 1, 2, 255, 254, 253];
        assert!(v.validate("mystery.png", &garbage).is_err());
    }
}

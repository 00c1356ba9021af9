use std::path::{Component, Path};

use crate::TransferError;

/// Longest filename accepted for a transfer.
const MAX_FILENAME_LEN: usize = 255;

/// Validates that a transfer filename is a single, plain path component.
///
/// Rejects:
/// - Empty names and names longer than 255 bytes
/// - Any path separator, so the name cannot address another directory
/// - `.` and `..`
/// - Control characters
pub fn validate_filename(filename: &str) -> Result<(), TransferError> {
    if filename.is_empty() {
        return Err(TransferError::InvalidFilename("empty filename".into()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(TransferError::InvalidFilename(format!(
            "filename longer than {MAX_FILENAME_LEN} bytes"
        )));
    }
    if filename.chars().any(|c| c.is_control()) {
        return Err(TransferError::InvalidFilename(format!(
            "control character in filename: {filename:?}"
        )));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(TransferError::InvalidFilename(format!(
            "path separator not allowed: {filename}"
        )));
    }

    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidFilename(format!(
            "not a plain filename: {filename}"
        ))),
    }
}

/// Returns `true` if `checksum` is a lowercase hex SHA-256 digest.
pub fn is_valid_checksum(checksum: &str) -> bool {
    checksum.len() == 64
        && checksum
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_filename() {
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
    }

    #[test]
    fn rejects_current_dir() {
        assert!(validate_filename(".").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(validate_filename("sub/file.txt").is_err());
        assert!(validate_filename("sub\\file.txt").is_err());
        assert!(validate_filename("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(validate_filename("bad\nname").is_err());
    }

    #[test]
    fn rejects_overlong_name() {
        assert!(validate_filename(&"a".repeat(256)).is_err());
        assert!(validate_filename(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_filename("archive.tar.gz").is_ok());
        assert!(validate_filename(".env").is_ok());
        assert!(validate_filename("report 2024.pdf").is_ok());
    }

    #[test]
    fn checksum_format() {
        assert!(is_valid_checksum(&"a".repeat(64)));
        assert!(!is_valid_checksum(&"A".repeat(64)));
        assert!(!is_valid_checksum(&"a".repeat(63)));
        assert!(!is_valid_checksum(&"g".repeat(64)));
    }
}

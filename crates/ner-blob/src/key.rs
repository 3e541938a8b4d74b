// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Object key convention: `{org_id}/{folder}/{unix_nanos}_{filename}`.

use chrono::Utc;
use ner_core::NerError;
use uuid::Uuid;

/// Builds a fresh object key for `filename` inside an organization folder.
pub fn object_key(organization_id: Uuid, folder: &str, filename: &str) -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1_000);
    format!("{organization_id}/{folder}/{nanos}_{filename}")
}

/// Lower-cases a client filename and replaces spaces and path separators.
pub fn sanitize_filename(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Rejects keys that could escape the store root.
pub fn validate_key(key: &str) -> Result<(), NerError> {
    if key.is_empty() {
        return Err(NerError::Validation("blob key is empty".to_string()));
    }
    if key.starts_with('/') || key.starts_with('\\') || key.contains(':') {
        return Err(NerError::Validation(format!("blob key must be relative: {key}")));
    }
    if key.split(['/', '\\']).any(|seg| seg == ".." || seg.is_empty()) {
        return Err(NerError::Validation(format!("invalid blob key: {key}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_has_org_folder_and_timestamped_name() {
        let org = Uuid::new_v4();
        let key = object_key(org, "references", "chair.png");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts[0], org.to_string());
        assert_eq!(parts[1], "references");
        let (nanos, name) = parts[2].split_once('_').unwrap();
        assert!(nanos.parse::<i64>().unwrap() > 0);
        assert_eq!(name, "chair.png");
        assert!(validate_key(&key).is_ok());
    }

    #[test]
    fn sanitize_replaces_separators_and_lowercases() {
        assert_eq!(sanitize_filename("My Photo.PNG"), "my_photo.png");
        assert_eq!(sanitize_filename("../etc\\passwd"), ".._etc_passwd");
    }

    #[test]
    fn traversal_and_absolute_keys_are_rejected() {
        for bad in ["", "/etc/passwd", "a/../b", "..", "a//b", "C:/x", "\\x"] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_key("org/products/1_a.png").is_ok());
    }
}

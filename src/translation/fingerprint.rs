/*!
 * Content fingerprints for paragraph text.
 *
 * A fingerprint is the SHA-256 of the normalized text. Normalization
 * folds case, collapses all whitespace runs to a single space and trims
 * the ends, so two paragraphs that differ only in layout share a key in
 * the dedup cache, across jobs as well as within one.
 */

use sha2::{Digest, Sha256};

/// Normalize paragraph text for fingerprinting
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the hex SHA-256 fingerprint of the normalized text
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

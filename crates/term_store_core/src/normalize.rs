//! Text canonicalization applied before acquisition, so that equality of
//! interned text is byte-exact.

use unicode_normalization::UnicodeNormalization;

/// Canonicalizes term text. Supplied by the embedding system.
pub trait StringNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> String;
}

/// Unicode NFC, with invalid and non-character code points replaced by U+FFFD.
#[derive(Debug, Default, Clone, Copy)]
pub struct NfcNormalizer;

impl StringNormalizer for NfcNormalizer {
    fn normalize(&self, text: &str) -> String {
        text.chars()
            .map(|c| if is_noncharacter(c) { '\u{FFFD}' } else { c })
            .nfc()
            .collect()
    }
}

fn is_noncharacter(c: char) -> bool {
    let cp = c as u32;
    (0xFDD0..=0xFDEF).contains(&cp) || (cp & 0xFFFE) == 0xFFFE
}

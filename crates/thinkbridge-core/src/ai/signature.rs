//! Thinking block signatures
//!
//! A short content-addressed marker: the first 16 hex characters of the
//! SHA-256 digest of the block text, plus its length in characters. It is an
//! integrity/dedup tag, not a cryptographic commitment.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;

use crate::constants::stream::SIGNATURE_HEX_LEN;

/// Signature of a completed thinking block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub hash: String,
    pub length: usize,
}

impl Signature {
    /// Sign `content`, or `None` when there is nothing to sign
    pub fn compute(content: &str) -> Option<Self> {
        if content.is_empty() {
            return None;
        }

        let digest = Sha256::digest(content.as_bytes());
        let mut hash = String::with_capacity(SIGNATURE_HEX_LEN);
        for byte in digest.iter().take(SIGNATURE_HEX_LEN / 2) {
            let _ = write!(hash, "{:02x}", byte);
        }

        Some(Self {
            hash,
            length: content.chars().count(),
        })
    }
}

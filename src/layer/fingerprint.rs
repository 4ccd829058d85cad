//! Layer input fingerprints
//!
//! A fingerprint is the SHA256 over a layer's parent fingerprint and its
//! declared inputs. Chaining through the parent means any upstream change
//! invalidates every downstream layer.

use sha2::{Digest, Sha256};

/// Incremental fingerprint over labelled inputs
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    /// Start a fingerprint for the given stage
    pub fn new(stage: &str) -> Self {
        let mut fp = Self {
            hasher: Sha256::new(),
        };
        fp.input("stage", stage.as_bytes());
        fp
    }

    /// Chain onto the fingerprint of the previous layer
    pub fn parent(mut self, parent: &str) -> Self {
        self.input("parent", parent.as_bytes());
        self
    }

    /// Add a labelled input.
    ///
    /// Label and value are length-prefixed so adjacent inputs can never
    /// run together into the same byte stream.
    pub fn input(&mut self, label: &str, bytes: &[u8]) -> &mut Self {
        self.hasher.update((label.len() as u64).to_le_bytes());
        self.hasher.update(label.as_bytes());
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Finish as full lowercase hex
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

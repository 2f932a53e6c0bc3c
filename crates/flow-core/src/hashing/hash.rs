//! Hash helpers. blake3 para identidades internas (cache keys), sha256 para
//! checksums publicados en la metadata de artifacts.

use blake3::Hasher;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::to_canonical_json;

/// Hashea un string y devuelve hex.
pub fn hash_str(input: &str) -> String {
    hash_bytes(input.as_bytes())
}

pub fn hash_bytes(input: &[u8]) -> String {
    let mut h = Hasher::new();
    h.update(input);
    h.finalize().to_hex().to_string()
}

/// Hash estable de un JSON (sobre su forma canónica).
pub fn hash_value(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

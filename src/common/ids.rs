//! Deterministic identifiers: artifact storage keys and series digests.

use std::fmt::Write as _;

/// 64-bit FNV-1a hash used to fingerprint a training series.
#[derive(Copy, Clone, Debug)]
pub struct SimpleHash(u64);

impl SimpleHash {
    /// Create a new hash state with the FNV offset basis.
    pub fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    /// Feed bytes into the hash function.
    pub fn update(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = (self.0 ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3);
        }
    }

    pub fn update_f64(&mut self, value: f64) {
        self.update(&value.to_bits().to_le_bytes());
    }

    pub fn finish64(&self) -> u64 {
        self.0
    }

    /// Finalise the hash and return a 16-character lowercase hex string.
    pub fn finish_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl Default for SimpleHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage key for an entity's artifact: `<prefix>_<escaped entity id>`.
///
/// Uppercase ASCII letters, digits and `-` pass through; every other byte
/// (lowercase letters and `_` included) becomes `_XX`. Distinct ids map to
/// distinct keys even on case-insensitive filesystems.
pub fn storage_key(prefix: &str, entity_id: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + 1 + entity_id.len());
    key.push_str(prefix);
    key.push('_');
    for b in entity_id.bytes() {
        if b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-' {
            key.push(char::from(b));
        } else {
            let _ = write!(key, "_{b:02X}");
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tickers_stay_readable() {
        assert_eq!(storage_key("lstm", "AAPL"), "lstm_AAPL");
        assert_eq!(storage_key("lstm", "BRK-B"), "lstm_BRK-B");
    }

    #[test]
    fn escaping_keeps_keys_distinct() {
        let keys = ["A_B", "A.B", "A/B", "A_5FB", "a b", "Ä"]
            .map(|id| storage_key("lstm", id));
        for (i, a) in keys.iter().enumerate() {
            assert!(!a.contains('/') && !a.contains('.') && !a.contains(' '));
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(storage_key("lstm", "A_B"), "lstm_A_5FB");
    }

    #[test]
    fn keys_differing_only_by_case_stay_distinct_when_folded() {
        let ids = ["AAPL", "aapl", "Aapl", "A_61PL", "BRK.b", "BRK.B"];
        let folded: Vec<String> = ids
            .iter()
            .map(|id| storage_key("lstm", id).to_ascii_lowercase())
            .collect();
        for (i, a) in folded.iter().enumerate() {
            for b in &folded[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(storage_key("lstm", "aapl"), "lstm__61_61_70_6C");
    }

    #[test]
    fn digest_is_order_sensitive() {
        let mut a = SimpleHash::new();
        a.update_f64(1.0);
        a.update_f64(2.0);
        let mut b = SimpleHash::new();
        b.update_f64(2.0);
        b.update_f64(1.0);
        assert_ne!(a.finish64(), b.finish64());
        assert_eq!(a.finish_hex().len(), 16);
    }
}

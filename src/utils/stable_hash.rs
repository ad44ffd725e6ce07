/// 64-bit FNV-1a over explicitly fed little-endian words.
///
/// Unlike [`std::hash::Hasher`] implementations this does not depend on the
/// pointer width, the endianness or the version of any hashing crate, so its
/// output can be persisted.
#[derive(Debug, Clone, Copy)]
pub struct StableHasher(u64);

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

impl Default for StableHasher {
    fn default() -> Self {
        Self(OFFSET_BASIS)
    }
}

impl StableHasher {
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(PRIME);
        }
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Feeds a length prefix followed by the bytes, so `("ab", "c")` and
    /// `("a", "bc")` differ.
    pub fn write_str(&mut self, value: &str) {
        self.write_u64(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_offset_basis() {
        assert_eq!(StableHasher::default().finish(), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn test_known_fnv1a_value() {
        // FNV-1a/64 of the single byte "a"
        let mut hasher = StableHasher::default();
        hasher.write_bytes(b"a");
        assert_eq!(hasher.finish(), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_strings_are_length_prefixed() {
        let mut a = StableHasher::default();
        a.write_str("ab");
        a.write_str("c");
        let mut b = StableHasher::default();
        b.write_str("a");
        b.write_str("bc");
        assert_ne!(a.finish(), b.finish());
    }
}

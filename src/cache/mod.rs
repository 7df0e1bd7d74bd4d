//! Cache keys plus the disk and memory tiers that share them.

pub mod disk;
pub mod flight;
pub mod memory;

use std::fmt;

use sha2::{Digest, Sha256};

/// Stable identifier for one playlist entry, derived from the source identity
/// and the source-relative item identifier. Identical across runs, so the disk
/// cache stays valid between sessions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn derive(source_identity: &str, identifier: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_identity.as_bytes());
        // separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0u8]);
        hasher.update(identifier.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Parse the 64-character lowercase hex form used for cache file names.
    pub fn from_hex(raw: &str) -> Option<Self> {
        if raw.len() != 64 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&raw[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "CacheKey({})", &hex[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = CacheKey::derive("website:https://birds.example/", "https://birds.example/jay.png");
        let b = CacheKey::derive("website:https://birds.example/", "https://birds.example/jay.png");
        assert_eq!(a, b);
        // pinned: changing the derivation orphans every existing cache dir
        assert_eq!(
            CacheKey::derive("directory:/photos", "/photos/a.jpg").to_hex(),
            "412fbec1ae8806cc5bd2114ba200ec6bb93be662449fbbc81b2056ae6e6e5528"
        );
        assert_ne!(a, CacheKey::derive("website:https://other.example/", "https://birds.example/jay.png"));
    }

    #[test]
    fn separator_prevents_boundary_collisions() {
        assert_ne!(CacheKey::derive("ab", "c"), CacheKey::derive("a", "bc"));
    }

    #[test]
    fn hex_round_trips_and_rejects_junk() {
        let key = CacheKey::derive("s", "i");
        assert_eq!(CacheKey::from_hex(&key.to_hex()), Some(key));
        assert_eq!(CacheKey::from_hex("abc"), None);
        assert_eq!(CacheKey::from_hex(&"zz".repeat(32)), None);
    }
}

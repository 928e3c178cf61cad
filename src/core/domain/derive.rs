//! Credential derivation from a subscription's `access_key` (§6 "Credential
//! derivation", §9 Testable Property #10).
//!
//! Both the Reconciler (create/update payloads, §4.F) and the Link
//! Generator (link rewriting, §4.I) call these two functions so upstream
//! state and client-visible links never drift apart. The scheme itself is
//! an implementation choice (spec §4.F: "Implementation may use namespaced
//! SHA-256 → 16-byte truncation for UUID and hex for password; the exact
//! scheme must match between create and subsequent updates") — what matters
//! is that it is a pure, stable function of `(access_key, protocol)`.

use sha2::{Digest, Sha256};
use uuid::Uuid;

const UUID_NAMESPACE: &[u8] = b"fleetsync:uuid:v1";
const PASSWORD_NAMESPACE: &[u8] = b"fleetsync:password:v1";

fn digest(namespace: &[u8], access_key: &str, protocol: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(namespace);
    hasher.update(b":");
    hasher.update(access_key.as_bytes());
    hasher.update(b":");
    hasher.update(protocol.as_bytes());
    hasher.finalize().into()
}

/// Deterministic per-protocol UUID derived from `access_key`.
///
/// Stable across nodes and reconcile ticks; changes whenever `access_key`
/// is rotated (subscription revoke).
#[must_use]
pub fn derive_uuid(access_key: &str, protocol: &str) -> Uuid {
    let bytes = digest(UUID_NAMESPACE, access_key, protocol);
    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(&bytes[..16]);
    // Stamp RFC 4122 version/variant bits so the value round-trips through
    // any UUID parser a node or client might use.
    uuid_bytes[6] = (uuid_bytes[6] & 0x0f) | 0x50; // version 5
    uuid_bytes[8] = (uuid_bytes[8] & 0x3f) | 0x80; // variant 10
    Uuid::from_bytes(uuid_bytes)
}

/// Deterministic hex password derived from `access_key`, for shadowsocks
/// and trojan credentials.
#[must_use]
pub fn derive_password(access_key: &str, protocol: &str) -> String {
    let bytes = digest(PASSWORD_NAMESPACE, access_key, protocol);
    hex::encode(&bytes[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_derivation_is_deterministic() {
        let a = derive_uuid("a".repeat(32).as_str(), "vless");
        let b = derive_uuid("a".repeat(32).as_str(), "vless");
        assert_eq!(a, b);
    }

    #[test]
    fn uuid_derivation_differs_per_protocol() {
        let key = "b".repeat(32);
        let vless = derive_uuid(&key, "vless");
        let vmess = derive_uuid(&key, "vmess");
        assert_ne!(vless, vmess);
    }

    #[test]
    fn uuid_derivation_differs_per_access_key() {
        let vless_a = derive_uuid(&"a".repeat(32), "vless");
        let vless_c = derive_uuid(&"c".repeat(32), "vless");
        assert_ne!(vless_a, vless_c);
    }

    #[test]
    fn password_derivation_is_deterministic_hex() {
        let key = "d".repeat(32);
        let p1 = derive_password(&key, "trojan");
        let p2 = derive_password(&key, "trojan");
        assert_eq!(p1, p2);
        assert_eq!(p1.len(), 32);
        assert!(p1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn password_derivation_differs_per_protocol() {
        let key = "e".repeat(32);
        assert_ne!(derive_password(&key, "trojan"), derive_password(&key, "ss"));
    }
}

//! Session id generation.
//!
//! Session ids are 64 lowercase hex characters, derived from the client's
//! user agent, remote address, current time, and a random salt, hashed with
//! SHA-256 so the id is unguessable without being a cryptographic capability
//! token in its own right.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Generate a fresh session id for a new client connection.
pub fn generate_session_id(user_agent: &str, client_ip: IpAddr, now_millis: i64) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(client_ip.to_string().as_bytes());
    hasher.update(now_millis.to_le_bytes());
    hasher.update(salt);

    hex::encode(hasher.finalize())
}

/// True if `s` matches `^[a-fA-F0-9]{64}$`.
pub fn is_valid_session_id(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn generates_64_hex_chars() {
        let id = generate_session_id("curl/8.0", ip(), 1_700_000_000_000);
        assert_eq!(id.len(), 64);
        assert!(is_valid_session_id(&id));
    }

    #[test]
    fn distinct_calls_produce_distinct_ids() {
        let a = generate_session_id("curl/8.0", ip(), 1_700_000_000_000);
        let b = generate_session_id("curl/8.0", ip(), 1_700_000_000_000);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_session_id(&"a".repeat(63)));
        assert!(!is_valid_session_id(&"a".repeat(65)));
    }

    #[test]
    fn accepts_uppercase_hex_and_rejects_non_hex() {
        assert!(is_valid_session_id(&"A".repeat(64)));
        assert!(!is_valid_session_id(&"g".repeat(64)));
    }

    #[test]
    fn accepts_exact_64_hex() {
        assert!(is_valid_session_id(&"f".repeat(64)));
    }
}

//! Input validation (C2): pure functions that reject hostile input before it
//! reaches the registry, supervisor, or proxy layers. Nothing here holds
//! state or performs I/O.

use std::net::IpAddr;

use crate::constants::{MAX_PATH, MAX_QUERY, MAX_WS_FRAME};
use crate::support::errors::ValidationError;

/// HTTP methods the proxy will forward. Anything else is a 405.
pub const ALLOWED_METHODS: [&str; 6] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS"];

fn is_forbidden_control_byte(b: u8) -> bool {
    matches!(b, 1..=8 | 14..=31 | 127)
}

/// Validates and normalizes a request path.
///
/// Rejects paths over [`MAX_PATH`], embedded NUL, `..` traversal segments,
/// and control characters.
pub fn validate_path(path: &str) -> Result<&str, ValidationError> {
    if path.len() > MAX_PATH {
        return Err(ValidationError::PathTooLong);
    }
    let bytes = path.as_bytes();
    if bytes.contains(&0) {
        return Err(ValidationError::InvalidPath);
    }
    if bytes.iter().any(|&b| is_forbidden_control_byte(b)) {
        return Err(ValidationError::InvalidPath);
    }
    if contains_traversal(path) {
        return Err(ValidationError::InvalidPath);
    }
    Ok(path)
}

fn contains_traversal(path: &str) -> bool {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'.' && bytes[i + 1] == b'.' {
            let before_ok = i == 0 || matches!(bytes[i - 1], b'/' | b'\\');
            let after_ok = i + 2 >= bytes.len() || matches!(bytes[i + 2], b'/' | b'\\');
            if before_ok || after_ok {
                return true;
            }
        }
        i += 1;
    }
    false
}

/// Uppercases and trims an HTTP method, rejecting anything outside the
/// allowed set.
pub fn validate_method(method: &str) -> Result<String, ValidationError> {
    let upper = method.trim().to_ascii_uppercase();
    if ALLOWED_METHODS.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(ValidationError::UnsupportedMethod)
    }
}

/// Validates a raw query string (without the leading `?`).
pub fn validate_query(query: &str) -> Result<&str, ValidationError> {
    if query.len() > MAX_QUERY {
        return Err(ValidationError::QueryTooLong);
    }
    let bytes = query.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            match hex {
                Some(pair) if pair.iter().all(|b| b.is_ascii_hexdigit()) => i += 3,
                _ => return Err(ValidationError::MalformedQuery),
            }
        } else {
            i += 1;
        }
    }
    Ok(query)
}

/// Validates a WebSocket text frame payload.
pub fn validate_ws_frame(payload: &str) -> Result<&str, ValidationError> {
    if payload.len() > MAX_WS_FRAME {
        return Err(ValidationError::FrameTooLarge);
    }
    if payload.as_bytes().contains(&0) {
        return Err(ValidationError::InvalidFrame);
    }
    Ok(payload)
}

/// Validates an app name against `^[A-Za-z0-9_-]{1,50}$`.
pub fn validate_app_name(name: &str) -> Result<&str, ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 50
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(name)
    } else {
        Err(ValidationError::InvalidAppName)
    }
}

/// Validates a session id against `^[a-fA-F0-9]{64}$`.
pub fn validate_session_id(id: &str) -> Result<&str, ValidationError> {
    if crate::support::id::is_valid_session_id(id) {
        Ok(id)
    } else {
        Err(ValidationError::InvalidSessionId)
    }
}

/// Validates a client IP address string, accepting canonical IPv4/IPv6 plus
/// a handful of sentinels used by reverse proxies and local testing.
pub fn validate_ip(ip: &str) -> Result<(), ValidationError> {
    const SENTINELS: [&str; 5] = ["localhost", "127.0.0.1", "::1", "::", "unknown"];
    if SENTINELS.contains(&ip) {
        return Ok(());
    }
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidIp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_boundary_max_len_accepted_one_over_rejected() {
        let ok = "a".repeat(MAX_PATH);
        assert!(validate_path(&ok).is_ok());
        let too_long = "a".repeat(MAX_PATH + 1);
        assert!(matches!(
            validate_path(&too_long),
            Err(ValidationError::PathTooLong)
        ));
    }

    #[test]
    fn path_rejects_traversal_variants() {
        assert!(validate_path("/proxy/app/../etc/passwd").is_err());
        assert!(validate_path("..\\windows\\system32").is_err());
        assert!(validate_path("/proxy/app/..").is_err());
        assert!(validate_path("../secret").is_err());
    }

    #[test]
    fn path_rejects_nul_and_control_bytes() {
        assert!(validate_path("/a\0b").is_err());
        assert!(validate_path("/a\x01b").is_err());
        assert!(validate_path("/a\x7fb").is_err());
    }

    #[test]
    fn path_allows_dots_that_are_not_traversal() {
        assert!(validate_path("/static/file.min.js").is_ok());
        assert!(validate_path("/a..b").is_ok());
    }

    #[test]
    fn method_uppercases_and_trims() {
        assert_eq!(validate_method(" get ").unwrap(), "GET");
        assert!(validate_method("TRACE").is_err());
    }

    #[test]
    fn query_rejects_malformed_percent_escape() {
        assert!(validate_query("a=%2").is_err());
        assert!(validate_query("a=%zz").is_err());
        assert!(validate_query("a=%41").is_ok());
    }

    #[test]
    fn ws_frame_boundary() {
        let ok = "a".repeat(MAX_WS_FRAME);
        assert!(validate_ws_frame(&ok).is_ok());
        let too_big = "a".repeat(MAX_WS_FRAME + 1);
        assert!(validate_ws_frame(&too_big).is_err());
    }

    #[test]
    fn app_name_pattern() {
        assert!(validate_app_name("my-app_1").is_ok());
        assert!(validate_app_name("").is_err());
        assert!(validate_app_name(&"a".repeat(51)).is_err());
        assert!(validate_app_name("bad name").is_err());
        assert!(validate_app_name("bad/name").is_err());
    }

    #[test]
    fn session_id_boundary() {
        assert!(validate_session_id(&"a".repeat(63)).is_err());
        assert!(validate_session_id(&"a".repeat(64)).is_ok());
        assert!(validate_session_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn ip_accepts_sentinels_and_canonical_forms() {
        assert!(validate_ip("unknown").is_ok());
        assert!(validate_ip("127.0.0.1").is_ok());
        assert!(validate_ip("::1").is_ok());
        assert!(validate_ip("203.0.113.5").is_ok());
        assert!(validate_ip("not-an-ip").is_err());
    }
}

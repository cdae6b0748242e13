//! HMAC-SHA256 request signing.
//!
//! Signatures bind the request body to the timestamp header so receivers
//! can reject replays. The signed message is `timestamp + "." + body` and
//! the header value is `sha256=<lowercase hex>`; receivers recompute the
//! digest over the same concatenation and compare.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the signature header value for a delivery request.
///
/// Returns `None` for an empty secret: signing is optional per
/// subscription, and an empty secret means it is disabled. The output is
/// deterministic and byte-for-byte reproducible, which receivers depend on
/// when validating.
pub fn signature(secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    if secret.is_empty() {
        return None;
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hmac_hex(secret: &str, message: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn empty_secret_skips_signing() {
        assert_eq!(signature("", "1000", b"{}"), None);
    }

    #[test]
    fn signature_covers_timestamp_dot_body() {
        let signed = signature("abc", "1000", b"{}").unwrap();
        assert_eq!(signed, format!("sha256={}", hmac_hex("abc", b"1000.{}")));
    }

    #[test]
    fn signature_is_deterministic() {
        let first = signature("secret", "1700000000", br#"{"event":"task.completed"}"#);
        let second = signature("secret", "1700000000", br#"{"event":"task.completed"}"#);
        assert_eq!(first, second);
    }

    #[test]
    fn signature_format_is_prefixed_hex() {
        let signed = signature("secret", "0", b"payload").unwrap();
        let hex_part = signed.strip_prefix("sha256=").expect("prefix missing");
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_inputs_produce_different_signatures() {
        let base = signature("secret", "1000", b"{}").unwrap();
        assert_ne!(signature("other", "1000", b"{}").unwrap(), base);
        assert_ne!(signature("secret", "1001", b"{}").unwrap(), base);
        assert_ne!(signature("secret", "1000", b"[]").unwrap(), base);
    }
}

//! Storage-safe encoding of cache keys and tag names.
//!
//! The backing store rejects `.`, `$`, `#`, `[`, `]`, `/` and control
//! characters in path segments. Keys are percent-encoded with `.` escaped as
//! well, which keeps the encoding injective; any character that still falls
//! outside the allowed set is replaced with [`PLACEHOLDER`].

use std::borrow::Cow;

/// Substitute for characters the store cannot hold.
pub const PLACEHOLDER: char = '_';

/// Encode a raw key or tag into a single storage-safe path segment.
pub fn encode_key(raw: &str) -> String {
    urlencoding::encode(raw)
        .replace('.', "%2E")
        .chars()
        .map(|c| if is_allowed(c) { c } else { PLACEHOLDER })
        .collect()
}

/// Best-effort inverse of [`encode_key`], for diagnostics and purge targets.
///
/// Not an addressing mechanism: placeholder substitution cannot be undone and
/// malformed escapes decode lossily.
pub fn decode_key(encoded: &str) -> String {
    match urlencoding::decode_binary(encoded.as_bytes()) {
        Cow::Borrowed(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Cow::Owned(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// Whether `segment` can be used as a path segment unchanged.
pub fn is_storage_safe(segment: &str) -> bool {
    segment.chars().all(is_allowed)
}

fn is_allowed(c: char) -> bool {
    !matches!(c, '.' | '$' | '#' | '[' | ']' | '/') && !c.is_control()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_key("/blog/post-1"), "%2Fblog%2Fpost-1");
        assert_eq!(encode_key("index.html"), "index%2Ehtml");
        assert_eq!(encode_key(""), "");
    }

    #[test]
    fn test_encode_reserved() {
        let encoded = encode_key("a.b$c#d[e]f/g\u{7f}h");
        assert!(is_storage_safe(&encoded));
        assert_ne!(encode_key("a.b"), encode_key("a_b"));
    }

    #[test]
    fn test_decode_roundtrip() {
        for raw in ["/blog/post-1", "tag with spaces", "ünïcode.path", "a_b"] {
            assert_eq!(decode_key(&encode_key(raw)), raw);
        }
    }

    #[test]
    fn test_decode_malformed_is_lossy() {
        assert_eq!(decode_key("%FF"), "\u{fffd}");
        assert_eq!(decode_key("plain"), "plain");
    }

    #[test]
    fn test_is_storage_safe() {
        assert!(is_storage_safe("%2Fblog"));
        assert!(!is_storage_safe("a.b"));
        assert!(!is_storage_safe("a/b"));
    }
}

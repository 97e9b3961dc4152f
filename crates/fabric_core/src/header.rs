//! Header key canonicalisation.

/// Returns the canonical MIME form of a header key: the first letter and any
/// letter following a hyphen are upper-cased, the rest lower-cased
/// (`content-type` becomes `Content-Type`).
///
/// Keys containing a space or a byte that is not a valid header token
/// character are returned unchanged.
#[must_use]
pub fn canonical_header_key(key: &str) -> String {
    if !key.bytes().all(is_token_byte) {
        return key.to_string();
    }

    let mut upper = true;
    key.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("X-FORWARDED-HOST"), "X-Forwarded-Host");
        assert_eq!(canonical_header_key("accept"), "Accept");
    }

    #[test]
    fn test_invalid_key_unchanged() {
        assert_eq!(canonical_header_key("bad key"), "bad key");
    }
}

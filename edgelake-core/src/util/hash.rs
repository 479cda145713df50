use sha2::{Digest, Sha256};

/// Hex encoded sha256 over the concatenation of `parts`, each terminated by a NUL byte.
pub fn sha256(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::sha256;

    #[test]
    fn test_parts_are_delimited() {
        assert_ne!(sha256(&["ab", "c"]), sha256(&["a", "bc"]));
        assert_eq!(sha256(&["routing", "k"]), sha256(&["routing", "k"]));
        assert_eq!(sha256(&["x"]).len(), 64);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            "430646847e70344c09f58739e99d5bc96eac8d5fe7295cf196b986279876bf9b",
            sha256(&["hello world"])
        );
        assert_eq!(
            "ade0274f84b828b0980112609bb51775d0a4e39bf4728f21dcdd04a627abb92a",
            sha256(&["/"])
        );
    }
}

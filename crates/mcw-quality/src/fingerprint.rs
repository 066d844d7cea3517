use sha2::{Digest, Sha256};

/// SHA-256 hex digest of the page text. Absent text hashes like the empty string.
pub fn fingerprint(text: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_sha256_hex() {
        assert_eq!(
            fingerprint(Some("hello world")),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(fingerprint(Some("hello world")), fingerprint(Some("hello world")));
    }

    #[test]
    fn absent_text_hashes_as_empty() {
        let empty = fingerprint(Some(""));
        assert_eq!(fingerprint(None), empty);
        assert_eq!(
            empty,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn single_byte_differences_change_the_digest() {
        let inputs = ["Dose guide", "Dose guide ", "dose guide", "Dose guidE", "Dosage guide"];
        for (i, a) in inputs.iter().enumerate() {
            for b in inputs.iter().skip(i + 1) {
                assert_ne!(fingerprint(Some(a)), fingerprint(Some(b)), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn large_inputs_hash_without_error() {
        let text = "weight ".repeat(200_000);
        assert_eq!(fingerprint(Some(&text)).len(), 64);
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::constants::QNAME_HASH_PREFIX;

/// Salted, case- and whitespace-insensitive digest of a query name.
///
/// Query names never leave the router in clear text; only
/// `b64:<base64(sha256(salt + normalized name))>` does.
#[derive(Debug, Clone, Default)]
pub struct QnameHasher {
    salt: String,
}

impl QnameHasher {
    #[must_use]
    pub fn new(salt: impl Into<String>) -> Self {
        QnameHasher { salt: salt.into() }
    }

    #[must_use]
    pub fn hash(&self, qname: &str) -> String {
        let normalized = qname.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(normalized.as_bytes());
        let digest = hasher.finalize();
        format!("{QNAME_HASH_PREFIX}{}", STANDARD.encode(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_digest() {
        // sha256("") base64 encoded.
        assert_eq!(
            QnameHasher::new("").hash("  "),
            "b64:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_normalizes_case_and_whitespace() {
        let hasher = QnameHasher::new("pepper");
        assert_eq!(hasher.hash("Example.COM"), hasher.hash(" example.com\t"));
    }

    #[test]
    fn test_salt_changes_digest() {
        assert_ne!(
            QnameHasher::new("a").hash("example.com"),
            QnameHasher::new("b").hash("example.com")
        );
    }

    proptest! {
        #[test]
        fn test_deterministic(salt in "[a-z0-9]{0,8}", qname in "[a-zA-Z0-9.-]{1,40}") {
            let hasher = QnameHasher::new(salt.clone());
            let again = QnameHasher::new(salt);
            prop_assert_eq!(hasher.hash(&qname), again.hash(&qname.to_uppercase()));
            prop_assert!(hasher.hash(&qname).starts_with("b64:"));
        }

        #[test]
        fn test_distinct_names_differ(a in "[a-z0-9.]{1,30}", b in "[a-z0-9.]{1,30}") {
            prop_assume!(a != b);
            let hasher = QnameHasher::new("salt");
            prop_assert_ne!(hasher.hash(&a), hasher.hash(&b));
        }
    }
}

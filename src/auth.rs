//! Credential verification seam. Hashing policy is a collaborator concern;
//! the portal only consumes this trait, so swapping in a stronger scheme
//! never touches the handlers.

use sha2::{Digest, Sha256};

pub trait PasswordVerifier: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, candidate: &str, stored_hash: &str) -> bool;
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Default scheme: `sha256$<hex-digest>`. Unsalted and deliberately simple;
/// deployments with real user populations should provide a `PasswordVerifier`
/// backed by a proper password-hashing library.
pub struct Sha256Verifier;

impl PasswordVerifier for Sha256Verifier {
    fn hash(&self, password: &str) -> String {
        format!("sha256${}", sha256_hex(password.as_bytes()))
    }

    fn verify(&self, candidate: &str, stored_hash: &str) -> bool {
        match stored_hash.strip_prefix("sha256$") {
            Some(digest) => sha256_hex(candidate.as_bytes()) == digest,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let v = Sha256Verifier;
        let hash = v.hash("hunter2");
        assert!(hash.starts_with("sha256$"));
        assert!(v.verify("hunter2", &hash));
        assert!(!v.verify("hunter3", &hash));
    }

    #[test]
    fn unknown_hash_formats_never_verify() {
        let v = Sha256Verifier;
        assert!(!v.verify("anything", "argon2$something"));
        assert!(!v.verify("anything", ""));
    }
}

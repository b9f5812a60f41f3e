//! Thin wrapper over the post-quantum primitives.
//!
//! With the `pqc` feature disabled every function reports the mechanism as
//! absent, which is how the rest of the crate sees "provider not installed".

/// KEM mechanism name.
pub const KEM_NAME: &str = "Kyber512";

/// Signature mechanism name.
pub const SIG_NAME: &str = "Dilithium5";

#[cfg(feature = "pqc")]
mod imp {
    use pqcrypto_dilithium::dilithium5;
    use pqcrypto_kyber::kyber512;
    use pqcrypto_traits::kem::SharedSecret as _;
    use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
    use zeroize::Zeroizing;

    /// Encapsulate to a fresh keypair and check both sides agree.
    pub fn kem_self_test() -> bool {
        let (pk, sk) = kyber512::keypair();
        let (ss_sender, ct) = kyber512::encapsulate(&pk);
        let ss_receiver = kyber512::decapsulate(&ct, &sk);
        !ss_sender.as_bytes().is_empty() && ss_sender.as_bytes() == ss_receiver.as_bytes()
    }

    /// Sign and verify a fixed message with a fresh keypair.
    pub fn sig_self_test() -> bool {
        let message = b"quantumhealth signature self-test";
        let (pk, sk) = dilithium5::keypair();
        let sig = dilithium5::detached_sign(message, &sk);
        dilithium5::verify_detached_signature(&sig, message, &pk).is_ok()
            && dilithium5::verify_detached_signature(&sig, b"tampered", &pk).is_err()
    }

    /// Run one KEM exchange and return the receiver's shared secret.
    pub fn establish_shared_secret() -> Option<Zeroizing<Vec<u8>>> {
        let (pk, sk) = kyber512::keypair();
        let (ss_sender, ct) = kyber512::encapsulate(&pk);
        let ss_receiver = kyber512::decapsulate(&ct, &sk);
        if ss_sender.as_bytes() != ss_receiver.as_bytes() {
            return None;
        }
        Some(Zeroizing::new(ss_receiver.as_bytes().to_vec()))
    }

    /// Verify a detached signature.
    ///
    /// `Some(false)` covers both a failed check and key/signature bytes that
    /// do not parse.
    pub fn verify_detached(message: &[u8], signature: &[u8], public_key: &[u8]) -> Option<bool> {
        let Ok(pk) = dilithium5::PublicKey::from_bytes(public_key) else {
            return Some(false);
        };
        let Ok(sig) = dilithium5::DetachedSignature::from_bytes(signature) else {
            return Some(false);
        };
        Some(dilithium5::verify_detached_signature(&sig, message, &pk).is_ok())
    }

    /// Generate a signing keypair as `(public, secret)` bytes.
    pub fn sig_keypair() -> (Vec<u8>, Zeroizing<Vec<u8>>) {
        let (pk, sk) = dilithium5::keypair();
        (pk.as_bytes().to_vec(), Zeroizing::new(sk.as_bytes().to_vec()))
    }

    /// Produce a detached signature with secret key bytes from [`sig_keypair`].
    pub fn sign_detached(message: &[u8], secret_key: &[u8]) -> Option<Vec<u8>> {
        let sk = dilithium5::SecretKey::from_bytes(secret_key).ok()?;
        Some(dilithium5::detached_sign(message, &sk).as_bytes().to_vec())
    }
}

#[cfg(not(feature = "pqc"))]
mod imp {
    use zeroize::Zeroizing;

    pub fn kem_self_test() -> bool {
        false
    }

    pub fn sig_self_test() -> bool {
        false
    }

    pub fn establish_shared_secret() -> Option<Zeroizing<Vec<u8>>> {
        None
    }

    pub fn verify_detached(_message: &[u8], _signature: &[u8], _public_key: &[u8]) -> Option<bool> {
        None
    }
}

pub use imp::*;

#[cfg(all(test, feature = "pqc"))]
mod tests {
    use super::*;

    #[test]
    fn test_self_tests_pass_with_provider() {
        assert!(kem_self_test());
        assert!(sig_self_test());
    }

    #[test]
    fn test_sign_then_verify() {
        let (pk, sk) = sig_keypair();
        let sig = sign_detached(b"payload", &sk).expect("Valid secret key");
        assert_eq!(verify_detached(b"payload", &sig, &pk), Some(true));
        assert_eq!(verify_detached(b"other", &sig, &pk), Some(false));
    }

    #[test]
    fn test_garbage_key_is_a_failed_check() {
        assert_eq!(verify_detached(b"payload", &[1, 2, 3], &[4, 5, 6]), Some(false));
    }

    #[test]
    fn test_shared_secret_is_fresh() {
        let a = establish_shared_secret().expect("KEM works");
        let b = establish_shared_secret().expect("KEM works");
        assert_eq!(a.len(), 32);
        assert_ne!(*a, *b);
    }
}

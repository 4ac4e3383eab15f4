//! Encrypted credential vault: AES-256-GCM with an Argon2id-derived
//! master key.
//!
//! The master key is derived once per database (passphrase + per-database
//! salt) and held for the lifetime of the store. Each secret is sealed
//! with its own random nonce. Key material is zeroized on drop.

pub mod store;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

pub const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Ciphertext too short")]
    Truncated,

    #[error("Encryption failed")]
    Seal,

    #[error("Decryption failed: wrong master key or corrupted data")]
    Open,
}

/// Generate a fresh random salt for a new database.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// The 256-bit key that seals every secret in one database.
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    /// Derive the master key from a passphrase using Argon2id.
    pub fn derive(passphrase: &[u8], salt: &[u8]) -> Result<Self, CipherError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase, salt, &mut key)
            .map_err(|e| CipherError::Derivation(e.to_string()))?;
        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm, CipherError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CipherError::Derivation(e.to_string()))
    }

    /// Seal a secret. Returns: nonce (12) || ciphertext+tag
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Keyed fingerprint of a secret, used to detect duplicates without
    /// storing anything that can be brute-forced offline.
    pub fn fingerprint(&self, secret: &[u8]) -> Result<String, CipherError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key)
            .map_err(|e| CipherError::Derivation(e.to_string()))?;
        mac.update(secret);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Open a secret produced by `seal`.
    pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Open)?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey::derive(b"test-master-key-do-not-use", &[7u8; SALT_LEN]).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let key = test_key();
        let secret = b"sk-proj-abcdefghijklmnopqrstuvwxyz";

        let sealed = key.seal(secret).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], &secret[..]);
        assert_eq!(key.open(&sealed).unwrap().as_slice(), secret);
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let sealed = test_key().seal(b"gsk_secret").unwrap();
        let other = MasterKey::derive(b"another-passphrase", &[7u8; SALT_LEN]).unwrap();
        assert!(matches!(other.open(&sealed), Err(CipherError::Open)));
    }

    #[test]
    fn test_different_salt_derives_different_key() {
        let sealed = test_key().seal(b"AIzaSy-example").unwrap();
        let other = MasterKey::derive(b"test-master-key-do-not-use", &[8u8; SALT_LEN]).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = test_key();
        let a = key.seal(b"same").unwrap();
        let b = key.seal(b"same").unwrap();
        // Different nonce → different ciphertext
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_is_stable_and_keyed() {
        let key = test_key();
        let a = key.fingerprint(b"sk-one").unwrap();
        assert_eq!(a, key.fingerprint(b"sk-one").unwrap());
        assert_ne!(a, key.fingerprint(b"sk-two").unwrap());

        let other = MasterKey::derive(b"another-passphrase", &[7u8; SALT_LEN]).unwrap();
        assert_ne!(a, other.fingerprint(b"sk-one").unwrap());
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let key = test_key();
        assert!(matches!(key.open(&[0u8; 10]), Err(CipherError::Truncated)));
    }
}

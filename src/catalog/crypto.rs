//! At-rest encryption for catalog values: AES-256-GCM with Argon2id KDF.
//!
//! The master key is derived once per store from the process secret and a
//! store-level random salt kept in the unencrypted metadata header. Each
//! value is sealed as `nonce (12) ‖ ciphertext`; key material is zeroized
//! on drop.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{Error, Result};

pub const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Generate a fresh store salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Sealed-value codec bound to one derived key.
pub struct Crypto {
    cipher: Aes256Gcm,
}

impl Crypto {
    /// Derive the key from a passphrase and store salt.
    pub fn derive(passphrase: &[u8], salt: &[u8]) -> Result<Self> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase, salt, &mut key)
            .map_err(|e| Error::Crypto(format!("key derivation failed: {}", e)))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Crypto(format!("cipher init failed: {}", e)))?;
        key.zeroize();
        Ok(Self { cipher })
    }

    /// Seal plaintext as `nonce ‖ ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a value sealed by [`Crypto::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + 16 {
            return Err(Error::Crypto("sealed value too short".into()));
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &sealed[NONCE_LEN..])
            .map_err(|_| Error::Crypto("decryption failed: wrong secret or corrupted data".into()))
    }

    /// Seal a UTF-8 string.
    pub fn seal_str(&self, plaintext: &str) -> Result<Vec<u8>> {
        self.seal(plaintext.as_bytes())
    }

    /// Open to a UTF-8 string.
    pub fn open_str(&self, sealed: &[u8]) -> Result<String> {
        let mut plaintext = self.open(sealed)?;
        let result = String::from_utf8(plaintext.clone())
            .map_err(|_| Error::Crypto("sealed value is not valid UTF-8".into()));
        plaintext.zeroize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn crypto() -> Crypto {
        Crypto::derive(b"test-secret", &[7u8; SALT_LEN]).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let c = crypto();
        let sealed = c.seal_str("sk-api-key-material").unwrap();
        assert_ne!(sealed.as_slice(), b"sk-api-key-material".as_slice());
        assert_eq!(c.open_str(&sealed).unwrap(), "sk-api-key-material");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = crypto().seal_str("secret").unwrap();
        let other = Crypto::derive(b"other-secret", &[7u8; SALT_LEN]).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_sealings_differ_but_open_identically() {
        let c = crypto();
        let a = c.seal_str("same").unwrap();
        let b = c.seal_str("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.open_str(&a).unwrap(), "same");
        assert_eq!(c.open_str(&b).unwrap(), "same");
    }

    #[test]
    fn test_truncated_value_rejected() {
        let c = crypto();
        let sealed = c.seal_str("value").unwrap();
        assert!(c.open(&sealed[..10]).is_err());
    }
}

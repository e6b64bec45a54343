//! Symmetric payload encryption (C7).
//!
//! The spec treats the cipher as a black box (`encrypt(text) -> text`,
//! `decrypt(text) -> text`); `original_source/src/utils.py`'s
//! `EncryptionManager` fills that box with Fernet, which has no
//! equivalent crate in this corpus. Instead this reuses the teacher's own
//! box: libsodium's IETF ChaCha20-Poly1305 AEAD, grounded on
//! `server/lib/flux/src/crypto.rs`. A fresh random nonce is generated per
//! call and prepended to the ciphertext, then the whole thing is
//! base64-encoded so the wire representation is still plain text, just
//! like a Fernet token.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ctor::ctor;
use libsodium_sys as sodium;

use crate::error::{Error, Result};

/// The black-box interface spec.md specifies: whole application
/// messages go in as text and come back out as text. `CipherManager`
/// is this crate's one concrete implementation; callers (`rdt-client`,
/// `rdt-server`) depend on the trait, not the concrete type, so a
/// different symmetric-cipher backend could be swapped in without
/// touching endpoint code.
pub trait Cipher {
    fn encrypt(&self, text: &str) -> Result<String>;
    fn decrypt(&self, text: &str) -> Result<String>;
}

pub const KEY_SIZE: usize = sodium::crypto_aead_chacha20poly1305_IETF_KEYBYTES as usize;
pub const NONCE_SIZE: usize = sodium::crypto_aead_chacha20poly1305_IETF_NPUBBYTES as usize;
const MAC_SIZE: usize = sodium::crypto_aead_chacha20poly1305_IETF_ABYTES as usize;

#[ctor]
fn init_sodium() {
    unsafe {
        if sodium::sodium_init() < 0 {
            panic!("libsodium initialization failed");
        }
    }
}

fn random_bytes(out: &mut [u8]) {
    unsafe {
        sodium::randombytes_buf(out.as_mut_ptr() as *mut std::ffi::c_void, out.len());
    }
}

/// Holds one session's symmetric key and performs encryption/decryption
/// of text payloads for the wire. Analogous to the original's
/// `EncryptionManager`.
pub struct CipherManager {
    key: [u8; KEY_SIZE],
}

impl CipherManager {
    /// Generates a fresh random key, as the original does when no key is
    /// supplied to its constructor.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        random_bytes(&mut key);
        CipherManager { key }
    }

    /// Builds a manager from an existing key, e.g. one received during
    /// the handshake.
    pub fn with_key(key: [u8; KEY_SIZE]) -> Self {
        CipherManager { key }
    }

    /// Decodes a base64 key as carried in handshake metadata.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("invalid key encoding: {}", e)))?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("key has the wrong length".into()))?;
        Ok(CipherManager { key })
    }

    pub fn key_base64(&self) -> String {
        STANDARD.encode(self.key)
    }

    /// Encrypts `data` and returns a base64 token carrying the nonce and
    /// ciphertext. Empty input yields an empty string, matching the
    /// original's short-circuit.
    pub fn encrypt(&self, data: &str) -> Result<String> {
        if data.is_empty() {
            return Ok(String::new());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        random_bytes(&mut nonce);

        let plain = data.as_bytes();
        let mut cipher = vec![0u8; plain.len() + MAC_SIZE];

        let ok = unsafe {
            sodium::crypto_aead_chacha20poly1305_ietf_encrypt(
                cipher.as_mut_ptr(),
                std::ptr::null_mut(),
                plain.as_ptr(),
                plain.len() as u64,
                std::ptr::null(),
                0,
                std::ptr::null(),
                nonce.as_ptr(),
                self.key.as_ptr(),
            )
        };

        if ok != 0 {
            return Err(Error::Crypto("encryption failed".into()));
        }

        let mut token = Vec::with_capacity(NONCE_SIZE + cipher.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&cipher);

        Ok(STANDARD.encode(token))
    }

    /// Reverses `encrypt`. Empty input yields an empty string.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let token = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("invalid token encoding: {}", e)))?;

        if token.len() < NONCE_SIZE + MAC_SIZE {
            return Err(Error::Crypto("token too short".into()));
        }

        let (nonce, cipher) = token.split_at(NONCE_SIZE);
        let mut plain = vec![0u8; cipher.len() - MAC_SIZE];

        let ok = unsafe {
            sodium::crypto_aead_chacha20poly1305_ietf_decrypt(
                plain.as_mut_ptr(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                cipher.as_ptr(),
                cipher.len() as u64,
                std::ptr::null(),
                0,
                nonce.as_ptr(),
                self.key.as_ptr(),
            )
        };

        if ok != 0 {
            return Err(Error::Crypto("decryption failed: authentication tag mismatch".into()));
        }

        String::from_utf8(plain).map_err(|e| Error::Crypto(format!("decrypted payload was not UTF-8: {}", e)))
    }
}

impl Cipher for CipherManager {
    fn encrypt(&self, text: &str) -> Result<String> {
        CipherManager::encrypt(self, text)
    }

    fn decrypt(&self, text: &str) -> Result<String> {
        CipherManager::decrypt(self, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_roundtrip() {
        let mgr = CipherManager::generate();
        assert_eq!(mgr.encrypt("").unwrap(), "");
        assert_eq!(mgr.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_roundtrip() {
        let mgr = CipherManager::generate();
        let token = mgr.encrypt("hello reliable world").unwrap();
        assert_ne!(token, "hello reliable world");
        assert_eq!(mgr.decrypt(&token).unwrap(), "hello reliable world");
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let mgr_a = CipherManager::generate();
        let mgr_b = CipherManager::generate();
        let token = mgr_a.encrypt("secret payload").unwrap();
        assert!(mgr_b.decrypt(&token).is_err());
    }

    #[test]
    fn test_key_exchange_via_base64() {
        let mgr = CipherManager::generate();
        let encoded = mgr.key_base64();
        let restored = CipherManager::from_base64_key(&encoded).unwrap();

        let token = mgr.encrypt("shared secret key demo").unwrap();
        assert_eq!(restored.decrypt(&token).unwrap(), "shared secret key demo");
    }

    #[test]
    fn test_two_encryptions_of_same_text_differ() {
        let mgr = CipherManager::generate();
        let first = mgr.encrypt("repeat me").unwrap();
        let second = mgr.encrypt("repeat me").unwrap();
        assert_ne!(first, second, "fresh nonce should change the ciphertext");
    }
}

use aes_gcm::{
    aead::{Aead, OsRng, Payload},
    AeadCore, Aes256Gcm, Key, KeyInit, Nonce,
};
use hex::FromHexError;
use std::string::FromUtf8Error;
use thiserror::Error;

const NONCE_SIZE: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key length must be 64 hex chars long")]
    AesKey,
    #[error("protected value is too short")]
    Truncated,
    #[error("{0}")]
    AesGcm(String),
    #[error("{0}")]
    HexDecode(#[from] FromHexError),
    #[error("{0}")]
    FromUtf8Error(#[from] FromUtf8Error),
}

impl From<aes_gcm::aead::Error> for CryptoError {
    fn from(value: aes_gcm::aead::Error) -> Self {
        CryptoError::AesGcm(value.to_string())
    }
}

/// Authenticated encryption for values handed to the browser in cookies.
///
/// Output is `hex(nonce || ciphertext)`. The purpose is bound as associated
/// data, a value protected for one purpose does not unprotect under another.
#[derive(Clone)]
pub struct CookieProtector {
    key: Key<Aes256Gcm>,
    purpose: String,
}

impl CookieProtector {
    /// Uses the given hex encoded key, or a fresh random key when none is given.
    ///
    /// A random key means cookies do not survive a restart.
    pub fn new(hex_key: Option<&str>) -> Result<Self, CryptoError> {
        let key = match hex_key {
            Some(hex_key) => {
                // saved as hex and hence length is 64 for 32 byte key
                if hex_key.chars().count() != 64 {
                    return Err(CryptoError::AesKey);
                }
                let bytes = hex::decode(hex_key)?;
                Key::<Aes256Gcm>::from_slice(&bytes).clone()
            }
            None => {
                log::warn!("No encryption key configured, generating a random one. Set ENCRYPTION_KEY in production.");
                Aes256Gcm::generate_key(&mut OsRng)
            }
        };
        Ok(Self {
            key,
            purpose: String::new(),
        })
    }

    /// Same key, bound to `purpose` instead of the current one.
    pub fn for_purpose(&self, purpose: &str) -> Self {
        Self {
            key: self.key.clone(),
            purpose: purpose.to_string(),
        }
    }

    pub fn protect(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let cipher = Aes256Gcm::new(&self.key);

        let payload = Payload {
            msg: plaintext.as_bytes(),
            aad: self.purpose.as_bytes(),
        };
        let ciphered_data = cipher.encrypt(&nonce, payload)?;

        let mut encrypted_data = nonce.to_vec();
        encrypted_data.extend_from_slice(&ciphered_data);
        Ok(hex::encode(encrypted_data))
    }

    pub fn unprotect(&self, protected: &str) -> Result<String, CryptoError> {
        let encrypted_data = hex::decode(protected)?;
        if encrypted_data.len() <= NONCE_SIZE {
            return Err(CryptoError::Truncated);
        }

        let (nonce_vec, ciphered_text) = encrypted_data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_vec);

        let cipher = Aes256Gcm::new(&self.key);

        let payload = Payload {
            msg: ciphered_text,
            aad: self.purpose.as_bytes(),
        };
        let plaintext = cipher.decrypt(nonce, payload)?;

        String::from_utf8(plaintext).map_err(CryptoError::FromUtf8Error)
    }
}

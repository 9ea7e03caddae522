//! Client-side encryption for shared secrets.
//!
//! The creator encrypts before upload and the viewer decrypts after reveal;
//! the server only stores what comes out of [`ShareCipher::encrypt`].
//! Keys are PBKDF2-HMAC-SHA256 over the passphrase with a constant salt,
//! used for AES-256-CBC with PKCS#7 padding and a random IV per message.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const IV_LEN: usize = 16;
const SALT: [u8; 16] = [0u8; 16];

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Wrong passphrase or a corrupted payload; the two are indistinguishable.
    /// A wrong key still passes the PKCS#7 check about once in 256 tries, so
    /// the UTF-8 check on the plaintext is what catches those.
    #[error("unable to decrypt secret: wrong password or corrupted data")]
    DecryptionFailure,

    #[error("fallback passphrase must not be empty")]
    MissingPassphrase,

    #[error("invalid base64 in {field}: {source}")]
    Encoding {
        field: &'static str,
        source: base64::DecodeError,
    },
}

/// 32-byte AES key derived from a passphrase.
#[derive(ZeroizeOnDrop)]
pub struct ShareKey([u8; 32]);

impl ShareKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Base64 payload exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub cipher: String,
    pub iv: String,
}

/// Derive the AES key for `passphrase`.
pub fn derive_key(passphrase: &str) -> ShareKey {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &SALT, PBKDF2_ITERATIONS, &mut key);
    ShareKey(key)
}

/// Encryption helper bound to the deployment's fallback passphrase, used
/// whenever the creator does not pick a password of their own.
pub struct ShareCipher {
    fallback: String,
}

impl ShareCipher {
    pub fn new(fallback: impl Into<String>) -> Result<Self, CryptoError> {
        let fallback = fallback.into();
        if fallback.is_empty() {
            return Err(CryptoError::MissingPassphrase);
        }
        Ok(Self { fallback })
    }

    fn key_for(&self, passphrase: Option<&str>) -> ShareKey {
        match passphrase {
            Some(p) if !p.is_empty() => derive_key(p),
            _ => derive_key(&self.fallback),
        }
    }

    pub fn encrypt(&self, plaintext: &str, passphrase: Option<&str>) -> EncryptedSecret {
        let key = self.key_for(passphrase);

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new(key.as_bytes().into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        EncryptedSecret {
            cipher: STANDARD.encode(cipher),
            iv: STANDARD.encode(iv),
        }
    }

    pub fn decrypt(
        &self,
        cipher_b64: &str,
        iv_b64: &str,
        passphrase: Option<&str>,
    ) -> Result<String, CryptoError> {
        let cipher = STANDARD
            .decode(cipher_b64)
            .map_err(|source| CryptoError::Encoding {
                field: "cipher",
                source,
            })?;
        let iv = STANDARD
            .decode(iv_b64)
            .map_err(|source| CryptoError::Encoding { field: "iv", source })?;

        let key = self.key_for(passphrase);
        let decryptor = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
            .map_err(|_| CryptoError::DecryptionFailure)?;
        let mut plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&cipher)
            .map_err(|_| CryptoError::DecryptionFailure)?;

        match String::from_utf8(plaintext) {
            Ok(text) => Ok(text),
            Err(e) => {
                plaintext = e.into_bytes();
                plaintext.zeroize();
                Err(CryptoError::DecryptionFailure)
            }
        }
    }
}

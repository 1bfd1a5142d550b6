//! Access token verification.
//!
//! A token is the URL-safe base64 encoding of `nonce || ciphertext || tag`:
//! a 12-byte nonce followed by the AES-GCM encryption of the access phrase
//! under the stored key. A token is accepted only when it decrypts and the
//! recovered text equals the stored phrase byte for byte. Every failure
//! along the way is a plain denial.

use std::sync::Arc;

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::settings::{Secret, SecretStore};
use crate::{Error, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// URL-safe alphabet; decoding accepts tokens with or without padding.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
   &alphabet::URL_SAFE,
   GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// AES-GCM keyed by the stored secret; key length picks the variant.
enum Cipher {
   Aes128(Aes128Gcm),
   Aes256(Aes256Gcm),
}

impl Cipher {
   fn new(key: &[u8]) -> Result<Self> {
      let invalid = |_| Error::InvalidSecret(key.len());
      match key.len() {
         16 => Aes128Gcm::new_from_slice(key).map(Cipher::Aes128).map_err(invalid),
         32 => Aes256Gcm::new_from_slice(key).map(Cipher::Aes256).map_err(invalid),
         n => Err(Error::InvalidSecret(n)),
      }
   }

   fn decrypt(&self, nonce: &Nonce<U12>, ciphertext: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
      let plaintext = match self {
         Cipher::Aes128(cipher) => cipher.decrypt(nonce, ciphertext),
         Cipher::Aes256(cipher) => cipher.decrypt(nonce, ciphertext),
      };
      plaintext.ok().map(Zeroizing::new)
   }

   fn encrypt(&self, nonce: &Nonce<U12>, plaintext: &[u8]) -> Option<Vec<u8>> {
      let ciphertext = match self {
         Cipher::Aes128(cipher) => cipher.encrypt(nonce, plaintext),
         Cipher::Aes256(cipher) => cipher.encrypt(nonce, plaintext),
      };
      ciphertext.ok()
   }
}

/// Allow/deny decision for access tokens.
///
/// The secret is loaded from the store on every call.
#[derive(Clone)]
pub struct AccessGate {
   store: Arc<dyn SecretStore>,
}

impl AccessGate {
   pub fn new(store: Arc<dyn SecretStore>) -> Self {
      Self { store }
   }

   pub fn is_authorized(&self, token: &str) -> bool {
      self.check(token).is_ok()
   }

   /// `Ok` when the token is accepted, otherwise [`Error::Unauthorized`].
   pub fn check(&self, token: &str) -> Result<()> {
      let secret = match self.store.load() {
         Ok(secret) => secret,
         Err(e) => {
            debug!(code = %e.error_code(), "Access denied: secret unavailable");
            return Err(Error::Unauthorized);
         }
      };

      if verify(&secret, token) {
         Ok(())
      } else {
         debug!("Access denied: token rejected");
         Err(Error::Unauthorized)
      }
   }

   /// Mint a token for `phrase` under the stored key, with a fresh nonce.
   pub fn issue_token(&self, phrase: &str) -> Result<String> {
      let secret = self.store.load()?;
      let cipher = Cipher::new(secret.key())?;
      let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

      let ciphertext = cipher
         .encrypt(&nonce, phrase.as_bytes())
         .ok_or_else(|| Error::Settings("token encryption failed".to_string()))?;

      let mut blob = Zeroizing::new(Vec::with_capacity(NONCE_LEN + ciphertext.len()));
      blob.extend_from_slice(&nonce);
      blob.extend_from_slice(&ciphertext);
      Ok(TOKEN_ENGINE.encode(blob.as_slice()))
   }
}

fn verify(secret: &Secret, token: &str) -> bool {
   let Ok(blob) = TOKEN_ENGINE.decode(token.trim()) else {
      return false;
   };
   let blob = Zeroizing::new(blob);
   if blob.len() < NONCE_LEN + TAG_LEN {
      return false;
   }

   let Ok(cipher) = Cipher::new(secret.key()) else {
      return false;
   };
   let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
   let Some(plaintext) = cipher.decrypt(Nonce::<U12>::from_slice(nonce), ciphertext) else {
      return false;
   };

   plaintext.ct_eq(secret.access_phrase().as_bytes()).into()
}

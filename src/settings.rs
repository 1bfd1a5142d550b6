//! Persistent process-wide secret record.
//!
//! The record holds the symmetric key and the access phrase that tokens
//! must decrypt to. It is written once and read again on every gate check,
//! so nothing derived from it is cached between calls.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::{Error, Result};

/// Key lengths accepted for the AEAD: AES-128-GCM and AES-256-GCM.
pub const SUPPORTED_KEY_LENGTHS: [usize; 2] = [16, 32];

/// Symmetric key plus access phrase, zeroed on drop.
#[derive(Clone)]
pub struct Secret {
   key: Zeroizing<Vec<u8>>,
   access_phrase: Zeroizing<String>,
}

impl Secret {
   pub fn new(key: Vec<u8>, access_phrase: impl Into<String>) -> Result<Self> {
      let key = Zeroizing::new(key);
      if !SUPPORTED_KEY_LENGTHS.contains(&key.len()) {
         return Err(Error::InvalidSecret(key.len()));
      }

      Ok(Self {
         key,
         access_phrase: Zeroizing::new(access_phrase.into()),
      })
   }

   pub fn key(&self) -> &[u8] {
      &self.key
   }

   pub fn access_phrase(&self) -> &str {
      &self.access_phrase
   }
}

impl fmt::Debug for Secret {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Secret")
         .field("key", &format_args!("<{} bytes>", self.key.len()))
         .field("access_phrase", &"<redacted>")
         .finish()
   }
}

/// Storage for the secret record.
pub trait SecretStore: Send + Sync {
   /// Read the current record.
   fn load(&self) -> Result<Secret>;

   /// Persist the record unless one already exists.
   fn write_once(&self, secret: &Secret) -> Result<()>;
}

/// On-disk shape of the record.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretRecord {
   /// Standard base64
   key: String,
   access_phrase: String,
}

impl Drop for SecretRecord {
   fn drop(&mut self) {
      self.key.zeroize();
      self.access_phrase.zeroize();
   }
}

/// Secret record kept as a JSON file.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
   path: PathBuf,
}

impl FileSecretStore {
   pub fn new(path: impl Into<PathBuf>) -> Self {
      Self { path: path.into() }
   }

   pub fn path(&self) -> &Path {
      &self.path
   }
}

impl SecretStore for FileSecretStore {
   fn load(&self) -> Result<Secret> {
      let bytes = match fs::read(&self.path) {
         Ok(bytes) => Zeroizing::new(bytes),
         Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::Settings(format!(
               "no secret record at {}",
               self.path.display()
            )));
         }
         Err(e) => return Err(e.into()),
      };

      let mut record: SecretRecord = serde_json::from_slice(&bytes)?;
      let key = STANDARD
         .decode(record.key.trim())
         .map_err(|e| Error::Settings(format!("invalid key encoding: {e}")))?;

      Secret::new(key, std::mem::take(&mut record.access_phrase))
   }

   fn write_once(&self, secret: &Secret) -> Result<()> {
      if let Some(parent) = self.path.parent() {
         fs::create_dir_all(parent)?;
      }

      let record = SecretRecord {
         key: STANDARD.encode(secret.key()),
         access_phrase: secret.access_phrase().to_string(),
      };
      let json = Zeroizing::new(serde_json::to_vec(&record)?);

      // create_new makes the existence check and the write one step
      let mut file = match OpenOptions::new()
         .write(true)
         .create_new(true)
         .open(&self.path)
      {
         Ok(file) => file,
         Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(path = %self.path.display(), "Secret record already exists");
            return Err(Error::SecretAlreadyWritten);
         }
         Err(e) => return Err(e.into()),
      };
      file.write_all(&json)?;
      file.sync_all()?;

      info!(path = %self.path.display(), "Secret record written");
      Ok(())
   }
}

/// Secret record held in memory, for hosts that inject the secret.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
   secret: RwLock<Option<Secret>>,
}

impl MemorySecretStore {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_secret(secret: Secret) -> Self {
      Self {
         secret: RwLock::new(Some(secret)),
      }
   }
}

impl SecretStore for MemorySecretStore {
   fn load(&self) -> Result<Secret> {
      self
         .secret
         .read()
         .clone()
         .ok_or_else(|| Error::Settings("no secret record".to_string()))
   }

   fn write_once(&self, secret: &Secret) -> Result<()> {
      let mut slot = self.secret.write();
      if slot.is_some() {
         return Err(Error::SecretAlreadyWritten);
      }
      *slot = Some(secret.clone());
      Ok(())
   }
}

//! The single owned SQLite connection and the storage rules around it

use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info};

use crate::{ConnectionConfig, Error, Result};

/// Statements slower than this are logged at warn level by sqlx.
const SLOW_STATEMENT_THRESHOLD: Duration = Duration::from_secs(1);

/// Name fragments that mark SQLite side files rather than databases.
const SIDE_FILE_MARKERS: [&str; 3] = ["journal", "-wal", "-shm"];

/// Resolve a caller-supplied database name to a file inside `storage_dir`.
///
/// Only plain file names are accepted. Anything that could address a file
/// outside the storage directory (separators, `.`/`..`, NUL bytes) is
/// rejected with [`Error::InvalidDatabaseName`].
pub fn resolve_database_path(storage_dir: &Path, name: &str) -> Result<PathBuf> {
   let invalid = name.is_empty()
      || name == "."
      || name == ".."
      || name.contains(['/', '\\', '\0'])
      || Path::new(name).is_absolute();

   if invalid {
      return Err(Error::InvalidDatabaseName(name.to_string()));
   }

   Ok(storage_dir.join(name))
}

/// List the databases stored in `storage_dir`, sorted by name.
///
/// Journal, WAL and shared-memory side files are skipped. A missing
/// storage directory lists as empty.
pub fn list_databases(storage_dir: &Path) -> Result<Vec<String>> {
   let entries = match fs::read_dir(storage_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
   };

   let mut names = Vec::new();
   for entry in entries {
      let entry = entry?;
      if !entry.file_type()?.is_file() {
         continue;
      }

      let name = entry.file_name().to_string_lossy().into_owned();
      let lower = name.to_lowercase();
      if SIDE_FILE_MARKERS.iter().any(|marker| lower.contains(marker)) {
         continue;
      }
      names.push(name);
   }

   names.sort();
   Ok(names)
}

/// The single live connection to a database file.
///
/// Dereferences to [`SqliteConnection`] so statements can be executed with
/// `&mut *conn`. Whoever holds this value is the only code allowed to touch
/// the database.
#[derive(Debug)]
pub struct OwnedConnection {
   conn: SqliteConnection,
   name: String,
   path: PathBuf,
}

impl OwnedConnection {
   /// Open `name` inside `storage_dir` with the given connection policy.
   pub async fn open(storage_dir: &Path, name: &str, config: &ConnectionConfig) -> Result<Self> {
      let path = resolve_database_path(storage_dir, name)?;

      if !config.create_if_missing && !path.is_file() {
         return Err(Error::DatabaseNotFound(name.to_string()));
      }

      if config.create_if_missing {
         fs::create_dir_all(storage_dir)?;
      }

      let options = SqliteConnectOptions::new()
         .filename(&path)
         .create_if_missing(config.create_if_missing)
         .foreign_keys(config.foreign_keys)
         .busy_timeout(config.busy_timeout())
         .statement_cache_capacity(config.statement_cache_capacity)
         .log_statements(LevelFilter::Debug)
         .log_slow_statements(LevelFilter::Warn, SLOW_STATEMENT_THRESHOLD);

      let conn = options.connect().await?;
      info!(database = %name, "Opened owned connection");

      Ok(Self {
         conn,
         name: name.to_string(),
         path,
      })
   }

   /// Database name as the caller supplied it
   pub fn name(&self) -> &str {
      &self.name
   }

   /// Absolute location of the database file
   pub fn path(&self) -> &Path {
      &self.path
   }

   /// Close the connection, flushing anything SQLite still buffers
   pub async fn close(self) -> Result<()> {
      let name = self.name;
      self.conn.close().await?;
      debug!(database = %name, "Closed owned connection");
      Ok(())
   }
}

impl Deref for OwnedConnection {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for OwnedConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use tempfile::TempDir;

   #[test]
   fn resolve_accepts_plain_names() {
      let dir = Path::new("/data/app/databases");
      assert_eq!(
         resolve_database_path(dir, "notes.db").unwrap(),
         dir.join("notes.db")
      );
      assert!(resolve_database_path(dir, "no_extension").is_ok());
   }

   #[test]
   fn resolve_rejects_traversal() {
      let dir = Path::new("/data/app/databases");
      for name in ["", ".", "..", "../secrets.db", "a/b.db", "a\\b.db", "/etc/passwd", "x\0y"] {
         assert!(
            matches!(
               resolve_database_path(dir, name),
               Err(Error::InvalidDatabaseName(_))
            ),
            "{name:?} should be rejected"
         );
      }
   }

   #[test]
   fn list_skips_side_files_and_directories() {
      let temp = TempDir::new().unwrap();
      for name in ["b.db", "a.db", "a.db-journal", "b.db-wal", "b.db-shm"] {
         fs::write(temp.path().join(name), b"").unwrap();
      }
      fs::create_dir(temp.path().join("nested")).unwrap();

      assert_eq!(list_databases(temp.path()).unwrap(), vec!["a.db", "b.db"]);
   }

   #[test]
   fn list_missing_directory_is_empty() {
      let temp = TempDir::new().unwrap();
      assert!(list_databases(&temp.path().join("absent")).unwrap().is_empty());
   }

   #[tokio::test]
   async fn open_missing_database_fails_without_creating() {
      let temp = TempDir::new().unwrap();
      let err = OwnedConnection::open(temp.path(), "missing.db", &ConnectionConfig::default())
         .await
         .unwrap_err();

      assert!(matches!(err, Error::DatabaseNotFound(ref name) if name == "missing.db"));
      assert!(!temp.path().join("missing.db").exists());
   }

   #[tokio::test]
   async fn open_creates_when_configured() {
      let temp = TempDir::new().unwrap();
      let config = ConnectionConfig {
         create_if_missing: true,
         ..Default::default()
      };

      let mut conn = OwnedConnection::open(temp.path(), "fresh.db", &config)
         .await
         .unwrap();
      sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
         .execute(&mut *conn)
         .await
         .unwrap();

      assert_eq!(conn.name(), "fresh.db");
      assert_eq!(conn.path(), temp.path().join("fresh.db"));
      conn.close().await.unwrap();
      assert!(temp.path().join("fresh.db").is_file());
   }

   #[tokio::test]
   async fn foreign_keys_follow_config() {
      let temp = TempDir::new().unwrap();
      let config = ConnectionConfig {
         create_if_missing: true,
         foreign_keys: true,
         ..Default::default()
      };

      let mut conn = OwnedConnection::open(temp.path(), "fk.db", &config)
         .await
         .unwrap();
      let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
         .fetch_one(&mut *conn)
         .await
         .unwrap();

      assert_eq!(enabled, 1);
      conn.close().await.unwrap();
   }
}

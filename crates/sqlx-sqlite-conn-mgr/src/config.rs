//! Configuration for the owned SQLite connection

use serde::Deserialize;
use std::time::Duration;

/// Connection policy applied when the owned connection is opened
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn_mgr::ConnectionConfig;
///
/// // Use defaults
/// let config = ConnectionConfig::default();
///
/// // Override just one field
/// let config = ConnectionConfig {
///     foreign_keys: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
   /// Create the database file when it does not exist
   ///
   /// The application owns its databases, so the gateway only serves files
   /// that already exist unless this is enabled.
   ///
   /// Default: false
   pub create_if_missing: bool,

   /// Enforce foreign key constraints from the moment the connection opens
   ///
   /// Can be toggled later on the live connection.
   ///
   /// Default: false (SQLite's own default)
   pub foreign_keys: bool,

   /// How long a statement waits on a locked database before failing, in milliseconds
   ///
   /// Default: 5000
   pub busy_timeout_ms: u64,

   /// Number of prepared statements kept cached on the connection
   ///
   /// Default: 100
   pub statement_cache_capacity: usize,
}

impl ConnectionConfig {
   pub fn busy_timeout(&self) -> Duration {
      Duration::from_millis(self.busy_timeout_ms)
   }
}

impl Default for ConnectionConfig {
   fn default() -> Self {
      Self {
         create_if_missing: false,
         foreign_keys: false,
         busy_timeout_ms: 5_000,
         statement_cache_capacity: 100,
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn partial_config_keeps_defaults() {
      let config: ConnectionConfig = serde_json::from_str(r#"{ "foreignKeys": true }"#).unwrap();
      assert!(config.foreign_keys);
      assert!(!config.create_if_missing);
      assert_eq!(config.busy_timeout(), Duration::from_secs(5));
   }
}

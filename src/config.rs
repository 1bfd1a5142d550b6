//! Gateway configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sqlx_sqlite_conn_mgr::ConnectionConfig;

use crate::Result;

pub const DEFAULT_WORKER_THREAD_NAME: &str = "sqlite-gateway-worker";

/// Where databases live and how they are opened.
///
/// # Examples
///
/// ```
/// use sqlite_gateway::GatewayConfig;
///
/// let config = GatewayConfig::new("/data/app/databases");
/// assert_eq!(config.worker_thread_name, "sqlite-gateway-worker");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
   /// App-private directory holding the databases
   pub storage_dir: PathBuf,

   /// Policy for the owned connection
   #[serde(default)]
   pub connection: ConnectionConfig,

   /// Name given to the worker thread
   #[serde(default = "default_worker_thread_name")]
   pub worker_thread_name: String,
}

fn default_worker_thread_name() -> String {
   DEFAULT_WORKER_THREAD_NAME.to_string()
}

impl GatewayConfig {
   pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
      Self {
         storage_dir: storage_dir.into(),
         connection: ConnectionConfig::default(),
         worker_thread_name: default_worker_thread_name(),
      }
   }

   /// Load from a JSON file.
   pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
      let bytes = std::fs::read(path)?;
      Ok(serde_json::from_slice(&bytes)?)
   }

   pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
      self.connection = connection;
      self
   }
}

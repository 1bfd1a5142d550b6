//! Authenticated entry points and lifecycle of the owned connection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use sqlx_sqlite_toolkit::{CancelFlag, OperationRequest, OperationResponse};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::AccessGate;
use crate::config::GatewayConfig;
use crate::settings::SecretStore;
use crate::worker::{Job, Worker, WorkerHandle};
use crate::{Error, Result};

/// Answer to `openConnection` and `checkConnection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
   pub connected: bool,
}

/// What `close_connection` found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseOutcome {
   /// A connection was open when the call arrived
   pub was_open: bool,
   /// An open transaction was rolled back by the close
   pub rolled_back: bool,
}

/// A submitted request whose response has not been delivered yet.
///
/// Await it for the [`OperationResponse`]. If the worker stops before
/// answering, the response is `Exception: no open connection`.
#[must_use = "the response is only delivered when awaited"]
#[derive(Debug)]
pub struct PendingOperation {
   request_id: Uuid,
   cancel: CancelFlag,
   reply: Option<oneshot::Receiver<OperationResponse>>,
   fallback: OperationResponse,
}

impl PendingOperation {
   fn queued(
      request_id: Uuid,
      cancel: CancelFlag,
      reply: oneshot::Receiver<OperationResponse>,
      request: &OperationRequest,
   ) -> Self {
      Self {
         request_id,
         cancel,
         reply: Some(reply),
         fallback: OperationResponse::exception(request, Error::NotConnected.to_string()),
      }
   }

   fn ready(request_id: Uuid, response: OperationResponse) -> Self {
      Self {
         request_id,
         cancel: CancelFlag::new(),
         reply: None,
         fallback: response,
      }
   }

   pub fn request_id(&self) -> Uuid {
      self.request_id
   }

   /// Flag that cancels this request's query when set.
   pub fn cancel_handle(&self) -> CancelFlag {
      self.cancel.clone()
   }
}

impl Future for PendingOperation {
   type Output = OperationResponse;

   fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
      let this = self.get_mut();

      if let Some(reply) = this.reply.as_mut() {
         match reply.poll_unpin(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(response)) => {
               this.reply = None;
               return Poll::Ready(response);
            }
            Poll::Ready(Err(_)) => this.reply = None,
         }
      }

      Poll::Ready(this.fallback.clone())
   }
}

/// Token-gated front of a single owned SQLite connection.
///
/// At most one database is open at a time. All work for it runs on one
/// dedicated worker thread, in submission order.
pub struct SqliteGateway {
   config: GatewayConfig,
   gate: AccessGate,
   /// Sending side of the running worker, read on every submission
   active: RwLock<Option<WorkerHandle>>,
   /// Serializes open and close
   lifecycle: Mutex<Option<Worker>>,
}

impl SqliteGateway {
   pub fn new(config: GatewayConfig, secrets: Arc<dyn SecretStore>) -> Self {
      Self {
         config,
         gate: AccessGate::new(secrets),
         active: RwLock::new(None),
         lifecycle: Mutex::new(None),
      }
   }

   pub fn config(&self) -> &GatewayConfig {
      &self.config
   }

   pub fn access_gate(&self) -> &AccessGate {
      &self.gate
   }

   /// Open `database` from the storage directory on a fresh worker.
   ///
   /// Opening the database that is already open is a no-op. Opening a
   /// different one closes the current connection first.
   pub async fn open_connection(&self, token: &str, database: &str) -> ConnectionStatus {
      if self.gate.check(token).is_err() {
         return ConnectionStatus { connected: false };
      }

      let mut slot = self.lifecycle.lock().await;

      if let Some(current) = slot.as_ref() {
         let handle = current.handle();
         if handle.is_running() && handle.database() == database {
            debug!(database = %database, "Connection already open");
            return ConnectionStatus { connected: true };
         }
      }

      if let Some(previous) = slot.take() {
         *self.active.write() = None;
         info!(
            from = %previous.handle().database(),
            to = %database,
            "Switching databases"
         );
         if let Err(e) = previous.shutdown().await {
            warn!("Failed to close previous connection: {}", e);
         }
      }

      match Worker::spawn(&self.config, database).await {
         Ok(worker) => {
            *self.active.write() = Some(worker.handle());
            *slot = Some(worker);
            ConnectionStatus { connected: true }
         }
         Err(e) => {
            warn!(database = %database, code = %e.error_code(), "Failed to open connection: {}", e);
            ConnectionStatus { connected: false }
         }
      }
   }

   /// Close the open connection, rolling back any open transaction.
   pub async fn close_connection(&self, token: &str) -> Result<CloseOutcome> {
      self.gate.check(token)?;

      let mut slot = self.lifecycle.lock().await;
      *self.active.write() = None;

      let Some(worker) = slot.take() else {
         return Ok(CloseOutcome::default());
      };

      let outcome = match worker.shutdown().await? {
         Some(closed) => CloseOutcome {
            was_open: true,
            rolled_back: closed.rolled_back,
         },
         None => CloseOutcome::default(),
      };
      Ok(outcome)
   }

   pub fn check_connection(&self, token: &str) -> ConnectionStatus {
      if self.gate.check(token).is_err() {
         return ConnectionStatus { connected: false };
      }

      let connected = self
         .active
         .read()
         .as_ref()
         .is_some_and(WorkerHandle::is_running);
      ConnectionStatus { connected }
   }

   /// Databases available in the storage directory.
   pub fn list_databases(&self, token: &str) -> Result<Vec<String>> {
      self.gate.check(token)?;
      Ok(sqlx_sqlite_toolkit::list_databases(&self.config.storage_dir)?)
   }

   /// Queue a request behind every request submitted before it.
   ///
   /// Never waits on the database. Rejected requests resolve immediately
   /// with an `Exception: ...` response.
   pub fn submit(&self, token: &str, request: OperationRequest) -> PendingOperation {
      let request_id = Uuid::new_v4();

      if let Err(e) = self.gate.check(token) {
         debug!(%request_id, kind = %request.kind, "Request rejected");
         return PendingOperation::ready(
            request_id,
            OperationResponse::exception(&request, e.to_string()),
         );
      }

      let Some(handle) = self.active.read().clone() else {
         return PendingOperation::ready(
            request_id,
            OperationResponse::exception(&request, Error::NotConnected.to_string()),
         );
      };

      let cancel = CancelFlag::new();
      let (reply_tx, reply_rx) = oneshot::channel();
      let pending = PendingOperation::queued(request_id, cancel.clone(), reply_rx, &request);

      debug!(%request_id, database = %handle.database(), kind = %request.kind, "Request queued");
      let job = Job::Dispatch {
         request_id,
         request,
         cancel,
         reply: reply_tx,
      };
      if handle.send(job).is_err() {
         // The dropped reply sender resolves the pending operation
         debug!(%request_id, "Worker gone before enqueue");
      }

      pending
   }

   /// Queue a request and hand its response to `callback` once it is ready.
   ///
   /// Inside a Tokio runtime the callback runs on a spawned task; otherwise a
   /// short-lived thread waits for the response. Returns the request's
   /// cancel handle.
   pub fn submit_with_callback<F>(
      &self,
      token: &str,
      request: OperationRequest,
      callback: F,
   ) -> CancelFlag
   where
      F: FnOnce(OperationResponse) + Send + 'static,
   {
      let pending = self.submit(token, request);
      let cancel = pending.cancel_handle();
      match tokio::runtime::Handle::try_current() {
         Ok(runtime) => {
            runtime.spawn(async move { callback(pending.await) });
         }
         Err(_) => {
            let request_id = pending.request_id();
            let delivery = thread::Builder::new()
               .name(format!("{}-callback", self.config.worker_thread_name))
               .spawn(move || callback(futures::executor::block_on(pending)));
            if let Err(e) = delivery {
               warn!(%request_id, "Failed to start callback thread: {}", e);
            }
         }
      }
      cancel
   }

   /// Submit and wait for the response.
   pub async fn execute(&self, token: &str, request: OperationRequest) -> OperationResponse {
      self.submit(token, request).await
   }
}

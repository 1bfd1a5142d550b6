//! The single execution context that owns the connection.
//!
//! A [`Worker`] is one named OS thread running a current-thread runtime. The
//! thread opens the [`Session`] itself and is the only code that ever
//! touches it; everything else talks to it through an unbounded FIFO of
//! [`Job`]s, so enqueueing never waits on the database. Jobs run strictly
//! one after another, marshaling included.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use sqlx_sqlite_conn_mgr::ConnectionConfig;
use sqlx_sqlite_toolkit::{
   CancelFlag, CloseOutcome, OperationRequest, OperationResponse, OperationResult, Session,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::{Error, Result};

/// Work sent to the worker thread.
pub(crate) enum Job {
   Dispatch {
      request_id: Uuid,
      request: OperationRequest,
      cancel: CancelFlag,
      reply: oneshot::Sender<OperationResponse>,
   },
   /// Roll back, close the connection and stop.
   Close {
      reply: oneshot::Sender<Result<CloseOutcome>>,
   },
}

/// Cheap, cloneable sending side of a running worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
   database: String,
   jobs: mpsc::UnboundedSender<Job>,
}

impl WorkerHandle {
   pub fn database(&self) -> &str {
      &self.database
   }

   /// False once the worker has stopped taking jobs.
   pub fn is_running(&self) -> bool {
      !self.jobs.is_closed()
   }

   pub fn send(&self, job: Job) -> Result<()> {
      self.jobs.send(job).map_err(|_| Error::WorkerGone)
   }
}

/// A running worker thread and the connection it owns.
#[derive(Debug)]
pub(crate) struct Worker {
   handle: WorkerHandle,
   thread: Option<JoinHandle<()>>,
}

impl Worker {
   /// Start a worker and open `database` on it.
   ///
   /// Returns once the connection is open, or with the error that kept it
   /// from opening.
   pub async fn spawn(config: &GatewayConfig, database: &str) -> Result<Self> {
      let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
      let (ready_tx, ready_rx) = oneshot::channel();

      let opener = Opener {
         storage_dir: config.storage_dir.clone(),
         database: database.to_string(),
         connection: config.connection.clone(),
      };
      let thread = thread::Builder::new()
         .name(config.worker_thread_name.clone())
         .spawn(move || run_worker(opener, jobs_rx, ready_tx))
         .map_err(Error::WorkerSpawn)?;

      let mut worker = Self {
         handle: WorkerHandle {
            database: database.to_string(),
            jobs: jobs_tx,
         },
         thread: Some(thread),
      };

      match ready_rx.await {
         Ok(Ok(())) => {
            info!(database = %database, "Worker started");
            Ok(worker)
         }
         Ok(Err(e)) => {
            worker.join().await;
            Err(e)
         }
         Err(_) => {
            worker.join().await;
            Err(Error::WorkerGone)
         }
      }
   }

   pub fn handle(&self) -> WorkerHandle {
      self.handle.clone()
   }

   /// Close the connection and wait for the thread to exit.
   ///
   /// `None` when the worker had already stopped on its own.
   pub async fn shutdown(mut self) -> Result<Option<CloseOutcome>> {
      let (reply_tx, reply_rx) = oneshot::channel();
      let closed = match self.handle.send(Job::Close { reply: reply_tx }) {
         Ok(()) => reply_rx.await.ok(),
         Err(_) => None,
      };

      self.join().await;
      info!(database = %self.handle.database, "Worker stopped");
      closed.transpose()
   }

   async fn join(&mut self) {
      let Some(thread) = self.thread.take() else {
         return;
      };

      match tokio::task::spawn_blocking(move || thread.join()).await {
         Ok(Ok(())) => {}
         Ok(Err(_)) => warn!(database = %self.handle.database, "Worker thread panicked"),
         Err(e) => warn!(database = %self.handle.database, "Failed to join worker thread: {}", e),
      }
   }
}

/// What the worker thread needs to open its session.
struct Opener {
   storage_dir: PathBuf,
   database: String,
   connection: ConnectionConfig,
}

fn run_worker(
   opener: Opener,
   jobs: mpsc::UnboundedReceiver<Job>,
   ready: oneshot::Sender<Result<()>>,
) {
   let runtime = match tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
   {
      Ok(runtime) => runtime,
      Err(e) => {
         let _ = ready.send(Err(Error::WorkerSpawn(e)));
         return;
      }
   };

   runtime.block_on(async move {
      let session =
         match Session::open(&opener.storage_dir, &opener.database, &opener.connection).await {
            Ok(session) => session,
            Err(e) => {
               debug!(database = %opener.database, "Open failed: {}", e);
               let _ = ready.send(Err(e.into()));
               return;
            }
         };

      if ready.send(Ok(())).is_err() {
         // Nobody is waiting for this worker any more
         let _ = session.close().await;
         return;
      }

      serve(session, jobs).await;
   });
}

async fn serve(mut session: Session, mut jobs: mpsc::UnboundedReceiver<Job>) {
   while let Some(job) = jobs.recv().await {
      match job {
         Job::Dispatch {
            request_id,
            request,
            cancel,
            reply,
         } => {
            trace!(
               %request_id,
               database = %session.database(),
               kind = %request.kind,
               "Job started"
            );

            let response = if cancel.is_canceled() {
               OperationResponse::new(&request, OperationResult::Canceled)
            } else {
               session.dispatch(&request, &cancel).await
            };

            debug!(
               %request_id,
               database = %session.database(),
               kind = %request.kind,
               exception = response.result.is_exception(),
               "Job finished"
            );
            // Stop taking jobs before the caller can observe the close
            let closing = session.close_requested();
            if closing {
               jobs.close();
            }

            if reply.send(response).is_err() {
               trace!(%request_id, "Submitter went away before the reply");
            }

            if closing {
               break;
            }
         }
         Job::Close { reply } => {
            let _ = reply.send(session.close().await.map_err(Error::from));
            jobs.close();
            drain(&mut jobs);
            return;
         }
      }
   }

   // Reached on a closeConnection request, or when every sender is gone
   jobs.close();
   drain(&mut jobs);
   if let Err(e) = session.close().await {
      warn!("Failed to close connection: {}", e);
   }
}

/// Answer jobs that were queued behind a close.
fn drain(jobs: &mut mpsc::UnboundedReceiver<Job>) {
   while let Ok(job) = jobs.try_recv() {
      match job {
         Job::Dispatch { request, reply, .. } => {
            let _ = reply.send(OperationResponse::exception(
               &request,
               Error::NotConnected.to_string(),
            ));
         }
         Job::Close { reply } => {
            let _ = reply.send(Ok(CloseOutcome::default()));
         }
      }
   }
}

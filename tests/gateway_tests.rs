//! End-to-end tests through the token gate and the worker thread.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlite_gateway::{
   CloseOutcome, ConnectionConfig, ConnectionStatus, FileSecretStore, GatewayConfig,
   MemorySecretStore, OperationKind, OperationRequest, OperationResult, Secret, SecretStore,
   SqliteGateway, TransactionAction, Values,
};
use tempfile::TempDir;
use tokio::sync::oneshot;

const PHRASE: &str = "correct horse battery staple";

struct TestGateway {
   gateway: Arc<SqliteGateway>,
   token: String,
   _temp_dir: TempDir,
}

fn init_tracing() {
   let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn create_test_gateway() -> TestGateway {
   init_tracing();

   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let config = GatewayConfig::new(temp_dir.path()).with_connection(ConnectionConfig {
      create_if_missing: true,
      ..Default::default()
   });
   let secret = Secret::new(vec![42u8; 32], PHRASE).unwrap();
   let gateway = SqliteGateway::new(config, Arc::new(MemorySecretStore::with_secret(secret)));
   let token = gateway.access_gate().issue_token(PHRASE).unwrap();

   TestGateway {
      gateway: Arc::new(gateway),
      token,
      _temp_dir: temp_dir,
   }
}

async fn create_open_gateway() -> TestGateway {
   let test = create_test_gateway();
   let status = test.gateway.open_connection(&test.token, "test.db").await;
   assert!(status.connected);
   test
}

impl TestGateway {
   async fn run(&self, request: OperationRequest) -> Vec<String> {
      self.gateway.execute(&self.token, request).await.into_lines()
   }

   async fn ddl(&self, sql: &str) {
      let lines = self.run(OperationRequest::raw(OperationKind::Ddl, sql)).await;
      assert_eq!(lines[0], "true", "{sql}: {lines:?}");
   }

   async fn single_value(&self, sql: &str) -> String {
      let lines = self.run(OperationRequest::raw(OperationKind::Query, sql)).await;
      assert_eq!(lines[0], "1", "{sql}: {lines:?}");
      lines[6].clone()
   }

   async fn transaction(&self, action: TransactionAction) -> Vec<String> {
      self.run(OperationRequest::transaction(action)).await
   }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn open_check_close() {
   let test = create_test_gateway();
   let gateway = &test.gateway;

   assert_eq!(
      gateway.check_connection(&test.token),
      ConnectionStatus { connected: false }
   );
   assert!(gateway.open_connection(&test.token, "test.db").await.connected);
   assert!(gateway.check_connection(&test.token).connected);

   // Reopening the same database keeps the connection
   assert!(gateway.open_connection(&test.token, "test.db").await.connected);

   let outcome = gateway.close_connection(&test.token).await.unwrap();
   assert_eq!(
      outcome,
      CloseOutcome {
         was_open: true,
         rolled_back: false
      }
   );
   assert!(!gateway.check_connection(&test.token).connected);

   let again = gateway.close_connection(&test.token).await.unwrap();
   assert!(!again.was_open);
}

#[tokio::test(flavor = "multi_thread")]
async fn only_existing_databases_open_by_default() {
   let temp_dir = TempDir::new().unwrap();
   std::fs::write(temp_dir.path().join("present.db"), b"").unwrap();

   let secret = Secret::new(vec![1u8; 16], PHRASE).unwrap();
   let gateway = SqliteGateway::new(
      GatewayConfig::new(temp_dir.path()),
      Arc::new(MemorySecretStore::with_secret(secret)),
   );
   let token = gateway.access_gate().issue_token(PHRASE).unwrap();

   assert!(!gateway.open_connection(&token, "absent.db").await.connected);
   assert!(!temp_dir.path().join("absent.db").exists());
   assert!(gateway.open_connection(&token, "present.db").await.connected);
}

#[tokio::test(flavor = "multi_thread")]
async fn path_traversal_is_refused() {
   let test = create_test_gateway();

   for name in ["../escape.db", "/etc/passwd", "nested/inner.db", ""] {
      let status = test.gateway.open_connection(&test.token, name).await;
      assert!(!status.connected, "{name}");
   }
}

#[tokio::test(flavor = "multi_thread")]
async fn list_databases_skips_side_files() {
   let test = create_open_gateway().await;
   test.ddl("CREATE TABLE t (id INTEGER)").await;

   let dir = test.gateway.config().storage_dir.clone();
   std::fs::write(dir.join("other.db"), b"").unwrap();
   std::fs::write(dir.join("other.db-journal"), b"").unwrap();
   std::fs::write(dir.join("other.db-wal"), b"").unwrap();

   let names = test.gateway.list_databases(&test.token).unwrap();
   assert_eq!(names, vec!["other.db", "test.db"]);
   assert!(test.gateway.list_databases("bogus").is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn switching_databases_rolls_back_the_first() {
   let test = create_test_gateway();
   let gateway = &test.gateway;

   assert!(gateway.open_connection(&test.token, "a.db").await.connected);
   test.ddl("CREATE TABLE t (id INTEGER PRIMARY KEY)").await;
   test.transaction(TransactionAction::Begin).await;
   test
      .run(OperationRequest::raw(OperationKind::Insert, "INSERT INTO t DEFAULT VALUES"))
      .await;

   assert!(gateway.open_connection(&test.token, "b.db").await.connected);
   let state = test.run(OperationRequest::new(OperationKind::InTransaction)).await;
   assert_eq!(state[0], "false");

   assert!(gateway.open_connection(&test.token, "a.db").await.connected);
   assert_eq!(test.single_value("SELECT count(*) FROM t").await, "0");
}

// ============================================================================
// Access gate
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn bad_tokens_are_denied_everywhere() {
   let test = create_open_gateway().await;
   let gateway = &test.gateway;

   // Flip one character in the middle of the token
   let mut forged: Vec<char> = test.token.chars().collect();
   let mid = forged.len() / 2;
   forged[mid] = if forged[mid] == 'A' { 'B' } else { 'A' };
   let forged: String = forged.into_iter().collect();

   for token in [forged.as_str(), "", "garbage"] {
      assert!(!gateway.check_connection(token).connected);
      assert!(!gateway.open_connection(token, "test.db").await.connected);
      assert!(gateway.close_connection(token).await.is_err());

      let lines = gateway
         .execute(token, OperationRequest::raw(OperationKind::Query, "SELECT 1"))
         .await
         .into_lines();
      assert_eq!(lines[0], "Exception: unauthorized");
      assert_eq!(lines[2], "query");
   }

   // Denied calls left the open connection alone
   assert!(gateway.check_connection(&test.token).connected);
}

#[tokio::test(flavor = "multi_thread")]
async fn file_secret_store_is_read_on_every_check() {
   let temp_dir = TempDir::new().unwrap();
   let secret_path = temp_dir.path().join("secret.json");
   let store = Arc::new(FileSecretStore::new(&secret_path));

   let gateway = SqliteGateway::new(GatewayConfig::new(temp_dir.path()), store.clone());
   assert!(!gateway.check_connection("anything").connected);
   assert!(gateway.access_gate().issue_token(PHRASE).is_err());

   store
      .write_once(&Secret::new(vec![5u8; 32], PHRASE).unwrap())
      .unwrap();
   let token = gateway.access_gate().issue_token(PHRASE).unwrap();
   assert!(gateway.access_gate().is_authorized(&token));
}

// ============================================================================
// Worker queue
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn requests_without_connection_get_exception() {
   let test = create_test_gateway();
   let lines = test
      .run(OperationRequest::raw(OperationKind::Query, "SELECT 1").with_display_flag("x"))
      .await;
   assert_eq!(lines, vec!["Exception: no open connection", "SELECT 1", "query", "", "x"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_callers_are_serialized() {
   let test = create_open_gateway().await;
   test.ddl("CREATE TABLE counter (n INTEGER); INSERT INTO counter VALUES (0);").await;

   const CALLERS: usize = 64;
   let mut tasks = Vec::with_capacity(CALLERS);
   for _ in 0..CALLERS {
      let gateway = test.gateway.clone();
      let token = test.token.clone();
      tasks.push(tokio::spawn(async move {
         gateway
            .execute(
               &token,
               OperationRequest::raw(OperationKind::Update, "UPDATE counter SET n = n + 1"),
            )
            .await
      }));
   }

   for task in tasks {
      let response = task.await.unwrap();
      assert_eq!(response.result, OperationResult::Count(1));
   }

   assert_eq!(
      test.single_value("SELECT n FROM counter").await,
      CALLERS.to_string()
   );
}

#[tokio::test(flavor = "multi_thread")]
async fn submissions_run_in_order() {
   let test = create_open_gateway().await;
   test.ddl("CREATE TABLE seq (id INTEGER PRIMARY KEY, v INTEGER)").await;

   let pending: Vec<_> = (0..20)
      .map(|v| {
         let values: Values = [("v".to_string(), json!(v))].into_iter().collect();
         test.gateway.submit(
            &test.token,
            OperationRequest::structured(OperationKind::Insert, "seq").with_values(values),
         )
      })
      .collect();

   // Await in reverse; the row ids still follow submission order
   for (v, op) in pending.into_iter().enumerate().rev() {
      let response = op.await;
      assert_eq!(response.result, OperationResult::RowId(v as i64 + 1));
   }
}

#[tokio::test(flavor = "multi_thread")]
async fn callback_receives_response() {
   let test = create_open_gateway().await;
   let (tx, rx) = oneshot::channel();

   test.gateway.submit_with_callback(
      &test.token,
      OperationRequest::raw(OperationKind::Query, "SELECT 2.5 AS x, NULL AS y"),
      move |response| {
         let _ = tx.send(response.into_lines());
      },
   );

   let lines = rx.await.unwrap();
   assert_eq!(&lines[5..], ["x:float,y:null", "2.5000,"]);
}

#[test]
fn callback_is_delivered_without_a_runtime() {
   let runtime = tokio::runtime::Runtime::new().unwrap();
   let test = runtime.block_on(create_open_gateway());
   let (tx, rx) = std::sync::mpsc::channel();

   // Called from plain test code, outside any runtime context
   test.gateway.submit_with_callback(
      &test.token,
      OperationRequest::raw(OperationKind::Query, "SELECT 7 AS n"),
      move |response| {
         let _ = tx.send(response.into_lines());
      },
   );

   let lines = rx.recv_timeout(Duration::from_secs(10)).unwrap();
   assert_eq!(&lines[5..], ["n:integer", "7"]);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn rollback_discards_commit_keeps() {
   let test = create_open_gateway().await;
   test.ddl("CREATE TABLE t (id INTEGER PRIMARY KEY)").await;
   let insert = || OperationRequest::raw(OperationKind::Insert, "INSERT INTO t DEFAULT VALUES");

   assert_eq!(test.transaction(TransactionAction::Begin).await[0], "true");
   test.run(insert()).await;
   assert_eq!(test.transaction(TransactionAction::Rollback).await[0], "true");
   assert_eq!(test.single_value("SELECT count(*) FROM t").await, "0");

   test.transaction(TransactionAction::Begin).await;
   test.run(insert()).await;
   test.transaction(TransactionAction::Commit).await;
   assert_eq!(test.single_value("SELECT count(*) FROM t").await, "1");
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_errors_are_text() {
   let test = create_open_gateway().await;

   let lines = test.transaction(TransactionAction::Rollback).await;
   assert!(lines[0].starts_with("Exception: no active transaction"));

   test.transaction(TransactionAction::Begin).await;
   let lines = test.transaction(TransactionAction::Begin).await;
   assert!(lines[0].starts_with("Exception: already in transaction"));

   let state = test.run(OperationRequest::new(OperationKind::InTransaction)).await;
   assert_eq!(state[0], "true");
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_failure_inside_transaction_then_rollback() {
   let test = create_open_gateway().await;
   test.ddl("CREATE TABLE t (id INTEGER PRIMARY KEY)").await;

   let batch: Vec<Values> = [1, 2, 2, 3, 4]
      .into_iter()
      .map(|id| [("id".to_string(), json!(id))].into_iter().collect())
      .collect();
   let request = OperationRequest::structured(OperationKind::Batch, "t").with_batch_values(batch);

   test.transaction(TransactionAction::Begin).await;
   let lines = test.run(request.clone()).await;
   assert!(
      lines[0].starts_with("Exception: batch insert failed at index 2 after 2 successful inserts")
   );
   test.transaction(TransactionAction::Rollback).await;
   assert_eq!(test.single_value("SELECT count(*) FROM t").await, "0");

   test.run(request).await;
   assert_eq!(test.single_value("SELECT count(*) FROM t").await, "2");
}

#[tokio::test(flavor = "multi_thread")]
async fn close_mid_transaction_rolls_back() {
   let test = create_open_gateway().await;
   test.ddl("CREATE TABLE t (id INTEGER PRIMARY KEY)").await;
   test.transaction(TransactionAction::Begin).await;
   test
      .run(OperationRequest::raw(OperationKind::Insert, "INSERT INTO t DEFAULT VALUES"))
      .await;

   let outcome = test.gateway.close_connection(&test.token).await.unwrap();
   assert_eq!(
      outcome,
      CloseOutcome {
         was_open: true,
         rolled_back: true
      }
   );

   assert!(test.gateway.open_connection(&test.token, "test.db").await.connected);
   assert_eq!(test.single_value("SELECT count(*) FROM t").await, "0");
}

#[tokio::test(flavor = "multi_thread")]
async fn close_connection_request_stops_the_worker() {
   let test = create_open_gateway().await;
   test.transaction(TransactionAction::Begin).await;

   let lines = test.run(OperationRequest::new(OperationKind::CloseConnection)).await;
   assert_eq!(lines[0], "true");
   assert_eq!(lines[5], "rolledBack:true");

   assert!(!test.gateway.check_connection(&test.token).connected);
   let after = test.run(OperationRequest::raw(OperationKind::Query, "SELECT 1")).await;
   assert_eq!(after[0], "Exception: no open connection");

   // The stopped worker is replaced on the next open
   assert!(test.gateway.open_connection(&test.token, "test.db").await.connected);
   assert_eq!(test.single_value("SELECT 1").await, "1");
}

// ============================================================================
// Cancellation
// ============================================================================

const LONG_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 20000000) SELECT x FROM c";

#[tokio::test(flavor = "multi_thread")]
async fn cancel_running_and_queued_queries() {
   let test = create_open_gateway().await;

   let running = test
      .gateway
      .submit(&test.token, OperationRequest::raw(OperationKind::Query, LONG_QUERY));
   let queued = test
      .gateway
      .submit(&test.token, OperationRequest::raw(OperationKind::Query, "SELECT 1"));
   queued.cancel_handle().cancel();
   assert_ne!(running.request_id(), queued.request_id());

   tokio::time::sleep(Duration::from_millis(50)).await;
   running.cancel_handle().cancel();

   let lines = running.await.into_lines();
   assert_eq!(lines[0], "canceled");
   assert_eq!(lines.len(), 5);
   assert_eq!(queued.await.result, OperationResult::Canceled);

   // The worker moves on to the next request
   assert_eq!(test.single_value("SELECT 7").await, "7");
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_faults_do_not_stop_the_queue() {
   let test = create_open_gateway().await;

   let lines = test
      .run(OperationRequest::raw(OperationKind::Query, "SELEC nonsense"))
      .await;
   assert!(lines[0].starts_with("Exception: "));

   assert_eq!(test.single_value("SELECT 'still here'").await, "still here");
}

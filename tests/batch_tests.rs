//! Batch staging and execution through the statement
//!
//! The scripted transport serves per-item results for the emulated path and
//! a single scripted result list for the native path, recording every wire
//! call so tests can tell the two strategies apart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use firebird_rs::{
    BatchItemError, BatchItemResult, BatchOutcome, Catalog, CommitMode, Error, ExecOptions,
    ExecOutcome, FetchChunk, ParamDescriptor, PreparedInfo, Result, SqlType, Statement,
    StatementConfig, StatementId, StatementState, TransactionContext, Transport,
    TransportCapabilities, Value,
};

struct BatchTransport {
    native_batch: bool,
    /// Scripted per-item execute results; an empty script answers 1 row
    exec_script: Mutex<VecDeque<Result<u64>>>,
    native_results: Mutex<Option<Vec<BatchItemResult>>>,
    executes: Mutex<Vec<Vec<Value>>>,
    batch_payloads: Mutex<Vec<Vec<Vec<Value>>>>,
    prepares: AtomicUsize,
}

impl BatchTransport {
    fn emulated() -> Self {
        Self {
            native_batch: false,
            exec_script: Mutex::new(VecDeque::new()),
            native_results: Mutex::new(None),
            executes: Mutex::new(Vec::new()),
            batch_payloads: Mutex::new(Vec::new()),
            prepares: AtomicUsize::new(0),
        }
    }

    fn native() -> Self {
        Self {
            native_batch: true,
            ..Self::emulated()
        }
    }

    fn script_execs(&self, results: Vec<Result<u64>>) {
        *self.exec_script.lock().unwrap() = results.into();
    }

    fn script_native(&self, results: Vec<BatchItemResult>) {
        *self.native_results.lock().unwrap() = Some(results);
    }

    /// Parameter rows seen by single-item execute calls, in call order
    fn executed_params(&self) -> Vec<Vec<Value>> {
        self.executes.lock().unwrap().clone()
    }

    /// Parameter row lists seen by native batch calls
    fn native_payloads(&self) -> Vec<Vec<Vec<Value>>> {
        self.batch_payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for BatchTransport {
    async fn prepare(&self, _tx: &TransactionContext, text: &str) -> Result<PreparedInfo> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        let produces_rows = text.trim_start().to_ascii_uppercase().starts_with("SELECT");
        let params = vec![
            ParamDescriptor {
                sql_type: SqlType::Integer,
                nullable: true,
            };
            text.matches('?').count()
        ];
        Ok(PreparedInfo {
            statement_id: StatementId(7),
            params,
            columns: Vec::new(),
            produces_rows,
        })
    }

    async fn execute(
        &self,
        _tx: &TransactionContext,
        _stmt: StatementId,
        params: &[Value],
        _opts: &ExecOptions,
    ) -> Result<ExecOutcome> {
        self.executes.lock().unwrap().push(params.to_vec());
        let count = match self.exec_script.lock().unwrap().pop_front() {
            Some(result) => result?,
            None => 1,
        };
        Ok(ExecOutcome {
            has_result_set: false,
            update_count: Some(count),
        })
    }

    async fn execute_batch(
        &self,
        _tx: &TransactionContext,
        _stmt: StatementId,
        items: &[Vec<Value>],
        _opts: &ExecOptions,
    ) -> Result<Vec<BatchItemResult>> {
        self.batch_payloads.lock().unwrap().push(items.to_vec());
        self.native_results
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Internal("no native batch result scripted".to_string()))
    }

    async fn fetch(
        &self,
        _tx: &TransactionContext,
        _stmt: StatementId,
        _max_rows: usize,
    ) -> Result<FetchChunk> {
        Ok(FetchChunk {
            rows: Vec::new(),
            at_end: true,
        })
    }

    async fn close_cursor(&self, _stmt: StatementId) -> Result<()> {
        Ok(())
    }

    async fn release(&self, _stmt: StatementId) -> Result<()> {
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        Ok(())
    }

    async fn begin(&self, mode: CommitMode) -> Result<TransactionContext> {
        Ok(TransactionContext::new(50, mode))
    }

    async fn rollback(&self, _tx: &TransactionContext) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            server_scroll: false,
            native_batch: self.native_batch,
        }
    }
}

struct NullCatalog;

#[async_trait]
impl Catalog for NullCatalog {
    async fn procedure_selectable(&self, _procedure: &str) -> Result<Option<bool>> {
        Ok(None)
    }

    async fn primary_key_columns(&self, _relation: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn statement(transport: &Arc<BatchTransport>) -> Statement {
    Statement::new(transport.clone(), Arc::new(NullCatalog), StatementConfig::new())
}

fn manual_tx() -> TransactionContext {
    TransactionContext::new(1, CommitMode::Manual)
}

async fn prepared_insert(stmt: &mut Statement, tx: &TransactionContext) {
    stmt.prepare(tx, "INSERT INTO log (id, line) VALUES (?, ?)")
        .await
        .unwrap();
}

fn stage(stmt: &mut Statement, id: i64, line: &str) {
    stmt.set_value(0, id.into()).unwrap();
    stmt.set_value(1, line.into()).unwrap();
    stmt.add_batch().unwrap();
}

fn row(id: i64, line: &str) -> Vec<Value> {
    vec![Value::Integer(id), Value::String(line.to_string())]
}

mod staging_tests {
    use super::*;

    #[tokio::test]
    async fn test_add_batch_stages_current_params() {
        let transport = Arc::new(BatchTransport::emulated());
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        stage(&mut stmt, 1, "first");
        stage(&mut stmt, 2, "second");

        let items = stmt.batch().items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].params(), &row(1, "first")[..]);
        assert_eq!(items[1].params(), &row(2, "second")[..]);
        assert!(matches!(items[0].outcome(), BatchOutcome::Pending));

        stmt.clear_batch();
        assert!(stmt.batch().is_empty());
    }

    #[tokio::test]
    async fn test_add_batch_rejects_output_slots() {
        let transport = Arc::new(BatchTransport::emulated());
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        stmt.prepare(&tx, "{call next_id(?)}").await.unwrap();
        stmt.register_out_slot(0).unwrap();

        let err = stmt.add_batch().unwrap_err();
        assert!(err.to_string().contains("output values"), "{err}");
        assert!(stmt.batch().is_empty());
    }

    #[tokio::test]
    async fn test_execute_batch_rejects_result_sets() {
        let transport = Arc::new(BatchTransport::emulated());
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        stmt.prepare(&tx, "SELECT id FROM log").await.unwrap();
        stmt.add_batch().unwrap();

        let err = stmt.execute_batch(&tx).await.unwrap_err();
        assert!(err.to_string().contains("no result set"), "{err}");
        assert!(transport.executed_params().is_empty());
    }
}

mod emulated_tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_executes_items_in_order() {
        let transport = Arc::new(BatchTransport::emulated());
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        stage(&mut stmt, 1, "a");
        stage(&mut stmt, 2, "b");
        stage(&mut stmt, 3, "c");
        let report = stmt.execute_batch(&tx).await.unwrap();

        assert_eq!(report.success_count(), 3);
        assert_eq!(report.failure_count(), 0);
        assert_eq!(report.total_rows_affected(), 3);
        assert_eq!(
            transport.executed_params(),
            vec![row(1, "a"), row(2, "b"), row(3, "c")]
        );
        assert_eq!(stmt.state(), StatementState::Prepared);
        // the run stays staged until cleared
        assert_eq!(stmt.batch().len(), 3);
    }

    #[tokio::test]
    async fn test_batch_continues_past_item_failure() {
        let transport = Arc::new(BatchTransport::emulated());
        transport.script_execs(vec![
            Ok(1),
            Err(Error::server(335544665, "violation of PRIMARY KEY \"PK_LOG\"")),
            Ok(2),
        ]);
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        stage(&mut stmt, 1, "a");
        stage(&mut stmt, 1, "dup");
        stage(&mut stmt, 3, "c");
        let err = stmt.execute_batch(&tx).await.unwrap_err();

        // every item ran despite the failure in the middle
        assert_eq!(transport.executed_params().len(), 3);

        let Error::Batch(report) = err else {
            panic!("expected a batch report, got {err}");
        };
        assert_eq!(
            report.outcomes(),
            &[
                BatchOutcome::UpdateCount(1),
                BatchOutcome::Failed(BatchItemError {
                    index: 1,
                    code: Some(335544665),
                    message: "violation of PRIMARY KEY \"PK_LOG\"".to_string(),
                }),
                BatchOutcome::UpdateCount(2),
            ][..]
        );
        assert_eq!(
            report.to_string(),
            "1 of 3 items failed, first at item 1: violation of PRIMARY KEY \"PK_LOG\""
        );

        // outcomes remain inspectable on the staged run
        assert!(matches!(
            stmt.batch().items()[2].outcome(),
            BatchOutcome::UpdateCount(2)
        ));
    }

    #[tokio::test]
    async fn test_cancel_aborts_the_run() {
        let transport = Arc::new(BatchTransport::emulated());
        transport.script_execs(vec![Ok(1), Err(Error::Cancelled)]);
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        stage(&mut stmt, 1, "a");
        stage(&mut stmt, 2, "b");
        stage(&mut stmt, 3, "c");
        let err = stmt.execute_batch(&tx).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled), "{err}");
        // execution stopped at the cancelled item
        assert_eq!(transport.executed_params().len(), 2);
        let outcomes: Vec<_> = stmt.batch().items().iter().map(|i| i.outcome()).collect();
        assert!(matches!(outcomes[0], BatchOutcome::UpdateCount(1)));
        assert!(matches!(outcomes[1], BatchOutcome::Pending));
        assert!(matches!(outcomes[2], BatchOutcome::Pending));
    }

    #[tokio::test]
    async fn test_empty_run_skips_the_wire() {
        let transport = Arc::new(BatchTransport::emulated());
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        let report = stmt.execute_batch(&tx).await.unwrap();

        assert!(report.outcomes().is_empty());
        assert_eq!(report.total_rows_affected(), 0);
        assert!(transport.executed_params().is_empty());
        assert_eq!(stmt.state(), StatementState::Prepared);
    }
}

mod native_tests {
    use super::*;

    #[tokio::test]
    async fn test_native_batch_is_one_round_trip() {
        let transport = Arc::new(BatchTransport::native());
        transport.script_native(vec![BatchItemResult::Updated(2), BatchItemResult::Updated(3)]);
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        stage(&mut stmt, 1, "a");
        stage(&mut stmt, 2, "b");
        let report = stmt.execute_batch(&tx).await.unwrap();

        assert_eq!(report.total_rows_affected(), 5);
        assert_eq!(
            transport.native_payloads(),
            vec![vec![row(1, "a"), row(2, "b")]]
        );
        // no per-item round trips
        assert!(transport.executed_params().is_empty());
    }

    #[tokio::test]
    async fn test_native_failures_map_per_item() {
        let transport = Arc::new(BatchTransport::native());
        transport.script_native(vec![
            BatchItemResult::Updated(1),
            BatchItemResult::Failed {
                code: Some(335544665),
                message: "dup".to_string(),
            },
        ]);
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        stage(&mut stmt, 1, "a");
        stage(&mut stmt, 1, "dup");
        let err = stmt.execute_batch(&tx).await.unwrap_err();

        let Error::Batch(report) = err else {
            panic!("expected a batch report, got {err}");
        };
        assert_eq!(
            report.outcomes()[1],
            BatchOutcome::Failed(BatchItemError {
                index: 1,
                code: Some(335544665),
                message: "dup".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_native_result_count_mismatch_is_rejected() {
        let transport = Arc::new(BatchTransport::native());
        transport.script_native(vec![BatchItemResult::Updated(1)]);
        let mut stmt = statement(&transport);
        let tx = manual_tx();
        prepared_insert(&mut stmt, &tx).await;

        stage(&mut stmt, 1, "a");
        stage(&mut stmt, 2, "b");
        let err = stmt.execute_batch(&tx).await.unwrap_err();

        match err {
            Error::Internal(message) => {
                assert!(message.contains("1 batch results for 2 items"), "{message}");
            }
            other => panic!("expected an internal error, got {other}"),
        }
        // the aborted run reports nothing for any item
        assert!(stmt
            .batch()
            .items()
            .iter()
            .all(|i| matches!(i.outcome(), BatchOutcome::Pending)));
    }
}

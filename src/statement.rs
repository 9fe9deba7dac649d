//! Statement preparation, execution and result sequencing
//!
//! A [`Statement`] drives one server statement through its lifecycle:
//! prepare, bind, execute, then walk the result sequence (an open cursor, a
//! pending update count, or both). Call-escape text is translated at prepare
//! time; executable procedure calls fetch their singleton OUT row eagerly at
//! execute, while selectable procedures open an ordinary cursor.
//!
//! In auto-commit mode an execution error rolls the ambient transaction back
//! and starts a fresh one before the error returns, so a failed statement
//! never leaves the connection in an indeterminate transaction state.
//!
//! # Example
//!
//! ```rust,ignore
//! use firebird_rs::{Statement, StatementConfig};
//!
//! let mut stmt = Statement::new(transport, catalog, StatementConfig::new());
//! stmt.prepare(&tx, "SELECT id, name FROM employees WHERE dept = ?").await?;
//! stmt.set_value(0, 10.into())?;
//!
//! if stmt.execute(&mut tx).await? {
//!     while stmt.next(&tx).await? {
//!         let row = stmt.current_row().unwrap();
//!         println!("{}: {}", row.get_i64(0).unwrap(), row.get_string(1).unwrap());
//!     }
//! }
//! stmt.close().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::batch::{self, BatchReport, BatchRun};
use crate::call::{CallArg, CallParser, ParsedCall, Selectable, SlotDirection};
use crate::catalog::{CachedCatalog, Catalog};
use crate::config::{FetchDirection, StatementConfig, DEFAULT_FETCH_SIZE};
use crate::cursor::{Cursor, CursorKind, CursorPosition};
use crate::error::{Error, Result, Warning};
use crate::row::{Row, Value};
use crate::updatable::KeySpec;
use crate::wire::{
    guarded, CancelToken, CommitMode, ExecOptions, PreparedInfo, TransactionContext, Transport,
};

/// Firebird SQL data types as this engine models them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// 16-bit integer
    Smallint,
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    Bigint,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
    /// Fixed-point decimal with precision and scale
    Numeric {
        /// Total significant digits
        precision: u8,
        /// Digits right of the decimal point
        scale: u8,
    },
    /// Fixed-length character string
    Char(u32),
    /// Variable-length character string
    Varchar(u32),
    /// Binary or text large object
    Blob,
    /// Boolean
    Boolean,
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Date and time
    Timestamp,
    /// Physical record id pseudo-type
    DbKey,
}

impl SqlType {
    /// Type name as the server spells it
    pub fn name(&self) -> &'static str {
        match self {
            SqlType::Smallint => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::Bigint => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Numeric { .. } => "NUMERIC",
            SqlType::Char(_) => "CHAR",
            SqlType::Varchar(_) => "VARCHAR",
            SqlType::Blob => "BLOB",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::DbKey => "DB_KEY",
        }
    }
}

/// Metadata for one statement parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    /// Declared type
    pub sql_type: SqlType,
    /// Whether NULL is accepted
    pub nullable: bool,
}

/// Metadata for one result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name as the relation defines it
    pub name: String,
    /// Label when the query aliases the column
    pub alias: Option<String>,
    /// Owning relation; None for computed columns
    pub relation: Option<String>,
    /// Declared type
    pub sql_type: SqlType,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Whether the column declares a default
    pub has_default: bool,
}

impl ColumnDescriptor {
    /// Create a descriptor with the given name and type
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            alias: None,
            relation: None,
            sql_type,
            nullable: true,
            has_default: false,
        }
    }

    /// Set the owning relation
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Set the query alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as declaring a default
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// The label row access uses: the alias when present, else the name
    pub fn label(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Check if this is the physical record id pseudo-column
    pub fn is_db_key(&self) -> bool {
        self.name == "DB_KEY" || self.name == "RDB$DB_KEY"
    }
}

/// Lifecycle state of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementState {
    /// No statement text prepared yet
    #[default]
    Unprepared,
    /// Text prepared, ready to execute
    Prepared,
    /// An execution round trip is in flight
    Executing,
    /// The current result is an open cursor
    ResultAvailable,
    /// The current result is an update count
    UpdateCountAvailable,
    /// All results consumed, or the execution failed
    Exhausted,
    /// Closed; only accessors remain legal
    Closed,
}

/// Explicit transition table for the interleaved results of one execution.
///
/// A procedure that both mutates and returns rows yields a cursor first and
/// its update count after; plain statements yield one or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultPhase {
    /// A cursor is the current result; a count may still follow it
    Rows { pending_count: Option<u64> },
    /// An update count is the current result
    Count(u64),
    /// Nothing further
    NoMore,
}

impl ResultPhase {
    /// Consume the current result and move to the next
    fn next(self) -> ResultPhase {
        match self {
            ResultPhase::Rows {
                pending_count: Some(n),
            } => ResultPhase::Count(n),
            ResultPhase::Rows {
                pending_count: None,
            } => ResultPhase::NoMore,
            ResultPhase::Count(_) => ResultPhase::NoMore,
            ResultPhase::NoMore => ResultPhase::NoMore,
        }
    }
}

/// A prepared statement with its bind space, result sequence and cursor.
///
/// All operations take `&mut self`; the caller serializes access per
/// connection. The ambient transaction is passed explicitly into every
/// executing operation.
pub struct Statement {
    transport: Arc<dyn Transport>,
    catalog: Arc<dyn Catalog>,
    cancel: CancelToken,
    config: StatementConfig,
    state: StatementState,
    text: String,
    call: Option<ParsedCall>,
    /// Catalog-resolved selectability, cached for the statement's lifetime
    resolved_selectable: Option<bool>,
    selectable_override: Option<bool>,
    prepared: Option<PreparedInfo>,
    /// Call text last prepared on the server
    rendered: Option<String>,
    params: Vec<Value>,
    directions: Vec<SlotDirection>,
    bound: Vec<bool>,
    /// Bind index of the `? =` return slot, when the call declares one
    return_bind: Option<usize>,
    phase: ResultPhase,
    cursor: Option<Cursor>,
    out_row: Option<Row>,
    warnings: Vec<Warning>,
    batch: BatchRun,
}

impl Statement {
    /// Create a statement over a transport and catalog with the given config
    pub fn new(
        transport: Arc<dyn Transport>,
        catalog: Arc<dyn Catalog>,
        config: StatementConfig,
    ) -> Self {
        let cancel = CancelToken::new(transport.clone());
        let catalog: Arc<dyn Catalog> = Arc::new(CachedCatalog::new(
            catalog,
            config.selectability_cache_size,
        ));
        Self {
            transport,
            catalog,
            cancel,
            config,
            state: StatementState::Unprepared,
            text: String::new(),
            call: None,
            resolved_selectable: None,
            selectable_override: None,
            prepared: None,
            rendered: None,
            params: Vec::new(),
            directions: Vec::new(),
            bound: Vec::new(),
            return_bind: None,
            phase: ResultPhase::NoMore,
            cursor: None,
            out_row: None,
            warnings: Vec::new(),
            batch: BatchRun::new(),
        }
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.state == StatementState::Closed {
            Err(Error::StatementClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_prepared(&self) -> Result<()> {
        self.ensure_not_closed()?;
        if self.state == StatementState::Unprepared {
            return Err(Error::capability("statement is not prepared"));
        }
        Ok(())
    }

    fn cursor_mut(&mut self) -> Result<&mut Cursor> {
        self.cursor
            .as_mut()
            .ok_or_else(|| Error::capability("statement has no open result"))
    }

    /// Close and drop the open cursor, if any
    async fn teardown_results(&mut self) -> Result<()> {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await?;
        }
        Ok(())
    }

    // ===== Prepare and bind =====

    /// Prepare statement text, translating call-escape syntax when present.
    ///
    /// Re-preparing releases the previous server statement first. Enters
    /// the Prepared state with an empty bind space.
    pub async fn prepare(&mut self, tx: &TransactionContext, text: &str) -> Result<()> {
        self.ensure_not_closed()?;
        self.teardown_results().await?;
        if let Some(old) = self.prepared.take() {
            self.transport.release(old.statement_id).await?;
        }
        self.rendered = None;
        self.call = None;
        self.resolved_selectable = None;
        self.out_row = None;
        self.phase = ResultPhase::NoMore;
        self.batch.clear();
        self.text = text.to_string();

        if CallParser::is_call_syntax(text) {
            let call = CallParser::parse(text)?;
            let mut directions = Vec::new();
            let mut return_bind = None;
            for (slot_idx, slot) in call.slots().iter().enumerate() {
                if matches!(slot.arg, CallArg::Placeholder) {
                    if Some(slot_idx) == call.return_slot() {
                        return_bind = Some(directions.len());
                    }
                    directions.push(slot.direction);
                }
            }
            self.params = vec![Value::Null; directions.len()];
            self.bound = vec![false; directions.len()];
            self.directions = directions;
            self.return_bind = return_bind;
            self.call = Some(call);
        } else {
            // plain statements prepare eagerly; calls wait until the
            // selectable/executable rendering is known at execute time
            let prepared = guarded(&self.cancel, self.transport.prepare(tx, text)).await?;
            let n = prepared.params.len();
            self.params = vec![Value::Null; n];
            self.directions = vec![SlotDirection::In; n];
            self.bound = vec![false; n];
            self.return_bind = None;
            self.prepared = Some(prepared);
        }
        self.state = StatementState::Prepared;
        tracing::debug!(call = self.call.is_some(), "statement prepared");
        Ok(())
    }

    /// Bind an input value at a 0-based parameter index.
    ///
    /// Binding a slot previously registered as output makes it InOut.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.ensure_prepared()?;
        if Some(index) == self.return_bind {
            return Err(Error::capability("return slot takes no input value"));
        }
        let Some(slot) = self.params.get_mut(index) else {
            return Err(Error::capability(format!(
                "parameter index {index} out of range for {} parameters",
                self.params.len()
            )));
        };
        *slot = value;
        self.bound[index] = true;
        if self.directions[index] == SlotDirection::Out {
            self.directions[index] = SlotDirection::InOut;
        }
        Ok(())
    }

    /// Reset every bound parameter value to NULL, keeping registrations
    pub fn clear_params(&mut self) {
        for v in &mut self.params {
            *v = Value::Null;
        }
        for b in &mut self.bound {
            *b = false;
        }
    }

    /// Mark a call parameter as producing an output value.
    ///
    /// A slot that also received an input value becomes InOut. Legal only
    /// for call statements.
    pub fn register_out_slot(&mut self, index: usize) -> Result<()> {
        self.ensure_prepared()?;
        if self.call.is_none() {
            return Err(Error::capability(
                "output registration requires call syntax",
            ));
        }
        if index >= self.directions.len() {
            return Err(Error::capability(format!(
                "parameter index {index} out of range for {} parameters",
                self.directions.len()
            )));
        }
        if Some(index) == self.return_bind {
            return Ok(());
        }
        self.directions[index] = if self.bound[index] {
            SlotDirection::InOut
        } else {
            SlotDirection::Out
        };
        Ok(())
    }

    /// Input parameter values in transmission order, skipping the return slot
    fn in_params(&self) -> Vec<Value> {
        self.params
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.return_bind)
            .map(|(_, v)| v.clone())
            .collect()
    }

    // ===== Execute =====

    /// Execute the prepared statement.
    ///
    /// Returns true when the current result is an open cursor, false when
    /// it is an update count. In auto-commit mode an execution error rolls
    /// the ambient transaction back and starts a fresh one before the error
    /// is returned; the error keeps a fragment of the statement text as
    /// context.
    pub async fn execute(&mut self, tx: &mut TransactionContext) -> Result<bool> {
        self.ensure_prepared()?;
        self.teardown_results().await?;
        self.warnings.clear();
        self.out_row = None;
        self.phase = ResultPhase::NoMore;
        self.state = StatementState::Executing;
        match self.execute_inner(tx).await {
            Ok(has_rows) => Ok(has_rows),
            Err(err) => {
                self.state = StatementState::Exhausted;
                self.phase = ResultPhase::NoMore;
                if tx.is_auto_commit() {
                    self.recover_auto_commit(tx).await;
                }
                Err(err.with_context(snippet(&self.text)))
            }
        }
    }

    async fn execute_inner(&mut self, tx: &TransactionContext) -> Result<bool> {
        let selectable = self.ensure_server_prepared(tx).await?;
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(Error::Internal(
                "statement lost its prepared form".to_string(),
            ));
        };
        let stmt = prepared.statement_id;
        let columns = prepared.columns.clone();
        let in_params = self.in_params();
        let opts = ExecOptions {
            timeout: self.config.query_timeout,
        };
        let outcome = guarded(
            &self.cancel,
            self.transport.execute(tx, stmt, &in_params, &opts),
        )
        .await?;
        tracing::debug!(
            has_result_set = outcome.has_result_set,
            update_count = ?outcome.update_count,
            "statement executed"
        );
        if outcome.has_result_set {
            let (cursor, warns) = Cursor::open(
                self.transport.clone(),
                self.catalog.clone(),
                self.cancel.clone(),
                tx,
                stmt,
                columns,
                &self.config,
            )
            .await?;
            self.warnings.extend(warns);
            self.cursor = Some(cursor);
            self.phase = ResultPhase::Rows {
                pending_count: outcome.update_count,
            };
            self.state = StatementState::ResultAvailable;
            Ok(true)
        } else {
            if selectable == Some(false) && !columns.is_empty() {
                // executable procedure: its OUT values arrive as one row
                let chunk = guarded(&self.cancel, self.transport.fetch(tx, stmt, 1)).await?;
                let names: Vec<String> = columns.iter().map(|c| c.label().to_string()).collect();
                self.out_row = chunk
                    .rows
                    .into_iter()
                    .next()
                    .map(|values| Row::with_names(values, names));
            }
            let count = outcome.update_count.unwrap_or(0);
            self.phase = ResultPhase::Count(count);
            self.state = StatementState::UpdateCountAvailable;
            if self.config.close_on_completion {
                self.close().await?;
            }
            Ok(false)
        }
    }

    /// Resolve call rendering and make sure a server prepared form exists.
    ///
    /// Returns the effective selectability for call statements, None for
    /// plain statements.
    async fn ensure_server_prepared(&mut self, tx: &TransactionContext) -> Result<Option<bool>> {
        let Some(call) = self.call.as_ref() else {
            if self.prepared.is_none() {
                return Err(Error::Internal(
                    "plain statement was never prepared".to_string(),
                ));
            }
            return Ok(None);
        };
        let selectable = match self.selectable_override {
            Some(s) => s,
            None => match self.resolved_selectable {
                Some(s) => s,
                None => {
                    let s = match call.selectable() {
                        Selectable::Yes => true,
                        Selectable::No => false,
                        // a catalog that cannot answer means a server too old
                        // to record selectability; those procedures execute
                        Selectable::Unknown => self
                            .catalog
                            .procedure_selectable(&call.lookup_name())
                            .await?
                            .unwrap_or(false),
                    };
                    self.resolved_selectable = Some(s);
                    s
                }
            },
        };
        let text = if selectable {
            call.render_selectable()
        } else {
            call.render_executable()
        };
        if self.rendered.as_deref() != Some(text.as_str()) {
            if let Some(old) = self.prepared.take() {
                self.transport.release(old.statement_id).await?;
            }
            let prepared = guarded(&self.cancel, self.transport.prepare(tx, &text)).await?;
            tracing::trace!(text = %text, "call statement prepared");
            self.prepared = Some(prepared);
            self.rendered = Some(text);
        }
        Ok(Some(selectable))
    }

    /// Roll back and restart the ambient transaction after a failed
    /// execution. Recovery failures become warnings; the original execution
    /// error still reaches the caller.
    async fn recover_auto_commit(&mut self, tx: &mut TransactionContext) {
        if let Err(e) = self.transport.rollback(tx).await {
            tracing::warn!(error = %e, "rollback after failed execution did not complete");
            self.warnings
                .push(Warning::new(format!("rollback after failed execution: {e}")));
            return;
        }
        match self.transport.begin(CommitMode::AutoCommit).await {
            Ok(fresh) => *tx = fresh,
            Err(e) => {
                tracing::warn!(error = %e, "restarting auto-commit transaction failed");
                self.warnings.push(Warning::new(format!(
                    "restarting auto-commit transaction: {e}"
                )));
            }
        }
    }

    // ===== Result sequencing =====

    /// Update count of the current result.
    ///
    /// `None` when the current result is a cursor, or when nothing remains.
    /// Legal in any state, including Closed.
    pub fn update_count(&self) -> Option<u64> {
        match self.phase {
            ResultPhase::Count(n) => Some(n),
            _ => None,
        }
    }

    /// Consume the current result and advance to the next one.
    ///
    /// Closes the open cursor when one is current. Returns whether the new
    /// current result is a cursor.
    pub async fn next_result(&mut self) -> Result<bool> {
        self.ensure_not_closed()?;
        self.teardown_results().await?;
        self.phase = self.phase.next();
        self.state = match self.phase {
            ResultPhase::Rows { .. } => StatementState::ResultAvailable,
            ResultPhase::Count(_) => StatementState::UpdateCountAvailable,
            ResultPhase::NoMore => StatementState::Exhausted,
        };
        if self.state == StatementState::Exhausted && self.config.close_on_completion {
            self.close().await?;
        }
        Ok(matches!(self.phase, ResultPhase::Rows { .. }))
    }

    // ===== Cursor navigation =====

    /// Advance the open cursor one row; returns whether a row is available.
    ///
    /// With `close_on_completion` set, the first exhaustion closes the
    /// statement.
    pub async fn next(&mut self, tx: &TransactionContext) -> Result<bool> {
        let has_row = self.cursor_mut()?.next(tx).await?;
        if !has_row && self.config.close_on_completion {
            tracing::trace!("result exhausted, closing on completion");
            self.close().await?;
        }
        Ok(has_row)
    }

    /// Step the open cursor back one row
    pub async fn previous(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.cursor_mut()?.previous(tx).await
    }

    /// Move to a 1-based absolute position; negative counts from the end
    pub async fn absolute(&mut self, tx: &TransactionContext, n: i64) -> Result<bool> {
        self.cursor_mut()?.absolute(tx, n).await
    }

    /// Move relative to the current position
    pub async fn relative(&mut self, tx: &TransactionContext, n: i64) -> Result<bool> {
        self.cursor_mut()?.relative(tx, n).await
    }

    /// Move to the first row
    pub async fn first(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.cursor_mut()?.first(tx).await
    }

    /// Move to the last row
    pub async fn last(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.cursor_mut()?.last(tx).await
    }

    /// Move before the first row
    pub async fn before_first(&mut self, tx: &TransactionContext) -> Result<()> {
        self.cursor_mut()?.before_first(tx).await
    }

    /// Move after the last row
    pub async fn after_last(&mut self, tx: &TransactionContext) -> Result<()> {
        self.cursor_mut()?.after_last(tx).await
    }

    /// Check if the cursor stands before the first row of a non-empty result
    pub async fn is_before_first(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.cursor_mut()?.is_before_first(tx).await
    }

    /// Check if the cursor stands after the last row of a non-empty result
    pub async fn is_after_last(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.cursor_mut()?.is_after_last(tx).await
    }

    /// Check if the cursor is on the first row
    pub async fn is_first(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.cursor_mut()?.is_first(tx).await
    }

    /// Check if the cursor is on the last row
    pub async fn is_last(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.cursor_mut()?.is_last(tx).await
    }

    /// The row the open cursor is currently on
    pub fn current_row(&self) -> Option<&Row> {
        self.cursor.as_ref().and_then(|c| c.current_row())
    }

    /// Logical cursor position, when a result is open
    pub fn position(&self) -> Option<CursorPosition> {
        self.cursor.as_ref().map(|c| c.position())
    }

    /// Total rows of the open result, once known
    pub fn row_count(&self) -> Option<u64> {
        self.cursor.as_ref().and_then(|c| c.row_count())
    }

    /// Effective traversal strategy of the open cursor
    pub fn cursor_kind(&self) -> Option<CursorKind> {
        self.cursor.as_ref().map(|c| c.kind())
    }

    /// The open cursor, for metadata queries
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    // ===== Positioned mutation =====

    /// Check if the open cursor supports positioned mutations
    pub fn is_updatable(&self) -> bool {
        self.cursor.as_ref().map_or(false, |c| c.is_updatable())
    }

    /// Key columns backing positioned mutations, when updatable
    pub fn key_spec(&self) -> Option<&KeySpec> {
        self.cursor.as_ref().and_then(|c| c.key_spec())
    }

    /// Stage a new value for a column of the current row
    pub fn update_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.cursor_mut()?.update_value(index, value)
    }

    /// Stage a new value addressed by column label
    pub fn update_value_by_name(&mut self, name: &str, value: Value) -> Result<()> {
        self.cursor_mut()?.update_value_by_name(name, value)
    }

    /// Send staged updates as one positioned UPDATE
    pub async fn update_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.cursor_mut()?.update_row(tx).await
    }

    /// Issue a positioned DELETE for the current row
    pub async fn delete_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.cursor_mut()?.delete_row(tx).await
    }

    /// Re-read the current row from the server, discarding staged values
    pub async fn refresh_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.cursor_mut()?.refresh_row(tx).await
    }

    /// Discard staged updates for the current row
    pub fn cancel_row_updates(&mut self) -> Result<()> {
        self.cursor_mut()?.cancel_row_updates()
    }

    /// Enter the insert staging row
    pub fn move_to_insert_row(&mut self) -> Result<()> {
        self.cursor_mut()?.move_to_insert_row()
    }

    /// Leave the insert staging row
    pub fn move_to_current_row(&mut self) -> Result<()> {
        self.cursor_mut()?.move_to_current_row()
    }

    /// Execute the staged INSERT and append the new row to the result
    pub async fn insert_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.cursor_mut()?.insert_row(tx).await
    }

    // ===== Batch =====

    /// Stage the currently bound parameters as one batch item.
    ///
    /// Rejected when the call registers Out or InOut slots; batch items
    /// cannot return values.
    pub fn add_batch(&mut self) -> Result<()> {
        self.ensure_prepared()?;
        if self.directions.iter().any(|d| *d != SlotDirection::In) {
            return Err(Error::capability(
                "batch execution cannot return output values",
            ));
        }
        self.batch.add(self.in_params());
        Ok(())
    }

    /// The staged batch run, inspectable until cleared
    pub fn batch(&self) -> &BatchRun {
        &self.batch
    }

    /// Drop all staged batch items
    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Execute every staged batch item.
    ///
    /// Rejected for statements that produce a result set. Execution
    /// continues past item failures; a run containing any failure returns
    /// [`Error::Batch`] with the full per-item report. The run stays staged
    /// until [`Statement::clear_batch`].
    pub async fn execute_batch(&mut self, tx: &TransactionContext) -> Result<BatchReport> {
        self.ensure_prepared()?;
        self.teardown_results().await?;
        self.warnings.clear();
        self.out_row = None;
        self.phase = ResultPhase::NoMore;
        let selectable = self.ensure_server_prepared(tx).await?;
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(Error::Internal(
                "statement lost its prepared form".to_string(),
            ));
        };
        if prepared.produces_rows || selectable == Some(true) {
            return Err(Error::capability(
                "batch execution requires a statement that produces no result set",
            ));
        }
        let stmt = prepared.statement_id;
        let opts = ExecOptions {
            timeout: self.config.query_timeout,
        };
        let result = batch::execute(
            self.transport.as_ref(),
            &self.cancel,
            tx,
            stmt,
            &mut self.batch,
            &opts,
        )
        .await;
        self.state = StatementState::Prepared;
        result
    }

    // ===== Call output =====

    /// OUT values of the last executable procedure call, as one row
    pub fn out_values(&self) -> Option<&Row> {
        self.out_row.as_ref()
    }

    /// Value of the `? =` return slot, when the call declares one
    pub fn return_value(&self) -> Option<&Value> {
        let call = self.call.as_ref()?;
        if !call.has_return() {
            return None;
        }
        self.out_row.as_ref()?.get(0)
    }

    // ===== Accessors and configuration =====

    /// Current lifecycle state
    pub fn state(&self) -> StatementState {
        self.state
    }

    /// The statement text as given to `prepare`
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Check if the prepared text used call syntax
    pub fn is_call(&self) -> bool {
        self.call.is_some()
    }

    /// The parsed call form, when the text used call syntax
    pub fn parsed_call(&self) -> Option<&ParsedCall> {
        self.call.as_ref()
    }

    /// Size of the bind space (placeholders, excluding literal arguments)
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Column metadata of the prepared projection
    pub fn columns(&self) -> &[ColumnDescriptor] {
        self.prepared
            .as_ref()
            .map(|p| p.columns.as_slice())
            .unwrap_or(&[])
    }

    /// Parameter metadata reported by the server, when prepared
    pub fn param_descriptors(&self) -> &[ParamDescriptor] {
        self.prepared
            .as_ref()
            .map(|p| p.params.as_slice())
            .unwrap_or(&[])
    }

    /// Effective configuration
    pub fn config(&self) -> &StatementConfig {
        &self.config
    }

    /// Fetch size hint for wire fetches; 0 restores the default.
    /// Applies to the open cursor immediately.
    pub fn set_fetch_size(&mut self, fetch_size: u32) {
        self.config.fetch_size = if fetch_size == 0 {
            DEFAULT_FETCH_SIZE
        } else {
            fetch_size
        };
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.set_fetch_size(fetch_size);
        }
    }

    /// Cap the rows any result yields (0 = unlimited); seeds later cursors
    pub fn set_max_rows(&mut self, max_rows: u64) {
        self.config.max_rows = max_rows;
    }

    /// Advisory per-round-trip timeout forwarded to the transport
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.config.query_timeout = timeout;
    }

    /// Close the statement automatically when its last result is exhausted
    pub fn set_close_on_completion(&mut self, on: bool) {
        self.config.close_on_completion = on;
    }

    /// Record the preferred fetch direction for cursors opened later.
    ///
    /// Statement-level bookkeeping only; it never fails, whatever the open
    /// result supports.
    pub fn set_fetch_direction(&mut self, direction: FetchDirection) {
        self.config.fetch_direction = direction;
    }

    /// Set the fetch direction of the open result.
    ///
    /// A forward-only result rejects anything but [`FetchDirection::Forward`].
    pub fn set_cursor_fetch_direction(&mut self, direction: FetchDirection) -> Result<()> {
        self.cursor_mut()?.set_fetch_direction(direction)
    }

    /// Override selectability resolution for call statements.
    ///
    /// `Some(true)` forces the SELECT rendering, `Some(false)` the EXECUTE
    /// PROCEDURE rendering, `None` returns to catalog resolution.
    pub fn set_selectable(&mut self, selectable: Option<bool>) {
        self.selectable_override = selectable;
        self.resolved_selectable = None;
    }

    /// Drain accumulated warnings
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Peek at accumulated warnings without draining
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Token for cancelling an in-flight round trip from another task
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ===== Lifecycle =====

    /// Notify the statement that the ambient transaction committed or
    /// rolled back, whichever statement caused it.
    ///
    /// CloseAtCommit cursors become closed; holdable cursors keep serving
    /// their buffered rows. With `close_on_completion` set, losing the last
    /// open result closes the statement.
    pub async fn transaction_ended(&mut self) -> Result<()> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(());
        };
        cursor.transaction_ended();
        if cursor.is_open() {
            return Ok(());
        }
        self.cursor = None;
        if self.state == StatementState::ResultAvailable {
            self.state = StatementState::Exhausted;
        }
        if self.config.close_on_completion {
            self.close().await?;
        }
        Ok(())
    }

    /// Close the statement and release its server resources. Idempotent.
    ///
    /// The last update count stays readable after closing.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == StatementState::Closed {
            return Ok(());
        }
        self.state = StatementState::Closed;
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await?;
        }
        if let Some(prepared) = self.prepared.take() {
            self.transport.release(prepared.statement_id).await?;
        }
        tracing::trace!("statement closed");
        Ok(())
    }
}

/// Leading characters of the statement text for error context
fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= 60 {
        return trimmed.to_string();
    }
    let mut end = 60;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

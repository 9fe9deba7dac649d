//! Transport boundary for the statement engine
//!
//! The engine drives a remote server exclusively through the [`Transport`]
//! trait: prepare, execute, fetch (sequential and scrolling), batch send and
//! out-of-band cancellation. Implementations own the wire protocol; the
//! engine owns statement and cursor semantics.
//!
//! Transactions are explicit [`TransactionContext`] handles passed into every
//! server call, so auto-commit recovery can swap the context under a live
//! statement without hidden state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::row::Value;
use crate::statement::{ColumnDescriptor, ParamDescriptor};

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Commit after every completed statement; errors roll back and reopen
    AutoCommit,
    /// Caller commits or rolls back explicitly
    Manual,
}

/// Handle for the transaction a statement executes in.
///
/// Carried explicitly on every call that touches the server. The engine
/// replaces the handle wholesale when auto-commit recovery opens a fresh
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionContext {
    id: u64,
    mode: CommitMode,
}

impl TransactionContext {
    /// Create a handle for a server-assigned transaction id
    pub fn new(id: u64, mode: CommitMode) -> Self {
        Self { id, mode }
    }

    /// Server-assigned transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Commit discipline of this transaction
    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    /// Check if this transaction auto-commits
    pub fn is_auto_commit(&self) -> bool {
        self.mode == CommitMode::AutoCommit
    }
}

/// Server-assigned statement handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u32);

impl std::fmt::Display for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

/// Outcome of preparing a statement on the server.
#[derive(Debug, Clone)]
pub struct PreparedInfo {
    /// Handle for subsequent execute and fetch calls
    pub statement_id: StatementId,
    /// Input parameter shape
    pub params: Vec<ParamDescriptor>,
    /// Output column shape; empty for count-only statements
    pub columns: Vec<ColumnDescriptor>,
    /// Whether execution opens a cursor rather than returning a count
    pub produces_rows: bool,
}

/// Per-execution options forwarded to the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Server-side statement timeout, when set
    pub timeout: Option<Duration>,
}

/// What an execution produced.
#[derive(Debug, Clone, Copy)]
pub struct ExecOutcome {
    /// A cursor is now open on the statement
    pub has_result_set: bool,
    /// Rows affected, for statements that report a count
    pub update_count: Option<u64>,
}

/// A block of sequentially fetched rows.
#[derive(Debug, Clone)]
pub struct FetchChunk {
    /// Fetched rows in cursor order
    pub rows: Vec<Vec<Value>>,
    /// The server reported end of cursor with this chunk
    pub at_end: bool,
}

/// Scroll operation for server-side scrollable cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollFetch {
    /// One row forward
    Next,
    /// One row backward
    Prior,
    /// First row of the result
    First,
    /// Last row of the result
    Last,
    /// Absolute 1-based position; negative counts from the end
    Absolute(i64),
    /// Offset from the current position
    Relative(i64),
}

/// Result of one scroll fetch.
///
/// `position` is the server cursor position after the operation: 0 is before
/// the first row and `row_count + 1` is after the last. `row` is `None` when
/// the cursor landed outside the result.
#[derive(Debug, Clone)]
pub struct ScrollChunk {
    /// The row at the new position, if the cursor is on one
    pub row: Option<Vec<Value>>,
    /// Server cursor position after the operation
    pub position: u64,
}

/// Optional protocol features a transport may offer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportCapabilities {
    /// Server-side scrollable cursors (fetch_scroll is usable)
    pub server_scroll: bool,
    /// Single round-trip batch execution (execute_batch is usable)
    pub native_batch: bool,
}

/// Per-item outcome reported by a native batch execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItemResult {
    /// The item executed; rows affected
    Updated(u64),
    /// The item failed; the server continued with the next item
    Failed {
        /// Server error code, when reported
        code: Option<i32>,
        /// Server error text
        message: String,
    },
}

/// Wire operations the statement engine needs from a server connection.
///
/// Implementations are expected to be internally synchronized; the engine
/// calls them from one logical task at a time except for [`Transport::cancel`],
/// which must be deliverable while another call is in flight.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Compile a statement and describe its parameter and column shape
    async fn prepare(&self, tx: &TransactionContext, text: &str) -> Result<PreparedInfo>;

    /// Execute a prepared statement with bound parameter values
    async fn execute(
        &self,
        tx: &TransactionContext,
        stmt: StatementId,
        params: &[Value],
        opts: &ExecOptions,
    ) -> Result<ExecOutcome>;

    /// Fetch up to `max_rows` rows forward from an open cursor
    async fn fetch(
        &self,
        tx: &TransactionContext,
        stmt: StatementId,
        max_rows: usize,
    ) -> Result<FetchChunk>;

    /// Position a server-side scrollable cursor and read one row
    async fn fetch_scroll(
        &self,
        tx: &TransactionContext,
        stmt: StatementId,
        op: ScrollFetch,
    ) -> Result<ScrollChunk> {
        let _ = (tx, stmt, op);
        Err(Error::capability("server-side scrollable fetch not supported"))
    }

    /// Execute one prepared statement against many parameter rows
    async fn execute_batch(
        &self,
        tx: &TransactionContext,
        stmt: StatementId,
        items: &[Vec<Value>],
        opts: &ExecOptions,
    ) -> Result<Vec<BatchItemResult>> {
        let _ = (tx, stmt, items, opts);
        Err(Error::capability("native batch execution not supported"))
    }

    /// Close the open cursor on a statement, keeping the prepared form
    async fn close_cursor(&self, stmt: StatementId) -> Result<()>;

    /// Release a prepared statement on the server
    async fn release(&self, stmt: StatementId) -> Result<()>;

    /// Ask the server to abort the operation currently in flight
    async fn cancel(&self) -> Result<()>;

    /// Open a new transaction
    async fn begin(&self, mode: CommitMode) -> Result<TransactionContext>;

    /// Roll back a transaction
    async fn rollback(&self, tx: &TransactionContext) -> Result<()>;

    /// Optional features this connection offers
    fn capabilities(&self) -> TransportCapabilities;
}

/// Handle for cancelling an in-flight statement operation.
///
/// Cloneable and safe to use from outside the task driving the statement.
/// Cancellation is cooperative: when no operation is in flight the request is
/// a no-op, otherwise the transport-level abort is delivered and the aborted
/// operation surfaces [`Error::Cancelled`].
#[derive(Clone)]
pub struct CancelToken {
    transport: Arc<dyn Transport>,
    in_flight: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .finish()
    }
}

impl CancelToken {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            in_flight: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation of the operation currently in flight, if any
    pub async fn cancel(&self) -> Result<()> {
        if !self.in_flight.load(Ordering::SeqCst) {
            tracing::trace!("cancel requested with no operation in flight, ignoring");
            return Ok(());
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.transport.cancel().await
    }

    fn arm(&self) {
        self.in_flight.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    fn take_cancelled(&self) -> bool {
        self.cancelled.swap(false, Ordering::SeqCst)
    }
}

/// Run one server call under the token, mapping an error after a cancel
/// request to [`Error::Cancelled`].
pub(crate) async fn guarded<T>(
    token: &CancelToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    token.arm();
    let out = fut.await;
    token.disarm();
    let was_cancelled = token.take_cancelled();
    match out {
        Err(_) if was_cancelled => Err(Error::Cancelled),
        other => other,
    }
}

//! Statement configuration
//!
//! Settings that shape how a statement executes and how its result cursor
//! behaves: fetch sizing, row limits, cursor mode and holdability, query
//! timeout. All of them are hints or requests; the engine downgrades
//! transparently where the server lacks a capability.

use std::time::Duration;

/// Default number of rows pulled per fetch round trip
pub const DEFAULT_FETCH_SIZE: u32 = 400;

/// Default capacity of the procedure selectability cache
pub const DEFAULT_SELECTABILITY_CACHE: usize = 64;

/// Requested cursor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorMode {
    /// Rows are read once, front to back
    #[default]
    ForwardOnly,
    /// Random-access navigation over a snapshot of the result
    ScrollInsensitive,
}

/// Whether a cursor survives a transaction boundary on its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Holdability {
    /// Cursor is invalidated when the owning transaction ends
    #[default]
    CloseAtCommit,
    /// Cursor keeps yielding rows across commits triggered on the connection
    HoldOverCommit,
}

/// Requested concurrency for result cursors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Rows cannot be mutated through the cursor
    #[default]
    ReadOnly,
    /// Positioned update/delete/insert through the cursor
    Updatable,
}

/// Fetch direction hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchDirection {
    /// Front to back (the only direction a forward-only cursor accepts)
    #[default]
    Forward,
    /// Back to front
    Reverse,
    /// No declared direction
    Unknown,
}

/// Configuration for a [`Statement`](crate::Statement).
///
/// # Example
///
/// ```rust
/// use firebird_rs::{CursorMode, Holdability, StatementConfig};
///
/// let config = StatementConfig::new()
///     .with_cursor_mode(CursorMode::ScrollInsensitive)
///     .with_holdability(Holdability::HoldOverCommit)
///     .with_fetch_size(100);
/// ```
#[derive(Debug, Clone)]
pub struct StatementConfig {
    /// Rows per fetch round trip (0 = use the default)
    pub fetch_size: u32,
    /// Client-side cap on rows delivered per result (0 = unlimited)
    pub max_rows: u64,
    /// Advisory query timeout forwarded to the transport
    pub query_timeout: Option<Duration>,
    /// Requested cursor mode
    pub cursor_mode: CursorMode,
    /// Requested holdability
    pub holdability: Holdability,
    /// Requested concurrency
    pub concurrency: Concurrency,
    /// Initial fetch direction hint for new cursors
    pub fetch_direction: FetchDirection,
    /// Close the statement once its last result has been consumed
    pub close_on_completion: bool,
    /// Capacity of the shared procedure selectability cache
    pub selectability_cache_size: usize,
}

impl StatementConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fetch size hint
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// Set the client-side row cap
    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Set the advisory query timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Set the cursor mode
    pub fn with_cursor_mode(mut self, mode: CursorMode) -> Self {
        self.cursor_mode = mode;
        self
    }

    /// Set the holdability
    pub fn with_holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = holdability;
        self
    }

    /// Request an updatable cursor
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the initial fetch direction hint
    pub fn with_fetch_direction(mut self, direction: FetchDirection) -> Self {
        self.fetch_direction = direction;
        self
    }

    /// Close the statement once its last result has been consumed
    pub fn with_close_on_completion(mut self) -> Self {
        self.close_on_completion = true;
        self
    }

    /// The fetch size with the zero-means-default rule applied
    pub fn effective_fetch_size(&self) -> u32 {
        if self.fetch_size == 0 {
            DEFAULT_FETCH_SIZE
        } else {
            self.fetch_size
        }
    }
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            max_rows: 0,
            query_timeout: None,
            cursor_mode: CursorMode::default(),
            holdability: Holdability::default(),
            concurrency: Concurrency::default(),
            fetch_direction: FetchDirection::default(),
            close_on_completion: false,
            selectability_cache_size: DEFAULT_SELECTABILITY_CACHE,
        }
    }
}

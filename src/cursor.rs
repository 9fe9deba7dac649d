//! Result cursor engine
//!
//! One [`Cursor`] owns the traversal state of one open result: where the
//! cursor stands, how rows are fetched, and, for updatable cursors, the
//! positioned-mutation machinery.
//!
//! Three storage strategies sit behind one surface, chosen once at open:
//!
//! - forward streaming over chunked wire fetches,
//! - a server-side scrollable cursor, positioned per call,
//! - a client row buffer that materializes the whole result and then
//!   navigates by index arithmetic.
//!
//! A scroll-insensitive request against a server without scrollable cursor
//! support silently falls back to the client buffer; updatable and holdable
//! cursors always use it, because positioned mutations and surviving a
//! commit both need rows the server may no longer be willing to serve.
//!
//! # Example
//!
//! ```rust,ignore
//! use firebird_rs::{CursorMode, StatementConfig};
//!
//! let config = StatementConfig::new().with_cursor_mode(CursorMode::ScrollInsensitive);
//! let mut stmt = conn.statement_with_config(config);
//! stmt.prepare(&tx, "SELECT id, name FROM employees ORDER BY id").await?;
//! stmt.execute(&mut tx).await?;
//!
//! stmt.last(&tx).await?;       // jump to the end
//! stmt.absolute(&tx, 5).await?; // then to row 5
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::{Concurrency, CursorMode, FetchDirection, Holdability, StatementConfig};
use crate::error::{Error, Result, Warning};
use crate::row::{Row, RowBuffer, Value};
use crate::statement::ColumnDescriptor;
use crate::updatable::{KeyDerivation, KeySpec, RowUpdater};
use crate::wire::{
    guarded, CancelToken, FetchChunk, ScrollChunk, ScrollFetch, StatementId, TransactionContext,
    Transport,
};

/// Effective traversal strategy of an open cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Sequential access only; rows stream in fetch-sized chunks
    ForwardOnly,
    /// Scrollable, positioned by the server cursor
    ServerScroll,
    /// Scrollable, emulated over a client row buffer
    EmulatedScroll,
}

/// Logical cursor position.
///
/// Row positions are 1-based; a result with no rows only ever reports
/// `BeforeFirst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPosition {
    /// Before the first row; the starting position
    BeforeFirst,
    /// On the row at this 1-based position
    Row(u64),
    /// Past the last row
    AfterLast,
}

// ===== Storage =====

enum Fetcher {
    Forward(ForwardState),
    Server(ServerState),
    Cached(CachedState),
}

#[derive(Default)]
struct ForwardState {
    pending: VecDeque<Vec<Value>>,
    at_end: bool,
    delivered: u64,
    finished: bool,
}

struct ServerState {
    /// Server cursor position: 0 before first, row_count + 1 after last
    position: u64,
    row_count: Option<u64>,
}

#[derive(Default)]
struct CachedState {
    buffer: RowBuffer,
    /// 0 before first, 1..=len on a row, len+1 after last; stays 0 for an
    /// empty buffer
    position: u64,
    filled: bool,
    poisoned: bool,
}

/// Wire access shared by the storage implementations.
///
/// Owns its transport and cancel handles so a live context never pins the
/// cursor itself.
struct FetchCtx<'a> {
    transport: Arc<dyn Transport>,
    cancel: CancelToken,
    tx: &'a TransactionContext,
    stmt: StatementId,
    fetch_size: u32,
    max_rows: u64,
}

impl FetchCtx<'_> {
    async fn fetch(&self, want: usize) -> Result<FetchChunk> {
        guarded(&self.cancel, self.transport.fetch(self.tx, self.stmt, want)).await
    }

    async fn scroll(&self, op: ScrollFetch) -> Result<ScrollChunk> {
        guarded(
            &self.cancel,
            self.transport.fetch_scroll(self.tx, self.stmt, op),
        )
        .await
    }
}

impl ForwardState {
    /// Pull chunks until a row is pending or the stream ends.
    async fn refill(&mut self, ctx: &FetchCtx<'_>) -> Result<()> {
        while self.pending.is_empty() && !self.at_end {
            let mut want = ctx.fetch_size.max(1) as usize;
            if ctx.max_rows > 0 {
                let pulled = self.delivered + self.pending.len() as u64;
                if pulled >= ctx.max_rows {
                    self.at_end = true;
                    break;
                }
                want = want.min((ctx.max_rows - pulled) as usize);
            }
            let chunk = ctx.fetch(want).await.map_err(|e| {
                let ordinal = self.delivered + self.pending.len() as u64 + 1;
                e.with_context(format!("row {ordinal}"))
            })?;
            self.at_end = chunk.at_end;
            self.pending.extend(chunk.rows);
        }
        Ok(())
    }
}

impl ServerState {
    /// Issue one scroll fetch and fold what it reveals about the row count.
    ///
    /// With a row cap in force the landing is normalized against it: a row
    /// at the cap pins the capped count, and a row past the cap is withheld,
    /// leaving the cursor just after the capped end. The server position and
    /// the mirrored one stay equal throughout.
    async fn scroll(
        &mut self,
        ctx: &FetchCtx<'_>,
        op: ScrollFetch,
    ) -> Result<Option<Vec<Value>>> {
        let chunk = ctx.scroll(op).await?;
        self.position = chunk.position;
        let mut row = chunk.row;
        match (&row, op) {
            (Some(_), ScrollFetch::Last) => self.row_count = Some(chunk.position),
            (None, _) if chunk.position > 0 => self.row_count = Some(chunk.position - 1),
            (None, ScrollFetch::Last | ScrollFetch::First | ScrollFetch::Next) => {
                self.row_count = Some(0)
            }
            _ => {}
        }
        let cap = ctx.max_rows;
        if cap > 0 {
            if row.is_some() && chunk.position >= cap {
                // a row at or past the cap proves the capped result ends there
                self.row_count = Some(cap);
                if chunk.position > cap {
                    row = None;
                }
            }
            if matches!(self.row_count, Some(c) if c > cap) {
                self.row_count = Some(cap);
            }
        }
        Ok(row)
    }

    /// Position the cursor through one scroll op, honoring the row cap.
    ///
    /// End-relative requests resolve against the capped count, and requests
    /// aiming past the cap land just after it instead, so the server is
    /// never walked beyond the first out-of-cap row.
    async fn navigate(
        &mut self,
        ctx: &FetchCtx<'_>,
        op: ScrollFetch,
    ) -> Result<Option<Vec<Value>>> {
        let cap = ctx.max_rows;
        if cap == 0 {
            return self.scroll(ctx, op).await;
        }
        let op = match op {
            ScrollFetch::Last => {
                let count = self.capped_count(ctx).await?;
                if count == 0 {
                    return Ok(None);
                }
                ScrollFetch::Absolute(count as i64)
            }
            ScrollFetch::Absolute(n) if n < 0 => {
                let count = self.capped_count(ctx).await?;
                ScrollFetch::Absolute((count as i64 + n + 1).max(0))
            }
            ScrollFetch::Absolute(n) if n > cap as i64 => ScrollFetch::Absolute(cap as i64 + 1),
            ScrollFetch::Relative(d) => {
                if self.position as i64 + d > cap as i64 {
                    ScrollFetch::Absolute(cap as i64 + 1)
                } else {
                    op
                }
            }
            other => other,
        };
        self.scroll(ctx, op).await
    }

    /// Count of the capped result, learned with one fetch at the cap when
    /// still unknown.
    ///
    /// The lookup moves the cursor; callers position it again afterwards.
    async fn capped_count(&mut self, ctx: &FetchCtx<'_>) -> Result<u64> {
        if self.row_count.is_none() {
            self.scroll(ctx, ScrollFetch::Absolute(ctx.max_rows as i64))
                .await?;
        }
        Ok(self.row_count.unwrap_or(0))
    }
}

impl CachedState {
    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Materialize the remaining rows, once. A failed drain empties the
    /// buffer and abandons the cursor rather than leaving half a result.
    async fn ensure_filled(&mut self, ctx: &FetchCtx<'_>) -> Result<()> {
        if self.poisoned {
            return Err(Error::execution("row prefetch failed; cursor abandoned"));
        }
        if self.filled {
            return Ok(());
        }
        match self.drain(ctx).await {
            Ok(()) => {
                self.filled = true;
                tracing::trace!(rows = self.buffer.len(), "result materialized in row buffer");
                if let Err(e) = ctx.transport.close_cursor(ctx.stmt).await {
                    tracing::warn!(error = %e, "closing drained server cursor failed");
                }
                Ok(())
            }
            Err(e) => {
                let ordinal = self.buffer.len() as u64 + 1;
                self.buffer.clear();
                self.position = 0;
                self.poisoned = true;
                Err(e.with_context(format!("row {ordinal}")))
            }
        }
    }

    async fn drain(&mut self, ctx: &FetchCtx<'_>) -> Result<()> {
        loop {
            let have = self.buffer.len() as u64;
            let mut want = ctx.fetch_size.max(1) as usize;
            if ctx.max_rows > 0 {
                if have >= ctx.max_rows {
                    return Ok(());
                }
                want = want.min((ctx.max_rows - have) as usize);
            }
            let chunk = ctx.fetch(want).await?;
            for values in chunk.rows {
                self.buffer.push(values);
            }
            if chunk.at_end {
                return Ok(());
            }
        }
    }

    /// 1-based absolute move; negative counts from the end.
    fn move_absolute(&mut self, n: i64) -> bool {
        let len = self.len() as i64;
        if len == 0 || n == 0 {
            self.position = 0;
            return false;
        }
        let target = if n > 0 { n } else { len + n + 1 };
        self.settle(target, len)
    }

    /// Offset move from the current position.
    fn move_relative(&mut self, n: i64) -> bool {
        let len = self.len() as i64;
        if len == 0 {
            self.position = 0;
            return false;
        }
        let target = self.position as i64 + n;
        self.settle(target, len)
    }

    fn settle(&mut self, target: i64, len: i64) -> bool {
        if target < 1 {
            self.position = 0;
            false
        } else if target > len {
            self.position = (len + 1) as u64;
            false
        } else {
            self.position = target as u64;
            true
        }
    }
}

fn make_row(names: &[String], values: &[Value]) -> Row {
    Row::with_names(values.to_vec(), names.to_vec())
}

/// Learn the row count of a server cursor by stepping onto its end, then
/// restore the prior position. With a row cap in force the lookup aims at
/// the cap instead of the server's last row.
async fn ensure_server_count(
    state: &mut ServerState,
    ctx: &FetchCtx<'_>,
    current: &mut Option<Row>,
    names: &[String],
) -> Result<()> {
    if state.row_count.is_some() {
        return Ok(());
    }
    let saved = state.position;
    let was_on_row = current.is_some();
    let target = if ctx.max_rows > 0 {
        ScrollFetch::Absolute(ctx.max_rows as i64)
    } else {
        ScrollFetch::Last
    };
    let landed = state.scroll(ctx, target).await?;
    if was_on_row {
        let row = state
            .scroll(ctx, ScrollFetch::Absolute(saved as i64))
            .await?;
        *current = row.map(|v| make_row(names, &v));
    } else if saved == 0 {
        // was before first; walk back off the front unless the result is empty
        if matches!(state.row_count, Some(c) if c > 0) {
            state.scroll(ctx, ScrollFetch::First).await?;
            state.scroll(ctx, ScrollFetch::Prior).await?;
        }
        *current = None;
    } else {
        // was after last; when the lookup landed on a row, step off the end
        if landed.is_some() {
            state.scroll(ctx, ScrollFetch::Next).await?;
        }
        *current = None;
    }
    Ok(())
}

// ===== Cursor =====

/// Traversal state over one open result.
///
/// Navigation is 1-based: `absolute(1)` is the first row, `absolute(-1)` the
/// last. Column access on the current row is 0-based through [`Row`].
pub struct Cursor {
    transport: Arc<dyn Transport>,
    cancel: CancelToken,
    stmt: StatementId,
    columns: Vec<ColumnDescriptor>,
    names: Vec<String>,
    kind: CursorKind,
    scrollable: bool,
    holdability: Holdability,
    fetch_size: u32,
    max_rows: u64,
    fetch_direction: FetchDirection,
    fetcher: Fetcher,
    updater: Option<RowUpdater>,
    current: Option<Row>,
    open: bool,
}

impl Cursor {
    /// Open a cursor over a just-executed statement.
    ///
    /// Chooses the storage strategy, derives the update key for updatable
    /// requests and eagerly materializes holdable results. Returns the
    /// cursor plus any non-fatal warnings, such as an updatable request
    /// downgraded to read-only.
    pub(crate) async fn open(
        transport: Arc<dyn Transport>,
        catalog: Arc<dyn Catalog>,
        cancel: CancelToken,
        tx: &TransactionContext,
        stmt: StatementId,
        columns: Vec<ColumnDescriptor>,
        config: &StatementConfig,
    ) -> Result<(Self, Vec<Warning>)> {
        let mut warnings = Vec::new();
        let caps = transport.capabilities();
        let scrollable = config.cursor_mode == CursorMode::ScrollInsensitive;
        let holdable = config.holdability == Holdability::HoldOverCommit;

        let mut updater = None;
        if config.concurrency == Concurrency::Updatable {
            let derived =
                RowUpdater::derive(transport.clone(), catalog.as_ref(), cancel.clone(), &columns)
                    .await?;
            match derived {
                KeyDerivation::Updatable(u) => updater = Some(u),
                KeyDerivation::ReadOnly(warning) => {
                    tracing::warn!(reason = %warning.message, "updatable cursor downgraded to read-only");
                    warnings.push(warning);
                }
            }
        }

        let buffered = updater.is_some() || holdable;
        let fetcher = if buffered {
            if scrollable && caps.server_scroll {
                tracing::trace!("buffering rows client-side instead of using server scroll");
            }
            Fetcher::Cached(CachedState::default())
        } else if scrollable {
            if caps.server_scroll {
                Fetcher::Server(ServerState {
                    position: 0,
                    row_count: None,
                })
            } else {
                tracing::warn!("server lacks scrollable cursors, emulating client-side");
                Fetcher::Cached(CachedState::default())
            }
        } else {
            Fetcher::Forward(ForwardState::default())
        };

        let kind = match &fetcher {
            Fetcher::Forward(_) => CursorKind::ForwardOnly,
            Fetcher::Server(_) => CursorKind::ServerScroll,
            Fetcher::Cached(_) if scrollable => CursorKind::EmulatedScroll,
            Fetcher::Cached(_) => CursorKind::ForwardOnly,
        };

        let names = columns.iter().map(|c| c.label().to_string()).collect();
        let mut cursor = Self {
            transport,
            cancel,
            stmt,
            columns,
            names,
            kind,
            scrollable,
            holdability: config.holdability,
            fetch_size: config.effective_fetch_size(),
            max_rows: config.max_rows,
            fetch_direction: config.fetch_direction,
            fetcher,
            updater,
            current: None,
            open: true,
        };

        // a holdable result must be in client memory before any commit can
        // invalidate the server cursor
        if holdable {
            let ctx = cursor.fetch_ctx(tx);
            if let Fetcher::Cached(state) = &mut cursor.fetcher {
                state.ensure_filled(&ctx).await?;
            }
        }

        Ok((cursor, warnings))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::CursorClosed)
        }
    }

    fn ensure_scrollable(&self) -> Result<()> {
        if self.scrollable {
            Ok(())
        } else {
            Err(Error::capability("cursor is forward-only"))
        }
    }

    fn ensure_off_insert_row(&self) -> Result<()> {
        match &self.updater {
            Some(u) if u.on_insert_row() => {
                Err(Error::capability("cursor is positioned on the insert row"))
            }
            _ => Ok(()),
        }
    }

    fn fetch_ctx<'a>(&self, tx: &'a TransactionContext) -> FetchCtx<'a> {
        FetchCtx {
            transport: self.transport.clone(),
            cancel: self.cancel.clone(),
            tx,
            stmt: self.stmt,
            fetch_size: self.fetch_size,
            max_rows: self.max_rows,
        }
    }

    fn after_move(&mut self) {
        if let Some(updater) = &mut self.updater {
            updater.position_changed(self.current.as_ref().map(|r| r.values()));
        }
    }

    /// Effective traversal strategy
    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    /// Check if the cursor is still open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Check if positioned mutations are available
    pub fn is_updatable(&self) -> bool {
        self.updater.is_some()
    }

    /// Whether the cursor survives a commit on its connection
    pub fn holdability(&self) -> Holdability {
        self.holdability
    }

    /// Key columns backing positioned mutations, when updatable
    pub fn key_spec(&self) -> Option<&KeySpec> {
        self.updater.as_ref().map(|u| u.key_spec())
    }

    /// Column shape of the result
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// The row the cursor is currently on, if any.
    ///
    /// On the insert row this shows the staged insert values.
    pub fn current_row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Logical position of the cursor
    pub fn position(&self) -> CursorPosition {
        match &self.fetcher {
            Fetcher::Forward(s) => {
                if self.current.is_some() {
                    CursorPosition::Row(s.delivered)
                } else if s.finished && s.delivered > 0 {
                    CursorPosition::AfterLast
                } else {
                    CursorPosition::BeforeFirst
                }
            }
            Fetcher::Server(s) => {
                if self.current.is_some() {
                    CursorPosition::Row(s.position)
                } else if s.position > 0 && !matches!(s.row_count, Some(0)) {
                    CursorPosition::AfterLast
                } else {
                    CursorPosition::BeforeFirst
                }
            }
            Fetcher::Cached(s) => {
                let len = s.len();
                if s.position == 0 {
                    CursorPosition::BeforeFirst
                } else if s.position <= len {
                    CursorPosition::Row(s.position)
                } else {
                    CursorPosition::AfterLast
                }
            }
        }
    }

    /// Total rows in the result, once known
    pub fn row_count(&self) -> Option<u64> {
        match &self.fetcher {
            Fetcher::Forward(s) => (s.at_end && s.pending.is_empty()).then_some(s.delivered),
            Fetcher::Server(s) => s.row_count,
            Fetcher::Cached(s) => s.filled.then(|| s.len()),
        }
    }

    /// Fetch size hint
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Adjust the fetch size hint for subsequent wire fetches
    pub fn set_fetch_size(&mut self, fetch_size: u32) {
        self.fetch_size = if fetch_size == 0 {
            crate::config::DEFAULT_FETCH_SIZE
        } else {
            fetch_size
        };
    }

    /// Fetch direction hint
    pub fn fetch_direction(&self) -> FetchDirection {
        self.fetch_direction
    }

    /// Set the fetch direction hint.
    ///
    /// Forward-only cursors accept only [`FetchDirection::Forward`].
    pub fn set_fetch_direction(&mut self, direction: FetchDirection) -> Result<()> {
        if !self.scrollable && direction != FetchDirection::Forward {
            return Err(Error::capability(
                "fetch direction on a forward-only cursor must be forward",
            ));
        }
        self.fetch_direction = direction;
        Ok(())
    }

    // ===== Navigation =====

    /// Advance one row; returns whether the cursor is now on a row.
    ///
    /// Reaching the end does not close the cursor; further calls keep
    /// returning `false` without error.
    pub async fn next(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        self.ensure_off_insert_row()?;
        let ctx = self.fetch_ctx(tx);
        let has_row = match &mut self.fetcher {
            Fetcher::Forward(state) => {
                state.refill(&ctx).await?;
                match state.pending.pop_front() {
                    Some(values) => {
                        state.delivered += 1;
                        self.current = Some(make_row(&self.names, &values));
                        true
                    }
                    None => {
                        state.finished = true;
                        self.current = None;
                        false
                    }
                }
            }
            Fetcher::Server(state) => {
                let past_end = self.current.is_none()
                    && state.position > 0
                    && matches!(state.row_count, Some(c) if state.position > c);
                if past_end {
                    false
                } else {
                    let row = state.navigate(&ctx, ScrollFetch::Next).await?;
                    self.current = row.map(|v| make_row(&self.names, &v));
                    self.current.is_some()
                }
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                let has = state.move_relative(1);
                self.current = state
                    .buffer
                    .get(state.position as usize)
                    .map(|r| make_row(&self.names, &r.values));
                has
            }
        };
        self.after_move();
        Ok(has_row)
    }

    /// Step back one row
    pub async fn previous(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        self.ensure_scrollable()?;
        self.ensure_off_insert_row()?;
        let ctx = self.fetch_ctx(tx);
        let has_row = match &mut self.fetcher {
            Fetcher::Forward(_) => false,
            Fetcher::Server(state) => {
                if state.position == 0 {
                    false
                } else {
                    let row = state.navigate(&ctx, ScrollFetch::Prior).await?;
                    self.current = row.map(|v| make_row(&self.names, &v));
                    self.current.is_some()
                }
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                let has = state.move_relative(-1);
                self.current = state
                    .buffer
                    .get(state.position as usize)
                    .map(|r| make_row(&self.names, &r.values));
                has
            }
        };
        self.after_move();
        Ok(has_row)
    }

    /// Move to a 1-based absolute position; negative is from the end.
    ///
    /// Out-of-range targets settle before the first or after the last row
    /// and return `false`.
    pub async fn absolute(&mut self, tx: &TransactionContext, n: i64) -> Result<bool> {
        self.ensure_open()?;
        self.ensure_scrollable()?;
        self.ensure_off_insert_row()?;
        let ctx = self.fetch_ctx(tx);
        let has_row = match &mut self.fetcher {
            Fetcher::Forward(_) => false,
            Fetcher::Server(state) => {
                let row = state.navigate(&ctx, ScrollFetch::Absolute(n)).await?;
                self.current = row.map(|v| make_row(&self.names, &v));
                self.current.is_some()
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                let has = state.move_absolute(n);
                self.current = state
                    .buffer
                    .get(state.position as usize)
                    .map(|r| make_row(&self.names, &r.values));
                has
            }
        };
        self.after_move();
        Ok(has_row)
    }

    /// Move relative to the current position
    pub async fn relative(&mut self, tx: &TransactionContext, n: i64) -> Result<bool> {
        self.ensure_open()?;
        self.ensure_scrollable()?;
        self.ensure_off_insert_row()?;
        if n == 0 {
            return Ok(self.current.is_some());
        }
        let ctx = self.fetch_ctx(tx);
        let has_row = match &mut self.fetcher {
            Fetcher::Forward(_) => false,
            Fetcher::Server(state) => {
                let row = state.navigate(&ctx, ScrollFetch::Relative(n)).await?;
                self.current = row.map(|v| make_row(&self.names, &v));
                self.current.is_some()
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                let has = state.move_relative(n);
                self.current = state
                    .buffer
                    .get(state.position as usize)
                    .map(|r| make_row(&self.names, &r.values));
                has
            }
        };
        self.after_move();
        Ok(has_row)
    }

    /// Move to the first row
    pub async fn first(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        self.ensure_scrollable()?;
        self.ensure_off_insert_row()?;
        let ctx = self.fetch_ctx(tx);
        let has_row = match &mut self.fetcher {
            Fetcher::Forward(_) => false,
            Fetcher::Server(state) => {
                let row = state.navigate(&ctx, ScrollFetch::First).await?;
                self.current = row.map(|v| make_row(&self.names, &v));
                self.current.is_some()
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                let has = state.move_absolute(1);
                self.current = state
                    .buffer
                    .get(state.position as usize)
                    .map(|r| make_row(&self.names, &r.values));
                has
            }
        };
        self.after_move();
        Ok(has_row)
    }

    /// Move to the last row
    pub async fn last(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        self.ensure_scrollable()?;
        self.ensure_off_insert_row()?;
        let ctx = self.fetch_ctx(tx);
        let has_row = match &mut self.fetcher {
            Fetcher::Forward(_) => false,
            Fetcher::Server(state) => {
                let row = state.navigate(&ctx, ScrollFetch::Last).await?;
                self.current = row.map(|v| make_row(&self.names, &v));
                self.current.is_some()
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                let has = state.move_absolute(-1);
                self.current = state
                    .buffer
                    .get(state.position as usize)
                    .map(|r| make_row(&self.names, &r.values));
                has
            }
        };
        self.after_move();
        Ok(has_row)
    }

    /// Move before the first row
    pub async fn before_first(&mut self, tx: &TransactionContext) -> Result<()> {
        self.ensure_open()?;
        self.ensure_scrollable()?;
        self.ensure_off_insert_row()?;
        let ctx = self.fetch_ctx(tx);
        match &mut self.fetcher {
            Fetcher::Forward(_) => {}
            Fetcher::Server(state) => {
                if state.position != 0 {
                    let row = state.navigate(&ctx, ScrollFetch::First).await?;
                    if row.is_some() {
                        state.navigate(&ctx, ScrollFetch::Prior).await?;
                    }
                }
                self.current = None;
            }
            Fetcher::Cached(state) => {
                // standing before the first row needs no prefetch
                state.position = 0;
                self.current = None;
            }
        }
        self.after_move();
        Ok(())
    }

    /// Move after the last row; no effect on an empty result
    pub async fn after_last(&mut self, tx: &TransactionContext) -> Result<()> {
        self.ensure_open()?;
        self.ensure_scrollable()?;
        self.ensure_off_insert_row()?;
        let ctx = self.fetch_ctx(tx);
        match &mut self.fetcher {
            Fetcher::Forward(_) => {}
            Fetcher::Server(state) => {
                let already = match state.row_count {
                    Some(0) => true,
                    Some(count) => self.current.is_none() && state.position == count + 1,
                    None => false,
                };
                if !already {
                    let row = state.navigate(&ctx, ScrollFetch::Last).await?;
                    if row.is_some() {
                        state.navigate(&ctx, ScrollFetch::Next).await?;
                    }
                }
                self.current = None;
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                state.position = if state.len() > 0 { state.len() + 1 } else { 0 };
                self.current = None;
            }
        }
        self.after_move();
        Ok(())
    }

    // ===== Position predicates =====
    //
    // An empty result reports false for every one of these, before and
    // after a failed next(). Some need look-ahead, so they take the
    // transaction like navigation does.

    /// Check if the cursor stands before the first row of a non-empty result
    pub async fn is_before_first(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        let ctx = self.fetch_ctx(tx);
        match &mut self.fetcher {
            Fetcher::Forward(state) => {
                if state.delivered > 0 || state.finished {
                    return Ok(false);
                }
                state.refill(&ctx).await?;
                Ok(!state.pending.is_empty())
            }
            Fetcher::Server(state) => {
                if state.position != 0 {
                    return Ok(false);
                }
                ensure_server_count(state, &ctx, &mut self.current, &self.names).await?;
                Ok(matches!(state.row_count, Some(c) if c > 0) && state.position == 0)
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                Ok(state.len() > 0 && state.position == 0)
            }
        }
    }

    /// Check if the cursor stands after the last row of a non-empty result
    pub async fn is_after_last(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        let ctx = self.fetch_ctx(tx);
        match &mut self.fetcher {
            Fetcher::Forward(state) => Ok(state.finished && state.delivered > 0),
            Fetcher::Server(state) => {
                // any scroll that lands past row zero on an empty result also
                // reveals the zero count, so the emptiness check is reliable
                let empty = matches!(state.row_count, Some(0));
                Ok(!empty && self.current.is_none() && state.position > 0)
            }
            Fetcher::Cached(state) => {
                state.ensure_filled(&ctx).await?;
                Ok(state.len() > 0 && state.position == state.len() + 1)
            }
        }
    }

    /// Check if the cursor is on the first row
    pub async fn is_first(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        let _ = tx;
        Ok(match &self.fetcher {
            Fetcher::Forward(s) => self.current.is_some() && s.delivered == 1,
            Fetcher::Server(s) => self.current.is_some() && s.position == 1,
            Fetcher::Cached(s) => s.position == 1,
        })
    }

    /// Check if the cursor is on the last row
    pub async fn is_last(&mut self, tx: &TransactionContext) -> Result<bool> {
        self.ensure_open()?;
        let ctx = self.fetch_ctx(tx);
        match &mut self.fetcher {
            Fetcher::Forward(state) => {
                if self.current.is_none() {
                    return Ok(false);
                }
                state.refill(&ctx).await?;
                Ok(state.pending.is_empty() && state.at_end)
            }
            Fetcher::Server(state) => {
                if self.current.is_none() {
                    return Ok(false);
                }
                ensure_server_count(state, &ctx, &mut self.current, &self.names).await?;
                Ok(matches!(state.row_count, Some(c) if c == state.position))
            }
            Fetcher::Cached(state) => {
                if state.position == 0 {
                    return Ok(false);
                }
                state.ensure_filled(&ctx).await?;
                Ok(state.len() > 0 && state.position == state.len())
            }
        }
    }

    // ===== Positioned mutation =====

    /// Stage a new value for a column of the current row (or the insert
    /// row). Staged values are not sent until [`Cursor::update_row`] or
    /// [`Cursor::insert_row`].
    pub fn update_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        if updater.on_insert_row() {
            updater.stage_insert(index, value)?;
            let staged = updater.insert_values();
            self.current = Some(make_row(&self.names, &staged));
            return Ok(());
        }
        let Fetcher::Cached(state) = &self.fetcher else {
            return Err(Error::Internal(
                "updatable cursor without row buffer".to_string(),
            ));
        };
        let row = state
            .buffer
            .get(state.position as usize)
            .ok_or_else(|| Error::capability("cursor is not positioned on a row"))?;
        if row.deleted {
            return Err(Error::capability("current row is deleted"));
        }
        updater.stage(index, value)
    }

    /// Stage a new value addressed by column label
    pub fn update_value_by_name(&mut self, name: &str, value: Value) -> Result<()> {
        let index = self
            .names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::capability(format!("no column labeled '{name}'")))?;
        self.update_value(index, value)
    }

    /// Send staged updates as one positioned UPDATE keyed on the values the
    /// row had when it was fetched. The in-memory row reflects the new
    /// values immediately, without a re-fetch.
    pub async fn update_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        if updater.on_insert_row() {
            return Err(Error::capability("cursor is positioned on the insert row"));
        }
        let Fetcher::Cached(state) = &mut self.fetcher else {
            return Err(Error::Internal(
                "updatable cursor without row buffer".to_string(),
            ));
        };
        let row = state
            .buffer
            .get_mut(state.position as usize)
            .ok_or_else(|| Error::capability("cursor is not positioned on a row"))?;
        if row.deleted {
            return Err(Error::capability("current row is deleted"));
        }
        updater.update_row(tx, row).await?;
        self.current = Some(make_row(&self.names, &row.values));
        Ok(())
    }

    /// Issue a positioned DELETE for the current row.
    ///
    /// The row keeps its slot in the buffer with nulled values so sibling
    /// positions stay stable; it is flagged deleted.
    pub async fn delete_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        if updater.on_insert_row() {
            return Err(Error::capability("cursor is positioned on the insert row"));
        }
        let Fetcher::Cached(state) = &mut self.fetcher else {
            return Err(Error::Internal(
                "updatable cursor without row buffer".to_string(),
            ));
        };
        let row = state
            .buffer
            .get_mut(state.position as usize)
            .ok_or_else(|| Error::capability("cursor is not positioned on a row"))?;
        if row.deleted {
            return Err(Error::capability("current row is deleted"));
        }
        updater.delete_row(tx, row).await?;
        self.current = Some(make_row(&self.names, &row.values));
        Ok(())
    }

    /// Re-read the current row from the server by key, discarding staged
    /// values. Makes server-computed defaults and trigger effects visible.
    pub async fn refresh_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        if updater.on_insert_row() {
            return Err(Error::capability("cursor is positioned on the insert row"));
        }
        let Fetcher::Cached(state) = &mut self.fetcher else {
            return Err(Error::Internal(
                "updatable cursor without row buffer".to_string(),
            ));
        };
        let row = state
            .buffer
            .get_mut(state.position as usize)
            .ok_or_else(|| Error::capability("cursor is not positioned on a row"))?;
        if row.deleted {
            return Err(Error::capability("current row is deleted"));
        }
        updater.refresh_row(tx, row).await?;
        self.current = Some(make_row(&self.names, &row.values));
        Ok(())
    }

    /// Discard staged updates for the current row
    pub fn cancel_row_updates(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        if updater.on_insert_row() {
            return Err(Error::capability("cursor is positioned on the insert row"));
        }
        updater.clear_staged();
        Ok(())
    }

    /// Enter the insert staging row
    pub fn move_to_insert_row(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        updater.move_to_insert_row();
        let staged = updater.insert_values();
        self.current = Some(make_row(&self.names, &staged));
        Ok(())
    }

    /// Leave the insert staging row and return to the remembered position
    pub fn move_to_current_row(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        updater.move_to_current_row();
        let Fetcher::Cached(state) = &self.fetcher else {
            return Err(Error::Internal(
                "updatable cursor without row buffer".to_string(),
            ));
        };
        self.current = state
            .buffer
            .get(state.position as usize)
            .map(|r| make_row(&self.names, &r.values));
        Ok(())
    }

    /// Execute the staged INSERT and append the new row at the logical end
    /// of the result, where `last()` and `absolute(-1)` can reach it.
    pub async fn insert_row(&mut self, tx: &TransactionContext) -> Result<()> {
        self.ensure_open()?;
        let Some(updater) = self.updater.as_mut() else {
            return Err(Error::capability("cursor is read-only"));
        };
        if !updater.on_insert_row() {
            return Err(Error::capability("cursor is not on the insert row"));
        }
        let values = updater.insert_row(tx).await?;
        let Fetcher::Cached(state) = &mut self.fetcher else {
            return Err(Error::Internal(
                "updatable cursor without row buffer".to_string(),
            ));
        };
        state.buffer.push_inserted(values);
        let staged = updater.insert_values();
        self.current = Some(make_row(&self.names, &staged));
        Ok(())
    }

    // ===== Lifecycle =====

    /// Close the cursor. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.current = None;
        let server_open = match &self.fetcher {
            // drained cursors were already closed on the server
            Fetcher::Cached(state) => !state.filled,
            _ => true,
        };
        if server_open {
            self.transport.close_cursor(self.stmt).await?;
        }
        Ok(())
    }

    /// React to the owning transaction ending.
    ///
    /// Hold-over-commit cursors keep serving their buffered rows; everything
    /// else becomes closed without a server round trip, because the server
    /// cursor died with the transaction.
    pub(crate) fn transaction_ended(&mut self) {
        if self.holdability == Holdability::HoldOverCommit {
            return;
        }
        if self.open {
            tracing::trace!("cursor invalidated by transaction end");
        }
        self.open = false;
        self.current = None;
    }
}

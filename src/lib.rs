#![warn(missing_docs)]

//! # firebird-rs
//!
//! A statement execution and result-set engine for Firebird databases,
//! written in pure Rust on top of a pluggable wire transport.
//!
//! This crate implements the client-side statement machinery of the Firebird
//! protocol family: prepared statements with positional binds, procedure call
//! translation, scrollable and updatable cursors, and batched execution. The
//! wire protocol itself lives behind the [`Transport`] trait so the engine
//! can drive any Firebird-speaking connection.
//!
//! ## Features
//!
//! - **Async/await** - Built on Tokio for modern async applications
//! - **Call escape translation** - `{call proc(?)}` and `{? = call fn(?)}`
//!   rendered to `EXECUTE PROCEDURE` or `SELECT` per procedure selectability
//! - **Scrollable cursors** - Server-side where the protocol offers them,
//!   transparently emulated with a client buffer elsewhere
//! - **Updatable results** - Positioned UPDATE, DELETE, INSERT and refresh
//!   keyed off the primary key or record id
//! - **Batch execution** - Single round trip where the server supports it,
//!   with per-item outcomes either way
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use firebird_rs::{Catalog, Statement, StatementConfig, TransactionContext, Transport};
//!
//! # async fn example(
//! #     transport: Arc<dyn Transport>,
//! #     catalog: Arc<dyn Catalog>,
//! #     mut tx: TransactionContext,
//! # ) -> firebird_rs::Result<()> {
//! let mut stmt = Statement::new(transport, catalog, StatementConfig::new());
//! stmt.prepare(&tx, "SELECT emp_no, full_name FROM employee WHERE dept_no = ?").await?;
//! stmt.set_value(0, 10.into())?;
//!
//! if stmt.execute(&mut tx).await? {
//!     while stmt.next(&tx).await? {
//!         let row = stmt.current_row().unwrap();
//!         let name = row.get_by_name("full_name").and_then(|v| v.as_str()).unwrap_or("");
//!         println!("{name}");
//!     }
//! }
//! stmt.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Procedure Calls
//!
//! Call-escape text is parsed at prepare time and rendered for the server at
//! execute time. Selectable procedures run as `SELECT * FROM proc(...)` and
//! open a cursor; executable procedures run as `EXECUTE PROCEDURE` and expose
//! their OUT values as a single row.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use firebird_rs::{Catalog, Statement, StatementConfig, TransactionContext, Transport};
//! # async fn example(
//! #     transport: Arc<dyn Transport>,
//! #     catalog: Arc<dyn Catalog>,
//! #     mut tx: TransactionContext,
//! # ) -> firebird_rs::Result<()> {
//! let mut stmt = Statement::new(transport, catalog, StatementConfig::new());
//! stmt.prepare(&tx, "{call dept_budget(?, ?)}").await?;
//! stmt.set_value(0, "600".into())?;
//! stmt.register_out_slot(1)?;
//! stmt.execute(&mut tx).await?;
//!
//! if let Some(out) = stmt.out_values() {
//!     println!("budget: {:?}", out.get(0));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Scrollable and Updatable Results
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use firebird_rs::{
//! #     Catalog, Concurrency, CursorMode, Statement, StatementConfig, TransactionContext,
//! #     Transport,
//! # };
//! # async fn example(
//! #     transport: Arc<dyn Transport>,
//! #     catalog: Arc<dyn Catalog>,
//! #     mut tx: TransactionContext,
//! # ) -> firebird_rs::Result<()> {
//! let config = StatementConfig::new()
//!     .with_cursor_mode(CursorMode::ScrollInsensitive)
//!     .with_concurrency(Concurrency::Updatable);
//!
//! let mut stmt = Statement::new(transport, catalog, config);
//! stmt.prepare(&tx, "SELECT emp_no, salary FROM employee").await?;
//! stmt.execute(&mut tx).await?;
//!
//! if stmt.last(&tx).await? {
//!     stmt.update_value_by_name("salary", 48000.0.into())?;
//!     stmt.update_row(&tx).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Batch Execution
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use firebird_rs::{Catalog, Statement, StatementConfig, TransactionContext, Transport};
//! # async fn example(
//! #     transport: Arc<dyn Transport>,
//! #     catalog: Arc<dyn Catalog>,
//! #     tx: TransactionContext,
//! # ) -> firebird_rs::Result<()> {
//! let mut stmt = Statement::new(transport, catalog, StatementConfig::new());
//! stmt.prepare(&tx, "INSERT INTO project (proj_id, proj_name) VALUES (?, ?)").await?;
//!
//! for (id, name) in [(10, "alpha"), (11, "beta"), (12, "gamma")] {
//!     stmt.set_value(0, id.into())?;
//!     stmt.set_value(1, name.into())?;
//!     stmt.add_batch()?;
//! }
//!
//! let report = stmt.execute_batch(&tx).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! Execution continues past failing items; a run containing any failure
//! surfaces [`Error::Batch`] carrying the complete per-item report.
//!
//! ## Transactions
//!
//! The engine does not own transactions. Every executing call takes the
//! ambient [`TransactionContext`] explicitly; in auto-commit mode a failed
//! execution rolls the transaction back and starts a fresh one before the
//! error reaches the caller, so the handle the caller holds is always live.
//!
//! ## Data Types
//!
//! | Firebird Type | [`Value`] variant |
//! |---------------|-------------------|
//! | SMALLINT, INTEGER, BIGINT | `Integer(i64)` |
//! | FLOAT, DOUBLE PRECISION | `Double(f64)` |
//! | NUMERIC, DECIMAL | `Numeric { unscaled, scale }` |
//! | CHAR, VARCHAR | `String` |
//! | BLOB | `Blob(BlobId)` |
//! | BOOLEAN | `Boolean(bool)` |
//! | DATE | `Date(FbDate)` |
//! | TIME | `Time(FbTime)` |
//! | TIMESTAMP | `Timestamp(FbTimestamp)` |
//! | RDB$DB_KEY | `Bytes(Vec<u8>)` |

pub mod batch;
pub mod call;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod row;
pub mod statement;
pub mod types;
pub mod updatable;
pub mod wire;

// Re-export commonly used types
pub use batch::{BatchItem, BatchItemError, BatchOutcome, BatchReport, BatchRun};
pub use call::{CallArg, CallParser, CallSlot, ParsedCall, Selectable, SlotDirection};
pub use catalog::{CachedCatalog, Catalog, SelectabilityCache};
pub use config::{
    Concurrency, CursorMode, FetchDirection, Holdability, StatementConfig, DEFAULT_FETCH_SIZE,
    DEFAULT_SELECTABILITY_CACHE,
};
pub use cursor::{Cursor, CursorKind, CursorPosition};
pub use error::{Error, Result, Warning};
pub use row::{BlobId, BufferedRow, Row, RowBuffer, Value};
pub use statement::{
    ColumnDescriptor, ParamDescriptor, SqlType, Statement, StatementState,
};
pub use types::{FbDate, FbTime, FbTimestamp};
pub use updatable::{KeyKind, KeySpec};
pub use wire::{
    BatchItemResult, CancelToken, CommitMode, ExecOptions, ExecOutcome, FetchChunk, PreparedInfo,
    ScrollChunk, ScrollFetch, StatementId, TransactionContext, Transport, TransportCapabilities,
};

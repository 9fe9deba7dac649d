//! Batch execution support
//!
//! A statement accumulates parameter rows into a [`BatchRun`] and sends them
//! in one pass. Execution continues past failed items; every item ends up
//! with an ordered outcome, and a run containing any failure surfaces as
//! [`Error::Batch`] carrying the full [`BatchReport`].
//!
//! The run is not cleared by execution. Callers clear it explicitly, which
//! also means a failed run can be inspected item by item before deciding
//! what to resubmit.
//!
//! # Example
//!
//! ```rust,ignore
//! stmt.prepare(&tx, "INSERT INTO log (id, line) VALUES (?, ?)").await?;
//!
//! stmt.set_value(0, 1.into())?;
//! stmt.set_value(1, "first".into())?;
//! stmt.add_batch()?;
//!
//! stmt.set_value(0, 2.into())?;
//! stmt.set_value(1, "second".into())?;
//! stmt.add_batch()?;
//!
//! let report = stmt.execute_batch(&mut tx).await?;
//! assert_eq!(report.total_rows_affected(), 2);
//! stmt.clear_batch();
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::row::Value;
use crate::wire::{
    guarded, BatchItemResult, CancelToken, ExecOptions, StatementId, TransactionContext, Transport,
};

/// Failure detail for one batch item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemError {
    /// 0-based position of the item within the run
    pub index: usize,
    /// Server GDS code, when the failure carried one
    pub code: Option<i32>,
    /// Failure description
    pub message: String,
}

impl BatchItemError {
    fn from_error(index: usize, err: Error) -> Self {
        match err {
            Error::Execution { code, message, .. } => Self {
                index,
                code,
                message,
            },
            other => Self {
                index,
                code: None,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for BatchItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "item {} failed (gds {}): {}", self.index, code, self.message),
            None => write!(f, "item {} failed: {}", self.index, self.message),
        }
    }
}

impl std::error::Error for BatchItemError {}

/// Outcome of one batch item after a run.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Not executed yet, or skipped because the run was aborted
    Pending,
    /// Executed; this many rows were affected
    UpdateCount(u64),
    /// Executed and failed
    Failed(BatchItemError),
}

/// One parameter row staged for batch execution.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    params: Vec<Value>,
    outcome: BatchOutcome,
}

impl BatchItem {
    /// The staged parameter values
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Outcome of the most recent run
    pub fn outcome(&self) -> &BatchOutcome {
        &self.outcome
    }
}

/// Accumulated parameter rows for one statement.
#[derive(Debug, Default)]
pub struct BatchRun {
    items: Vec<BatchItem>,
}

impl BatchRun {
    /// Create an empty run
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one parameter row. A statement without parameters stages an
    /// empty row; each such item still executes once.
    pub fn add(&mut self, params: Vec<Value>) {
        self.items.push(BatchItem {
            params,
            outcome: BatchOutcome::Pending,
        });
    }

    /// Number of staged items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if no items are staged
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop all staged items and their outcomes
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// The staged items with their most recent outcomes
    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    fn report(&self) -> BatchReport {
        BatchReport {
            outcomes: self.items.iter().map(|i| i.outcome.clone()).collect(),
        }
    }
}

/// Ordered per-item outcomes of one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    /// Outcome of every item, in submission order
    pub fn outcomes(&self) -> &[BatchOutcome] {
        &self.outcomes
    }

    /// Number of items that executed and reported a count
    pub fn success_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, BatchOutcome::UpdateCount(_)))
            .count()
    }

    /// Number of items that executed and failed
    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, BatchOutcome::Failed(_)))
            .count()
    }

    /// Sum of the update counts of the successful items
    pub fn total_rows_affected(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o {
                BatchOutcome::UpdateCount(n) => *n,
                _ => 0,
            })
            .sum()
    }

    /// First failure in submission order, if any
    pub fn first_failure(&self) -> Option<&BatchItemError> {
        self.outcomes.iter().find_map(|o| match o {
            BatchOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_failure() {
            Some(first) => write!(
                f,
                "{} of {} items failed, first at item {}: {}",
                self.failure_count(),
                self.outcomes.len(),
                first.index,
                first.message
            ),
            None => write!(f, "{} items succeeded", self.outcomes.len()),
        }
    }
}

/// Run every staged item. Items keep executing past failures; a cancel
/// aborts the run and leaves the rest pending.
pub(crate) async fn execute(
    transport: &dyn Transport,
    cancel: &CancelToken,
    tx: &TransactionContext,
    stmt: StatementId,
    run: &mut BatchRun,
    opts: &ExecOptions,
) -> Result<BatchReport> {
    if run.items.is_empty() {
        return Ok(BatchReport {
            outcomes: Vec::new(),
        });
    }
    for item in &mut run.items {
        item.outcome = BatchOutcome::Pending;
    }
    if transport.capabilities().native_batch {
        execute_native(transport, cancel, tx, stmt, run, opts).await?;
    } else {
        execute_items(transport, cancel, tx, stmt, run, opts).await?;
    }
    let report = run.report();
    tracing::debug!(
        items = report.outcomes.len(),
        failed = report.failure_count(),
        "batch run finished"
    );
    if report.failure_count() > 0 {
        Err(Error::Batch(report))
    } else {
        Ok(report)
    }
}

async fn execute_items(
    transport: &dyn Transport,
    cancel: &CancelToken,
    tx: &TransactionContext,
    stmt: StatementId,
    run: &mut BatchRun,
    opts: &ExecOptions,
) -> Result<()> {
    for (index, item) in run.items.iter_mut().enumerate() {
        let result = guarded(cancel, transport.execute(tx, stmt, &item.params, opts)).await;
        match result {
            Ok(outcome) => {
                item.outcome = BatchOutcome::UpdateCount(outcome.update_count.unwrap_or(0));
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                tracing::debug!(index, error = %err, "batch item failed, continuing");
                item.outcome = BatchOutcome::Failed(BatchItemError::from_error(index, err));
            }
        }
    }
    Ok(())
}

/// Single round trip through the transport's own batch operation.
async fn execute_native(
    transport: &dyn Transport,
    cancel: &CancelToken,
    tx: &TransactionContext,
    stmt: StatementId,
    run: &mut BatchRun,
    opts: &ExecOptions,
) -> Result<()> {
    let params: Vec<Vec<Value>> = run.items.iter().map(|i| i.params.clone()).collect();
    let results = guarded(cancel, transport.execute_batch(tx, stmt, &params, opts)).await?;
    if results.len() != run.items.len() {
        return Err(Error::Internal(format!(
            "server returned {} batch results for {} items",
            results.len(),
            run.items.len()
        )));
    }
    for (index, (item, result)) in run.items.iter_mut().zip(results).enumerate() {
        item.outcome = match result {
            BatchItemResult::Updated(count) => BatchOutcome::UpdateCount(count),
            BatchItemResult::Failed { code, message } => BatchOutcome::Failed(BatchItemError {
                index,
                code,
                message,
            }),
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<BatchOutcome>) -> BatchReport {
        BatchReport { outcomes }
    }

    fn failed(index: usize, code: Option<i32>, message: &str) -> BatchOutcome {
        BatchOutcome::Failed(BatchItemError {
            index,
            code,
            message: message.to_string(),
        })
    }

    mod report_tests {
        use super::*;

        #[test]
        fn test_counts_and_total() {
            let r = report(vec![
                BatchOutcome::UpdateCount(1),
                failed(1, Some(335544349), "no dup"),
                BatchOutcome::UpdateCount(3),
                BatchOutcome::Pending,
            ]);
            assert_eq!(r.success_count(), 2);
            assert_eq!(r.failure_count(), 1);
            assert_eq!(r.total_rows_affected(), 4);
            assert_eq!(r.first_failure().map(|e| e.index), Some(1));
        }

        #[test]
        fn test_display_summarizes_failures() {
            let r = report(vec![BatchOutcome::UpdateCount(1), failed(1, None, "boom")]);
            assert_eq!(r.to_string(), "1 of 2 items failed, first at item 1: boom");

            let r = report(vec![BatchOutcome::UpdateCount(1)]);
            assert_eq!(r.to_string(), "1 items succeeded");
        }
    }

    mod item_error_tests {
        use super::*;

        #[test]
        fn test_display_with_and_without_code() {
            let with = BatchItemError {
                index: 2,
                code: Some(335544665),
                message: "violation of PRIMARY KEY".to_string(),
            };
            assert_eq!(
                with.to_string(),
                "item 2 failed (gds 335544665): violation of PRIMARY KEY"
            );

            let without = BatchItemError {
                index: 0,
                code: None,
                message: "lost connection".to_string(),
            };
            assert_eq!(without.to_string(), "item 0 failed: lost connection");
        }

        #[test]
        fn test_from_error_keeps_server_code() {
            let e = BatchItemError::from_error(4, Error::server(335544665, "dup key"));
            assert_eq!(e.code, Some(335544665));
            assert_eq!(e.message, "dup key");

            let e = BatchItemError::from_error(0, Error::capability("nope"));
            assert_eq!(e.code, None);
            assert_eq!(e.message, "operation not supported here: nope");
        }
    }

    mod run_tests {
        use super::*;

        #[test]
        fn test_add_and_clear() {
            let mut run = BatchRun::new();
            assert!(run.is_empty());
            run.add(vec![Value::Integer(1)]);
            run.add(vec![]);
            assert_eq!(run.len(), 2);
            assert_eq!(run.items()[0].params(), &[Value::Integer(1)]);
            assert!(matches!(run.items()[1].outcome(), BatchOutcome::Pending));
            run.clear();
            assert!(run.is_empty());
        }
    }
}

//! Positioned row mutations for updatable cursors
//!
//! An updatable cursor addresses the row it stands on through a derived key:
//! the full primary key of the single underlying table when the projection
//! carries all of it, otherwise the physical record id (`RDB$DB_KEY`). A
//! result that offers neither, or that draws from more than one table,
//! downgrades to read-only with a warning instead of failing the open.
//!
//! Column values are staged in memory and sent as one positioned statement
//! on `update_row` or `insert_row`. The WHERE clause always binds the key
//! values captured when the row was fetched, so a row whose own key column
//! was just updated stays addressable.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::{is_conflict_code, Error, Result, Warning};
use crate::row::{BufferedRow, Value};
use crate::statement::ColumnDescriptor;
use crate::wire::{guarded, CancelToken, ExecOptions, TransactionContext, Transport};

/// How a positioned mutation addresses its target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// The full primary key of the underlying table
    PrimaryKey,
    /// The physical record id pseudo-column
    DbKey,
}

/// Key columns used by positioned UPDATE, DELETE and re-reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    /// 0-based ordinals of the key columns within the projection
    pub ordinals: Vec<usize>,
    /// What kind of key the ordinals form
    pub kind: KeyKind,
}

/// Result of deriving an update key from a projection.
pub(crate) enum KeyDerivation {
    Updatable(RowUpdater),
    ReadOnly(Warning),
}

/// The single underlying relation, if the projection has exactly one.
fn sole_relation(columns: &[ColumnDescriptor]) -> Option<&str> {
    let mut relation = None;
    for col in columns {
        let r = col.relation.as_deref()?;
        match relation {
            None => relation = Some(r),
            Some(seen) if seen == r => {}
            Some(_) => return None,
        }
    }
    relation
}

/// Pick the strongest key the projection supports. A projection holding
/// only part of the primary key never uses it, no matter which part.
fn derive_key(columns: &[ColumnDescriptor], pk: &[String]) -> Option<KeySpec> {
    if !pk.is_empty() {
        let ordinals: Option<Vec<usize>> = pk
            .iter()
            .map(|name| columns.iter().position(|c| c.name == *name))
            .collect();
        if let Some(ordinals) = ordinals {
            return Some(KeySpec {
                ordinals,
                kind: KeyKind::PrimaryKey,
            });
        }
    }
    columns.iter().position(|c| c.is_db_key()).map(|i| KeySpec {
        ordinals: vec![i],
        kind: KeyKind::DbKey,
    })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn render_key_predicate(key: &KeySpec, columns: &[ColumnDescriptor]) -> String {
    key.ordinals
        .iter()
        .map(|&i| match key.kind {
            KeyKind::PrimaryKey => format!("{} = ?", quote_ident(&columns[i].name)),
            KeyKind::DbKey => "RDB$DB_KEY = ?".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Map a server conflict in the lock/update class onto the dedicated
/// concurrency variant; everything else passes through.
fn classify_conflict(err: Error) -> Error {
    match err {
        Error::Execution {
            code: Some(code),
            message,
            ..
        } if is_conflict_code(code) => Error::Concurrency { code, message },
        other => other,
    }
}

/// Staging and wire plumbing behind an updatable cursor.
///
/// Owned by the cursor; one instance per open result. Staged values are not
/// visible through row getters until the mutation that sends them succeeds.
pub(crate) struct RowUpdater {
    transport: Arc<dyn Transport>,
    cancel: CancelToken,
    relation: String,
    columns: Vec<ColumnDescriptor>,
    key: KeySpec,
    staged: Vec<Option<Value>>,
    insert_staged: Vec<Option<Value>>,
    on_insert: bool,
    /// Key values of the current row as fetched, None when off a row
    current_key: Option<Vec<Value>>,
}

impl RowUpdater {
    /// Derive the update key for a projection, or the warning explaining
    /// why the cursor must stay read-only.
    pub(crate) async fn derive(
        transport: Arc<dyn Transport>,
        catalog: &dyn Catalog,
        cancel: CancelToken,
        columns: &[ColumnDescriptor],
    ) -> Result<KeyDerivation> {
        let Some(relation) = sole_relation(columns) else {
            return Ok(KeyDerivation::ReadOnly(Warning::new(
                "result is not a simple projection of one table; cursor downgraded to read-only",
            )));
        };
        let pk = catalog.primary_key_columns(relation).await?;
        let Some(key) = derive_key(columns, &pk) else {
            return Ok(KeyDerivation::ReadOnly(Warning::new(
                "projection carries neither the full primary key nor a record id; \
                 cursor downgraded to read-only",
            )));
        };
        tracing::debug!(relation, kind = ?key.kind, "derived update key");
        Ok(KeyDerivation::Updatable(RowUpdater {
            transport,
            cancel,
            relation: relation.to_string(),
            columns: columns.to_vec(),
            key,
            staged: vec![None; columns.len()],
            insert_staged: vec![None; columns.len()],
            on_insert: false,
            current_key: None,
        }))
    }

    pub(crate) fn key_spec(&self) -> &KeySpec {
        &self.key
    }

    pub(crate) fn on_insert_row(&self) -> bool {
        self.on_insert
    }

    /// Enter the insert row with a clean staging slate.
    pub(crate) fn move_to_insert_row(&mut self) {
        self.on_insert = true;
        self.insert_staged = vec![None; self.columns.len()];
    }

    pub(crate) fn move_to_current_row(&mut self) {
        self.on_insert = false;
    }

    /// The cursor moved; drop staged updates and snapshot the new row's key.
    pub(crate) fn position_changed(&mut self, values: Option<&[Value]>) {
        self.clear_staged();
        self.current_key = values.map(|v| self.snapshot_key(v));
    }

    fn snapshot_key(&self, values: &[Value]) -> Vec<Value> {
        self.key
            .ordinals
            .iter()
            .map(|&i| values.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn check_stageable(&self, index: usize) -> Result<()> {
        let Some(col) = self.columns.get(index) else {
            return Err(Error::capability(format!(
                "column index {index} out of range for {} columns",
                self.columns.len()
            )));
        };
        if col.is_db_key() {
            return Err(Error::capability("record id column is not updatable"));
        }
        Ok(())
    }

    pub(crate) fn stage(&mut self, index: usize, value: Value) -> Result<()> {
        self.check_stageable(index)?;
        self.staged[index] = Some(value);
        Ok(())
    }

    pub(crate) fn stage_insert(&mut self, index: usize, value: Value) -> Result<()> {
        self.check_stageable(index)?;
        self.insert_staged[index] = Some(value);
        Ok(())
    }

    /// Insert-row staging as a full-width row, unset columns as NULL
    pub(crate) fn insert_values(&self) -> Vec<Value> {
        self.insert_staged
            .iter()
            .map(|v| v.clone().unwrap_or(Value::Null))
            .collect()
    }

    pub(crate) fn clear_staged(&mut self) {
        self.staged = vec![None; self.columns.len()];
    }

    fn key_predicate(&self) -> String {
        render_key_predicate(&self.key, &self.columns)
    }

    fn key_params(&self) -> Result<Vec<Value>> {
        self.current_key
            .clone()
            .ok_or_else(|| Error::Internal("no key snapshot for the current row".to_string()))
    }

    /// Prepare, execute and release one mutation statement.
    async fn run_mutation(
        &self,
        tx: &TransactionContext,
        sql: &str,
        params: &[Value],
    ) -> Result<u64> {
        tracing::trace!(sql, "positioned mutation");
        let prepared = guarded(&self.cancel, self.transport.prepare(tx, sql)).await?;
        let outcome = guarded(
            &self.cancel,
            self.transport
                .execute(tx, prepared.statement_id, params, &ExecOptions::default()),
        )
        .await;
        if let Err(e) = self.transport.release(prepared.statement_id).await {
            tracing::warn!(error = %e, "releasing mutation statement failed");
        }
        let outcome = outcome.map_err(classify_conflict)?;
        Ok(outcome.update_count.unwrap_or(0))
    }

    /// Send staged column values as a positioned UPDATE and fold them into
    /// the buffered row. A statement matching no row still succeeds; the
    /// row may have been deleted by this transaction through another path.
    pub(crate) async fn update_row(
        &mut self,
        tx: &TransactionContext,
        row: &mut BufferedRow,
    ) -> Result<()> {
        let staged: Vec<usize> = (0..self.columns.len())
            .filter(|&i| self.staged[i].is_some())
            .collect();
        if staged.is_empty() {
            return Ok(());
        }
        let sets = staged
            .iter()
            .map(|&i| format!("{} = ?", quote_ident(&self.columns[i].name)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(&self.relation),
            sets,
            self.key_predicate()
        );
        let mut params: Vec<Value> = staged
            .iter()
            .map(|&i| self.staged[i].clone().unwrap_or(Value::Null))
            .collect();
        params.extend(self.key_params()?);
        self.run_mutation(tx, &sql, &params).await?;
        for &i in &staged {
            if let Some(v) = self.staged[i].clone() {
                row.values[i] = v;
            }
        }
        row.updated = true;
        self.current_key = Some(self.snapshot_key(&row.values));
        self.clear_staged();
        Ok(())
    }

    /// Issue a positioned DELETE and blank the buffered row in place.
    pub(crate) async fn delete_row(
        &mut self,
        tx: &TransactionContext,
        row: &mut BufferedRow,
    ) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(&self.relation),
            self.key_predicate()
        );
        let params = self.key_params()?;
        self.run_mutation(tx, &sql, &params).await?;
        for value in &mut row.values {
            *value = Value::Null;
        }
        row.deleted = true;
        self.current_key = None;
        self.clear_staged();
        Ok(())
    }

    /// Re-read the current row by key, discarding staged values. Surfaces
    /// trigger effects and defaults computed on the server.
    pub(crate) async fn refresh_row(
        &mut self,
        tx: &TransactionContext,
        row: &mut BufferedRow,
    ) -> Result<()> {
        let list = self
            .columns
            .iter()
            .map(|c| {
                if c.is_db_key() {
                    "RDB$DB_KEY".to_string()
                } else {
                    quote_ident(&c.name)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            list,
            quote_ident(&self.relation),
            self.key_predicate()
        );
        let params = self.key_params()?;
        let prepared = guarded(&self.cancel, self.transport.prepare(tx, &sql)).await?;
        let fetched = async {
            guarded(
                &self.cancel,
                self.transport
                    .execute(tx, prepared.statement_id, &params, &ExecOptions::default()),
            )
            .await?;
            guarded(&self.cancel, self.transport.fetch(tx, prepared.statement_id, 1)).await
        }
        .await;
        if let Err(e) = self.transport.release(prepared.statement_id).await {
            tracing::warn!(error = %e, "releasing refresh statement failed");
        }
        let chunk = fetched.map_err(classify_conflict)?;
        let Some(values) = chunk.rows.into_iter().next() else {
            return Err(Error::execution("row no longer exists"));
        };
        row.values = values;
        self.current_key = Some(self.snapshot_key(&row.values));
        self.clear_staged();
        Ok(())
    }

    /// Execute the staged INSERT and return the inserted row full-width.
    /// Clears the insert staging on success.
    pub(crate) async fn insert_row(&mut self, tx: &TransactionContext) -> Result<Vec<Value>> {
        for (i, col) in self.columns.iter().enumerate() {
            let required = !col.nullable && !col.has_default && !col.is_db_key();
            if required && self.insert_staged[i].is_none() {
                return Err(Error::capability(format!(
                    "no value staged for non-null column '{}'",
                    col.name
                )));
            }
        }
        let staged: Vec<usize> = (0..self.columns.len())
            .filter(|&i| self.insert_staged[i].is_some())
            .collect();
        let sql = if staged.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.relation))
        } else {
            let cols = staged
                .iter()
                .map(|&i| quote_ident(&self.columns[i].name))
                .collect::<Vec<_>>()
                .join(", ");
            let marks = vec!["?"; staged.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&self.relation),
                cols,
                marks
            )
        };
        let params: Vec<Value> = staged
            .iter()
            .map(|&i| self.insert_staged[i].clone().unwrap_or(Value::Null))
            .collect();
        self.run_mutation(tx, &sql, &params).await?;
        let values = self.insert_values();
        self.insert_staged = vec![None; self.columns.len()];
        Ok(values)
    }
}

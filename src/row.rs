//! Row data handling for query results
//!
//! This module provides:
//! - A type-safe representation of Firebird column values
//! - Row access by column index or name
//! - The in-memory row buffer backing emulated scrollable and updatable
//!   cursors

use crate::types::{FbDate, FbTime, FbTimestamp};

/// An opaque handle to a server-side BLOB.
///
/// BLOB content is streamed by the transport layer; the engine only carries
/// the identifier between fetch and bind sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub u64);

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blob:{:x}", self.0)
    }
}

/// Represents a value from a Firebird column.
///
/// This enum covers the data types that can be returned from queries. Values
/// can be accessed using the various `as_*` methods.
///
/// # Example
///
/// ```rust
/// use firebird_rs::Value;
///
/// fn process_value(value: &Value) {
///     match value {
///         Value::Null => println!("NULL"),
///         Value::String(s) => println!("String: {}", s),
///         Value::Integer(i) => println!("Integer: {}", i),
///         _ => println!("Other type"),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value (SMALLINT, INTEGER, BIGINT)
    Integer(i64),
    /// Floating point value (FLOAT, DOUBLE PRECISION)
    Double(f64),
    /// Exact decimal as a scaled integer (NUMERIC, DECIMAL)
    Numeric {
        /// Value without the decimal point
        unscaled: i64,
        /// Digits to the right of the decimal point
        scale: u8,
    },
    /// Text value (CHAR, VARCHAR)
    String(String),
    /// Binary value (character types with a binary charset, DB_KEY)
    Bytes(Vec<u8>),
    /// BLOB handle; content streaming lives in the transport layer
    Blob(BlobId),
    /// Date value
    Date(FbDate),
    /// Time of day value
    Time(FbTime),
    /// Timestamp value
    Timestamp(FbTimestamp),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Numeric { unscaled, scale: 0 } => Some(*unscaled),
            _ => None,
        }
    }

    /// Try to get as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Numeric { unscaled, scale } => {
                Some(*unscaled as f64 / 10f64.powi(i32::from(*scale)))
            }
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as a date
    pub fn as_date(&self) -> Option<&FbDate> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as a time of day
    pub fn as_time(&self) -> Option<&FbTime> {
        match self {
            Value::Time(t) => Some(t),
            _ => None,
        }
    }

    /// Try to get as a timestamp
    pub fn as_timestamp(&self) -> Option<&FbTimestamp> {
        match self {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// Try to get as a BLOB handle
    pub fn as_blob_id(&self) -> Option<BlobId> {
        match self {
            Value::Blob(id) => Some(*id),
            _ => None,
        }
    }
}

// From implementations for ergonomic parameter staging:
// stmt.set_value(0, 42.into())

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<FbDate> for Value {
    fn from(v: FbDate) -> Self {
        Value::Date(v)
    }
}

impl From<FbTime> for Value {
    fn from(v: FbTime) -> Self {
        Value::Time(v)
    }
}

impl From<FbTimestamp> for Value {
    fn from(v: FbTimestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<BlobId> for Value {
    fn from(v: BlobId) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Numeric { unscaled, scale } => {
                if *scale == 0 {
                    write!(f, "{}", unscaled)
                } else {
                    let sign = if *unscaled < 0 { "-" } else { "" };
                    let abs = unscaled.unsigned_abs();
                    let pow = 10u64.pow(u32::from(*scale));
                    write!(
                        f,
                        "{}{}.{:0width$}",
                        sign,
                        abs / pow,
                        abs % pow,
                        width = *scale as usize
                    )
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Blob(id) => write!(f, "<BLOB {}>", id),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

/// A row of data from a query result.
///
/// Rows contain values that can be accessed by column index (0-based) or by
/// column label.
///
/// # Example
///
/// ```rust
/// use firebird_rs::{Row, Value};
///
/// let row = Row::with_names(
///     vec![Value::Integer(7), Value::String("Ada".to_string())],
///     vec!["ID".to_string(), "NAME".to_string()],
/// );
/// assert_eq!(row.get_i64(0), Some(7));
/// assert_eq!(row.get_by_name("name").and_then(Value::as_str), Some("Ada"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values
    values: Vec<Value>,
    /// Column labels (optional, for named access)
    column_names: Option<Vec<String>>,
}

impl Row {
    /// Create a new row with values
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            column_names: None,
        }
    }

    /// Create a new row with values and column labels
    pub fn with_names(values: Vec<Value>, names: Vec<String>) -> Self {
        Self {
            values,
            column_names: Some(names),
        }
    }

    /// Get the number of columns in this row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column label (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let names = self.column_names.as_ref()?;
        let index = names.iter().position(|n| n.eq_ignore_ascii_case(name))?;
        self.values.get(index)
    }

    /// Get all values as a slice
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row and return the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Try to get a string value by index
    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    /// Try to get an integer value by index
    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    /// Try to get a float value by index
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_f64)
    }

    /// Check if a column value is NULL
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).map(Value::is_null).unwrap_or(true)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

/// One materialized row inside a [`RowBuffer`].
///
/// The flags are written only by positioned mutations; a plain scrollable
/// cursor never sets them.
#[derive(Debug, Clone)]
pub struct BufferedRow {
    /// Column values as last seen by this cursor
    pub values: Vec<Value>,
    /// A positioned UPDATE through this cursor succeeded for this row
    pub updated: bool,
    /// The row was appended through this cursor's insert staging
    pub inserted: bool,
    /// A positioned DELETE through this cursor succeeded; values are nulled
    /// but the slot stays so sibling ordinals remain stable
    pub deleted: bool,
}

impl BufferedRow {
    /// Create a freshly fetched row with no mutation flags
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            updated: false,
            inserted: false,
            deleted: false,
        }
    }
}

/// Index-addressable arena of materialized rows.
///
/// Backs emulated scrollable cursors and every holdable or updatable cursor.
/// Ordinals are 1-based to match cursor positions; the buffer is append-only
/// while a result is drained and randomly read afterwards.
#[derive(Debug, Default)]
pub struct RowBuffer {
    rows: Vec<BufferedRow>,
}

impl RowBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently materialized, including deleted slots
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no rows are materialized
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a fetched row
    pub fn push(&mut self, values: Vec<Value>) {
        self.rows.push(BufferedRow::new(values));
    }

    /// Append a locally inserted row at the logical end
    pub fn push_inserted(&mut self, values: Vec<Value>) {
        let mut row = BufferedRow::new(values);
        row.inserted = true;
        self.rows.push(row);
    }

    /// Get a row by 1-based ordinal
    pub fn get(&self, ordinal: usize) -> Option<&BufferedRow> {
        if ordinal == 0 {
            return None;
        }
        self.rows.get(ordinal - 1)
    }

    /// Get a mutable row by 1-based ordinal
    pub fn get_mut(&mut self, ordinal: usize) -> Option<&mut BufferedRow> {
        if ordinal == 0 {
            return None;
        }
        self.rows.get_mut(ordinal - 1)
    }

    /// Drop all materialized rows
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

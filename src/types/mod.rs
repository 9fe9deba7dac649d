//! Firebird data types
//!
//! Calendar value types and their conversion to and from the wire units the
//! server transmits.

mod datetime;

pub use datetime::{FbDate, FbTime, FbTimestamp, FRACTIONS_PER_DAY, FRACTIONS_PER_SECOND};

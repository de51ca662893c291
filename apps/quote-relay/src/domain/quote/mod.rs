//! Quote Record
//!
//! A `Quote` is whatever JSON object the upstream feed emits for one
//! record. The relay does not interpret its fields: the object is kept
//! as decoded and re-serialized unchanged for every subscriber.
//!
//! A few read-only accessors exist for logging and diagnostics.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One upstream quote record.
///
/// Immutable once constructed. Shared between subscribers as `Arc<Quote>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quote {
    fields: Map<String, Value>,
}

impl Quote {
    /// Build a quote from a JSON value.
    ///
    /// Returns `None` if the value is not an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Instrument symbol (`symbol`, or `ticker` as used by some feeds).
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.fields
            .get("symbol")
            .or_else(|| self.fields.get("ticker"))
            .and_then(Value::as_str)
    }

    /// Price parsed from the JSON number (or numeric string) without going
    /// through `f64`.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        match self.fields.get("price")? {
            Value::Number(n) => parse_decimal(&n.to_string()),
            Value::String(s) => parse_decimal(s),
            _ => None,
        }
    }

    /// Number of fields in the record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

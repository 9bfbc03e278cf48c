//! Bound statement parameters and result cells.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

/// One bound parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer that does not fit `Int`
    UInt(u64),
    /// Floating point
    Double(f64),
    /// Exact decimal kept in its textual form
    Decimal(String),
    /// Character data
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Date and time without zone
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Render as a SQL literal, e.g. `5`, `'it''s'`, `X'00ff'`, `DATE '2024-01-31'`.
    pub fn sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            // SQL has no NaN or infinity literal
            Value::Double(d) if !d.is_finite() => "NULL".to_string(),
            Value::Double(d) => d.to_string(),
            Value::Decimal(d) => d.clone(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => {
                let mut out = String::with_capacity(3 + b.len() * 2);
                out.push_str("X'");
                for byte in b {
                    out.push_str(&format!("{:02x}", byte));
                }
                out.push('\'');
                out
            }
            Value::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }

    /// Text-protocol cell bytes; `None` for NULL
    pub fn to_text(&self) -> Option<Vec<u8>> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { b"1".to_vec() } else { b"0".to_vec() }),
            Value::Bytes(b) => Some(b.clone()),
            Value::String(s) | Value::Decimal(s) => Some(s.as_bytes().to_vec()),
            Value::Int(i) => Some(i.to_string().into_bytes()),
            Value::UInt(u) => Some(u.to_string().into_bytes()),
            Value::Double(d) => Some(d.to_string().into_bytes()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string().into_bytes()),
            Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string().into_bytes()),
        }
    }

    /// Whether this is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_literal())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_literal_scalars() {
        assert_eq!(Value::Int(5).sql_literal(), "5");
        assert_eq!(Value::Int(-12).sql_literal(), "-12");
        assert_eq!(Value::UInt(u64::MAX).sql_literal(), "18446744073709551615");
        assert_eq!(Value::Null.sql_literal(), "NULL");
        assert_eq!(Value::Bool(true).sql_literal(), "TRUE");
        assert_eq!(Value::Double(1.5).sql_literal(), "1.5");
        assert_eq!(Value::Decimal("10.20".into()).sql_literal(), "10.20");
    }

    #[test]
    fn test_non_finite_double_literal_is_null() {
        assert_eq!(Value::Double(f64::NAN).sql_literal(), "NULL");
        assert_eq!(Value::Double(f64::INFINITY).sql_literal(), "NULL");
        assert_eq!(Value::Double(f64::NEG_INFINITY).sql_literal(), "NULL");
        assert_eq!(Value::Double(-0.25).sql_literal(), "-0.25");
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(Value::from("it's").sql_literal(), "'it''s'");
        assert_eq!(Value::Bytes(vec![0x00, 0xff]).sql_literal(), "X'00ff'");
    }

    #[test]
    fn test_sql_literal_temporal() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(Value::Date(date).sql_literal(), "DATE '2024-01-31'");
        let ts = date.and_hms_opt(13, 5, 9).unwrap();
        assert_eq!(
            Value::Timestamp(ts).sql_literal(),
            "TIMESTAMP '2024-01-31 13:05:09'"
        );
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::Int(42).to_text(), Some(b"42".to_vec()));
        assert_eq!(Value::from("abc").to_text(), Some(b"abc".to_vec()));
        assert_eq!(Value::Bool(false).to_text(), Some(b"0".to_vec()));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
    }
}

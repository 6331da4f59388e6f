use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::borrow::Cow;

/// How a result column is decoded, chosen once per query from its source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Arbitrary precision numeric, decoded as a double
    Numeric,
    Text,
    Json,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
    Bytes,
    /// Source type the gateway has no decoder for
    Unsupported,
}

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Backend type name, e.g. `int4` or `timestamptz`
    pub source_type: String,
    pub kind: ColumnKind,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            kind,
        }
    }
}

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Json(serde_json::Value),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Bytes(Vec<u8>),
}

/// One result row, values in column order.
pub type Row = Vec<Value>;

impl Value {
    /// Text rendering used by CSV output. `Null` renders as the empty string.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Bool(v) => Cow::Borrowed(if *v { "true" } else { "false" }),
            Value::Int16(v) => Cow::Owned(v.to_string()),
            Value::Int32(v) => Cow::Owned(v.to_string()),
            Value::Int64(v) => Cow::Owned(v.to_string()),
            Value::Float32(v) => Cow::Owned(v.to_string()),
            Value::Float64(v) => Cow::Owned(v.to_string()),
            Value::Text(v) => Cow::Borrowed(v.as_str()),
            Value::Json(v) => Cow::Owned(v.to_string()),
            Value::Date(v) => Cow::Owned(v.format("%Y-%m-%d").to_string()),
            Value::Timestamp(v) => Cow::Owned(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::TimestampTz(v) => Cow::Owned(v.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
            Value::Bytes(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for b in v {
                    out.push_str(&format!("{:02x}", b));
                }
                Cow::Owned(out)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int16(v) => serializer.serialize_i16(*v),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Float32(v) => serializer.serialize_f32(*v),
            Value::Float64(v) => serializer.serialize_f64(*v),
            Value::Text(v) => serializer.serialize_str(v),
            Value::Json(v) => v.serialize(serializer),
            Value::Date(v) => serializer.collect_str(&v.format("%Y-%m-%d")),
            Value::Timestamp(v) => serializer.collect_str(&v.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::TimestampTz(v) => {
                serializer.serialize_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Bytes(v) => serializer.serialize_str(&STANDARD.encode(v)),
        }
    }
}

/// Serializes a row as a JSON object keyed by column name, preserving column order.
pub struct RowObject<'a> {
    pub columns: &'a [ColumnDescriptor],
    pub values: &'a [Value],
}

impl Serialize for RowObject<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(&column.name, value)?;
        }
        map.end()
    }
}

/// Serializes the column names of a result as a JSON array.
pub struct FieldNames<'a>(pub &'a [ColumnDescriptor]);

impl Serialize for FieldNames<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for column in self.0 {
            seq.serialize_element(&column.name)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_row_object_keeps_column_order() {
        let columns = vec![
            ColumnDescriptor::new("z", "int4", ColumnKind::Int32),
            ColumnDescriptor::new("a", "text", ColumnKind::Text),
        ];
        let values = vec![Value::Int32(1), Value::Null];
        let json = serde_json::to_string(&RowObject {
            columns: &columns,
            values: &values,
        })
        .unwrap();
        assert_eq!(json, r#"{"z":1,"a":null}"#);
    }

    #[test]
    fn test_value_json_rendering() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            serde_json::to_string(&Value::TimestampTz(ts)).unwrap(),
            r#""2024-03-01T12:30:00Z""#
        );
        assert_eq!(
            serde_json::to_string(&Value::Bytes(vec![1, 2, 3])).unwrap(),
            r#""AQID""#
        );
        assert_eq!(
            serde_json::to_string(&Value::Json(serde_json::json!({"k": [1]}))).unwrap(),
            r#"{"k":[1]}"#
        );
    }

    #[test]
    fn test_value_text_rendering() {
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::Bool(true).to_text(), "true");
        assert_eq!(Value::Float64(1.5).to_text(), "1.5");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_text(), "\\xdead");
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(Value::Date(date).to_text(), "2024-01-31");
    }
}

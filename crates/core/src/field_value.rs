use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(i64),
    Bytes(Vec<u8>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// The column type able to hold this value; `None` for `Null`.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(_) => Some(ColumnType::Text),
            FieldValue::Integer(_) => Some(ColumnType::Integer),
            FieldValue::Float(_) => Some(ColumnType::Float),
            FieldValue::Boolean(_) => Some(ColumnType::Boolean),
            FieldValue::Timestamp(_) => Some(ColumnType::Timestamp),
            FieldValue::Bytes(_) => Some(ColumnType::Bytes),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            FieldValue::Timestamp(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Bytes,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Bytes => "bytes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "boolean" => Some(Self::Boolean),
            "timestamp" => Some(Self::Timestamp),
            "bytes" => Some(Self::Bytes),
            _ => None,
        }
    }

    /// `Null` is accepted by every column.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        value.column_type().is_none_or(|t| t == *self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msgpack_preserves_variant() {
        let value = FieldValue::Timestamp(1_700_000_000_000);
        let bytes = value.to_msgpack().unwrap();
        assert_eq!(FieldValue::from_msgpack(&bytes).unwrap(), value);
    }

    #[test]
    fn column_type_accepts_matching_and_null() {
        assert!(ColumnType::Integer.accepts(&FieldValue::Integer(3)));
        assert!(ColumnType::Integer.accepts(&FieldValue::Null));
        assert!(!ColumnType::Integer.accepts(&FieldValue::Text("3".into())));
    }

    #[test]
    fn column_type_names_round_trip() {
        for t in [
            ColumnType::Text,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::Timestamp,
            ColumnType::Bytes,
        ] {
            assert_eq!(ColumnType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ColumnType::parse("list"), None);
    }
}

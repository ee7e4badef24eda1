//! Mapping of a [Record] to the row it writes to and the cells it touches.
//!
//! [JsonFieldMapper] is the builtin mapper: the record payload is a JSON object, one field names
//! the row and a configured set of fields become columns (or counters) in a single column family.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;
use crate::error::Error;
use crate::message::Record;
use crate::mutation::{ColumnList, RowKey};

/// Derives the row key and column mutations for a record. Implementations must be pure.
pub trait MutationMapper: Send {
    /// Row key the record is written to.
    fn row_key(&self, record: &Record) -> Result<RowKey>;

    /// Columns (and counters, deletes) the record writes.
    fn columns(&self, record: &Record) -> Result<ColumnList>;

    /// Row key and columns together. Mappers that decode the payload in both [Self::row_key] and
    /// [Self::columns] override this to decode it once.
    fn map(&self, record: &Record) -> Result<(RowKey, ColumnList)> {
        Ok((self.row_key(record)?, self.columns(record)?))
    }
}

/// Configuration of the [JsonFieldMapper].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonFieldMapperConfig {
    pub row_key_field: String,
    pub column_family: String,
    #[serde(default)]
    pub column_fields: Vec<String>,
    #[serde(default)]
    pub counter_fields: Vec<String>,
}

/// Maps JSON object payloads field by field.
#[derive(Debug, Clone)]
pub struct JsonFieldMapper {
    config: JsonFieldMapperConfig,
}

impl JsonFieldMapper {
    pub fn new(config: JsonFieldMapperConfig) -> Result<Self> {
        if config.row_key_field.is_empty() {
            return Err(Error::Config("row key field is not set".to_string()));
        }
        if config.column_family.is_empty() {
            return Err(Error::Config("column family is not set".to_string()));
        }
        Ok(Self { config })
    }

    fn parse(record: &Record) -> Result<Map<String, Value>> {
        match serde_json::from_slice::<Value>(&record.value) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::Mapping(format!(
                "record {} is not a JSON object, got {}",
                record.id,
                json_type(&other)
            ))),
            Err(e) => Err(Error::Mapping(format!(
                "record {} is not valid JSON: {e}",
                record.id
            ))),
        }
    }

    fn row_key_from(&self, fields: &Map<String, Value>, record: &Record) -> Result<RowKey> {
        let value = fields.get(&self.config.row_key_field).ok_or_else(|| {
            Error::Mapping(format!(
                "record {} has no row key field {:?}",
                record.id, self.config.row_key_field
            ))
        })?;
        if value.is_null() {
            return Err(Error::Mapping(format!(
                "record {} has a null row key",
                record.id
            )));
        }
        Ok(scalar_bytes(value))
    }

    fn columns_from(&self, fields: &Map<String, Value>, record: &Record) -> Result<ColumnList> {
        let family = Bytes::from(self.config.column_family.clone());
        let mut cols = ColumnList::new();

        for name in &self.config.column_fields {
            // fields absent from the payload are not written
            if let Some(value) = fields.get(name) {
                cols = cols.add_column(
                    family.clone(),
                    Bytes::from(name.clone()),
                    scalar_bytes(value),
                );
            }
        }

        for name in &self.config.counter_fields {
            let Some(value) = fields.get(name) else {
                continue;
            };
            let increment = value.as_i64().ok_or_else(|| {
                Error::Mapping(format!(
                    "record {} counter field {name:?} is not an integer",
                    record.id
                ))
            })?;
            cols = cols.add_counter(family.clone(), Bytes::from(name.clone()), increment);
        }

        Ok(cols)
    }
}

impl MutationMapper for JsonFieldMapper {
    fn row_key(&self, record: &Record) -> Result<RowKey> {
        self.row_key_from(&Self::parse(record)?, record)
    }

    fn columns(&self, record: &Record) -> Result<ColumnList> {
        self.columns_from(&Self::parse(record)?, record)
    }

    fn map(&self, record: &Record) -> Result<(RowKey, ColumnList)> {
        let fields = Self::parse(record)?;
        Ok((
            self.row_key_from(&fields, record)?,
            self.columns_from(&fields, record)?,
        ))
    }
}

// strings are written without their JSON quotes, everything else as its JSON text.
fn scalar_bytes(value: &Value) -> Bytes {
    match value {
        Value::String(s) => Bytes::from(s.clone()),
        other => Bytes::from(other.to_string()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Value Conversion
//!
//! Two-way mapping between [`Value`]s held by nodes and the [`SimpleValue`]
//! primitives persistence sinks accept. The runtime-kind → [`DataType`] table
//! is injected through [`DataTypeRegistry`].

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::value::{DataType, Image, ImageError, SimpleKind, SimpleValue, Value, ValueKind};

/// Errors raised while converting property values
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("No data type registered for {} values", .0.as_str())]
    Unsupported(ValueKind),

    #[error("Cannot convert {found:?} value to {expected}")]
    Mismatch { expected: DataType, found: SimpleKind },

    #[error("Image conversion failed: {0}")]
    Image(#[from] ImageError),

    #[error("JSON conversion failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot parse '{input}' as {target}")]
    Parse { input: String, target: DataType },
}

/// Lookup table from runtime value kind to persisted data type.
#[derive(Debug, Clone)]
pub struct DataTypeRegistry {
    types: HashMap<ValueKind, DataType>,
}

impl Default for DataTypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl DataTypeRegistry {
    /// Registry with no entries
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registry covering every built-in value kind
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(ValueKind::Text, DataType::String);
        registry.register(ValueKind::Integer, DataType::Integer);
        registry.register(ValueKind::Decimal, DataType::Decimal);
        registry.register(ValueKind::Boolean, DataType::Boolean);
        registry.register(ValueKind::Timestamp, DataType::Timestamp);
        registry.register(ValueKind::Binary, DataType::Binary);
        registry.register(ValueKind::Image, DataType::PngImage);
        registry.register(ValueKind::Reference, DataType::Reference);
        registry.register(ValueKind::Json, DataType::Json);
        registry
    }

    /// Map a value kind to a data type, returning the previous mapping
    pub fn register(&mut self, kind: ValueKind, data_type: DataType) -> Option<DataType> {
        self.types.insert(kind, data_type)
    }

    pub fn data_type_of(&self, value: &Value) -> Result<DataType, ConversionError> {
        let kind = value.kind();
        self.types
            .get(&kind)
            .copied()
            .ok_or(ConversionError::Unsupported(kind))
    }

    /// Data type of a property change: the new value's type if present,
    /// else the old value's, else [`DataType::Null`]
    pub fn data_type_for(
        &self,
        new: Option<&Value>,
        old: Option<&Value>,
    ) -> Result<DataType, ConversionError> {
        match new.or(old) {
            Some(value) => self.data_type_of(value),
            None => Ok(DataType::Null),
        }
    }
}

/// Converts values to and from their persisted primitive form.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    registry: DataTypeRegistry,
}

impl Converter {
    pub fn new(registry: DataTypeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DataTypeRegistry {
        &self.registry
    }

    pub fn to_simple(&self, value: &Value) -> Result<SimpleValue, ConversionError> {
        Ok(match value {
            Value::Text(s) => SimpleValue::Text(s.clone()),
            Value::Integer(i) => SimpleValue::Integer(*i),
            Value::Decimal(d) => SimpleValue::Decimal(*d),
            Value::Boolean(b) => SimpleValue::Boolean(*b),
            Value::Timestamp(t) => SimpleValue::Timestamp(*t),
            Value::Binary(bytes) => SimpleValue::Binary(bytes.clone()),
            Value::Image(image) => SimpleValue::Binary(image.png_bytes().to_vec()),
            Value::Reference(uuid) => SimpleValue::Text(uuid.hyphenated().to_string()),
            Value::Json(json) => SimpleValue::Text(serde_json::to_string(json)?),
        })
    }

    pub fn to_simple_opt(&self, value: Option<&Value>) -> Result<Option<SimpleValue>, ConversionError> {
        value.map(|v| self.to_simple(v)).transpose()
    }

    pub fn to_complex(
        &self,
        value: &SimpleValue,
        data_type: DataType,
    ) -> Result<Value, ConversionError> {
        match (data_type, value) {
            (DataType::String, SimpleValue::Text(s)) => Ok(Value::Text(s.clone())),
            (DataType::Integer, SimpleValue::Integer(i)) => Ok(Value::Integer(*i)),
            (DataType::Decimal, SimpleValue::Decimal(d)) => Ok(Value::Decimal(*d)),
            (DataType::Boolean, SimpleValue::Boolean(b)) => Ok(Value::Boolean(*b)),
            (DataType::Timestamp, SimpleValue::Timestamp(t)) => Ok(Value::Timestamp(*t)),
            (DataType::Binary, SimpleValue::Binary(bytes)) => Ok(Value::Binary(bytes.clone())),
            (DataType::PngImage, SimpleValue::Binary(bytes)) => {
                Ok(Value::Image(Image::from_encoded(bytes)?))
            }
            (DataType::Reference, SimpleValue::Text(s)) => Uuid::parse_str(s)
                .map(Value::Reference)
                .map_err(|_| ConversionError::Parse {
                    input: s.clone(),
                    target: DataType::Reference,
                }),
            (DataType::Json, SimpleValue::Text(s)) => Ok(Value::Json(serde_json::from_str(s)?)),
            (expected, found) => Err(ConversionError::Mismatch {
                expected,
                found: found.kind(),
            }),
        }
    }
}

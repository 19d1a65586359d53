//! Property Values
//!
//! Defines the runtime values carried by node properties and the primitive
//! representations they are persisted as:
//! - `Value`: complex runtime values (text, numbers, images, references, JSON)
//! - `SimpleValue`: the closed set of persistable primitives
//! - `DataType`: the tag sent alongside every persisted property
//! - `Image`: raster images normalized to a canonical PNG byte stream

use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, RgbaImage};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Data Types
// ============================================================================

/// Type tag attached to every persisted property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Boolean,
    Integer,
    Decimal,
    String,
    Timestamp,
    Binary,
    /// Image stored as canonical PNG bytes
    PngImage,
    /// Reference to another node, stored as its UUID
    Reference,
    /// Structured domain object, stored as JSON text
    Json,
    /// Marker for a property whose old and new values are both absent
    Null,
}

impl DataType {
    /// Get the string representation used by persistence sinks
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::Decimal => "DECIMAL",
            DataType::String => "STRING",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Binary => "BINARY",
            DataType::PngImage => "PNG_IMG",
            DataType::Reference => "REFERENCE",
            DataType::Json => "JSON",
            DataType::Null => "NULL",
        }
    }

    /// Parse the string representation produced by [`DataType::as_str`]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BOOLEAN" => Some(DataType::Boolean),
            "INTEGER" => Some(DataType::Integer),
            "DECIMAL" => Some(DataType::Decimal),
            "STRING" => Some(DataType::String),
            "TIMESTAMP" => Some(DataType::Timestamp),
            "BINARY" => Some(DataType::Binary),
            "PNG_IMG" => Some(DataType::PngImage),
            "REFERENCE" => Some(DataType::Reference),
            "JSON" => Some(DataType::Json),
            "NULL" => Some(DataType::Null),
            _ => None,
        }
    }

    /// The primitive kind values of this type are persisted as.
    ///
    /// `None` for [`DataType::Null`], which never carries a value.
    pub fn simple_kind(&self) -> Option<SimpleKind> {
        match self {
            DataType::Boolean => Some(SimpleKind::Boolean),
            DataType::Integer => Some(SimpleKind::Integer),
            DataType::Decimal => Some(SimpleKind::Decimal),
            DataType::String | DataType::Reference | DataType::Json => Some(SimpleKind::Text),
            DataType::Timestamp => Some(SimpleKind::Timestamp),
            DataType::Binary | DataType::PngImage => Some(SimpleKind::Binary),
            DataType::Null => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Complex Values
// ============================================================================

/// Runtime class of a [`Value`], used to look up its [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    Timestamp,
    Binary,
    Image,
    Reference,
    Json,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Integer => "integer",
            ValueKind::Decimal => "decimal",
            ValueKind::Boolean => "boolean",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Binary => "binary",
            ValueKind::Image => "image",
            ValueKind::Reference => "reference",
            ValueKind::Json => "json",
        }
    }
}

/// A property value as held by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    Image(Image),
    /// Reference to another node by UUID
    Reference(Uuid),
    Json(serde_json::Value),
}

impl Value {
    /// Get the runtime kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Integer(_) => ValueKind::Integer,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Binary(_) => ValueKind::Binary,
            Value::Image(_) => ValueKind::Image,
            Value::Reference(_) => ValueKind::Reference,
            Value::Json(_) => ValueKind::Json,
        }
    }

    /// Borrow the text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the boolean content, if this is a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Reference(u)
    }
}

// ============================================================================
// Simple Values
// ============================================================================

/// Primitive kind of a [`SimpleValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    Timestamp,
    Binary,
}

/// A persistable primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimpleValue {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl SimpleValue {
    pub fn kind(&self) -> SimpleKind {
        match self {
            SimpleValue::Text(_) => SimpleKind::Text,
            SimpleValue::Integer(_) => SimpleKind::Integer,
            SimpleValue::Decimal(_) => SimpleKind::Decimal,
            SimpleValue::Boolean(_) => SimpleKind::Boolean,
            SimpleValue::Timestamp(_) => SimpleKind::Timestamp,
            SimpleValue::Binary(_) => SimpleKind::Binary,
        }
    }
}

// ============================================================================
// Images
// ============================================================================

/// Errors raised while normalizing image data
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Pixel buffer of {len} bytes does not match {width}x{height} RGBA")]
    BadDimensions { width: u32, height: u32, len: usize },

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

/// A raster image held in canonical form.
///
/// Whatever encoding an image arrives in, it is decoded to RGBA8 and
/// re-encoded as PNG, so two images with identical pixels compare equal
/// regardless of their original byte representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    png: Vec<u8>,
}

impl Image {
    /// Build an image from raw RGBA8 pixels
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, ImageError> {
        let len = pixels.len();
        let buffer = RgbaImage::from_raw(width, height, pixels).ok_or(ImageError::BadDimensions {
            width,
            height,
            len,
        })?;
        Self::from_rgba_image(buffer)
    }

    /// Decode an encoded image and normalize it to canonical PNG
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        Self::from_rgba_image(decoded.to_rgba8())
    }

    fn from_rgba_image(buffer: RgbaImage) -> Result<Self, ImageError> {
        let (width, height) = buffer.dimensions();
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(buffer).write_to(&mut out, ImageFormat::Png)?;
        Ok(Self {
            width,
            height,
            png: out.into_inner(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Canonical PNG encoding
    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    /// Decode back to raw RGBA8 pixels
    pub fn to_rgba(&self) -> Result<Vec<u8>, ImageError> {
        Ok(image::load_from_memory_with_format(&self.png, ImageFormat::Png)?
            .to_rgba8()
            .into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> Vec<u8> {
        (0..width * height)
            .flat_map(|i| {
                if i % 2 == 0 {
                    [255, 255, 255, 255]
                } else {
                    [0, 0, 0, 255]
                }
            })
            .collect()
    }

    #[test]
    fn test_data_type_string_roundtrip() {
        for dt in [
            DataType::Boolean,
            DataType::Integer,
            DataType::Decimal,
            DataType::String,
            DataType::Timestamp,
            DataType::Binary,
            DataType::PngImage,
            DataType::Reference,
            DataType::Json,
            DataType::Null,
        ] {
            assert_eq!(DataType::parse(dt.as_str()), Some(dt));
        }
        assert_eq!(DataType::parse("VARCHAR"), None);
    }

    #[test]
    fn test_data_type_serialization() {
        let json = serde_json::to_string(&DataType::PngImage).unwrap();
        assert_eq!(json, "\"PNG_IMAGE\"");
    }

    #[test]
    fn test_null_has_no_simple_kind() {
        assert_eq!(DataType::Null.simple_kind(), None);
        assert_eq!(DataType::Reference.simple_kind(), Some(SimpleKind::Text));
        assert_eq!(DataType::PngImage.simple_kind(), Some(SimpleKind::Binary));
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(Value::from("x").kind(), ValueKind::Text);
        assert_eq!(Value::from(5i64).kind(), ValueKind::Integer);
        assert_eq!(Value::from(Uuid::new_v4()).kind(), ValueKind::Reference);
    }

    #[test]
    fn test_image_rejects_short_buffer() {
        let err = Image::from_rgba(2, 2, vec![0; 3]).unwrap_err();
        assert!(matches!(err, ImageError::BadDimensions { len: 3, .. }));
    }

    #[test]
    fn test_image_canonical_form_is_representation_independent() {
        let original = Image::from_rgba(4, 3, checker(4, 3)).unwrap();

        // Re-encode the same pixels through a different path
        let buffer = RgbaImage::from_raw(4, 3, checker(4, 3)).unwrap();
        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(buffer)
            .write_to(&mut encoded, ImageFormat::Png)
            .unwrap();
        let reloaded = Image::from_encoded(&encoded.into_inner()).unwrap();

        assert_eq!(original, reloaded);
        assert_eq!(original.width(), 4);
        assert_eq!(original.height(), 3);
        assert_eq!(original.to_rgba().unwrap(), checker(4, 3));
    }
}

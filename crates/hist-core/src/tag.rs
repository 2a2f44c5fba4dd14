//! Tag definitions and case-insensitive lookup keys.
//!
//! Both the stable tag id and the (mutable) display name are compared
//! case-insensitively. [`TagKey`] is the normalised form used for every map
//! keyed by a tag identifier or a subscription topic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared data type of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 64-bit float values.
    #[default]
    Float64,
    /// 64-bit integer values.
    Int64,
    /// Text values.
    String,
    /// Boolean values.
    Bool,
    /// Enumerated state values.
    EnumState,
}

/// A named, identified time-series measurement point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Stable identifier.
    pub id: String,
    /// Display name; may change over the life of the tag.
    pub name: String,
    /// Declared data type.
    pub data_type: DataType,
    /// Engineering units (e.g. "degC", "bar").
    #[serde(default)]
    pub units: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

impl Tag {
    /// Create a tag with the given id, name and data type.
    pub fn new(id: impl Into<String>, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data_type,
            units: None,
            description: None,
        }
    }

    /// Set the engineering units.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Lookup key of the id.
    pub fn id_key(&self) -> TagKey {
        TagKey::new(&self.id)
    }

    /// Lookup key of the name.
    pub fn name_key(&self) -> TagKey {
        TagKey::new(&self.name)
    }

    /// Whether `identifier` names this tag by id or by name.
    pub fn is_identified_by(&self, identifier: &str) -> bool {
        let key = TagKey::new(identifier);
        key == self.id_key() || key == self.name_key()
    }
}

/// Case-insensitive tag identifier.
///
/// Holds the lowercase form of the identifier; two identifiers that differ
/// only by case produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagKey(String);

impl TagKey {
    /// Normalise an identifier.
    pub fn new(identifier: &str) -> Self {
        Self(identifier.to_lowercase())
    }

    /// Normalised form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison without allocating a key for `b`
    /// when both sides are ASCII.
    pub fn same_identifier(a: &str, b: &str) -> bool {
        if a.is_ascii() && b.is_ascii() {
            a.eq_ignore_ascii_case(b)
        } else {
            a.to_lowercase() == b.to_lowercase()
        }
    }
}

impl From<&str> for TagKey {
    fn from(identifier: &str) -> Self {
        TagKey::new(identifier)
    }
}

impl From<&String> for TagKey {
    fn from(identifier: &String) -> Self {
        TagKey::new(identifier)
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

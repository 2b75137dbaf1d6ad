//! Physical column definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Variable length text
    String,
    /// 64-bit integer
    Int,
    /// JSON document
    Json,
    /// Timestamp
    Datetime,
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(DataType::String),
            "int" | "integer" => Ok(DataType::Int),
            "json" => Ok(DataType::Json),
            "datetime" => Ok(DataType::Datetime),
            other => Err(ConfigError::Invalid(format!("unknown data type '{}'", other))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Json => "json",
            DataType::Datetime => "datetime",
        };
        f.write_str(name)
    }
}

/// Index placed on a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// No index
    None,
    /// Non-unique secondary index
    Simple,
    /// Unique secondary index
    Unique,
    /// Primary key
    Primary,
}

impl FromStr for IndexKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(IndexKind::None),
            "simple" | "index" => Ok(IndexKind::Simple),
            "unique" => Ok(IndexKind::Unique),
            "primary" => Ok(IndexKind::Primary),
            other => Err(ConfigError::Invalid(format!("unknown index kind '{}'", other))),
        }
    }
}

/// One physical column of a shard table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Storage type
    pub data_type: DataType,
    /// Index kind
    pub index: IndexKind,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// Declared length (string columns)
    pub length: Option<u32>,
}

impl ColumnDef {
    /// Create a non-nullable, unindexed column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            index: IndexKind::None,
            nullable: false,
            length: None,
        }
    }

    /// Set the index kind
    pub fn with_index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    /// Allow NULL
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the declared length
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }
}

/// Check that a name is safe to splice into SQL and JSON paths
///
/// Accepts ASCII letters, digits and underscores, not starting with a
/// digit, at most 64 characters.
pub fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_head && valid_tail && name.len() <= 64 {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(name.to_string()))
    }
}

//! Catalog metadata models.

use serde::{Deserialize, Serialize};

/// Structure of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Table name.
    pub table_name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnMetadata>,
    /// Primary-key columns in key order.
    pub primary_keys: Vec<String>,
    /// One entry per indexed column.
    pub indexes: Vec<IndexMetadata>,
}

/// Column metadata from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Vendor type name.
    pub type_name: String,
    /// Declared length or precision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Whether the database generates values for the column.
    pub auto_increment: bool,
}

/// Index membership of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Index name.
    pub name: String,
    /// Indexed column; `None` for expression indexes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

//! Document model for an entity-relationship diagram.
//!
//! A [`SchemaState`] is the primary, authoritative state of one document.
//! Entities live in id-keyed collections; `doc` keeps their display order.
//! Some fields are *derived* (relationship identification, start marker,
//! anchor coordinates, table size) and are maintained by the hook scheduler,
//! never edited directly by users.
//!
//! Snapshots serialize to camelCase JSON and round-trip exactly.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SchemaError;

/// Current snapshot format version.
pub const SCHEMA_VERSION: u32 = 3;

bitflags! {
    /// Column constraint flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColumnOption: u32 {
        const AUTO_INCREMENT = 0b0001;
        const PRIMARY_KEY = 0b0010;
        const UNIQUE = 0b0100;
        const NOT_NULL = 0b1000;
    }
}

impl Default for ColumnOption {
    fn default() -> Self {
        ColumnOption::empty()
    }
}

bitflags! {
    /// Column facets rendered inside a table. Affects table size.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Show: u32 {
        const TABLE_COMMENT = 0b0000_0001;
        const COLUMN_COMMENT = 0b0000_0010;
        const COLUMN_DATA_TYPE = 0b0000_0100;
        const COLUMN_DEFAULT = 0b0000_1000;
        const COLUMN_AUTO_INCREMENT = 0b0001_0000;
        const COLUMN_PRIMARY_KEY = 0b0010_0000;
        const COLUMN_UNIQUE = 0b0100_0000;
        const COLUMN_NOT_NULL = 0b1000_0000;
    }
}

impl Default for Show {
    fn default() -> Self {
        Show::TABLE_COMMENT
            | Show::COLUMN_COMMENT
            | Show::COLUMN_DATA_TYPE
            | Show::COLUMN_DEFAULT
            | Show::COLUMN_PRIMARY_KEY
            | Show::COLUMN_NOT_NULL
    }
}

// Flags travel as their raw bits so snapshots stay compact and stable.
macro_rules! bits_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u32(self.bits())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                u32::deserialize(deserializer).map(<$ty>::from_bits_truncate)
            }
        }
    };
}

bits_serde!(ColumnOption);
bits_serde!(Show);

/// Side of a table a relationship line attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Left,
    Right,
    Top,
    Bottom,
}

/// Terminator drawn at the start of a relationship line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartMarker {
    /// Every referencing column is NOT NULL (mandatory participation).
    Solid,
    /// At least one referencing column is nullable.
    #[default]
    Hollow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableUi {
    pub x: f64,
    pub y: f64,
    pub z_index: u32,
    /// Derived by the table-size hook.
    pub width: f64,
    /// Derived by the table-size hook.
    pub height: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    pub comment: String,
    pub column_ids: Vec<String>,
    pub ui: TableUi,
}

impl Table {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Place the table at the given canvas position.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.ui.x = x;
        self.ui.y = y;
        self
    }

    pub fn has_column(&self, column_id: &str) -> bool {
        self.column_ids.iter().any(|id| id == column_id)
    }

    /// Canvas centre, used to decide relationship sides.
    pub fn center(&self) -> (f64, f64) {
        (
            self.ui.x + self.ui.width / 2.0,
            self.ui.y + self.ui.height / 2.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub table_id: String,
    pub name: String,
    pub data_type: String,
    pub default: String,
    pub comment: String,
    pub options: ColumnOption,
}

impl Column {
    pub fn new(
        id: impl Into<String>,
        table_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            table_id: table_id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: ColumnOption) -> Self {
        self.options = options;
        self
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.options.contains(ColumnOption::PRIMARY_KEY)
    }

    pub fn is_not_null(&self) -> bool {
        self.options.contains(ColumnOption::NOT_NULL)
    }
}

/// One end of a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipPoint {
    pub table_id: String,
    pub column_ids: Vec<String>,
    /// Derived anchor position.
    pub x: f64,
    /// Derived anchor position.
    pub y: f64,
    /// Derived anchor side.
    pub direction: Direction,
}

impl RelationshipPoint {
    pub fn new<I, S>(table_id: impl Into<String>, column_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table_id: table_id.into(),
            column_ids: column_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn anchor(&self) -> Anchor {
        Anchor {
            x: self.x,
            y: self.y,
            direction: self.direction,
        }
    }
}

/// Position and side of a relationship endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    /// Derived: every end column is part of the end table's primary key.
    pub identification: bool,
    /// Derived: solid when every end column is NOT NULL.
    pub start_marker: StartMarker,
    pub start: RelationshipPoint,
    pub end: RelationshipPoint,
}

impl Relationship {
    pub fn new(id: impl Into<String>, start: RelationshipPoint, end: RelationshipPoint) -> Self {
        Self {
            id: id.into(),
            identification: false,
            start_marker: StartMarker::default(),
            start,
            end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoUi {
    pub x: f64,
    pub y: f64,
    pub z_index: u32,
    pub width: f64,
    pub height: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Memo {
    pub id: String,
    pub value: String,
    pub ui: MemoUi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub show: Show,
    /// Upper bound for the comment column width; 0 means unbounded.
    pub max_width_comment: u32,
}

/// Display order of entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Doc {
    pub table_ids: Vec<String>,
    pub relationship_ids: Vec<String>,
    pub memo_ids: Vec<String>,
}

/// Full state of one diagram document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaState {
    pub version: u32,
    pub doc: Doc,
    pub tables: BTreeMap<String, Table>,
    pub columns: BTreeMap<String, Column>,
    pub relationships: BTreeMap<String, Relationship>,
    pub memos: BTreeMap<String, Memo>,
    pub settings: Settings,
}

impl Default for SchemaState {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            doc: Doc::default(),
            tables: BTreeMap::new(),
            columns: BTreeMap::new(),
            relationships: BTreeMap::new(),
            memos: BTreeMap::new(),
            settings: Settings::default(),
        }
    }
}

impl SchemaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.get(id)
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.get(id)
    }

    pub fn relationship(&self, id: &str) -> Option<&Relationship> {
        self.relationships.get(id)
    }

    /// Tables in display order.
    pub fn ordered_tables(&self) -> impl Iterator<Item = &Table> {
        self.doc.table_ids.iter().filter_map(|id| self.tables.get(id))
    }

    /// Relationships in display order.
    pub fn ordered_relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.doc
            .relationship_ids
            .iter()
            .filter_map(|id| self.relationships.get(id))
    }

    /// Columns of a table in display order.
    pub fn table_columns<'a>(&'a self, table: &'a Table) -> impl Iterator<Item = &'a Column> {
        table.column_ids.iter().filter_map(|id| self.columns.get(id))
    }

    /// Resolve the end-side columns of a relationship.
    ///
    /// Returns `None` when the relationship is stale: the end table is gone,
    /// the column list is empty, or any referenced column no longer exists
    /// in that table.
    pub fn end_columns(&self, relationship: &Relationship) -> Option<Vec<&Column>> {
        let table = self.tables.get(&relationship.end.table_id)?;
        if relationship.end.column_ids.is_empty() {
            return None;
        }
        relationship
            .end
            .column_ids
            .iter()
            .map(|id| {
                if table.has_column(id) {
                    self.columns.get(id)
                } else {
                    None
                }
            })
            .collect()
    }
}

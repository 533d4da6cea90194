use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(RequestId, u64);
id_newtype!(ControlId, String);

impl RequestId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<&str> for ControlId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// How a control derives its iteration index from its position.
///
/// The wire names are the controller's option values; an empty or missing
/// option means `Manual`. Unknown names are preserved so the control keeps
/// whatever iteration it already had.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum IteratorMode {
    #[default]
    Manual,
    Page,
    Column,
    Row,
    /// Sequential numbering walking rows top to bottom, columns left to right.
    RowMajor,
    /// Sequential numbering walking columns left to right, rows top to bottom.
    ColumnMajor,
    Other(String),
}

impl IteratorMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "manual" => Self::Manual,
            "page" => Self::Page,
            "col" => Self::Column,
            "row" => Self::Row,
            "pagelrtb" => Self::RowMajor,
            "pagetblr" => Self::ColumnMajor,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Manual => "manual",
            Self::Page => "page",
            Self::Column => "col",
            Self::Row => "row",
            Self::RowMajor => "pagelrtb",
            Self::ColumnMajor => "pagetblr",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::RowMajor | Self::ColumnMajor)
    }
}

impl From<Option<String>> for IteratorMode {
    fn from(value: Option<String>) -> Self {
        value.as_deref().map(Self::parse).unwrap_or_default()
    }
}

impl From<IteratorMode> for String {
    fn from(value: IteratorMode) -> Self {
        value.as_str().to_string()
    }
}

/// A control's location on the controller's surface grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPosition {
    pub row: i32,
    pub column: i32,
}

impl GridPosition {
    pub fn new(row: i32, column: i32) -> Self {
        Self { row, column }
    }

    /// Key ordering columns first, used for column-major walks.
    pub fn column_major_key(&self) -> (i32, i32) {
        (self.column, self.row)
    }
}

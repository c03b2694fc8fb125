//! Code units and the file records that own them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Function,
    Method,
    Class,
    Global,
}

impl UnitKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "global" => Ok(Self::Global),
            other => Err(format!("unknown unit kind: {other}")),
        }
    }
}

/// One semantic block of source code.
///
/// Units are rebuilt from scratch whenever their file is decomposed again;
/// nothing mutates them afterwards except attaching the embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub kind: UnitKind,
    pub name: Option<String>,
    /// Set for methods.
    pub enclosing_class: Option<String>,
    pub source_text: String,
    /// For classes, a listing of method signatures.
    pub summary_text: Option<String>,
    /// Parameters for functions and methods; base classes for classes.
    pub input_signature: Option<Vec<String>>,
    pub output_signature: Option<Vec<String>>,
    /// Unit-length vector, present once embedded.
    pub embedding: Option<Vec<f32>>,
}

impl CodeUnit {
    #[must_use]
    pub fn global(source_text: String) -> Self {
        Self {
            kind: UnitKind::Global,
            name: None,
            enclosing_class: None,
            source_text,
            summary_text: None,
            input_signature: None,
            output_signature: None,
            embedding: None,
        }
    }

    /// Base classes of a class unit.
    #[must_use]
    pub fn parents(&self) -> Option<&[String]> {
        match self.kind {
            UnitKind::Class => self.input_signature.as_deref(),
            _ => None,
        }
    }

    /// `name` for functions, `Class.name` for methods.
    #[must_use]
    pub fn qualified_name(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        Some(match &self.enclosing_class {
            Some(class) => format!("{class}.{name}"),
            None => name.to_owned(),
        })
    }
}

/// One tracked file: relative path, content checksum, and its latest units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filepath: String,
    pub checksum: String,
    pub units: Vec<CodeUnit>,
}

impl FileRecord {
    #[must_use]
    pub fn new(filepath: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            checksum: checksum.into(),
            units: Vec::new(),
        }
    }
}

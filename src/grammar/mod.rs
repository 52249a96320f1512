//! Grammar Model
//!
//! Normalized struct and field descriptors. Every optional attribute of the
//! grammar document has already been defaulted by the loader, so the parser
//! only ever branches on concrete values.
//!
//! Structs and fields live in two arenas owned by [`Grammar`] and are
//! addressed by [`StructId`] / [`FieldId`]. Descriptors are immutable; the
//! per-run instance counters live in the parser session.

mod loader;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::expr::{ExprError, Expression};

pub use loader::{load_file, load_str};

/// Index of a struct descriptor in the grammar arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructId(pub usize);

/// Index of a field descriptor in the grammar arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub usize);

/// Errors raised while loading and normalizing a grammar document
#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("grammar document has no 'structs' mapping")]
    NoStructs,

    #[error("struct '{0}' declares no fields")]
    EmptyStruct(String),

    #[error("{owner}: missing required attribute '{attribute}'")]
    MissingAttribute { owner: String, attribute: &'static str },

    #[error("{owner}: unknown offset_type '{value}'")]
    UnknownOffsetType { owner: String, value: String },

    #[error("struct '{owner}': magic must be exactly 4 bytes, got {len}")]
    BadMagic { owner: String, len: usize },

    #[error("struct '{owner}': magic character '{ch}' does not fit in one byte")]
    MagicChar { owner: String, ch: char },

    #[error("field '{0}': 'no_fields' is only valid on structs")]
    FieldSummarize(String),

    #[error("field '{owner}' follows unknown field '{follows}'")]
    UnknownFollows { owner: String, follows: String },

    #[error("{owner}: bad expression '{source_text}': {error}")]
    Expression {
        owner: String,
        source_text: String,
        #[source]
        error: ExprError,
    },

    #[error("include cycle through {0}")]
    IncludeCycle(PathBuf),
}

/// Result type for grammar loading
pub type GrammarResult<T> = Result<T, GrammarError>;

/// Byte order used to fold field bytes into a number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Rendering hint; `String` also switches accumulation to text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    #[default]
    Number,
    String,
    Color,
}

/// Annotation policy for field records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Summarize {
    #[default]
    Default,
    None,
    FirstOnly,
    SumRepeat,
    /// Struct level only
    NoFields,
}

impl Summarize {
    /// Field-level policy wins unless it is `Default`
    pub fn effective(struct_level: Summarize, field_level: Summarize) -> Summarize {
        if field_level == Summarize::Default {
            struct_level
        } else {
            field_level
        }
    }
}

/// Rule deciding when an open field stops accumulating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermStyle {
    /// Fixed byte length
    Static { size: usize },
    /// Terminated by a zero byte, which is not part of the content
    OnNull,
    /// Variable-length quantity: high bit set means more bytes follow
    Var,
}

/// Where a field starts inside its struct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPosition {
    /// At this many bytes into the struct
    Offset(usize),
    /// Right after the named field of the same struct
    Follows(FieldId),
}

/// How a struct is located in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// At an absolute file offset
    Static { offset: usize },
    /// Wherever the lookahead window equals the magic
    Chunk { magic: [u8; 4] },
    /// Right after one of the predecessor structs closes
    Follow { follows: Vec<StructId> },
    /// At any offset recorded in a field's history
    Stored { offset_ref: FieldRef },
}

/// A `struct/field#pin` reference resolved against the grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Reference as written in the document
    pub path: String,
    /// Resolved target; `None` makes every lookup come back empty
    pub target: Option<FieldId>,
    /// Struct whose instance count pins the history index
    pub pin: Option<StructId>,
}

impl FieldRef {
    /// A reference that resolved to nothing
    pub fn unresolved(path: &str) -> Self {
        Self {
            path: path.to_string(),
            target: None,
            pin: None,
        }
    }
}

/// Dynamic repeat count: referenced value fed through `count_mod`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatCount {
    pub field: FieldRef,
    pub expr: Expression,
}

/// Presence guard: referenced value fed through `match_mod`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub field: FieldRef,
    pub expr: Expression,
}

/// First-byte class test applied to the peeked byte
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytePredicate {
    pub is: Vec<u8>,
    pub not: Vec<u8>,
    pub and: Option<u8>,
    pub gt: Option<u8>,
    pub lt: Option<u8>,
}

impl BytePredicate {
    /// Test a peeked byte. An unavailable byte passes every test.
    pub fn accepts(&self, byte: Option<u8>) -> bool {
        let Some(b) = byte else {
            return true;
        };
        if self.not.contains(&b) {
            return false;
        }
        if !self.is.is_empty() && !self.is.contains(&b) {
            return false;
        }
        if let Some(mask) = self.and {
            if b & mask == 0 {
                return false;
            }
        }
        if let Some(gt) = self.gt {
            if b <= gt {
                return false;
            }
        }
        if let Some(lt) = self.lt {
            if b >= lt {
                return false;
            }
        }
        true
    }
}

/// Normalized struct descriptor
#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub placement: Placement,
    pub first_byte: BytePredicate,
    /// Implicit repeat: reopen while the count exceeds instances parsed
    pub count: Option<RepeatCount>,
    /// Fields in declaration order
    pub fields: Vec<FieldId>,
    pub summarize: Summarize,
    pub check_size: Option<usize>,
}

/// Normalized field descriptor
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub parent: StructId,
    pub position: FieldPosition,
    pub term: TermStyle,
    pub byte_order: ByteOrder,
    pub format: Format,
    pub summarize: Summarize,
    pub count: Option<RepeatCount>,
    pub guard: Option<Guard>,
    /// Content transform, identity when the document gave none
    pub value_expr: Expression,
    pub hidden: bool,
}

/// A fully normalized grammar
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    structs: Vec<StructDef>,
    fields: Vec<FieldDef>,
}

impl Grammar {
    pub(crate) fn from_parts(structs: Vec<StructDef>, fields: Vec<FieldDef>) -> Self {
        Self { structs, fields }
    }

    /// Load a grammar from YAML text without include support
    pub fn from_yaml(text: &str) -> GrammarResult<Self> {
        load_str(text)
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.0]
    }

    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.0]
    }

    /// Struct ids in declaration order
    pub fn struct_ids(&self) -> impl Iterator<Item = StructId> {
        (0..self.structs.len()).map(StructId)
    }

    pub fn struct_count(&self) -> usize {
        self.structs.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn find_struct(&self, name: &str) -> Option<StructId> {
        self.structs.iter().position(|s| s.name == name).map(StructId)
    }

    pub fn find_field(&self, struct_name: &str, field_name: &str) -> Option<FieldId> {
        let sid = self.find_struct(struct_name)?;
        self.structs[sid.0]
            .fields
            .iter()
            .copied()
            .find(|f| self.fields[f.0].name == field_name)
    }

    pub fn struct_name(&self, id: StructId) -> &str {
        &self.structs[id.0].name
    }

    pub fn field_name(&self, id: FieldId) -> &str {
        &self.fields[id.0].name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_unavailable_byte_passes() {
        let pred = BytePredicate {
            is: vec![0x01],
            ..Default::default()
        };
        assert!(pred.accepts(None));
    }

    #[test]
    fn test_predicate_inclusion_exclusion() {
        let pred = BytePredicate {
            is: vec![0x90, 0x80],
            not: vec![0x80],
            ..Default::default()
        };
        assert!(pred.accepts(Some(0x90)));
        assert!(!pred.accepts(Some(0x80)));
        assert!(!pred.accepts(Some(0x40)));
    }

    #[test]
    fn test_predicate_bitwise_and_bounds() {
        let pred = BytePredicate {
            and: Some(0x80),
            gt: Some(0x8f),
            lt: Some(0xf0),
            ..Default::default()
        };
        assert!(pred.accepts(Some(0x90)));
        assert!(!pred.accepts(Some(0x7f)));
        assert!(!pred.accepts(Some(0x8f)));
        assert!(!pred.accepts(Some(0xf0)));
        assert!(BytePredicate::default().accepts(Some(0x00)));
    }

    #[test]
    fn test_effective_summarize() {
        assert_eq!(
            Summarize::effective(Summarize::None, Summarize::Default),
            Summarize::None
        );
        assert_eq!(
            Summarize::effective(Summarize::None, Summarize::SumRepeat),
            Summarize::SumRepeat
        );
    }
}

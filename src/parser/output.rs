//! Parse results
//!
//! Everything a finished session hands to the renderers: one [`ByteTag`]
//! per input byte, the annotation log, the field history and any warnings.
//! [`ParseOutput::snapshot`] flattens ids into names for JSON output.

use std::collections::BTreeMap;

use serde::Serialize;

use super::storage::{Annotation, AnnotationLog, FieldHistory, StructOccurrence};
use crate::grammar::{ByteOrder, FieldId, Format, Grammar, StructId, Summarize};
use crate::value::FieldValue;

/// Field ownership of a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldTag {
    pub id: FieldId,
    /// Field instance id within the struct instance
    pub fid: usize,
}

/// Struct ownership of a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StructTag {
    pub id: StructId,
    /// Struct instance id
    pub sid: usize,
    /// `None` for gap bytes inside a struct
    pub field: Option<FieldTag>,
}

/// Classification of a single input byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteTag {
    pub byte: u8,
    /// `None` for bytes outside every struct
    pub span: Option<StructTag>,
    pub hidden: bool,
}

impl ByteTag {
    pub fn free(byte: u8) -> Self {
        Self {
            byte,
            span: None,
            hidden: false,
        }
    }

    /// Whether the byte belongs to no struct
    pub fn is_free(&self) -> bool {
        self.span.is_none()
    }

    pub fn field(&self) -> Option<FieldTag> {
        self.span.and_then(|s| s.field)
    }
}

/// Non-fatal conditions recorded during a parse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    #[error("struct '{name}' instance {sid} consumed {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        sid: usize,
        expected: usize,
        actual: usize,
    },

    #[error("struct '{name}' instance {sid} still open at end of input after {consumed} bytes")]
    Unterminated {
        name: String,
        sid: usize,
        consumed: usize,
    },
}

/// The result of a finished parse
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub(super) grammar: Grammar,
    pub(super) tags: Vec<ByteTag>,
    pub(super) log: AnnotationLog,
    pub(super) history: FieldHistory,
    pub(super) warnings: Vec<ParseWarning>,
}

impl ParseOutput {
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// One tag per input byte, in input order
    pub fn tags(&self) -> &[ByteTag] {
        &self.tags
    }

    pub fn log(&self) -> &AnnotationLog {
        &self.log
    }

    pub fn history(&self) -> &FieldHistory {
        &self.history
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// All values recorded for `struct_name/field_name`
    pub fn values(&self, struct_name: &str, field_name: &str) -> &[FieldValue] {
        match self.grammar.find_field(struct_name, field_name) {
            Some(id) => self.history.get(id),
            None => &[],
        }
    }

    /// Number of bytes no struct claimed
    pub fn free_bytes(&self) -> usize {
        self.tags.iter().filter(|t| t.is_free()).count()
    }

    pub fn struct_name(&self, id: StructId) -> &str {
        self.grammar.struct_name(id)
    }

    pub fn field_name(&self, id: FieldId) -> &str {
        self.grammar.field_name(id)
    }

    /// Name-resolved view suitable for serialization
    pub fn snapshot(&self) -> OutputSnapshot {
        let tags = self
            .tags
            .iter()
            .map(|t| TagSnapshot {
                byte: t.byte,
                r#struct: t.span.map(|s| self.struct_name(s.id).to_string()),
                sid: t.span.map(|s| s.sid),
                field: t.field().map(|f| self.field_name(f.id).to_string()),
                fid: t.field().map(|f| f.fid),
                hidden: t.hidden,
            })
            .collect();

        let annotations = self
            .log
            .records()
            .iter()
            .map(|a| self.annotation_snapshot(a))
            .collect();

        let structs = self
            .log
            .occurrences()
            .iter()
            .map(|o| self.occurrence_snapshot(o))
            .collect();

        let mut history = BTreeMap::new();
        for sid in self.grammar.struct_ids() {
            for &fid in &self.grammar.struct_def(sid).fields {
                let values = self.history.get(fid);
                if !values.is_empty() {
                    let key = format!("{}/{}", self.struct_name(sid), self.field_name(fid));
                    history.insert(key, values.to_vec());
                }
            }
        }

        OutputSnapshot {
            tags,
            annotations,
            structs,
            history,
            warnings: self.warnings.clone(),
        }
    }

    fn annotation_snapshot(&self, a: &Annotation) -> AnnotationSnapshot {
        AnnotationSnapshot {
            offset: a.offset,
            len: a.len,
            r#struct: self.struct_name(a.struct_id).to_string(),
            sid: a.sid,
            field: self.field_name(a.field_id).to_string(),
            fid: a.fid,
            content: a.content.clone(),
            byte_order: a.byte_order,
            format: a.format,
            summarize: a.summarize,
        }
    }

    fn occurrence_snapshot(&self, o: &StructOccurrence) -> OccurrenceSnapshot {
        OccurrenceSnapshot {
            r#struct: self.struct_name(o.struct_id).to_string(),
            sid: o.sid,
            offset: o.offset,
            len: o.len,
        }
    }
}

/// Serializable form of a [`ParseOutput`]
#[derive(Debug, Clone, Serialize)]
pub struct OutputSnapshot {
    pub tags: Vec<TagSnapshot>,
    pub annotations: Vec<AnnotationSnapshot>,
    pub structs: Vec<OccurrenceSnapshot>,
    /// Keyed by `struct/field`
    pub history: BTreeMap<String, Vec<FieldValue>>,
    pub warnings: Vec<ParseWarning>,
}

impl OutputSnapshot {
    /// Serialize snapshot to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TagSnapshot {
    pub byte: u8,
    pub r#struct: Option<String>,
    pub sid: Option<usize>,
    pub field: Option<String>,
    pub fid: Option<usize>,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationSnapshot {
    pub offset: usize,
    pub len: usize,
    pub r#struct: String,
    pub sid: usize,
    pub field: String,
    pub fid: usize,
    pub content: Option<FieldValue>,
    pub byte_order: ByteOrder,
    pub format: Format,
    pub summarize: Summarize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OccurrenceSnapshot {
    pub r#struct: String,
    pub sid: usize,
    pub offset: usize,
    pub len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_tag() {
        let tag = ByteTag::free(0x41);
        assert!(tag.is_free());
        assert_eq!(tag.field(), None);
    }

    #[test]
    fn test_warning_display() {
        let warning = ParseWarning::SizeMismatch {
            name: "hdr".to_string(),
            sid: 0,
            expected: 8,
            actual: 6,
        };
        assert_eq!(
            warning.to_string(),
            "struct 'hdr' instance 0 consumed 6 bytes, expected 8"
        );
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "size_mismatch");
    }
}

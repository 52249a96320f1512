//! Grammar document loading
//!
//! Reads YAML grammar documents, merges `include`d documents into them and
//! runs the single normalization pass that turns the loosely-typed document
//! into the [`Grammar`] arenas. All attribute defaulting happens here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use super::{
    BytePredicate, ByteOrder, FieldDef, FieldId, FieldPosition, FieldRef, Format, Grammar,
    GrammarError, GrammarResult, Guard, Placement, RepeatCount, StructDef, StructId, Summarize,
    TermStyle,
};
use crate::expr::Expression;
use crate::value::FieldValue;

/// Load a grammar file, resolving includes relative to its directory
pub fn load_file(path: &Path) -> GrammarResult<Grammar> {
    let mut visiting = Vec::new();
    let doc = read_document(path, &mut visiting)?;
    normalize(&doc)
}

/// Load a grammar from YAML text; includes resolve against the working directory
pub fn load_str(text: &str) -> GrammarResult<Grammar> {
    let doc = parse_mapping(text)?;
    let mut visiting = Vec::new();
    let doc = resolve_includes(doc, Path::new("."), &mut visiting)?;
    normalize(&doc)
}

fn parse_mapping(text: &str) -> GrammarResult<Mapping> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(m) => Ok(m),
        _ => Err(GrammarError::NoStructs),
    }
}

fn read_document(path: &Path, visiting: &mut Vec<PathBuf>) -> GrammarResult<Mapping> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if visiting.contains(&canonical) {
        return Err(GrammarError::IncludeCycle(canonical));
    }

    let text = std::fs::read_to_string(path).map_err(|source| GrammarError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = parse_mapping(&text)?;

    visiting.push(canonical);
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let doc = resolve_includes(doc, base, visiting)?;
    visiting.pop();
    Ok(doc)
}

fn resolve_includes(
    mut doc: Mapping,
    base: &Path,
    visiting: &mut Vec<PathBuf>,
) -> GrammarResult<Mapping> {
    let includes: Vec<String> = match doc.get("include") {
        Some(v) => serde_yaml::from_value(v.clone())?,
        None => Vec::new(),
    };

    for include in includes {
        debug!("importing {}...", include);
        let imported = read_document(&base.join(&include), visiting)?;
        merge_subtree(&mut doc, imported);
    }
    Ok(doc)
}

/// Merge imported data into `base`; keys already in `base` take precedence
fn merge_subtree(base: &mut Mapping, import: Mapping) {
    for (key, value) in import {
        if let Some(existing) = base.get_mut(&key) {
            if let (Value::Mapping(existing), Value::Mapping(incoming)) = (existing, value) {
                merge_subtree(existing, incoming);
            }
        } else {
            base.insert(key, value);
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TermStyleKind {
    Static,
    OnNull,
    Var,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatchValue {
    Int(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct StructDoc {
    offset_type: Option<String>,
    offset: Option<usize>,
    offset_magic: Option<String>,
    follows: Option<OneOrMany>,
    offset_field: Option<String>,
    count_field: Option<String>,
    count_mod: Option<String>,
    #[serde(default)]
    first_byte_is: Vec<u8>,
    #[serde(default)]
    first_byte_not: Vec<u8>,
    first_byte_and: Option<u8>,
    first_byte_gt: Option<u8>,
    first_byte_lt: Option<u8>,
    #[serde(default)]
    summarize: Summarize,
    check_size: Option<usize>,
    #[serde(default)]
    fields: Mapping,
}

#[derive(Debug, Deserialize)]
struct FieldDoc {
    offset: Option<usize>,
    follows: Option<String>,
    size: Option<usize>,
    term_style: Option<TermStyleKind>,
    #[serde(default)]
    lsbf: bool,
    #[serde(default)]
    format: Format,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    summarize: Summarize,
    count_field: Option<String>,
    count_mod: Option<String>,
    match_field: Option<String>,
    match_value: Option<MatchValue>,
    match_mod: Option<String>,
    mod_contents: Option<String>,
}

/// Name tables built before any descriptor so references can resolve
/// regardless of declaration order
struct Names {
    structs: HashMap<String, StructId>,
    fields: HashMap<(String, String), FieldId>,
}

impl Names {
    /// Resolve `struct/field#pin`; a bare `field` names the current struct
    fn resolve(&self, path: &str, current: &str) -> FieldRef {
        let (struct_name, field_part) = match path.split_once('/') {
            Some((s, f)) => (s, f),
            None => (current, path),
        };
        let (field_name, pin_name) = match field_part.split_once('#') {
            Some((f, p)) => (f, Some(p)),
            None => (field_part, None),
        };

        let target = self
            .fields
            .get(&(struct_name.to_string(), field_name.to_string()))
            .copied();
        let pin = pin_name.map(|p| self.structs.get(p).copied());

        match (target, pin) {
            (Some(target), None) => FieldRef {
                path: path.to_string(),
                target: Some(target),
                pin: None,
            },
            (Some(target), Some(Some(pin))) => FieldRef {
                path: path.to_string(),
                target: Some(target),
                pin: Some(pin),
            },
            _ => {
                warn!("reference {} (from {}) does not resolve", path, current);
                FieldRef::unresolved(path)
            }
        }
    }
}

fn key_name(key: &Value) -> GrammarResult<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_yaml::to_string(other)?.trim().to_string()),
    }
}

fn parse_expr(owner: &str, source: &str) -> GrammarResult<Expression> {
    Expression::parse(source).map_err(|error| GrammarError::Expression {
        owner: owner.to_string(),
        source_text: source.to_string(),
        error,
    })
}

fn parse_magic(owner: &str, magic: &str) -> GrammarResult<[u8; 4]> {
    let bytes = magic
        .chars()
        .map(|ch| {
            u8::try_from(u32::from(ch)).map_err(|_| GrammarError::MagicChar {
                owner: owner.to_string(),
                ch,
            })
        })
        .collect::<GrammarResult<Vec<u8>>>()?;
    <[u8; 4]>::try_from(bytes.as_slice()).map_err(|_| GrammarError::BadMagic {
        owner: owner.to_string(),
        len: bytes.len(),
    })
}

/// The normalization pass: document mapping to grammar arenas
fn normalize(doc: &Mapping) -> GrammarResult<Grammar> {
    let structs_map = match doc.get("structs") {
        Some(Value::Mapping(m)) => m,
        _ => return Err(GrammarError::NoStructs),
    };

    let mut docs: Vec<(String, StructDoc, Vec<(String, FieldDoc)>)> = Vec::new();
    for (key, value) in structs_map {
        let name = key_name(key)?;
        let struct_doc: StructDoc = serde_yaml::from_value(value.clone())?;
        let mut fields = Vec::new();
        for (fkey, fvalue) in &struct_doc.fields {
            let field_doc: FieldDoc = serde_yaml::from_value(fvalue.clone())?;
            fields.push((key_name(fkey)?, field_doc));
        }
        if fields.is_empty() {
            return Err(GrammarError::EmptyStruct(name));
        }
        docs.push((name, struct_doc, fields));
    }

    let mut names = Names {
        structs: HashMap::new(),
        fields: HashMap::new(),
    };
    let mut next_field = 0;
    for (i, (name, _, fields)) in docs.iter().enumerate() {
        names.structs.insert(name.clone(), StructId(i));
        for (field_name, _) in fields {
            names
                .fields
                .insert((name.clone(), field_name.clone()), FieldId(next_field));
            next_field += 1;
        }
    }

    let mut structs = Vec::with_capacity(docs.len());
    let mut field_defs = Vec::with_capacity(next_field);

    for (i, (name, struct_doc, fields)) in docs.into_iter().enumerate() {
        let id = StructId(i);
        let mut field_ids = Vec::with_capacity(fields.len());
        let mut previous: Option<FieldId> = None;

        for (field_name, field_doc) in fields {
            let field_id = FieldId(field_defs.len());
            let def = normalize_field(&names, id, &name, &field_name, field_doc, previous)?;
            field_defs.push(def);
            field_ids.push(field_id);
            previous = Some(field_id);
        }

        structs.push(normalize_struct(&names, &name, struct_doc, field_ids)?);
        debug!("normalized struct {}", name);
    }

    Ok(Grammar::from_parts(structs, field_defs))
}

fn normalize_struct(
    names: &Names,
    name: &str,
    doc: StructDoc,
    fields: Vec<FieldId>,
) -> GrammarResult<StructDef> {
    let follows = doc.follows.map(OneOrMany::into_vec).unwrap_or_default();

    // Without an explicit offset_type, infer it from the positional attribute
    let offset_type = match doc.offset_type {
        Some(t) => t,
        None if doc.offset_field.is_some() => "stored".to_string(),
        None if doc.offset_magic.is_some() => "chunk".to_string(),
        None if !follows.is_empty() => "follow".to_string(),
        None if doc.offset.is_some() => "static".to_string(),
        None => {
            return Err(GrammarError::MissingAttribute {
                owner: name.to_string(),
                attribute: "offset_type",
            })
        }
    };

    let missing = |attribute| GrammarError::MissingAttribute {
        owner: name.to_string(),
        attribute,
    };

    let placement = match offset_type.as_str() {
        "static" => Placement::Static {
            offset: doc.offset.ok_or_else(|| missing("offset"))?,
        },
        "chunk" => {
            let magic = doc.offset_magic.ok_or_else(|| missing("offset_magic"))?;
            Placement::Chunk {
                magic: parse_magic(name, &magic)?,
            }
        }
        "follow" => {
            if follows.is_empty() {
                return Err(missing("follows"));
            }
            let follows = follows
                .iter()
                .filter_map(|f| {
                    let id = names.structs.get(f).copied();
                    if id.is_none() {
                        warn!("struct {} follows unknown struct {}", name, f);
                    }
                    id
                })
                .collect();
            Placement::Follow { follows }
        }
        "stored" => {
            let path = doc.offset_field.ok_or_else(|| missing("offset_field"))?;
            Placement::Stored {
                offset_ref: names.resolve(&path, name),
            }
        }
        other => {
            return Err(GrammarError::UnknownOffsetType {
                owner: name.to_string(),
                value: other.to_string(),
            })
        }
    };

    let count = match doc.count_field {
        Some(path) => Some(RepeatCount {
            field: names.resolve(&path, name),
            expr: match doc.count_mod {
                Some(src) => parse_expr(name, &src)?,
                None => Expression::identity(),
            },
        }),
        None => None,
    };

    Ok(StructDef {
        name: name.to_string(),
        placement,
        first_byte: BytePredicate {
            is: doc.first_byte_is,
            not: doc.first_byte_not,
            and: doc.first_byte_and,
            gt: doc.first_byte_gt,
            lt: doc.first_byte_lt,
        },
        count,
        fields,
        summarize: doc.summarize,
        check_size: doc.check_size,
    })
}

fn normalize_field(
    names: &Names,
    parent: StructId,
    struct_name: &str,
    name: &str,
    doc: FieldDoc,
    previous: Option<FieldId>,
) -> GrammarResult<FieldDef> {
    let owner = format!("{}/{}", struct_name, name);

    if doc.summarize == Summarize::NoFields {
        return Err(GrammarError::FieldSummarize(owner));
    }

    let position = match (doc.offset, doc.follows, previous) {
        (Some(offset), _, _) => FieldPosition::Offset(offset),
        (None, Some(follows), _) => {
            let id = names
                .fields
                .get(&(struct_name.to_string(), follows.clone()))
                .copied()
                .ok_or(GrammarError::UnknownFollows {
                    owner: owner.clone(),
                    follows,
                })?;
            FieldPosition::Follows(id)
        }
        (None, None, Some(previous)) => FieldPosition::Follows(previous),
        (None, None, None) => FieldPosition::Offset(0),
    };

    let term = match doc.term_style.unwrap_or(TermStyleKind::Static) {
        TermStyleKind::Static => TermStyle::Static {
            size: doc.size.ok_or_else(|| GrammarError::MissingAttribute {
                owner: owner.clone(),
                attribute: "size",
            })?,
        },
        TermStyleKind::OnNull => TermStyle::OnNull,
        TermStyleKind::Var => TermStyle::Var,
    };

    let count = match doc.count_field {
        Some(path) => Some(RepeatCount {
            field: names.resolve(&path, struct_name),
            expr: match doc.count_mod {
                Some(src) => parse_expr(&owner, &src)?,
                None => Expression::identity(),
            },
        }),
        None => None,
    };

    let guard = match doc.match_field {
        Some(path) => {
            let expr = match (doc.match_mod, doc.match_value) {
                (Some(src), _) => parse_expr(&owner, &src)?,
                (None, Some(MatchValue::Int(n))) => Expression::equals(&FieldValue::Number(n)),
                (None, Some(MatchValue::Text(s))) => Expression::equals(&FieldValue::Text(s)),
                (None, None) => Expression::identity(),
            };
            Some(Guard {
                field: names.resolve(&path, struct_name),
                expr,
            })
        }
        None => None,
    };

    let value_expr = match doc.mod_contents {
        Some(src) => parse_expr(&owner, &src)?,
        None => Expression::identity(),
    };

    Ok(FieldDef {
        name: name.to_string(),
        parent,
        position,
        term,
        byte_order: if doc.lsbf {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        },
        format: doc.format,
        summarize: doc.summarize,
        count,
        guard,
        value_expr,
        hidden: doc.hidden,
    })
}

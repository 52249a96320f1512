//! Parser State Machine
//!
//! Drives one parse session. Each input byte goes through the same steps:
//!
//! 1. Selection: with no struct open, try to open one; with a struct open
//!    and no field open, try to open the next field
//! 2. The byte is pushed through the lookahead buffer; whatever falls out
//!    the other end is the byte processed in this step
//! 3. The delivered byte is folded into the open field and tagged with
//!    the current struct/field instances
//! 4. The open field's termination rule is checked; closing a field may
//!    close its struct
//!
//! Selection runs before the buffer moves, so it always sees the window
//! starting at the next byte to be delivered. At end of input the buffer
//! is drained through the same steps.
//!
//! Struct candidates are tried in declaration order. Within one struct the
//! order is: static offset, chunk magic, implicit repeat, follow, stored
//! offset. A struct that fails is remembered in a miss cache that is only
//! cleared when some struct opens; `follow` candidates in the miss cache
//! are skipped.

use tracing::{debug, trace, warn};

use super::lookahead::Lookahead;
use super::output::{ByteTag, FieldTag, ParseOutput, ParseWarning, StructTag};
use super::storage::{Annotation, AnnotationLog, FieldHistory, StructOccurrence};
use super::{ParseError, ParseResult};
use crate::expr::{Bindings, SpanInfo};
use crate::grammar::{
    ByteOrder, FieldDef, FieldId, FieldPosition, FieldRef, Format, Grammar, Guard, Placement,
    RepeatCount, StructId, Summarize, TermStyle,
};
use crate::value::FieldValue;

/// One step's worth of input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Byte(u8),
    /// End of input: push nothing, force the oldest buffered byte out
    Drain,
}

/// The open struct instance
#[derive(Debug, Clone)]
struct StructSpan {
    id: StructId,
    start: usize,
    consumed: usize,
    /// Fields not yet selected, in declaration order
    remaining: Vec<FieldId>,
}

/// The open field instance
#[derive(Debug, Clone)]
struct FieldSpan {
    id: FieldId,
    fid: usize,
    start: usize,
    consumed: usize,
    value: FieldValue,
}

/// Most recently selected field of the open struct
#[derive(Debug, Clone, Copy)]
struct LastField {
    id: FieldId,
    /// False when the field was selected but found absent
    opened: bool,
}

/// A grammar-driven parse session
#[derive(Debug)]
pub struct FileParser {
    grammar: Grammar,
    lookahead: Lookahead,
    /// Offset of the next byte to be delivered
    offset: usize,
    open_struct: Option<StructSpan>,
    open_field: Option<FieldSpan>,
    last_struct: Option<StructId>,
    /// Offset at which `last_struct` was opened
    last_struct_start: Option<usize>,
    last_field: Option<LastField>,
    /// Struct miss cache, indexed by struct id
    misses: Vec<bool>,
    /// Closed instances per struct
    struct_counts: Vec<usize>,
    /// Opened instances per field, reset when the parent struct opens
    field_counts: Vec<usize>,
    history: FieldHistory,
    log: AnnotationLog,
    tags: Vec<ByteTag>,
    warnings: Vec<ParseWarning>,
}

impl FileParser {
    /// Create a session for `grammar` with every counter at zero
    pub fn new(grammar: Grammar) -> Self {
        let structs = grammar.struct_count();
        let fields = grammar.field_count();
        Self {
            grammar,
            lookahead: Lookahead::new(),
            offset: 0,
            open_struct: None,
            open_field: None,
            last_struct: None,
            last_struct_start: None,
            last_field: None,
            misses: vec![false; structs],
            struct_counts: vec![0; structs],
            field_counts: vec![0; fields],
            history: FieldHistory::new(fields),
            log: AnnotationLog::new(),
            tags: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Number of bytes delivered so far (excludes bytes still buffered)
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn tags(&self) -> &[ByteTag] {
        &self.tags
    }

    pub fn history(&self) -> &FieldHistory {
        &self.history
    }

    pub fn log(&self) -> &AnnotationLog {
        &self.log
    }

    /// Process a chunk of input. Chunk boundaries do not affect the result.
    pub fn feed(&mut self, data: &[u8]) -> ParseResult<()> {
        self.tags.reserve(data.len());
        for &byte in data {
            self.step(Feed::Byte(byte))?;
        }
        Ok(())
    }

    /// Drain the lookahead buffer and produce the final output
    pub fn finish(mut self) -> ParseResult<ParseOutput> {
        while !self.lookahead.is_empty() {
            self.step(Feed::Drain)?;
        }

        if let Some(span) = &self.open_struct {
            let name = self.grammar.struct_name(span.id).to_string();
            let sid = self.struct_counts[span.id.0];
            warn!(
                "struct '{}' instance {} unterminated at end of input",
                name, sid
            );
            self.warnings.push(ParseWarning::Unterminated {
                name,
                sid,
                consumed: span.consumed,
            });
        }

        debug!(
            "parse finished: {} bytes, {} records, {} structs",
            self.tags.len(),
            self.log.len(),
            self.log.occurrences().len()
        );

        Ok(ParseOutput {
            grammar: self.grammar,
            tags: self.tags,
            log: self.log,
            history: self.history,
            warnings: self.warnings,
        })
    }

    /// Process a single step
    fn step(&mut self, feed: Feed) -> ParseResult<()> {
        self.select()?;

        let delivered = match feed {
            Feed::Byte(byte) => self.lookahead.push(byte),
            Feed::Drain => self.lookahead.evict(),
        };
        let Some(byte) = delivered else {
            return Ok(());
        };

        self.acknowledge(byte);
        self.check_termination(byte)
    }

    fn select(&mut self) -> ParseResult<()> {
        // A struct whose fields all turn out absent closes during field
        // selection; struct selection then gets one more try at this offset.
        for _ in 0..2 {
            if self.open_struct.is_none() && !self.select_struct()? {
                return Ok(());
            }
            if self.open_field.is_none() {
                self.select_field()?;
            }
            if self.open_struct.is_some() {
                return Ok(());
            }
        }
        Ok(())
    }

    // ---- struct selection ----

    fn select_struct(&mut self) -> ParseResult<bool> {
        let peek = self.lookahead.peek();
        for idx in 0..self.grammar.struct_count() {
            let id = StructId(idx);
            if self.struct_matches(id, peek) {
                self.open_struct(id)?;
                return Ok(true);
            }
            trace!(
                "adding '{}' to struct misses at {}",
                self.grammar.struct_name(id),
                self.offset
            );
            self.misses[idx] = true;
        }
        Ok(false)
    }

    fn struct_matches(&self, id: StructId, peek: Option<u8>) -> bool {
        // Never reopen a struct where it was last opened: it made no progress
        if self.last_struct == Some(id) && self.last_struct_start == Some(self.offset) {
            return false;
        }

        let def = self.grammar.struct_def(id);
        match &def.placement {
            Placement::Static { offset } if *offset == self.offset => return true,
            Placement::Chunk { magic } if self.lookahead.matches(magic) => return true,
            _ => {}
        }

        if self.struct_repeats(id, peek) {
            return true;
        }

        match &def.placement {
            Placement::Follow { follows } => {
                !self.misses[id.0]
                    && self.last_struct.is_some_and(|last| follows.contains(&last))
                    && def.first_byte.accepts(peek)
            }
            Placement::Stored { offset_ref } => self
                .history
                .resolve(offset_ref)
                .iter()
                .any(|v| v.as_number() == Some(self.offset as i64)),
            _ => false,
        }
    }

    /// Implicit repeat: the same struct again while its count allows
    fn struct_repeats(&self, id: StructId, peek: Option<u8>) -> bool {
        let def = self.grammar.struct_def(id);
        let Some(count) = &def.count else {
            return false;
        };
        self.last_struct == Some(id)
            && def.first_byte.accepts(peek)
            && self
                .eval_count(count)
                .is_some_and(|n| n > self.struct_counts[id.0] as i64)
    }

    fn open_struct(&mut self, id: StructId) -> ParseResult<()> {
        if let Some(open) = &self.open_struct {
            return Err(ParseError::StructAlreadyOpen {
                open: self.grammar.struct_name(open.id).to_string(),
                attempted: self.grammar.struct_name(id).to_string(),
                offset: self.offset,
            });
        }

        debug!(
            "opening struct '{}' instance {} at {}",
            self.grammar.struct_name(id),
            self.struct_counts[id.0],
            self.offset
        );

        let def = self.grammar.struct_def(id);
        for field in &def.fields {
            self.field_counts[field.0] = 0;
        }
        self.open_struct = Some(StructSpan {
            id,
            start: self.offset,
            consumed: 0,
            remaining: def.fields.clone(),
        });
        self.last_struct = Some(id);
        self.last_struct_start = Some(self.offset);
        self.last_field = None;
        self.misses.iter_mut().for_each(|m| *m = false);
        Ok(())
    }

    fn close_struct(&mut self) {
        let Some(span) = self.open_struct.take() else {
            return;
        };
        let def = self.grammar.struct_def(span.id);
        let sid = self.struct_counts[span.id.0];
        self.struct_counts[span.id.0] += 1;

        debug!(
            "closing struct '{}' instance {} after {} bytes",
            def.name, sid, span.consumed
        );

        if let Some(expected) = def.check_size {
            if expected != span.consumed {
                warn!(
                    "struct '{}' instance {} is {} bytes, expected {}",
                    def.name, sid, span.consumed, expected
                );
                self.warnings.push(ParseWarning::SizeMismatch {
                    name: def.name.clone(),
                    sid,
                    expected,
                    actual: span.consumed,
                });
            }
        }

        self.log.register_struct(StructOccurrence {
            struct_id: span.id,
            sid,
            offset: span.start,
            len: span.consumed,
        });
    }

    // ---- field selection ----

    fn select_field(&mut self) -> ParseResult<()> {
        if self.last_field_repeats() {
            if let Some(last) = self.last_field {
                trace!("repeating field '{}'", self.grammar.field_name(last.id));
                return self.open_field(last.id);
            }
        }

        let Some(span) = &self.open_struct else {
            return Ok(());
        };
        let consumed = span.consumed;

        for id in span.remaining.clone() {
            let positioned = match self.grammar.field(id).position {
                FieldPosition::Offset(offset) => offset == consumed,
                FieldPosition::Follows(prev) => self.last_field.is_some_and(|l| l.id == prev),
            };
            if !positioned {
                continue;
            }

            self.remove_remaining(id);
            if self.field_absent(id) {
                debug!("field '{}' absent at {}", self.grammar.field_name(id), self.offset);
                self.last_field = Some(LastField { id, opened: false });
                continue;
            }

            self.last_field = Some(LastField { id, opened: true });
            return self.open_field(id);
        }

        if self.struct_exhausted() {
            self.close_struct();
        }
        Ok(())
    }

    fn remove_remaining(&mut self, id: FieldId) {
        if let Some(span) = self.open_struct.as_mut() {
            span.remaining.retain(|f| *f != id);
        }
    }

    /// No fields left and the last one does not repeat
    fn struct_exhausted(&self) -> bool {
        self.open_struct
            .as_ref()
            .is_some_and(|s| s.remaining.is_empty())
            && !self.last_field_repeats()
    }

    fn last_field_repeats(&self) -> bool {
        self.last_field
            .is_some_and(|l| l.opened && self.field_repeats(l.id))
    }

    fn field_repeats(&self, id: FieldId) -> bool {
        let Some(count) = &self.grammar.field(id).count else {
            return false;
        };
        self.eval_count(count)
            .is_some_and(|n| n > self.field_counts[id.0] as i64)
    }

    /// A field whose count is zero or whose guard fails never appears
    fn field_absent(&self, id: FieldId) -> bool {
        let def = self.grammar.field(id);
        if let Some(count) = &def.count {
            if self.eval_count(count).is_some_and(|n| n <= 0) {
                return true;
            }
        }
        match &def.guard {
            Some(guard) => !self.guard_passes(guard),
            None => false,
        }
    }

    fn open_field(&mut self, id: FieldId) -> ParseResult<()> {
        let def = self.grammar.field(id);
        if !self.open_struct.as_ref().is_some_and(|s| s.id == def.parent) {
            return Err(ParseError::FieldWithoutStruct {
                field: def.name.clone(),
                offset: self.offset,
            });
        }
        if let Some(open) = &self.open_field {
            return Err(ParseError::FieldAlreadyOpen {
                open: self.grammar.field_name(open.id).to_string(),
                attempted: def.name.clone(),
                offset: self.offset,
            });
        }

        let fid = self.field_counts[id.0];
        self.field_counts[id.0] += 1;
        trace!("opening field '{}' instance {} at {}", def.name, fid, self.offset);

        let value = match def.format {
            Format::String => FieldValue::Text(String::new()),
            _ => FieldValue::Number(0),
        };
        self.open_field = Some(FieldSpan {
            id,
            fid,
            start: self.offset,
            consumed: 0,
            value,
        });
        Ok(())
    }

    // ---- byte processing ----

    /// Fold a delivered byte into the open field and tag it
    fn acknowledge(&mut self, byte: u8) {
        let field_tag = self.open_field.as_ref().map(|f| FieldTag {
            id: f.id,
            fid: f.fid,
        });
        let span = self.open_struct.as_ref().map(|s| StructTag {
            id: s.id,
            sid: self.struct_counts[s.id.0],
            field: field_tag,
        });
        let tag = match span {
            Some(span) => ByteTag {
                byte,
                span: Some(span),
                hidden: field_tag.is_some_and(|f| self.grammar.field(f.id).hidden),
            },
            None => ByteTag::free(byte),
        };
        self.tags.push(tag);

        if let Some(field) = self.open_field.as_mut() {
            accumulate(self.grammar.field(field.id), field, byte);
            field.consumed += 1;
        }
        if let Some(span) = self.open_struct.as_mut() {
            span.consumed += 1;
        }
        self.offset += 1;
    }

    fn check_termination(&mut self, byte: u8) -> ParseResult<()> {
        let Some(field) = &self.open_field else {
            return Ok(());
        };
        let done = match self.grammar.field(field.id).term {
            TermStyle::Static { size } => field.consumed >= size,
            TermStyle::OnNull => byte == 0,
            TermStyle::Var => byte & 0x80 == 0,
        };
        if done {
            self.close_field();
        }
        Ok(())
    }

    fn close_field(&mut self) {
        let Some(span) = self.open_field.take() else {
            return;
        };
        let def = self.grammar.field(span.id);
        let parent = self.grammar.struct_def(def.parent);
        let sid = self.struct_counts[def.parent.0];

        let len = match def.term {
            TermStyle::OnNull => span.consumed.saturating_sub(1),
            _ => span.consumed,
        };

        let value = if def.value_expr.is_identity() {
            span.value
        } else {
            let info = self.span_info();
            let transformed = def
                .value_expr
                .eval(&Bindings::new(Some(&span.value), info));
            match transformed {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "field '{}': value transform '{}' failed: {}",
                        def.name, def.value_expr, e
                    );
                    span.value
                }
            }
        };

        debug!(
            "closing field '{}' instance {} at {}: {}",
            def.name, span.fid, span.start, value
        );

        self.log.annotate(Annotation {
            offset: span.start,
            len,
            struct_id: def.parent,
            sid,
            field_id: span.id,
            fid: span.fid,
            content: Some(value.clone()),
            byte_order: def.byte_order,
            format: def.format,
            summarize: Summarize::effective(parent.summarize, def.summarize),
        });
        self.history.record(span.id, value);

        // A sole remaining field that can never appear is dropped now so
        // the struct can close without waiting on it
        let sole = self
            .open_struct
            .as_ref()
            .and_then(|s| (s.remaining.len() == 1).then(|| s.remaining[0]));
        if let Some(id) = sole {
            if self.field_absent(id) {
                debug!("discarding field '{}'", self.grammar.field_name(id));
                self.remove_remaining(id);
            }
        }

        if self.struct_exhausted() {
            self.close_struct();
        }
    }

    // ---- references and expressions ----

    fn span_info(&self) -> Option<SpanInfo> {
        self.open_struct.as_ref().map(|s| SpanInfo {
            size: s.consumed,
            instance: self.struct_counts[s.id.0],
        })
    }

    /// Current value behind a reference, honoring `#pin`
    fn lookup(&self, reference: &FieldRef) -> Option<&FieldValue> {
        let field = reference.target?;
        match reference.pin.map(|pin| self.struct_counts[pin.0]) {
            Some(n) if n > 0 => self.history.get(field).get(n - 1),
            _ => self.history.latest(field),
        }
    }

    fn eval_count(&self, count: &RepeatCount) -> Option<i64> {
        let value = self.lookup(&count.field)?;
        match count.expr.eval_int(&Bindings::new(Some(value), self.span_info())) {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("count '{}' on {} failed: {}", count.expr, count.field.path, e);
                None
            }
        }
    }

    fn guard_passes(&self, guard: &Guard) -> bool {
        let Some(value) = self.lookup(&guard.field) else {
            return false;
        };
        match guard.expr.eval(&Bindings::new(Some(value), self.span_info())) {
            Ok(result) => result.is_truthy(),
            Err(e) => {
                warn!("guard '{}' on {} failed: {}", guard.expr, guard.field.path, e);
                false
            }
        }
    }
}

/// Fold one content byte into a field value
fn accumulate(def: &FieldDef, span: &mut FieldSpan, byte: u8) {
    if def.term == TermStyle::OnNull && byte == 0 {
        return;
    }
    match &mut span.value {
        FieldValue::Text(text) => text.push(char::from(byte)),
        FieldValue::Number(n) => {
            let (bits, width) = match def.term {
                TermStyle::Var => (i64::from(byte & 0x7f), 7),
                _ => (i64::from(byte), 8),
            };
            *n = match def.byte_order {
                ByteOrder::BigEndian => (*n << width) | bits,
                ByteOrder::LittleEndian => {
                    let shift = u32::try_from(span.consumed)
                        .ok()
                        .and_then(|c| c.checked_mul(width));
                    *n | shift.and_then(|s| bits.checked_shl(s)).unwrap_or(0)
                }
            };
        }
    }
}

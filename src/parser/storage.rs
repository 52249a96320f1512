//! Parse storage
//!
//! Two append-only stores filled as fields close:
//!
//! - [`FieldHistory`]: every value recorded for each field, in parse order,
//!   read back by repeat counts, presence guards and stored offsets
//! - [`AnnotationLog`]: the ordered byte-range records a summary renderer
//!   walks, shaped by each field's summarize policy, plus one
//!   [`StructOccurrence`] per closed struct

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use crate::grammar::{ByteOrder, FieldId, FieldRef, Format, StructId, Summarize};
use crate::value::FieldValue;

/// Every value ever produced per field, indexed by field id
#[derive(Debug, Clone, Default)]
pub struct FieldHistory {
    values: Vec<Vec<FieldValue>>,
}

impl FieldHistory {
    pub fn new(field_count: usize) -> Self {
        Self {
            values: vec![Vec::new(); field_count],
        }
    }

    /// Append a completed field instance's value
    pub fn record(&mut self, field: FieldId, value: FieldValue) {
        trace!("storing field {} value {}", field.0, value);
        if let Some(values) = self.values.get_mut(field.0) {
            values.push(value);
        }
    }

    /// All values recorded for a field (empty if none)
    pub fn get(&self, field: FieldId) -> &[FieldValue] {
        self.values.get(field.0).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Values behind a reference; unresolved references come back empty
    pub fn resolve(&self, reference: &FieldRef) -> &[FieldValue] {
        match reference.target {
            Some(field) => self.get(field),
            None => &[],
        }
    }

    pub fn latest(&self, field: FieldId) -> Option<&FieldValue> {
        self.get(field).last()
    }

    /// Total number of recorded values
    pub fn len(&self) -> usize {
        self.values.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One field record of the annotation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    /// Absolute offset of the first byte
    pub offset: usize,
    /// Content length in bytes (grows for summed runs)
    pub len: usize,
    pub struct_id: StructId,
    pub sid: usize,
    pub field_id: FieldId,
    pub fid: usize,
    /// Transformed content; `None` once the record represents a run
    pub content: Option<FieldValue>,
    pub byte_order: ByteOrder,
    pub format: Format,
    /// Effective policy after field-over-struct resolution
    pub summarize: Summarize,
}

/// A closed struct instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructOccurrence {
    pub struct_id: StructId,
    pub sid: usize,
    pub offset: usize,
    /// Bytes consumed by the struct
    pub len: usize,
}

/// Ordered log of field records and struct occurrences
#[derive(Debug, Clone, Default)]
pub struct AnnotationLog {
    records: Vec<Annotation>,
    occurrences: Vec<StructOccurrence>,
    /// Struct id to the first struct instance that produced a `first_only` record
    first_seen: HashMap<StructId, usize>,
}

impl AnnotationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the record's summarize policy. Returns whether the log changed.
    pub fn annotate(&mut self, record: Annotation) -> bool {
        match record.summarize {
            Summarize::None | Summarize::NoFields => false,
            Summarize::FirstOnly => {
                let first = *self.first_seen.entry(record.struct_id).or_insert(record.sid);
                if first != record.sid {
                    trace!("suppressing first_only record at {}", record.offset);
                    return false;
                }
                self.records.push(record);
                true
            }
            Summarize::SumRepeat => {
                if let Some(last) = self.records.last_mut() {
                    if last.struct_id == record.struct_id
                        && last.sid == record.sid
                        && last.field_id == record.field_id
                    {
                        last.len += record.len;
                        last.content = None;
                        return true;
                    }
                }
                self.records.push(record);
                true
            }
            Summarize::Default => {
                self.records.push(record);
                true
            }
        }
    }

    /// Register a closed struct instance
    pub fn register_struct(&mut self, occurrence: StructOccurrence) {
        self.occurrences.push(occurrence);
    }

    /// Field records in offset order
    pub fn records(&self) -> &[Annotation] {
        &self.records
    }

    /// Closed struct instances in close order
    pub fn occurrences(&self) -> &[StructOccurrence] {
        &self.occurrences
    }

    /// The record starting at `offset`
    pub fn get(&self, offset: usize) -> Option<&Annotation> {
        self.records
            .binary_search_by_key(&offset, |r| r.offset)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Records belonging to one struct instance
    pub fn records_for(&self, struct_id: StructId, sid: usize) -> impl Iterator<Item = &Annotation> {
        self.records
            .iter()
            .filter(move |r| r.struct_id == struct_id && r.sid == sid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: usize, field: usize, sid: usize, summarize: Summarize) -> Annotation {
        Annotation {
            offset,
            len: 1,
            struct_id: StructId(0),
            sid,
            field_id: FieldId(field),
            fid: 0,
            content: Some(FieldValue::Number(offset as i64)),
            byte_order: ByteOrder::BigEndian,
            format: Format::Number,
            summarize,
        }
    }

    #[test]
    fn test_history_append_and_resolve() {
        let mut history = FieldHistory::new(2);
        history.record(FieldId(1), FieldValue::Number(3));
        history.record(FieldId(1), FieldValue::Number(4));
        assert_eq!(history.get(FieldId(1)), &[FieldValue::Number(3), FieldValue::Number(4)]);
        assert_eq!(history.latest(FieldId(1)), Some(&FieldValue::Number(4)));
        assert!(history.get(FieldId(0)).is_empty());
        assert!(history.get(FieldId(9)).is_empty());
        assert!(history.resolve(&FieldRef::unresolved("a/b")).is_empty());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_default_appends() {
        let mut log = AnnotationLog::new();
        assert!(log.annotate(record(0, 0, 0, Summarize::Default)));
        assert!(log.annotate(record(1, 0, 0, Summarize::Default)));
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).map(|r| r.offset), Some(1));
        assert!(log.get(5).is_none());
    }

    #[test]
    fn test_none_suppresses() {
        let mut log = AnnotationLog::new();
        assert!(!log.annotate(record(0, 0, 0, Summarize::None)));
        assert!(!log.annotate(record(1, 0, 0, Summarize::NoFields)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_sum_repeat_merges_runs() {
        let mut log = AnnotationLog::new();
        for offset in 0..5 {
            log.annotate(record(offset, 1, 0, Summarize::SumRepeat));
        }
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].len, 5);
        assert_eq!(log.records()[0].content, None);

        // A different struct instance starts a new run
        log.annotate(record(5, 1, 1, Summarize::SumRepeat));
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[1].content, Some(FieldValue::Number(5)));
    }

    #[test]
    fn test_first_only_keeps_first_struct_instance() {
        let mut log = AnnotationLog::new();
        assert!(log.annotate(record(0, 0, 2, Summarize::FirstOnly)));
        assert!(log.annotate(record(1, 1, 2, Summarize::FirstOnly)));
        assert!(!log.annotate(record(2, 0, 3, Summarize::FirstOnly)));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_records_for_instance() {
        let mut log = AnnotationLog::new();
        log.annotate(record(0, 0, 0, Summarize::Default));
        log.annotate(record(1, 0, 1, Summarize::Default));
        log.annotate(record(2, 1, 1, Summarize::Default));
        assert_eq!(log.records_for(StructId(0), 1).count(), 2);
    }
}

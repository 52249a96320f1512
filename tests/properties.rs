//! Property-based tests for the parser
//!
//! Structural invariants that must hold for any input bytes: every byte is
//! tagged exactly once, results do not depend on how the input is split
//! into chunks, and repeated runs are identical.

use proptest::prelude::*;

use bincarve::grammar::Grammar;
use bincarve::parser::{parse, FileParser, ParseOutput};

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 128,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    }
}

/// Exercises every placement and termination rule at once
const MIXED_GRAMMAR: &str = r#"
structs:
  header:
    offset: 0
    fields:
      count: { size: 1 }
      offsets: { size: 1, count_field: count, count_mod: "count_field % 4" }
  chunk:
    offset_magic: CHNK
    fields:
      magic: { size: 4, format: string }
      name: { term_style: on_null, format: string }
  record:
    follows: [header, record]
    first_byte_lt: 128
    count_field: header/count
    fields:
      kind: { size: 1 }
      len: { term_style: var }
      body: { size: 1, count_field: len, count_mod: "count_field % 8", summarize: sum_repeat }
      extra: { size: 2, match_field: kind, match_mod: "match_field & 1", lsbf: true }
  pointed:
    offset_field: header/offsets
    fields:
      byte: { size: 1 }
"#;

fn grammar() -> Grammar {
    Grammar::from_yaml(MIXED_GRAMMAR).unwrap()
}

fn run(input: &[u8]) -> ParseOutput {
    parse(grammar(), input).unwrap()
}

proptest! {
    #![proptest_config(config())]

    /// One tag per input byte, carrying that byte
    #[test]
    fn every_byte_tagged_once(input in prop::collection::vec(any::<u8>(), 0..512)) {
        let out = run(&input);
        prop_assert_eq!(out.tags().len(), input.len());
        for (tag, byte) in out.tags().iter().zip(&input) {
            prop_assert_eq!(tag.byte, *byte);
        }
    }

    /// A struct instance covers one contiguous run of bytes
    #[test]
    fn instances_are_contiguous(input in prop::collection::vec(any::<u8>(), 0..512)) {
        let out = run(&input);
        let mut closed = std::collections::HashSet::new();
        let mut current = None;
        for tag in out.tags() {
            let key = tag.span.map(|s| (s.id, s.sid));
            if key != current {
                if let Some(prev) = current {
                    closed.insert(prev);
                }
                if let Some(k) = key {
                    prop_assert!(!closed.contains(&k), "instance {:?} reopened", k);
                }
                current = key;
            }
        }
    }

    /// Chunk boundaries do not change the result
    #[test]
    fn chunking_is_transparent(
        input in prop::collection::vec(any::<u8>(), 0..256),
        chunk in 1usize..17,
    ) {
        let whole = run(&input);

        let mut parser = FileParser::new(grammar());
        for piece in input.chunks(chunk) {
            parser.feed(piece).unwrap();
        }
        let split = parser.finish().unwrap();

        prop_assert_eq!(split.tags(), whole.tags());
        prop_assert_eq!(split.log().records(), whole.log().records());
        prop_assert_eq!(split.warnings(), whole.warnings());
    }

    /// Same grammar, same bytes, same output
    #[test]
    fn parsing_is_deterministic(input in prop::collection::vec(any::<u8>(), 0..256)) {
        let a = run(&input);
        let b = run(&input);
        prop_assert_eq!(a.tags(), b.tags());
        prop_assert_eq!(a.log().records(), b.log().records());
        prop_assert_eq!(a.log().occurrences(), b.log().occurrences());
    }

    /// Annotation records stay inside the input and never overlap
    #[test]
    fn records_within_bounds(input in prop::collection::vec(any::<u8>(), 0..512)) {
        let out = run(&input);
        let mut end = 0;
        for record in out.log().records() {
            prop_assert!(record.offset >= end);
            end = record.offset + record.len;
            prop_assert!(end <= input.len());
        }
    }

    /// Chunk magics are found anywhere, including the last four bytes
    #[test]
    fn chunk_magic_found(
        prefix in prop::collection::vec(0x80u8..0xff, 1..64),
    ) {
        let mut input = prefix;
        input[0] = 0;
        input.extend_from_slice(b"CHNK");
        let out = run(&input);
        prop_assert_eq!(out.values("chunk", "magic").len(), 1);
    }
}

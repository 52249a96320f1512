//! End-to-end tests against realistic file layouts
//!
//! Each test loads a YAML grammar, parses a hand-built file and checks the
//! byte tags, field history, annotation log and rendered output.

use bincarve::grammar::{self, Grammar};
use bincarve::parser::{parse, FileParser, ParseOutput, ParseWarning};
use bincarve::render::{self, PageOptions};
use bincarve::FieldValue;

// ============================================================================
// WAV (RIFF chunks, little-endian fields, summed sample runs)
// ============================================================================

const WAV_GRAMMAR: &str = r#"
structs:
  riff_header:
    offset_magic: RIFF
    fields:
      chunk_id: { size: 4, format: string }
      chunk_size: { size: 4, lsbf: true }
      wave_id: { size: 4, format: string }
  fmt_chunk:
    offset_magic: "fmt "
    check_size: 24
    fields:
      chunk_id: { size: 4, format: string }
      chunk_size: { size: 4, lsbf: true }
      audio_format: { size: 2, lsbf: true }
      channels: { size: 2, lsbf: true }
      sample_rate: { size: 4, lsbf: true }
      byte_rate: { size: 4, lsbf: true }
      block_align: { size: 2, lsbf: true }
      bits_per_sample: { size: 2, lsbf: true }
  data_chunk:
    offset_magic: data
    fields:
      chunk_id: { size: 4, format: string }
      chunk_size: { size: 4, lsbf: true }
      samples: { size: 1, count_field: chunk_size, summarize: sum_repeat, hidden: true }
"#;

fn wav_file() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&40u32.to_le_bytes());
    data.extend_from_slice(b"WAVE");

    data.extend_from_slice(b"fmt ");
    data.extend_from_slice(&16u32.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&2u16.to_le_bytes());
    data.extend_from_slice(&44100u32.to_le_bytes());
    data.extend_from_slice(&176400u32.to_le_bytes());
    data.extend_from_slice(&4u16.to_le_bytes());
    data.extend_from_slice(&16u16.to_le_bytes());

    data.extend_from_slice(b"data");
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(&[0xd1, 0xd2, 0xd3, 0xd4]);
    data
}

fn parse_wav() -> ParseOutput {
    let grammar = Grammar::from_yaml(WAV_GRAMMAR).unwrap();
    parse(grammar, &wav_file()).unwrap()
}

#[test]
fn test_wav_fields() {
    let out = parse_wav();

    assert_eq!(out.values("riff_header", "chunk_id"), &[FieldValue::from("RIFF")]);
    assert_eq!(out.values("riff_header", "chunk_size"), &[FieldValue::Number(40)]);
    assert_eq!(out.values("riff_header", "wave_id"), &[FieldValue::from("WAVE")]);
    assert_eq!(out.values("fmt_chunk", "channels"), &[FieldValue::Number(2)]);
    assert_eq!(out.values("fmt_chunk", "sample_rate"), &[FieldValue::Number(44100)]);
    assert_eq!(out.values("fmt_chunk", "bits_per_sample"), &[FieldValue::Number(16)]);
    assert_eq!(out.values("data_chunk", "samples").len(), 4);
}

#[test]
fn test_wav_coverage() {
    let out = parse_wav();
    assert_eq!(out.tags().len(), 48);
    assert_eq!(out.free_bytes(), 0);
    assert!(out.warnings().is_empty());

    let offsets: Vec<usize> = out.log().occurrences().iter().map(|o| o.offset).collect();
    assert_eq!(offsets, vec![0, 12, 36]);
}

#[test]
fn test_wav_sample_run_summarized() {
    let out = parse_wav();
    let records = out.log().records();
    assert_eq!(records.len(), 3 + 8 + 3);

    let run = records.last().unwrap();
    assert_eq!(run.offset, 44);
    assert_eq!(run.len, 4);
    assert_eq!(run.content, None);
}

#[test]
fn test_wav_html_hides_samples() {
    let out = parse_wav();
    let mut buf = Vec::new();
    render::write_page(&mut buf, &out, &PageOptions::default()).unwrap();
    let html = String::from_utf8(buf).unwrap();

    assert!(html.contains("hex-struct-riff-header-0"));
    assert!(html.contains("hex-struct-fmt-chunk-0"));
    assert!(!html.contains(">d3<"));
    assert!(html.contains("<span class=\"hex-contents\">44100</span>"));
}

#[test]
fn test_wav_size_check() {
    let grammar = Grammar::from_yaml(&WAV_GRAMMAR.replace("check_size: 24", "check_size: 20"))
        .unwrap();
    let out = parse(grammar, &wav_file()).unwrap();
    assert_eq!(
        out.warnings(),
        &[ParseWarning::SizeMismatch {
            name: "fmt_chunk".to_string(),
            sid: 0,
            expected: 20,
            actual: 24,
        }]
    );
}

// ============================================================================
// MIDI-style (variable-length deltas, self-following structs)
// ============================================================================

const MIDI_GRAMMAR: &str = r#"
structs:
  header:
    offset_magic: MThd
    fields:
      chunk_id: { size: 4, format: string }
      length: { size: 4 }
      format: { size: 2 }
      tracks: { size: 2 }
      division: { size: 2 }
  track:
    offset_magic: MTrk
    fields:
      chunk_id: { size: 4, format: string }
      length: { size: 4 }
  event:
    follows: [track, event]
    summarize: first_only
    fields:
      delta: { term_style: var }
      status: { size: 1 }
      note: { size: 1 }
      velocity: { size: 1 }
"#;

fn midi_file() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"MThd");
    data.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0, 0x60]);
    data.extend_from_slice(b"MTrk");
    data.extend_from_slice(&[0, 0, 0, 9]);
    data.extend_from_slice(&[0x00, 0x90, 0x3c, 0x40]);
    data.extend_from_slice(&[0x81, 0x00, 0x80, 0x3c, 0x00]);
    data
}

#[test]
fn test_midi_events() {
    let grammar = Grammar::from_yaml(MIDI_GRAMMAR).unwrap();
    let out = parse(grammar, &midi_file()).unwrap();

    assert_eq!(out.values("header", "division"), &[FieldValue::Number(0x60)]);
    assert_eq!(
        out.values("event", "delta"),
        &[FieldValue::Number(0), FieldValue::Number(128)]
    );
    assert_eq!(
        out.values("event", "status"),
        &[FieldValue::Number(0x90), FieldValue::Number(0x80)]
    );
    assert_eq!(out.free_bytes(), 0);
}

#[test]
fn test_midi_first_only_summary() {
    let grammar = Grammar::from_yaml(MIDI_GRAMMAR).unwrap();
    let out = parse(grammar, &midi_file()).unwrap();

    let event = out.grammar().find_struct("event").unwrap();
    let event_records: Vec<_> = out
        .log()
        .records()
        .iter()
        .filter(|r| r.struct_id == event)
        .collect();
    assert_eq!(event_records.len(), 4);
    assert!(event_records.iter().all(|r| r.sid == 0));

    let text = render::text_summary(&out);
    assert!(text.contains("event #0"));
    assert!(text.contains("event #1"));
}

#[test]
fn test_midi_streaming_matches_whole() {
    let data = midi_file();
    let whole = parse(Grammar::from_yaml(MIDI_GRAMMAR).unwrap(), &data).unwrap();

    let mut parser = FileParser::new(Grammar::from_yaml(MIDI_GRAMMAR).unwrap());
    for chunk in data.chunks(3) {
        parser.feed(chunk).unwrap();
    }
    let streamed = parser.finish().unwrap();

    assert_eq!(streamed.tags(), whole.tags());
    assert_eq!(streamed.log().records(), whole.log().records());
}

// ============================================================================
// Offset tables (stored offsets, presence guards)
// ============================================================================

const TABLE_GRAMMAR: &str = r#"
structs:
  directory:
    offset: 0
    fields:
      entries: { size: 1 }
      entry_offset: { size: 1, count_field: entries }
  entry:
    offset_field: directory/entry_offset
    fields:
      kind: { size: 1 }
      payload: { size: 2, match_field: kind, match_value: 1 }
"#;

#[test]
fn test_offset_table() {
    let grammar = Grammar::from_yaml(TABLE_GRAMMAR).unwrap();
    let data = [2, 4, 8, 0xff, 1, 0xbe, 0xef, 0xff, 2];
    let out = parse(grammar, &data).unwrap();

    assert_eq!(
        out.values("directory", "entry_offset"),
        &[FieldValue::Number(4), FieldValue::Number(8)]
    );
    assert_eq!(
        out.values("entry", "kind"),
        &[FieldValue::Number(1), FieldValue::Number(2)]
    );
    assert_eq!(out.values("entry", "payload"), &[FieldValue::Number(0xbeef)]);

    assert!(out.tags()[3].is_free());
    assert!(out.tags()[7].is_free());
    assert!(!out.tags()[8].is_free());
}

#[test]
fn test_json_snapshot() {
    let grammar = Grammar::from_yaml(TABLE_GRAMMAR).unwrap();
    let out = parse(grammar, &[1, 2, 1, 0x12, 0x34]).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&out.snapshot().to_json().unwrap()).unwrap();

    assert_eq!(json["tags"].as_array().unwrap().len(), 5);
    assert_eq!(json["tags"][0]["struct"], "directory");
    assert_eq!(json["tags"][3]["field"], "payload");
    assert_eq!(json["history"]["entry/payload"][0], 0x1234);
    assert_eq!(json["structs"][1]["offset"], 2);
}

// ============================================================================
// Grammar files with includes
// ============================================================================

#[test]
fn test_grammar_file_with_include() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("chunks.yaml"),
        r#"
structs:
  riff_header:
    offset_magic: RIFF
    fields:
      chunk_id: { size: 4, format: string }
      chunk_size: { size: 4, lsbf: true }
"#,
    )
    .unwrap();
    let main = dir.path().join("main.yaml");
    std::fs::write(
        &main,
        r#"
include: [chunks.yaml]
structs:
  trailer:
    follows: riff_header
    fields:
      rest: { term_style: on_null, format: string }
"#,
    )
    .unwrap();

    let grammar = grammar::load_file(&main).unwrap();
    let out = parse(grammar, b"RIFF\x02\x00\x00\x00ok\x00").unwrap();
    assert_eq!(out.values("riff_header", "chunk_size"), &[FieldValue::Number(2)]);
    assert_eq!(out.values("trailer", "rest"), &[FieldValue::from("ok")]);
    assert_eq!(out.free_bytes(), 0);
}

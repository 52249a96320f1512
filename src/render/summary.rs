//! Field summaries
//!
//! Groups the annotation log by struct instance and writes one block per
//! instance: a title, the instance's total size, and one row per record.
//! Instances whose records were all suppressed (`no_fields`) still get
//! their header.

use std::collections::HashMap;
use std::io::Write;

use super::{css_name, escape_html, format_content, RenderResult};
use crate::grammar::StructId;
use crate::parser::{Annotation, ParseOutput};

/// One struct instance and its surviving records
#[derive(Debug)]
struct Group<'a> {
    struct_id: StructId,
    sid: usize,
    offset: usize,
    len: usize,
    records: Vec<&'a Annotation>,
}

/// Collect struct instances in file order. Closed instances come from the
/// occurrence list; an instance left open at end of input only has records.
fn groups(output: &ParseOutput) -> Vec<Group<'_>> {
    let mut by_instance: HashMap<(StructId, usize), Vec<&Annotation>> = HashMap::new();
    for record in output.log().records() {
        by_instance
            .entry((record.struct_id, record.sid))
            .or_default()
            .push(record);
    }

    let mut groups: Vec<Group<'_>> = output
        .log()
        .occurrences()
        .iter()
        .map(|o| Group {
            struct_id: o.struct_id,
            sid: o.sid,
            offset: o.offset,
            len: o.len,
            records: by_instance.remove(&(o.struct_id, o.sid)).unwrap_or_default(),
        })
        .collect();

    for ((struct_id, sid), records) in by_instance {
        let offset = records.iter().map(|r| r.offset).min().unwrap_or(0);
        let len = records.iter().map(|r| r.len).sum();
        groups.push(Group {
            struct_id,
            sid,
            offset,
            len,
            records,
        });
    }

    groups.sort_by_key(|g| g.offset);
    groups
}

/// Writes the HTML field summary
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryRenderer;

impl SummaryRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn write<W: Write>(&self, out: &mut W, output: &ParseOutput) -> RenderResult<()> {
        writeln!(out, "<div class=\"hex-fields\">")?;

        for group in groups(output) {
            let name = output.struct_name(group.struct_id);
            let class = format!("hex-struct-{}", css_name(name));
            writeln!(
                out,
                " <div class=\"hex-struct {} {}-{}\">",
                class, class, group.sid
            )?;
            writeln!(
                out,
                "  <h3 class=\"hex-struct-title\">{}</h3>",
                escape_html(name)
            )?;
            writeln!(
                out,
                "  <div class=\"hex-struct-sz\">({} bytes)</div>",
                group.len
            )?;

            for record in &group.records {
                let field = output.field_name(record.field_id);
                writeln!(
                    out,
                    "  <div class=\"spacer\"></div><span class=\"hex-field hex-field-{}\">\
                     <span class=\"hex-label\">{}</span>\
                     <span class=\"hex-sz\">({} bytes)</span>\
                     <span class=\"hex-contents\">{}</span></span>",
                    css_name(field),
                    escape_html(field),
                    record.len,
                    escape_html(&format_content(record.content.as_ref(), record.format)),
                )?;
            }

            writeln!(out, "  <div class=\"spacer\"></div>\n </div>")?;
        }

        writeln!(out, "</div>")?;
        Ok(())
    }
}

/// Plain-text summary, one block per struct instance
pub fn text_summary(output: &ParseOutput) -> String {
    let mut text = String::new();

    for group in groups(output) {
        text.push_str(&format!(
            "{} #{} @ {:#x} ({} bytes)\n",
            output.struct_name(group.struct_id),
            group.sid,
            group.offset,
            group.len
        ));
        for record in &group.records {
            text.push_str(&format!(
                "  {:<16} {:>6} bytes  {}\n",
                output.field_name(record.field_id),
                record.len,
                format_content(record.content.as_ref(), record.format)
            ));
        }
    }

    for warning in output.warnings() {
        text.push_str(&format!("warning: {}\n", warning));
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::parser::parse;

    const TWO: &str = r#"
structs:
  header:
    offset: 0
    fields:
      kind: { size: 1 }
      label: { size: 2, format: string }
  body:
    follows: header
    summarize: no_fields
    fields:
      data: { size: 2 }
"#;

    fn output() -> ParseOutput {
        parse(Grammar::from_yaml(TWO).unwrap(), b"\x07hi\x01\x02").unwrap()
    }

    #[test]
    fn test_summary_groups() {
        let output = output();
        let groups = groups(&output);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len, 3);
        assert_eq!(groups[0].records.len(), 2);
        assert_eq!(groups[1].offset, 3);
        assert!(groups[1].records.is_empty());
    }

    #[test]
    fn test_summary_html() {
        let output = output();
        let mut buf = Vec::new();
        SummaryRenderer::new().write(&mut buf, &output).unwrap();
        let html = String::from_utf8(buf).unwrap();

        assert!(html.contains("hex-struct hex-struct-header hex-struct-header-0"));
        assert!(html.contains("<h3 class=\"hex-struct-title\">body</h3>"));
        assert!(html.contains("<span class=\"hex-contents\">hi</span>"));
        assert!(html.contains("(3 bytes)"));
        assert!(!html.contains("hex-field-data"));
    }

    #[test]
    fn test_text_summary() {
        let text = text_summary(&output());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "header #0 @ 0x0 (3 bytes)");
        assert!(lines[1].starts_with("  kind"));
        assert!(lines[1].ends_with("7"));
        assert!(lines[2].ends_with("hi"));
        assert_eq!(lines[3], "body #0 @ 0x3 (2 bytes)");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_text_summary_unterminated() {
        let output = parse(Grammar::from_yaml(TWO).unwrap(), b"\x07h").unwrap();
        let text = text_summary(&output);
        assert!(text.contains("header #0 @ 0x0 (1 bytes)"));
        assert!(text.contains("warning: struct 'header' instance 0 still open"));
    }
}

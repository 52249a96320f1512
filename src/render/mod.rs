//! Output renderers
//!
//! Turn a finished [`ParseOutput`] into an annotated HTML page: a hex
//! layout with nested struct/field spans, followed by a per-struct field
//! summary. A plain-text summary is available for terminals.

mod hex;
mod summary;

use std::io::Write;

pub use hex::HexRenderer;
pub use summary::{text_summary, SummaryRenderer};

use crate::grammar::Format;
use crate::parser::ParseOutput;
use crate::value::FieldValue;

/// Pulled in ahead of the page script, which relies on it
const JQUERY: &str = r#"<script src="https://code.jquery.com/jquery-3.7.1.min.js" integrity="sha256-/JqT3SQfawRcv/BIHPThkBvs0OEvtFFmqPF/lYI/Cxo=" crossorigin="anonymous"></script>"#;

/// Renderer errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("column length must be at least 1")]
    ZeroColumns,
}

/// Result type for renderers
pub type RenderResult<T> = Result<T, RenderError>;

/// Page-level settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
    /// Bytes per hex line
    pub column_len: usize,
    pub stylesheet: String,
    pub script: String,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            column_len: 20,
            stylesheet: "hex.css".to_string(),
            script: "hex.js".to_string(),
        }
    }
}

/// Write the complete HTML page
pub fn write_page<W: Write>(
    out: &mut W,
    output: &ParseOutput,
    options: &PageOptions,
) -> RenderResult<()> {
    write_header(out, options)?;
    HexRenderer::new(options.column_len)?.write(out, output)?;
    SummaryRenderer::new().write(out, output)?;
    write_footer(out)
}

fn write_header<W: Write>(out: &mut W, options: &PageOptions) -> RenderResult<()> {
    writeln!(out, "<!DOCTYPE html>\n<html>\n<head>")?;
    writeln!(
        out,
        "<link rel=\"stylesheet\" href=\"{}\" />",
        escape_html(&options.stylesheet)
    )?;
    writeln!(out, "{}", JQUERY)?;
    writeln!(out, "<script src=\"{}\"></script>", escape_html(&options.script))?;
    writeln!(out, "</head>\n<body>")?;
    Ok(())
}

fn write_footer<W: Write>(out: &mut W) -> RenderResult<()> {
    writeln!(out, "</body>\n</html>")?;
    Ok(())
}

/// Grammar names become CSS class fragments
pub(crate) fn css_name(name: &str) -> String {
    name.replace('_', "-")
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c if c.is_control() => escaped.push_str(&format!("&#{};", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Display form of a record's content under its format hint
pub(crate) fn format_content(content: Option<&FieldValue>, format: Format) -> String {
    match (content, format) {
        (None, _) => String::new(),
        (Some(FieldValue::Number(n)), Format::Color) => format!("#{:06x}", n & 0xff_ffff),
        (Some(value), _) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::parser::parse;

    #[test]
    fn test_css_name() {
        assert_eq!(css_name("fmt_chunk"), "fmt-chunk");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a & 'b'>"), "&lt;a &amp; &#39;b&#39;&gt;");
        assert_eq!(escape_html("\u{1}"), "&#1;");
    }

    #[test]
    fn test_format_content() {
        assert_eq!(
            format_content(Some(&FieldValue::Number(0xff8000)), Format::Color),
            "#ff8000"
        );
        assert_eq!(format_content(Some(&FieldValue::Number(12)), Format::Number), "12");
        assert_eq!(format_content(None, Format::Number), "");
    }

    #[test]
    fn test_write_page() {
        let grammar = Grammar::from_yaml(
            r#"
structs:
  s:
    offset: 0
    fields:
      a: { size: 2 }
"#,
        )
        .unwrap();
        let output = parse(grammar, &[0x12, 0x34, 0x56]).unwrap();

        let options = PageOptions {
            stylesheet: "custom.css".to_string(),
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_page(&mut buf, &output, &options).unwrap();
        let html = String::from_utf8(buf).unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("href=\"custom.css\""));
        assert!(html.contains("<script src=\"hex.js\"></script>"));
        assert!(html.contains("class=\"hex-layout\""));
        assert!(html.contains("class=\"hex-fields\""));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_zero_columns_rejected() {
        let output = parse(Grammar::default(), &[1]).unwrap();
        let options = PageOptions {
            column_len: 0,
            ..Default::default()
        };
        let mut buf = Vec::new();
        assert!(matches!(
            write_page(&mut buf, &output, &options),
            Err(RenderError::ZeroColumns)
        ));
    }
}

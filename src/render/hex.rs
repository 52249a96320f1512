//! Hex layout
//!
//! One `hex-line` div per `column_len` visible bytes. Struct and field
//! spans nest inside each line and are closed and re-opened across line
//! breaks so every line is well-formed on its own. Hidden bytes are left
//! out of the layout entirely.

use std::io::Write;

use super::{css_name, RenderError, RenderResult};
use crate::grammar::{FieldId, StructId};
use crate::parser::{ByteTag, ParseOutput};

/// Writes the hex layout of a parse
#[derive(Debug, Clone, Copy)]
pub struct HexRenderer {
    column_len: usize,
}

/// Spans currently open in the output
#[derive(Debug, Default)]
struct OpenSpans {
    structure: Option<(StructId, usize)>,
    field: Option<(FieldId, usize)>,
}

impl HexRenderer {
    pub fn new(column_len: usize) -> RenderResult<Self> {
        if column_len == 0 {
            return Err(RenderError::ZeroColumns);
        }
        Ok(Self { column_len })
    }

    pub fn write<W: Write>(&self, out: &mut W, output: &ParseOutput) -> RenderResult<()> {
        writeln!(out, "<div class=\"hex-layout\">")?;
        writeln!(out, " <div class=\"hex-line\">")?;

        let mut open = OpenSpans::default();
        let mut written = 0usize;

        for tag in output.tags() {
            if tag.hidden {
                continue;
            }

            if written != 0 && written % self.column_len == 0 {
                self.break_line(out, output, &open)?;
            }

            let structure = tag.span.map(|s| (s.id, s.sid));
            let field = tag.field().map(|f| (f.id, f.fid));

            // Field spans never outlive their struct span
            if open.field.is_some() && (open.field != field || open.structure != structure) {
                close_span(out, 3)?;
                open.field = None;
            }
            if open.structure.is_some() && open.structure != structure {
                close_span(out, 2)?;
                open.structure = None;
            }

            if open.structure.is_none() {
                if let Some((id, sid)) = structure {
                    open_struct(out, output, id, sid)?;
                    open.structure = structure;
                }
            }
            if open.field.is_none() {
                if let Some((id, _)) = field {
                    open_field(out, output, id)?;
                    open.field = field;
                }
            }

            write_byte(out, tag)?;
            written += 1;
        }

        if open.field.is_some() {
            close_span(out, 3)?;
        }
        if open.structure.is_some() {
            close_span(out, 2)?;
        }

        writeln!(out, " </div>\n</div>")?;
        Ok(())
    }

    fn break_line<W: Write>(
        &self,
        out: &mut W,
        output: &ParseOutput,
        open: &OpenSpans,
    ) -> RenderResult<()> {
        if open.field.is_some() {
            close_span(out, 3)?;
        }
        if open.structure.is_some() {
            close_span(out, 2)?;
        }

        writeln!(out, " </div>\n <div class=\"hex-line\">")?;

        if let Some((id, sid)) = open.structure {
            open_struct(out, output, id, sid)?;
        }
        if let Some((id, _)) = open.field {
            open_field(out, output, id)?;
        }
        Ok(())
    }
}

fn open_struct<W: Write>(
    out: &mut W,
    output: &ParseOutput,
    id: StructId,
    sid: usize,
) -> RenderResult<()> {
    let name = css_name(output.struct_name(id));
    writeln!(
        out,
        "  <span class=\"hex-struct hex-struct-{} hex-struct-{}-{}\">",
        name, name, sid
    )?;
    Ok(())
}

fn open_field<W: Write>(out: &mut W, output: &ParseOutput, id: FieldId) -> RenderResult<()> {
    writeln!(
        out,
        "   <span class=\"hex-field hex-field-{}\">",
        css_name(output.field_name(id))
    )?;
    Ok(())
}

fn close_span<W: Write>(out: &mut W, indent: usize) -> RenderResult<()> {
    writeln!(out, "{:indent$}</span>", "", indent = indent)?;
    Ok(())
}

fn write_byte<W: Write>(out: &mut W, tag: &ByteTag) -> RenderResult<()> {
    let class = if tag.is_free() { "byte_free" } else { "byte" };
    writeln!(out, "    <span class=\"{}\">{:02x}</span>", class, tag.byte)?;
    Ok(())
}

//! Grammar-driven byte parser
//!
//! A stateful parser that walks a file one byte at a time and classifies
//! every byte as belonging to a struct and field instance, or to nothing.
//! Bytes pass through a small lookahead buffer first so chunk magics and
//! first-byte predicates can see what is coming.

mod lookahead;
mod output;
mod state;
mod storage;

pub use lookahead::{Lookahead, LOOKAHEAD_DEPTH};
pub use output::{
    AnnotationSnapshot, ByteTag, FieldTag, OccurrenceSnapshot, OutputSnapshot, ParseOutput,
    ParseWarning, StructTag, TagSnapshot,
};
pub use state::FileParser;
pub use storage::{Annotation, AnnotationLog, FieldHistory, StructOccurrence};

use crate::grammar::Grammar;

/// Engine invariant violations. These abort the parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("cannot open struct '{attempted}' at offset {offset}: '{open}' is still open")]
    StructAlreadyOpen {
        open: String,
        attempted: String,
        offset: usize,
    },

    #[error("cannot open field '{attempted}' at offset {offset}: '{open}' is still open")]
    FieldAlreadyOpen {
        open: String,
        attempted: String,
        offset: usize,
    },

    #[error("cannot open field '{field}' at offset {offset}: its struct is not open")]
    FieldWithoutStruct { field: String, offset: usize },
}

/// Result type for parse sessions
pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a complete input in one go
pub fn parse(grammar: Grammar, data: &[u8]) -> ParseResult<ParseOutput> {
    let mut parser = FileParser::new(grammar);
    parser.feed(data)?;
    parser.finish()
}

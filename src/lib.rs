//! bincarve: declarative binary file dissector
//!
//! A YAML grammar describes the structs a file format contains and the
//! fields inside them. The parser walks a file byte by byte, assigns every
//! byte to a struct/field instance (or to nothing), records field values
//! for later reference, and the renderers turn the result into an
//! annotated hex view.
//!
//! - `value`: field values
//! - `expr`: the small expression language used by counts, guards and
//!   value transforms
//! - `grammar`: grammar model and YAML loader
//! - `parser`: the byte-driven state machine and its outputs
//! - `render`: HTML hex layout and summaries
//! - `config`: front-end configuration

pub mod config;
pub mod expr;
pub mod grammar;
pub mod parser;
pub mod render;
pub mod value;

pub use grammar::Grammar;
pub use parser::{parse, FileParser, ParseOutput};
pub use value::FieldValue;

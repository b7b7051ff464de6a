//! Decoding of the CLI's newline-delimited JSON stream

mod parser;

pub use parser::parse_message;

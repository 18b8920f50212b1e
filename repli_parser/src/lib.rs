//! RepliKV workload command parser.
#![deny(missing_docs)]

mod ast;
mod token;

pub use ast::Command;
pub use token::{LexItem, Lexer, Span, Token};

/// Parsing of lexed tokens into commands.
pub mod parser;

pub use parser::{parse_line, ParseError};

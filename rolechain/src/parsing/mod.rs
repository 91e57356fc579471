//! Structured output parsing.
//!
//! Model text is untrusted: it may be wrapped in markdown fences, carry raw
//! newlines inside string values, or not be JSON at all. This module turns it
//! into a validated [`StructuredResult`](crate::core::StructuredResult) or a
//! [`ParseError`](crate::errors::ParseError), and offers typed extraction on
//! top of the parsed map.

mod parser;
mod typed;

pub use parser::{
    expected_keys, ExpectedKeys, NewlinePolicy, ParserConfig, StructuredResponseParser,
};
pub use typed::{extract_field, parse_as};

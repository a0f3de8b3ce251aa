//! Lexical layer of the cmodel front-end.
//!
//! Tokens live in a [`SourceArena`](cmodel_foundation::source_arena::SourceArena) and are
//! referred to by ID everywhere else; the preprocessor and parsers only ever shuffle IDs
//! around, never token text.

pub mod lexer;
pub mod sources;
pub mod token;
pub mod token_stream;

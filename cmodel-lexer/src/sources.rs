use std::ops::Range;

use cmodel_foundation::{
    errors::Diagnostic,
    source::{SourceFileId, SourceFileSet},
    source_arena::SourceArena,
    span::{Span, Spanned},
};

use crate::token::{Token, TokenId};

/// Borrowed view over a lexed translation unit: the file set plus the token arena.
///
/// This is what the preprocessor and parsers use to get back at source text.
#[derive(Clone, Copy)]
pub struct LexedSources<'a> {
    pub source_file_set: &'a SourceFileSet,
    pub token_arena: &'a SourceArena<Token>,
}

impl<'a> LexedSources<'a> {
    pub fn source_range(&self, tokens: &impl Spanned<Token>) -> Option<Range<usize>> {
        match tokens.span() {
            Span::Empty => None,
            Span::Spanning { start, end } => {
                let start = self.token_arena.element(start);
                let end = self.token_arena.element(end);
                Some(start.source_range.start..end.source_range.end)
            }
        }
    }

    pub fn source(&self, tokens: &impl Spanned<Token>) -> &'a str {
        match tokens.span() {
            Span::Empty => "",
            Span::Spanning { start, end } => {
                let source_file_id = self.token_arena.source_file_id(start);
                let start = self.token_arena.element(start);
                let end = self.token_arena.element(end);
                &self.source_file_set.get(source_file_id).source
                    [start.source_range.start..end.source_range.end]
            }
        }
    }

    pub fn file_of(&self, tokens: &impl Spanned<Token>) -> Option<SourceFileId> {
        tokens
            .span()
            .start()
            .map(|start| self.token_arena.source_file_id(start))
    }

    /// Returns whether there is no space between the tokens. Distinguishes
    /// `#define F(x)` (function-like) from `#define F (x)` (object-like).
    pub fn tokens_are_hugging_each_other(&self, left: TokenId, right: TokenId) -> bool {
        let left = self.token_arena.element(left);
        let right = self.token_arena.element(right);
        left.source_range.end == right.source_range.start
    }

    /// Resolves a diagnostic's token spans to byte ranges and renders it to stderr.
    pub fn emit_diagnostic_to_stderr(
        &self,
        diagnostic: &Diagnostic<Token>,
    ) -> Result<(), codespan_reporting::files::Error> {
        diagnostic.emit_to_stderr(self.source_file_set, |span| {
            let file = self.file_of(span)?;
            let range = self.source_range(span)?;
            Some((file, range))
        })
    }
}

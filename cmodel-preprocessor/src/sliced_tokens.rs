use cmodel_foundation::source_arena::SourceArena;
use cmodel_lexer::{
    token::{AnyToken, Token, TokenId, TokenKind, TokenSpan},
    token_stream::TokenStream,
};

/// A single element of [`SlicedTokens`]: a contiguous run of arena tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenSlice {
    pub start: TokenId,
    pub end: TokenId,
}

impl TokenSlice {
    pub fn to_span(self) -> TokenSpan {
        TokenSpan::Spanning {
            start: self.start,
            end: self.end,
        }
    }
}

/// The preprocessor's output: the expanded token stream, stored as slices into
/// the token arena. Macro substitution reorders and repeats tokens, so adjacent
/// slices need not be adjacent in the arena.
#[derive(Debug, Clone, Default)]
pub struct SlicedTokens {
    slices: Vec<TokenSlice>,
}

impl SlicedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, slice: TokenSlice) {
        self.slices.push(slice);
    }

    /// Appends a single token, merging it into the previous slice when it happens
    /// to continue that slice's arena run.
    pub fn push_token(&mut self, token: AnyToken) {
        if let Some(last) = self.slices.last_mut() {
            if last.end.successor() == token.id {
                last.end = token.id;
                return;
            }
        }
        self.slices.push(TokenSlice {
            start: token.id,
            end: token.id,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn clear(&mut self) {
        self.slices.clear();
    }

    pub fn stream<'a>(
        &'a self,
        token_arena: &'a SourceArena<Token>,
    ) -> Option<SlicedTokenStream<'a>> {
        Some(SlicedTokenStream {
            token_arena,
            sliced_tokens: self,
            slice_index: 0,
            slice_cursor: self.slices.first()?.start,
        })
    }

    /// All output tokens, in order. Mostly useful for tests and dumps; consumers
    /// should prefer [`SlicedTokens::stream`].
    pub fn iter_tokens<'a>(
        &'a self,
        token_arena: &'a SourceArena<Token>,
    ) -> impl Iterator<Item = AnyToken> + 'a {
        let mut stream = self.stream(token_arena);
        std::iter::from_fn(move || {
            let token = stream.as_mut()?.next_any();
            (token.kind != TokenKind::EndOfFile).then_some(token)
        })
    }
}

pub struct SlicedTokenStream<'a> {
    token_arena: &'a SourceArena<Token>,
    sliced_tokens: &'a SlicedTokens,

    slice_index: u32,
    slice_cursor: TokenId,
}

impl<'a> SlicedTokenStream<'a> {
    fn advance_slice(&mut self) {
        self.slice_index += 1;
        if let Some(slice) = self.sliced_tokens.slices.get(self.slice_index as usize) {
            self.slice_cursor = slice.start;
        }
    }
}

impl<'a> TokenStream for SlicedTokenStream<'a> {
    type Position = (u32, TokenId);

    fn next_any(&mut self) -> AnyToken {
        if let Some(slice) = self.sliced_tokens.slices.get(self.slice_index as usize) {
            let token = self.token_arena.element(self.slice_cursor);
            let any_token = AnyToken {
                kind: token.kind,
                id: self.slice_cursor,
            };
            if let Some(next) = self.slice_cursor.successor_in(slice.to_span()) {
                self.slice_cursor = next;
            } else {
                self.advance_slice();
            }
            any_token
        } else {
            AnyToken {
                kind: TokenKind::EndOfFile,
                id: self.slice_cursor,
            }
        }
    }

    fn position(&self) -> Self::Position {
        (self.slice_index, self.slice_cursor)
    }

    fn set_position(&mut self, position: Self::Position) {
        (self.slice_index, self.slice_cursor) = position;
    }
}

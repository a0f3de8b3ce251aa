use bitflags::bitflags;
use cmodel_foundation::{source_arena::SourceArena, span::Span};

use crate::token::{AnyToken, Token, TokenId, TokenKind, TokenSpan};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Channel: u8 {
        /// Main input (everything that is not comments, whitespace, or errors.)
        const CODE    = 0x1;
        /// Comments only. Not seen by parsers, but may be used by external tools.
        const COMMENT = 0x2;
        /// Linefeed tokens. Used by the preprocessor to find directive boundaries.
        const SPACE   = 0x4;
        /// Lexis errors. Skipped by parsers entirely.
        const ERROR   = 0x8;
    }
}

pub trait TokenStream {
    type Position;

    fn next_any(&mut self) -> AnyToken;

    fn next_from(&mut self, channel: Channel) -> AnyToken {
        loop {
            let token = self.next_any();
            // EndOfFile lives on the CODE channel, so this loop always terminates.
            if channel.contains(token.kind.channel()) {
                return token;
            }
        }
    }

    /// Next token from the CODE and SPACE channels. This is the preprocessor's view of
    /// the input, where linefeeds are still visible.
    fn next(&mut self) -> AnyToken {
        self.next_from(Channel::CODE | Channel::SPACE)
    }

    fn position(&self) -> Self::Position;

    fn set_position(&mut self, position: Self::Position);

    fn peek(&mut self) -> AnyToken {
        let position = self.position();
        let token = self.next();
        self.set_position(position);
        token
    }
}

impl<T> TokenStream for &mut T
where
    T: TokenStream,
{
    type Position = T::Position;

    fn next_any(&mut self) -> AnyToken {
        <T as TokenStream>::next_any(self)
    }

    fn position(&self) -> Self::Position {
        <T as TokenStream>::position(self)
    }

    fn set_position(&mut self, position: Self::Position) {
        <T as TokenStream>::set_position(self, position)
    }
}

/// [`std::io::Cursor`] but for [`TokenSpan`]s. Turns a [`TokenSpan`] into a [`TokenStream`].
pub struct TokenSpanCursor<'a> {
    token_arena: &'a SourceArena<Token>,
    cursor: TokenId,
    end: TokenId,
}

impl<'a> TokenSpanCursor<'a> {
    /// Returns a cursor for traversing the span, or [`None`] if the span is empty.
    pub fn new(token_arena: &'a SourceArena<Token>, span: TokenSpan) -> Option<Self> {
        match span {
            Span::Empty => None,
            Span::Spanning { start, end } => Some(Self {
                token_arena,
                cursor: start,
                end: end.successor(),
            }),
        }
    }
}

impl<'a> TokenStream for TokenSpanCursor<'a> {
    type Position = TokenId;

    fn next_any(&mut self) -> AnyToken {
        let id = self.cursor;
        if let Some(successor) = self
            .cursor
            .successor_in(TokenSpan::spanning(self.cursor, self.end))
        {
            let token = self.token_arena.element(id);
            self.cursor = successor;
            AnyToken {
                kind: token.kind,
                id,
            }
        } else {
            AnyToken {
                kind: TokenKind::EndOfFile,
                id: self.cursor.predecessor().unwrap_or(self.cursor),
            }
        }
    }

    fn position(&self) -> Self::Position {
        self.cursor
    }

    fn set_position(&mut self, position: Self::Position) {
        self.cursor = position;
    }
}

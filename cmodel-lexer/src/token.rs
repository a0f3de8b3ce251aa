use cmodel_foundation::{
    source_arena::SourceId,
    span::{Span, Spanned},
};
use std::{fmt, ops::Range};

use crate::token_stream::Channel;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub source_range: Range<usize>,
}

pub type TokenId = SourceId<Token>;
pub type TokenSpan = Span<Token>;

/// Passes all the token kinds as a sequence of `Token = "name",` into the provided macro.
#[macro_export]
macro_rules! expand_tokens {
    ($x:path) => {
        $x! {
            Comment = "comment",

            Ident = "identifier",

            IntLit    = "int literal",
            FloatLit  = "float literal",
            StringLit = "string literal",
            CharLit   = "char literal",

            Add        = "`+`",
            Sub        = "`-`",
            Mul        = "`*`",
            Div        = "`/`",
            Rem        = "`%`",
            ShiftLeft  = "`<<`",
            ShiftRight = "`>>`",
            BitNot     = "`~`",
            BitAnd     = "`&`",
            BitOr      = "`|`",
            BitXor     = "`^`",
            Not        = "`!`",
            Equal      = "`==`",
            NotEqual   = "`!=`",
            Less       = "`<`",
            Greater    = "`>`",
            LessEqual  = "`<=`",
            GreaterEqual = "`>=`",
            And        = "`&&`",
            Or         = "`||`",
            Inc        = "`++`",
            Dec        = "`--`",

            Assign   = "`=`",
            Question = "`?`",
            Colon    = "`:`",
            Dot      = "`.`",
            Arrow    = "`->`",
            Ellipsis = "`...`",

            LeftParen    = "`(`",
            RightParen   = "`)`",
            LeftBracket  = "`[`",
            RightBracket = "`]`",
            LeftBrace    = "`{`",
            RightBrace   = "`}`",
            Comma        = "`,`",
            Semi         = "`;`",
            Hash         = "`#`",
            HashHash     = "`##`",
            Backslash    = "`\\`",

            // Line structure is significant to the preprocessor, so linefeeds survive
            // lexing as their own tokens on the SPACE channel.
            NewLine = "end of line",

            // Used for errors produced by the lexer.
            Error = "error",
            EndOfFile = "end of file",
        }
    };
}

macro_rules! token_kind_enum {
    ($($name:tt = $pretty_name:tt),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        pub enum TokenKind {
            $($name),*
        }

        impl TokenKind {
            pub fn name(&self) -> &'static str {
                match self {
                    $(TokenKind::$name => $pretty_name),*
                }
            }
        }
    }
}

expand_tokens!(token_kind_enum);

impl TokenKind {
    pub const fn channel(&self) -> Channel {
        match self {
            TokenKind::Comment => Channel::COMMENT,
            TokenKind::NewLine => Channel::SPACE,
            TokenKind::Error => Channel::ERROR,
            _ => Channel::CODE,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AnyToken {
    pub kind: TokenKind,
    pub id: TokenId,
}

impl fmt::Debug for AnyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.kind, self.id)
    }
}

impl Spanned<Token> for AnyToken {
    fn span(&self) -> TokenSpan {
        TokenSpan::Spanning {
            start: self.id,
            end: self.id,
        }
    }
}

use std::ops::Range;

use cmodel_foundation::{
    errors::{Diagnostic, DiagnosticSink, Label},
    source::SourceFileId,
    source_arena::SourceArena,
};

use crate::token::{AnyToken, Token, TokenKind, TokenSpan};

/// Hand-rolled lexer for the C token set the preprocessor cares about.
///
/// This is deliberately shallow: it produces preprocessing tokens, not fully
/// classified C tokens. Numbers are lexed as pp-numbers, escape sequences are
/// carried verbatim, and keywords are plain identifiers.
pub struct Lexer<'a> {
    pub file: SourceFileId,
    pub input: &'a str,
    pub position: usize,
}

struct LexError {
    message: String,
    label: String,
    range: Range<usize>,
}

impl<'a> Lexer<'a> {
    pub fn new(file: SourceFileId, input: &'a str) -> Self {
        Self {
            file,
            input,
            position: 0,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_char(&self) -> Option<char> {
        let mut chars = self.input[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn advance_char(&mut self) {
        if let Some(char) = self.current_char() {
            self.position += char.len_utf8();
        }
    }

    fn skip_whitespace_and_splices(&mut self) {
        loop {
            match self.current_char() {
                // Horizontal whitespace only; linefeeds become tokens.
                Some(' ' | '\t' | '\r') => self.advance_char(),
                // Backslash-newline splices lines together before tokens form.
                Some('\\') if matches!(self.peek_char(), Some('\n')) => {
                    self.advance_char();
                    self.advance_char();
                }
                Some('\\') if matches!(self.peek_char(), Some('\r')) => {
                    let after = self.input[self.position..].chars().nth(2);
                    if after == Some('\n') {
                        self.advance_char();
                        self.advance_char();
                        self.advance_char();
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn comment_or_division(&mut self, start: usize) -> Result<TokenKind, LexError> {
        self.advance_char();
        match self.current_char() {
            Some('/') => {
                self.advance_char();
                // Stop before the linefeed so it still produces a NewLine token.
                while !matches!(self.current_char(), None | Some('\n')) {
                    self.advance_char();
                }
                Ok(TokenKind::Comment)
            }
            Some('*') => {
                self.advance_char();
                loop {
                    match self.current_char() {
                        Some('*') => {
                            self.advance_char();
                            if self.current_char() == Some('/') {
                                self.advance_char();
                                break;
                            }
                        }
                        None => {
                            return Err(LexError {
                                message: "block comment does not have a matching `*/` terminator"
                                    .into(),
                                label: "the comment starts here".into(),
                                range: start..self.position,
                            })
                        }
                        _ => self.advance_char(),
                    }
                }
                Ok(TokenKind::Comment)
            }
            _ => Ok(TokenKind::Div),
        }
    }

    fn identifier(&mut self) -> TokenKind {
        while let Some('a'..='z' | 'A'..='Z' | '0'..='9' | '_') = self.current_char() {
            self.advance_char();
        }
        TokenKind::Ident
    }

    /// Lexes a pp-number: digits, identifier characters, dots, and exponent signs.
    /// Much looser than a C number literal, exactly as the preprocessor wants it.
    fn pp_number(&mut self) -> TokenKind {
        let mut is_float = false;
        loop {
            match self.current_char() {
                Some('0'..='9' | '_') => self.advance_char(),
                Some('.') => {
                    is_float = true;
                    self.advance_char();
                }
                Some('e' | 'E' | 'p' | 'P') => {
                    self.advance_char();
                    if let Some('+' | '-') = self.current_char() {
                        is_float = true;
                        self.advance_char();
                    }
                }
                Some('a'..='d' | 'f'..='o' | 'q'..='z' | 'A'..='D' | 'F'..='O' | 'Q'..='Z') => {
                    self.advance_char();
                }
                _ => break,
            }
        }
        if is_float {
            TokenKind::FloatLit
        } else {
            TokenKind::IntLit
        }
    }

    fn quoted(
        &mut self,
        quote: char,
        kind: TokenKind,
        start: usize,
    ) -> Result<TokenKind, LexError> {
        self.advance_char();
        loop {
            match self.current_char() {
                Some('\\') => {
                    self.advance_char();
                    self.advance_char();
                }
                Some(c) if c == quote => {
                    self.advance_char();
                    return Ok(kind);
                }
                None | Some('\n') => {
                    return Err(LexError {
                        message: format!(
                            "{} does not have a closing `{quote}`",
                            kind.name()
                        ),
                        label: "the literal starts here".into(),
                        range: start..start + 1,
                    })
                }
                _ => self.advance_char(),
            }
        }
    }

    fn single_char_token(&mut self, kind: TokenKind) -> TokenKind {
        self.advance_char();
        kind
    }

    fn single_or_double_char_token(
        &mut self,
        kind: TokenKind,
        second: char,
        second_kind: TokenKind,
    ) -> TokenKind {
        self.advance_char();
        if self.current_char() == Some(second) {
            self.advance_char();
            second_kind
        } else {
            kind
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_splices();

        let start = self.position;

        let kind = if let Some(char) = self.current_char() {
            match char {
                '\n' => self.single_char_token(TokenKind::NewLine),
                '/' => self.comment_or_division(start)?,
                'a'..='z' | 'A'..='Z' | '_' => self.identifier(),
                '0'..='9' => self.pp_number(),
                '.' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('0'..='9') => {
                            self.pp_number();
                            TokenKind::FloatLit
                        }
                        Some('.') if self.peek_char() == Some('.') => {
                            self.advance_char();
                            self.advance_char();
                            TokenKind::Ellipsis
                        }
                        _ => TokenKind::Dot,
                    }
                }
                '"' => self.quoted('"', TokenKind::StringLit, start)?,
                '\'' => self.quoted('\'', TokenKind::CharLit, start)?,
                '+' => self.single_or_double_char_token(TokenKind::Add, '+', TokenKind::Inc),
                '-' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('-') => self.single_char_token(TokenKind::Dec),
                        Some('>') => self.single_char_token(TokenKind::Arrow),
                        _ => TokenKind::Sub,
                    }
                }
                '*' => self.single_char_token(TokenKind::Mul),
                '%' => self.single_char_token(TokenKind::Rem),
                '<' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('<') => self.single_char_token(TokenKind::ShiftLeft),
                        Some('=') => self.single_char_token(TokenKind::LessEqual),
                        _ => TokenKind::Less,
                    }
                }
                '>' => {
                    self.advance_char();
                    match self.current_char() {
                        Some('>') => self.single_char_token(TokenKind::ShiftRight),
                        Some('=') => self.single_char_token(TokenKind::GreaterEqual),
                        _ => TokenKind::Greater,
                    }
                }
                '&' => self.single_or_double_char_token(TokenKind::BitAnd, '&', TokenKind::And),
                '|' => self.single_or_double_char_token(TokenKind::BitOr, '|', TokenKind::Or),
                '^' => self.single_char_token(TokenKind::BitXor),
                ':' => self.single_char_token(TokenKind::Colon),
                '?' => self.single_char_token(TokenKind::Question),
                '!' => self.single_or_double_char_token(TokenKind::Not, '=', TokenKind::NotEqual),
                '=' => self.single_or_double_char_token(TokenKind::Assign, '=', TokenKind::Equal),
                '~' => self.single_char_token(TokenKind::BitNot),
                '(' => self.single_char_token(TokenKind::LeftParen),
                ')' => self.single_char_token(TokenKind::RightParen),
                '[' => self.single_char_token(TokenKind::LeftBracket),
                ']' => self.single_char_token(TokenKind::RightBracket),
                '{' => self.single_char_token(TokenKind::LeftBrace),
                '}' => self.single_char_token(TokenKind::RightBrace),
                ',' => self.single_char_token(TokenKind::Comma),
                ';' => self.single_char_token(TokenKind::Semi),
                '#' => self.single_or_double_char_token(TokenKind::Hash, '#', TokenKind::HashHash),
                '\\' => self.single_char_token(TokenKind::Backslash),
                unknown => {
                    self.advance_char();
                    return Err(LexError {
                        message: format!("unrecognized character: {unknown:?}"),
                        label: "this character is not valid C syntax".into(),
                        range: start..self.position,
                    });
                }
            }
        } else {
            TokenKind::EndOfFile
        };

        let end = self.position;
        Ok(Token {
            kind,
            source_range: start..end.max(start),
        })
    }
}

/// Lexes a whole translation unit buffer into the token arena, returning the span
/// of the file's tokens (always terminated by an EndOfFile token).
///
/// Lexis errors degrade into `Error` tokens plus a diagnostic; they never abort
/// the rest of the file.
pub fn lex(
    file: SourceFileId,
    input: &str,
    token_arena: &mut SourceArena<Token>,
    diagnostics: &mut dyn DiagnosticSink<Token>,
) -> TokenSpan {
    let mut lexer = Lexer::new(file, input);
    let mut builder = token_arena.build_source_file(file);
    loop {
        match lexer.next_token() {
            Ok(token) => {
                let is_end = token.kind == TokenKind::EndOfFile;
                builder.push(token);
                if is_end {
                    break;
                }
            }
            Err(error) => {
                let id = builder.push(Token {
                    kind: TokenKind::Error,
                    source_range: error.range,
                });
                diagnostics.emit(Diagnostic::error(error.message).with_label(Label::primary(
                    &AnyToken {
                        kind: TokenKind::Error,
                        id,
                    },
                    error.label,
                )));
            }
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use cmodel_foundation::source::{SourceFile, SourceFileSet};

    use super::*;
    use crate::token_stream::{TokenSpanCursor, TokenStream};

    fn lex_test_input(input: &str) -> (SourceArena<Token>, TokenSpan, Vec<Diagnostic<Token>>) {
        let mut source_file_set = SourceFileSet::new();
        let file = source_file_set.add(SourceFile::new("test.c".into(), input.into()));
        let mut token_arena = SourceArena::new();
        let mut diagnostics = vec![];
        let span = lex(file, input, &mut token_arena, &mut diagnostics);
        (token_arena, span, diagnostics)
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        let (token_arena, span, _) = lex_test_input(input);
        let mut cursor =
            TokenSpanCursor::new(&token_arena, span).expect("a lexed file is never empty");
        let mut kinds = vec![];
        loop {
            let token = cursor.next_any();
            if token.kind == TokenKind::EndOfFile {
                break;
            }
            kinds.push(token.kind);
        }
        kinds
    }

    #[test]
    fn declaration() {
        assert_eq!(
            kinds("int arr[10];"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::LeftBracket,
                TokenKind::IntLit,
                TokenKind::RightBracket,
                TokenKind::Semi,
            ]
        );
    }

    #[test]
    fn directive_line() {
        assert_eq!(
            kinds("#define F(x) x\n"),
            vec![
                TokenKind::Hash,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::LeftParen,
                TokenKind::Ident,
                TokenKind::RightParen,
                TokenKind::Ident,
                TokenKind::NewLine,
            ]
        );
    }

    #[test]
    fn splice_eats_the_linefeed() {
        // A spliced line must not produce a NewLine token, so a directive can
        // continue across it.
        assert_eq!(kinds("a \\\n b"), vec![TokenKind::Ident, TokenKind::Ident]);
    }

    #[test]
    fn comments() {
        assert_eq!(
            kinds("// hi\nx"),
            vec![TokenKind::Comment, TokenKind::NewLine, TokenKind::Ident]
        );
        assert_eq!(
            kinds("/* a\nb */x"),
            vec![TokenKind::Comment, TokenKind::Ident]
        );
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            kinds("-> -- - ... . ## >= <<"),
            vec![
                TokenKind::Arrow,
                TokenKind::Dec,
                TokenKind::Sub,
                TokenKind::Ellipsis,
                TokenKind::Dot,
                TokenKind::HashHash,
                TokenKind::GreaterEqual,
                TokenKind::ShiftLeft,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1.5 .5 2e+3 10 0x1F"),
            vec![
                TokenKind::FloatLit,
                TokenKind::FloatLit,
                TokenKind::FloatLit,
                TokenKind::IntLit,
                TokenKind::IntLit,
            ]
        );
    }

    #[test]
    fn character_and_string_literals() {
        assert_eq!(
            kinds(r#"'a' '\n' "hi\"there""#),
            vec![TokenKind::CharLit, TokenKind::CharLit, TokenKind::StringLit]
        );
    }

    #[test]
    fn unterminated_string_degrades_into_an_error_token() {
        let (_, _, diagnostics) = lex_test_input("\"abc\nint x;\n");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            kinds("\"abc\nint x;\n"),
            vec![
                TokenKind::Error,
                TokenKind::NewLine,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Semi,
                TokenKind::NewLine,
            ]
        );
    }

    #[test]
    fn code_channel_skips_comments() {
        let (token_arena, span, _) = lex_test_input("x /* c */ y");
        let mut cursor =
            TokenSpanCursor::new(&token_arena, span).expect("a lexed file is never empty");
        assert_eq!(cursor.next().kind, TokenKind::Ident);
        assert_eq!(cursor.next().kind, TokenKind::Ident);
        assert_eq!(cursor.next().kind, TokenKind::EndOfFile);
    }
}

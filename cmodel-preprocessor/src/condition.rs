//! `#if` / `#elif` constant-expression evaluation.
//!
//! Follows the standard C preprocessor expression grammar: conditional operator
//! down through logical, bitwise, equality, relational, shift, additive,
//! multiplicative and unary tiers. `defined` is resolved before macro expansion,
//! everything else is macro-expanded first, and identifiers that survive
//! expansion evaluate to 0.

use cmodel_foundation::errors::{Diagnostic, DiagnosticSink, Label};
use cmodel_lexer::{
    sources::LexedSources,
    token::{AnyToken, Token, TokenKind},
    token_stream::Channel,
};

use crate::{expand::MacroExpander, macro_table::MacroTable};

pub struct ConditionEvaluator<'a, 's> {
    sources: LexedSources<'s>,
    macro_table: &'a MacroTable,
    diagnostics: &'a mut dyn DiagnosticSink<Token>,
    max_expansion_depth: usize,
}

/// An element of the prepared condition: either an already-computed value
/// (the result of `defined`) or an ordinary post-expansion token.
#[derive(Debug, Clone, Copy)]
enum CondItem {
    Value { value: i64, token: AnyToken },
    Token(AnyToken),
}

impl CondItem {
    fn token(&self) -> AnyToken {
        match self {
            CondItem::Value { token, .. } => *token,
            CondItem::Token(token) => *token,
        }
    }
}

/// Evaluation aborts after the first reported problem; the branch is then
/// treated as inactive.
struct EvalAbort;

impl<'a, 's> ConditionEvaluator<'a, 's> {
    pub fn new(
        sources: LexedSources<'s>,
        macro_table: &'a MacroTable,
        diagnostics: &'a mut dyn DiagnosticSink<Token>,
        max_expansion_depth: usize,
    ) -> Self {
        Self {
            sources,
            macro_table,
            diagnostics,
            max_expansion_depth,
        }
    }

    /// Evaluates a directive's condition tokens. Malformed conditions report a
    /// diagnostic and yield `false`.
    pub fn evaluate(&mut self, tokens: &[AnyToken], directive_token: AnyToken) -> bool {
        let items = match self.prepare(tokens) {
            Ok(items) => items,
            Err(EvalAbort) => return false,
        };
        if items.is_empty() {
            self.diagnostics.emit(
                Diagnostic::error("expected an expression after the directive")
                    .with_label(Label::primary(&directive_token, "this condition is empty")),
            );
            return false;
        }

        let mut parser = CondParser {
            sources: self.sources,
            diagnostics: self.diagnostics,
            items: &items,
            position: 0,
        };
        match parser.parse_conditional(true) {
            Ok(value) => {
                if parser.position != items.len() {
                    let stray = items[parser.position].token();
                    self.diagnostics.emit(
                        Diagnostic::error("unexpected tokens after the end of the condition")
                            .with_label(Label::primary(&stray, "this token was not parsed")),
                    );
                    return false;
                }
                value != 0
            }
            Err(EvalAbort) => false,
        }
    }

    /// Resolves `defined X` / `defined(X)` and macro-expands everything else.
    fn prepare(&mut self, tokens: &[AnyToken]) -> Result<Vec<CondItem>, EvalAbort> {
        let mut items = vec![];
        let mut pending: Vec<AnyToken> = vec![];
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            if token.kind.channel() != Channel::CODE {
                i += 1;
                continue;
            }
            if token.kind == TokenKind::Ident && self.sources.source(&token) == "defined" {
                self.flush_pending(&mut pending, &mut items);
                let (name, next) = self.defined_operand(tokens, token, i + 1)?;
                items.push(CondItem::Value {
                    value: self.macro_table.is_defined(self.sources.source(&name)) as i64,
                    token: name,
                });
                i = next;
                continue;
            }
            pending.push(token);
            i += 1;
        }
        self.flush_pending(&mut pending, &mut items);
        Ok(items)
    }

    fn flush_pending(&mut self, pending: &mut Vec<AnyToken>, items: &mut Vec<CondItem>) {
        if pending.is_empty() {
            return;
        }
        let mut expander = MacroExpander::new(
            self.sources,
            self.macro_table,
            &mut *self.diagnostics,
            self.max_expansion_depth,
        );
        let expanded = expander.expand_run(pending);
        items.extend(
            expanded
                .into_iter()
                .filter(|token| token.kind.channel() == Channel::CODE)
                .map(CondItem::Token),
        );
        pending.clear();
    }

    /// Parses the operand of `defined`: either a bare identifier or `(IDENT)`.
    /// Returns the identifier token and the index just past the operand.
    fn defined_operand(
        &mut self,
        tokens: &[AnyToken],
        defined_token: AnyToken,
        from: usize,
    ) -> Result<(AnyToken, usize), EvalAbort> {
        let mut i = from;
        let mut parenthesized = false;
        let mut next_code = |i: &mut usize| -> Option<AnyToken> {
            while let Some(token) = tokens.get(*i) {
                *i += 1;
                if token.kind.channel() == Channel::CODE {
                    return Some(*token);
                }
            }
            None
        };

        let mut token = next_code(&mut i);
        if let Some(t) = token {
            if t.kind == TokenKind::LeftParen {
                parenthesized = true;
                token = next_code(&mut i);
            }
        }
        let name = match token {
            Some(t) if t.kind == TokenKind::Ident => t,
            _ => {
                self.diagnostics.emit(
                    Diagnostic::error("`defined` expects a macro name")
                        .with_label(Label::primary(&defined_token, "used here")),
                );
                return Err(EvalAbort);
            }
        };
        if parenthesized {
            match next_code(&mut i) {
                Some(t) if t.kind == TokenKind::RightParen => {}
                _ => {
                    self.diagnostics.emit(
                        Diagnostic::error("missing `)` after the operand of `defined`")
                            .with_label(Label::primary(&name, "the macro name is here")),
                    );
                    return Err(EvalAbort);
                }
            }
        }
        Ok((name, i))
    }
}

struct CondParser<'a, 's> {
    sources: LexedSources<'s>,
    diagnostics: &'a mut dyn DiagnosticSink<Token>,
    items: &'a [CondItem],
    position: usize,
}

impl<'a, 's> CondParser<'a, 's> {
    fn peek(&self) -> Option<CondItem> {
        self.items.get(self.position).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|item| match item {
            CondItem::Value { .. } => TokenKind::IntLit,
            CondItem::Token(token) => token.kind,
        })
    }

    fn bump(&mut self) -> Option<CondItem> {
        let item = self.peek();
        if item.is_some() {
            self.position += 1;
        }
        item
    }

    fn error_here(&mut self, message: &str) -> EvalAbort {
        match self.peek() {
            Some(item) => {
                let token = item.token();
                self.diagnostics.emit(
                    Diagnostic::error(message).with_label(Label::primary(&token, "here")),
                );
            }
            None => {
                let label = self.items.last().map(|item| item.token());
                let diagnostic = Diagnostic::error(format!("{message} (condition ends early)"));
                self.diagnostics.emit(match label {
                    Some(token) => {
                        diagnostic.with_label(Label::primary(&token, "the condition ends here"))
                    }
                    None => diagnostic,
                });
            }
        }
        EvalAbort
    }

    /// conditional: logical-or (`?` expression `:` conditional)?
    fn parse_conditional(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let condition = self.parse_logical_or(live)?;
        if self.peek_kind() == Some(TokenKind::Question) {
            self.bump();
            let then_value = self.parse_conditional(live && condition != 0)?;
            if self.peek_kind() != Some(TokenKind::Colon) {
                return Err(self.error_here("expected `:` in conditional expression"));
            }
            self.bump();
            let else_value = self.parse_conditional(live && condition == 0)?;
            return Ok(if condition != 0 { then_value } else { else_value });
        }
        Ok(condition)
    }

    fn parse_logical_or(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_logical_and(live)?;
        while self.peek_kind() == Some(TokenKind::Or) {
            self.bump();
            // Short-circuit: the right side is parsed but no longer "live", so it
            // cannot raise evaluation errors such as division by zero.
            let right = self.parse_logical_and(live && left == 0)?;
            left = (left != 0 || right != 0) as i64;
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_bit_or(live)?;
        while self.peek_kind() == Some(TokenKind::And) {
            self.bump();
            let right = self.parse_bit_or(live && left != 0)?;
            left = (left != 0 && right != 0) as i64;
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_bit_xor(live)?;
        while self.peek_kind() == Some(TokenKind::BitOr) {
            self.bump();
            let right = self.parse_bit_xor(live)?;
            left |= right;
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_bit_and(live)?;
        while self.peek_kind() == Some(TokenKind::BitXor) {
            self.bump();
            let right = self.parse_bit_and(live)?;
            left ^= right;
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_equality(live)?;
        while self.peek_kind() == Some(TokenKind::BitAnd) {
            self.bump();
            let right = self.parse_equality(live)?;
            left &= right;
        }
        Ok(left)
    }

    fn parse_equality(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_relational(live)?;
        loop {
            let operator = match self.peek_kind() {
                Some(kind @ (TokenKind::Equal | TokenKind::NotEqual)) => kind,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_relational(live)?;
            left = match operator {
                TokenKind::Equal => (left == right) as i64,
                _ => (left != right) as i64,
            };
        }
    }

    fn parse_relational(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_shift(live)?;
        loop {
            let operator = match self.peek_kind() {
                Some(
                    kind @ (TokenKind::Less
                    | TokenKind::LessEqual
                    | TokenKind::Greater
                    | TokenKind::GreaterEqual),
                ) => kind,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_shift(live)?;
            left = match operator {
                TokenKind::Less => (left < right) as i64,
                TokenKind::LessEqual => (left <= right) as i64,
                TokenKind::Greater => (left > right) as i64,
                _ => (left >= right) as i64,
            };
        }
    }

    fn parse_shift(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_additive(live)?;
        loop {
            let operator = match self.peek_kind() {
                Some(kind @ (TokenKind::ShiftLeft | TokenKind::ShiftRight)) => kind,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_additive(live)?;
            let amount = right.clamp(0, 63) as u32;
            left = match operator {
                TokenKind::ShiftLeft => left.wrapping_shl(amount),
                _ => left.wrapping_shr(amount),
            };
        }
    }

    fn parse_additive(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_multiplicative(live)?;
        loop {
            let operator = match self.peek_kind() {
                Some(kind @ (TokenKind::Add | TokenKind::Sub)) => kind,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_multiplicative(live)?;
            left = match operator {
                TokenKind::Add => left.wrapping_add(right),
                _ => left.wrapping_sub(right),
            };
        }
    }

    fn parse_multiplicative(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let mut left = self.parse_unary(live)?;
        loop {
            let operator = match self.peek() {
                Some(CondItem::Token(token))
                    if matches!(token.kind, TokenKind::Mul | TokenKind::Div | TokenKind::Rem) =>
                {
                    token
                }
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary(live)?;
            left = match operator.kind {
                TokenKind::Mul => left.wrapping_mul(right),
                _ => {
                    if right == 0 {
                        if live {
                            self.diagnostics.emit(
                                Diagnostic::error("division by zero in preprocessor condition")
                                    .with_label(Label::primary(&operator, "the divisor is zero")),
                            );
                            return Err(EvalAbort);
                        }
                        0
                    } else if operator.kind == TokenKind::Div {
                        left.wrapping_div(right)
                    } else {
                        left.wrapping_rem(right)
                    }
                }
            };
        }
    }

    fn parse_unary(&mut self, live: bool) -> Result<i64, EvalAbort> {
        match self.peek_kind() {
            Some(TokenKind::Not) => {
                self.bump();
                Ok((self.parse_unary(live)? == 0) as i64)
            }
            Some(TokenKind::BitNot) => {
                self.bump();
                Ok(!self.parse_unary(live)?)
            }
            Some(TokenKind::Sub) => {
                self.bump();
                Ok(self.parse_unary(live)?.wrapping_neg())
            }
            Some(TokenKind::Add) => {
                self.bump();
                self.parse_unary(live)
            }
            _ => self.parse_primary(live),
        }
    }

    fn parse_primary(&mut self, live: bool) -> Result<i64, EvalAbort> {
        let item = match self.peek() {
            Some(item) => item,
            None => return Err(self.error_here("expected a value")),
        };
        match item {
            CondItem::Value { value, .. } => {
                self.bump();
                Ok(value)
            }
            CondItem::Token(token) => match token.kind {
                TokenKind::IntLit => {
                    self.bump();
                    self.integer_value(token)
                }
                TokenKind::CharLit => {
                    self.bump();
                    Ok(character_value(self.sources.source(&token)))
                }
                TokenKind::FloatLit => {
                    self.bump();
                    self.diagnostics.emit(
                        Diagnostic::error("floating constants are not valid in `#if` conditions")
                            .with_label(Label::primary(&token, "")),
                    );
                    Err(EvalAbort)
                }
                // Identifiers that survived macro expansion are undefined macros
                // and evaluate to 0.
                TokenKind::Ident => {
                    self.bump();
                    Ok(0)
                }
                TokenKind::LeftParen => {
                    self.bump();
                    let value = self.parse_conditional(live)?;
                    if self.peek_kind() != Some(TokenKind::RightParen) {
                        return Err(self.error_here("expected `)`"));
                    }
                    self.bump();
                    Ok(value)
                }
                _ => Err(self.error_here("expected a value")),
            },
        }
    }

    fn integer_value(&mut self, token: AnyToken) -> Result<i64, EvalAbort> {
        let text = self.sources.source(&token);
        match parse_c_integer(text) {
            Some(value) => Ok(value),
            None => {
                self.diagnostics.emit(
                    Diagnostic::error(format!("invalid integer constant `{text}`"))
                        .with_label(Label::primary(&token, "")),
                );
                Err(EvalAbort)
            }
        }
    }
}

/// Parses a C integer constant: decimal, `0x` hex, `0b` binary, or leading-zero
/// octal, with any `u`/`l` suffix combination.
fn parse_c_integer(text: &str) -> Option<i64> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or(digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if let Some(bin) = digits.strip_prefix("0b").or(digits.strip_prefix("0B")) {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    // Wrap instead of overflowing: parse as u64 first, as C integer constants are
    // unsigned once they exceed the signed range.
    u64::from_str_radix(digits, radix).ok().map(|value| value as i64)
}

/// Value of a character constant. Multi-character constants take the first
/// character, matching the common implementation-defined behavior closely
/// enough for conditions.
fn character_value(text: &str) -> i64 {
    let inner = text.trim_start_matches('\'').trim_end_matches('\'');
    let mut chars = inner.chars();
    match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => b'\n' as i64,
            Some('t') => b'\t' as i64,
            Some('r') => b'\r' as i64,
            Some('0') => 0,
            Some('\\') => b'\\' as i64,
            Some('\'') => b'\'' as i64,
            Some('"') => b'"' as i64,
            Some('x') => i64::from_str_radix(chars.as_str(), 16).unwrap_or(0),
            Some(other) => other as i64,
            None => 0,
        },
        Some(other) => other as i64,
        None => 0,
    }
}

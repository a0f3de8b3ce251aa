//! Preprocessing core: directive tree construction, conditional compilation,
//! and macro expansion.
//!
//! The entry point is [`Preprocessor::preprocess`]: it builds the abstract
//! preprocessing tree for a lexed translation unit, walks it in source order
//! maintaining the directive stack and the macro table, and emits the
//! conditional-resolved, macro-expanded token stream into a [`SlicedTokens`].

pub mod condition;
pub mod expand;
pub mod macro_table;
pub mod sliced_tokens;
pub mod tree;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cmodel_foundation::{
    errors::{Diagnostic, DiagnosticSink, Label},
    span::Spanned,
};
use cmodel_lexer::{
    sources::LexedSources,
    token::{AnyToken, Token, TokenKind, TokenSpan},
    token_stream::{Channel, TokenSpanCursor, TokenStream},
};
use thiserror::Error;
use tracing::debug;

use crate::{
    condition::ConditionEvaluator,
    expand::MacroExpander,
    macro_table::{MacroDefinition, MacroTable},
    sliced_tokens::SlicedTokens,
    tree::{Apt, AptBuilder, AptNode, AptNodeKind},
};

/// Tuning knobs for one preprocessing pass, passed explicitly into the entry
/// point. There is no ambient configuration.
#[derive(Debug, Clone)]
pub struct PreprocessorConfig {
    /// Hard limit on nested macro substitution, guarding against pathological
    /// mutual recursion that the self-reference guard cannot catch.
    pub max_expansion_depth: usize,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            max_expansion_depth: 64,
        }
    }
}

/// Cooperative cancellation flag, checked between top-level tree nodes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Hard failures of a preprocessing pass. Everything recoverable is a
/// [`Diagnostic`] instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("preprocessing was cancelled")]
    Cancelled,
    #[error("the token source is empty")]
    EmptyTokenSource,
}

/// State of one open conditional block on the directive stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchState {
    /// This branch's tokens are forwarded.
    Active,
    /// Skipping, but a later `#elif`/`#else` at this level may still activate.
    InactiveConditionFalse,
    /// Skipping, and no later branch at this level may activate: either an
    /// earlier sibling branch was taken, or the enclosing context is inactive.
    InactiveAlreadyTaken,
}

#[derive(Debug)]
struct BranchEntry {
    state: BranchState,
    /// The opening directive's `#`, for unterminated-conditional diagnostics.
    token: AnyToken,
}

/// Preprocessor that sits between the lexer and the parser backends.
pub struct Preprocessor<'a, 's> {
    pub macro_table: &'a mut MacroTable,
    sources: LexedSources<'s>,
    diagnostics: &'a mut dyn DiagnosticSink<Token>,
    out_tokens: &'a mut SlicedTokens,
    config: &'a PreprocessorConfig,
    cancellation: CancellationToken,
    directive_stack: Vec<BranchEntry>,
}

impl<'a, 's> Preprocessor<'a, 's> {
    pub fn new(
        macro_table: &'a mut MacroTable,
        sources: LexedSources<'s>,
        out_tokens: &'a mut SlicedTokens,
        diagnostics: &'a mut dyn DiagnosticSink<Token>,
        config: &'a PreprocessorConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            macro_table,
            sources,
            diagnostics,
            out_tokens,
            config,
            cancellation,
            directive_stack: vec![],
        }
    }

    /// Runs the whole pass over one translation unit: builds the tree, resolves
    /// conditionals, expands macros. Returns the sealed tree; the expanded
    /// stream lands in the output passed to [`Preprocessor::new`].
    ///
    /// On cancellation the partially produced output is discarded.
    pub fn preprocess(&mut self, file_tokens: TokenSpan) -> Result<Apt, PreprocessError> {
        let mut cursor = TokenSpanCursor::new(self.sources.token_arena, file_tokens)
            .ok_or(PreprocessError::EmptyTokenSource)?;
        let builder = AptBuilder::new(self.sources, file_tokens, self.diagnostics)
            .ok_or(PreprocessError::EmptyTokenSource)?;
        let apt = builder.build(&mut cursor);

        for (_, node) in apt.children(apt.root()) {
            if self.cancellation.is_cancelled() {
                self.out_tokens.clear();
                return Err(PreprocessError::Cancelled);
            }
            self.process_node(node);
        }

        // Conditionals still open at end of input are reported, then treated as
        // closed.
        while let Some(entry) = self.directive_stack.pop() {
            self.diagnostics.emit(
                Diagnostic::error("conditional block is not terminated by `#endif`").with_label(
                    Label::primary(&entry.token, "this conditional is never closed"),
                ),
            );
        }
        Ok(apt)
    }

    fn is_active(&self) -> bool {
        self.directive_stack
            .iter()
            .all(|entry| entry.state == BranchState::Active)
    }

    fn enclosing_is_active(&self) -> bool {
        let above_top = self.directive_stack.len().saturating_sub(1);
        self.directive_stack[..above_top]
            .iter()
            .all(|entry| entry.state == BranchState::Active)
    }

    fn process_node(&mut self, node: &AptNode) {
        match node.kind {
            AptNodeKind::TokenStream => self.forward_token_run(node),
            AptNodeKind::Define => self.process_define(node),
            AptNodeKind::Undef => self.process_undef(node),
            AptNodeKind::Ifdef => self.process_ifdef(node, false),
            AptNodeKind::Ifndef => self.process_ifdef(node, true),
            AptNodeKind::If => self.process_if(node),
            AptNodeKind::Elif => self.process_elif(node),
            AptNodeKind::Else => self.process_else(node),
            AptNodeKind::Endif => self.process_endif(node),
            AptNodeKind::Error => self.process_error_directive(node),
            AptNodeKind::Include | AptNodeKind::IncludeNext => {
                // Include resolution belongs to the caller; the node records that
                // the directive exists.
                debug!(text = node.text(&self.sources), "skipping include directive");
            }
            AptNodeKind::Pragma | AptNodeKind::Line => {
                debug!(text = node.text(&self.sources), "ignored directive");
            }
            // Unknown directives are diagnosed at tree construction time.
            AptNodeKind::UnknownDirective | AptNodeKind::File => {}
        }
    }

    /// Tokens of a directive node after the `#` and the directive keyword.
    fn directive_rest(&self, node: &AptNode) -> Vec<AnyToken> {
        let mut tokens = vec![];
        if let Some(mut cursor) = TokenSpanCursor::new(self.sources.token_arena, node.span) {
            let mut skipped = 0;
            loop {
                let token = cursor.next_from(Channel::CODE);
                if token.kind == TokenKind::EndOfFile {
                    break;
                }
                // Skip the `#` and the keyword.
                if skipped < 2 {
                    skipped += 1;
                    continue;
                }
                tokens.push(token);
            }
        }
        tokens
    }

    fn forward_token_run(&mut self, node: &AptNode) {
        if !self.is_active() {
            return;
        }
        let mut tokens = vec![];
        if let Some(mut cursor) = TokenSpanCursor::new(self.sources.token_arena, node.span) {
            loop {
                let token = cursor.next();
                if token.kind == TokenKind::EndOfFile {
                    break;
                }
                tokens.push(token);
            }
        }
        let mut expander = MacroExpander::new(
            self.sources,
            self.macro_table,
            &mut *self.diagnostics,
            self.config.max_expansion_depth,
        );
        for token in expander.expand_run(&tokens) {
            self.out_tokens.push_token(token);
        }
    }

    fn process_define(&mut self, node: &AptNode) {
        if !self.is_active() {
            return;
        }
        let Some(definition) = self.parse_define(node) else {
            return;
        };
        let name_token = definition.name_token;
        if let Err(error) = self.macro_table.define(definition) {
            self.diagnostics.emit(
                Diagnostic::error(error.to_string())
                    .with_label(Label::primary(&name_token, "defined here")),
            );
        }
    }

    /// Parses `#define NAME`, `#define NAME body`, or
    /// `#define NAME(params) body` out of the node's tokens.
    fn parse_define(&mut self, node: &AptNode) -> Option<MacroDefinition> {
        let rest = self.directive_rest(node);
        let name_token = match rest.first() {
            Some(token) if token.kind == TokenKind::Ident => *token,
            _ => {
                self.diagnostics.emit(
                    Diagnostic::error("macro name expected after `#define`")
                        .with_label(Label::primary(&node.token, "in this directive")),
                );
                return None;
            }
        };
        let name = self.sources.source(&name_token).to_owned();

        let is_function_like = matches!(
            rest.get(1),
            Some(paren)
                if paren.kind == TokenKind::LeftParen
                    && self.sources.tokens_are_hugging_each_other(name_token.id, paren.id)
        );

        let mut parameters = vec![];
        let mut is_variadic = false;
        let mut is_valid = true;
        let mut body_from = 1;

        if is_function_like {
            let mut i = 2;
            let mut closed = false;
            let mut expecting_name = true;
            while let Some(token) = rest.get(i) {
                match token.kind {
                    TokenKind::RightParen => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    TokenKind::Ident if expecting_name => {
                        parameters.push(self.sources.source(token).to_owned());
                        expecting_name = false;
                    }
                    TokenKind::Ellipsis if expecting_name => {
                        is_variadic = true;
                        expecting_name = false;
                    }
                    TokenKind::Comma if !expecting_name && !is_variadic => {
                        expecting_name = true;
                    }
                    _ => {
                        is_valid = false;
                    }
                }
                i += 1;
            }
            if !closed {
                is_valid = false;
            }
            body_from = i;
        }

        let body = rest
            .get(body_from)
            .map(|first| {
                first.span().join(
                    &rest
                        .last()
                        .map(|last| last.span())
                        .unwrap_or(TokenSpan::Empty),
                )
            })
            .unwrap_or(TokenSpan::Empty);

        Some(MacroDefinition {
            name,
            name_token,
            is_function_like,
            parameters,
            is_variadic,
            body,
            is_valid,
        })
    }

    fn single_name(&mut self, node: &AptNode, directive: &str) -> Option<AnyToken> {
        let rest = self.directive_rest(node);
        match rest.first() {
            Some(token) if token.kind == TokenKind::Ident => Some(*token),
            _ => {
                self.diagnostics.emit(
                    Diagnostic::error(format!("macro name expected after `{directive}`"))
                        .with_label(Label::primary(&node.token, "in this directive")),
                );
                None
            }
        }
    }

    fn process_undef(&mut self, node: &AptNode) {
        if !self.is_active() {
            return;
        }
        if let Some(name) = self.single_name(node, "#undef") {
            let name = self.sources.source(&name).to_owned();
            self.macro_table.undef(&name);
        }
    }

    fn push_branch(&mut self, node: &AptNode, condition: impl FnOnce(&mut Self) -> bool) {
        let state = if self.is_active() {
            // The condition is only evaluated when the enclosing context is
            // active, so skipped text cannot cause evaluation side effects.
            if condition(self) {
                BranchState::Active
            } else {
                BranchState::InactiveConditionFalse
            }
        } else {
            BranchState::InactiveAlreadyTaken
        };
        self.directive_stack.push(BranchEntry {
            state,
            token: node.token,
        });
    }

    fn process_ifdef(&mut self, node: &AptNode, negated: bool) {
        self.push_branch(node, |this| {
            let directive = if negated { "#ifndef" } else { "#ifdef" };
            match this.single_name(node, directive) {
                Some(name) => {
                    let defined = this.macro_table.is_defined(this.sources.source(&name));
                    defined != negated
                }
                None => false,
            }
        });
    }

    fn process_if(&mut self, node: &AptNode) {
        self.push_branch(node, |this| {
            let rest = this.directive_rest(node);
            let mut evaluator = ConditionEvaluator::new(
                this.sources,
                this.macro_table,
                &mut *this.diagnostics,
                this.config.max_expansion_depth,
            );
            evaluator.evaluate(&rest, node.token)
        });
    }

    fn process_elif(&mut self, node: &AptNode) {
        let Some(state) = self.directive_stack.last().map(|entry| entry.state) else {
            self.diagnostics.emit(
                Diagnostic::error("`#elif` without a matching `#if`")
                    .with_label(Label::primary(&node.token, "")),
            );
            return;
        };
        let new_state = match state {
            BranchState::Active => Some(BranchState::InactiveAlreadyTaken),
            BranchState::InactiveConditionFalse if self.enclosing_is_active() => {
                let rest = self.directive_rest(node);
                let mut evaluator = ConditionEvaluator::new(
                    self.sources,
                    self.macro_table,
                    &mut *self.diagnostics,
                    self.config.max_expansion_depth,
                );
                evaluator
                    .evaluate(&rest, node.token)
                    .then_some(BranchState::Active)
            }
            // An earlier branch was taken (or the enclosing context is
            // inactive); the condition is not even evaluated.
            BranchState::InactiveConditionFalse | BranchState::InactiveAlreadyTaken => None,
        };
        if let (Some(new_state), Some(top)) = (new_state, self.directive_stack.last_mut()) {
            top.state = new_state;
        }
    }

    fn process_else(&mut self, node: &AptNode) {
        let Some(state) = self.directive_stack.last().map(|entry| entry.state) else {
            self.diagnostics.emit(
                Diagnostic::error("`#else` without a matching `#if`")
                    .with_label(Label::primary(&node.token, "")),
            );
            return;
        };
        let new_state = match state {
            BranchState::Active => Some(BranchState::InactiveAlreadyTaken),
            BranchState::InactiveConditionFalse if self.enclosing_is_active() => {
                Some(BranchState::Active)
            }
            BranchState::InactiveConditionFalse | BranchState::InactiveAlreadyTaken => None,
        };
        if let (Some(new_state), Some(top)) = (new_state, self.directive_stack.last_mut()) {
            top.state = new_state;
        }
    }

    fn process_endif(&mut self, node: &AptNode) {
        if self.directive_stack.pop().is_none() {
            self.diagnostics.emit(
                Diagnostic::error("`#endif` without a matching `#if`")
                    .with_label(Label::primary(&node.token, "")),
            );
        }
    }

    fn process_error_directive(&mut self, node: &AptNode) {
        if !self.is_active() {
            return;
        }
        let rest = self.directive_rest(node);
        let message = match (rest.first(), rest.last()) {
            (Some(first), Some(last)) => {
                let span = first.span().join(&last.span());
                self.sources.source(&span).to_owned()
            }
            _ => String::new(),
        };
        self.diagnostics.emit(
            Diagnostic::error(format!("#error: {message}"))
                .with_label(Label::primary(&node.token, "")),
        );
    }
}

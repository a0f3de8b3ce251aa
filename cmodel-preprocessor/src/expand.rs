//! Macro expansion with rescanning.
//!
//! Substitution works on slices of arena token IDs: an expanded stream is just a
//! different ordering of tokens that already exist in the arena (invocation
//! arguments come from the call site, replacement tokens from the `#define`
//! body). Expansion of a run terminates because every substituted body is
//! rescanned with its own macro name hidden, and a depth limit backstops
//! pathological mutual recursion.

use std::collections::HashSet;

use cmodel_foundation::errors::{Diagnostic, DiagnosticSink, Label};
use cmodel_lexer::{
    sources::LexedSources,
    token::{AnyToken, Token, TokenKind, TokenSpan},
    token_stream::{Channel, TokenSpanCursor, TokenStream},
};

use crate::macro_table::{MacroDefinition, MacroTable};

pub const VA_ARGS: &str = "__VA_ARGS__";

pub struct MacroExpander<'a, 's> {
    sources: LexedSources<'s>,
    macro_table: &'a MacroTable,
    diagnostics: &'a mut dyn DiagnosticSink<Token>,
    max_depth: usize,
}

struct Invocation {
    /// Argument token runs, split on top-level commas.
    arguments: Vec<Vec<AnyToken>>,
    /// The comma tokens separating the arguments, used to rebuild `__VA_ARGS__`.
    separators: Vec<AnyToken>,
    /// Index one past the closing `)` in the input run.
    end: usize,
}

impl<'a, 's> MacroExpander<'a, 's> {
    pub fn new(
        sources: LexedSources<'s>,
        macro_table: &'a MacroTable,
        diagnostics: &'a mut dyn DiagnosticSink<Token>,
        max_depth: usize,
    ) -> Self {
        Self {
            sources,
            macro_table,
            diagnostics,
            max_depth,
        }
    }

    /// Expands one forwarded token run.
    pub fn expand_run(&mut self, tokens: &[AnyToken]) -> Vec<AnyToken> {
        let hide = HashSet::new();
        self.expand_with(tokens, &hide, 0)
    }

    fn span_tokens(&self, span: TokenSpan) -> Vec<AnyToken> {
        let mut tokens = vec![];
        if let Some(mut cursor) = TokenSpanCursor::new(self.sources.token_arena, span) {
            loop {
                let token = cursor.next_from(Channel::CODE);
                if token.kind == TokenKind::EndOfFile {
                    break;
                }
                tokens.push(token);
            }
        }
        tokens
    }

    fn expand_with(
        &mut self,
        tokens: &[AnyToken],
        hide: &HashSet<String>,
        depth: usize,
    ) -> Vec<AnyToken> {
        if depth >= self.max_depth {
            if let Some(first) = tokens.first() {
                self.diagnostics.emit(
                    Diagnostic::error("macro expansion is nested too deeply")
                        .with_label(Label::primary(first, "expansion of this text was abandoned")),
                );
            }
            return tokens.to_vec();
        }

        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            if token.kind != TokenKind::Ident {
                out.push(token);
                i += 1;
                continue;
            }

            let name = self.sources.source(&token);
            let definition = match self.macro_table.lookup(name) {
                Some(definition) if definition.is_valid && !hide.contains(name) => {
                    definition.clone()
                }
                _ => {
                    out.push(token);
                    i += 1;
                    continue;
                }
            };

            if definition.is_function_like {
                // A function-like macro name is only an invocation when a `(`
                // follows; otherwise the name passes through untouched.
                let open_paren = next_code_index(tokens, i + 1);
                match open_paren {
                    Some(paren) if tokens[paren].kind == TokenKind::LeftParen => {
                        match self.collect_invocation(tokens, token, paren) {
                            Some(invocation) => {
                                if let Some(substituted) =
                                    self.substitute(&definition, token, &invocation, hide, depth)
                                {
                                    let mut rescan_hide = hide.clone();
                                    rescan_hide.insert(definition.name.clone());
                                    out.extend(self.expand_with(
                                        &substituted,
                                        &rescan_hide,
                                        depth + 1,
                                    ));
                                    i = invocation.end;
                                    continue;
                                }
                                // Bad argument count: leave the whole invocation
                                // unexpanded.
                                out.extend_from_slice(&tokens[i..invocation.end]);
                                i = invocation.end;
                                continue;
                            }
                            None => {
                                // Unterminated invocation; the name and whatever
                                // followed it pass through unexpanded.
                                out.push(token);
                                i += 1;
                                continue;
                            }
                        }
                    }
                    _ => {
                        out.push(token);
                        i += 1;
                        continue;
                    }
                }
            }

            // Object-like: replace by the body, rescanned with this name hidden.
            let body = self.span_tokens(definition.body);
            let mut rescan_hide = hide.clone();
            rescan_hide.insert(definition.name.clone());
            out.extend(self.expand_with(&body, &rescan_hide, depth + 1));
            i += 1;
        }
        out
    }

    /// Captures a function-like invocation's arguments by counting nested
    /// parentheses; commas inside nested parens belong to the enclosing argument.
    ///
    /// Returns [`None`] (and reports a diagnostic) if the invocation is not
    /// terminated within the run.
    fn collect_invocation(
        &mut self,
        tokens: &[AnyToken],
        name_token: AnyToken,
        open_paren: usize,
    ) -> Option<Invocation> {
        let mut arguments: Vec<Vec<AnyToken>> = vec![vec![]];
        let mut separators = vec![];
        let mut paren_depth = 1_usize;
        let mut i = open_paren + 1;
        while i < tokens.len() {
            let token = tokens[i];
            match token.kind {
                TokenKind::LeftParen => paren_depth += 1,
                TokenKind::RightParen => {
                    paren_depth -= 1;
                    if paren_depth == 0 {
                        return Some(Invocation {
                            arguments,
                            separators,
                            end: i + 1,
                        });
                    }
                }
                TokenKind::Comma if paren_depth == 1 => {
                    separators.push(token);
                    arguments.push(vec![]);
                    i += 1;
                    continue;
                }
                // Linefeeds and comments inside an invocation are insignificant.
                TokenKind::NewLine | TokenKind::Comment => {
                    i += 1;
                    continue;
                }
                _ => {}
            }
            arguments
                .last_mut()
                .expect("argument list starts with one empty argument")
                .push(token);
            i += 1;
        }
        self.diagnostics.emit(
            Diagnostic::error(format!(
                "unterminated invocation of macro `{}`",
                self.sources.source(&name_token)
            ))
            .with_label(Label::primary(
                &tokens[open_paren],
                "this `(` does not have a matching `)`",
            )),
        );
        None
    }

    /// Replaces parameter occurrences in the body with the fully expanded
    /// argument tokens. Returns [`None`] on an argument count mismatch.
    fn substitute(
        &mut self,
        definition: &MacroDefinition,
        name_token: AnyToken,
        invocation: &Invocation,
        hide: &HashSet<String>,
        depth: usize,
    ) -> Option<Vec<AnyToken>> {
        let named = definition.parameters.len();
        let mut arguments = invocation.arguments.clone();

        // `F()` is an invocation with zero arguments, not one empty argument.
        if named == 0 && !definition.is_variadic && arguments.len() == 1 && arguments[0].is_empty()
        {
            arguments.clear();
        }

        let count_matches = if definition.is_variadic {
            arguments.len() >= named
        } else {
            arguments.len() == named
        };
        if !count_matches {
            self.diagnostics.emit(
                Diagnostic::error(format!(
                    "macro `{}` expects {} argument{}, but {} {} provided",
                    definition.name,
                    named,
                    if named == 1 { "" } else { "s" },
                    arguments.len(),
                    if arguments.len() == 1 { "was" } else { "were" },
                ))
                .with_label(Label::primary(&name_token, "in this invocation"))
                .with_label(Label::secondary(
                    &definition.name_token,
                    "the macro is defined here",
                )),
            );
            return None;
        }

        // Arguments are macro-expanded before substitution.
        let expanded_arguments: Vec<Vec<AnyToken>> = arguments
            .iter()
            .map(|argument| self.expand_with(argument, hide, depth + 1))
            .collect();

        // `__VA_ARGS__` is the trailing arguments rejoined with their original
        // comma tokens.
        let variadic_tokens: Vec<AnyToken> = if definition.is_variadic {
            let mut rejoined = vec![];
            for (index, argument) in expanded_arguments.iter().enumerate().skip(named) {
                if index > named {
                    rejoined.push(invocation.separators[index - 1]);
                }
                rejoined.extend_from_slice(argument);
            }
            rejoined
        } else {
            vec![]
        };

        let body = self.span_tokens(definition.body);
        let mut result = Vec::with_capacity(body.len());
        for token in body {
            if token.kind == TokenKind::Ident {
                let text = self.sources.source(&token);
                if let Some(position) = definition
                    .parameters
                    .iter()
                    .position(|parameter| parameter == text)
                {
                    result.extend_from_slice(&expanded_arguments[position]);
                    continue;
                }
                if definition.is_variadic && text == VA_ARGS {
                    result.extend_from_slice(&variadic_tokens);
                    continue;
                }
            }
            // `#` and `##` operators pass through verbatim; no stringization or
            // token pasting is performed at this layer.
            result.push(token);
        }
        Some(result)
    }
}

fn next_code_index(tokens: &[AnyToken], mut from: usize) -> Option<usize> {
    while let Some(token) = tokens.get(from) {
        if token.kind.channel() == Channel::CODE {
            return Some(from);
        }
        from += 1;
    }
    None
}

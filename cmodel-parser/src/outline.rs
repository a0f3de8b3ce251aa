//! Declaration-skeleton backend.
//!
//! This backend does not parse C or C++ for real; it scans the preprocessed
//! stream at brace depth zero and records the declarations it can recognize
//! by shape (namespaces, type definitions, functions). That is enough for
//! navigation-level consumers and serves as the reference backend for the
//! dispatcher protocol.

use std::fmt;

use cmodel_lexer::{
    token::{AnyToken, TokenKind},
    token_stream::Channel,
};

use crate::{
    Ast, ConstructionKind, ErrorDelegate, Language, Parser, ParserBackend, ParserInput,
    ParserRequest, ParserResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineItemKind {
    Namespace,
    Class,
    Struct,
    Union,
    Enum,
    Function,
}

impl OutlineItemKind {
    fn name(self) -> &'static str {
        match self {
            OutlineItemKind::Namespace => "namespace",
            OutlineItemKind::Class => "class",
            OutlineItemKind::Struct => "struct",
            OutlineItemKind::Union => "union",
            OutlineItemKind::Enum => "enum",
            OutlineItemKind::Function => "function",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineItem {
    pub kind: OutlineItemKind,
    pub name: String,
}

/// The skeleton tree: a flat list of top-level declarations, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    pub items: Vec<OutlineItem>,
}

impl Ast for Outline {
    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn render(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for item in &self.items {
            writeln!(out, "{} {}", item.kind.name(), item.name)?;
        }
        Ok(())
    }
}

/// Claims any C or C++ request, regardless of flavor.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineBackend;

impl ParserBackend for OutlineBackend {
    fn name(&self) -> &str {
        "outline"
    }

    fn create<'s>(
        &self,
        request: &ParserRequest,
        input: ParserInput<'s>,
    ) -> Option<Box<dyn Parser + 's>> {
        match request.language {
            Language::C | Language::Cpp => Some(Box::new(OutlineParser {
                input,
                error_delegate: None,
            })),
            Language::Other => None,
        }
    }
}

pub struct OutlineParser<'s> {
    input: ParserInput<'s>,
    error_delegate: Option<Box<dyn ErrorDelegate>>,
}

/// Statement keywords that can precede `(` at the top level of headers with
/// weird formatting; never function names.
const NON_FUNCTION_KEYWORDS: &[&str] = &[
    "if", "else", "while", "for", "do", "switch", "return", "sizeof", "typedef", "defined",
];

impl<'s> Parser for OutlineParser<'s> {
    fn set_error_delegate(&mut self, delegate: Box<dyn ErrorDelegate>) {
        self.error_delegate = Some(delegate);
    }

    fn parse(&mut self, kind: ConstructionKind) -> ParserResult {
        match kind {
            ConstructionKind::TranslationUnit | ConstructionKind::TranslationUnitWithCompound => {
                let (outline, error_count) = self.scan_translation_unit();
                ParserResult {
                    error_count,
                    ast: Box::new(outline),
                }
            }
            // Fragment entry points are not supported by this backend. This is
            // a terminal condition for the invocation, not a per-line error.
            _ => ParserResult {
                error_count: 1,
                ast: Box::new(Outline::default()),
            },
        }
    }
}

impl<'s> OutlineParser<'s> {
    fn report(&mut self, message: &str, token: AnyToken, is_eof: bool) {
        let sources = self.input.sources;
        let (line, column) = match (sources.file_of(&token), sources.source_range(&token)) {
            (Some(file_id), Some(range)) => sources
                .source_file_set
                .get(file_id)
                .line_and_column(range.start),
            _ => (1, 1),
        };
        if let Some(delegate) = &mut self.error_delegate {
            delegate.on_error(message, line, column, sources.source(&token), is_eof);
        }
    }

    fn scan_translation_unit(&mut self) -> (Outline, usize) {
        let sources = self.input.sources;
        let tokens: Vec<AnyToken> = self
            .input
            .tokens
            .iter_tokens(sources.token_arena)
            .filter(|token| token.kind.channel() == Channel::CODE)
            .collect();

        let mut items = vec![];
        let mut error_count = 0;
        let mut depth = 0_usize;
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            match token.kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    if depth == 0 {
                        self.report("unmatched `}`", token, false);
                        error_count += 1;
                    } else {
                        depth -= 1;
                    }
                }
                TokenKind::Ident if depth == 0 => {
                    let text = sources.source(&token);
                    match text {
                        "namespace" | "class" | "struct" | "union" | "enum" => {
                            let mut j = i + 1;
                            // `enum class`/`enum struct` name the enum, not a class.
                            if text == "enum" {
                                if let Some(next) = tokens.get(j) {
                                    if next.kind == TokenKind::Ident
                                        && matches!(sources.source(next), "class" | "struct")
                                    {
                                        j += 1;
                                    }
                                }
                            }
                            if let Some(name) = tokens
                                .get(j)
                                .filter(|name| name.kind == TokenKind::Ident)
                            {
                                items.push(OutlineItem {
                                    kind: match text {
                                        "namespace" => OutlineItemKind::Namespace,
                                        "class" => OutlineItemKind::Class,
                                        "struct" => OutlineItemKind::Struct,
                                        "union" => OutlineItemKind::Union,
                                        _ => OutlineItemKind::Enum,
                                    },
                                    name: sources.source(name).to_owned(),
                                });
                                i = j + 1;
                                continue;
                            }
                            // Anonymous; nothing to record.
                        }
                        _ if !NON_FUNCTION_KEYWORDS.contains(&text) => {
                            // `name ( ... )` followed by `{` or `;` is taken to
                            // be a function definition or prototype.
                            if let Some(close) = Self::invocation_end(&tokens, i + 1) {
                                let follower = tokens.get(close + 1).map(|token| token.kind);
                                if matches!(
                                    follower,
                                    Some(TokenKind::LeftBrace) | Some(TokenKind::Semi)
                                ) {
                                    items.push(OutlineItem {
                                        kind: OutlineItemKind::Function,
                                        name: text.to_owned(),
                                    });
                                    i = close + 1;
                                    continue;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
            i += 1;
        }

        if depth > 0 {
            if let Some(last) = tokens.last() {
                self.report("missing `}` before end of file", *last, true);
                error_count += 1;
            }
        }
        (Outline { items }, error_count)
    }

    /// If `tokens[open]` is `(`, returns the index of its matching `)`.
    fn invocation_end(tokens: &[AnyToken], open: usize) -> Option<usize> {
        if tokens.get(open)?.kind != TokenKind::LeftParen {
            return None;
        }
        let mut paren_depth = 1_usize;
        let mut i = open + 1;
        while let Some(token) = tokens.get(i) {
            match token.kind {
                TokenKind::LeftParen => paren_depth += 1,
                TokenKind::RightParen => {
                    paren_depth -= 1;
                    if paren_depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        None
    }
}

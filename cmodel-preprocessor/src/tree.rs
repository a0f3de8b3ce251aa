//! The abstract preprocessing tree (APT).
//!
//! Nodes live in an arena owned by [`Apt`] and link to each other through
//! first-child/next-sibling IDs only; there are no parent edges. Once
//! [`AptBuilder::build`] seals the arena the tree is never mutated again, so a
//! sealed `Apt` can be traversed from any number of threads at once.

use std::num::NonZeroU32;

use cmodel_foundation::{
    errors::{Diagnostic, DiagnosticSink, Label},
    span::Spanned,
};
use cmodel_lexer::{
    sources::LexedSources,
    token::{AnyToken, Token, TokenKind, TokenSpan},
    token_stream::TokenStream,
};

/// What a single APT node represents: one preprocessor directive, or a run of
/// ordinary tokens between directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AptNodeKind {
    File,
    TokenStream,
    Include,
    IncludeNext,
    Define,
    Undef,
    Ifdef,
    Ifndef,
    If,
    Elif,
    Else,
    Endif,
    Pragma,
    Line,
    Error,
    UnknownDirective,
}

/// ID of a node within an [`Apt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AptNodeId(NonZeroU32);

impl AptNodeId {
    fn from_index(index: usize) -> Self {
        // SAFETY: Always adds 1 to the u32, therefore it can never be zero.
        Self(unsafe { NonZeroU32::new_unchecked(index as u32 + 1) })
    }

    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

#[derive(Debug, Clone)]
pub struct AptNode {
    pub kind: AptNodeKind,
    /// The node's leading token: the `#` of a directive, or the first token of a
    /// token-stream run.
    pub token: AnyToken,
    pub span: TokenSpan,
    first_child: Option<AptNodeId>,
    next_sibling: Option<AptNodeId>,
}

impl AptNode {
    pub fn first_child(&self) -> Option<AptNodeId> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<AptNodeId> {
        self.next_sibling
    }

    pub fn text<'a>(&self, sources: &LexedSources<'a>) -> &'a str {
        sources.source(&self.span)
    }

    pub fn start_offset(&self, sources: &LexedSources<'_>) -> usize {
        sources
            .source_range(&self.span)
            .map(|range| range.start)
            .unwrap_or_default()
    }

    pub fn end_offset(&self, sources: &LexedSources<'_>) -> usize {
        sources
            .source_range(&self.span)
            .map(|range| range.end)
            .unwrap_or_default()
    }
}

/// A sealed preprocessing tree. Read-only; safe to share across threads.
#[derive(Debug)]
pub struct Apt {
    nodes: Vec<AptNode>,
    root: AptNodeId,
}

impl Apt {
    pub fn root(&self) -> AptNodeId {
        self.root
    }

    pub fn node(&self, id: AptNodeId) -> &AptNode {
        &self.nodes[id.index()]
    }

    /// Iterates over the children of `id` in source order.
    pub fn children(&self, id: AptNodeId) -> AptSiblings<'_> {
        AptSiblings {
            apt: self,
            cursor: self.node(id).first_child,
        }
    }
}

pub struct AptSiblings<'a> {
    apt: &'a Apt,
    cursor: Option<AptNodeId>,
}

impl<'a> Iterator for AptSiblings<'a> {
    type Item = (AptNodeId, &'a AptNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.apt.node(id);
        self.cursor = node.next_sibling;
        Some((id, node))
    }
}

/// Incremental, single-pass tree construction.
///
/// The builder feeds tokens to the currently open node's `accept` until the node
/// rejects one, at which point the node is closed and a new sibling begins.
/// Nothing outside this module can obtain a partially built tree; `finish` is the
/// only way out.
struct OpenNode {
    kind: AptNodeKind,
    token: AnyToken,
    span: TokenSpan,
}

impl OpenNode {
    /// Consumes tokens belonging to this node. Returns `false` on the first token
    /// that does not belong, which closes the node.
    fn accept(&mut self, at_line_start: bool, token: AnyToken) -> bool {
        match self.kind {
            // Token runs span any number of lines and stop only where a directive
            // may begin: a `#` right after a linefeed.
            AptNodeKind::TokenStream => {
                if token.kind == TokenKind::Hash && at_line_start {
                    return false;
                }
                self.span = self.span.join(&token.span());
                true
            }
            // Every directive owns the rest of its logical line.
            _ => {
                if token.kind == TokenKind::NewLine {
                    return false;
                }
                self.span = self.span.join(&token.span());
                true
            }
        }
    }
}

fn directive_kind(keyword: &str) -> Option<AptNodeKind> {
    Some(match keyword {
        "include" => AptNodeKind::Include,
        "include_next" => AptNodeKind::IncludeNext,
        "define" => AptNodeKind::Define,
        "undef" => AptNodeKind::Undef,
        "ifdef" => AptNodeKind::Ifdef,
        "ifndef" => AptNodeKind::Ifndef,
        "if" => AptNodeKind::If,
        "elif" => AptNodeKind::Elif,
        "else" => AptNodeKind::Else,
        "endif" => AptNodeKind::Endif,
        "pragma" => AptNodeKind::Pragma,
        "line" => AptNodeKind::Line,
        "error" => AptNodeKind::Error,
        _ => return None,
    })
}

pub struct AptBuilder<'a> {
    sources: LexedSources<'a>,
    diagnostics: &'a mut dyn DiagnosticSink<Token>,
    nodes: Vec<AptNode>,
    root: AptNodeId,
    last_sibling: Option<AptNodeId>,
}

impl<'a> AptBuilder<'a> {
    /// Returns a builder for the given file span, or [`None`] if the span is
    /// empty. (A lexed file always contains at least its end-of-file token.)
    pub fn new(
        sources: LexedSources<'a>,
        file_span: TokenSpan,
        diagnostics: &'a mut dyn DiagnosticSink<Token>,
    ) -> Option<Self> {
        let start = file_span.start()?;
        let root_token = AnyToken {
            kind: sources.token_arena.element(start).kind,
            id: start,
        };
        let root = AptNodeId::from_index(0);
        Some(Self {
            sources,
            diagnostics,
            nodes: vec![AptNode {
                kind: AptNodeKind::File,
                token: root_token,
                span: file_span,
                first_child: None,
                next_sibling: None,
            }],
            root,
            last_sibling: None,
        })
    }

    fn attach(&mut self, node: OpenNode) -> AptNodeId {
        let id = AptNodeId::from_index(self.nodes.len());
        self.nodes.push(AptNode {
            kind: node.kind,
            token: node.token,
            span: node.span,
            first_child: None,
            next_sibling: None,
        });
        match self.last_sibling {
            None => self.nodes[self.root.index()].first_child = Some(id),
            Some(previous) => self.nodes[previous.index()].next_sibling = Some(id),
        }
        self.last_sibling = Some(id);
        id
    }

    /// Runs the single forward pass over the file's tokens and seals the tree.
    pub fn build(mut self, tokens: &mut impl TokenStream) -> Apt {
        let mut open: Option<OpenNode> = None;
        let mut at_line_start = true;

        loop {
            let token = tokens.next();
            if token.kind == TokenKind::EndOfFile {
                if let Some(node) = open.take() {
                    self.attach(node);
                }
                break;
            }

            if let Some(mut node) = open.take() {
                if node.accept(at_line_start, token) {
                    open = Some(node);
                    at_line_start = token.kind == TokenKind::NewLine;
                    continue;
                }
                self.attach(node);
            }

            if token.kind == TokenKind::Hash && at_line_start {
                open = Some(self.begin_directive(token, tokens));
            } else if token.kind != TokenKind::NewLine {
                open = Some(OpenNode {
                    kind: AptNodeKind::TokenStream,
                    token,
                    span: token.span(),
                });
            }
            at_line_start = token.kind == TokenKind::NewLine;
        }

        Apt {
            nodes: self.nodes,
            root: self.root,
        }
    }

    /// Classifies the directive keyword following a line-initial `#` and opens the
    /// matching node. The node's span covers the `#` and the keyword so far.
    fn begin_directive(&mut self, hash: AnyToken, tokens: &mut impl TokenStream) -> OpenNode {
        let keyword = tokens.peek();
        match keyword.kind {
            TokenKind::Ident => {
                tokens.next();
                let text = self.sources.source(&keyword);
                let kind = match directive_kind(text) {
                    Some(kind) => kind,
                    None => {
                        self.diagnostics.emit(
                            Diagnostic::error(format!("unknown preprocessor directive `#{text}`"))
                                .with_label(Label::primary(&keyword, "this directive is not recognized")),
                        );
                        AptNodeKind::UnknownDirective
                    }
                };
                OpenNode {
                    kind,
                    token: hash,
                    span: hash.span().join(&keyword.span()),
                }
            }
            // `#` on a line of its own is the null directive; it is valid and has
            // no effect, so it closes immediately without a diagnostic.
            TokenKind::NewLine | TokenKind::EndOfFile => OpenNode {
                kind: AptNodeKind::UnknownDirective,
                token: hash,
                span: hash.span(),
            },
            _ => {
                self.diagnostics.emit(
                    Diagnostic::error("preprocessor directive name expected after `#`")
                        .with_label(Label::primary(&keyword, format!(
                            "expected a directive name, but got {}",
                            keyword.kind.name()
                        ))),
                );
                OpenNode {
                    kind: AptNodeKind::UnknownDirective,
                    token: hash,
                    span: hash.span(),
                }
            }
        }
    }
}

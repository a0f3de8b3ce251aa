//! Parser backend selection.
//!
//! Full grammar parsing is pluggable: backends register with a
//! [`ParserDispatcher`] in priority order, and the first backend willing to
//! handle a [`ParserRequest`] wins. The dispatcher knows nothing about backend
//! internals; it only hands over the preprocessed token stream and relays
//! structured errors through the caller's [`ErrorDelegate`].

pub mod outline;

use std::fmt;

use cmodel_lexer::sources::LexedSources;
use cmodel_preprocessor::sliced_tokens::SlicedTokens;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C,
    Cpp,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFlavor {
    Default,
    Gnu,
    Unknown,
}

/// Grammar entry point a backend must start parsing from. Entry points other
/// than a whole translation unit exist for reparsing an embedded fragment, such
/// as a single function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionKind {
    TranslationUnit,
    TranslationUnitWithCompound,
    ClassBody,
    EnumBody,
    TryBlock,
    CompoundStatement,
    Initializer,
    NamespaceDefinitionBody,
    FunctionDefinitionAfterDeclarator,
}

/// Describes one parse invocation to the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserRequest<'a> {
    pub main_file: &'a str,
    pub language: Language,
    pub language_flavor: LanguageFlavor,
}

impl<'a> ParserRequest<'a> {
    pub fn new(main_file: &'a str, language: Language, language_flavor: LanguageFlavor) -> Self {
        Self {
            main_file,
            language,
            language_flavor,
        }
    }

    /// Derives the language from the file's extension. The flavor cannot be
    /// known from the path alone and is left [`LanguageFlavor::Unknown`].
    pub fn from_file(main_file: &'a str) -> Self {
        let extension = main_file
            .rsplit_once('.')
            .map(|(_, extension)| extension)
            .unwrap_or("");
        let language = match extension {
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hh" | "hpp" | "hxx" => Language::Cpp,
            _ => Language::Other,
        };
        Self::new(main_file, language, LanguageFlavor::Unknown)
    }
}

/// The preprocessed token stream a parser reads, together with the sources
/// needed to get back at token text.
#[derive(Clone, Copy)]
pub struct ParserInput<'a> {
    pub sources: LexedSources<'a>,
    pub tokens: &'a SlicedTokens,
}

/// Receives one structured event per parse error, in source order. Line and
/// column are 1-based.
pub trait ErrorDelegate {
    fn on_error(&mut self, message: &str, line: u32, column: u32, token_text: &str, is_eof: bool);
}

/// An abstract syntax tree produced by some backend. The dispatcher treats it
/// as opaque; callers can only render it or ask whether it is empty.
pub trait Ast {
    fn is_empty(&self) -> bool;
    fn render(&self, out: &mut dyn fmt::Write) -> fmt::Result;
}

/// The empty tree, returned when a parse produces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyAst;

impl Ast for EmptyAst {
    fn is_empty(&self) -> bool {
        true
    }

    fn render(&self, _out: &mut dyn fmt::Write) -> fmt::Result {
        Ok(())
    }
}

pub struct ParserResult {
    pub error_count: usize,
    pub ast: Box<dyn Ast>,
}

impl ParserResult {
    pub fn is_empty_ast(&self) -> bool {
        self.ast.is_empty()
    }
}

/// A parser bound to one token stream. Produces a fresh [`ParserResult`] per
/// [`Parser::parse`] call.
pub trait Parser {
    fn set_error_delegate(&mut self, delegate: Box<dyn ErrorDelegate>);

    /// Parses starting from the given grammar entry point. A backend that does
    /// not support the entry point returns a result with a nonzero error count
    /// and an empty tree instead of panicking.
    fn parse(&mut self, kind: ConstructionKind) -> ParserResult;
}

/// A stateless factory producing parsers for requests it is willing to handle.
pub trait ParserBackend {
    fn name(&self) -> &str;

    /// Returns [`None`] if this backend does not claim the request.
    fn create<'s>(
        &self,
        request: &ParserRequest,
        input: ParserInput<'s>,
    ) -> Option<Box<dyn Parser + 's>>;
}

/// Process-wide backend registry. Backends register once at startup; afterwards
/// the dispatcher is read-only and may be shared freely.
#[derive(Default)]
pub struct ParserDispatcher {
    backends: Vec<Box<dyn ParserBackend>>,
}

impl ParserDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration order is priority order.
    pub fn register(&mut self, backend: Box<dyn ParserBackend>) {
        self.backends.push(backend);
    }

    /// Asks each backend in priority order; the first one to claim the request
    /// wins. [`None`] means no parser is available for this request, which is a
    /// configuration problem rather than a parse error.
    pub fn create_parser<'s>(
        &self,
        request: &ParserRequest,
        input: ParserInput<'s>,
    ) -> Option<Box<dyn Parser + 's>> {
        for backend in &self.backends {
            if let Some(parser) = backend.create(request, input) {
                debug!(backend = backend.name(), file = request.main_file, "backend claimed request");
                return Some(parser);
            }
        }
        debug!(file = request.main_file, "no backend claimed the request");
        None
    }

    /// Convenience entry that derives the request from the file path alone.
    pub fn create_parser_for_file<'s>(
        &self,
        main_file: &str,
        input: ParserInput<'s>,
    ) -> Option<Box<dyn Parser + 's>> {
        self.create_parser(&ParserRequest::from_file(main_file), input)
    }
}

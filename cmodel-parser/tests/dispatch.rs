use std::{cell::RefCell, rc::Rc};

use cmodel_foundation::{
    errors::Diagnostic,
    source::{SourceFile, SourceFileSet},
    source_arena::SourceArena,
};
use cmodel_lexer::{lexer::lex, sources::LexedSources, token::Token};
use cmodel_parser::{
    outline::OutlineBackend, Ast, ConstructionKind, EmptyAst, ErrorDelegate, Language,
    LanguageFlavor, Parser, ParserBackend, ParserDispatcher, ParserInput, ParserRequest,
    ParserResult,
};
use cmodel_preprocessor::{
    macro_table::MacroTable, sliced_tokens::SlicedTokens, CancellationToken, Preprocessor,
    PreprocessorConfig,
};
use indoc::indoc;

struct Fixture {
    source_file_set: SourceFileSet,
    token_arena: SourceArena<Token>,
    out_tokens: SlicedTokens,
}

impl Fixture {
    fn sources(&self) -> LexedSources<'_> {
        LexedSources {
            source_file_set: &self.source_file_set,
            token_arena: &self.token_arena,
        }
    }

    fn input(&self) -> ParserInput<'_> {
        ParserInput {
            sources: self.sources(),
            tokens: &self.out_tokens,
        }
    }
}

fn preprocess(input: &str) -> Fixture {
    let mut source_file_set = SourceFileSet::new();
    let file = source_file_set.add(SourceFile::new("test.c".into(), input.into()));
    let mut token_arena = SourceArena::new();
    let mut diagnostics: Vec<Diagnostic<Token>> = vec![];
    let span = lex(file, input, &mut token_arena, &mut diagnostics);

    let mut macro_table = MacroTable::new();
    let mut out_tokens = SlicedTokens::new();
    let config = PreprocessorConfig::default();
    let mut preprocessor = Preprocessor::new(
        &mut macro_table,
        LexedSources {
            source_file_set: &source_file_set,
            token_arena: &token_arena,
        },
        &mut out_tokens,
        &mut diagnostics,
        &config,
        CancellationToken::new(),
    );
    preprocessor
        .preprocess(span)
        .expect("preprocessing must not hard-fail");
    drop(preprocessor);
    assert!(diagnostics.is_empty(), "fixture input must be clean");

    Fixture {
        source_file_set,
        token_arena,
        out_tokens,
    }
}

struct NullParser {
    marker: usize,
}

impl Parser for NullParser {
    fn set_error_delegate(&mut self, _delegate: Box<dyn ErrorDelegate>) {}

    fn parse(&mut self, _kind: ConstructionKind) -> ParserResult {
        ParserResult {
            error_count: self.marker,
            ast: Box::new(EmptyAst),
        }
    }
}

struct DecliningBackend;

impl ParserBackend for DecliningBackend {
    fn name(&self) -> &str {
        "declining"
    }

    fn create<'s>(
        &self,
        _request: &ParserRequest,
        _input: ParserInput<'s>,
    ) -> Option<Box<dyn Parser + 's>> {
        None
    }
}

struct ClaimingBackend {
    marker: usize,
}

impl ParserBackend for ClaimingBackend {
    fn name(&self) -> &str {
        "claiming"
    }

    fn create<'s>(
        &self,
        _request: &ParserRequest,
        _input: ParserInput<'s>,
    ) -> Option<Box<dyn Parser + 's>> {
        Some(Box::new(NullParser {
            marker: self.marker,
        }))
    }
}

#[test]
fn first_claiming_backend_wins() {
    let fixture = preprocess("int x;\n");
    let mut dispatcher = ParserDispatcher::new();
    dispatcher.register(Box::new(DecliningBackend));
    dispatcher.register(Box::new(ClaimingBackend { marker: 42 }));
    dispatcher.register(Box::new(ClaimingBackend { marker: 7 }));

    let request = ParserRequest::new("test.c", Language::C, LanguageFlavor::Default);
    let mut parser = dispatcher
        .create_parser(&request, fixture.input())
        .expect("a backend must claim the request");
    let result = parser.parse(ConstructionKind::TranslationUnit);
    assert_eq!(result.error_count, 42);
}

#[test]
fn no_capable_backend_means_no_parser() {
    let fixture = preprocess("int x;\n");
    let mut dispatcher = ParserDispatcher::new();
    dispatcher.register(Box::new(DecliningBackend));
    dispatcher.register(Box::new(DecliningBackend));

    let request = ParserRequest::new("test.c", Language::C, LanguageFlavor::Default);
    assert!(dispatcher.create_parser(&request, fixture.input()).is_none());
}

#[test]
fn request_language_is_derived_from_the_extension() {
    assert_eq!(ParserRequest::from_file("foo.c").language, Language::C);
    assert_eq!(ParserRequest::from_file("foo.cpp").language, Language::Cpp);
    assert_eq!(ParserRequest::from_file("foo.hpp").language, Language::Cpp);
    assert_eq!(ParserRequest::from_file("foo.txt").language, Language::Other);
    assert_eq!(ParserRequest::from_file("noext").language, Language::Other);
}

#[test]
fn outline_backend_declines_unknown_languages() {
    let fixture = preprocess("int x;\n");
    let mut dispatcher = ParserDispatcher::new();
    dispatcher.register(Box::new(OutlineBackend));
    assert!(dispatcher
        .create_parser_for_file("notes.txt", fixture.input())
        .is_none());
}

#[test]
fn outline_lists_top_level_declarations() {
    let fixture = preprocess(indoc! {"
        namespace demo { }
        struct Point { int x; int y; };
        int add(int a, int b);
        int main(void) { return 0; }
    "});
    let mut dispatcher = ParserDispatcher::new();
    dispatcher.register(Box::new(OutlineBackend));
    let mut parser = dispatcher
        .create_parser_for_file("test.c", fixture.input())
        .expect("the outline backend must claim C files");

    let result = parser.parse(ConstructionKind::TranslationUnit);
    assert_eq!(result.error_count, 0);
    assert!(!result.is_empty_ast());
    let mut rendered = String::new();
    result.ast.render(&mut rendered).unwrap();
    assert_eq!(
        rendered,
        "namespace demo\nstruct Point\nfunction add\nfunction main\n"
    );
}

#[test]
fn outline_sees_through_macro_expansion() {
    let fixture = preprocess(indoc! {"
        #define NAME mangled
        int NAME(void);
    "});
    let mut dispatcher = ParserDispatcher::new();
    dispatcher.register(Box::new(OutlineBackend));
    let mut parser = dispatcher
        .create_parser_for_file("test.c", fixture.input())
        .expect("the outline backend must claim C files");

    let result = parser.parse(ConstructionKind::TranslationUnit);
    let mut rendered = String::new();
    result.ast.render(&mut rendered).unwrap();
    assert_eq!(rendered, "function mangled\n");
}

#[test]
fn unsupported_construction_kind_is_a_terminal_condition() {
    let fixture = preprocess("int x;\n");
    let mut dispatcher = ParserDispatcher::new();
    dispatcher.register(Box::new(OutlineBackend));
    let mut parser = dispatcher
        .create_parser_for_file("test.c", fixture.input())
        .expect("the outline backend must claim C files");

    let result = parser.parse(ConstructionKind::ClassBody);
    assert_eq!(result.error_count, 1);
    assert!(result.is_empty_ast());
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorEvent {
    message: String,
    line: u32,
    column: u32,
    token_text: String,
    is_eof: bool,
}

struct CollectingDelegate(Rc<RefCell<Vec<ErrorEvent>>>);

impl ErrorDelegate for CollectingDelegate {
    fn on_error(&mut self, message: &str, line: u32, column: u32, token_text: &str, is_eof: bool) {
        self.0.borrow_mut().push(ErrorEvent {
            message: message.into(),
            line,
            column,
            token_text: token_text.into(),
            is_eof,
        });
    }
}

#[test]
fn parse_errors_reach_the_delegate_with_line_and_column() {
    let fixture = preprocess("int f() {\n");
    let mut dispatcher = ParserDispatcher::new();
    dispatcher.register(Box::new(OutlineBackend));
    let mut parser = dispatcher
        .create_parser_for_file("test.c", fixture.input())
        .expect("the outline backend must claim C files");

    let events = Rc::new(RefCell::new(vec![]));
    parser.set_error_delegate(Box::new(CollectingDelegate(Rc::clone(&events))));
    let result = parser.parse(ConstructionKind::TranslationUnit);
    assert_eq!(result.error_count, 1);

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_eof);
    assert_eq!(events[0].line, 1);
    assert_eq!(events[0].token_text, "{");
}

use cmodel_foundation::{
    errors::Diagnostic,
    source::{SourceFile, SourceFileSet},
    source_arena::SourceArena,
};
use cmodel_lexer::{
    lexer::lex,
    sources::LexedSources,
    token::{Token, TokenSpan},
    token_stream::Channel,
};
use cmodel_preprocessor::{
    macro_table::MacroTable, sliced_tokens::SlicedTokens, tree::AptNodeKind, CancellationToken,
    PreprocessError, Preprocessor, PreprocessorConfig,
};
use indoc::indoc;

struct Output {
    code: String,
    diagnostics: Vec<Diagnostic<Token>>,
    macro_table: MacroTable,
}

fn preprocess(input: &str) -> Output {
    let mut source_file_set = SourceFileSet::new();
    let file = source_file_set.add(SourceFile::new("test.c".into(), input.into()));
    let mut token_arena = SourceArena::new();
    let mut diagnostics = vec![];
    let span = lex(file, input, &mut token_arena, &mut diagnostics);
    let sources = LexedSources {
        source_file_set: &source_file_set,
        token_arena: &token_arena,
    };

    let mut macro_table = MacroTable::new();
    let mut out_tokens = SlicedTokens::new();
    let config = PreprocessorConfig::default();
    let mut preprocessor = Preprocessor::new(
        &mut macro_table,
        sources,
        &mut out_tokens,
        &mut diagnostics,
        &config,
        CancellationToken::new(),
    );
    preprocessor
        .preprocess(span)
        .expect("preprocessing must not hard-fail");
    drop(preprocessor);

    let code = out_tokens
        .iter_tokens(&token_arena)
        .filter(|token| token.kind.channel() == Channel::CODE)
        .map(|token| sources.source(&token))
        .collect::<Vec<_>>()
        .join(" ");
    Output {
        code,
        diagnostics,
        macro_table,
    }
}

#[test]
fn the_whole_pipeline() {
    let output = preprocess(indoc! {"
        #define SIZE 10
        #if SIZE > 5
        int arr[SIZE];
        #endif
    "});
    assert_eq!(output.code, "int arr [ 10 ] ;");
    assert!(output.macro_table.is_defined("SIZE"));
    assert!(output.diagnostics.is_empty());
}

#[test]
fn exactly_one_branch_is_taken() {
    let output = preprocess(indoc! {"
        #if 0
        A
        #elif 1
        B
        #else
        C
        #endif
    "});
    assert_eq!(output.code, "B");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn else_after_a_taken_branch_is_skipped() {
    let output = preprocess("#if 1\na\n#else\nb\n#endif\n");
    assert_eq!(output.code, "a");
}

#[test]
fn object_macro_expands_once() {
    let output = preprocess("#define FOO 1+1\nFOO\n");
    assert_eq!(output.code, "1 + 1");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn self_referential_macro_terminates() {
    let output = preprocess("#define X X\nX\n");
    assert_eq!(output.code, "X");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn mutually_recursive_macros_terminate() {
    let output = preprocess("#define A B\n#define B A\nA\n");
    assert_eq!(output.code, "A");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn macros_expand_through_other_macros() {
    let output = preprocess("#define A B\n#define B 2\nA\n");
    assert_eq!(output.code, "2");
}

#[test]
fn commas_in_nested_parens_do_not_split_arguments() {
    let output = preprocess("#define F(a,b) a+b\nF(1,(2,3))\n");
    assert_eq!(output.code, "1 + ( 2 , 3 )");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn function_like_name_without_parens_passes_through() {
    let output = preprocess("#define F(a) a\nF;\n");
    assert_eq!(output.code, "F ;");
}

#[test]
fn variadic_arguments_are_rejoined() {
    let output = preprocess(indoc! {r#"
        #define LOG(fmt, ...) printf(fmt, __VA_ARGS__)
        LOG("x", 1, 2)
    "#});
    assert_eq!(output.code, r#"printf ( "x" , 1 , 2 )"#);
    assert!(output.diagnostics.is_empty());
}

#[test]
fn expansion_depth_limit_reports_and_leaves_the_rest_unexpanded() {
    // A chain of distinct macros sidesteps the self-reference guard, so only
    // the depth limit can stop it.
    let mut input = String::new();
    for i in 0..80 {
        input.push_str(&format!("#define STEP{i} STEP{}\n", i + 1));
    }
    input.push_str("STEP0\n");
    let output = preprocess(&input);
    assert_eq!(output.code, "STEP64");
    assert_eq!(output.diagnostics.len(), 1);
    assert!(output.diagnostics[0].message.contains("nested too deeply"));
}

#[test]
fn hash_operators_pass_through_substitution_verbatim() {
    // No stringization or token pasting; the operator tokens survive as-is.
    let output = preprocess(indoc! {"
        #define STR(x) # x
        #define CAT(a, b) a ## b
        STR(hello) CAT(foo, bar)
    "});
    assert_eq!(output.code, "# hello foo ## bar");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn argument_count_mismatch_leaves_the_invocation_unexpanded() {
    let output = preprocess("#define F(a,b) a+b\nF(1)\n");
    assert_eq!(output.code, "F ( 1 )");
    assert_eq!(output.diagnostics.len(), 1);
}

#[test]
fn malformed_define_reports_once_and_processing_continues() {
    let output = preprocess("#define M(\nint x;\n");
    assert_eq!(output.code, "int x ;");
    assert_eq!(output.diagnostics.len(), 1);
    // The name is still occupied, just never expanded.
    assert!(output.macro_table.is_defined("M"));
}

#[test]
fn undef_makes_the_name_ordinary_again() {
    let output = preprocess("#define A 1\n#undef A\nA\n");
    assert_eq!(output.code, "A");
    assert!(!output.macro_table.is_defined("A"));
}

#[test]
fn ifdef_and_ifndef() {
    let output = preprocess(indoc! {"
        #define A 1
        #ifdef A
        yes
        #endif
        #ifndef A
        no
        #endif
    "});
    assert_eq!(output.code, "yes");
}

#[test]
fn both_forms_of_defined() {
    let output = preprocess(indoc! {"
        #define A 1
        #if defined(A) && !defined B
        yes
        #endif
    "});
    assert_eq!(output.code, "yes");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn undefined_identifiers_evaluate_to_zero() {
    let output = preprocess("#if FOO\nno\n#else\nyes\n#endif\n");
    assert_eq!(output.code, "yes");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn condition_arithmetic_has_c_precedence() {
    let output = preprocess("#if 2+3*4 == 14 && (1<<4) == 16\nyes\n#endif\n");
    assert_eq!(output.code, "yes");
}

#[test]
fn conditions_understand_ternaries() {
    let output = preprocess("#if 1 ? 2 : 0\nyes\n#endif\n");
    assert_eq!(output.code, "yes");
}

#[test]
fn conditions_understand_hex_and_char_literals() {
    let output = preprocess("#if 0x10 == 16 && 'A' == 65\nyes\n#endif\n");
    assert_eq!(output.code, "yes");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn division_by_zero_is_reported() {
    let output = preprocess("#if 1/0\nno\n#endif\n");
    assert_eq!(output.code, "");
    assert_eq!(output.diagnostics.len(), 1);
}

#[test]
fn short_circuit_skips_division_by_zero() {
    let output = preprocess("#if 0 && 1/0\nno\n#else\nyes\n#endif\n");
    assert_eq!(output.code, "yes");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn inactive_branches_do_not_evaluate_conditions() {
    // The inner condition would report a division by zero if it were evaluated.
    let output = preprocess(indoc! {"
        #if 0
        #if 1/0
        no
        #endif
        #endif
    "});
    assert_eq!(output.code, "");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn elif_after_a_taken_branch_is_not_evaluated() {
    let output = preprocess("#if 1\na\n#elif 1/0\nb\n#endif\n");
    assert_eq!(output.code, "a");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn unbalanced_endif_is_reported() {
    let output = preprocess("#endif\n");
    assert_eq!(output.diagnostics.len(), 1);
}

#[test]
fn unterminated_conditional_is_reported_but_processing_completes() {
    let output = preprocess("#if 1\nx\n");
    assert_eq!(output.code, "x");
    assert_eq!(output.diagnostics.len(), 1);
}

#[test]
fn error_directive_reports_its_message() {
    let output = preprocess("#error out of cheese\n");
    assert_eq!(output.diagnostics.len(), 1);
    assert!(output.diagnostics[0].message.contains("out of cheese"));
}

#[test]
fn error_directive_in_an_inactive_branch_is_silent() {
    let output = preprocess("#if 0\n#error nope\n#endif\n");
    assert!(output.diagnostics.is_empty());
}

#[test]
fn macro_definitions_carry_across_spans() {
    // Predefined macros work by preprocessing a synthetic prelude file with the
    // same macro table before the main file.
    let prelude = "#define SIZE 10\n";
    let main = "#if SIZE > 5\nyes\n#endif\n";

    let mut source_file_set = SourceFileSet::new();
    let prelude_file = source_file_set.add(SourceFile::new("<predefined>".into(), prelude.into()));
    let main_file = source_file_set.add(SourceFile::new("test.c".into(), main.into()));
    let mut token_arena = SourceArena::new();
    let mut diagnostics: Vec<Diagnostic<Token>> = vec![];
    let prelude_span = lex(prelude_file, prelude, &mut token_arena, &mut diagnostics);
    let main_span = lex(main_file, main, &mut token_arena, &mut diagnostics);
    let sources = LexedSources {
        source_file_set: &source_file_set,
        token_arena: &token_arena,
    };

    let mut macro_table = MacroTable::new();
    let mut out_tokens = SlicedTokens::new();
    let config = PreprocessorConfig::default();
    let mut preprocessor = Preprocessor::new(
        &mut macro_table,
        sources,
        &mut out_tokens,
        &mut diagnostics,
        &config,
        CancellationToken::new(),
    );
    preprocessor.preprocess(prelude_span).unwrap();
    preprocessor.preprocess(main_span).unwrap();
    drop(preprocessor);

    let code = out_tokens
        .iter_tokens(&token_arena)
        .filter(|token| token.kind.channel() == Channel::CODE)
        .map(|token| sources.source(&token))
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(code, "yes");
    assert!(diagnostics.is_empty());
}

#[test]
fn cancellation_discards_partial_output() {
    let input = "int x;\nint y;\n";
    let mut source_file_set = SourceFileSet::new();
    let file = source_file_set.add(SourceFile::new("test.c".into(), input.into()));
    let mut token_arena = SourceArena::new();
    let mut diagnostics: Vec<Diagnostic<Token>> = vec![];
    let span = lex(file, input, &mut token_arena, &mut diagnostics);
    let sources = LexedSources {
        source_file_set: &source_file_set,
        token_arena: &token_arena,
    };

    let mut macro_table = MacroTable::new();
    let mut out_tokens = SlicedTokens::new();
    let config = PreprocessorConfig::default();
    let cancellation = CancellationToken::new();
    cancellation.cancel();
    let mut preprocessor = Preprocessor::new(
        &mut macro_table,
        sources,
        &mut out_tokens,
        &mut diagnostics,
        &config,
        cancellation,
    );
    let error = preprocessor
        .preprocess(span)
        .expect_err("the pass must notice the cancelled token");
    assert_eq!(error, PreprocessError::Cancelled);
    drop(preprocessor);
    assert!(out_tokens.is_empty());
}

#[test]
fn an_empty_token_source_is_a_hard_error() {
    let mut source_file_set = SourceFileSet::new();
    source_file_set.add(SourceFile::new("test.c".into(), "".into()));
    let token_arena = SourceArena::new();
    let sources = LexedSources {
        source_file_set: &source_file_set,
        token_arena: &token_arena,
    };

    let mut macro_table = MacroTable::new();
    let mut out_tokens = SlicedTokens::new();
    let mut diagnostics: Vec<Diagnostic<Token>> = vec![];
    let config = PreprocessorConfig::default();
    let mut preprocessor = Preprocessor::new(
        &mut macro_table,
        sources,
        &mut out_tokens,
        &mut diagnostics,
        &config,
        CancellationToken::new(),
    );
    let error = preprocessor
        .preprocess(TokenSpan::Empty)
        .expect_err("an empty span must be rejected");
    assert_eq!(error, PreprocessError::EmptyTokenSource);
}

#[test]
fn sealed_trees_are_safe_to_traverse_concurrently() {
    let input = indoc! {"
        #define SIZE 10
        #if SIZE > 5
        int arr[SIZE];
        #endif
        int tail;
    "};
    let mut source_file_set = SourceFileSet::new();
    let file = source_file_set.add(SourceFile::new("test.c".into(), input.into()));
    let mut token_arena = SourceArena::new();
    let mut diagnostics: Vec<Diagnostic<Token>> = vec![];
    let span = lex(file, input, &mut token_arena, &mut diagnostics);
    let sources = LexedSources {
        source_file_set: &source_file_set,
        token_arena: &token_arena,
    };

    let mut macro_table = MacroTable::new();
    let mut out_tokens = SlicedTokens::new();
    let config = PreprocessorConfig::default();
    let mut preprocessor = Preprocessor::new(
        &mut macro_table,
        sources,
        &mut out_tokens,
        &mut diagnostics,
        &config,
        CancellationToken::new(),
    );
    let apt = preprocessor.preprocess(span).unwrap();
    drop(preprocessor);

    let traverse = |apt: &cmodel_preprocessor::tree::Apt| -> Vec<AptNodeKind> {
        apt.children(apt.root()).map(|(_, node)| node.kind).collect()
    };
    let (first, second) = std::thread::scope(|scope| {
        let first = scope.spawn(|| traverse(&apt));
        let second = scope.spawn(|| traverse(&apt));
        (first.join().unwrap(), second.join().unwrap())
    });
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            AptNodeKind::Define,
            AptNodeKind::If,
            AptNodeKind::TokenStream,
            AptNodeKind::Endif,
            AptNodeKind::TokenStream,
        ]
    );
}

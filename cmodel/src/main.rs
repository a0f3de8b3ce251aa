use std::{fmt::Write as _, process::ExitCode};

use anyhow::{bail, Context};
use camino::Utf8PathBuf;
use clap::Parser;
use cmodel_foundation::{
    errors::{Diagnostic, Severity},
    source::{SourceFile, SourceFileSet},
    source_arena::SourceArena,
};
use cmodel_lexer::{
    lexer::lex,
    sources::LexedSources,
    token::{Token, TokenKind},
};
use cmodel_parser::{
    outline::OutlineBackend, ConstructionKind, ErrorDelegate, ParserDispatcher, ParserInput,
};
use cmodel_preprocessor::{
    macro_table::MacroTable, sliced_tokens::SlicedTokens, CancellationToken, Preprocessor,
    PreprocessorConfig,
};
use tracing::{error, metadata::LevelFilter};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
pub struct Args {
    /// The file to preprocess.
    file: Utf8PathBuf,

    /// Predefine a macro, as NAME or NAME=VALUE. May be repeated.
    #[clap(short = 'D', long = "define")]
    defines: Vec<String>,

    /// Print the preprocessing tree instead of the expanded stream.
    #[clap(long)]
    dump_apt: bool,

    /// Print the declaration outline produced by the parser backend.
    #[clap(long)]
    dump_outline: bool,

    /// Abort macro expansion beyond this nesting depth.
    #[clap(long, default_value_t = 64)]
    max_expansion_depth: usize,
}

pub fn fallible_main(args: Args) -> anyhow::Result<ExitCode> {
    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("cannot read source file at {:?}", args.file))?;

    let mut source_file_set = SourceFileSet::new();
    let predefined = predefined_source(&args.defines);
    let predefined_file = (!predefined.is_empty())
        .then(|| source_file_set.add(SourceFile::new("<predefined>".into(), predefined)));
    let main_file = source_file_set.add(SourceFile::new(args.file.to_string(), source));

    let mut diagnostics: Vec<Diagnostic<Token>> = vec![];
    let mut token_arena = SourceArena::new();
    let predefined_span = predefined_file.map(|file| {
        lex(
            file,
            &source_file_set.get(file).source,
            &mut token_arena,
            &mut diagnostics,
        )
    });
    let main_span = lex(
        main_file,
        &source_file_set.get(main_file).source,
        &mut token_arena,
        &mut diagnostics,
    );
    let sources = LexedSources {
        source_file_set: &source_file_set,
        token_arena: &token_arena,
    };

    let mut macro_table = MacroTable::new();
    let mut out_tokens = SlicedTokens::new();
    let config = PreprocessorConfig {
        max_expansion_depth: args.max_expansion_depth,
    };
    let mut preprocessor = Preprocessor::new(
        &mut macro_table,
        sources,
        &mut out_tokens,
        &mut diagnostics,
        &config,
        CancellationToken::new(),
    );
    if let Some(span) = predefined_span {
        preprocessor.preprocess(span)?;
    }
    let apt = preprocessor.preprocess(main_span)?;
    drop(preprocessor);

    let mut has_errors = false;
    for diagnostic in &diagnostics {
        has_errors |= diagnostic.severity >= Severity::Error;
        _ = sources.emit_diagnostic_to_stderr(diagnostic);
    }

    if args.dump_apt {
        for (id, node) in apt.children(apt.root()) {
            println!("{id:?} {:?} {:?}", node.kind, node.text(&sources));
        }
    } else if args.dump_outline {
        let mut dispatcher = ParserDispatcher::new();
        dispatcher.register(Box::new(OutlineBackend));
        let input = ParserInput {
            sources,
            tokens: &out_tokens,
        };
        let Some(mut parser) = dispatcher.create_parser_for_file(args.file.as_str(), input) else {
            bail!("no parser backend available for {:?}", args.file);
        };
        parser.set_error_delegate(Box::new(StderrErrorDelegate {
            filename: args.file.to_string(),
        }));
        let result = parser.parse(ConstructionKind::TranslationUnit);
        has_errors |= result.error_count > 0;
        let mut rendered = String::new();
        result.ast.render(&mut rendered)?;
        print!("{rendered}");
    } else {
        let mut line = String::new();
        for token in out_tokens.iter_tokens(sources.token_arena) {
            if token.kind == TokenKind::NewLine {
                println!("{}", line.trim_end());
                line.clear();
            } else {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(sources.source(&token));
            }
        }
        if !line.is_empty() {
            println!("{line}");
        }
    }

    Ok(if has_errors {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn predefined_source(defines: &[String]) -> String {
    let mut source = String::new();
    for define in defines {
        match define.split_once('=') {
            Some((name, value)) => _ = writeln!(source, "#define {name} {value}"),
            None => _ = writeln!(source, "#define {define} 1"),
        }
    }
    source
}

struct StderrErrorDelegate {
    filename: String,
}

impl ErrorDelegate for StderrErrorDelegate {
    fn on_error(&mut self, message: &str, line: u32, column: u32, token_text: &str, is_eof: bool) {
        if is_eof {
            eprintln!("{}:{line}:{column}: {message} (at end of file)", self.filename);
        } else if token_text.is_empty() {
            eprintln!("{}:{line}:{column}: {message}", self.filename);
        } else {
            eprintln!(
                "{}:{line}:{column}: {message} (near `{token_text}`)",
                self.filename
            );
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_writer(std::io::stderr)
            .with_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::WARN.into())
                    .from_env_lossy(),
            ),
    );
    tracing::subscriber::set_global_default(subscriber)
        .expect("cannot set default tracing subscriber");

    match fallible_main(args) {
        Ok(code) => code,
        Err(error) => {
            error!("{error:?}");
            ExitCode::FAILURE
        }
    }
}

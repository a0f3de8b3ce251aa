pub mod sink;

use std::ops::Range;

pub use codespan_reporting::diagnostic::LabelStyle;
pub use codespan_reporting::diagnostic::Severity;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::ColorChoice;
use codespan_reporting::term::termcolor::StandardStream;

pub use sink::DiagnosticSink;

use crate::source::SourceFileId;
use crate::source::SourceFileSet;
use crate::span::Span;
use crate::span::Spanned;

/// A label pointing at a span of arena elements (usually tokens).
pub struct Label<T> {
    pub style: LabelStyle,
    pub span: Span<T>,
    pub message: String,
}

impl<T> Label<T> {
    pub fn new<O, M>(style: LabelStyle, spanned: &impl Spanned<T>, message: O) -> Self
    where
        O: Into<Option<M>>,
        M: Into<String>,
    {
        let message = message.into();
        let message = message.map(|x| x.into());
        Self {
            style,
            span: spanned.span(),
            message: message.unwrap_or_default(),
        }
    }

    pub fn primary<O, M>(spanned: &impl Spanned<T>, message: O) -> Self
    where
        O: Into<Option<M>>,
        M: Into<String>,
    {
        Self::new(LabelStyle::Primary, spanned, message)
    }

    pub fn secondary<O, M>(spanned: &impl Spanned<T>, message: O) -> Self
    where
        O: Into<Option<M>>,
        M: Into<String>,
    {
        Self::new(LabelStyle::Secondary, spanned, message)
    }
}

pub struct Note {
    pub text: String,
}

impl From<String> for Note {
    fn from(text: String) -> Self {
        Self { text }
    }
}

impl From<&str> for Note {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

/// A structured diagnostic, generic over the arena element its labels point at.
pub struct Diagnostic<T> {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub labels: Vec<Label<T>>,
    pub notes: Vec<Note>,
}

impl<T> Diagnostic<T> {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            message: message.into(),
            labels: vec![],
            notes: vec![],
        }
    }

    pub fn bug(message: impl Into<String>) -> Self {
        Self::new(Severity::Bug, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_label(mut self, label: Label<T>) -> Self {
        self.labels.push(label);
        self
    }

    pub fn with_note(mut self, note: impl Into<Note>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Lowers this diagnostic into a `codespan_reporting` diagnostic, given a way
    /// to resolve element spans into byte ranges of their source files.
    pub fn to_codespan(
        &self,
        resolve: impl Fn(&Span<T>) -> Option<(SourceFileId, Range<usize>)>,
    ) -> codespan_reporting::diagnostic::Diagnostic<SourceFileId> {
        codespan_reporting::diagnostic::Diagnostic {
            severity: self.severity,
            code: self.code.clone(),
            message: self.message.clone(),
            labels: self
                .labels
                .iter()
                .filter_map(|label| {
                    let (file_id, range) = resolve(&label.span)?;
                    Some(codespan_reporting::diagnostic::Label {
                        style: label.style,
                        file_id,
                        range,
                        message: label.message.clone(),
                    })
                })
                .collect(),
            notes: self.notes.iter().map(|note| note.text.clone()).collect(),
        }
    }

    pub fn emit_to_stderr(
        &self,
        files: &SourceFileSet,
        resolve: impl Fn(&Span<T>) -> Option<(SourceFileId, Range<usize>)>,
    ) -> Result<(), codespan_reporting::files::Error> {
        term::emit(
            &mut StandardStream::stderr(ColorChoice::Auto),
            &term::Config::default(),
            files,
            &self.to_codespan(resolve),
        )
    }
}

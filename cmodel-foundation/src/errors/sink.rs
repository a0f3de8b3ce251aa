use crate::errors::Diagnostic;

/// Diagnostic sink - anything that can collect diagnostics for later display.
pub trait DiagnosticSink<T> {
    fn emit(&mut self, diagnostic: Diagnostic<T>);
}

impl<T> DiagnosticSink<T> for () {
    fn emit(&mut self, _: Diagnostic<T>) {}
}

impl<T> DiagnosticSink<T> for Vec<Diagnostic<T>> {
    fn emit(&mut self, diagnostic: Diagnostic<T>) {
        self.push(diagnostic);
    }
}

use std::collections::HashMap;

use cmodel_lexer::token::{AnyToken, TokenSpan};
use thiserror::Error;
use tracing::debug;

/// A single `#define`, object-like or function-like.
///
/// The replacement list is kept as a span into the token arena; macro expansion
/// never copies token text around.
#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub name: String,
    pub name_token: AnyToken,
    pub is_function_like: bool,
    /// Parameter names, in order. Meaningful only if function-like.
    pub parameters: Vec<String>,
    /// Whether the parameter list ended in `...`. Variadic arguments are
    /// addressed in the body as `__VA_ARGS__`.
    pub is_variadic: bool,
    pub body: TokenSpan,
    /// `false` if the `#define` was syntactically malformed (e.g. an unclosed
    /// parameter list). Invalid definitions occupy their name in the table but
    /// are never expanded.
    pub is_valid: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefineError {
    #[error("malformed parameter list in definition of `{name}`")]
    MalformedParameterList { name: String },
}

/// The macro table for one preprocessing pass.
///
/// Mutated only in source order by the pass that owns it; rebuilt from scratch
/// for every fresh pass.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    map: HashMap<String, MacroDefinition>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a definition. Redefinition is last-write-wins; no
    /// compatibility check is performed.
    ///
    /// An invalid definition is still inserted, so that `#ifdef` sees the name,
    /// but the call reports the malformed parameter list to the caller.
    pub fn define(&mut self, definition: MacroDefinition) -> Result<(), DefineError> {
        let name = definition.name.clone();
        let is_valid = definition.is_valid;
        if self.map.insert(name.clone(), definition).is_some() {
            debug!(name, "macro redefined");
        }
        if is_valid {
            Ok(())
        } else {
            Err(DefineError::MalformedParameterList { name })
        }
    }

    /// Removes the entry if present; not an error if absent.
    pub fn undef(&mut self, name: &str) {
        if self.map.remove(name).is_none() {
            debug!(name, "#undef of a macro that is not defined");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&MacroDefinition> {
        self.map.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

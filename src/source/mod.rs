//! Syntactic facts about function scopes, read from the analyzed source tree.
//!
//! The pipeline's heuristics (field-use synthesis, receiver-type disambiguation) consult these
//! facts. They are syntax-only: nothing here proves what a name binds to at runtime.

pub mod python;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::DsmConfig;
use crate::error::ExtractionFailure;
use crate::extract::normalize_file_path;
use crate::walker::walk_source_files;

/// What a call expression was invoked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receiver {
    /// `name(...)`: a plain call, e.g. a constructor call `C(...)`.
    Bare,
    /// `recv.name(...)` where `recv` is a simple identifier.
    Named(String),
    /// `expr.name(...)` where `expr` is anything more complex.
    Expression,
}

/// A call expression inside a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// 1-based line of the callee name.
    pub line: u32,
    pub receiver: Receiver,
    /// Called name (last segment for member calls).
    pub callee: String,
}

/// Anything that binds a local name: a parameter, an assignment target, a loop or `with`
/// target, an `except` alias, a walrus, an import, or a `global`/`nonlocal` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub line: u32,
    /// Class-like name the value was built from (`x = C(...)`) or annotated with
    /// (`x: C = ...`, `x: C` as a parameter). `None` for every other form.
    pub type_name: Option<String>,
}

impl Binding {
    pub fn untyped(name: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            line,
            type_name: None,
        }
    }
}

/// Statically known type of a receiver at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticType<'a> {
    /// The receiver is the method's own `self`/`cls` parameter.
    EnclosingClass,
    /// A class name; may or may not name a project class.
    Named(&'a str),
}

/// Facts about one function or method body, keyed by its canonical path in [`SourceFacts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFacts {
    /// First positional parameter of an instance/class method. `None` for free functions and
    /// static methods.
    pub receiver: Option<String>,
    /// Names accessed as `<receiver>.<name>` anywhere in the body, closures included.
    pub self_attributes: BTreeSet<String>,
    /// Parameters other than the receiver, then every binding in the body, in source order.
    pub bindings: Vec<Binding>,
    /// Calls in this scope (not in nested functions), in source order.
    pub call_sites: Vec<CallSite>,
}

impl ScopeFacts {
    /// Call sites invoking `callee`, restricted to `line` when one is given.
    pub fn calls_to<'a>(
        &'a self,
        callee: &'a str,
        line: Option<u32>,
    ) -> impl Iterator<Item = &'a CallSite> + 'a {
        self.call_sites
            .iter()
            .filter(move |c| c.callee == callee && line.is_none_or(|l| c.line == l))
    }

    /// Static type of `receiver` as seen by a call on `line`.
    ///
    /// Flow-insensitive: every binding of the name anywhere in the scope must carry the same
    /// type, and at least one must come no later than the call. One untyped or disagreeing
    /// binding means no signal, whatever branch or loop iteration it sits in. The receiver
    /// parameter is the enclosing class unless the body rebinds it.
    pub fn receiver_type(&self, receiver: &str, line: u32) -> Option<StaticType<'_>> {
        let mut bindings = self.bindings.iter().filter(|b| b.name == receiver).peekable();
        if self.receiver.as_deref() == Some(receiver) {
            return bindings.peek().is_none().then_some(StaticType::EnclosingClass);
        }

        let mut agreed: Option<&str> = None;
        let mut reaches_call = false;
        for binding in bindings {
            let type_name = binding.type_name.as_deref()?;
            if agreed.is_some_and(|t| t != type_name) {
                return None;
            }
            agreed = Some(type_name);
            reaches_call |= binding.line <= line;
        }
        agreed.filter(|_| reaches_call).map(StaticType::Named)
    }
}

/// Scope facts for a whole source tree, keyed by canonical scope path.
#[derive(Debug, Clone, Default)]
pub struct SourceFacts {
    scopes: BTreeMap<String, ScopeFacts>,
}

impl SourceFacts {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn insert(&mut self, path: impl Into<String>, facts: ScopeFacts) {
        self.scopes.insert(path.into(), facts);
    }

    pub fn scope(&self, path: &str) -> Option<&ScopeFacts> {
        self.scopes.get(path)
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Scan every Python file under `root` in parallel.
    ///
    /// Files that cannot be read or parsed are reported and skipped; their scopes simply have
    /// no facts.
    pub fn scan(root: &Path, config: &DsmConfig) -> (Self, Vec<ExtractionFailure>) {
        let files = walk_source_files(root, config);

        let results: Vec<_> = files
            .par_iter()
            .map(|path| {
                let file = normalize_file_path(root, &path.to_string_lossy());
                let scanned = std::fs::read(path)
                    .map_err(anyhow::Error::from)
                    .and_then(|source| python::scan_python(&file, &source));
                (file, scanned)
            })
            .collect();

        let mut facts = Self::new();
        let mut failures = Vec::new();
        for (file, scanned) in results {
            match scanned {
                Ok(scopes) => facts.scopes.extend(scopes),
                Err(err) => {
                    warn!("skipping source scan of {file}: {err:#}");
                    failures.push(ExtractionFailure::new(file, format!("{err:#}")));
                }
            }
        }
        debug!(files = files.len(), scopes = facts.scope_count(), "scanned source tree");
        (facts, failures)
    }
}

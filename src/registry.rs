//! Registries
//!
//! Named tables for type convertors, checker parsers, processors and writers.
//! Everything the pipeline can be extended with is looked up here by name.

use std::collections::BTreeMap;

use tracing::warn;

use crate::checker::{builtin::register_builtin_checkers, CheckerParser};
use crate::convert::{register_builtin_convertors, Convertor};
use crate::pipeline::Processor;
use crate::processors::register_builtin_processors;
use crate::writer::Writer;

/// A named table of extensions of one kind
pub struct Registry<T> {
    /// What the entries are, for diagnostics ("convertor", "processor", ...)
    kind: &'static str,
    entries: BTreeMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Register an entry. Overwriting an existing name is allowed but logged.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty.
    pub fn register(&mut self, name: impl Into<String>, entry: T) {
        let name = name.into();
        assert!(!name.is_empty(), "{} name must not be empty", self.kind);
        if self.entries.insert(name.clone(), entry).is_some() {
            warn!(kind = self.kind, name = %name, "overwriting registered {}", self.kind);
        }
    }

    pub fn unregister(&mut self, name: &str) -> Option<T> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The four registries the pipeline consults
pub struct Registries {
    pub convertors: Registry<Convertor>,
    pub checkers: Registry<CheckerParser>,
    pub processors: Registry<Processor>,
    pub writers: Registry<Box<dyn Writer>>,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Empty registries
    pub fn new() -> Self {
        Self {
            convertors: Registry::new("convertor"),
            checkers: Registry::new("checker"),
            processors: Registry::new("processor"),
            writers: Registry::new("writer"),
        }
    }

    /// Registries preloaded with the built-in convertors, checkers and processors.
    /// Writers are always supplied by the caller.
    pub fn with_builtins() -> Self {
        let mut registries = Self::new();
        register_builtin_convertors(&mut registries.convertors);
        register_builtin_checkers(&mut registries.checkers);
        register_builtin_processors(&mut registries.processors);
        registries
    }

    pub fn register_writer(&mut self, name: impl Into<String>, writer: impl Writer + 'static) {
        self.writers.register(name, Box::new(writer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_overwrite() {
        let mut registry: Registry<u32> = Registry::new("number");
        registry.register("a", 1);
        registry.register("a", 2);
        assert_eq!(registry.get("a"), Some(&2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn test_empty_name_rejected() {
        let mut registry: Registry<u32> = Registry::new("number");
        registry.register("", 1);
    }

    #[test]
    fn test_builtins_present() {
        let registries = Registries::with_builtins();
        for name in ["int", "float", "string", "bool", "json", "auto"] {
            assert!(registries.convertors.contains(name), "missing convertor {}", name);
        }
        for name in ["range", "sheet", "index", "expr", "unique", "size", "between", "regex"] {
            assert!(registries.checkers.contains(name), "missing checker {}", name);
        }
        for name in ["stringify", "define", "typedef"] {
            assert!(registries.processors.contains(name), "missing processor {}", name);
        }
        assert!(registries.writers.is_empty());
    }
}

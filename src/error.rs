//! Error types for the table pipeline

use std::fmt;

use thiserror::Error;

use crate::schema::Location;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Pipeline errors
///
/// Authoring errors carry the location of the offending cell or sheet and abort the
/// current unit of work. Validation errors are batched per context. Internal errors
/// indicate a broken invariant and abort the whole run.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("{location}: {message}")]
    Authoring { location: Location, message: String },

    #[error("{location}: syntax error in '{source_text}': {message}")]
    Syntax {
        location: Location,
        source_text: String,
        message: String,
    },

    #[error("{location}: duplicate field '{name}' (first declared at {first})")]
    DuplicateField {
        name: String,
        first: Location,
        location: Location,
    },

    #[error("duplicate row key '{key}' at {second} (first seen at {first})")]
    DuplicateKey {
        key: String,
        first: Location,
        second: Location,
    },

    #[error("{location}: cannot convert '{raw}' to {type_name}")]
    Conversion {
        location: Location,
        type_name: String,
        raw: String,
    },

    #[error("{what} not found: {name}{}", suggestion_suffix(.suggestion))]
    MissingReference {
        what: &'static str,
        name: String,
        suggestion: Option<String>,
    },

    #[error("{location}: unknown processor '@{name}'")]
    UnknownProcessor { name: String, location: Location },

    #[error("processor '{name}' failed: {message}")]
    Processor { name: String, message: String },

    #[error("{0}")]
    Validation(ValidationReport),

    #[error("stringify error at {path}: {message}")]
    Stringify { path: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{source}\n  while {trail}")]
    Traced {
        trail: String,
        #[source]
        source: Box<ForgeError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

impl ForgeError {
    pub fn authoring(location: Location, message: impl Into<String>) -> Self {
        Self::Authoring {
            location,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn processor(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processor {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The error with any breadcrumb annotation removed
    pub fn root(&self) -> &ForgeError {
        match self {
            Self::Traced { source, .. } => source.root(),
            other => other,
        }
    }

    /// Broken invariant; aborts every context, not just the current one
    pub fn is_internal(&self) -> bool {
        matches!(self.root(), Self::Internal(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_))
    }

    /// Annotate with the breadcrumb trail. Already-annotated errors keep the
    /// innermost trail, which is the most specific one.
    pub fn traced(self, trail: &crate::trail::Trail) -> Self {
        if matches!(self, Self::Traced { .. }) || trail.is_empty() {
            return self;
        }
        Self::Traced {
            trail: trail.describe(),
            source: Box::new(self),
        }
    }
}

// =============================================================================
// Validation Report
// =============================================================================

/// Failures of one checker on one field
#[derive(Debug, Clone, PartialEq)]
pub struct CheckFailure {
    /// Location of the field header
    pub field: Location,
    /// Field name
    pub field_name: String,
    /// Checker source text as authored
    pub checker: String,
    /// One entry per failing cell, capped; the last entry is `...` when truncated
    pub entries: Vec<String>,
}

/// All checker failures of one context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub writer: String,
    pub failures: Vec<CheckFailure>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of recorded failing cells (truncation markers excluded)
    pub fn failing_cells(&self) -> usize {
        self.failures
            .iter()
            .map(|f| f.entries.iter().filter(|e| e.as_str() != "...").count())
            .sum()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checker(s) failed for writer '{}'",
            self.failures.len(),
            self.writer
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  {} '{}' [{}]:",
                failure.field, failure.field_name, failure.checker
            )?;
            for entry in &failure.entries {
                write!(f, "\n    {}", entry)?;
            }
        }
        Ok(())
    }
}

//! Checkers
//!
//! Every field header may carry a list of checker expressions separated by `;` or
//! newlines. Each expression is classified when the header is read:
//!
//! | Form                 | Parser  |
//! |----------------------|---------|
//! | `@name(a, b)`        | `name`  |
//! | `[1, 2, 3]`          | `range` |
//! | `file#`              | `sheet` |
//! | `file#Sheet.field`   | `index` |
//! | anything else        | `expr`  |
//!
//! A leading `!` forces the checker to run on null cells too. `x` (and `!!x`) is
//! the explicit "no checker".
//!
//! Checkers go through three phases: parse (syntax only), resolve (the registered
//! parser builds a predicate against a writer context), and execute (the predicate
//! runs once over every non-deprecated row).

pub mod builtin;
pub mod expr;
pub mod query;

use std::cell::Cell as Flag;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::config::CheckConfig;
use crate::convert::{split_top_level, tokenize_array, unquote};
use crate::error::{CheckFailure, ForgeError, Result, ValidationReport};
use crate::registry::Registry;
use crate::schema::{Context, Field, Location, Row, Sheet, Workbook};
use crate::trail::Trail;
use crate::value::{Cell, Value};

use self::builtin::IndexSpec;
use self::expr::Expr;

/// Everything a parser may look at while building a predicate
pub struct ResolveEnv<'a> {
    pub context: &'a Context,
    pub workbook: &'a Workbook,
    pub sheet: &'a Sheet,
    pub field: &'a Field,
}

/// Everything a predicate may look at while checking a cell
pub struct CheckEnv<'a> {
    pub context: &'a Context,
    pub workbook: &'a Workbook,
    pub sheet: &'a Sheet,
    pub field: &'a Field,
}

/// Resolved check. Returns `Ok(false)` for a failing cell, optionally pushing
/// detail messages into the sink; `Err` aborts the context.
pub type Predicate = Rc<dyn Fn(&CheckEnv<'_>, &Cell, &Row, &mut Vec<String>) -> Result<bool>>;

/// Builds a predicate from a checker's arguments
pub type CheckerParser = Rc<dyn Fn(&ResolveEnv<'_>, &[String]) -> Result<Predicate>>;

/// Box a closure as a [`Predicate`]
pub fn predicate<F>(check: F) -> Predicate
where
    F: Fn(&CheckEnv<'_>, &Cell, &Row, &mut Vec<String>) -> Result<bool> + 'static,
{
    Rc::new(check)
}

/// Box a closure as a [`CheckerParser`]
pub fn parser<F>(build: F) -> CheckerParser
where
    F: Fn(&ResolveEnv<'_>, &[String]) -> Result<Predicate> + 'static,
{
    Rc::new(build)
}

// =============================================================================
// Checker
// =============================================================================

/// One checker expression attached to a field
#[derive(Clone)]
pub struct Checker {
    /// Expression as authored, without the force marker
    pub source: String,
    /// Run on null cells too
    pub force: bool,
    /// Registered parser name
    pub parser: String,
    pub args: Vec<String>,
    pub location: Location,
    predicate: Option<Predicate>,
    executed: Flag<bool>,
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker")
            .field("source", &self.source)
            .field("force", &self.force)
            .field("parser", &self.parser)
            .field("args", &self.args)
            .field("resolved", &self.predicate.is_some())
            .finish()
    }
}

impl Checker {
    fn new(source: &str, force: bool, parser: &str, args: Vec<String>, location: &Location) -> Self {
        Self {
            source: source.to_string(),
            force,
            parser: parser.to_string(),
            args,
            location: location.clone(),
            predicate: None,
            executed: Flag::new(false),
        }
    }

    /// Classify and syntax-check one expression. `None` for the explicit
    /// "no checker" forms.
    pub fn parse(text: &str, location: &Location) -> Result<Option<Checker>> {
        let text = text.trim();
        if text.is_empty() || text == "x" || text == "!!x" {
            return Ok(None);
        }
        let syntax = |message: String| ForgeError::Syntax {
            location: location.clone(),
            source_text: text.to_string(),
            message,
        };

        let (force, body) = match text.strip_prefix('!') {
            Some(rest) if !rest.starts_with('=') => (true, rest.trim()),
            _ => (false, text),
        };

        if let Some(named) = body.strip_prefix('@') {
            let (name, args) = parse_named(named).map_err(syntax)?;
            return Ok(Some(Checker::new(body, force, &name, args, location)));
        }

        if body.starts_with('[') && body.ends_with(']') {
            let values = tokenize_array(body).map_err(syntax)?;
            return Ok(Some(Checker::new(body, force, "range", values, location)));
        }

        if let Some(file) = body.strip_suffix('#') {
            if !file.contains('#') {
                let args = vec![file.trim().to_string()];
                return Ok(Some(Checker::new(body, force, "sheet", args, location)));
            }
        }

        if is_index_shape(body) {
            IndexSpec::parse(body).map_err(syntax)?;
            return Ok(Some(Checker::new(body, force, "index", vec![body.to_string()], location)));
        }

        Expr::parse(body).map_err(|e| syntax(e.to_string()))?;
        Ok(Some(Checker::new(body, force, "expr", vec![body.to_string()], location)))
    }

    pub fn is_resolved(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn was_executed(&self) -> bool {
        self.executed.get()
    }

    /// Install the resolved predicate. Resolving twice is a broken invariant.
    pub fn resolve(&mut self, predicate: Predicate) -> Result<()> {
        if self.predicate.is_some() {
            return Err(ForgeError::internal(format!(
                "checker '{}' at {} resolved twice",
                self.source, self.location
            )));
        }
        self.predicate = Some(predicate);
        Ok(())
    }

    fn begin_execution(&self) -> Result<&Predicate> {
        let predicate = self.predicate.as_ref().ok_or_else(|| {
            ForgeError::internal(format!(
                "checker '{}' at {} executed before resolution",
                self.source, self.location
            ))
        })?;
        if self.executed.replace(true) {
            return Err(ForgeError::internal(format!(
                "checker '{}' at {} executed twice",
                self.source, self.location
            )));
        }
        Ok(predicate)
    }
}

/// Text with quoted literals removed
fn outside_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None => out.push(c),
        }
    }
    out
}

/// `file#Sheet.field`: an unquoted `#` followed later by a `.name` segment
fn is_index_shape(text: &str) -> bool {
    let bare = outside_quotes(text);
    let Some((_, target)) = bare.split_once('#') else {
        return false;
    };
    target
        .split('.')
        .skip(1)
        .any(|segment| segment.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_'))
}

pub(crate) fn parse_named(text: &str) -> std::result::Result<(String, Vec<String>), String> {
    let name_len = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let name = &text[..name_len];
    if name.is_empty() {
        return Err("checker name expected after '@'".to_string());
    }
    let rest = text[name_len..].trim();
    if rest.is_empty() {
        return Ok((name.to_string(), Vec::new()));
    }
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| format!("expected '(...)' after '@{}'", name))?;
    if inner.trim().is_empty() {
        return Ok((name.to_string(), Vec::new()));
    }
    let args = split_top_level(inner, |c| c == ',')
        .iter()
        .map(|arg| unquote(arg.trim()))
        .collect();
    Ok((name.to_string(), args))
}

/// Split a header checker cell into checkers
pub fn parse_checkers(text: &str, location: &Location) -> Result<Vec<Checker>> {
    let mut checkers = Vec::new();
    for part in split_top_level(text, |c| c == ';' || c == '\n') {
        if let Some(checker) = Checker::parse(&part, location)? {
            checkers.push(checker);
        }
    }
    Ok(checkers)
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve every checker of a writer context against that context
pub fn resolve_context(context: &mut Context, parsers: &Registry<CheckerParser>, trail: &Trail) -> Result<()> {
    let mut resolved = Vec::new();

    for (wi, workbook) in context.workbooks.iter().enumerate() {
        for (si, sheet) in workbook.sheets.iter().enumerate() {
            for (fi, field) in sheet.fields.iter().enumerate() {
                for (ci, checker) in field.checkers.iter().enumerate() {
                    let _guard = trail.enter(format!("resolving checker '{}' at {}", checker.source, checker.location));
                    if checker.is_resolved() {
                        return Err(ForgeError::internal(format!(
                            "checker '{}' at {} is already resolved",
                            checker.source, checker.location
                        ))
                        .traced(trail));
                    }
                    let parser = parsers.get(&checker.parser).ok_or_else(|| {
                        ForgeError::MissingReference {
                            what: "checker",
                            name: format!("@{}", checker.parser),
                            suggestion: crate::suggest::did_you_mean(&checker.parser, parsers.names()),
                        }
                        .traced(trail)
                    })?;
                    let env = ResolveEnv {
                        context: &*context,
                        workbook,
                        sheet,
                        field,
                    };
                    let predicate = parser(&env, &checker.args).map_err(|e| e.traced(trail))?;
                    resolved.push(((wi, si, fi, ci), predicate));
                }
            }
        }
    }

    debug!(writer = %context.writer, count = resolved.len(), "resolved checkers");
    for ((wi, si, fi, ci), predicate) in resolved {
        context.workbooks[wi].sheets[si].fields[fi].checkers[ci].resolve(predicate)?;
    }
    Ok(())
}

// =============================================================================
// Execution
// =============================================================================

/// Run every resolved checker of a context. Failures are collected into one
/// [`ValidationReport`]; any other error aborts immediately.
pub fn execute_context(context: &Context, options: &CheckConfig, trail: &Trail) -> Result<()> {
    let mut report = ValidationReport {
        writer: context.writer.clone(),
        failures: Vec::new(),
    };

    for workbook in &context.workbooks {
        for sheet in &workbook.sheets {
            let rows = sheet.rows_in_order();
            for field in &sheet.fields {
                for checker in &field.checkers {
                    if options.suppress.iter().any(|s| s == &checker.parser) {
                        debug!(checker = %checker.source, "suppressed");
                        continue;
                    }
                    let _guard = trail.enter(format!("checking '{}' at {}", checker.source, checker.location));
                    let predicate = checker.begin_execution().map_err(|e| e.traced(trail))?;
                    let env = CheckEnv {
                        context,
                        workbook,
                        sheet,
                        field,
                    };

                    let mut entries = Vec::new();
                    for &(_, row) in &rows {
                        if row.is_deprecated() {
                            continue;
                        }
                        let placeholder;
                        let cell = match row.get(&field.name) {
                            Some(cell) => cell,
                            None => {
                                placeholder = Cell::raw(
                                    "",
                                    Location::cell(&sheet.path, &sheet.name, row.line, field.column),
                                )
                                .with_value(Value::Null);
                                &placeholder
                            }
                        };
                        if cell.is_null() && !checker.force {
                            continue;
                        }
                        let mut sink = Vec::new();
                        if predicate(&env, cell, row, &mut sink).map_err(|e| e.traced(trail))? {
                            continue;
                        }
                        if entries.len() < options.failure_cap {
                            let detail = if sink.is_empty() {
                                String::new()
                            } else {
                                format!(" ({})", sink.join("; "))
                            };
                            entries.push(format!("{}: '{}'{}", cell.location, cell.raw, detail));
                        } else {
                            entries.push("...".to_string());
                            break;
                        }
                    }

                    if !entries.is_empty() {
                        report.failures.push(CheckFailure {
                            field: field.location.clone(),
                            field_name: field.name.clone(),
                            checker: checker.source.clone(),
                            entries,
                        });
                    }
                }
            }
        }
    }

    if report.is_empty() {
        Ok(())
    } else {
        Err(ForgeError::Validation(report))
    }
}

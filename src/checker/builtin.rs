//! Built-in checker parsers

use std::rc::Rc;

use regex::Regex;

use super::expr::Expr;
use super::query::PathQuery;
use super::{parser, predicate, CheckEnv, CheckerParser, Predicate, ResolveEnv};
use crate::error::{ForgeError, Result};
use crate::index::{ColumnIndexer, Filter, FilterList, Indexer, RowIndexer};
use crate::registry::Registry;
use crate::suggest::did_you_mean;
use crate::value::{parse_number, Cell, Value};
use crate::schema::Row;

// =============================================================================
// Index spec
// =============================================================================

/// `[$query[&rowfilter]==]file#sheet.field[&colfilter]`
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Path query applied to the checked cell
    pub query: Option<PathQuery>,
    /// Conditions on the checked row; when unmet the cell passes
    pub row_filters: Vec<Filter>,
    /// Workbook reference; empty means the owning workbook
    pub file: String,
    /// Sheet name or `*`
    pub sheet: String,
    pub field: String,
    /// Conditions on the target rows
    pub column_filters: Vec<Filter>,
}

fn parse_filters<'a>(parts: impl Iterator<Item = &'a str>) -> std::result::Result<Vec<Filter>, String> {
    parts.map(|p| Filter::parse(p.trim())).collect()
}

impl IndexSpec {
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        let (left, right) = match text.strip_prefix('$') {
            Some(_) => {
                let (left, right) = text
                    .split_once("==")
                    .ok_or_else(|| format!("'{}' has a query but no '==' before the target", text))?;
                (Some(left), right)
            }
            None => (None, text),
        };

        let (query, row_filters) = match left {
            Some(left) => {
                let mut parts = left.split('&');
                let query = PathQuery::parse(parts.next().unwrap_or_default())?;
                (Some(query), parse_filters(parts)?)
            }
            None => (None, Vec::new()),
        };

        let mut parts = right.trim().split('&');
        let target = parts.next().unwrap_or_default().trim();
        let column_filters = parse_filters(parts)?;

        let (file, rest) = target
            .split_once('#')
            .ok_or_else(|| format!("'{}' is missing '#' between file and sheet", target))?;
        let (sheet, field) = rest
            .rsplit_once('.')
            .ok_or_else(|| format!("'{}' is missing '.field' after the sheet", target))?;
        if sheet.trim().is_empty() || field.trim().is_empty() {
            return Err(format!("'{}' needs both a sheet and a field", target));
        }

        Ok(Self {
            query,
            row_filters,
            file: file.trim().to_string(),
            sheet: sheet.trim().to_string(),
            field: field.trim().to_string(),
            column_filters,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn literal(token: &str) -> Value {
    match parse_number(token) {
        Some(n) => Value::Number(n),
        None => Value::String(token.to_string()),
    }
}

fn numeric_arg(env: &ResolveEnv<'_>, name: &str, arg: &str) -> Result<f64> {
    parse_number(arg).ok_or_else(|| {
        ForgeError::authoring(
            env.field.location.clone(),
            format!("@{} expects numeric arguments, got '{}'", name, arg),
        )
    })
}

fn arity(env: &ResolveEnv<'_>, name: &str, args: &[String], allowed: &[usize]) -> Result<()> {
    if allowed.contains(&args.len()) {
        return Ok(());
    }
    Err(ForgeError::authoring(
        env.field.location.clone(),
        format!("@{} takes {:?} argument(s), got {}", name, allowed, args.len()),
    ))
}

/// Workbook a reference points at; empty refers to the owning workbook
fn workbook_name(env: &ResolveEnv<'_>, file: &str) -> Result<String> {
    if file.is_empty() {
        return Ok(env.workbook.name.clone());
    }
    env.context
        .workbook(file)
        .map(|w| w.name.clone())
        .ok_or_else(|| ForgeError::MissingReference {
            what: "workbook",
            name: file.to_string(),
            suggestion: did_you_mean(file, env.context.workbook_names()),
        })
}

/// Scalars checked as-is; arrays checked element by element
fn leaves(value: &Value) -> Vec<&Value> {
    match value.unwrapped() {
        Value::Array(arr) => arr.items.iter().map(Value::unwrapped).collect(),
        other => vec![other],
    }
}

// =============================================================================
// Parsers
// =============================================================================

/// `[a, b, c]`: the value (or each array element) is one of the literals
fn range_parser(_env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    let allowed: Vec<Value> = args.iter().map(|a| literal(a)).collect();
    Ok(predicate(move |_env: &CheckEnv<'_>, cell: &Cell, _row: &Row, sink: &mut Vec<String>| {
        let mut ok = true;
        for v in leaves(&cell.value) {
            if !allowed.iter().any(|a| a.loose_eq(v)) {
                sink.push(format!("'{}' is not in the allowed set", v));
                ok = false;
            }
        }
        Ok(ok)
    }))
}

/// `file#`: the value names a sheet of that workbook
fn sheet_parser(env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    let file = args.first().map(String::as_str).unwrap_or_default();
    let workbook = workbook_name(env, file)?;
    Ok(predicate(move |env: &CheckEnv<'_>, cell: &Cell, _row: &Row, sink: &mut Vec<String>| {
        let target = env
            .context
            .workbook(&workbook)
            .ok_or_else(|| ForgeError::MissingReference {
                what: "workbook",
                name: workbook.clone(),
                suggestion: None,
            })?;
        let name = cell.value.to_string();
        if target.sheet(&name).is_some() {
            return Ok(true);
        }
        sink.push(format!(
            "no sheet '{}' in {}{}",
            name,
            workbook,
            did_you_mean(&name, target.sheets.iter().map(|s| s.name.as_str()))
                .map(|s| format!(", did you mean '{}'?", s))
                .unwrap_or_default()
        ));
        Ok(false)
    }))
}

/// `[$query[&rowfilter]==]file#sheet.field[&colfilter]`: every queried value
/// exists in the target column
fn index_parser(env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    let text = args.first().map(String::as_str).unwrap_or_default();
    let spec = IndexSpec::parse(text).map_err(|message| ForgeError::Syntax {
        location: env.field.location.clone(),
        source_text: text.to_string(),
        message,
    })?;
    let workbook = workbook_name(env, &spec.file)?;

    let is_key_column = spec.sheet != "*"
        && env
            .context
            .workbook(&workbook)
            .and_then(|w| w.sheet(&spec.sheet))
            .and_then(|s| s.key_field())
            .map_or(false, |key| key.name == spec.field);

    let indexer: Rc<dyn Indexer> = if is_key_column {
        Rc::new(RowIndexer::new(&workbook, &spec.sheet))
    } else {
        Rc::new(ColumnIndexer::new(&workbook, &spec.sheet, &spec.field))
    };
    let column_filters: Option<FilterList> =
        (!spec.column_filters.is_empty()).then(|| spec.column_filters.clone().into());
    let query = spec.query.clone();
    let row_filters = spec.row_filters.clone();

    Ok(predicate(move |env: &CheckEnv<'_>, cell: &Cell, row: &Row, sink: &mut Vec<String>| {
        if !row_filters.iter().all(|f| f.matches(row)) {
            return Ok(true);
        }
        let values = match &query {
            Some(query) => match query.evaluate(&cell.value) {
                Ok(values) => values,
                Err(err) => {
                    sink.push(format!("query failed: {}", err));
                    return Ok(false);
                }
            },
            None => leaves(&cell.value).into_iter().cloned().collect(),
        };

        let mut ok = true;
        for value in &values {
            if !value.is_leaf() {
                sink.push(format!("{} value cannot be looked up", value.kind()));
                ok = false;
                continue;
            }
            if !indexer.contains(env.context, value, column_filters.as_ref())? {
                sink.push(format!("'{}' not found in {}", value, indexer.target()));
                ok = false;
            }
        }
        Ok(ok)
    }))
}

/// Bare expression over `x`
fn expr_parser(env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    let text = args.first().map(String::as_str).unwrap_or_default();
    let expr = Expr::parse(text).map_err(|e| ForgeError::Syntax {
        location: env.field.location.clone(),
        source_text: text.to_string(),
        message: e.to_string(),
    })?;
    Ok(predicate(move |_env: &CheckEnv<'_>, cell: &Cell, _row: &Row, sink: &mut Vec<String>| {
        match expr.test(&cell.value) {
            Ok(result) => Ok(result),
            Err(err) => {
                sink.push(err.to_string());
                Ok(false)
            }
        }
    }))
}

/// `@unique`: no other live row carries the same value in this field
fn unique_parser(env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    arity(env, "unique", args, &[0])?;
    let indexer = ColumnIndexer::new(&env.workbook.name, &env.sheet.name, &env.field.name);
    Ok(predicate(move |env: &CheckEnv<'_>, cell: &Cell, _row: &Row, sink: &mut Vec<String>| {
        if !cell.value.is_leaf() {
            return Ok(true);
        }
        let count = indexer.lookup(env.context, &cell.value, None)?.len();
        if count > 1 {
            sink.push(format!("value appears {} times", count));
            return Ok(false);
        }
        Ok(true)
    }))
}

/// `@size(n)` or `@size(min, max)`: string length or array length
fn size_parser(env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    arity(env, "size", args, &[1, 2])?;
    let min = numeric_arg(env, "size", &args[0])?;
    let max = match args.get(1) {
        Some(arg) => numeric_arg(env, "size", arg)?,
        None => min,
    };
    Ok(predicate(move |_env: &CheckEnv<'_>, cell: &Cell, _row: &Row, sink: &mut Vec<String>| {
        let len: usize = match cell.value.unwrapped() {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            Value::Null => 0,
            other => {
                sink.push(format!("{} has no size", other.kind()));
                return Ok(false);
            }
        };
        let len = len as f64;
        if len < min || len > max {
            sink.push(format!("size {} outside [{}, {}]", len, min, max));
            return Ok(false);
        }
        Ok(true)
    }))
}

/// `@between(min, max)`: inclusive numeric bounds
fn between_parser(env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    arity(env, "between", args, &[2])?;
    let min = numeric_arg(env, "between", &args[0])?;
    let max = numeric_arg(env, "between", &args[1])?;
    Ok(predicate(move |_env: &CheckEnv<'_>, cell: &Cell, _row: &Row, sink: &mut Vec<String>| {
        let mut ok = true;
        for v in leaves(&cell.value) {
            match v.as_f64().or_else(|| v.as_str().and_then(parse_number)) {
                Some(n) if n >= min && n <= max => {}
                Some(n) => {
                    sink.push(format!("{} outside [{}, {}]", n, min, max));
                    ok = false;
                }
                None => {
                    sink.push(format!("'{}' is not a number", v));
                    ok = false;
                }
            }
        }
        Ok(ok)
    }))
}

/// `@regex(pattern)`: the value's text matches
fn regex_parser(env: &ResolveEnv<'_>, args: &[String]) -> Result<Predicate> {
    arity(env, "regex", args, &[1])?;
    let pattern = Regex::new(&args[0])?;
    Ok(predicate(move |_env: &CheckEnv<'_>, cell: &Cell, _row: &Row, sink: &mut Vec<String>| {
        let mut ok = true;
        for v in leaves(&cell.value) {
            let text = v.to_string();
            if !pattern.is_match(&text) {
                sink.push(format!("'{}' does not match /{}/", text, pattern.as_str()));
                ok = false;
            }
        }
        Ok(ok)
    }))
}

/// Register `range`, `sheet`, `index`, `expr`, `unique`, `size`, `between` and `regex`
pub fn register_builtin_checkers(registry: &mut Registry<CheckerParser>) {
    registry.register("range", parser(range_parser));
    registry.register("sheet", parser(sheet_parser));
    registry.register("index", parser(index_parser));
    registry.register("expr", parser(expr_parser));
    registry.register("unique", parser(unique_parser));
    registry.register("size", parser(size_parser));
    registry.register("between", parser(between_parser));
    registry.register("regex", parser(regex_parser));
}

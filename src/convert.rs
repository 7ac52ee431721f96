//! Value conversion
//!
//! Turns the raw text of a cell into a typed [`Value`] according to the field's
//! declared type: `base`, `base?` (nullable), `base[]` (array, nestable) or a
//! combination such as `int[]?`.

use std::fmt;
use std::rc::Rc;

use crate::error::{ForgeError, Result};
use crate::registry::Registry;
use crate::value::{parse_number, Array, Cell, Value};

/// Maps raw text to a value; `None` means "unparseable"
pub type Convertor = Rc<dyn Fn(&str) -> Option<Value>>;

// =============================================================================
// Declared Types
// =============================================================================

/// Parsed declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Base(String),
    Array(Box<TypeSpec>),
    Nullable(Box<TypeSpec>),
}

impl TypeSpec {
    pub fn parse(type_name: &str) -> std::result::Result<Self, String> {
        let t = type_name.trim();
        if let Some(inner) = t.strip_suffix('?') {
            let inner = TypeSpec::parse(inner)?;
            if matches!(inner, TypeSpec::Nullable(_)) {
                return Err(format!("type '{}' is nullable twice", type_name));
            }
            return Ok(TypeSpec::Nullable(Box::new(inner)));
        }
        if let Some(inner) = t.strip_suffix("[]") {
            return Ok(TypeSpec::Array(Box::new(TypeSpec::parse(inner)?)));
        }
        let valid = t
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(format!("invalid type name '{}'", type_name));
        }
        Ok(TypeSpec::Base(t.to_string()))
    }

    /// The innermost base type name
    pub fn base(&self) -> &str {
        match self {
            TypeSpec::Base(name) => name,
            TypeSpec::Array(inner) | TypeSpec::Nullable(inner) => inner.base(),
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Base(name) => write!(f, "{}", name),
            TypeSpec::Array(inner) => write!(f, "{}[]", inner),
            TypeSpec::Nullable(inner) => write!(f, "{}?", inner),
        }
    }
}

// =============================================================================
// Tokenizing
// =============================================================================

/// Split on delimiter characters that sit outside quotes and brackets.
/// Pieces are returned untrimmed.
pub fn split_top_level(text: &str, is_delimiter: impl Fn(char) -> bool) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '[' | '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | ')' | '}' => {
                depth -= 1;
                current.push(c);
            }
            c if depth <= 0 && is_delimiter(c) => {
                pieces.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    pieces.push(current);
    pieces
}

/// Remove one level of matching quotes, resolving backslash escapes
pub fn unquote(token: &str) -> String {
    let t = token.trim();
    let quoted = t.len() >= 2
        && ((t.starts_with('"') && t.ends_with('"')) || (t.starts_with('\'') && t.ends_with('\'')));
    if !quoted {
        return t.to_string();
    }
    let mut out = String::with_capacity(t.len());
    let mut chars = t[1..t.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn check_balance(text: &str) -> std::result::Result<(), String> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced closing bracket".to_string());
                }
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if depth != 0 {
        return Err("unbalanced brackets".to_string());
    }
    Ok(())
}

/// Tokenize an array literal: `[1, 2, "a,b"]` or the bare `1, 2, "a,b"`.
/// Quoted tokens are unquoted; nested brackets stay intact for recursive conversion.
pub fn tokenize_array(raw: &str) -> std::result::Result<Vec<String>, String> {
    let t = raw.trim();
    let inner = if let Some(rest) = t.strip_prefix('[') {
        rest.strip_suffix(']')
            .ok_or_else(|| format!("array literal '{}' is missing its closing ']'", raw))?
    } else {
        t
    };
    check_balance(inner)?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(split_top_level(inner, |c| c == ',')
        .iter()
        .map(|token| unquote(token))
        .collect())
}

// =============================================================================
// Conversion
// =============================================================================

fn convert_raw(spec: &TypeSpec, raw: &str, convertors: &Registry<Convertor>) -> std::result::Result<Value, String> {
    match spec {
        TypeSpec::Nullable(inner) => {
            if raw.trim().is_empty() {
                Ok(Value::Null)
            } else {
                convert_raw(inner, raw, convertors)
            }
        }
        TypeSpec::Array(inner) => {
            let tokens = tokenize_array(raw)?;
            let items = tokens
                .iter()
                .map(|token| convert_raw(inner, token, convertors))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Value::Array(Array::new(items)))
        }
        TypeSpec::Base(name) => {
            let convertor = convertors
                .get(name)
                .ok_or_else(|| format!("unknown type '{}'", name))?;
            convertor(raw).ok_or_else(|| format!("'{}' is not a valid {}", raw, name))
        }
    }
}

/// Convert a cell in place to `type_name`. A cell already converted to exactly
/// this type is left untouched.
pub fn convert_cell(cell: &mut Cell, type_name: &str, convertors: &Registry<Convertor>) -> Result<()> {
    if cell.type_name.as_deref() == Some(type_name) {
        return Ok(());
    }
    let spec = TypeSpec::parse(type_name)
        .map_err(|message| ForgeError::authoring(cell.location.clone(), message))?;
    if convertors.get(spec.base()).is_none() {
        return Err(ForgeError::authoring(
            cell.location.clone(),
            format!("unknown type '{}'", spec.base()),
        ));
    }
    let value = convert_raw(&spec, &cell.raw, convertors).map_err(|_| ForgeError::Conversion {
        location: cell.location.clone(),
        type_name: type_name.to_string(),
        raw: cell.raw.clone(),
    })?;
    cell.value = value;
    cell.type_name = Some(type_name.to_string());
    Ok(())
}

// =============================================================================
// Built-in Convertors
// =============================================================================

fn convert_int(raw: &str) -> Option<Value> {
    parse_number(raw)
        .filter(|n| n.fract() == 0.0)
        .map(Value::Number)
}

fn convert_float(raw: &str) -> Option<Value> {
    parse_number(raw).map(Value::Number)
}

fn convert_string(raw: &str) -> Option<Value> {
    Some(Value::String(raw.to_string()))
}

fn convert_bool(raw: &str) -> Option<Value> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(Value::Bool(true)),
        "false" | "0" | "no" | "n" | "" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn convert_json(raw: &str) -> Option<Value> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .map(|json| Value::from_json(&json))
}

fn convert_auto(raw: &str) -> Option<Value> {
    if let Some(n) = parse_number(raw) {
        return Some(Value::Number(n));
    }
    match raw.trim() {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        _ => Some(Value::String(raw.to_string())),
    }
}

/// Register `int`, `float`, `number`, `string`, `bool`, `json` and `auto`
pub fn register_builtin_convertors(registry: &mut Registry<Convertor>) {
    let builtins: [(&str, fn(&str) -> Option<Value>); 7] = [
        ("int", convert_int),
        ("float", convert_float),
        ("number", convert_float),
        ("string", convert_string),
        ("bool", convert_bool),
        ("json", convert_json),
        ("auto", convert_auto),
    ];
    for (name, convertor) in builtins {
        registry.register(name, Rc::new(convertor) as Convertor);
    }
}

//! Stringify engine
//!
//! Renders a [`Value`] tree as JSON, a Lua table literal, or a TypeScript module.
//! The three backends share one recursive walk ([`Emitter`]); they differ only in
//! delimiters, key syntax, null, string quoting, and (for TypeScript) how
//! enum-tagged objects are hoisted into declarations.
//!
//! Output is deterministic: member order never depends on storage order.
//!
//! - enum-tagged objects: by numeric member value, then by name
//! - everything else: numeric-looking keys ascending (ties broken
//!   lexicographically), then the remaining keys lexicographically

pub mod json;
pub mod lua;
pub mod ts;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::StringifyConfig;
use crate::error::{ForgeError, Result};
use crate::value::{format_number, parse_number, Array, Cell, Object, Tags, Value, DEFAULT_PRECISION};

// =============================================================================
// Format
// =============================================================================

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Lua,
    Ts,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Lua => "lua",
            Format::Ts => "ts",
        }
    }

    pub const ALL: [Format; 3] = [Format::Json, Format::Lua, Format::Ts];
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// What a serialization hook produces
#[derive(Debug, Clone, PartialEq)]
pub enum Hooked {
    /// Serialized normally in place of the cell
    Value(Value),
    /// Emitted verbatim
    Raw(String),
}

/// Custom serialization strategy for cells carrying a hook tag
pub type Hook = Rc<dyn Fn(&Cell, Format) -> Result<Hooked>>;

/// Hook tag → strategy
#[derive(Clone, Default)]
pub struct HookTable {
    hooks: BTreeMap<String, Hook>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, tag: impl Into<String>, hook: F)
    where
        F: Fn(&Cell, Format) -> Result<Hooked> + 'static,
    {
        self.hooks.insert(tag.into(), Rc::new(hook));
    }

    pub fn get(&self, tag: &str) -> Option<&Hook> {
        self.hooks.get(tag)
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.hooks.keys()).finish()
    }
}

// =============================================================================
// Options
// =============================================================================

/// TypeScript module options
#[derive(Debug, Clone)]
pub struct TsOptions {
    /// Emit `export const <name> = ...` instead of a bare literal
    pub export_name: Option<String>,
    /// Append `as const`
    pub immutable: bool,
    /// Text placed verbatim before everything else
    pub preamble: Option<String>,
}

impl Default for TsOptions {
    fn default() -> Self {
        Self {
            export_name: None,
            immutable: true,
            preamble: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StringifyOptions {
    /// Spaces per nesting level; 0 suppresses all formatting whitespace
    pub indent: usize,
    pub precision: usize,
    pub max_depth: usize,
    pub hooks: HookTable,
    pub ts: TsOptions,
}

impl Default for StringifyOptions {
    fn default() -> Self {
        Self {
            indent: 2,
            precision: DEFAULT_PRECISION,
            max_depth: 256,
            hooks: HookTable::new(),
            ts: TsOptions::default(),
        }
    }
}

impl StringifyOptions {
    pub fn from_config(config: &StringifyConfig) -> Self {
        Self {
            indent: config.indent,
            precision: config.precision,
            max_depth: config.max_depth,
            hooks: HookTable::new(),
            ts: TsOptions {
                export_name: None,
                immutable: config.immutable,
                preamble: config.preamble.clone(),
            },
        }
    }

    pub fn compact() -> Self {
        Self {
            indent: 0,
            ..Self::default()
        }
    }

    pub fn with_export_name(mut self, name: impl Into<String>) -> Self {
        self.ts.export_name = Some(name.into());
        self
    }

    pub fn with_hooks(mut self, hooks: HookTable) -> Self {
        self.hooks = hooks;
        self
    }
}

// =============================================================================
// Indentation buffer
// =============================================================================

/// Output buffer that tracks nesting level and the running column
#[derive(Debug, Clone)]
pub struct IndentBuffer {
    out: String,
    indent: usize,
    level: usize,
    column: usize,
}

impl IndentBuffer {
    pub fn new(indent: usize) -> Self {
        Self {
            out: String::new(),
            indent,
            level: 0,
            column: 0,
        }
    }

    pub fn is_compact(&self) -> bool {
        self.indent == 0
    }

    pub fn write(&mut self, text: &str) {
        self.out.push_str(text);
        match text.rfind('\n') {
            Some(pos) => self.column = text[pos + 1..].chars().count(),
            None => self.column += text.chars().count(),
        }
    }

    /// Line break plus indentation; nothing in compact mode
    pub fn newline(&mut self) {
        if self.is_compact() {
            return;
        }
        self.out.push('\n');
        let pad = self.level * self.indent;
        self.out.extend(std::iter::repeat(' ').take(pad));
        self.column = pad;
    }

    /// Single space; nothing in compact mode
    pub fn space(&mut self) {
        if !self.is_compact() {
            self.write(" ");
        }
    }

    pub fn indent(&mut self) {
        self.level += 1;
    }

    pub fn dedent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

// =============================================================================
// Shared walk
// =============================================================================

/// Per-render state shared by every backend
pub struct EmitState {
    pub buf: IndentBuffer,
    pub options: StringifyOptions,
    path: Vec<String>,
}

impl EmitState {
    pub fn new(options: &StringifyOptions) -> Self {
        Self {
            buf: IndentBuffer::new(options.indent),
            options: options.clone(),
            path: Vec::new(),
        }
    }

    /// `$.a[1].b` style path of the value being written
    pub fn path(&self) -> String {
        let mut path = String::from("$");
        for segment in &self.path {
            path.push_str(segment);
        }
        path
    }

    pub fn error(&self, message: impl Into<String>) -> ForgeError {
        ForgeError::Stringify {
            path: self.path(),
            message: message.into(),
        }
    }
}

/// Tags of a cell merged over the tags of the object it wraps
fn merged_tags(outer: &Tags, inner: &Tags) -> Tags {
    Tags {
        enum_name: inner.enum_name.clone().or_else(|| outer.enum_name.clone()),
        comment: inner.comment.clone().or_else(|| outer.comment.clone()),
        ignore: inner.ignore.union(&outer.ignore).cloned().collect(),
    }
}

/// Member keys in output order, ignored keys removed
pub fn ordered_keys<'a>(object: &'a Object, tags: &Tags) -> Vec<&'a String> {
    let mut keys: Vec<&String> = object
        .members
        .keys()
        .filter(|k| !tags.ignore.contains(*k))
        .collect();

    if tags.enum_name.is_some() {
        let value_of = |key: &String| object.get(key).and_then(|v| v.unwrapped().as_f64());
        keys.sort_by(|a, b| match (value_of(a), value_of(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        });
    } else {
        keys.sort_by(|a, b| match (parse_number(a), parse_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        });
    }
    keys
}

/// Recursive writer shared by the JSON, Lua and TypeScript backends
pub trait Emitter {
    fn state(&mut self) -> &mut EmitState;

    fn format(&self) -> Format;

    fn object_delimiters(&self) -> (&'static str, &'static str) {
        ("{", "}")
    }

    fn array_delimiters(&self) -> (&'static str, &'static str) {
        ("[", "]")
    }

    fn write_null(&mut self) -> Result<()> {
        self.state().buf.write("null");
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<()>;

    /// Member key including the separator before the value
    fn write_key(&mut self, key: &str) -> Result<()>;

    fn write_number(&mut self, n: f64) -> Result<()> {
        let state = self.state();
        if !n.is_finite() {
            return Err(state.error(format!("cannot serialize non-finite number {}", n)));
        }
        let text = format_number(n, state.options.precision);
        state.buf.write(&text);
        Ok(())
    }

    fn write_value(&mut self, value: &Value, depth: usize) -> Result<()> {
        match value {
            Value::Null => self.write_null(),
            Value::Bool(b) => {
                self.state().buf.write(if *b { "true" } else { "false" });
                Ok(())
            }
            Value::Number(n) => self.write_number(*n),
            Value::String(s) => self.write_string(s),
            Value::Cell(cell) => self.write_cell(cell, depth),
            Value::Object(object) => self.write_object(object, &object.tags, depth),
            Value::Array(array) => self.write_array(array, depth),
        }
    }

    fn write_cell(&mut self, cell: &Cell, depth: usize) -> Result<()> {
        if let Some(tag) = &cell.hook {
            let hook = self.state().options.hooks.get(tag).cloned();
            let Some(hook) = hook else {
                return Err(self.state().error(format!("unknown serialization hook '{}'", tag)));
            };
            return match hook(cell, self.format())? {
                Hooked::Raw(text) => {
                    self.state().buf.write(&text);
                    Ok(())
                }
                Hooked::Value(value) => {
                    self.check_depth(depth + 1)?;
                    self.write_value(&value, depth + 1)
                }
            };
        }
        match &cell.value {
            Value::Object(object) => {
                let tags = merged_tags(&cell.tags, &object.tags);
                self.write_object(object, &tags, depth)
            }
            other => self.write_value(other, depth),
        }
    }

    fn check_depth(&mut self, depth: usize) -> Result<()> {
        let state = self.state();
        if depth >= state.options.max_depth {
            return Err(state.error(format!("maximum depth {} exceeded", state.options.max_depth)));
        }
        Ok(())
    }

    fn write_object(&mut self, object: &Object, tags: &Tags, depth: usize) -> Result<()> {
        self.check_depth(depth)?;
        let (open, close) = self.object_delimiters();
        let keys = ordered_keys(object, tags);
        if keys.is_empty() {
            self.state().buf.write(open);
            self.state().buf.write(close);
            return Ok(());
        }

        self.state().buf.write(open);
        self.state().buf.indent();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                self.state().buf.write(",");
            }
            self.state().buf.newline();
            self.write_key(key)?;
            self.state().path.push(format!(".{}", key));
            if let Some(value) = object.get(key) {
                self.write_value(value, depth + 1)?;
            }
            self.state().path.pop();
        }
        let state = self.state();
        state.buf.dedent();
        state.buf.newline();
        state.buf.write(close);
        Ok(())
    }

    fn write_array(&mut self, array: &Array, depth: usize) -> Result<()> {
        self.check_depth(depth)?;
        let (open, close) = self.array_delimiters();
        if array.is_empty() {
            self.state().buf.write(open);
            self.state().buf.write(close);
            return Ok(());
        }

        self.state().buf.write(open);
        self.state().buf.indent();
        for (i, item) in array.items.iter().enumerate() {
            if i > 0 {
                self.state().buf.write(",");
            }
            self.state().buf.newline();
            self.state().path.push(format!("[{}]", i));
            self.write_value(item, depth + 1)?;
            self.state().path.pop();
        }
        let state = self.state();
        state.buf.dedent();
        state.buf.newline();
        state.buf.write(close);
        Ok(())
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Render a value. JSON and Lua produce a bare literal; TypeScript produces a
/// module (preamble, hoisted enums, then the literal or its export).
pub fn stringify(value: &Value, format: Format, options: &StringifyOptions) -> Result<String> {
    match format {
        Format::Json => json::render(value, options),
        Format::Lua => lua::render(value, options),
        Format::Ts => ts::render(value, options),
    }
}

/// Render a complete output file: Lua files `return` the table, and every file
/// ends with a newline.
pub fn render_document(value: &Value, format: Format, options: &StringifyOptions) -> Result<String> {
    let body = stringify(value, format, options)?;
    Ok(match format {
        Format::Lua => format!("return {}\n", body),
        _ => format!("{}\n", body),
    })
}

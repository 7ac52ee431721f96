//! Schema model: fields, sheets, workbooks and contexts

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::checker::Checker;
use crate::value::{Cell, Value};

/// Name of the field whose `true` cell marks a row as deprecated
pub const DEPRECATED_FIELD: &str = "deprecated";

/// Writer name of the context produced by reading
pub const READER_CONTEXT: &str = "reader";

// =============================================================================
// Location
// =============================================================================

/// Human-readable provenance of a workbook, sheet, or cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: String,
    pub sheet: Option<String>,
    /// 1-based sheet row
    pub row: Option<usize>,
    /// 0-based column
    pub column: Option<usize>,
}

impl Location {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn sheet(file: impl Into<String>, sheet: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            sheet: Some(sheet.into()),
            ..Default::default()
        }
    }

    pub fn cell(file: impl Into<String>, sheet: impl Into<String>, row: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            sheet: Some(sheet.into()),
            row: Some(row),
            column: Some(column),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(sheet) = &self.sheet {
            write!(f, "#{}", sheet)?;
        }
        match (self.column, self.row) {
            (Some(col), Some(row)) => write!(f, "!{}{}", column_name(col), row),
            (None, Some(row)) => write!(f, "!{}", row),
            _ => Ok(()),
        }
    }
}

/// Spreadsheet column letters for a 0-based index (`0` → `A`, `27` → `AB`)
pub fn column_name(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

// =============================================================================
// Field
// =============================================================================

/// Which writers a field is emitted for
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Writers {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl Writers {
    /// Parse the header's pipe-delimited writer list; `x` excludes the field from
    /// every writer and an empty cell means all writers.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Writers::All;
        }
        if text == "x" {
            return Writers::Only(BTreeSet::new());
        }
        Writers::Only(
            text.split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn includes(&self, writer: &str) -> bool {
        match self {
            Writers::All => true,
            Writers::Only(set) => set.contains(writer),
        }
    }
}

/// Column descriptor
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    /// 0-based column in the source sheet
    pub column: usize,
    /// Declared type, e.g. `int`, `string?`, `int[]`, `@kind`
    pub type_name: String,
    pub checkers: Vec<Checker>,
    pub writers: Writers,
    pub comment: String,
    pub location: Location,
    /// Owning sheet name
    pub sheet: String,
    /// Owning workbook path
    pub path: String,
}

impl Field {
    /// Field whose concrete type is read at runtime from another field's cell
    pub fn derived_from(&self) -> Option<&str> {
        self.type_name.strip_prefix('@').map(str::trim)
    }
}

// =============================================================================
// Rows and Sheets
// =============================================================================

/// One data row: field name → cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    /// 1-based source row
    pub line: usize,
    pub cells: BTreeMap<String, Cell>,
}

impl Row {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            cells: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Cell> {
        self.cells.get(field)
    }

    /// Converted value of a field, `Null` when the cell is absent
    pub fn value(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.cells.get(field).map(|c| &c.value).unwrap_or(&NULL)
    }

    pub fn is_deprecated(&self) -> bool {
        self.value(DEPRECATED_FIELD).as_bool() == Some(true)
    }
}

/// Processor invocation attached to a sheet header
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorCall {
    pub name: String,
    pub args: Vec<String>,
    pub location: Location,
}

/// One table plus its attached processors
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    /// Source workbook path
    pub path: String,
    pub fields: Vec<Field>,
    pub processors: Vec<ProcessorCall>,
    /// Row key → row. Keys are source line numbers until dedup re-keys rows by
    /// their primary key.
    pub data: BTreeMap<String, Row>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            fields: Vec::new(),
            processors: Vec::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The primary key field is the first declared field
    pub fn key_field(&self) -> Option<&Field> {
        self.fields.first()
    }

    /// Rows in source order
    pub fn rows_in_order(&self) -> Vec<(&String, &Row)> {
        let mut rows: Vec<_> = self.data.iter().collect();
        rows.sort_by_key(|(_, row)| row.line);
        rows
    }

    pub fn location(&self) -> Location {
        Location::sheet(&self.path, &self.name)
    }

    pub fn has_processor(&self, name: &str) -> bool {
        self.processors.iter().any(|p| p.name == name)
    }
}

// =============================================================================
// Workbook
// =============================================================================

/// One source file's sheets, owned by exactly one context
#[derive(Debug, Clone)]
pub struct Workbook {
    /// File stem, used by cross-references (`item#Item.id`)
    pub name: String,
    pub path: String,
    /// Writer of the owning context
    pub writer: String,
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = Path::new(&path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&path)
            .trim_end_matches(".grid")
            .to_string();
        Self {
            name,
            path,
            writer: READER_CONTEXT.to_string(),
            sheets: Vec::new(),
        }
    }

    /// Whether a reference names this workbook: its stem, path, or file name
    pub fn matches(&self, reference: &str) -> bool {
        reference == self.name
            || reference == self.path
            || Path::new(&self.path)
                .file_name()
                .and_then(|s| s.to_str())
                .map(|file| file == reference)
                .unwrap_or(false)
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// Sheets matching a name, or every sheet for `*`
    pub fn matching_sheets<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = &'a Sheet> + 'a {
        self.sheets
            .iter()
            .filter(move |s| pattern == "*" || s.name == pattern)
    }

    /// First sheet that declares at least one field
    pub fn first_field_sheet(&self) -> Option<usize> {
        self.sheets.iter().position(|s| !s.fields.is_empty())
    }

    pub fn location(&self) -> Location {
        Location::file(&self.path)
    }

    /// Deep copy for a writer context: fields the writer does not take are dropped
    /// together with their cells. The deprecation cell always survives so a
    /// deprecated row stays deprecated in every context.
    pub fn clone_for(&self, writer: &str) -> Workbook {
        let sheets = self
            .sheets
            .iter()
            .map(|sheet| {
                let fields: Vec<Field> = sheet
                    .fields
                    .iter()
                    .filter(|f| f.writers.includes(writer))
                    .cloned()
                    .collect();
                let data = sheet
                    .data
                    .iter()
                    .map(|(key, row)| {
                        let cells = row
                            .cells
                            .iter()
                            .filter(|(name, _)| {
                                name.as_str() == DEPRECATED_FIELD || fields.iter().any(|f| &f.name == *name)
                            })
                            .map(|(name, cell)| (name.clone(), cell.clone()))
                            .collect();
                        (key.clone(), Row { line: row.line, cells })
                    })
                    .collect();
                Sheet {
                    name: sheet.name.clone(),
                    path: sheet.path.clone(),
                    fields,
                    processors: sheet.processors.clone(),
                    data,
                }
            })
            .collect();

        Workbook {
            name: self.name.clone(),
            path: self.path.clone(),
            writer: writer.to_string(),
            sheets,
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// One independent universe of workbooks for one output target
#[derive(Debug, Clone)]
pub struct Context {
    pub writer: String,
    pub tag: String,
    pub workbooks: Vec<Workbook>,
}

impl Context {
    pub fn new(writer: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            writer: writer.into(),
            tag: tag.into(),
            workbooks: Vec::new(),
        }
    }

    pub fn is_reader(&self) -> bool {
        self.writer == READER_CONTEXT
    }

    pub fn workbook(&self, reference: &str) -> Option<&Workbook> {
        self.workbooks.iter().find(|w| w.matches(reference))
    }

    pub fn workbook_names(&self) -> Vec<&str> {
        self.workbooks.iter().map(|w| w.name.as_str()).collect()
    }

    /// Deep copy for a writer, filtering fields per writer
    pub fn clone_for(&self, writer: &str) -> Context {
        Context {
            writer: writer.to_string(),
            tag: self.tag.clone(),
            workbooks: self.workbooks.iter().map(|w| w.clone_for(writer)).collect(),
        }
    }
}

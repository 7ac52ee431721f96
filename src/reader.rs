//! Grid reading
//!
//! A [`GridSource`] turns a file into raw sheets of text cells. This module then
//! applies the header layout:
//!
//! ```text
//! row 0 (optional)  @processor(args) directives, any number, across cells
//! name              field names; empty or `#`-prefixed columns are skipped
//! type              int, string?, int[], @other, ...
//! writers           client|server, `x` for none, empty for all
//! checker           checker expressions
//! comment           free text
//! body...           data rows; trailing rows with a blank first column are trimmed
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::checker::{parse_checkers, parse_named};
use crate::convert::{split_top_level, TypeSpec};
use crate::error::{ForgeError, Result};
use crate::schema::{Field, Location, ProcessorCall, Row, Sheet, Workbook, Writers};
use crate::value::Cell;

/// Rows a header occupies at most
pub const HEADER_ROWS: usize = 6;

/// How much of a file to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadWindow {
    Header,
    Full,
}

/// One grid cell as text, with an optional hint about its original type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCell {
    pub value: String,
    pub hint: Option<String>,
}

impl From<&str> for RawCell {
    fn from(value: &str) -> Self {
        Self {
            value: value.to_string(),
            hint: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<RawCell>>,
}

impl RawSheet {
    pub fn from_rows(name: impl Into<String>, rows: &[&[&str]]) -> Self {
        Self {
            name: name.into(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| RawCell::from(*c)).collect())
                .collect(),
        }
    }

    fn text(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|c| c.value.as_str())
            .unwrap_or("")
    }
}

/// Produces raw sheets from a file
pub trait GridSource {
    fn read(&self, path: &Path, window: ReadWindow) -> Result<Vec<RawSheet>>;
}

fn apply_window(mut sheets: Vec<RawSheet>, window: ReadWindow) -> Vec<RawSheet> {
    if window == ReadWindow::Header {
        for sheet in &mut sheets {
            sheet.rows.truncate(HEADER_ROWS);
        }
    }
    sheets
}

// =============================================================================
// JSON grid files
// =============================================================================

#[derive(Debug, Deserialize)]
struct GridFile {
    sheets: Vec<GridSheet>,
}

#[derive(Debug, Deserialize)]
struct GridSheet {
    name: String,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

fn raw_cell(value: &serde_json::Value) -> RawCell {
    use serde_json::Value as Json;
    let (value, hint) = match value {
        Json::Null => (String::new(), None),
        Json::String(s) => (s.clone(), None),
        Json::Bool(b) => (b.to_string(), Some("bool")),
        Json::Number(n) => (n.to_string(), Some("number")),
        other => (other.to_string(), Some("json")),
    };
    RawCell {
        value,
        hint: hint.map(String::from),
    }
}

/// Reads `{"sheets":[{"name":"Item","rows":[["id","name"],...]}]}` files
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonGridSource;

impl GridSource for JsonGridSource {
    fn read(&self, path: &Path, window: ReadWindow) -> Result<Vec<RawSheet>> {
        let content = fs::read_to_string(path)?;
        let file: GridFile = serde_json::from_str(&content)?;
        let sheets = file
            .sheets
            .iter()
            .map(|sheet| RawSheet {
                name: sheet.name.clone(),
                rows: sheet.rows.iter().map(|row| row.iter().map(raw_cell).collect()).collect(),
            })
            .collect();
        Ok(apply_window(sheets, window))
    }
}

/// In-memory grids keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemoryGridSource {
    files: BTreeMap<PathBuf, Vec<RawSheet>>,
}

impl MemoryGridSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, sheets: Vec<RawSheet>) -> Self {
        self.files.insert(path.into(), sheets);
        self
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }
}

impl GridSource for MemoryGridSource {
    fn read(&self, path: &Path, window: ReadWindow) -> Result<Vec<RawSheet>> {
        let sheets = self.files.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} not found", path.display()))
        })?;
        Ok(apply_window(sheets, window))
    }
}

/// Grid files under `dir` whose name ends with `extension`, sorted
pub fn discover(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|name| name.ends_with(extension) && !name.starts_with('~'))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

// =============================================================================
// Header and body
// =============================================================================

fn is_directive_row(raw: &RawSheet) -> bool {
    raw.rows
        .first()
        .map(|row| row.iter().any(|c| c.value.trim_start().starts_with('@')))
        .unwrap_or(false)
}

fn parse_directives(raw: &RawSheet, path: &str) -> Result<Vec<ProcessorCall>> {
    let mut calls = Vec::new();
    let Some(row) = raw.rows.first() else {
        return Ok(calls);
    };
    for (column, cell) in row.iter().enumerate() {
        let location = Location::cell(path, &raw.name, 1, column);
        for part in split_top_level(&cell.value, |c| c == '\n' || c == ';') {
            let text = part.trim();
            if text.is_empty() {
                continue;
            }
            let syntax = |message: String| ForgeError::Syntax {
                location: location.clone(),
                source_text: text.to_string(),
                message,
            };
            let body = text
                .strip_prefix('@')
                .ok_or_else(|| syntax("processor directives start with '@'".to_string()))?;
            let (name, args) = parse_named(body).map_err(syntax)?;
            calls.push(ProcessorCall {
                name,
                args,
                location: location.clone(),
            });
        }
    }
    Ok(calls)
}

fn parse_header(raw: &RawSheet, path: &str, base: usize) -> Result<Vec<Field>> {
    let width = raw.rows.get(base).map(Vec::len).unwrap_or(0);
    let mut fields: Vec<Field> = Vec::new();

    for column in 0..width {
        let name = raw.text(base, column).trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        let location = Location::cell(path, &raw.name, base + 1, column);
        if let Some(first) = fields.iter().find(|f| f.name == name) {
            return Err(ForgeError::DuplicateField {
                name: name.to_string(),
                first: first.location.clone(),
                location,
            });
        }

        let type_text = raw.text(base + 1, column).trim();
        let type_name = if type_text.is_empty() { "auto" } else { type_text };
        if !type_name.starts_with('@') {
            TypeSpec::parse(type_name).map_err(|message| ForgeError::Syntax {
                location: Location::cell(path, &raw.name, base + 2, column),
                source_text: type_name.to_string(),
                message,
            })?;
        }

        let checker_location = Location::cell(path, &raw.name, base + 4, column);
        let checkers = parse_checkers(raw.text(base + 3, column), &checker_location)?;

        fields.push(Field {
            name: name.to_string(),
            column,
            type_name: type_name.to_string(),
            checkers,
            writers: Writers::parse(raw.text(base + 2, column)),
            comment: raw.text(base + 4, column).trim().to_string(),
            location,
            sheet: raw.name.clone(),
            path: path.to_string(),
        });
    }
    Ok(fields)
}

fn parse_sheet(raw: &RawSheet, path: &str, window: ReadWindow) -> Result<Sheet> {
    let mut sheet = Sheet::new(&raw.name, path);
    let base = if is_directive_row(raw) {
        sheet.processors = parse_directives(raw, path)?;
        1
    } else {
        0
    };
    sheet.fields = parse_header(raw, path, base)?;

    if window == ReadWindow::Header || sheet.fields.is_empty() {
        return Ok(sheet);
    }

    let body_start = base + 5;
    let mut end = raw.rows.len();
    while end > body_start && raw.text(end - 1, 0).trim().is_empty() {
        end -= 1;
    }

    for index in body_start..end {
        let line = index + 1;
        let mut row = Row::new(line);
        for field in &sheet.fields {
            let text = raw.text(index, field.column);
            let location = Location::cell(path, &raw.name, line, field.column);
            row.cells.insert(field.name.clone(), Cell::raw(text, location));
        }
        sheet.data.insert(line.to_string(), row);
    }
    Ok(sheet)
}

/// Read one file into a workbook of unconverted cells
pub fn read_workbook(source: &dyn GridSource, path: &Path, window: ReadWindow) -> Result<Workbook> {
    let path_text = path.to_string_lossy().to_string();
    let raw_sheets = source.read(path, window)?;
    let mut workbook = Workbook::new(&path_text);

    for raw in &raw_sheets {
        if workbook.sheet(&raw.name).is_some() {
            return Err(ForgeError::authoring(
                Location::sheet(&path_text, &raw.name),
                format!("sheet '{}' appears twice", raw.name),
            ));
        }
        let sheet = parse_sheet(raw, &path_text, window)?;
        debug!(
            path = %path_text,
            sheet = %sheet.name,
            fields = sheet.fields.len(),
            rows = sheet.data.len(),
            "read sheet"
        );
        workbook.sheets.push(sheet);
    }
    Ok(workbook)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_sheet() -> RawSheet {
        RawSheet::from_rows(
            "Item",
            &[
                &["@define(Quality, name, id)", "@typedef"],
                &["id", "name", "#note", "tags"],
                &["int", "string", "", "string[]"],
                &["", "client", "", "x"],
                &["x > 0", "", "", ""],
                &["Id", "Display name", "", ""],
                &["1", "Sword", "sharp", "a,b"],
                &["2", "Shield", "", ""],
                &["", "", "", ""],
            ],
        )
    }

    #[test]
    fn test_header_layout() {
        let sheet = parse_sheet(&item_sheet(), "item.xlsx", ReadWindow::Full).unwrap();
        assert_eq!(sheet.processors.len(), 2);
        assert_eq!(sheet.processors[0].name, "define");
        assert_eq!(sheet.processors[0].args, vec!["Quality", "name", "id"]);

        let names: Vec<&str> = sheet.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "tags"]);
        let id = sheet.field("id").unwrap();
        assert_eq!(id.checkers.len(), 1);
        assert_eq!(id.comment, "Id");
        assert_eq!(id.location.to_string(), "item.xlsx#Item!A2");
        assert!(!sheet.field("tags").unwrap().writers.includes("client"));
        assert!(sheet.field("name").unwrap().writers.includes("client"));
    }

    #[test]
    fn test_body_rows_keyed_by_line_and_trailing_blank_trimmed() {
        let sheet = parse_sheet(&item_sheet(), "item.xlsx", ReadWindow::Full).unwrap();
        let keys: Vec<&String> = sheet.data.keys().collect();
        assert_eq!(keys, vec!["7", "8"]);
        assert_eq!(sheet.data["7"].get("name").unwrap().raw, "Sword");
        assert_eq!(sheet.data["7"].get("tags").unwrap().location.to_string(), "item.xlsx#Item!D7");
    }

    #[test]
    fn test_header_window_reads_no_body() {
        let sheet = parse_sheet(&item_sheet(), "item.xlsx", ReadWindow::Header).unwrap();
        assert!(sheet.data.is_empty());
        assert_eq!(sheet.fields.len(), 3);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let raw = RawSheet::from_rows("Item", &[&["id", "id"], &["int", "int"]]);
        let err = parse_sheet(&raw, "item.xlsx", ReadWindow::Full).unwrap_err();
        assert!(matches!(err, ForgeError::DuplicateField { .. }));
    }

    #[test]
    fn test_bad_type_and_checker_syntax() {
        let raw = RawSheet::from_rows("Item", &[&["id"], &["int??"]]);
        assert!(matches!(
            parse_sheet(&raw, "item.xlsx", ReadWindow::Full).unwrap_err(),
            ForgeError::Syntax { .. }
        ));
        let raw = RawSheet::from_rows("Item", &[&["id"], &["int"], &[""], &["x >"]]);
        assert!(matches!(
            parse_sheet(&raw, "item.xlsx", ReadWindow::Full).unwrap_err(),
            ForgeError::Syntax { .. }
        ));
    }

    #[test]
    fn test_discover_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        for name in ["b.grid.json", "nested/a.grid.json", "~lock.grid.json", "notes.json"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        let found: Vec<String> = discover(dir.path(), ".grid.json")
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(found, vec!["b.grid.json", "nested/a.grid.json"]);
    }

    #[test]
    fn test_json_grid_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item.grid.json");
        fs::write(
            &path,
            r#"{"sheets":[{"name":"Item","rows":[["id","flag"],["int","bool"],[],[],[],[1,true],[2,false]]}]}"#,
        )
        .unwrap();

        let workbook = read_workbook(&JsonGridSource, &path, ReadWindow::Full).unwrap();
        assert_eq!(workbook.name, "item");
        let sheet = workbook.sheet("Item").unwrap();
        assert_eq!(sheet.data.len(), 2);
        assert_eq!(sheet.data["6"].get("flag").unwrap().raw, "true");

        let raw = JsonGridSource.read(&path, ReadWindow::Header).unwrap();
        assert_eq!(raw[0].rows.len(), HEADER_ROWS);
        assert_eq!(raw[0].rows[0][0].hint, None);
        let full = JsonGridSource.read(&path, ReadWindow::Full).unwrap();
        assert_eq!(full[0].rows[5][0].hint.as_deref(), Some("number"));
    }
}

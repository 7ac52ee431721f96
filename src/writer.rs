//! Writers
//!
//! A writer receives finished payloads from the built-in processors:
//!
//! - `stringify`: `{ Sheet: { rowKey: { field: cell } } }` for one workbook
//! - `define`: `{ EnumName: <enum-tagged object> }`
//! - `typedef`: `{ Sheet: [{ name, type, comment }] }`
//!
//! [`MemoryWriter`] records calls for inspection; [`FileWriter`] renders them to
//! disk with the stringify engine.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info};

use crate::checksum::{Checksum, ChecksumManifest};
use crate::error::{ForgeError, Result};
use crate::schema::Workbook;
use crate::stringify::{render_document, ts, Format, StringifyOptions};
use crate::value::{Object, Value};

/// Which processor produced a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterCall {
    Define,
    Stringify,
    Typedef,
}

impl WriterCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterCall::Define => "define",
            WriterCall::Stringify => "stringify",
            WriterCall::Typedef => "typedef",
        }
    }
}

impl fmt::Display for WriterCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output target of one writer context
pub trait Writer {
    fn write(&mut self, workbook: &Workbook, call: WriterCall, payload: &Value) -> Result<()>;
}

fn payload_object<'a>(call: WriterCall, payload: &'a Value) -> Result<&'a Object> {
    payload.unwrapped().as_object().ok_or_else(|| {
        ForgeError::internal(format!("{} payload must be an object, got {}", call, payload.kind()))
    })
}

// =============================================================================
// Memory writer
// =============================================================================

/// One recorded writer call
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub workbook: String,
    /// Writer of the context the workbook belongs to
    pub writer: String,
    pub call: WriterCall,
    pub payload: Value,
    /// Rendered text when the writer was created with a format
    pub rendered: Option<String>,
}

/// Records every call. Clones share one log, so a test can keep a handle while
/// the registry owns the writer.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    records: Rc<RefCell<Vec<Record>>>,
    format: Option<(Format, StringifyOptions)>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also render each payload in `format`
    pub fn rendering(format: Format, options: StringifyOptions) -> Self {
        Self {
            records: Rc::default(),
            format: Some((format, options)),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    pub fn calls(&self, call: WriterCall) -> Vec<Record> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.call == call)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl Writer for MemoryWriter {
    fn write(&mut self, workbook: &Workbook, call: WriterCall, payload: &Value) -> Result<()> {
        let rendered = match &self.format {
            Some((_, options)) if call == WriterCall::Typedef => Some(ts::render_interfaces(payload, options)?),
            Some((format, options)) => Some(render_document(payload, *format, options)?),
            None => None,
        };
        self.records.borrow_mut().push(Record {
            workbook: workbook.name.clone(),
            writer: workbook.writer.clone(),
            call,
            payload: payload.clone(),
            rendered,
        });
        Ok(())
    }
}

// =============================================================================
// File writer
// =============================================================================

/// Renders payloads under one output directory:
///
/// - `<out>/<workbook>/<sheet>.<ext>` for stringify
/// - `<out>/<workbook>.define.<ext>` for define
/// - `<out>/<workbook>.d.ts` for typedef (TypeScript targets only)
///
/// Unchanged artifacts are left alone; `<out>/checksums.sha256` tracks them.
pub struct FileWriter {
    out_dir: PathBuf,
    format: Format,
    options: StringifyOptions,
    manifest: ChecksumManifest,
    /// Define payloads merged per workbook; one file holds all of them
    defines: BTreeMap<String, Object>,
    typedefs: BTreeMap<String, Object>,
    written: Vec<PathBuf>,
    unchanged: usize,
}

impl FileWriter {
    pub fn new(out_dir: impl Into<PathBuf>, format: Format, options: StringifyOptions) -> Result<Self> {
        let out_dir = out_dir.into();
        let manifest = ChecksumManifest::load(&out_dir)?;
        Ok(Self {
            out_dir,
            format,
            options,
            manifest,
            defines: BTreeMap::new(),
            typedefs: BTreeMap::new(),
            written: Vec::new(),
            unchanged: 0,
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Files written (not skipped) so far
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Artifacts skipped because their checksum was unchanged
    pub fn unchanged(&self) -> usize {
        self.unchanged
    }

    fn emit(&mut self, relative: String, content: String) -> Result<()> {
        let path = self.out_dir.join(&relative);
        let checksum = Checksum::of(&content);
        if self.manifest.get(&relative) == Some(&checksum) && path.exists() {
            debug!(path = %path.display(), "unchanged, skipping");
            self.unchanged += 1;
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        self.manifest.record(relative, checksum);
        self.manifest.save(&self.out_dir)?;
        info!(path = %path.display(), "wrote artifact");
        self.written.push(path);
        Ok(())
    }

    fn options_for(&self, export_name: &str) -> StringifyOptions {
        self.options.clone().with_export_name(ts::identifier(export_name))
    }
}

impl Writer for FileWriter {
    fn write(&mut self, workbook: &Workbook, call: WriterCall, payload: &Value) -> Result<()> {
        let object = payload_object(call, payload)?;
        let ext = self.format.extension();

        match call {
            WriterCall::Stringify => {
                for (sheet, data) in &object.members {
                    let options = self.options_for(sheet);
                    let content = render_document(data, self.format, &options)?;
                    self.emit(format!("{}/{}.{}", workbook.name, sheet, ext), content)?;
                }
            }
            WriterCall::Define => {
                let merged = self.defines.entry(workbook.name.clone()).or_default();
                for (name, value) in &object.members {
                    merged.insert(name.clone(), value.clone());
                }
                let merged = Value::Object(merged.clone());
                let options = self.options_for("define");
                let content = render_document(&merged, self.format, &options)?;
                self.emit(format!("{}.define.{}", workbook.name, ext), content)?;
            }
            WriterCall::Typedef => {
                if self.format != Format::Ts {
                    debug!(workbook = %workbook.name, format = %self.format, "typedef ignored for non-TypeScript target");
                    return Ok(());
                }
                let merged = self.typedefs.entry(workbook.name.clone()).or_default();
                for (name, value) in &object.members {
                    merged.insert(name.clone(), value.clone());
                }
                let merged = Value::Object(merged.clone());
                let content = format!("{}\n", ts::render_interfaces(&merged, &self.options)?);
                self.emit(format!("{}.d.ts", workbook.name), content)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Value {
        let mut row = Object::new();
        row.insert("id", 1i64);
        let mut rows = Object::new();
        rows.insert("1", Value::Object(row));
        let mut sheets = Object::new();
        sheets.insert("Item", Value::Object(rows));
        Value::Object(sheets)
    }

    #[test]
    fn test_memory_writer_shares_log() {
        let log = MemoryWriter::rendering(Format::Json, StringifyOptions::compact());
        let mut writer = log.clone();
        let workbook = Workbook::new("item.grid.json");
        writer.write(&workbook, WriterCall::Stringify, &payload()).unwrap();

        let records = log.calls(WriterCall::Stringify);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].workbook, "item");
        assert_eq!(records[0].rendered.as_deref(), Some("{\"Item\":{\"1\":{\"id\":1}}}\n"));
    }

    #[test]
    fn test_file_writer_skips_unchanged_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = Workbook::new("item.grid.json");

        let mut writer = FileWriter::new(dir.path(), Format::Lua, StringifyOptions::default()).unwrap();
        writer.write(&workbook, WriterCall::Stringify, &payload()).unwrap();
        assert_eq!(writer.written().len(), 1);
        let text = fs::read_to_string(dir.path().join("item/Item.lua")).unwrap();
        assert_eq!(text, "return {\n  [1] = {\n    id = 1\n  }\n}\n");

        let mut again = FileWriter::new(dir.path(), Format::Lua, StringifyOptions::default()).unwrap();
        again.write(&workbook, WriterCall::Stringify, &payload()).unwrap();
        assert!(again.written().is_empty());
        assert_eq!(again.unchanged(), 1);

        let manifest = fs::read_to_string(dir.path().join(crate::checksum::MANIFEST_FILE)).unwrap();
        assert!(manifest.contains("item/Item.lua"));
    }

    #[test]
    fn test_file_writer_merges_defines() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = Workbook::new("item.grid.json");
        let mut writer = FileWriter::new(dir.path(), Format::Json, StringifyOptions::compact()).unwrap();

        let mut first = Object::new();
        first.insert("A", 1i64);
        writer.write(&workbook, WriterCall::Define, &Value::Object(first)).unwrap();
        let mut second = Object::new();
        second.insert("B", 2i64);
        writer.write(&workbook, WriterCall::Define, &Value::Object(second)).unwrap();

        let text = fs::read_to_string(dir.path().join("item.define.json")).unwrap();
        assert_eq!(text, "{\"A\":1,\"B\":2}\n");
    }

    #[test]
    fn test_non_object_payload_is_internal() {
        let mut writer = MemoryWriter::new();
        let workbook = Workbook::new("item.grid.json");
        let err = FileWriter::new(tempfile::tempdir().unwrap().path(), Format::Json, StringifyOptions::default())
            .unwrap()
            .write(&workbook, WriterCall::Stringify, &Value::Null)
            .unwrap_err();
        assert!(err.is_internal());
        assert!(writer.write(&workbook, WriterCall::Stringify, &Value::Null).is_ok());
    }
}

//! Built-in processors
//!
//! - `@stringify([Sheet, ...])`: hands the workbook's rows to the writer
//! - `@define(Enum, keyField, valueField[, commentField])`: turns two columns into
//!   an enumeration
//! - `@typedef([Interface])`: describes the sheet's fields as an interface

use tracing::debug;

use crate::convert::TypeSpec;
use crate::error::Result;
use crate::pipeline::{Processor, ProcessorCtx, Stage};
use crate::registry::Registry;
use crate::schema::{Sheet, DEPRECATED_FIELD};
use crate::stringify::ts;
use crate::value::{Array, Object, Tags, Value};
use crate::writer::WriterCall;

pub const STRINGIFY_PRIORITY: i32 = 900;
pub const DEFINE_PRIORITY: i32 = 800;
pub const TYPEDEF_PRIORITY: i32 = 850;

/// Register `stringify`, `define` and `typedef`
pub fn register_builtin_processors(registry: &mut Registry<Processor>) {
    registry.register(
        "stringify",
        Processor::new(Stage::Stringify, stringify)
            .with_priority(STRINGIFY_PRIORITY)
            .required(),
    );
    registry.register(
        "define",
        Processor::new(Stage::PreStringify, define).with_priority(DEFINE_PRIORITY),
    );
    registry.register(
        "typedef",
        Processor::new(Stage::PreStringify, typedef).with_priority(TYPEDEF_PRIORITY),
    );
}

// =============================================================================
// stringify
// =============================================================================

/// Rows of one sheet as `{ rowKey: { field: cell } }`
pub fn sheet_payload(sheet: &Sheet) -> Object {
    let mut rows = Object::new();
    for (key, row) in &sheet.data {
        let mut members = Object::new();
        for field in &sheet.fields {
            if field.name == DEPRECATED_FIELD {
                continue;
            }
            if let Some(cell) = row.get(&field.name) {
                members.insert(field.name.clone(), Value::Cell(Box::new(cell.clone())));
            }
        }
        rows.insert(key.clone(), Value::Object(members));
    }
    rows
}

fn stringify(ctx: &mut ProcessorCtx<'_>, args: &[String]) -> Result<()> {
    for name in args {
        if ctx.workbook.sheet(name).is_none() {
            return Err(ctx.fail(format!("no sheet named '{}' in {}", name, ctx.workbook.path)));
        }
    }

    let mut payload = Object::new();
    for sheet in &ctx.workbook.sheets {
        if sheet.fields.is_empty() || (!args.is_empty() && !args.contains(&sheet.name)) {
            continue;
        }
        payload.insert(sheet.name.clone(), Value::Object(sheet_payload(sheet)));
    }
    debug!(workbook = %ctx.workbook.name, sheets = payload.len(), "stringify payload");
    ctx.emit(WriterCall::Stringify, &Value::Object(payload))
}

// =============================================================================
// define
// =============================================================================

fn define(ctx: &mut ProcessorCtx<'_>, args: &[String]) -> Result<()> {
    let (enum_name, key_field, value_field, comment_field) = match args {
        [name, key, value] => (name, key, value, None),
        [name, key, value, comment] => (name, key, value, Some(comment)),
        _ => return Err(ctx.fail("expected (EnumName, keyField, valueField[, commentField])")),
    };

    let sheet = ctx.sheet()?;
    for field in [Some(key_field), Some(value_field), comment_field].into_iter().flatten() {
        if sheet.field(field).is_none() {
            return Err(ctx.fail(format!("sheet '{}' has no field '{}'", sheet.name, field)));
        }
    }

    let mut members = Object::new().with_tags(Tags::enumeration(enum_name.as_str()));
    for (_, row) in sheet.rows_in_order() {
        let key = match row.value(key_field).unwrapped() {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let Some(cell) = row.get(value_field) else {
            continue;
        };
        let mut cell = cell.clone();
        if let Some(comment) = comment_field.map(|f| row.value(f)) {
            let text = comment.to_string();
            if !comment.is_null() && !text.trim().is_empty() {
                cell.tags.comment = Some(text);
            }
        }
        if members.members.contains_key(&key) {
            return Err(ctx.fail(format!("enum '{}' has member '{}' twice", enum_name, key)));
        }
        members.insert(key, Value::Cell(Box::new(cell)));
    }

    debug!(enum_name = %enum_name, members = members.len(), "define payload");
    let mut payload = Object::new();
    payload.insert(enum_name.clone(), Value::Object(members));
    ctx.emit(WriterCall::Define, &Value::Object(payload))
}

// =============================================================================
// typedef
// =============================================================================

/// TypeScript type of a declared field type
pub fn ts_type(type_name: &str) -> String {
    if type_name.starts_with('@') {
        return "unknown".to_string();
    }
    match TypeSpec::parse(type_name) {
        Ok(spec) => ts_type_of(&spec),
        Err(_) => "unknown".to_string(),
    }
}

fn ts_type_of(spec: &TypeSpec) -> String {
    match spec {
        TypeSpec::Base(name) => match name.as_str() {
            "int" | "float" | "number" => "number",
            "string" => "string",
            "bool" => "boolean",
            _ => "unknown",
        }
        .to_string(),
        TypeSpec::Array(inner) => match inner.as_ref() {
            TypeSpec::Nullable(_) => format!("({})[]", ts_type_of(inner)),
            _ => format!("{}[]", ts_type_of(inner)),
        },
        TypeSpec::Nullable(inner) => format!("{} | null", ts_type_of(inner)),
    }
}

fn typedef(ctx: &mut ProcessorCtx<'_>, args: &[String]) -> Result<()> {
    if args.len() > 1 {
        return Err(ctx.fail("expected at most one interface name"));
    }
    let sheet = ctx.sheet()?;
    let name = args.first().cloned().unwrap_or_else(|| ts::identifier(&sheet.name));

    let fields = sheet
        .fields
        .iter()
        .filter(|f| f.name != DEPRECATED_FIELD)
        .map(|field| {
            let mut entry = Object::new();
            entry.insert("name", field.name.as_str());
            entry.insert("type", ts_type(&field.type_name));
            if !field.comment.is_empty() {
                entry.insert("comment", field.comment.as_str());
            }
            Value::Object(entry)
        })
        .collect();

    let mut payload = Object::new();
    payload.insert(name, Value::Array(Array::new(fields)));
    ctx.emit(WriterCall::Typedef, &Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForgeConfig;
    use crate::convert::{register_builtin_convertors, Convertor};
    use crate::pipeline::{convert_workbook, dedup_workbook};
    use crate::reader::{read_workbook, MemoryGridSource, RawSheet, ReadWindow};
    use crate::schema::{ProcessorCall, Workbook};
    use crate::stringify::{Format, StringifyOptions};
    use crate::trail::Trail;
    use crate::writer::{MemoryWriter, Writer};
    use std::path::Path;

    fn quality_workbook() -> Workbook {
        let source = MemoryGridSource::new().with_file(
            "quality.grid.json",
            vec![RawSheet::from_rows(
                "Quality",
                &[
                    &["id", "name", "label", "deprecated"],
                    &["int", "string", "string?", "bool?"],
                    &["", "", "", ""],
                    &["", "", "", ""],
                    &["Identifier", "", "", ""],
                    &["2", "Rare", "Rare item", ""],
                    &["1", "Common", "", ""],
                    &["3", "Gone", "", "true"],
                ],
            )],
        );
        let mut workbook = read_workbook(&source, Path::new("quality.grid.json"), ReadWindow::Full).unwrap();
        let mut convertors: Registry<Convertor> = Registry::new("convertor");
        register_builtin_convertors(&mut convertors);
        convert_workbook(&mut workbook, &convertors).unwrap();
        let mut workbook = workbook.clone_for("client");
        dedup_workbook(&mut workbook).unwrap();
        workbook
    }

    fn run(processor: &str, args: &[&str], workbook: &mut Workbook, writer: &mut MemoryWriter) -> Result<()> {
        let mut registry = Registry::new("processor");
        register_builtin_processors(&mut registry);
        let call = ProcessorCall {
            name: processor.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            location: workbook.location(),
        };
        let config = ForgeConfig::default();
        let trail = Trail::new();
        let mut ctx = ProcessorCtx {
            workbook,
            sheet: "Quality".to_string(),
            call: &call,
            writer: Some(writer as &mut (dyn Writer + 'static)),
            writer_name: "client",
            tag: "",
            config: &config,
            trail: &trail,
        };
        registry.get(processor).unwrap().run(&mut ctx, &call.args)
    }

    #[test]
    fn test_stringify_payload_drops_deprecated() {
        let mut workbook = quality_workbook();
        let log = MemoryWriter::rendering(Format::Json, StringifyOptions::compact());
        run("stringify", &[], &mut workbook, &mut log.clone()).unwrap();

        let records = log.calls(WriterCall::Stringify);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].rendered.as_deref(),
            Some(
                "{\"Quality\":{\"1\":{\"id\":1,\"label\":null,\"name\":\"Common\"},\
                 \"2\":{\"id\":2,\"label\":\"Rare item\",\"name\":\"Rare\"}}}\n"
            )
        );
    }

    #[test]
    fn test_stringify_unknown_sheet_argument() {
        let mut workbook = quality_workbook();
        let err = run("stringify", &["Nope"], &mut workbook, &mut MemoryWriter::new()).unwrap_err();
        assert!(err.to_string().contains("no sheet named 'Nope'"));
    }

    #[test]
    fn test_define_emits_enum_with_comments() {
        let mut workbook = quality_workbook();
        let log = MemoryWriter::rendering(Format::Ts, StringifyOptions::default());
        run("define", &["Quality", "name", "id", "label"], &mut workbook, &mut log.clone()).unwrap();

        let records = log.calls(WriterCall::Define);
        let text = records[0].rendered.as_deref().unwrap();
        assert!(text.starts_with("export enum Quality {\n  Common = 1,\n  Rare = 2\n}\n"));
        assert!(text.contains("{ label: \"Common\", value: Quality.Common }"));
        assert!(text.contains("{ label: \"Rare item\", value: Quality.Rare }"));
    }

    #[test]
    fn test_define_argument_errors() {
        let mut workbook = quality_workbook();
        assert!(run("define", &["Quality", "name"], &mut workbook, &mut MemoryWriter::new()).is_err());
        let err = run("define", &["Quality", "name", "nope"], &mut workbook, &mut MemoryWriter::new()).unwrap_err();
        assert!(err.to_string().contains("no field 'nope'"));
    }

    #[test]
    fn test_typedef_payload() {
        let mut workbook = quality_workbook();
        let log = MemoryWriter::rendering(Format::Ts, StringifyOptions::default());
        run("typedef", &[], &mut workbook, &mut log.clone()).unwrap();
        let text = log.calls(WriterCall::Typedef)[0].rendered.clone().unwrap();
        assert_eq!(
            text,
            "export interface Quality {\n  /** Identifier */\n  id: number;\n  name: string;\n  label: string | null;\n}"
        );
    }

    #[test]
    fn test_ts_type_mapping() {
        assert_eq!(ts_type("int"), "number");
        assert_eq!(ts_type("string[]"), "string[]");
        assert_eq!(ts_type("int?[]"), "(number | null)[]");
        assert_eq!(ts_type("bool[]?"), "boolean[] | null");
        assert_eq!(ts_type("json"), "unknown");
        assert_eq!(ts_type("@kind"), "unknown");
    }
}

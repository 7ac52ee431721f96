//! End-to-end pipeline tests
//!
//! Grid files are read through `JsonGridSource` (fixtures) or `MemoryGridSource`
//! and rendered through `MemoryWriter` or `FileWriter`.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use table_forge::reader::RawSheet;
use table_forge::{
    FileWriter, Forge, ForgeConfig, ForgeError, Format, JsonGridSource, MemoryGridSource, MemoryWriter,
    Processor, Stage, StringifyOptions, WriterCall,
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn read_fixtures(forge: &mut Forge) {
    for name in ["item.grid.json", "quality.grid.json"] {
        forge.read(&JsonGridSource, &fixture(name)).unwrap();
    }
}

fn compact_json() -> MemoryWriter {
    MemoryWriter::rendering(Format::Json, StringifyOptions::compact())
}

fn rendered(writer: &MemoryWriter, call: WriterCall, workbook: &str) -> String {
    writer
        .calls(call)
        .into_iter()
        .find(|r| r.workbook == workbook)
        .and_then(|r| r.rendered)
        .unwrap_or_else(|| panic!("no {} record for {}", call, workbook))
}

// =============================================================================
// Full runs over the fixtures
// =============================================================================

#[test]
fn test_fixture_run_per_writer() {
    let mut forge = Forge::new(ForgeConfig::default());
    let client = compact_json();
    let server = compact_json();
    forge.register_writer("client", client.clone());
    forge.register_writer("server", server.clone());
    read_fixtures(&mut forge);

    let report = forge.run().unwrap();
    assert!(report.is_success(), "{:?}", report);

    assert_eq!(
        rendered(&client, WriterCall::Stringify, "item"),
        "{\"Item\":{\
         \"2\":{\"id\":2,\"ids\":[3],\"name\":\"Shield\",\"price\":7,\"quality\":1},\
         \"7\":{\"id\":7,\"ids\":[],\"name\":\"Bow\",\"price\":0.25,\"quality\":3},\
         \"10\":{\"id\":10,\"ids\":[1,2],\"name\":\"Sword\",\"price\":12.5,\"quality\":2}}}\n"
    );
    assert_eq!(
        rendered(&server, WriterCall::Stringify, "item"),
        "{\"Item\":{\
         \"2\":{\"id\":2,\"ids\":[3],\"name\":\"Shield\",\"price\":7,\"quality\":1,\"secret\":null},\
         \"7\":{\"id\":7,\"ids\":[],\"name\":\"Bow\",\"price\":0.25,\"quality\":3,\"secret\":null},\
         \"10\":{\"id\":10,\"ids\":[1,2],\"name\":\"Sword\",\"price\":12.5,\"quality\":2,\"secret\":\"s\"}}}\n"
    );
    assert_eq!(
        rendered(&client, WriterCall::Stringify, "quality"),
        "{\"Quality\":{\
         \"1\":{\"id\":1,\"label\":\"Common\",\"name\":\"Common\"},\
         \"2\":{\"id\":2,\"label\":\"Rare item\",\"name\":\"Rare\"},\
         \"3\":{\"id\":3,\"label\":null,\"name\":\"Epic\"}}}\n"
    );

    // The reader context is never checked or emitted
    let reader = forge.reader();
    assert!(reader.workbooks.iter().all(|w| w.writer == "reader"));
    assert!(forge.context("client").is_some());
}

#[test]
fn test_define_runs_before_stringify() {
    let mut forge = Forge::new(ForgeConfig::default());
    let client = MemoryWriter::rendering(Format::Ts, StringifyOptions::default());
    forge.register_writer("client", client.clone());
    read_fixtures(&mut forge);
    forge.run().unwrap().into_result().unwrap();

    let quality_calls: Vec<WriterCall> = client
        .records()
        .into_iter()
        .filter(|r| r.workbook == "quality")
        .map(|r| r.call)
        .collect();
    assert_eq!(
        quality_calls,
        vec![WriterCall::Define, WriterCall::Typedef, WriterCall::Stringify]
    );

    let define = rendered(&client, WriterCall::Define, "quality");
    let expected = "export enum Quality {\n  Common = 1,\n  Rare = 2,\n  Epic = 3\n}\n\
export const QualityOptions = [\n  { label: \"Common\", value: Quality.Common },\n  \
{ label: \"Rare item\", value: Quality.Rare },\n  { label: \"Epic\", value: Quality.Epic }\n] as const;\n\
{\n  Quality: Quality\n} as const\n";
    assert_eq!(define, expected);

    let typedef = rendered(&client, WriterCall::Typedef, "quality");
    assert_eq!(
        typedef,
        "export interface Quality {\n  /** Identifier */\n  id: number;\n  /** Enum member */\n  name: string;\n  \
/** Display label */\n  label: string | null;\n}"
    );
}

#[test]
fn test_file_writer_output_is_byte_identical_across_runs() {
    let run_into = |dir: &Path| {
        let mut forge = Forge::new(ForgeConfig::default());
        let writer = FileWriter::new(dir, Format::Ts, StringifyOptions::default()).unwrap();
        forge.register_writer("client", writer);
        read_fixtures(&mut forge);
        forge.run().unwrap().into_result().unwrap();
    };

    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    run_into(first.path());
    run_into(second.path());
    // Rerunning into the same directory leaves files untouched
    run_into(first.path());

    for file in [
        "item/Item.ts",
        "quality/Quality.ts",
        "quality.define.ts",
        "quality.d.ts",
        "checksums.sha256",
    ] {
        let a = fs::read(first.path().join(file)).unwrap();
        let b = fs::read(second.path().join(file)).unwrap();
        assert_eq!(a, b, "{} differs between runs", file);
    }

    let item = fs::read_to_string(first.path().join("item/Item.ts")).unwrap();
    assert!(item.starts_with("export const Item = {\n  2: {\n    id: 2,"), "{}", item);
    assert!(item.ends_with("} as const;\n"));
    assert!(!first.path().join("Notes").exists());
}

// =============================================================================
// Failures
// =============================================================================

fn memory_source(name: &str, sheet: RawSheet) -> (MemoryGridSource, PathBuf) {
    let path = PathBuf::from(name);
    (MemoryGridSource::new().with_file(path.clone(), vec![sheet]), path)
}

#[test]
fn test_cross_reference_failure_only_affects_its_writer() {
    let (source, path) = memory_source(
        "refs.grid.json",
        RawSheet::from_rows(
            "Ref",
            &[
                &["id", "quality"],
                &["int", "int"],
                &["", "server"],
                &["", "quality#Quality.id"],
                &["", ""],
                &["1", "2"],
                &["2", "5"],
            ],
        ),
    );

    let mut forge = Forge::new(ForgeConfig::default());
    let client = compact_json();
    let server = compact_json();
    forge.register_writer("client", client.clone());
    forge.register_writer("server", server.clone());
    forge.read(&JsonGridSource, &fixture("quality.grid.json")).unwrap();
    forge.read(&source, &path).unwrap();

    let report = forge.run().unwrap();
    assert!(!report.is_success());
    assert!(report.outcome("client").unwrap().is_success());
    assert!(!client.calls(WriterCall::Stringify).is_empty());
    assert!(server.calls(WriterCall::Stringify).is_empty());

    let error = report.outcome("server").unwrap().error.as_ref().unwrap();
    match error.root() {
        ForgeError::Validation(validation) => {
            assert_eq!(validation.writer, "server");
            assert_eq!(validation.failures.len(), 1);
            let failure = &validation.failures[0];
            assert_eq!(failure.checker, "quality#Quality.id");
            assert_eq!(failure.entries.len(), 1);
            assert!(
                failure.entries[0].starts_with("refs.grid.json#Ref!B7: '5'"),
                "{}",
                failure.entries[0]
            );
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert!(report.into_result().unwrap_err().is_validation());
}

#[test]
fn test_path_query_reference() {
    let (source, path) = memory_source(
        "recipe.grid.json",
        RawSheet::from_rows(
            "Recipe",
            &[
                &["id", "cost"],
                &["int", "json"],
                &["", ""],
                &["", "$.items[*].quality==quality#Quality.id"],
                &["", ""],
                &["1", r#"{"items":[{"quality":1},{"quality":3}]}"#],
                &["2", r#"{"items":[{"quality":4}]}"#],
                &["3", r#"{"items":[]}"#],
                &["4", r#"{"other":1}"#],
            ],
        ),
    );

    let mut forge = Forge::new(ForgeConfig::default());
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&JsonGridSource, &fixture("quality.grid.json")).unwrap();
    forge.read(&source, &path).unwrap();

    let error = forge.run().unwrap().into_result().unwrap_err();
    let ForgeError::Validation(validation) = error.root() else {
        panic!("expected a validation error, got {:?}", error);
    };
    let entries = &validation.failures[0].entries;
    assert_eq!(entries.len(), 2, "{:?}", entries);
    assert!(entries[0].starts_with("recipe.grid.json#Recipe!B7"));
    assert!(entries[1].starts_with("recipe.grid.json#Recipe!B9"));
    assert!(entries[1].contains("query failed"));
}

#[test]
fn test_index_checker_filters_force_and_leaves() {
    let (source, path) = memory_source(
        "gear.grid.json",
        RawSheet::from_rows(
            "Gear",
            &[
                &["id", "kind", "rowq", "colq", "forced", "many"],
                &["int", "string", "int?", "int?", "int?", "int[]"],
                &["", "", "", "", "", ""],
                &[
                    "",
                    "",
                    "$&kind=weapon==quality#Quality.id",
                    "quality#Quality.id&name=Rare",
                    "!quality#Quality.id",
                    "quality#Quality.id",
                ],
                &["", "", "", "", "", ""],
                &["1", "weapon", "9", "2", "1", "1, 2"],
                &["2", "armor", "9", "1", "", "1, 9"],
            ],
        ),
    );

    let mut forge = Forge::new(ForgeConfig::default());
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&JsonGridSource, &fixture("quality.grid.json")).unwrap();
    forge.read(&source, &path).unwrap();

    let error = forge.run().unwrap().into_result().unwrap_err();
    let ForgeError::Validation(validation) = error.root() else {
        panic!("expected a validation error, got {:?}", error);
    };
    let failures: Vec<(&str, &[String])> = validation
        .failures
        .iter()
        .map(|f| (f.field_name.as_str(), f.entries.as_slice()))
        .collect();
    assert_eq!(failures.len(), 4, "{:?}", failures);

    // Row filter: the armor row is not checked at all
    assert_eq!(failures[0].0, "rowq");
    assert_eq!(failures[0].1.len(), 1);
    assert!(failures[0].1[0].starts_with("gear.grid.json#Gear!C6: '9'"), "{}", failures[0].1[0]);

    // Column filter: only the Rare quality counts as a member
    assert_eq!(failures[1].0, "colq");
    assert_eq!(failures[1].1.len(), 1);
    assert!(failures[1].1[0].starts_with("gear.grid.json#Gear!D7: '1'"), "{}", failures[1].1[0]);

    // Forced: the null cell is checked and fails
    assert_eq!(failures[2].0, "forced");
    assert_eq!(failures[2].1.len(), 1);
    assert!(failures[2].1[0].starts_with("gear.grid.json#Gear!E7: ''"), "{}", failures[2].1[0]);

    // Array: only the missing element is reported
    assert_eq!(failures[3].0, "many");
    let entry = &failures[3].1[0];
    assert!(entry.starts_with("gear.grid.json#Gear!F7"), "{}", entry);
    assert!(entry.contains("'9' not found"), "{}", entry);
    assert!(!entry.contains("'1' not found"), "{}", entry);
}

#[test]
fn test_hash_in_expression_literal_is_not_a_reference() {
    let (source, path) = memory_source(
        "tags.grid.json",
        RawSheet::from_rows(
            "Tags",
            &[
                &["id", "tag"],
                &["int", "string"],
                &["", ""],
                &["", r#"x != "a#b""#],
                &["", ""],
                &["1", "ok"],
                &["2", "a#b"],
            ],
        ),
    );
    let mut forge = Forge::new(ForgeConfig::default());
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&source, &path).unwrap();

    let error = forge.run().unwrap().into_result().unwrap_err();
    let ForgeError::Validation(validation) = error.root() else {
        panic!("expected a validation error, got {:?}", error);
    };
    assert_eq!(validation.failures[0].entries, vec!["tags.grid.json#Tags!B7: 'a#b'".to_string()]);
}

#[test]
fn test_deprecated_rows_stay_excluded_when_column_is_not_shipped() {
    let (source, path) = memory_source(
        "live.grid.json",
        RawSheet::from_rows(
            "Live",
            &[
                &["id", "name", "deprecated"],
                &["int", "string", "bool"],
                &["", "", "server"],
                &["", "x != 'old'", ""],
                &["", "", ""],
                &["1", "a", "false"],
                &["1", "b", "true"],
                &["2", "old", "true"],
            ],
        ),
    );
    let mut forge = Forge::new(ForgeConfig::default());
    let client = compact_json();
    forge.register_writer("client", client.clone());
    forge.read(&source, &path).unwrap();
    forge.run().unwrap().into_result().unwrap();

    assert_eq!(
        rendered(&client, WriterCall::Stringify, "live"),
        "{\"Live\":{\"1\":{\"id\":1,\"name\":\"a\"}}}\n"
    );
    let context = forge.context("client").unwrap();
    let sheet = context.workbooks[0].sheet("Live").unwrap();
    assert!(sheet.field("deprecated").is_none());
}

#[test]
fn test_duplicate_keys_cite_both_rows() {
    let (source, path) = memory_source(
        "dup.grid.json",
        RawSheet::from_rows(
            "Dup",
            &[
                &["id", "name"],
                &["int", "string"],
                &["", ""],
                &["", ""],
                &["", ""],
                &["1", "a"],
                &["2", "b"],
                &["1", "c"],
            ],
        ),
    );
    let mut forge = Forge::new(ForgeConfig::default());
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&source, &path).unwrap();

    let error = forge.run().unwrap().into_result().unwrap_err();
    match error.root() {
        ForgeError::DuplicateKey { key, first, second } => {
            assert_eq!(key, "1");
            assert_eq!(first.to_string(), "dup.grid.json#Dup!A6");
            assert_eq!(second.to_string(), "dup.grid.json#Dup!A8");
        }
        other => panic!("expected a duplicate key error, got {:?}", other),
    }
    assert!(error.to_string().contains("writer 'client'"), "{}", error);
}

#[test]
fn test_conversion_error_in_reader_context_aborts_run() {
    let (source, path) = memory_source(
        "bad.grid.json",
        RawSheet::from_rows(
            "Bad",
            &[&["id"], &["int"], &[""], &[""], &[""], &["one"]],
        ),
    );
    let mut forge = Forge::new(ForgeConfig::default());
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&source, &path).unwrap();

    let error = forge.run().unwrap_err();
    assert!(matches!(error.root(), ForgeError::Conversion { .. }), "{:?}", error);
    assert!(forge.contexts().is_empty());
}

#[test]
fn test_suppressed_checker_is_skipped() {
    let (source, path) = memory_source(
        "refs.grid.json",
        RawSheet::from_rows(
            "Ref",
            &[&["id"], &["int"], &[""], &["x > 5"], &[""], &["1"]],
        ),
    );
    let mut config = ForgeConfig::default();
    config.check.suppress = vec!["expr".to_string()];
    let mut forge = Forge::new(config);
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&source, &path).unwrap();
    assert!(forge.run().unwrap().is_success());
}

#[test]
fn test_failure_cap_truncates_entries() {
    let mut rows: Vec<Vec<String>> = vec![
        vec!["id".into()],
        vec!["int".into()],
        vec!["".into()],
        vec!["x < 0".into()],
        vec!["".into()],
    ];
    rows.extend((1..=5).map(|i| vec![i.to_string()]));
    let rows: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
    let rows: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
    let (source, path) = memory_source("many.grid.json", RawSheet::from_rows("Many", &rows));

    let mut config = ForgeConfig::default();
    config.check.failure_cap = 3;
    let mut forge = Forge::new(config);
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&source, &path).unwrap();

    let error = forge.run().unwrap().into_result().unwrap_err();
    let ForgeError::Validation(validation) = error.root() else {
        panic!("expected a validation error, got {:?}", error);
    };
    let entries = &validation.failures[0].entries;
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3], "...");
    assert_eq!(validation.failing_cells(), 3);
}

// =============================================================================
// Processor ordering
// =============================================================================

#[test]
fn test_priorities_decide_order_not_declaration() {
    let (source, path) = memory_source(
        "order.grid.json",
        RawSheet::from_rows(
            "Order",
            &[
                &["@late", "@early"],
                &["id"],
                &["int"],
                &[""],
                &[""],
                &[""],
                &["1"],
            ],
        ),
    );

    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let mut forge = Forge::new(ForgeConfig::default());
    for (name, priority) in [("late", 900), ("early", 800)] {
        let log = Rc::clone(&log);
        forge.register_processor(
            name,
            Processor::new(Stage::PreCheck, move |ctx, _| {
                log.borrow_mut().push(format!("{}:{}", name, ctx.writer_name));
                Ok(())
            })
            .with_priority(priority),
        );
    }
    forge.register_writer("client", MemoryWriter::new());
    forge.read(&source, &path).unwrap();
    forge.run().unwrap().into_result().unwrap();

    assert_eq!(*log.borrow(), vec!["early:client", "late:client"]);
}

#[test]
fn test_reader_stage_processor_sees_raw_cells() {
    let (source, path) = memory_source(
        "raw.grid.json",
        RawSheet::from_rows(
            "Raw",
            &[&["@shout"], &["id", "name"], &["int", "string"], &["", ""], &["", ""], &["", ""], &["1", "a"]],
        ),
    );

    let mut forge = Forge::new(ForgeConfig::default());
    forge.register_processor(
        "shout",
        Processor::new(Stage::PreParse, |ctx, _| {
            assert!(ctx.is_reader());
            for row in ctx.sheet_mut()?.data.values_mut() {
                if let Some(cell) = row.cells.get_mut("name") {
                    cell.raw = cell.raw.to_uppercase();
                }
            }
            Ok(())
        }),
    );
    let client = compact_json();
    forge.register_writer("client", client.clone());
    forge.read(&source, &path).unwrap();
    forge.run().unwrap().into_result().unwrap();

    assert_eq!(
        rendered(&client, WriterCall::Stringify, "raw"),
        "{\"Raw\":{\"1\":{\"id\":1,\"name\":\"A\"}}}\n"
    );
}

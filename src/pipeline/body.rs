//! Body conversion and row deduplication

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::convert::{convert_cell, Convertor};
use crate::error::{ForgeError, Result};
use crate::registry::Registry;
use crate::schema::{Location, Row, Workbook};
use crate::value::Value;

/// Convert every body cell to its field's declared type. `@other` fields take
/// their type from the raw text of `other` in the same row; an empty type there
/// yields null.
pub fn convert_workbook(workbook: &mut Workbook, convertors: &Registry<Convertor>) -> Result<()> {
    for sheet in &mut workbook.sheets {
        let fields = sheet.fields.clone();
        for row in sheet.data.values_mut() {
            for field in &fields {
                let type_name = match field.derived_from() {
                    Some(source) => {
                        if !fields.iter().any(|f| f.name == source) {
                            return Err(ForgeError::authoring(
                                field.location.clone(),
                                format!("field '{}' takes its type from unknown field '{}'", field.name, source),
                            ));
                        }
                        row.get(source).map(|c| c.raw.trim().to_string()).unwrap_or_default()
                    }
                    None => field.type_name.clone(),
                };

                let Some(cell) = row.cells.get_mut(&field.name) else {
                    continue;
                };
                if type_name.is_empty() {
                    cell.value = Value::Null;
                    continue;
                }
                convert_cell(cell, &type_name, convertors)?;
            }
        }
        debug!(sheet = %sheet.name, rows = sheet.data.len(), "converted body");
    }
    Ok(())
}

/// Re-key every sheet's rows by primary key. Deprecated rows are dropped; rows
/// with a null key are kept under `~<line>`. A repeated key is an error citing
/// both rows.
pub fn dedup_workbook(workbook: &mut Workbook) -> Result<()> {
    for sheet in &mut workbook.sheets {
        let Some(key_field) = sheet.key_field().map(|f| f.name.clone()) else {
            continue;
        };

        let mut data: BTreeMap<String, Row> = BTreeMap::new();
        let mut seen: HashMap<String, Location> = HashMap::new();
        let mut dropped = 0usize;

        let mut rows: Vec<_> = std::mem::take(&mut sheet.data).into_values().collect();
        rows.sort_by_key(|row| row.line);

        for row in rows {
            if row.is_deprecated() {
                dropped += 1;
                continue;
            }
            let location = row
                .get(&key_field)
                .map(|c| c.location.clone())
                .unwrap_or_else(|| Location {
                    row: Some(row.line),
                    ..sheet.location()
                });
            let value = row.value(&key_field);
            let key = match value.index_key() {
                Some(key) => key,
                None if value.is_null() => format!("~{}", row.line),
                None => value.to_string(),
            };

            if let Some(first) = seen.get(&key) {
                return Err(ForgeError::DuplicateKey {
                    key,
                    first: first.clone(),
                    second: location,
                });
            }
            seen.insert(key.clone(), location);
            data.insert(key, row);
        }

        debug!(sheet = %sheet.name, rows = data.len(), dropped, "deduplicated");
        sheet.data = data;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::register_builtin_convertors;
    use crate::schema::{Field, Sheet, Writers};
    use crate::value::Cell;

    fn field(name: &str, column: usize, type_name: &str) -> Field {
        Field {
            name: name.to_string(),
            column,
            type_name: type_name.to_string(),
            checkers: Vec::new(),
            writers: Writers::All,
            comment: String::new(),
            location: Location::sheet("item.xlsx", "Item"),
            sheet: "Item".to_string(),
            path: "item.xlsx".to_string(),
        }
    }

    fn workbook(rows: &[&[&str]], fields: Vec<Field>) -> Workbook {
        let mut sheet = Sheet::new("Item", "item.xlsx");
        for (i, cells) in rows.iter().enumerate() {
            let line = i + 7;
            let mut row = Row::new(line);
            for (field, raw) in fields.iter().zip(cells.iter()) {
                let cell = Cell::raw(*raw, Location::cell("item.xlsx", "Item", line, field.column));
                row.cells.insert(field.name.clone(), cell);
            }
            sheet.data.insert(line.to_string(), row);
        }
        sheet.fields = fields;
        let mut workbook = Workbook::new("item.xlsx");
        workbook.sheets.push(sheet);
        workbook
    }

    fn convertors() -> Registry<Convertor> {
        let mut registry = Registry::new("convertor");
        register_builtin_convertors(&mut registry);
        registry
    }

    #[test]
    fn test_conversion_with_derived_type() {
        let mut wb = workbook(
            &[&["1", "int", "42"], &["2", "string", "hello"], &["3", "", "ignored"]],
            vec![field("id", 0, "int"), field("kind", 1, "string"), field("value", 2, "@kind")],
        );
        convert_workbook(&mut wb, &convertors()).unwrap();
        let sheet = &wb.sheets[0];
        assert_eq!(sheet.data["7"].value("value"), &Value::Number(42.0));
        assert_eq!(sheet.data["8"].value("value"), &Value::from("hello"));
        assert!(sheet.data["9"].value("value").is_null());
    }

    #[test]
    fn test_conversion_error_is_located() {
        let mut wb = workbook(&[&["abc"]], vec![field("id", 0, "int")]);
        let err = convert_workbook(&mut wb, &convertors()).unwrap_err();
        match err {
            ForgeError::Conversion { location, .. } => assert_eq!(location.to_string(), "item.xlsx#Item!A7"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dedup_rekeys_and_drops_deprecated() {
        let mut wb = workbook(
            &[&["1", "false"], &["2", "true"], &["", "false"]],
            vec![field("id", 0, "int?"), field("deprecated", 1, "bool")],
        );
        convert_workbook(&mut wb, &convertors()).unwrap();
        dedup_workbook(&mut wb).unwrap();
        let keys: Vec<&String> = wb.sheets[0].data.keys().collect();
        assert_eq!(keys, vec!["1", "~9"]);
    }

    #[test]
    fn test_duplicate_keys_cite_both_rows() {
        let mut wb = workbook(&[&["1"], &["2"], &["1"]], vec![field("id", 0, "int")]);
        convert_workbook(&mut wb, &convertors()).unwrap();
        let err = dedup_workbook(&mut wb).unwrap_err();
        match err {
            ForgeError::DuplicateKey { key, first, second } => {
                assert_eq!(key, "1");
                assert_eq!(first.to_string(), "item.xlsx#Item!A7");
                assert_eq!(second.to_string(), "item.xlsx#Item!A9");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_near_equal_float_keys_stay_distinct() {
        let mut wb = workbook(&[&["1.00000000001"], &["1.00000000002"]], vec![field("id", 0, "float")]);
        convert_workbook(&mut wb, &convertors()).unwrap();
        dedup_workbook(&mut wb).unwrap();
        let keys: Vec<&String> = wb.sheets[0].data.keys().collect();
        assert_eq!(keys, vec!["1.00000000001", "1.00000000002"]);

        let mut wb = workbook(&[&["2.5"], &["2.50"]], vec![field("id", 0, "float")]);
        convert_workbook(&mut wb, &convertors()).unwrap();
        match dedup_workbook(&mut wb).unwrap_err() {
            ForgeError::DuplicateKey { key, .. } => assert_eq!(key, "2.5"),
            other => panic!("unexpected {:?}", other),
        }
    }
}

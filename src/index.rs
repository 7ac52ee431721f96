//! Cross-sheet indexers
//!
//! Indexers answer "is there a row whose `field` equals this key" over one sheet
//! (or every sheet of a workbook, for `*`). They are built lazily on first lookup
//! from whichever context they are asked about, so a checker resolved once can be
//! executed against the context it belongs to. Optional column filters narrow the
//! candidate rows; filtered views are memoized per filter list identity.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::schema::{Context, Row, Sheet, Workbook};
use crate::suggest::did_you_mean;
use crate::value::{parse_number, Value};

// =============================================================================
// Filters
// =============================================================================

/// `field=value` constraint on a row
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    /// Parse `field=value`; numeric-looking values compare as numbers
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let (field, value) = text
            .split_once('=')
            .ok_or_else(|| format!("filter '{}' must look like field=value", text))?;
        let field = field.trim();
        if field.is_empty() {
            return Err(format!("filter '{}' has no field name", text));
        }
        let value = value.trim();
        let value = match parse_number(value) {
            Some(n) => Value::Number(n),
            None => Value::String(crate::convert::unquote(value)),
        };
        Ok(Self {
            field: field.to_string(),
            value,
        })
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.value(&self.field).loose_eq(&self.value)
    }
}

/// Shared filter list; memoization keys on the allocation, not the contents
pub type FilterList = Rc<[Filter]>;

/// Extra row predicate applied while building an index
pub type RowPredicate = Rc<dyn Fn(&Row) -> bool>;

// =============================================================================
// Indexer trait
// =============================================================================

pub trait Indexer {
    /// Rows whose indexed value equals `key`
    fn lookup(&self, context: &Context, key: &Value, filters: Option<&FilterList>) -> Result<Vec<Rc<Row>>>;

    fn contains(&self, context: &Context, key: &Value, filters: Option<&FilterList>) -> Result<bool> {
        Ok(!self.lookup(context, key, filters)?.is_empty())
    }

    /// Human-readable target, e.g. `item#Item.id`
    fn target(&self) -> String;
}

type Buckets = HashMap<String, Vec<Rc<Row>>>;

/// Lazily built buckets plus memoized filtered views
#[derive(Default)]
struct IndexCache {
    base: RefCell<Option<Rc<Buckets>>>,
    filtered: RefCell<Vec<(FilterList, Rc<Buckets>)>>,
}

impl IndexCache {
    fn get_or_build(&self, build: impl FnOnce() -> Result<Buckets>) -> Result<Rc<Buckets>> {
        if let Some(base) = self.base.borrow().as_ref() {
            return Ok(Rc::clone(base));
        }
        let built = Rc::new(build()?);
        *self.base.borrow_mut() = Some(Rc::clone(&built));
        Ok(built)
    }

    fn filtered(&self, base: &Buckets, filters: &FilterList) -> Rc<Buckets> {
        if let Some((_, view)) = self
            .filtered
            .borrow()
            .iter()
            .find(|(list, _)| Rc::ptr_eq(list, filters))
        {
            return Rc::clone(view);
        }
        let view: Buckets = base
            .iter()
            .filter_map(|(key, rows)| {
                let kept: Vec<Rc<Row>> = rows
                    .iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (key.clone(), kept))
            })
            .collect();
        let view = Rc::new(view);
        self.filtered
            .borrow_mut()
            .push((Rc::clone(filters), Rc::clone(&view)));
        view
    }

    fn lookup(
        &self,
        key: &Value,
        filters: Option<&FilterList>,
        build: impl FnOnce() -> Result<Buckets>,
    ) -> Result<Vec<Rc<Row>>> {
        let Some(key) = key.index_key() else {
            return Ok(Vec::new());
        };
        let base = self.get_or_build(build)?;
        let buckets = match filters {
            Some(filters) if !filters.is_empty() => self.filtered(&base, filters),
            _ => base,
        };
        Ok(buckets.get(&key).cloned().unwrap_or_default())
    }
}

fn find_workbook<'a>(context: &'a Context, name: &str) -> Result<&'a Workbook> {
    context
        .workbook(name)
        .ok_or_else(|| ForgeError::MissingReference {
            what: "workbook",
            name: name.to_string(),
            suggestion: did_you_mean(name, context.workbook_names()),
        })
}

fn missing_sheet(workbook: &Workbook, sheet: &str) -> ForgeError {
    ForgeError::MissingReference {
        what: "sheet",
        name: format!("{}#{}", workbook.name, sheet),
        suggestion: did_you_mean(sheet, workbook.sheets.iter().map(|s| s.name.as_str())),
    }
}

fn indexable_rows<'a>(sheet: &'a Sheet, predicate: Option<&'a RowPredicate>) -> impl Iterator<Item = &'a Row> + 'a {
    sheet
        .rows_in_order()
        .into_iter()
        .map(|(_, row)| row)
        .filter(move |row| !row.is_deprecated() && predicate.map_or(true, |p| p(row)))
}

// =============================================================================
// Column indexer
// =============================================================================

/// Multi-valued index of an arbitrary field
pub struct ColumnIndexer {
    workbook: String,
    sheet: String,
    field: String,
    predicate: Option<RowPredicate>,
    cache: IndexCache,
}

impl ColumnIndexer {
    pub fn new(workbook: impl Into<String>, sheet: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            workbook: workbook.into(),
            sheet: sheet.into(),
            field: field.into(),
            predicate: None,
            cache: IndexCache::default(),
        }
    }

    pub fn with_predicate(mut self, predicate: RowPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn build(&self, context: &Context) -> Result<Buckets> {
        let workbook = find_workbook(context, &self.workbook)?;
        let mut buckets = Buckets::new();
        let mut found_sheet = false;
        let mut found_field = false;
        let mut field_names: Vec<&str> = Vec::new();

        for sheet in workbook.matching_sheets(&self.sheet) {
            found_sheet = true;
            if sheet.field(&self.field).is_none() {
                field_names.extend(sheet.fields.iter().map(|f| f.name.as_str()));
                continue;
            }
            found_field = true;
            for row in indexable_rows(sheet, self.predicate.as_ref()) {
                if let Some(key) = row.value(&self.field).index_key() {
                    buckets.entry(key).or_default().push(Rc::new(row.clone()));
                }
            }
        }

        if !found_sheet {
            return Err(missing_sheet(workbook, &self.sheet));
        }
        if !found_field {
            return Err(ForgeError::MissingReference {
                what: "field",
                name: self.target(),
                suggestion: did_you_mean(&self.field, field_names),
            });
        }
        debug!(target = %self.target(), keys = buckets.len(), "built column index");
        Ok(buckets)
    }
}

impl Indexer for ColumnIndexer {
    fn lookup(&self, context: &Context, key: &Value, filters: Option<&FilterList>) -> Result<Vec<Rc<Row>>> {
        self.cache.lookup(key, filters, || self.build(context))
    }

    fn target(&self) -> String {
        format!("{}#{}.{}", self.workbook, self.sheet, self.field)
    }
}

// =============================================================================
// Row indexer
// =============================================================================

/// Unique index over each sheet's primary key field
pub struct RowIndexer {
    workbook: String,
    sheet: String,
    predicate: Option<RowPredicate>,
    cache: IndexCache,
}

impl RowIndexer {
    pub fn new(workbook: impl Into<String>, sheet: impl Into<String>) -> Self {
        Self {
            workbook: workbook.into(),
            sheet: sheet.into(),
            predicate: None,
            cache: IndexCache::default(),
        }
    }

    pub fn with_predicate(mut self, predicate: RowPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn build(&self, context: &Context) -> Result<Buckets> {
        let workbook = find_workbook(context, &self.workbook)?;
        let mut buckets = Buckets::new();
        let mut found_sheet = false;
        let mut keyed = false;

        for sheet in workbook.matching_sheets(&self.sheet) {
            found_sheet = true;
            let Some(key_field) = sheet.key_field() else {
                continue;
            };
            keyed = true;
            for row in indexable_rows(sheet, self.predicate.as_ref()) {
                let Some(key) = row.value(&key_field.name).index_key() else {
                    continue;
                };
                let bucket = buckets.entry(key).or_default();
                if bucket.is_empty() {
                    bucket.push(Rc::new(row.clone()));
                } else {
                    debug!(target = %self.target(), line = row.line, "duplicate key ignored by row index");
                }
            }
        }

        if !found_sheet {
            return Err(missing_sheet(workbook, &self.sheet));
        }
        if !keyed {
            return Err(ForgeError::MissingReference {
                what: "field",
                name: format!("key field of {}", self.target()),
                suggestion: None,
            });
        }
        debug!(target = %self.target(), keys = buckets.len(), "built row index");
        Ok(buckets)
    }
}

impl Indexer for RowIndexer {
    fn lookup(&self, context: &Context, key: &Value, filters: Option<&FilterList>) -> Result<Vec<Rc<Row>>> {
        self.cache.lookup(key, filters, || self.build(context))
    }

    fn target(&self) -> String {
        format!("{}#{}", self.workbook, self.sheet)
    }
}

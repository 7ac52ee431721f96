//! The orchestrator
//!
//! [`Forge`] owns the registries, the configuration, the breadcrumb trail, the
//! reader context and every writer context of a run.

use std::path::Path;

use tracing::{debug, info, warn};

use super::{convert_workbook, dedup_workbook, Processor, ProcessorCtx, Stage};
use crate::checker::{execute_context, resolve_context};
use crate::config::ForgeConfig;
use crate::error::{ForgeError, Result};
use crate::reader::{read_workbook, GridSource, ReadWindow};
use crate::registry::{Registries, Registry};
use crate::schema::{Context, ProcessorCall, Workbook, READER_CONTEXT};
use crate::trail::Trail;
use crate::writer::Writer;

/// Result of one writer context
#[derive(Debug)]
pub struct WriterOutcome {
    pub writer: String,
    pub tag: String,
    /// First error that stopped the context
    pub error: Option<ForgeError>,
}

impl WriterOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-writer outcomes of a run
#[derive(Debug, Default)]
pub struct RunReport {
    /// The run stopped after `after-read`
    pub header_only: bool,
    pub outcomes: Vec<WriterOutcome>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(WriterOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &WriterOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn outcome(&self, writer: &str) -> Option<&WriterOutcome> {
        self.outcomes.iter().find(|o| o.writer == writer)
    }

    /// The first failure as an error
    pub fn into_result(self) -> Result<()> {
        match self.outcomes.into_iter().find_map(|o| o.error) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Pipeline driver
pub struct Forge {
    registries: Registries,
    config: ForgeConfig,
    trail: Trail,
    reader: Context,
    contexts: Vec<Context>,
}

impl Forge {
    /// A forge with the built-in convertors, checkers and processors
    pub fn new(config: ForgeConfig) -> Self {
        Self::with_registries(Registries::with_builtins(), config)
    }

    pub fn with_registries(registries: Registries, config: ForgeConfig) -> Self {
        let reader = Context::new(READER_CONTEXT, config.pipeline.tag.clone());
        Self {
            registries,
            config,
            trail: Trail::new(),
            reader,
            contexts: Vec::new(),
        }
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn registries_mut(&mut self) -> &mut Registries {
        &mut self.registries
    }

    pub fn register_writer(&mut self, name: impl Into<String>, writer: impl Writer + 'static) {
        self.registries.register_writer(name, writer);
    }

    pub fn register_processor(&mut self, name: impl Into<String>, processor: Processor) {
        self.registries.processors.register(name, processor);
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    /// The context built by reading
    pub fn reader(&self) -> &Context {
        &self.reader
    }

    /// Writer contexts of the last run
    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    pub fn context(&self, writer: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.writer == writer)
    }

    /// Read one file through `source` into the reader context
    pub fn read(&mut self, source: &dyn GridSource, path: &Path) -> Result<()> {
        let _guard = self.trail.enter(format!("reading {}", path.display()));
        let window = if self.config.pipeline.header_only {
            ReadWindow::Header
        } else {
            ReadWindow::Full
        };
        let workbook = read_workbook(source, path, window).map_err(|e| e.traced(&self.trail))?;
        self.add_workbook(workbook).map_err(|e| e.traced(&self.trail))
    }

    /// Add an already-built workbook to the reader context
    pub fn add_workbook(&mut self, workbook: Workbook) -> Result<()> {
        if let Some(existing) = self.reader.workbooks.iter().find(|w| w.name == workbook.name) {
            return Err(ForgeError::authoring(
                workbook.location(),
                format!("workbook name '{}' is already taken by {}", workbook.name, existing.path),
            ));
        }
        self.reader.workbooks.push(workbook);
        Ok(())
    }

    /// Run every stage. Errors in the reader context and internal errors are
    /// returned directly; any other writer-context error is recorded in that
    /// writer's outcome.
    pub fn run(&mut self) -> Result<RunReport> {
        let Forge {
            registries,
            config,
            trail,
            reader,
            contexts,
        } = self;
        contexts.clear();

        append_required(reader, &registries.processors);
        check_invocations(reader, &registries.processors)?;

        run_stage(registries, config, trail, reader, Stage::AfterRead)?;
        if config.pipeline.header_only {
            info!(workbooks = reader.workbooks.len(), "header-only run finished");
            return Ok(RunReport {
                header_only: true,
                outcomes: Vec::new(),
            });
        }

        run_stage(registries, config, trail, reader, Stage::PreParse)?;
        for workbook in &mut reader.workbooks {
            let _guard = trail.enter(format!("converting {}", workbook.path));
            convert_workbook(workbook, &registries.convertors).map_err(|e| e.traced(trail))?;
        }
        run_stage(registries, config, trail, reader, Stage::AfterParse)?;

        for name in registries.writers.names() {
            if config.is_suppressed(name) {
                debug!(writer = name, "writer suppressed");
                continue;
            }
            let taken = name == READER_CONTEXT || contexts.iter().any(|c| c.writer == name && c.tag == reader.tag);
            if taken {
                return Err(ForgeError::internal(format!(
                    "a context for writer '{}' with tag '{}' already exists",
                    name, reader.tag
                )));
            }
            contexts.push(reader.clone_for(name));
        }

        let mut report = RunReport::default();
        for context in contexts.iter_mut() {
            let error = match run_writer_context(registries, config, trail, context) {
                Ok(()) => {
                    info!(
                        writer = %context.writer,
                        workbooks = context.workbooks.len(),
                        "context finished"
                    );
                    None
                }
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => {
                    warn!(writer = %context.writer, "context failed: {}", e);
                    Some(e)
                }
            };
            report.outcomes.push(WriterOutcome {
                writer: context.writer.clone(),
                tag: context.tag.clone(),
                error,
            });
        }
        Ok(report)
    }
}

/// Attach every required processor that a workbook does not declare to its first
/// field-bearing sheet
fn append_required(context: &mut Context, processors: &Registry<Processor>) {
    let required: Vec<&str> = processors
        .iter()
        .filter(|(_, p)| p.required)
        .map(|(name, _)| name)
        .collect();

    for workbook in &mut context.workbooks {
        let Some(index) = workbook.first_field_sheet() else {
            continue;
        };
        for name in &required {
            if workbook.sheets.iter().any(|s| s.has_processor(name)) {
                continue;
            }
            debug!(workbook = %workbook.name, processor = *name, "appending required processor");
            let sheet = &mut workbook.sheets[index];
            let location = sheet.location();
            sheet.processors.push(ProcessorCall {
                name: name.to_string(),
                args: Vec::new(),
                location,
            });
        }
    }
}

fn check_invocations(context: &Context, processors: &Registry<Processor>) -> Result<()> {
    for workbook in &context.workbooks {
        for sheet in &workbook.sheets {
            if let Some(call) = sheet.processors.iter().find(|c| !processors.contains(&c.name)) {
                return Err(ForgeError::UnknownProcessor {
                    name: call.name.clone(),
                    location: call.location.clone(),
                });
            }
        }
    }
    Ok(())
}

fn run_writer_context(
    registries: &mut Registries,
    config: &ForgeConfig,
    trail: &Trail,
    context: &mut Context,
) -> Result<()> {
    let _guard = trail.enter(format!("writer '{}'", context.writer));

    for workbook in &mut context.workbooks {
        let _guard = trail.enter(format!("deduplicating {}", workbook.path));
        dedup_workbook(workbook).map_err(|e| e.traced(trail))?;
    }

    run_stage(registries, config, trail, context, Stage::PreCheck)?;
    resolve_context(context, &registries.checkers, trail)?;
    execute_context(context, &config.check, trail).map_err(|e| e.traced(trail))?;

    for stage in [Stage::AfterCheck, Stage::PreStringify, Stage::Stringify, Stage::AfterStringify] {
        run_stage(registries, config, trail, context, stage)?;
    }
    Ok(())
}

/// Run the invocations of one stage, sheet by sheet, in ascending priority
fn run_stage(
    registries: &mut Registries,
    config: &ForgeConfig,
    trail: &Trail,
    context: &mut Context,
    stage: Stage,
) -> Result<()> {
    let Registries { processors, writers, .. } = registries;
    let _guard = trail.enter(format!("{} stage", stage));
    let writer_name = context.writer.clone();
    let tag = context.tag.clone();
    let is_reader = context.is_reader();

    for workbook in &mut context.workbooks {
        let sheet_names: Vec<String> = workbook.sheets.iter().map(|s| s.name.clone()).collect();
        for sheet_name in sheet_names {
            let mut calls: Vec<(ProcessorCall, Processor)> = match workbook.sheet(&sheet_name) {
                Some(sheet) => sheet
                    .processors
                    .iter()
                    .filter_map(|call| {
                        processors
                            .get(&call.name)
                            .filter(|p| p.stage == stage)
                            .map(|p| (call.clone(), p.clone()))
                    })
                    .collect(),
                None => continue,
            };
            calls.sort_by_key(|(_, processor)| processor.priority);

            for (call, processor) in calls {
                let _guard = trail.enter(format!("@{} at {}", call.name, call.location));
                debug!(stage = %stage, writer = %writer_name, processor = %call.name, sheet = %sheet_name, "running processor");
                let writer = if is_reader {
                    None
                } else {
                    writers.get_mut(&writer_name).map(|w| &mut **w)
                };
                let mut ctx = ProcessorCtx {
                    workbook: &mut *workbook,
                    sheet: sheet_name.clone(),
                    call: &call,
                    writer,
                    writer_name: &writer_name,
                    tag: &tag,
                    config,
                    trail,
                };
                processor.run(&mut ctx, &call.args).map_err(|e| e.traced(trail))?;
            }
        }
    }
    Ok(())
}

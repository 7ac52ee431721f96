//! Staged processing pipeline
//!
//! Processors are attached to sheets by `@name(args)` directives and registered
//! with a stage and priority. The orchestrator ([`Forge`]) runs the reader
//! context through the early stages, clones it once per writer, and drives each
//! writer context through checking and output.
//!
//! ```text
//! after-read → pre-parse → [convert] → after-parse
//!     → [clone per writer + dedup] → pre-check → [resolve + execute checkers]
//!     → after-check → pre-stringify → stringify → after-stringify
//! ```

mod body;
mod forge;

pub use body::{convert_workbook, dedup_workbook};
pub use forge::{Forge, RunReport, WriterOutcome};

use std::fmt;
use std::rc::Rc;

use crate::config::ForgeConfig;
use crate::error::{ForgeError, Result};
use crate::schema::{ProcessorCall, Sheet, Workbook};
use crate::trail::Trail;
use crate::value::Value;
use crate::writer::{Writer, WriterCall};

// =============================================================================
// Stages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    AfterRead,
    PreParse,
    AfterParse,
    PreCheck,
    AfterCheck,
    PreStringify,
    Stringify,
    AfterStringify,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::AfterRead,
        Stage::PreParse,
        Stage::AfterParse,
        Stage::PreCheck,
        Stage::AfterCheck,
        Stage::PreStringify,
        Stage::Stringify,
        Stage::AfterStringify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AfterRead => "after-read",
            Stage::PreParse => "pre-parse",
            Stage::AfterParse => "after-parse",
            Stage::PreCheck => "pre-check",
            Stage::AfterCheck => "after-check",
            Stage::PreStringify => "pre-stringify",
            Stage::Stringify => "stringify",
            Stage::AfterStringify => "after-stringify",
        }
    }

    /// Stages that run on the reader context
    pub fn is_reader_stage(&self) -> bool {
        matches!(self, Stage::AfterRead | Stage::PreParse | Stage::AfterParse)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Processors
// =============================================================================

pub type ProcessorFn = Rc<dyn Fn(&mut ProcessorCtx<'_>, &[String]) -> Result<()>>;

/// A registered processor
#[derive(Clone)]
pub struct Processor {
    pub stage: Stage,
    /// Lower runs first; ties keep declaration order
    pub priority: i32,
    /// Appended to every workbook that does not declare it
    pub required: bool,
    run: ProcessorFn,
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("stage", &self.stage)
            .field("priority", &self.priority)
            .field("required", &self.required)
            .finish()
    }
}

impl Processor {
    pub fn new<F>(stage: Stage, run: F) -> Self
    where
        F: Fn(&mut ProcessorCtx<'_>, &[String]) -> Result<()> + 'static,
    {
        Self {
            stage,
            priority: 0,
            required: false,
            run: Rc::new(run),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn run(&self, ctx: &mut ProcessorCtx<'_>, args: &[String]) -> Result<()> {
        (self.run)(ctx, args)
    }
}

/// What a processor invocation can see and touch
pub struct ProcessorCtx<'a> {
    pub workbook: &'a mut Workbook,
    /// Sheet the invocation is attached to
    pub sheet: String,
    pub call: &'a ProcessorCall,
    /// `None` in the reader context
    pub writer: Option<&'a mut (dyn Writer + 'static)>,
    /// Writer name of the context
    pub writer_name: &'a str,
    pub tag: &'a str,
    pub config: &'a ForgeConfig,
    pub trail: &'a Trail,
}

impl ProcessorCtx<'_> {
    /// The sheet the invocation is attached to
    pub fn sheet(&self) -> Result<&Sheet> {
        let name = &self.sheet;
        self.workbook.sheet(name).ok_or_else(|| {
            ForgeError::internal(format!("sheet '{}' vanished from {}", name, self.workbook.path))
        })
    }

    pub fn sheet_mut(&mut self) -> Result<&mut Sheet> {
        let path = self.workbook.path.clone();
        let name = self.sheet.clone();
        self.workbook
            .sheet_mut(&name)
            .ok_or_else(|| ForgeError::internal(format!("sheet '{}' vanished from {}", name, path)))
    }

    pub fn is_reader(&self) -> bool {
        self.writer.is_none()
    }

    /// Hand a payload to the context's writer
    pub fn emit(&mut self, call: WriterCall, payload: &Value) -> Result<()> {
        let workbook: &Workbook = &*self.workbook;
        match self.writer.as_deref_mut() {
            Some(writer) => writer.write(workbook, call, payload),
            None => Err(ForgeError::internal(format!(
                "@{} tried to emit {} from the reader context",
                self.call.name, call
            ))),
        }
    }

    /// Error attributed to this invocation
    pub fn fail(&self, message: impl Into<String>) -> ForgeError {
        ForgeError::authoring(self.call.location.clone(), format!("@{}: {}", self.call.name, message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_names() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
        assert_eq!(Stage::PreStringify.to_string(), "pre-stringify");
        assert!(Stage::AfterParse.is_reader_stage());
        assert!(!Stage::PreCheck.is_reader_stage());
    }

    #[test]
    fn test_processor_builder() {
        let processor = Processor::new(Stage::PreCheck, |_, _| Ok(())).with_priority(5).required();
        assert_eq!(processor.priority, 5);
        assert!(processor.required);
    }
}

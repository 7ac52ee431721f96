//! Table Forge
//!
//! Turns spreadsheet-authored tables into validated, multi-format build artifacts.
//!
//! ## Features
//!
//! - **Typed cells**: every cell keeps its raw text and location next to its value
//! - **Per-target contexts**: fields are filtered per writer, then checked and
//!   emitted independently
//! - **Checkers**: expressions, enumerations, cross-sheet references with path
//!   queries, and named checkers
//! - **Stringify engine**: JSON, Lua table literals and TypeScript modules with
//!   deterministic member order
//!
//! ## Architecture
//!
//! ```text
//! tables/
//! ├── item.grid.json        ─┐
//! └── skill.grid.json        │  GridSource → reader Context
//!                            ▼
//!     after-read → pre-parse → convert → after-parse
//!                            │
//!            ┌───────────────┴───────────────┐
//!            ▼                               ▼
//!     client Context                  server Context
//!     dedup → checks → define →       dedup → checks → define →
//!     stringify → Writer              stringify → Writer
//! ```

pub mod checker;
pub mod checksum;
pub mod config;
pub mod convert;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod processors;
pub mod reader;
pub mod registry;
pub mod schema;
pub mod stringify;
pub mod suggest;
pub mod trail;
pub mod value;
pub mod writer;

pub use checksum::{Checksum, ChecksumManifest};
pub use config::ForgeConfig;
pub use error::{CheckFailure, ForgeError, Result, ValidationReport};
pub use pipeline::{Forge, Processor, ProcessorCtx, RunReport, Stage, WriterOutcome};
pub use reader::{GridSource, JsonGridSource, MemoryGridSource, ReadWindow};
pub use registry::{Registries, Registry};
pub use schema::{Context, Field, Location, Row, Sheet, Workbook};
pub use stringify::{render_document, stringify, Format, StringifyOptions};
pub use trail::Trail;
pub use value::{Array, Cell, Object, Tags, Value};
pub use writer::{FileWriter, MemoryWriter, Writer, WriterCall};

//! Configuration management for table-forge
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (forge.toml)
//! - Environment variables (FORGE__*)
//!
//! ## Example config file (forge.toml):
//! ```toml
//! [pipeline]
//! tag = "release"
//! suppressed_writers = ["tools"]
//!
//! [check]
//! failure_cap = 20
//! suppress = ["regex"]
//!
//! [stringify]
//! indent = 2
//! immutable = true
//! preamble = "/* generated, do not edit */"
//!
//! [input]
//! dir = "tables"
//!
//! [[writers]]
//! name = "client"
//! format = "ts"
//! out_dir = "out/client"
//!
//! [[writers]]
//! name = "server"
//! format = "lua"
//! out_dir = "out/server"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::stringify::Format;
use crate::value::DEFAULT_PRECISION;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Checker settings
    #[serde(default)]
    pub check: CheckConfig,

    /// Output rendering settings
    #[serde(default)]
    pub stringify: StringifyConfig,

    /// Where grid files are discovered
    #[serde(default)]
    pub input: InputConfig,

    /// One file writer per output target
    #[serde(default)]
    pub writers: Vec<WriterConfig>,
}

/// Pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Stop after the after-read stage
    #[serde(default)]
    pub header_only: bool,

    /// Registered writers that get no context
    #[serde(default)]
    pub suppressed_writers: Vec<String>,

    /// Run tag shared by every context of the run
    #[serde(default)]
    pub tag: String,
}

/// Checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Failing cells recorded per field and checker before truncating with `...`
    #[serde(default = "default_failure_cap")]
    pub failure_cap: usize,

    /// Checker parser names to skip
    #[serde(default)]
    pub suppress: Vec<String>,
}

/// Stringify configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringifyConfig {
    /// Spaces per level; 0 renders compact output
    #[serde(default = "default_indent")]
    pub indent: usize,

    /// Fractional digits for non-integral numbers
    #[serde(default = "default_precision")]
    pub precision: usize,

    /// Maximum nesting depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Append `as const` to TypeScript exports
    #[serde(default = "default_true")]
    pub immutable: bool,

    /// Text placed verbatim at the top of every TypeScript module
    #[serde(default)]
    pub preamble: Option<String>,
}

/// Input discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory searched recursively for grid files
    #[serde(default = "default_input_dir")]
    pub dir: PathBuf,

    /// File name suffix of grid files
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// One output target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Writer name, matched against field writer lists
    pub name: String,

    /// Output format
    #[serde(default)]
    pub format: Format,

    /// Output directory
    pub out_dir: PathBuf,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_failure_cap() -> usize {
    50
}

fn default_indent() -> usize {
    2
}

fn default_precision() -> usize {
    DEFAULT_PRECISION
}

fn default_max_depth() -> usize {
    256
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("tables")
}

fn default_extension() -> String {
    ".grid.json".to_string()
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            failure_cap: default_failure_cap(),
            suppress: Vec::new(),
        }
    }
}

impl Default for StringifyConfig {
    fn default() -> Self {
        Self {
            indent: default_indent(),
            precision: default_precision(),
            max_depth: default_max_depth(),
            immutable: true,
            preamble: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: default_input_dir(),
            extension: default_extension(),
        }
    }
}

impl ForgeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the default locations
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["forge.toml", ".forge.toml", "config/forge.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "table-forge", "forge") {
            let xdg_config = config_dir.config_dir().join("forge.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // FORGE__CHECK__FAILURE_CAP=10 and friends
        builder = builder.add_source(
            Environment::with_prefix("FORGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Whether a registered writer is excluded from this run
    pub fn is_suppressed(&self, writer: &str) -> bool {
        self.pipeline.suppressed_writers.iter().any(|w| w == writer)
    }

    /// Input directory resolved against the working directory
    pub fn input_dir(&self) -> PathBuf {
        if self.input.dir.is_absolute() {
            self.input.dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.input.dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ForgeConfig::default();
        assert_eq!(config.check.failure_cap, 50);
        assert_eq!(config.stringify.max_depth, 256);
        assert_eq!(config.stringify.precision, 10);
        assert!(config.stringify.immutable);
        assert!(config.writers.is_empty());
    }

    #[test]
    fn test_serialize_config() {
        let mut config = ForgeConfig::default();
        config.writers.push(WriterConfig {
            name: "client".to_string(),
            format: Format::Ts,
            out_dir: PathBuf::from("out/client"),
        });
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[check]"));
        assert!(toml_str.contains("[[writers]]"));
        assert!(toml_str.contains("format = \"ts\""));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[check]\nfailure_cap = 3\n\n[[writers]]\nname = \"server\"\nformat = \"lua\"\nout_dir = \"out\"\n",
        )
        .unwrap();

        let config = ForgeConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.check.failure_cap, 3);
        assert_eq!(config.stringify.indent, 2);
        assert_eq!(config.writers[0].format, Format::Lua);
        assert!(!config.is_suppressed("server"));
    }
}

//! Table Forge CLI
//!
//! Reads grid files, runs the pipeline and writes one artifact tree per
//! configured writer.

use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use table_forge::reader::discover;
use table_forge::{FileWriter, Forge, ForgeConfig, JsonGridSource, StringifyOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "table-forge")]
#[command(about = "Validate spreadsheet tables and render them as JSON, Lua or TypeScript")]
struct Cli {
    /// Explicit config file, layered over forge.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write artifacts
    Build {
        /// Directory searched for grid files (defaults to input.dir)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Run tag for this build
        #[arg(short, long)]
        tag: Option<String>,

        /// Skip writers by name
        #[arg(long)]
        suppress: Vec<String>,
    },

    /// Read headers only and list workbooks, sheets and fields
    Inspect {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to a file
    Init {
        #[arg(default_value = "forge.toml")]
        path: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().to_string());
    let mut config = ForgeConfig::load_from(config_path.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Build { input, tag, suppress } => {
            if let Some(tag) = tag {
                config.pipeline.tag = tag;
            }
            config.pipeline.suppressed_writers.extend(suppress);
            if config.writers.is_empty() {
                bail!("no writers configured; add [[writers]] entries to forge.toml");
            }
            build(config, input)
        }

        Commands::Inspect { input } => {
            config.pipeline.header_only = true;
            inspect(config, input)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init { path } => {
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                config.save(&path.to_string_lossy())?;
                println!("✅ Wrote {}", path.display());
                Ok(())
            }
        },
    }
}

fn load(forge: &mut Forge, config: &ForgeConfig, input: Option<PathBuf>) -> anyhow::Result<usize> {
    let input = input.unwrap_or_else(|| config.input_dir());
    let files = discover(&input, &config.input.extension);
    if files.is_empty() {
        bail!("no '*{}' files under {}", config.input.extension, input.display());
    }
    for file in &files {
        forge.read(&JsonGridSource, file)?;
    }
    Ok(files.len())
}

fn build(config: ForgeConfig, input: Option<PathBuf>) -> anyhow::Result<()> {
    let options = StringifyOptions::from_config(&config.stringify);
    let mut forge = Forge::new(config.clone());
    for writer in &config.writers {
        let file_writer = FileWriter::new(&writer.out_dir, writer.format, options.clone())
            .with_context(|| format!("opening output directory {}", writer.out_dir.display()))?;
        forge.register_writer(&writer.name, file_writer);
    }

    let count = load(&mut forge, &config, input)?;
    println!("📖 Read {} workbook(s)", count);

    let report = forge.run()?;
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!("  ✅ {}", outcome.writer),
            Some(e) => println!("  ❌ {}\n{}", outcome.writer, e),
        }
    }
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn inspect(config: ForgeConfig, input: Option<PathBuf>) -> anyhow::Result<()> {
    let mut forge = Forge::new(config.clone());
    load(&mut forge, &config, input)?;
    forge.run()?;

    for workbook in &forge.reader().workbooks {
        println!("📘 {} ({})", workbook.name, workbook.path);
        for sheet in &workbook.sheets {
            let processors: Vec<String> = sheet.processors.iter().map(|p| format!("@{}", p.name)).collect();
            println!("  {} [{}]", sheet.name, processors.join(", "));
            for field in &sheet.fields {
                println!("    {:<20} {:<12} {} checker(s)", field.name, field.type_name, field.checkers.len());
            }
        }
    }
    Ok(())
}

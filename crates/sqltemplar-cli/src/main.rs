use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sqltemplar_core::{Config, Diagnostic, Severity, TemplatedFile};
use sqltemplar_jinja::{JinjaTemplater, ProcessResult};

const DEFAULT_CONFIG: &str = "sqltemplar.toml";

/// sqltemplar - Render Jinja-templated SQL and trace it back to its source
#[derive(Parser)]
#[command(name = "sqltemplar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: sqltemplar.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a templated SQL file
    Render {
        /// SQL file to render
        file: PathBuf,
    },

    /// Show how the rendered output maps back to the source
    Slices {
        /// SQL file to trace
        file: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if Path::new(DEFAULT_CONFIG).exists() {
        Config::from_file(Path::new(DEFAULT_CONFIG))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    let (file, show_slices) = match &cli.command {
        Commands::Render { file } => (file, false),
        Commands::Slices { file } => (file, true),
    };

    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let fname = file.display().to_string();

    if cli.verbose {
        eprintln!("{} {}", "Templating".cyan(), fname);
    }
    tracing::info!(file = %fname, "processing file");

    let result = JinjaTemplater::new().process(&source, &fname, &config);
    let diagnostics = result.diagnostics(&fname);

    match cli.format {
        Format::Json => print_json(&result, &diagnostics, show_slices)?,
        Format::Text => {
            if show_slices {
                print_slices(&result);
            } else if let Some(rendered) = result.templated_file.as_ref().and_then(TemplatedFile::templated_str) {
                print!("{rendered}");
            }
            print_diagnostics(&diagnostics);
        }
    }

    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        std::process::exit(1);
    }
    Ok(())
}

fn print_json(result: &ProcessResult, diagnostics: &[Diagnostic], show_slices: bool) -> Result<()> {
    let file = result.templated_file.as_ref();
    let mut output = serde_json::json!({
        "rendered": file.and_then(TemplatedFile::templated_str),
        "diagnostics": diagnostics,
    });
    if show_slices {
        output["raw_sliced"] = serde_json::to_value(file.map(|f| &f.raw_sliced))?;
        output["sliced_file"] = serde_json::to_value(file.map(|f| &f.sliced_file))?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_slices(result: &ProcessResult) {
    let Some(file) = &result.templated_file else {
        return;
    };
    let Some(templated) = file.templated_str() else {
        println!("{}", "File could not be rendered; no slices".yellow());
        return;
    };

    println!("{}", "Raw slices".bold().bright_blue());
    for (idx, slice) in file.raw_sliced.iter().enumerate() {
        println!(
            "  {:>4} {:<12} {:>6} block {:<3} {:?}",
            idx,
            format!("{:?}", slice.slice_type),
            slice.source_idx,
            slice.block_idx,
            slice.raw
        );
    }

    println!();
    println!("{}", "Templated slices".bold().bright_blue());
    for slice in &file.sliced_file {
        println!(
            "  {:<10} src {:>5}..{:<5} out {:>5}..{:<5} raw {:?} {:?}",
            format!("{:?}", slice.slice_type),
            slice.source_slice.start,
            slice.source_slice.end,
            slice.templated_slice.start,
            slice.templated_slice.end,
            slice.raw_indices,
            &templated[slice.templated_slice.clone()]
        );
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let severity = match diagnostic.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warn => "warn".yellow().bold(),
            Severity::Info => "info".cyan(),
        };
        let position = match (diagnostic.line(), diagnostic.column()) {
            (Some(line), Some(column)) => format!("{line}:{column}"),
            (Some(line), None) => line.to_string(),
            _ => String::from("-"),
        };
        eprintln!(
            "{} [{}] {} {}",
            severity,
            diagnostic.code.as_str().dimmed(),
            position,
            diagnostic.message
        );
    }
}

//! FreeStyle Libre Decoder CLI Application
//!
//! This is the command-line interface for the FreeStyle Libre packet decoder.
//! It uses the fslibre-decoder library and adds:
//! - Loading JSON packet dumps (several in parallel)
//! - TOML configuration with command line overrides
//! - JSON output of the decoded records or full session reports

use anyhow::{Context, Result};
use clap::Parser;
use fslibre_decoder::{DecodeReport, Decoder, PacketDump};
use rayon::prelude::*;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

mod config;

use config::AppConfig;

/// FreeStyle Libre Decoder - Decode reader packet dumps into glucose records
#[derive(Parser, Debug)]
#[command(name = "fslibre-cli")]
#[command(about = "Decode FreeStyle Libre AAP packet dumps (JSON)", long_about = None)]
#[command(version)]
struct Args {
    /// Packet dump file(s) to decode (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    input: Vec<PathBuf>,

    /// Output file for decoded records (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// IANA timezone the reader was used in
    #[arg(short, long, value_name = "TZ")]
    timezone: Option<String>,

    /// Database record count, overriding the value stored in the dump
    #[arg(long, value_name = "COUNT")]
    record_count: Option<u32>,

    /// Fail when a dump has no factory configuration
    #[arg(long)]
    strict: bool,

    /// Emit the full session report instead of the records alone
    #[arg(long)]
    summary: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("FreeStyle Libre Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", fslibre_decoder::VERSION);

    let config = resolve_config(&args)?;

    if config.input.files.is_empty() {
        eprintln!("FreeStyle Libre Decoder - No input specified");
        eprintln!("\nQuick Start:");
        eprintln!("  fslibre-cli --input reader-dump.json --timezone Europe/Berlin");
        eprintln!("  fslibre-cli --config config.toml");
        eprintln!("\nUse --help for more options");
        return Ok(());
    }

    let decoder = Decoder::new(config.decoder.clone()).context("Invalid decoder configuration")?;

    let reports = config
        .input
        .files
        .par_iter()
        .map(|path| decode_dump_file(&decoder, path, config.input.record_count))
        .collect::<Result<Vec<_>>>()?;

    let output = build_output(&config.input.files, reports, config.output.include_summary)?;
    write_output(&output, config.output.path.as_deref(), config.output.pretty)?;

    Ok(())
}

/// Merge the config file (if any) with command line flags; flags win
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    config.input.files.extend(args.input.iter().cloned());
    if let Some(count) = args.record_count {
        config.input.record_count = Some(count);
    }
    if let Some(timezone) = &args.timezone {
        config.decoder.timezone = timezone.clone();
    }
    if args.strict {
        config.decoder.strict_time_conversion = true;
    }
    if let Some(path) = &args.output {
        config.output.path = Some(path.clone());
    }
    config.output.pretty |= args.pretty;
    config.output.include_summary |= args.summary;

    log::debug!("Effective configuration: {:?}", config);
    Ok(config)
}

fn decode_dump_file(
    decoder: &Decoder,
    path: &Path,
    record_count: Option<u32>,
) -> Result<DecodeReport> {
    let mut dump = PacketDump::from_path(path)
        .with_context(|| format!("Failed to load packet dump: {:?}", path))?;
    if let Some(count) = record_count {
        dump.db_record_number = count;
    }

    let report = decoder
        .decode_dump(&dump)
        .with_context(|| format!("Failed to decode packet dump: {:?}", path))?;

    for failure in &report.failures {
        log::warn!("{:?}: {} packet failed: {}", path, failure.op_code, failure.reason);
    }
    log::info!("{:?}: {} records", path, report.records.len());

    Ok(report)
}

/// One input gives its records (or report) directly; several are tagged by source
fn build_output(
    inputs: &[PathBuf],
    reports: Vec<DecodeReport>,
    include_summary: bool,
) -> Result<Value> {
    let mut values = reports
        .into_iter()
        .map(|report| {
            if include_summary {
                serde_json::to_value(&report)
            } else {
                serde_json::to_value(&report.records)
            }
        })
        .collect::<serde_json::Result<Vec<_>>>()
        .context("Failed to serialize decoded records")?;

    if values.len() == 1 {
        return Ok(values.remove(0));
    }

    Ok(Value::Array(
        inputs
            .iter()
            .zip(values)
            .map(|(path, value)| {
                json!({ "source": path.display().to_string(), "records": value })
            })
            .collect(),
    ))
}

fn write_output(output: &Value, path: Option<&Path>, pretty: bool) -> Result<()> {
    let writer: Box<dyn Write> = match path {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(writer);

    if pretty {
        serde_json::to_writer_pretty(&mut writer, output)?;
    } else {
        serde_json::to_writer(&mut writer, output)?;
    }
    writeln!(writer)?;
    writer.flush()?;

    if let Some(path) = path {
        log::info!("Wrote output to {:?}", path);
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, Write};

mod alignment;
mod classify;
mod config;
mod diagnostics;
mod historic;
mod input;
mod timestamp;
mod trace;

use config::{AnalysisConfig, OutputFormat};

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "oplat")]
#[command(about = "Storage op latency and alignment analysis", long_about = None)]
struct Cli {
    /// Increase log verbosity on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file; command-line flags override its values.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Correlate filestore debug log lines into per-op phase latencies.
    Trace {
        /// Log files, plain or gzip; stdin when none are given.
        files: Vec<String>,

        /// Seconds a phase may take before the op counts as slow.
        #[arg(long)]
        threshold: Option<f64>,

        /// Block size in bytes that writes are checked against.
        #[arg(long)]
        block_size: Option<u64>,

        /// Append the histogram of partial-block remainders.
        #[arg(long)]
        histogram: bool,

        /// Also report partial writes that were not slow.
        #[arg(long)]
        show_partial: bool,

        /// Report format.
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Report slow ops from a dump_historic_ops JSON document.
    Historic {
        /// The dump_historic_ops JSON file.
        file: String,

        /// Seconds the gate transition must take for an op to be reported.
        #[arg(long)]
        min_duration: Option<f64>,

        /// Report format.
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Classify bluestore object ops by alignment.
    Alignment {
        /// Log files, plain or gzip; stdin when none are given.
        files: Vec<String>,

        /// Alignment unit in bytes; repeat for several.
        #[arg(long)]
        align: Vec<u64>,

        /// Leave the raw log lines out of each emitted op.
        #[arg(long)]
        no_lines: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    diagnostics::init_tracing(cli.verbose);

    let mut cfg = AnalysisConfig::load(cli.config.as_deref())?;

    match &cli.cmd {
        Commands::Trace {
            threshold,
            block_size,
            ..
        } => {
            if let Some(t) = threshold {
                cfg.trace.threshold = *t;
            }
            if let Some(b) = block_size {
                cfg.trace.block_size = *b;
            }
        }
        Commands::Historic { min_duration, .. } => {
            if let Some(m) = min_duration {
                cfg.historic.min_duration = *m;
            }
        }
        Commands::Alignment {
            align, no_lines, ..
        } => {
            if !align.is_empty() {
                cfg.alignment.units = align.clone();
            }
            if *no_lines {
                cfg.alignment.record_lines = false;
            }
        }
    }
    cfg.validate()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.cmd {
        Commands::Trace {
            files,
            histogram,
            show_partial,
            format,
            ..
        } => {
            let opts = trace::TraceOptions {
                format,
                show_partial,
                histogram,
            };
            trace::run(&files, &cfg.trace, &opts, &mut out)?;
        }
        Commands::Historic { file, format, .. } => {
            historic::run(&file, &cfg.historic, format, &mut out)?;
        }
        Commands::Alignment { files, .. } => {
            alignment::run(&files, &cfg.alignment, &mut out)?;
        }
    }

    out.flush()?;
    Ok(())
}

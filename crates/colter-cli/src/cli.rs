//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use colter_core::cycle::{CycleOptions, RunSelection};
use colter_core::models::{OutputKind, SourceKind};

#[derive(Debug, Parser)]
#[command(name = "colter", version, about = "Track GitHub and PyPI metrics and export them")]
pub struct Args {
    /// Interactively create or update the config file
    #[arg(short = 'g', long)]
    pub generate_config: bool,

    /// Which sources to collect
    #[arg(short = 't', long = "type", value_enum, default_value_t = SourceArg::All)]
    pub source: SourceArg,

    /// Where to export metrics (repeatable)
    #[arg(short = 'o', long = "output", value_enum, num_args = 1..)]
    pub outputs: Vec<OutputArg>,

    /// Send a test alert through the email sink
    #[arg(long)]
    pub test_email: bool,

    /// Debug output on the console
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Collect but do not send anything
    #[arg(long)]
    pub dry_run: bool,

    /// Run as a daemon, collecting every N minutes
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub schedule: Option<u64>,

    /// Forget the cached session and exit
    #[arg(long)]
    pub logout: bool,

    /// Config file location
    #[arg(long, value_name = "PATH", env = "COLTER_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Github,
    Pypi,
    All,
}

impl SourceArg {
    pub fn kinds(self) -> Vec<SourceKind> {
        match self {
            SourceArg::Github => vec![SourceKind::Github],
            SourceArg::Pypi => vec![SourceKind::Pypi],
            SourceArg::All => SourceKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputArg {
    Influx,
    Prometheus,
}

impl From<OutputArg> for OutputKind {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Influx => OutputKind::Influx,
            OutputArg::Prometheus => OutputKind::Prometheus,
        }
    }
}

impl Args {
    pub fn selection(&self) -> RunSelection {
        let mut outputs: Vec<OutputKind> = Vec::new();
        for output in self.outputs.iter().copied().map(OutputKind::from) {
            if !outputs.contains(&output) {
                outputs.push(output);
            }
        }
        RunSelection {
            sources: self.source.kinds(),
            outputs,
        }
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            dry_run: self.dry_run,
            test_email: self.test_email,
        }
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Convert service source code into a validated service script
#[derive(Parser, Debug)]
#[command(name = "svcgen", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full generation pipeline on a source file
    Run {
        /// Source code to convert
        #[arg(value_name = "FILE")]
        code: PathBuf,

        /// Auxiliary hints, e.g. "service name: order-rpc"
        #[arg(long, conflicts_with = "aux_file")]
        aux: Option<String>,

        /// Read auxiliary hints from a file
        #[arg(long, value_name = "FILE")]
        aux_file: Option<PathBuf>,

        /// Custom stage catalog (YAML); the built-in one is used otherwise
        #[arg(long, value_name = "FILE", env = "SVCGEN_CATALOG")]
        catalog: Option<PathBuf>,

        /// Pipeline configuration (YAML); environment variables otherwise
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Directory for the script, plugin and run summary
        #[arg(long, value_name = "DIR", default_value = "output")]
        out_dir: PathBuf,

        /// Append per-round statistics to this CSV file
        #[arg(long, value_name = "FILE", env = "SVCGEN_STATS")]
        stats: Option<PathBuf>,

        /// Expect an explicit `VERDICT: PASS|FAIL` line from the reviewer
        #[arg(long)]
        tagged_verdicts: bool,
    },

    /// Validate a service script
    Check {
        #[arg(value_name = "FILE")]
        script: PathBuf,

        /// Print the parse tree as JSON
        #[arg(long)]
        tree: bool,
    },
}

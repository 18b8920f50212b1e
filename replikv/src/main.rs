use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

/// RepliKV workload driver: consumes a command script and prints the
/// protocol output.
#[derive(Parser)]
#[command(name = "replikv", author, version, about = "RepliKV workload driver", long_about = None)]
struct Cli {
    /// Workload script; reads stdin when omitted.
    input: Option<PathBuf>,

    /// Log engine state transitions to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    if let Err(e) = repli_log::init(level) {
        eprintln!("logging init failed: {e}");
    }

    match drive(&cli) {
        // parse failures leave the stream consumed but the exit nonzero
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn drive(cli: &Cli) -> Result<u64> {
    let stdout = io::stdout();
    let failures = match &cli.input {
        Some(path) => replikv::run(BufReader::new(File::open(path)?), stdout.lock())?,
        None => replikv::run(io::stdin().lock(), stdout.lock())?,
    };
    Ok(failures)
}

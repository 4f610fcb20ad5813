use clap::Parser;
use failsafefs::recovery::{RecoveredFile, Scanner};
use std::fs::File;
use std::path::PathBuf;

/// Sweep a device or file for recoverable FailSafeFS records.
///
/// Prints one line per valid description block found, at any byte
/// alignment, whether or not the enclosing directory structure survives.
#[derive(Parser)]
#[command(name = "failsafe-scan", version)]
struct Cli {
    /// Device or file to sweep
    device: PathBuf,

    /// Emit one JSON object per record instead of text
    #[arg(long)]
    json: bool,

    /// Also print chain identity and ownership per record
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let device = File::open(&cli.device)?;
    let mut found = 0usize;
    for record in Scanner::new(device) {
        let record = record?;
        found += 1;
        if cli.json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            print_record(&record, cli.verbose);
        }
    }

    if !cli.json && cli.verbose {
        eprintln!("{} record(s) recovered from {}", found, cli.device.display());
    }
    Ok(())
}

fn print_record(rec: &RecoveredFile, verbose: bool) {
    println!(
        "Offset: {} Size: {} Rev: {} Name: {}",
        rec.byte_offset, rec.logical_len, rec.revision, rec.path
    );
    if verbose {
        println!(
            "  chain {}  uid {} gid {} mode {:o}{}",
            rec.random_id_hex(),
            rec.uid,
            rec.gid,
            rec.permissions,
            if rec.partial_path { "  (partial path)" } else { "" },
        );
    }
}

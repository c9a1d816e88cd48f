//! Small operator CLI: boot an engine from a TOML config and either run
//! `fsck` or deposit a file from the command line. Ambient tooling, outside
//! the core's contract.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cdn_data::{CdnData, Csync2Replicator, EngineConfig, HeaderProbeCodec};

#[derive(Parser)]
#[command(name = "cdn-fsck", about = "Operate a CdnData engine from the command line")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a read-only integrity check and print every issue found.
    Fsck,
    /// Deposit a file, declaring its content type by file extension.
    Deposit {
        /// Path to the file to deposit.
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match EngineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    cdn_data::logging::init_logging(&config.logging);

    let replicator = Csync2Replicator::new(config.replicator_group.clone());
    let engine = match CdnData::boot(&config, Box::new(HeaderProbeCodec), Box::new(replicator)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to boot engine: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Fsck => run_fsck(&engine),
        Command::Deposit { path } => run_deposit(&engine, &path),
    }
}

fn run_fsck(engine: &CdnData) -> ExitCode {
    match engine.fsck() {
        Ok(issues) => {
            for issue in &issues {
                println!("{:?} {}: {}", issue.severity, issue.path.display(), issue.message);
            }
            if issues.iter().any(|i| i.severity.is_severe()) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("fsck failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_deposit(engine: &CdnData, path: &PathBuf) -> ExitCode {
    let Some(content_type) = path.extension().and_then(|e| e.to_str()).and_then(cdn_data::ContentType::by_extension)
    else {
        eprintln!("cannot infer a declared content type from {}", path.display());
        return ExitCode::FAILURE;
    };

    let handle = match engine.new_upload(content_type) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to stage upload: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = std::fs::copy(path, handle.path()) {
        eprintln!("failed to copy {} into staging: {e}", path.display());
        return ExitCode::FAILURE;
    }

    match engine.find_or_add(handle) {
        Ok(variant) => {
            println!("{}", variant.path().display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("deposit failed: {e}");
            ExitCode::FAILURE
        }
    }
}

//! Config validation CLI tool
//!
//! Validates a labgated configuration file and the roster snapshot it
//! points at, reporting every error found.

use labgate_config::ConfigError;
use labgate_roster::SnapshotError;
use labgate_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a labgated configuration file and its roster snapshot.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    let config = match labgate_config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        labgate_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            return ExitCode::from(1);
        }
    };

    println!("✓ Configuration is valid");
    println!();
    println!("Summary:");
    println!("  Config version: {}", labgate_config::CURRENT_CONFIG_VERSION);
    println!("  Controller: {}", config.controller.url);
    println!("  Socket: {}", config.service.socket_path.display());

    let roster_path = &config.service.roster_path;
    if !roster_path.exists() {
        println!("  Roster: {} (not present, service starts empty)", roster_path.display());
        return ExitCode::SUCCESS;
    }

    match labgate_roster::load_snapshot(roster_path) {
        Ok(roster) => {
            let counts = roster.counts();
            println!(
                "  Roster: {} students, {} servers, {} courses",
                counts.students, counts.servers, counts.courses
            );
            ExitCode::SUCCESS
        }
        Err(SnapshotError::ValidationFailed { errors }) => {
            eprintln!();
            eprintln!("✗ Roster snapshot {} is invalid", roster_path.display());
            eprintln!("Validation errors ({}):", errors.len());
            for err in &errors {
                eprintln!("  - {}", err);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!();
            eprintln!("✗ Roster snapshot {}: {}", roster_path.display(), e);
            ExitCode::from(1)
        }
    }
}

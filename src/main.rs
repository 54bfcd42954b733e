//! Stemmerge CLI
//!
//! Command-line entry point for merging and assembling speech stems.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stemmerge::cli::commands;
use stemmerge::cli::{CacheCommands, Cli, Commands};
use stemmerge::config::Settings;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("Stemmerge v{}", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(stem_err) = e.downcast_ref::<stemmerge::StemError>() {
                for hint in stem_err.recovery_suggestions() {
                    eprintln!("  hint: {}", hint);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(dir) = cli.stems_dir {
        settings.stems_dir = dir;
    }
    if let Some(index) = cli.index_file {
        settings.index_file = index;
    }

    let Some(cmd) = cli.command else {
        println!("Stemmerge v{}", env!("CARGO_PKG_VERSION"));
        println!("Use --help for available commands");
        return Ok(ExitCode::SUCCESS);
    };

    match cmd {
        Commands::Merge {
            files,
            output,
            timing,
            gap_ms,
            crossfade_ms,
            tail_fade_ms,
            eager,
        } => {
            if let Some(gap) = gap_ms {
                settings.default_gap_ms = gap;
            }
            if let Some(xfade) = crossfade_ms {
                settings.default_crossfade_ms = xfade;
            }
            if let Some(tail) = tail_fade_ms {
                settings.tail_fade_ms = tail;
            }
            settings.eager_validation |= eager;
            settings.validate()?;
            commands::merge(&settings, &files, &output, timing.as_deref())?;
        }
        Commands::Verify { files, dir, json } => {
            let mismatches = commands::verify(&files, dir.as_deref(), json)?;
            if !mismatches.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Assemble {
            name,
            developer,
            template,
            output,
        } => {
            commands::assemble(
                &settings,
                &name,
                &developer,
                template.as_deref(),
                output.as_deref(),
            )?;
        }
        Commands::Templates => commands::templates(&settings)?,
        Commands::Cache(cache) => match cache {
            CacheCommands::Summary => commands::cache_summary(&settings)?,
            CacheCommands::Cleanup { max_age_days } => {
                commands::cache_cleanup(&settings, max_age_days)?;
            }
            CacheCommands::Register {
                name,
                path,
                text,
                voice_id,
                dataset,
            } => commands::cache_register(
                &settings,
                &name,
                &path,
                &text,
                voice_id.as_deref(),
                dataset.as_deref(),
            )?,
            CacheCommands::Verify { name } => {
                if !commands::cache_verify(&settings, &name)? {
                    return Ok(ExitCode::FAILURE);
                }
            }
        },
        Commands::Config => commands::show_config(&settings)?,
    }

    Ok(ExitCode::SUCCESS)
}

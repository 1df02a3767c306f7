// ==============================================================================
// main.rs - Variant Array Pipeline Entry Point
// ==============================================================================
// Description: Command-line entry point for allele-count aggregation,
//              var/gt redimension and chunked load-buffer merges
// Author: Matt Barham
// Created: 2026-02-02
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use variant_pipeline::audit::AuditEventType;
use variant_pipeline::error::is_unreachable;
use variant_pipeline::config::{
    Endpoint, LogLevel, MergeSettings, PipelineConfig, DEFAULT_PORT, DEFAULT_PRUNE_EVERY,
    DEFAULT_WINDOW_SIZE,
};
use variant_pipeline::models::ArrayLayout;
use variant_pipeline::query::{ArrayName, IqueryClient};
use variant_pipeline::workflows::{
    AlleleCountsOptions, AlleleCountsWorkflow, MergeWorkflow, RedimensionOptions,
    RedimensionWorkflow, RunState,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Array store coordinator host ("local" for the local coordinator)
    #[arg(short = 'c', long, env = "SCIDB_HOST", default_value = "local", global = true)]
    host: String,

    /// Array store coordinator port
    #[arg(short, long, env = "SCIDB_PORT", default_value_t = DEFAULT_PORT, global = true)]
    port: u16,

    /// Log verbosity (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Path to the iquery client
    #[arg(long, default_value = "iquery", global = true)]
    iquery_bin: PathBuf,

    /// SQLite file for merge checkpoints and the run journal
    #[arg(long, env = "VARIANT_PIPELINE_DB", default_value = "variant-pipeline.db", global = true)]
    state_db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Resume and pruning flags shared by every merging command
#[derive(clap::Args, Debug)]
struct ResumeArgs {
    /// Row to begin merging from, overriding any stored checkpoint
    #[arg(short, long)]
    begin: Option<u64>,

    /// Prune target versions after every N windows (0 disables)
    #[arg(long, default_value_t = DEFAULT_PRUNE_EVERY)]
    prune_every: u32,
}

impl ResumeArgs {
    fn settings(&self, window_size: u64) -> MergeSettings {
        MergeSettings {
            window_size,
            begin: self.begin,
            prune_every: self.prune_every,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute population × allele counts for a base array
    AlleleCounts {
        /// Base array name
        array: String,

        /// Rows per merge window
        #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window_size: u64,

        /// Remove temporaries left by a killed run before staging
        #[arg(long)]
        drop_stale_temps: bool,

        #[command(flatten)]
        resume: ResumeArgs,
    },

    /// Build the var and gt arrays from their load buffers
    Redimension {
        /// Base array name
        array: String,

        /// Skip redimension of the gt array
        #[arg(long)]
        nogt: bool,

        /// Skip redimension of the var array
        #[arg(long)]
        novar: bool,

        /// Threshold for redimensioning the gt array by parts
        #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        redim_max: u64,

        #[command(flatten)]
        resume: ResumeArgs,
    },

    /// Merge <array>_load into <array> window by window
    Merge {
        /// Base array name
        array: String,

        /// Rows to redimension at a time
        #[arg(short, long, default_value_t = DEFAULT_WINDOW_SIZE)]
        size: u64,

        #[command(flatten)]
        resume: ResumeArgs,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::AlleleCounts { .. } => "allele-counts",
            Command::Redimension { .. } => "redimension",
            Command::Merge { .. } => "merge",
        }
    }

    fn array(&self) -> &str {
        match self {
            Command::AlleleCounts { array, .. }
            | Command::Redimension { array, .. }
            | Command::Merge { array, .. } => array,
        }
    }
}

async fn run_command(
    command: &Command,
    client: &IqueryClient,
    layout: ArrayLayout,
    state: &mut RunState,
) -> Result<serde_json::Value> {
    let report = match command {
        Command::AlleleCounts {
            window_size,
            drop_stale_temps,
            resume,
            ..
        } => {
            let options = AlleleCountsOptions {
                merge: resume.settings(*window_size),
                drop_stale_temps: *drop_stale_temps,
            };
            options.merge.validate()?;
            let report = AlleleCountsWorkflow::new(client, layout, options).run(state).await?;
            serde_json::to_value(report)?
        }
        Command::Redimension {
            nogt,
            novar,
            redim_max,
            resume,
            ..
        } => {
            let options = RedimensionOptions {
                skip_gt: *nogt,
                skip_var: *novar,
                merge: resume.settings(*redim_max),
            };
            options.merge.validate()?;
            let report = RedimensionWorkflow::new(client, layout, options).run(state).await?;
            serde_json::to_value(report)?
        }
        Command::Merge { size, resume, .. } => {
            let settings = resume.settings(*size);
            settings.validate()?;
            let report = MergeWorkflow::new(client, layout, settings).run(state).await?;
            serde_json::to_value(report)?
        }
    };
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PipelineConfig {
        endpoint: Endpoint::parse(&cli.host, cli.port),
        iquery_bin: cli.iquery_bin.clone(),
        state_db: cli.state_db.clone(),
        log_level: cli.log_level,
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("variant_pipeline={}", config.log_level.directive()).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Variant pipeline starting: {} {} on {}",
        cli.command.name(),
        cli.command.array(),
        config.endpoint
    );

    let layout = ArrayLayout::new(
        ArrayName::new(cli.command.array()).context("Invalid base array name")?,
    );
    let client = IqueryClient::new(config.iquery_bin.clone(), config.endpoint.clone());
    let mut state = RunState::open(&config.state_db)?;

    // Audit: Run started
    state.journal.record(
        AuditEventType::RunStarted,
        Some(cli.command.array()),
        serde_json::json!({
            "command": cli.command.name(),
            "endpoint": config.endpoint.to_string(),
            "run_id": state.journal.run_id(),
        }),
    );

    match run_command(&cli.command, &client, layout, &mut state).await {
        Ok(report) => {
            info!("{} completed: {}", cli.command.name(), report);

            // Audit: Run completed
            state.journal.record(
                AuditEventType::RunCompleted,
                Some(cli.command.array()),
                report,
            );
            Ok(())
        }
        Err(e) => {
            error!("{} failed: {:#}", cli.command.name(), e);
            let unreachable = is_unreachable(&e);
            if unreachable {
                error!("Array store at {} is unreachable", config.endpoint);
            }

            // Audit: Run failed
            state.journal.record(
                AuditEventType::RunFailed,
                Some(cli.command.array()),
                serde_json::json!({
                    "error": format!("{:#}", e),
                    "connection": unreachable,
                    "success": false,
                }),
            );
            Err(e)
        }
    }
}

// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Scheduler binary entry point.

use anyhow::Context;
use clap::Parser;
use koord_common::config::SchedulerConfig;
use koord_scheduler::scheduler::{Collaborators, Scheduler};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "koord-scheduler", about = "Co-location aware scheduler core")]
struct Args {
    /// Scheduler profile and plugin args (YAML or JSON)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Log directory
    #[arg(long)]
    log_dir: Option<String>,

    /// Log verbosity (0 = info, 1 = debug, 2+ = trace)
    #[arg(short, default_value_t = 0)]
    v: i32,
}

/// Verbosity raises only the koord crates; dependencies stay at info
/// unless KOORD_LOG_LEVEL or RUST_LOG overrides the whole filter.
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let default_directives = match args.v {
        0 => "info",
        1 => "info,koord_scheduler=debug,koord_common=debug,koord_util=debug",
        _ => "info,koord_scheduler=trace,koord_common=trace,koord_util=trace",
    };
    let filter = EnvFilter::try_from_env("KOORD_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if let Some(dir) = &args.log_dir {
        let path = std::path::Path::new(dir).join("koord-scheduler.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };

    let scheduler = Scheduler::new(config, Collaborators::default());
    let workers = scheduler.start();
    tracing::info!("koord-scheduler started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    scheduler.shutdown();
    for worker in workers {
        worker.abort();
    }
    Ok(())
}

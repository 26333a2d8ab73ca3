//! wakeline CLI
//!
//! Small tool for exercising the notification pipeline from the shell:
//! `watch` opens a live-updated handle and logs every version it
//! advances to, `commit` produces new versions. Run the two in separate
//! terminals (or separate machines' processes on a shared filesystem)
//! to watch cross-process wake-ups land.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use wakeline::{Handle, LiveUpdatePolicy, OpenOptions, WorkerContext};

/// wakeline commit-notification tool
#[derive(Parser, Debug)]
#[command(name = "wakeline")]
#[command(about = "Cross-process commit notification for versioned files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a handle and log every version advance
    Watch {
        /// Path to the version file
        path: PathBuf,

        /// Exit after observing this version (0 = run forever)
        #[arg(long, default_value = "0")]
        until: u64,
    },

    /// Commit one or more writes
    Commit {
        /// Path to the version file
        path: PathBuf,

        /// Number of commits to perform
        #[arg(short, long, default_value = "1")]
        count: u64,

        /// Milliseconds to sleep between commits
        #[arg(long, default_value = "0")]
        interval_ms: u64,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wakeline=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Watch { path, until } => watch(path, until),
        Commands::Commit {
            path,
            count,
            interval_ms,
        } => commit(path, count, interval_ms),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

/// Open a live-updated handle and pump its task queue
fn watch(path: PathBuf, until: u64) -> wakeline::Result<()> {
    let ctx = WorkerContext::install_for_current_thread();

    let options = OpenOptions::builder()
        .live_updates(LiveUpdatePolicy::Required)
        .build();
    let handle = Handle::open_with(&path, options)?;

    handle.set_on_refresh(Box::new(|version| {
        tracing::info!("advanced to {}", version);
    }));

    tracing::info!(
        "watching {} from {} (wakeline v{})",
        handle.path().display(),
        handle.version(),
        wakeline::VERSION
    );

    loop {
        ctx.run_one(Duration::from_millis(200));
        if until != 0 && handle.version().0 >= until {
            tracing::info!("reached {}, exiting", handle.version());
            return Ok(());
        }
    }
}

/// Commit `count` writes with an optional pause between them
fn commit(path: PathBuf, count: u64, interval_ms: u64) -> wakeline::Result<()> {
    let handle = Handle::open_with(
        &path,
        OpenOptions::builder()
            .live_updates(LiveUpdatePolicy::Disabled)
            .build(),
    )?;

    for _ in 0..count {
        let version = handle.commit()?;
        tracing::info!("committed {}", version);
        if interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(interval_ms));
        }
    }

    Ok(())
}

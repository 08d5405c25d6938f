//! Command-line interface for the `blot` runner.
//!
//! The runner wires the sync core to local folders and a JSON state file:
//!
//! - `sync`: publish overdue scheduled entries, run one reconciliation pass per
//!   configured blog, then exit.
//! - `watch`: recover scheduled entries, then re-sync on an interval until
//!   Ctrl-C. Scheduled entries publish while the process is running.
//! - `entries`: print a page of a blog's entries as JSON.
//!
//! All sync semantics live in `blot-sync`; this module only builds the object
//! graph and reports results. Call [`run`] with a constructed [`Cli`] from tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use blot_sync::build::Pipeline;
use blot_sync::clock::SystemClock;
use blot_sync::entry::{Entries, Entry, ListFilter};
use blot_sync::list::paginate;
use blot_sync::scheduler::SchedulerRegistry;
use blot_sync::sync::{Reconciler, SyncReport};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::json_store::JsonFileStore;
use crate::load_config::{load_config, CliConfig};
use crate::local::LocalFolder;

/// Keeps Blot entries in step with blog folders on disk.
#[derive(Parser)]
#[clap(name = "blot", version, about = "Synchronise blog folders into Blot entries")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one synchronisation pass for every configured blog
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Synchronise repeatedly until interrupted
    Watch {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Seconds between passes
        #[clap(long, default_value_t = 60)]
        interval: u64,
    },
    /// Print one page of a blog's entries as JSON
    Entries {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Blog id as written in the config
        #[clap(long)]
        blog: String,
        #[clap(long, value_enum, default_value_t = Filter::Published)]
        filter: Filter,
        #[clap(long, default_value_t = 1)]
        page: usize,
        #[clap(long, default_value_t = 20)]
        per_page: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Filter {
    Published,
    Scheduled,
    Drafts,
    Pages,
    Deleted,
    All,
}

impl From<Filter> for ListFilter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Published => ListFilter::Published,
            Filter::Scheduled => ListFilter::Scheduled,
            Filter::Drafts => ListFilter::Drafts,
            Filter::Pages => ListFilter::Pages,
            Filter::Deleted => ListFilter::Deleted,
            Filter::All => ListFilter::All,
        }
    }
}

/// What `entries` prints for each entry.
#[derive(Debug, Serialize)]
struct EntrySummary<'a> {
    path: &'a str,
    title: &'a str,
    url: &'a str,
    date: DateTime<Utc>,
    tags: Vec<&'a str>,
    draft: bool,
    scheduled: bool,
}

impl<'a> From<&'a Entry> for EntrySummary<'a> {
    fn from(entry: &'a Entry) -> Self {
        Self {
            path: &entry.path,
            title: &entry.title,
            url: &entry.url,
            date: entry.date_stamp,
            tags: entry.tags.iter().map(String::as_str).collect(),
            draft: entry.draft,
            scheduled: entry.scheduled,
        }
    }
}

/// The object graph shared by every command.
struct Runtime {
    config: CliConfig,
    reconciler: Reconciler,
}

impl Runtime {
    async fn build(config: CliConfig) -> Result<Self> {
        let store = JsonFileStore::open(&config.state_file)
            .await
            .with_context(|| format!("Failed to open state file {:?}", config.state_file))?;
        let clock = Arc::new(SystemClock);
        let scheduler = Arc::new(SchedulerRegistry::new(clock.clone()));
        let entries = Entries::new(Arc::new(store), clock, scheduler);

        let provider = config
            .blogs
            .iter()
            .fold(LocalFolder::new(), |provider, blog| {
                provider.with_folder(blog.id.clone(), blog.folder.clone())
            });
        let reconciler = Reconciler::new(
            entries,
            Arc::new(provider),
            Pipeline::default(),
            config.sync.clone(),
        );
        Ok(Self { config, reconciler })
    }

    fn entries(&self) -> &Entries {
        self.reconciler.entries()
    }

    /// One pass over every blog. Returns how many operations failed.
    async fn sync_all(&self) -> Result<usize> {
        let mut failed = 0;
        for section in &self.config.blogs {
            let blog = section.blog();
            match self.reconciler.sync(&blog).await {
                Ok(report) => {
                    print_report(&report);
                    failed += report.failed.len();
                }
                Err(e) => {
                    tracing::error!(blog_id = %blog.id, error = %e, "Synchronisation failed");
                    println!("{}: pass failed: {e}", blog.id);
                    failed += 1;
                }
            }
        }
        Ok(failed)
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "{}: {} applied, {} failed",
        report.blog_id,
        report.applied.len(),
        report.failed.len()
    );
    for op in &report.applied {
        match &op.old_path {
            Some(old) => println!("  {:?} {} -> {}", op.kind, old, op.path),
            None => println!("  {:?} {}", op.kind, op.path),
        }
    }
    for failure in &report.failed {
        println!("  failed {}: {}", failure.operation.path, failure.error);
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let runtime = Runtime::build(load_config(config)?).await?;
            let recovered = runtime.entries().recover_schedule().await?;
            tracing::info!(command = "sync", recovered, "Starting synchronisation");
            let failed = runtime.sync_all().await?;
            if failed > 0 {
                return Err(anyhow!("{failed} operation(s) failed"));
            }
            tracing::info!(command = "sync", "Synchronisation complete");
            Ok(())
        }
        Commands::Watch { config, interval } => {
            let runtime = Runtime::build(load_config(config)?).await?;
            let recovered = runtime.entries().recover_schedule().await?;
            tracing::info!(command = "watch", interval, recovered, "Watching folders");
            let interval = Duration::from_secs(interval.max(1));
            loop {
                runtime.sync_all().await?;
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!(command = "watch", "Interrupted, stopping");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
        Commands::Entries {
            config,
            blog,
            filter,
            page,
            per_page,
        } => {
            let config = load_config(config)?;
            if config.blog(&blog).is_none() {
                return Err(anyhow!("Blog {blog} is not in the config"));
            }
            let runtime = Runtime::build(config).await?;
            let entries = runtime.entries().list(&blog, filter.into()).await?;
            let summaries: Vec<EntrySummary<'_>> = entries.iter().map(EntrySummary::from).collect();
            let page = paginate(&summaries, page, per_page);
            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::backend;
use crate::download::HttpClient;
use crate::extract::TarExtractor;
use crate::links::PageCache;
use crate::load_config::load_config;
use crate::synchronise::{SyncOptions, SyncReport, Synchroniser};

/// CLI for web-mirror: stage remote files and publish them into repositories.
#[derive(Parser)]
#[clap(
    name = "web-mirror",
    version,
    about = "Mirror files linked from web pages into an incoming store and publish them"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one pass over every section of the given config file
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Print what would change without touching the stores
        #[clap(long)]
        dry_run: bool,
        /// Download every link even when its stamp is unchanged
        #[clap(long)]
        force_download: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            config,
            dry_run,
            force_download,
        } => {
            let config = load_config(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            let same_store = config.same_store();

            let client = HttpClient::new()?;
            let incoming = backend::open(config.incoming.backend, config.incoming.path.clone());
            let public = if same_store {
                None
            } else {
                Some(backend::open(config.public.backend, config.public.path.clone()))
            };
            let public_ref = public.as_deref().unwrap_or(incoming.as_ref());
            let extractor = TarExtractor;

            let synchroniser = Synchroniser::new(
                &config,
                incoming.as_ref(),
                public_ref,
                &client,
                &client,
                &extractor,
            )
            .with_options(SyncOptions {
                dry_run,
                force_download,
            });

            println!("Synchronise starting...");
            let mut cache = PageCache::new();
            match synchroniser.run(&mut cache).await {
                Ok(report) => {
                    print_report(&report, dry_run);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Synchronisation failed: {}", e);
                    Err(e.into())
                }
            }
        }
    }
}

fn print_report(report: &SyncReport, dry_run: bool) {
    println!("Synchronise complete: {}", report.stats);
    for failure in &report.failures {
        println!("  failed {}: {}", failure.url, failure.error);
    }
    if dry_run {
        println!("Planned actions ({}):", report.planned.len());
        for action in &report.planned {
            println!("  {:?}", action);
        }
    }
}

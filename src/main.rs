use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use version_resolve::config::{self, ResolutionSource, ResolverConfig};
use version_resolve::logging;
use version_resolve::version::cache::CacheManager;
use version_resolve::version::registries::{CdnRegistry, NpmRegistry};
use version_resolve::version::registry::Registry;
use version_resolve::version::sink::{ChannelSink, ResolveEvent};
use version_resolve::version::types::{PackageVersionData, UpgradeTargets};

#[derive(Parser)]
#[command(name = "version-resolve")]
#[command(version, about = "Resolve latest versions of npm packages")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write JSON logs to a file instead of stderr (defaults to the cache directory)
    #[arg(long, global = true, num_args = 0..=1, value_name = "PATH")]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve packages given as `name` or `name@current`
    Resolve {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or clear the version cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache entry count and location
    Stats,
    /// Delete every cached entry
    Clear,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageReport<'a> {
    #[serde(flatten)]
    data: &'a PackageVersionData,
    current: Option<&'a str>,
    outdated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    upgrade_targets: Option<UpgradeTargets>,
}

/// Split `name@current` into its parts. A leading `@` belongs to the scope.
fn parse_package_arg(arg: &str) -> (String, Option<String>) {
    let split_at = arg
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '@')
        .map(|(i, _)| i);

    match split_at {
        Some(i) if i + 1 < arg.len() => (arg[..i].to_string(), Some(arg[i + 1..].to_string())),
        Some(i) => (arg[..i].to_string(), None),
        None => (arg.to_string(), None),
    }
}

async fn report_progress(mut events: UnboundedReceiver<ResolveEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ResolveEvent::Progress {
                package_name,
                completed,
                total,
            } => eprintln!("[{completed}/{total}] {package_name}"),
            ResolveEvent::BatchReady(batch) => debug!("{} results ready", batch.len()),
        }
    }
}

async fn resolve(config: &ResolverConfig, packages: &[String], json: bool) -> anyhow::Result<()> {
    let mut names = Vec::with_capacity(packages.len());
    let mut current_versions = HashMap::new();
    for arg in packages {
        let (name, current) = parse_package_arg(arg);
        if let Some(current) = current {
            current_versions.insert(name.clone(), current);
        }
        names.push(name);
    }

    let cache = Arc::new(CacheManager::from_config(&config.cache));
    let npm = Arc::new(
        NpmRegistry::from_config(&config.registry, Arc::clone(&cache))
            .context("Failed to create npm registry client")?,
    );

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_progress(rx));
    let sink = ChannelSink::new(tx);

    let results = match config.source {
        ResolutionSource::Cdn => {
            let fallback: Arc<dyn Registry> = npm.clone();
            let cdn = CdnRegistry::new(&config.cdn, Arc::clone(&cache), fallback)
                .context("Failed to create CDN client")?;
            let results = cdn.resolve_all(&names, Some(&current_versions), &sink).await;
            cdn.close();
            results
        }
        ResolutionSource::Registry => npm.resolve_all_with_sink(&names, &sink).await,
    };

    drop(sink);
    reporter.await?;
    cache.flush();

    print_results(&results, &current_versions, json)
}

fn print_results(
    results: &IndexMap<String, PackageVersionData>,
    current_versions: &HashMap<String, String>,
    json: bool,
) -> anyhow::Result<()> {
    let reports: IndexMap<&str, PackageReport> = results
        .iter()
        .map(|(name, data)| {
            let current = current_versions.get(name).map(String::as_str);
            let report = PackageReport {
                data,
                current,
                outdated: current.is_some_and(|c| data.is_outdated(c)),
                upgrade_targets: current.map(|c| data.upgrade_targets(c)),
            };
            (name.as_str(), report)
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for (name, report) in &reports {
        match report.current {
            Some(current) if report.outdated => {
                println!("{name}  {current} -> {}", report.data.latest_version)
            }
            Some(current) => println!("{name}  {current} (up to date)"),
            None => println!("{name}  {}", report.data.latest_version),
        }
    }
    Ok(())
}

fn cache_command(config: &ResolverConfig, action: CacheAction) {
    let cache = CacheManager::from_config(&config.cache);
    match action {
        CacheAction::Stats => {
            let stats = cache.stats();
            println!("Entries:  {}", stats.disk.entries);
            println!("Location: {}", stats.disk.storage_location.display());
        }
        CacheAction::Clear => {
            cache.persistent().clear_cache();
            println!("Cache cleared");
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_file = cli
        .log_file
        .clone()
        .map(|path| path.unwrap_or_else(config::log_path));
    let _guard = logging::init(cli.verbose, log_file.as_deref());

    let config = match &cli.config {
        Some(path) => ResolverConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ResolverConfig::default(),
    };
    info!("Using {:?} as primary source", config.source);

    match cli.command {
        Command::Resolve { packages, json } => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(resolve(&config, &packages, json)),
        Command::Cache { action } => {
            cache_command(&config, action);
            Ok(())
        }
    }
}

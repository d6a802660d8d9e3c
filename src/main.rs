mod asset_store;
mod backends;
mod cascade;
mod config;
mod config_persistence;
mod dedup_index;
mod detail_resolver;
mod dispatch;
mod extractors;
mod http_client;
mod index_push;
mod ingest;
mod integration_keyring;
mod manifest;
mod poster_resolver;
mod protocol;
mod protocol_utils;
mod publish_queue;
mod validator;

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use asset_store::AssetStore;
use backends::webhook::WebhookAdapter;
use backends::EnvCredentialSource;
use config::Config;
use config_persistence::{default_config_path, load_config_file, load_json_or_default, write_default_config};
use detail_resolver::{DetailResolver, DetailSubject};
use dispatch::{pending_tasks, Dispatcher, ManifestBodies};
use http_client::{HttpClient, UreqFetcher};
use ingest::{read_feed_batch, repair_missing_posters, IngestPipeline};
use manifest::ManifestWriter;
use poster_resolver::{PosterResolver, PosterSubject};
use protocol::{DispatchState, ItemManifest, QueueItem};
use publish_queue::{enqueue, load_queue};

#[derive(Parser, Debug)]
#[command(name = "marquee", version)]
#[command(about = "Ingest feed items, resolve posters and details, and dispatch to publishing platforms")]
struct Cli {
    /// Config file; defaults to the user config directory.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest feed record files, one file per source.
    Ingest {
        #[arg(long, value_name = "FILE", required = true, num_args = 1..)]
        records: Vec<PathBuf>,
    },
    /// Merge externally produced queue items into the publish queue.
    Enqueue {
        #[arg(long, value_name = "FILE")]
        items: PathBuf,
    },
    /// Run the publish dispatcher once.
    Dispatch,
    /// List item/platform pairs that are not published yet.
    Status,
    /// Resolve poster and details for one item and print them as JSON.
    Resolve {
        #[arg(long)]
        title: String,
        #[arg(long)]
        link: String,
        #[arg(long, value_name = "URL")]
        seed: Option<String>,
    },
    /// Re-resolve posters whose stored file disappeared.
    RepairPosters,
    /// Write the default configuration if none exists.
    InitConfig,
    /// Store a platform bearer token (read from stdin) in the OS keyring.
    SetToken {
        #[arg(long)]
        platform: String,
    },
}

fn http_client(config: &Config) -> HttpClient {
    HttpClient::new(Arc::new(UreqFetcher::new(&config.http)), &config.http)
}

fn poster_resolver(config: &Config, client: &HttpClient) -> PosterResolver {
    PosterResolver::new(
        client.clone(),
        AssetStore::new(&config.paths.poster_dir, &config.paths.poster_url_prefix),
        &config.cascade,
    )
}

fn dispatcher(config: &Config, client: &HttpClient) -> Dispatcher {
    let credentials = Arc::new(EnvCredentialSource::new(&config.dispatch, true));
    let adapter = Arc::new(WebhookAdapter::new(
        client.clone(),
        credentials,
        config.dispatch.message_max_chars,
    ));
    Dispatcher::new(
        config.dispatch.platform_names(),
        config.dispatch.attempt_cap,
        config.dispatch.message_max_chars,
        Box::new(ManifestBodies::new(&config.paths.manifest_dir)),
    )
    .with_default_adapter(adapter)
}

fn run_ingest(config: &Config, records: &[PathBuf]) -> Result<(), String> {
    let client = http_client(config);
    let pipeline = IngestPipeline::new(
        poster_resolver(config, &client),
        DetailResolver::new(client.clone(), &config.cascade),
        Box::new(ManifestWriter::new(
            &config.paths.manifest_dir,
            &config.site.base_url,
        )),
        config.paths.queue_path(),
        client,
        index_push::resolve_endpoint(&config.index_push),
        protocol_utils::local_date(),
    );
    let batches: Vec<_> = records.iter().map(|path| read_feed_batch(path)).collect();
    let mut index = dedup_index::load_existing_index(&config.paths.manifest_dir);
    info!("{} titles already published", index.published_titles());
    let report = pipeline.run(&batches, &mut index)?;
    if report.queue.is_none() {
        info!("No new items for the publish queue");
    }
    Ok(())
}

fn run_enqueue(config: &Config, items_path: &Path) -> Result<(), String> {
    let text = fs::read_to_string(items_path)
        .map_err(|err| format!("failed to read {}: {err}", items_path.display()))?;
    let items: Vec<QueueItem> = serde_json::from_str(&text)
        .map_err(|err| format!("failed to parse {}: {err}", items_path.display()))?;
    enqueue(&config.paths.queue_path(), &items)?;
    Ok(())
}

fn run_status(config: &Config) {
    let queue = load_queue(&config.paths.queue_path());
    let state: DispatchState = load_json_or_default(&config.paths.state_path(), DispatchState::default());
    let tasks = pending_tasks(&queue, &state, &config.dispatch.platform_names());
    for task in &tasks {
        println!(
            "{:<10} {:<7} attempts={} {} <{}> {}",
            task.platform,
            task.status.as_str(),
            task.attempts,
            task.title,
            task.url,
            task.message
        );
    }
    info!("{} pending publish tasks", tasks.len());
}

fn run_resolve(config: &Config, title: &str, link: &str, seed: Option<&str>) -> Result<(), String> {
    let client = http_client(config);
    let details = DetailResolver::new(client.clone(), &config.cascade).resolve(&DetailSubject {
        title: title.to_string(),
        link: link.to_string(),
    });
    let poster = poster_resolver(config, &client).resolve(
        &PosterSubject {
            title: title.to_string(),
            link: link.to_string(),
        },
        seed,
        &[],
    );
    let manifest = ItemManifest {
        title: title.to_string(),
        link: link.to_string(),
        poster: poster.as_ref().map(|poster| poster.local_ref.clone()),
        poster_source: poster.map(|poster| poster.source_locator),
        cast: details.cast,
        summary: details.summary,
        ..ItemManifest::default()
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|err| format!("failed to serialize result: {err}"))?;
    println!("{json}");
    Ok(())
}

fn run_set_token(platform: &str) -> Result<(), String> {
    let mut token = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut token)
        .map_err(|err| format!("failed to read token from stdin: {err}"))?;
    let token = token.trim();
    if token.is_empty() {
        return Err("no token given on stdin".to_string());
    }
    integration_keyring::set_platform_token(platform.trim(), token)?;
    info!("Stored token for {platform}");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    if let Command::InitConfig = cli.command {
        if write_default_config(&config_path)? {
            info!("Wrote default config to {}", config_path.display());
        } else {
            info!("Config already exists at {}", config_path.display());
        }
        return Ok(());
    }
    let config = load_config_file(&config_path);

    match &cli.command {
        Command::Ingest { records } => run_ingest(&config, records)?,
        Command::Enqueue { items } => run_enqueue(&config, items)?,
        Command::Dispatch => {
            let client = http_client(&config);
            dispatcher(&config, &client).run(&config.paths.queue_path(), &config.paths.state_path())?;
        }
        Command::Status => run_status(&config),
        Command::Resolve { title, link, seed } => {
            run_resolve(&config, title, link, seed.as_deref())?
        }
        Command::RepairPosters => {
            let client = http_client(&config);
            repair_missing_posters(&config.paths.manifest_dir, &poster_resolver(&config, &client))?;
        }
        Command::SetToken { platform } => run_set_token(platform)?,
        Command::InitConfig => {}
    }
    Ok(())
}

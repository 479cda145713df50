use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use edgelake_core::{
    config::{CacheConfig, Config},
    store::MemoryStore,
};
use edgelake_services::{
    auth::AuthorizerRegistry,
    cache::CacheFacade,
    ingress::DispatcherFactory,
    invoke::{Echo, LocalInvoker},
    notify::{Notifier, TracingNotifier},
};
use service_async::Param;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

mod factory;
mod server;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the config file
    #[clap(short, long, value_parser)]
    config: String,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    tracing::info!("operating region {}", config.region);

    let store = match &config.store.seed_path {
        Some(path) => MemoryStore::from_seed_file(path)?,
        None => MemoryStore::new(),
    };
    let notifier: Arc<dyn Notifier> =
        Arc::new(TracingNotifier::new(config.notification_channel.clone()));
    let authorizer = AuthorizerRegistry::with_builtins().build(&config.authorizer)?;
    let cache_config: CacheConfig = config.param();
    let cache = CacheFacade::from_config(&cache_config)?;
    // Without a remote compute service every target answers with its own envelope.
    let invoker = LocalInvoker::new(notifier.clone()).fallback(Echo);
    let dispatcher = DispatcherFactory::new(&config, store, invoker, cache, authorizer, notifier);

    let workers = server::spawn_workers(&config, dispatcher)?;
    tracing::info!("{} workers started", workers.len());
    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }
    Ok(())
}

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::error;
use sudea_agent::{
    config::{config_path, Config},
    upload::{FsSource, RetryPolicy, UploadClient},
    watcher::ImageWatcher,
};

lazy_static::lazy_static! {
    static ref ARGS: Args = Args::parse();
}

/// Watches a folder and uploads every new image to the SUDEA server
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// YAML config file (defaults to $SUDEA_CONFIG, then ./uploader.yaml)
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Overrides the watched directory
    #[clap(short, long)]
    watch_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lazy_static::initialize(&ARGS);

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let mut config = Config::load(&config_path(ARGS.config.as_deref()))?;
    if let Some(watch_dir) = &ARGS.watch_dir {
        config.watch_dir = Some(watch_dir.clone());
    }

    if let Some(prometheus_bind) = config.prometheus_bind {
        prometheus_exporter::start(prometheus_bind)
            .context("failed to start prometheus exporter")?;
    }

    let watcher = ImageWatcher::new(&config)?;
    let client = UploadClient::from_config(&config);
    let policy = RetryPolicy::from_config(&config);

    watcher
        .run(&FsSource, &client, &policy, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

mod alert;
mod browser;
mod config;
mod error;
mod models;
mod poller;
mod stop;

use reqwest::Client;
use resale_watch_common::{init_tracing, shutdown_signal};
use std::{process::ExitCode, sync::Arc};

use crate::alert::Platform;
use crate::browser::SystemBrowser;
use crate::config::load_config;
use crate::error::WatchError;
use crate::poller::Poller;
use crate::stop::StopSignal;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _guards = init_tracing("resale-watch");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "watcher aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), WatchError> {
    let platform = Platform::detect()?;
    match platform {
        Platform::Windows => tracing::info!("detected Windows"),
        Platform::Linux => tracing::info!("detected Linux; tone is played through aplay or paplay"),
        Platform::MacOs => tracing::info!("detected macOS; sound is untested"),
    }

    let config = load_config()?;
    let alert = platform.alert();

    if config.sound_check {
        tracing::info!(platform = platform.label(), alert = alert.name(), "testing sound");
        alert.alert();
        tracing::info!("did you hear something?");
    }

    tracing::info!(
        event_id = %config.event_id,
        endpoint = %config.graphql_url,
        interval_secs = config.poll_interval.as_secs(),
        "starting polling"
    );

    let poller = Poller::new(
        Arc::new(config),
        Client::new(),
        alert,
        Box::new(SystemBrowser),
    );

    let stop = StopSignal::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        trigger.stop();
    });

    poller.run(stop).await
}

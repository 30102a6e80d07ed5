// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{debug, info};

use cowrite::config::Cli;
use cowrite::registry::RoomRegistry;
use cowrite::{logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();

    logging::initialize(cli.debug);

    let registry = std::sync::Arc::new(RoomRegistry::new());
    let routes = server::routes(registry, cli.static_dir.clone());

    info!(
        bind = %cli.bind,
        static_dir = %cli.static_dir.display(),
        "starting collaborative editing server"
    );

    let (_, serving) =
        warp::serve(routes).bind_with_graceful_shutdown(cli.bind, wait_for_shutdown());
    serving.await;

    Ok(())
}

async fn wait_for_shutdown() {
    let mut signal_terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("should have been able to register a SIGTERM handler");
    tokio::select! {
        _ = signal::ctrl_c() => {
            debug!("got SIGINT (Ctrl+C), shutting down");
        }
        _ = signal_terminate.recv() => {
            debug!("got SIGTERM, shutting down");
        }
    }
}

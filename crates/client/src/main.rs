//! Orderlink Client - command-line order monitor
//!
//! Connects to the order hub and logs live updates for one order, vendor or
//! customer until interrupted.
//!
//! ```text
//! ORDERLINK_TOKEN=... orderlink-client order <order-id>
//! ORDERLINK_TOKEN=... orderlink-client vendor <vendor-id>
//! ORDERLINK_TOKEN=... orderlink-client customer <customer-id>
//! ```

use anyhow::{bail, Context};
use orderlink_client::hooks::ScopedState;
use orderlink_client::{
    ClientConfig, CustomerOrderFeed, OrderTracker, RealtimeClient, StaticToken, TerminalBell,
    VendorOrderFeed,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("orderlink_client=debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(scope), Some(id)) = (args.next(), args.next()) else {
        bail!("usage: orderlink-client <order|vendor|customer> <id>");
    };
    let token = std::env::var("ORDERLINK_TOKEN").context("ORDERLINK_TOKEN is not set")?;

    let config = ClientConfig::from_env();
    tracing::info!("Using order hub at {}", config.hub_url());
    let client = RealtimeClient::new(config, StaticToken::new(token))?;
    log_connection_state(&client);

    match scope.as_str() {
        "order" => {
            let tracker = OrderTracker::mount(&client, id).await;
            follow(tracker.watch()).await;
        }
        "vendor" => {
            let feed = VendorOrderFeed::mount_with_sound(&client, id, TerminalBell).await;
            follow(feed.watch()).await;
        }
        "customer" => {
            let feed = CustomerOrderFeed::mount(&client, id).await;
            follow(feed.watch()).await;
        }
        other => bail!("unknown scope '{}': expected order, vendor or customer", other),
    }

    client.stop();
    Ok(())
}

fn log_connection_state(client: &RealtimeClient) {
    let mut states = client.state_changes();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            tracing::info!("Connection state: {:?}", state);
        }
    });
}

/// Log every state update until Ctrl+C.
async fn follow<S: ScopedState + std::fmt::Debug>(mut updates: watch::Receiver<S>) {
    tracing::info!("Watching {}", updates.borrow().entity_id());
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                tracing::info!("{:#?}", state);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }
}

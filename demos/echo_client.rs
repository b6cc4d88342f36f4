//! Connect to a notification server, subscribe to a few topics and print
//! everything that arrives.
//!
//! ```text
//! cargo run --example echo_client -- ws://127.0.0.1:8000/ws 60
//! ```
//!
//! Without a URL argument it comes from `wsrelay.toml` (or
//! `WSRELAY_CONFIG`). The client disconnects after the given number of
//! seconds (default 60).

use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};
use wsrelay::ws::protocol;
use wsrelay::{Transport, TransportConfig, TransportEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guards = wsrelay::infrastructure::init_logging("logs")?;

    let mut config = TransportConfig::load()?;
    let mut args = std::env::args().skip(1);
    if let Some(url) = args.next() {
        config.url = url;
    }
    let run_for = Duration::from_secs(args.next().and_then(|s| s.parse().ok()).unwrap_or(60));
    if config.url.is_empty() {
        config.url = "ws://127.0.0.1:8000/ws".to_string();
    }

    let transport = Transport::new(config)?;
    let mut events = transport.events();

    let _pong = transport.subscribe(protocol::PONG, |msg| {
        info!(payload = ?msg.as_json(), "pong");
    });
    let _confirmed = transport.subscribe(protocol::SUBSCRIPTION_CONFIRMED, |msg| {
        info!(payload = ?msg.as_json(), "subscription confirmed");
    });
    let _all = transport.subscribe_all(|msg| {
        println!("<- {:?}", msg);
    });

    // Queued until the socket opens
    transport.send(protocol::subscribe(&[
        protocol::NOTIFICATION,
        protocol::SYSTEM_ALERT,
    ]));
    transport.send(protocol::typed(protocol::PING, json!({ "demo": true })));

    let mut report = tokio::time::interval(Duration::from_secs(15));
    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(TransportEvent::GaveUp { attempts }) => {
                    error!(attempts, "server unreachable, giving up");
                    break;
                }
                Ok(TransportEvent::Error(e)) => warn!(error = %e, "transport error"),
                Ok(TransportEvent::Message(_)) => {}
                Ok(event) => info!(?event, "transport event"),
                Err(e) => warn!(error = %e, "event stream lagged"),
            },
            _ = report.tick() => {
                let metrics = transport.metrics();
                info!(
                    state = %transport.state(),
                    sent = metrics.messages_sent,
                    received = metrics.messages_received,
                    reconnects = metrics.reconnect_attempts,
                    "metrics"
                );
            }
            _ = &mut deadline => {
                info!("run finished");
                break;
            }
        }
    }

    transport.disconnect(None, Some("run finished"));
    transport.shutdown().await;
    Ok(())
}

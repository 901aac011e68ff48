//! Event filter subsystem development entry point.
//!
//! All-in-one binary for exercising a `FilterSupervisor` locally: reads
//! newline-delimited JSON commands from stdin (`subscribe`, `push`,
//! `reload`) and logs delivery outcomes. Stands in for the transport,
//! presence, and config-parser layers the subsystem itself treats as
//! external collaborators.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fc_common::SubscriberId;
use fc_filter::endpoint::{channel_endpoint, Event};
use fc_filter::supervisor::FilterSupervisor;
use fc_filter::worker::WorkerMessage;
use fc_filter::Subscription;
use fc_filter_config::{ConfigSource, FieldValue};
use tracing::{info, warn};

/// Event filter subsystem dev server
#[derive(Parser, Debug)]
#[command(name = "fc-filter-dev")]
#[command(about = "Development entry point for the event filter subsystem")]
struct Args {
    /// Path to the extractor config JSON document.
    #[arg(long, env = "FC_FILTER_CONFIG")]
    config_path: Option<String>,

    /// Inline extractor config JSON, used when `config_path` is absent.
    #[arg(long, env = "FC_FILTER_CONFIG_INLINE")]
    config_inline: Option<String>,

    /// Idle-TTL (seconds) before a worker with no subscriptions shuts down.
    #[arg(long, env = "FC_FILTER_WORKER_IDLE_TTL_SECS", default_value = "300")]
    worker_idle_ttl_secs: u64,

    /// Per-worker deadline (seconds) for a config reload round-trip.
    #[arg(long, env = "FC_FILTER_RELOAD_TIMEOUT_SECS", default_value = "5")]
    reload_timeout_secs: u64,

    /// Per-worker mailbox capacity.
    #[arg(long, env = "FC_FILTER_MAILBOX_BUFFER", default_value = "256")]
    mailbox_buffer: usize,
}

#[derive(serde::Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Command {
    Subscribe {
        subscriber: String,
        event_type: String,
        #[serde(default)]
        constraints: HashMap<String, serde_json::Value>,
    },
    Unsubscribe {
        subscriber: String,
        event_type: String,
    },
    Push {
        event_type: String,
        payload: serde_json::Value,
    },
    Reload,
}

fn config_source(args: &Args) -> ConfigSource {
    match (&args.config_path, &args.config_inline) {
        (Some(path), _) => ConfigSource::path(path.clone()),
        (None, Some(inline)) => ConfigSource::inline(inline.clone()),
        (None, None) => ConfigSource::Empty,
    }
}

fn to_field_value(v: &serde_json::Value) -> FieldValue {
    match v {
        serde_json::Value::String(s) => FieldValue::Str(s.clone()),
        serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Num).unwrap_or(FieldValue::Null),
        serde_json::Value::Bool(b) => FieldValue::Bool(*b),
        _ => FieldValue::Null,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fc_common::logging::init_logging("fc-filter-dev");

    let args = Args::parse();
    info!("starting fc-filter-dev");

    let supervisor = Arc::new(
        FilterSupervisor::new(
            "fc-filter-dev-node",
            config_source(&args),
            Duration::from_secs(args.worker_idle_ttl_secs),
            Duration::from_secs(args.reload_timeout_secs),
            args.mailbox_buffer,
        )
        .context("failed to initialize filter supervisor")?,
    );

    // per-subscriber bookkeeping the ingress side is responsible for:
    // the prev_subs the Supervisor's refresh_subscriptions contract needs,
    // plus the endpoints we've already created.
    let mut prev_subs: HashMap<SubscriberId, Vec<Subscription>> = HashMap::new();
    let mut endpoints: HashMap<SubscriberId, Arc<dyn fc_filter::SubscriberEndpoint>> = HashMap::new();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let command: Command = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "ignoring malformed command");
                continue;
            }
        };

        match command {
            Command::Subscribe {
                subscriber,
                event_type,
                constraints,
            } => {
                let id = SubscriberId::new(subscriber);
                let endpoint = endpoints.entry(id.clone()).or_insert_with(|| {
                    let (endpoint, mut rx, _ctl) = channel_endpoint(id.clone(), args.mailbox_buffer);
                    let watcher_id = id.clone();
                    tokio::spawn(async move {
                        while let Some(event) = rx.recv().await {
                            info!(subscriber = %watcher_id, event_type = %event.event_type, payload = %event.payload, "delivered");
                        }
                    });
                    endpoint as Arc<dyn fc_filter::SubscriberEndpoint>
                });

                let constraints: Vec<(String, FieldValue)> = constraints
                    .iter()
                    .map(|(k, v)| (k.clone(), to_field_value(v)))
                    .collect();
                let sub = Subscription::new(id.clone(), event_type, constraints);

                let prev = prev_subs.remove(&id).unwrap_or_default();
                let mut next = prev.clone();
                next.retain(|s| s.event_type != sub.event_type);
                next.push(sub);

                let handles = supervisor
                    .refresh_subscriptions(id.clone(), endpoint.clone(), next.clone(), prev)
                    .await;
                for h in handles {
                    let _ = h.done.await;
                }
                prev_subs.insert(id, next);
            }
            Command::Unsubscribe { subscriber, event_type } => {
                let id = SubscriberId::new(subscriber);
                let Some(endpoint) = endpoints.get(&id).cloned() else {
                    continue;
                };
                let prev = prev_subs.remove(&id).unwrap_or_default();
                let mut next = prev.clone();
                next.retain(|s| s.event_type != event_type);

                let handles = supervisor
                    .refresh_subscriptions(id.clone(), endpoint, next.clone(), prev)
                    .await;
                for h in handles {
                    let _ = h.done.await;
                }
                prev_subs.insert(id, next);
            }
            Command::Push { event_type, payload } => {
                // ingress contract (§6): no implicit worker creation here.
                match supervisor.registry().get_mailbox(&event_type) {
                    Some(mailbox) => {
                        let _ = mailbox
                            .send(WorkerMessage::Deliver(Arc::new(Event::new(event_type, payload))))
                            .await;
                    }
                    None => warn!(event_type = %event_type, "no worker registered for event type, dropping"),
                }
            }
            Command::Reload => match supervisor.reload_config().await {
                Ok(()) => info!("config reloaded"),
                Err(e) => warn!(error = %e, "config reload failed, prior config still in effect"),
            },
        }
    }

    Ok(())
}

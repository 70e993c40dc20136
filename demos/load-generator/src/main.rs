//! Synthetic HTTP workload driving the request instrumentation.
//!
//! Every tick a few fake requests are "served" concurrently: each picks a
//! route, waits a random latency and finishes with a mostly-successful
//! status. A background queue whose depth drifts randomly is reported
//! through an observable gauge, and every request is also logged through
//! the tracing bridge.
//!
//! The pipeline is configured from the environment, for instance:
//!
//! ```text
//! BEACON_EXPORTER=console BEACON_EXPORT_INTERVAL=2000 cargo run -p load-generator
//! BEACON_EXPORTER=http BEACON_EXPORTER_ENDPOINT=http://localhost:4318 cargo run -p load-generator
//! BEACON_CONSOLE_DEBUG=true BEACON_EXPORTER_ENDPOINT=http://localhost:4318 cargo run -p load-generator
//! ```
//!
//! `DEMO_DURATION_SECS` bounds the run (default 30); Ctrl-C stops it early.
use beacon_sdk::config::PipelineConfig;
use beacon_sdk::logs::{LoggerProvider, TracingBridge};
use beacon_sdk::metrics::{Observation, Registry};
use beacon_sdk::middleware::RequestInstrumentation;
use beacon_sdk::KeyValue;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

const ROUTES: [&str; 3] = ["/home", "/api", "/health"];
const METHODS: [&str; 2] = ["GET", "POST"];
const STATUSES: [u16; 4] = [200, 200, 200, 500];

fn init_tracing(provider: &LoggerProvider) {
    // The HTTP client's own events would otherwise be exported by the
    // exporter they describe.
    let filter_bridge = EnvFilter::new("info")
        .add_directive("hyper=off".parse().unwrap())
        .add_directive("reqwest=off".parse().unwrap())
        .add_directive("beacon_sdk=off".parse().unwrap());
    let bridge_layer = TracingBridge::new(provider).with_filter(filter_bridge);

    let filter_fmt = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info").add_directive("beacon_sdk=debug".parse().unwrap()));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(filter_fmt);

    tracing_subscriber::registry()
        .with(bridge_layer)
        .with(fmt_layer)
        .init();
}

async fn serve_fake_request(instrumentation: RequestInstrumentation) {
    let mut request = instrumentation.on_request_start();
    let (route, method, status, latency) = {
        let mut rng = rand::rng();
        (
            *ROUTES.choose(&mut rng).unwrap_or(&"/home"),
            *METHODS.choose(&mut rng).unwrap_or(&"GET"),
            *STATUSES.choose(&mut rng).unwrap_or(&200),
            Duration::from_millis(rng.random_range(5..=400)),
        )
    };
    request.set_route(route);
    request.set_method(method);

    tokio::time::sleep(latency).await;

    if status >= 500 {
        warn!(route, method, status, latency_ms = latency.as_millis() as u64, "request failed");
    } else {
        info!(route, method, status, latency_ms = latency.as_millis() as u64, "request served");
    }
    instrumentation.on_request_end(request, status);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let config = PipelineConfig::from_env()?;
    let registry = Registry::from_config(&config)?;
    let logger_provider = LoggerProvider::from_config(&config)?;
    init_tracing(&logger_provider);

    let instrumentation = RequestInstrumentation::new(&registry)?;

    let queue_depth = Arc::new(AtomicI64::new(0));
    let observed_depth = queue_depth.clone();
    registry
        .observable_gauge("demo_queue_depth")
        .with_description("Jobs waiting in the background queue.")
        .build()?
        .register_callback(move || {
            vec![Observation::new(
                observed_depth.load(Ordering::Relaxed) as f64,
                &[KeyValue::new("queue", "main")],
            )]
        })?;

    let duration = std::env::var("DEMO_DURATION_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));
    info!(
        service = %registry.resource().service_name().unwrap_or_default(),
        exporter = %config.exporter_kind,
        duration_secs = duration.as_secs(),
        "starting synthetic load"
    );

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let (burst, drift) = {
                    let mut rng = rand::rng();
                    (rng.random_range(1..=4), rng.random_range(-2..=3))
                };
                let depth = (queue_depth.load(Ordering::Relaxed) + drift).max(0);
                queue_depth.store(depth, Ordering::Relaxed);
                for _ in 0..burst {
                    tokio::spawn(serve_fake_request(instrumentation.clone()));
                }
            }
        }
    }

    // Let in-flight requests finish before the final flush.
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!(in_flight = instrumentation.in_flight(), "stopping");

    for (name, value) in registry.self_metrics().iter() {
        info!(metric = name, value, "pipeline self-metric");
    }
    // Shutdown blocks while the final batch is exported.
    tokio::task::spawn_blocking(move || {
        let metrics_result = registry.shutdown();
        let logs_result = logger_provider.shutdown();
        metrics_result.and(logs_result)
    })
    .await??;
    Ok(())
}

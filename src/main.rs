mod cache;
mod config;
mod errors;
mod evaluation;
mod events;
mod logging;
mod routes;
mod state;
mod upstream;

#[cfg(test)]
mod testing;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use cache::{DecisionCache, RedisCacheStore};
use config::Config;
use evaluation::{EvaluationOrchestrator, EvaluationSettings};
use events::{EventPublisher, PublisherConfig, PublisherWorkers, SqsEventQueue};
use upstream::{HttpFlagDefinitionClient, HttpTargetingClient};

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    logging::init_logging();

    if config.error_cache_ttl > config.cache_ttl {
        warn!(
            error_cache_ttl_secs = config.error_cache_ttl.as_secs(),
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "fallback decisions outlive healthy ones, check ERROR_CACHE_TTL_SECS"
        );
    }

    let store = connect_cache(&config).await?;
    let cache = DecisionCache::new(Arc::new(store));
    let cache_provider = cache.provider_name();

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let flags = HttpFlagDefinitionClient::new(
        http.clone(),
        config.flag_service_url.clone(),
        config.upstream_timeout,
    );
    let targeting = HttpTargetingClient::new(
        http,
        config.targeting_service_url.clone(),
        config.upstream_timeout,
    );

    let (publisher, workers) = start_publisher(&config).await;
    let audit_enabled = publisher.is_enabled();

    let orchestrator = EvaluationOrchestrator::new(
        Arc::new(flags),
        Arc::new(targeting),
        cache,
        publisher,
        EvaluationSettings {
            cache_ttl: config.cache_ttl,
            error_cache_ttl: config.error_cache_ttl,
            evaluation_timeout: config.evaluation_timeout,
        },
    );

    info!(
        cache = cache_provider,
        audit_events = audit_enabled,
        cache_ttl_secs = orchestrator.settings().cache_ttl.as_secs(),
        error_cache_ttl_secs = orchestrator.settings().error_cache_ttl.as_secs(),
        "evaluation pipeline ready"
    );

    let state = state::AppState { orchestrator };
    let app = routes::routes().with_state(state);

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .with_context(|| format!("failed to bind {}", config.addr()))?;

    info!(addr = %config.addr(), "evaluation service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Only computations still in flight hold the publisher at this point
    if let Some(workers) = workers {
        info!("draining audit events");
        workers.drain(SHUTDOWN_DRAIN).await;
    }

    info!("evaluation service stopped");
    Ok(())
}

// Redis must answer at startup; afterwards outages only turn reads into misses
async fn connect_cache(config: &Config) -> anyhow::Result<RedisCacheStore> {
    let url = cache::redis::redact_url(&config.redis_url);
    let store = RedisCacheStore::connect(&config.redis_url, config.cache_timeout)
        .await
        .with_context(|| format!("failed to connect to redis at {}", url))?;

    info!(url = %url, "connected to redis");
    Ok(store)
}

async fn start_publisher(config: &Config) -> (EventPublisher, Option<PublisherWorkers>) {
    let Some(queue) = &config.queue else {
        info!("AWS_SQS_URL not set, audit events are disabled");
        return (EventPublisher::disabled(), None);
    };

    let sqs = SqsEventQueue::from_config(queue).await;
    let (publisher, workers) = EventPublisher::start(
        Arc::new(sqs),
        PublisherConfig {
            buffer_size: config.event_buffer_size,
            workers: config.event_workers,
            publish_timeout: config.publish_timeout,
        },
    );

    (publisher, Some(workers))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

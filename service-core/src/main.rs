//! HTTP API with token login, plus an optional Kafka consumer logging batches.
use std::sync::Arc;

use common_kafka::{KafkaConsumer, PrometheusConsumerMetrics, Subscription};
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use health::HealthRegistry;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use service_core::auth::user::MemoryUserStore;
use service_core::auth::{SharedSecretVerifier, TokenIssuer};
use service_core::batch_logger::BatchLogger;
use service_core::config::Config;
use service_core::metrics::{metrics_router, serve, setup_metrics_recorder};
use service_core::router::{app, AppState};
use service_core::telemetry;

async fn shutdown_signal(cancel: CancellationToken) {
    let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("failed to register SIGTERM handler: {}", e);
            return;
        }
    };
    let mut interrupt = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(interrupt) => interrupt,
        Err(e) => {
            error!("failed to register SIGINT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
        _ = cancel.cancelled() => {},
    };

    info!("shutdown requested");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().wrap_err("invalid configuration")?;

    telemetry::init(&config).wrap_err("failed to set up tracing")?;

    let recorder_handle = setup_metrics_recorder().wrap_err("failed to install metrics recorder")?;
    let liveness = HealthRegistry::new("liveness");
    let cancel = CancellationToken::new();

    let state = AppState {
        tokens: Arc::new(TokenIssuer::new(
            config.jwt_secret.as_str(),
            &config.jwt_issuer,
            config.jwt_validity_days,
        )),
        identity: Arc::new(SharedSecretVerifier::new(
            config.identity_provider_secret.as_str(),
        )),
        users: Arc::new(MemoryUserStore::new()),
        liveness: liveness.clone(),
    };
    let router = app(state).merge(metrics_router(recorder_handle));

    let mut tasks = JoinSet::new();

    let topics = config.consumer_topics();
    if !topics.is_empty() {
        let consumer = KafkaConsumer::new(config.kafka.clone(), Arc::new(PrometheusConsumerMetrics))
            .with_health(liveness.clone());
        let subscription: Subscription<serde_json::Value> =
            Subscription::from_defaults(topics.clone(), &config.consumer);
        let handler = BatchLogger::new(&topics);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = consumer.consume_batch(subscription, handler, cancel.clone()).await;
            // without its consumer the service has no reason to keep serving
            cancel.cancel();
            match result {
                Ok(summary) => {
                    info!(?summary, "consumer stopped");
                    Ok(())
                }
                Err(e) => Err(eyre::Report::new(e).wrap_err("failed to start consumer")),
            }
        });
    } else {
        info!("CONSUMER_TOPICS not set, running without a consumer");
    }

    {
        let cancel = cancel.clone();
        let address = config.address;
        tasks.spawn(async move {
            info!(%address, "serving http");
            let result = serve(router, address, cancel.clone().cancelled_owned()).await;
            cancel.cancel();
            result.wrap_err("http server failed")
        });
    }

    tokio::spawn(shutdown_signal(cancel.clone()));

    cancel.cancelled().await;

    let drain = async {
        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("{:#}", e);
                    outcome = Err(e);
                }
                Err(e) => {
                    error!("task panicked: {}", e);
                    outcome = Err(eyre::Report::new(e));
                }
            }
        }
        outcome
    };
    let outcome = match tokio::time::timeout(config.shutdown_timeout.0, drain).await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("tasks did not stop within the shutdown timeout, aborting them");
            tasks.abort_all();
            Err(eyre::eyre!("shutdown timed out"))
        }
    };

    telemetry::shutdown();
    info!("shutdown complete");
    outcome
}

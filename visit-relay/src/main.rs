//! Relay live device updates to websocket subscribers.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;
use tracing_subscriber::EnvFilter;

use visit_common::kafka_consumer::SingleTopicConsumer;
use visit_common::metrics::{serve, setup_metrics_routes};
use visit_common::signal::shutdown;
use visit_relay::config::Config;
use visit_relay::handlers;
use visit_relay::router::EventRouter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env()?;
    let liveness = HealthRegistry::new("liveness");

    let consumer = SingleTopicConsumer::new(
        &config.kafka,
        config.consumer(),
        liveness.register("rdkafka_consumer", time::Duration::seconds(30)),
    )?;

    let router = Arc::new(EventRouter::new(config.subscriber_buffer));
    let app = setup_metrics_routes(handlers::app(router.clone(), liveness))?;
    let bind = config.bind();

    tokio::select! {
        served = serve(app, &bind, shutdown()) => {
            if let Err(e) = served {
                tracing::error!("failed to serve relay http endpoints: {}", e);
                return Err(e.into());
            }
        }
        _ = router.run(consumer, shutdown()) => {}
    }

    Ok(())
}

//! Consume detection events, confirm visits and route the outcomes.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;
use tracing_subscriber::EnvFilter;

use visit_analyzer::analyzer::Analyzer;
use visit_analyzer::config::Config;
use visit_analyzer::engine::VisitDecisionEngine;
use visit_analyzer::gateway::{DeviceMethodClient, HubGateway, NotificationGateway, PrintGateway};
use visit_analyzer::handlers;
use visit_common::kafka_consumer::SingleTopicConsumer;
use visit_common::kafka_producer::create_kafka_producer;
use visit_common::metrics::{serve, setup_metrics_routes};
use visit_common::signal::shutdown;
use visit_common::time::SystemTime;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env()?;
    let liveness = HealthRegistry::new("liveness");

    let gateway: Arc<dyn NotificationGateway> = if config.print_sink {
        Arc::new(PrintGateway {})
    } else {
        let producer = create_kafka_producer(
            &config.kafka,
            liveness.register("rdkafka_producer", time::Duration::seconds(30)),
        )
        .await?;
        let devices = DeviceMethodClient::new(
            config.device_methods_url.clone(),
            config.method_timeouts(),
        )?;
        Arc::new(HubGateway::new(producer, config.visits_topic.clone(), devices))
    };

    let consumer = SingleTopicConsumer::new(
        &config.kafka,
        config.consumer(),
        liveness.register("rdkafka_consumer", time::Duration::seconds(30)),
    )?;

    let engine = VisitDecisionEngine::new(
        config.tracking_capacity,
        config.dwell_threshold.0,
        SystemTime {},
    );
    let analyzer = Analyzer::new(engine, gateway);

    let app = setup_metrics_routes(handlers::app(liveness))?;
    let bind = config.bind();

    tokio::select! {
        served = serve(app, &bind, shutdown()) => {
            if let Err(e) = served {
                tracing::error!("failed to serve analyzer http endpoints: {}", e);
                return Err(e.into());
            }
        }
        _ = analyzer.run(consumer, shutdown()) => {}
    }

    Ok(())
}

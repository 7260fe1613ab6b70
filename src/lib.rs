pub mod broker;
pub mod conf;
pub mod enricher;
pub mod error;
pub mod health;
pub mod ingress;
pub mod logging;
pub mod message;
pub mod server;
pub mod sink;

#[cfg(test)]
mod test_utils;

use anyhow::{Context, Result, anyhow};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

pub use crate::broker::{
    AmqpBroker, InMemoryBroker, MessageHandler, Publisher, Subscriber, Subscription,
};
pub use crate::conf::{Config, ServiceRole, TlsConfig, Topology};
pub use crate::enricher::Enricher;
pub use crate::error::RelayError;
pub use crate::health::{HealthState, HealthStatus, SharedHealthState};
pub use crate::ingress::Ingress;
pub use crate::logging::{LogFormat, init_logging};
pub use crate::message::{ENRICHED_BY, Message};
pub use crate::sink::Sink;

/// Handlers bound to their queues, plus the ingress when the role has one.
pub struct Pipeline {
    pub ingress: Option<Arc<Ingress>>,
    pub subscriptions: Vec<Subscription>,
}

/// Wire the components for `role` onto `broker`.
///
/// The consumer side binds an [`Enricher`] to the input queue. The producer
/// side binds `sink` to the output queue and builds an [`Ingress`].
///
/// # Errors
/// Returns an error if a handler cannot be subscribed to its queue.
pub async fn start_pipeline<B>(
    topology: &Topology,
    role: ServiceRole,
    broker: Arc<B>,
    sink: Sink,
) -> Result<Pipeline>
where
    B: Publisher + Subscriber + 'static,
{
    let publisher: Arc<dyn Publisher> = broker.clone();
    let mut subscriptions = Vec::new();

    if role.runs_consumer() {
        let enricher = Enricher::new(
            Arc::clone(&publisher),
            &topology.exchange,
            &topology.output_routing_key,
        );
        let subscription = broker
            .subscribe(&topology.input_queue, Arc::new(enricher))
            .await
            .with_context(|| format!("Failed to subscribe to '{}'", topology.input_queue))?;
        subscriptions.push(subscription);
    }

    let ingress = if role.runs_producer() {
        let subscription = broker
            .subscribe(&topology.output_queue, Arc::new(sink))
            .await
            .with_context(|| format!("Failed to subscribe to '{}'", topology.output_queue))?;
        subscriptions.push(subscription);

        Some(Arc::new(Ingress::new(
            publisher,
            &topology.exchange,
            &topology.input_routing_key,
        )))
    } else {
        None
    };

    Ok(Pipeline {
        ingress,
        subscriptions,
    })
}

/// Run the pipeline and the HTTP server until `shutdown` completes, a
/// subscription stops, or the server fails.
///
/// # Errors
/// Returns an error if the broker cannot be reached, the topology cannot be
/// declared, the HTTP listener fails, or a consume loop ends.
pub async fn run_until<S>(
    config: Config,
    health_state: SharedHealthState,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    info!(
        event = "application_starting",
        role = ?config.role,
        "Starting message enrichment relay"
    );

    info!(
        event = "config_loaded",
        exchange = %config.topology.exchange,
        input_queue = %config.topology.input_queue,
        input_routing_key = %config.topology.input_routing_key,
        output_queue = %config.topology.output_queue,
        output_routing_key = %config.topology.output_routing_key,
        declare_topology = config.declare_topology,
        http_port = config.http_port,
        "Configuration loaded"
    );

    if config.uses_memory_broker() {
        if config.role != ServiceRole::All {
            warn!(
                event = "memory_broker_partial_role",
                role = ?config.role,
                "In-memory broker only reaches handlers in this process"
            );
        }
        let broker = Arc::new(InMemoryBroker::with_topology(&config.topology));
        return serve_pipeline(&config, broker, health_state, shutdown).await;
    }

    let broker = match connect_broker(&config).await {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            error!(event = "broker_unavailable", error = %e, "Failed to set up broker");
            health::mark(&health_state, HealthStatus::Unhealthy).await;
            return Err(e);
        }
    };

    let result = serve_pipeline(&config, Arc::clone(&broker), health_state, shutdown).await;
    broker.close().await;
    result
}

async fn connect_broker(config: &Config) -> Result<AmqpBroker> {
    let broker = AmqpBroker::connect(&config.amqp_dsn, config.tls.as_ref())
        .await
        .context("RabbitMQ connection failed")?;

    if config.declare_topology {
        broker
            .declare_topology(&config.topology)
            .await
            .context("Failed to declare broker topology")?;
    }

    Ok(broker)
}

async fn serve_pipeline<B, S>(
    config: &Config,
    broker: Arc<B>,
    health_state: SharedHealthState,
    shutdown: S,
) -> Result<()>
where
    B: Publisher + Subscriber + 'static,
    S: Future<Output = ()>,
{
    let Pipeline {
        ingress,
        subscriptions,
    } = start_pipeline(&config.topology, config.role, broker, Sink::new()).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = server::router(ingress, health_state.clone());
    let mut http = tokio::spawn(server::serve(config.http_port, app, async move {
        let _ = stop_rx.await;
    }));

    let abort_handles: Vec<_> = subscriptions.iter().map(Subscription::abort_handle).collect();

    health::mark(&health_state, HealthStatus::Healthy).await;
    info!(
        event = "pipeline_running",
        subscriptions = abort_handles.len(),
        "Relay is running"
    );

    tokio::pin!(shutdown);

    let outcome = tokio::select! {
        joined = &mut http => {
            health::mark(&health_state, HealthStatus::Unhealthy).await;
            Err(match joined {
                Ok(Ok(())) => anyhow!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::Error::new(e).context("HTTP server task failed"),
            })
        }
        result = try_join_all(subscriptions.into_iter().map(Subscription::wait)) => {
            health::mark(&health_state, HealthStatus::Unhealthy).await;
            Err(match result {
                Ok(_) => anyhow!("All subscriptions ended"),
                Err(e) => e.context("Subscription stopped"),
            })
        }
        () = &mut shutdown => {
            info!(event = "shutdown_signal", "Received shutdown signal, exiting gracefully");
            Ok(())
        }
    };

    if let Err(e) = &outcome {
        error!(event = "pipeline_failed", error = %format!("{e:#}"), "Relay stopped");
    }

    for handle in abort_handles {
        handle.abort();
    }
    let _ = stop_tx.send(());
    if !http.is_finished() {
        if let Ok(Err(e)) = http.await {
            warn!(event = "http_shutdown_failed", error = %e, "HTTP server did not stop cleanly");
        }
    }

    info!(event = "application_stopped", "Application shutdown complete");
    outcome
}

/// Convenience runner that waits for Ctrl-C and then shuts down gracefully.
///
/// # Errors
/// Propagates any errors from `run_until`.
pub async fn run_with_ctrl_c(config: Config, health_state: SharedHealthState) -> Result<()> {
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    run_until(config, health_state, shutdown).await
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{LlmAgents, OfflineAgents, StageAgent};
use crate::anthropic::AnthropicClient;
use crate::config::PropvalConfig;
use crate::error::PropvalError;
use crate::orchestrator::PipelineOrchestrator;
use crate::routes::{health_routes, report_routes};
use crate::runner::StageRunner;
use crate::status::StatusEndpoint;
use crate::store::JobStore;

/// Latency of each offline stage, so progress is visible without an API key.
const OFFLINE_STAGE_DELAY: Duration = Duration::from_millis(750);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: PipelineOrchestrator,
    pub status: StatusEndpoint,
}

impl AppState {
    pub fn new(orchestrator: PipelineOrchestrator) -> Self {
        let status = StatusEndpoint::new(orchestrator.store().clone());
        Self {
            orchestrator,
            status,
        }
    }

    pub fn from_config(config: &PropvalConfig) -> Result<Self, PropvalError> {
        let runner = StageRunner::new(build_agents(config)?, config.stage_timeout());
        let orchestrator =
            PipelineOrchestrator::new(JobStore::new(), runner, config.retry_config());
        Ok(Self::new(orchestrator))
    }
}

/// LLM agents when an API key is configured, deterministic offline agents otherwise.
pub fn build_agents(config: &PropvalConfig) -> Result<Arc<dyn StageAgent>, PropvalError> {
    if config.api_key.is_empty() {
        warn!("ANTHROPIC_API_KEY not set, running with offline agents");
        return Ok(Arc::new(OfflineAgents::with_delay(OFFLINE_STAGE_DELAY)));
    }
    let client = AnthropicClient::new(config.api_key.clone())?;
    info!(model = %config.model, "Using Anthropic agents");
    Ok(Arc::new(LlmAgents::new(client, config.model.clone())))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(report_routes())
        .merge(health_routes())
        .with_state(state)
}

/// Periodically evict finished jobs older than `retention`.
pub fn spawn_sweeper(
    store: JobStore,
    retention: chrono::Duration,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Retention sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = store.sweep(retention);
                    if evicted > 0 {
                        info!(evicted, remaining = store.len(), "Swept expired report jobs");
                    }
                }
            }
        }
    })
}

pub async fn start_server(config: &PropvalConfig) -> Result<(), PropvalError> {
    let state = AppState::from_config(config)?;

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        state.orchestrator.store().clone(),
        config.retention(),
        Duration::from_secs(config.sweep_interval_secs),
        cancel.clone(),
    );

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .map_err(|e| PropvalError::Config(format!("Invalid address: {e}")))?;

    tracing::info!("Starting propval server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = cancel.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = sweeper.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{JobUpdate, Stage};
    use serde_json::json;

    #[test]
    fn offline_agents_without_api_key() {
        let config = PropvalConfig::default();
        assert!(build_agents(&config).is_ok());
    }

    #[test]
    fn state_shares_one_store() {
        let state = AppState::from_config(&PropvalConfig::default()).unwrap();
        let id = state
            .orchestrator
            .store()
            .create("10 Downing Street, London, SW1A 2AA");
        assert!(state.status.status(&id).success);
    }

    #[tokio::test]
    async fn sweeper_evicts_finished_jobs() {
        let store = JobStore::new();
        let done = store.create("10 Downing Street, London, SW1A 2AA");
        for stage in Stage::PIPELINE {
            store.update(&done, JobUpdate::Enter(stage)).unwrap();
            store
                .update(&done, JobUpdate::Record { stage, output: json!({}) })
                .unwrap();
        }
        store.update(&done, JobUpdate::Complete).unwrap();
        let running = store.create("221B Baker Street, London, NW1 6XE");

        let cancel = CancellationToken::new();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let handle = spawn_sweeper(
            store.clone(),
            chrono::Duration::zero(),
            Duration::from_millis(10),
            cancel.clone(),
        );

        for _ in 0..100 {
            if store.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(store.get(&done).is_err());
        assert!(store.get(&running).is_ok());
    }
}

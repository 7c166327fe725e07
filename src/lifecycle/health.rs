use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::messaging::EventPublisher;
use crate::metrics::Metrics;
use crate::service::{OrderService, UnpublishedEntry};
use crate::stock::StockGateway;
use crate::utils::CircuitState;

// ============================================================================
// Health Monitor Actor - aggregates component health
// ============================================================================
//
// Responsibilities:
// - Poll every registered probe on a fixed interval
// - Keep the latest status per component
// - Answer GetSystemHealth with the aggregated view served on /health
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    fn from_circuit(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
}

// ============================================================================
// Probes
// ============================================================================

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn component(&self) -> &'static str;
    async fn check(&self) -> HealthStatus;
}

/// Broker health from the publisher's circuit breaker
pub struct BrokerProbe {
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
}

impl BrokerProbe {
    pub fn new(publisher: Arc<dyn EventPublisher>, metrics: Arc<Metrics>) -> Self {
        Self { publisher, metrics }
    }
}

#[async_trait]
impl HealthProbe for BrokerProbe {
    fn component(&self) -> &'static str {
        "broker"
    }

    async fn check(&self) -> HealthStatus {
        let state = self.publisher.circuit_state().await;
        self.metrics.update_circuit_breaker_state(self.publisher.name(), state);
        HealthStatus::from_circuit(state)
    }
}

/// Stock validator health from its circuit breaker
pub struct StockProbe {
    stock: Arc<dyn StockGateway>,
    metrics: Arc<Metrics>,
}

impl StockProbe {
    pub fn new(stock: Arc<dyn StockGateway>, metrics: Arc<Metrics>) -> Self {
        Self { stock, metrics }
    }
}

#[async_trait]
impl HealthProbe for StockProbe {
    fn component(&self) -> &'static str {
        "stock"
    }

    async fn check(&self) -> HealthStatus {
        let state = self.stock.circuit_state().await;
        self.metrics.update_circuit_breaker_state("stock", state);
        HealthStatus::from_circuit(state)
    }
}

/// Degraded while created orders are waiting for their event
pub struct PublicationBacklogProbe {
    orders: Arc<OrderService>,
}

impl PublicationBacklogProbe {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl HealthProbe for PublicationBacklogProbe {
    fn component(&self) -> &'static str {
        "publication"
    }

    async fn check(&self) -> HealthStatus {
        backlog_status(&self.orders.ledger().pending().await, Utc::now())
    }
}

/// `pending` is expected oldest first
fn backlog_status(pending: &[UnpublishedEntry], now: DateTime<Utc>) -> HealthStatus {
    match pending.first() {
        None => HealthStatus::Healthy,
        Some(oldest) => HealthStatus::Degraded(format!(
            "{} orders waiting for publication, oldest {} failing for {}s ({} attempts)",
            pending.len(),
            oldest.order_id,
            (now - oldest.first_failed_at).num_seconds().max(0),
            oldest.attempts
        )),
    }
}

// ============================================================================
// Messages
// ============================================================================

pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
}

pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

// Implement Reply for SystemHealth to use it as a message reply type
impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    probes: Vec<Arc<dyn HealthProbe>>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl HealthMonitorActor {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            components: HashMap::new(),
            probes,
            interval,
            shutdown,
        }
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut has_degraded = false;
        let mut unhealthy_components = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => {
                    unhealthy_components.push(format!("{}: {}", name, msg));
                }
                HealthStatus::Degraded(_) => {
                    has_degraded = true;
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy_components.is_empty() {
            unhealthy_components.sort();
            HealthStatus::Unhealthy(unhealthy_components.join(", "))
        } else if has_degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(probes = state.probes.len(), "HealthMonitorActor started");

        let probes = state.probes.clone();
        let shutdown = state.shutdown.clone();
        let mut interval = tokio::time::interval(state.interval);

        // Periodic probing; stops with the shutdown token
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                for probe in &probes {
                    let status = probe.check().await;
                    // Fire and forget - use tell
                    if actor_ref
                        .tell(UpdateHealth {
                            component: probe.component().to_string(),
                            status,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let previous = self.components.get(&msg.component).map(|c| c.status.clone());
        if previous.as_ref() != Some(&msg.status) {
            tracing::info!(component = %msg.component, status = ?msg.status, "Component health changed");
        }

        self.components.insert(
            msg.component.clone(),
            ComponentHealth {
                name: msg.component,
                status: msg.status,
                last_check: Utc::now(),
            },
        );
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Service Registration + Heartbeat
// ============================================================================
//
// Register once at startup, send a heartbeat every interval on a background
// task, deregister on shutdown. Heartbeat failures are logged and the loop
// keeps going; none of this ever sits on a request path.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("instance {0} is not registered")]
    UnknownInstance(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub instance_id: String,
    pub service_name: String,
    pub address: String,
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError>;
    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError>;
    async fn heartbeat(&self, instance_id: &str) -> Result<(), RegistryError>;
    /// Addresses of live instances of `service_name`
    async fn discover(&self, service_name: &str) -> Result<Vec<String>, RegistryError>;
}

#[derive(Debug, Clone)]
struct Instance {
    registration: Registration,
    last_heartbeat: DateTime<Utc>,
}

/// In-process registry. Instances without a heartbeat for `ttl` are
/// considered gone.
pub struct LocalRegistry {
    instances: RwLock<HashMap<String, Instance>>,
    ttl: chrono::Duration,
}

impl LocalRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(5)),
        }
    }

    pub async fn last_heartbeat(&self, instance_id: &str) -> Option<DateTime<Utc>> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .map(|instance| instance.last_heartbeat)
    }
}

#[async_trait]
impl ServiceRegistry for LocalRegistry {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        self.instances.write().await.insert(
            registration.instance_id.clone(),
            Instance {
                registration: registration.clone(),
                last_heartbeat: Utc::now(),
            },
        );
        Ok(())
    }

    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.instances
            .write()
            .await
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::UnknownInstance(instance_id.to_string()))
    }

    async fn heartbeat(&self, instance_id: &str) -> Result<(), RegistryError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| RegistryError::UnknownInstance(instance_id.to_string()))?;
        instance.last_heartbeat = Utc::now();
        Ok(())
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<String>, RegistryError> {
        let cutoff = Utc::now() - self.ttl;
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.registration.service_name == service_name && i.last_heartbeat >= cutoff)
            .map(|i| i.registration.address.clone())
            .collect())
    }
}

/// Register, heartbeat until `shutdown`, then deregister
pub async fn run_heartbeat<R>(
    registry: std::sync::Arc<R>,
    registration: Registration,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), RegistryError>
where
    R: ServiceRegistry + ?Sized,
{
    registry.register(&registration).await?;
    tracing::info!(
        instance_id = %registration.instance_id,
        service = %registration.service_name,
        address = %registration.address,
        "Service registered"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = registry.heartbeat(&registration.instance_id).await {
                    tracing::error!(error = %e, instance_id = %registration.instance_id, "Failed health check");
                }
            }
        }
    }

    if let Err(e) = registry.deregister(&registration.instance_id).await {
        tracing::warn!(error = %e, instance_id = %registration.instance_id, "Failed to deregister");
    } else {
        tracing::info!(instance_id = %registration.instance_id, "Service deregistered");
    }
    Ok(())
}

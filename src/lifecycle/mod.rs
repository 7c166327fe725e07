// ============================================================================
// Lifecycle - registration, health and shutdown shared by every service
// ============================================================================

pub mod health;
pub mod heartbeat;
pub mod shutdown;

pub use health::{
    BrokerProbe, ComponentHealth, GetSystemHealth, HealthMonitorActor, HealthProbe, HealthStatus,
    PublicationBacklogProbe, StockProbe, SystemHealth,
};
pub use heartbeat::{run_heartbeat, LocalRegistry, Registration, RegistryError, ServiceRegistry};
pub use shutdown::shutdown_token;

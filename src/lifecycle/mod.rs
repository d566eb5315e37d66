//! Lifecycle subsystem: C3 (generic state machine), C4/C5 (agent and
//! integration specialisations), and C6 (the coordinator sequencing both).

pub mod agent;
pub mod coordinator;
pub mod integration;
pub mod manager;

pub use agent::AgentManager;
pub use coordinator::{IntegrationSpec, LifecycleCoordinator, OutcomeMap};
pub use integration::IntegrationManager;
pub use manager::{LifecycleManager, StepOutcome};

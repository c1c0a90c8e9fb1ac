//! Policy-driven key rotation: evaluation, execution records, and the
//! scheduler that ties them to the key lifecycle manager.

pub mod policy;
pub mod record;
pub mod scheduler;

pub use policy::{
    ComplianceFramework, ComplianceRequirements, PolicyEngine, PolicyEvaluation, RotationPolicy,
    RotationTrigger, RotationWindow, SecurityIncident,
};
pub use record::{Rotation, RotationStatus};
pub use scheduler::{RotationScheduler, SchedulerStatus};

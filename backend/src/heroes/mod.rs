pub mod orchestrator;
pub mod provision;
pub mod validate;

pub use orchestrator::{DEGRADED_WARNING, HeroProvisioning, ProvisioningOutcome, Rejection};
pub use provision::{ModelProvisioner, ProvisionError, ProvisionedModel, derive_model_name};
pub use validate::{ValidationErrors, validate};

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, load_config_from_file};
pub use models::*;
pub use validation::{GatewayConfigValidator, ValidationError, ValidationResult};

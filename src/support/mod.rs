pub mod errors;
pub mod id;
pub mod shutdown;

pub use errors::{AppError, ConfigError, ProxyError, SupervisorError, ValidationError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};

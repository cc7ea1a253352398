pub mod context;
pub mod error;
pub mod reconciler;
pub mod status;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, BootstrapError, Error, ErrorKind, Result};
pub use reconciler::{Outcome, error_policy, reconcile, run_pass};
pub use status::sanitize_message;
pub use validation::{Endpoint, resolve_endpoint, validate_spec};

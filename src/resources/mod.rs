pub mod common;
pub mod credentials;
pub mod secret;
pub mod store;

pub use common::{FIELD_MANAGER, managed_selector, owner_reference, standard_labels};
pub use credentials::{GeneratedCredential, generate_password};
pub use secret::{SecretAction, SecretConflict, build_credentials_secret, plan_upsert};
pub use store::{ClusterStore, KubeStore};

pub mod postgres_bootstrap;

pub use postgres_bootstrap::*;

//! Unit tests for the PostgreSQL bootstrap controller
//!
//! This module contains unit tests for:
//! - Reconcile passes against in-memory Kubernetes and PostgreSQL fakes
//! - Role, database and grant convergence
//! - Requeue and backoff decisions, and which watch updates trigger a pass
//! - Validation and the resource definition

#[path = "../common/mod.rs"]
mod common;

//! Library exports for semptify-storage, shared between the binary and tests.

pub mod auth;
pub mod config;
pub mod enforcer;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod provisioner;
pub mod qualifier;
pub mod routes;
pub mod startup;
pub mod state;
pub mod storage;
pub mod store;
pub mod utils;

//! Library exports for atgate, shared between the binary and tests.

pub mod config;
pub mod gate;
pub mod oauth;
pub mod resolver;
pub mod routes;
pub mod session;
pub mod startup;
pub mod state;
pub mod store;
pub mod utils;

pub use gate::{AtprotoAuth, AtprotoAuthBuilder, AuthGate, AuthGateLayer, BootstrapError, BootstrapState};

pub mod auth;
pub mod cache;
pub mod http;
pub mod hyper;
pub mod ingress;
pub mod invoke;
pub mod notify;
pub mod resolve;

pub use edgelake_core::{AnyError, AnyResult};

#[cfg(test)]
pub(crate) mod testing;

mod error;
pub use error::{AnyError, AnyResult, IngressError, IngressResult};

pub mod config;
pub mod context;
pub mod http;
pub mod model;
pub mod store;
pub mod util;

pub(crate) mod sealed {
    pub trait SealedT<T> {}
}

pub mod config;
pub mod error;
pub mod services;
pub mod store;
pub mod types;

pub use error::{ExchangeError, Result};
pub use store::Exchange;

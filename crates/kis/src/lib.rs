pub mod adapter;
pub mod cache;
pub mod client;
pub mod error;
pub mod models;
pub mod session;
pub mod symbol;
pub mod token;
pub mod tr_id;

pub use adapter::KisBrokerAdapter;
pub use client::{KisRestClient, ProxyOptions};
pub use error::KisError;

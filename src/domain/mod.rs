//! Domain layer - Cache contract and errors

pub mod cache;
pub mod error;

pub use cache::{CacheDriver, CacheExt, CleanType, DriverKind};
pub use error::DomainError;

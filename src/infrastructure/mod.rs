//! Infrastructure layer - Backend drivers and process setup

pub mod cache;
pub mod logging;

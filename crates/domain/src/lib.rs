//! Shared domain types for the VacHarvest engine: configuration, search
//! filters, vacancy/employer/task models, and the common error enum.

pub mod config;
pub mod error;
pub mod filter;
pub mod task;
pub mod vacancy;

pub use error::{Error, Result};

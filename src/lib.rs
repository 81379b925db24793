pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod retry;
pub mod scheduler;
pub mod selection;
pub mod shutdown;
pub mod store;
pub mod worker;

pub use error::{OrchError, Result};

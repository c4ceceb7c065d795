//! Web API module.

pub mod error;
pub mod refresh;
pub mod routes;
pub mod scores;
pub mod status;

pub use routes::*;

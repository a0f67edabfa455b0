//! HTTP API handlers for stemsplit-server

pub mod health;
pub mod outputs;
pub mod split;

pub use health::health_routes;
pub use outputs::output_routes;
pub use split::{split_routes, JOB_ID_HEADER};

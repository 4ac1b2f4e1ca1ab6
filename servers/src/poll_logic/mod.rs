pub mod config;
pub mod downstream;
pub mod error;
pub mod logger;
pub mod model;
pub mod routes;
pub mod state;

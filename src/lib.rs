// src/lib.rs

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod routes;
pub mod session;
pub mod state;
pub mod statistics;
pub mod utils;

pub use routes::create_router;

// src/handlers/mod.rs

pub mod health;
pub mod queue;
pub mod quiz;
pub mod simulation_history;

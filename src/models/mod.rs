// src/models/mod.rs

use serde::Serialize;

pub mod attempt;
pub mod operation;
pub mod question;
pub mod statistics;

/// Success envelope: every JSON response is `{"data": ...}` or `{"error": ...}`.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

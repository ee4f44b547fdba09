//! Application layer: error mapping shared by the HTTP surfaces.

pub mod error;

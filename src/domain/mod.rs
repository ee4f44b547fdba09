//! Club records and their in-process catalog.

pub mod catalog;
pub mod entities;
pub mod error;

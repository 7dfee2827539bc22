//! Database module: row models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: row structs returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `present_box::db`; the repository API
//! and the row models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewPresent, PresentRow};

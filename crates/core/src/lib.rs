//! Domain logic for the boundary upload review step.
//!
//! Everything in this crate is pure: typed upload rows, the fixed
//! validation-check partition, row classification, the error detail
//! view model and the import selection. Network access lives in
//! `georepo-client`.

pub mod checks;
pub mod classify;
pub mod error;
pub mod presenter;
pub mod selection;
pub mod types;
pub mod upload;

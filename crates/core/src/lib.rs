//! Storage-agnostic domain vocabulary shared by the repository layer and
//! its callers.

pub mod audit;
pub mod error;
pub mod filter;
pub mod roles;
pub mod types;

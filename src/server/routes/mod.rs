//! Route handlers, grouped by resource.

pub mod auth;
pub mod settings;
pub mod symbols;
pub mod workflows;

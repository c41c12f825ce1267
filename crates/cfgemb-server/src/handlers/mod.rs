//! HTTP handlers, split by surface: task submission/lifecycle and system
//! introspection.

pub mod system;
pub mod tasks;

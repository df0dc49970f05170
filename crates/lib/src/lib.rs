//! dcc-lib: Core types and logic for the dcc deployment orchestrator
//!
//! This crate provides the fundamental pieces dcc is built from:
//! - `Profile`: configuration units, capability definitions and bindings, linked
//! - `PropertiesHolder`: the resolved property bags of every unit and capability
//! - `validate`: the checks a deployment profile must pass before it runs
//! - `ExecutionContext`: host mapping and lifecycle command dispatch

pub mod capability;
pub mod consts;
pub mod document;
pub mod error;
pub mod execute;
pub mod expr;
pub mod model;
pub mod placeholder;
pub mod platform;
pub mod profile;
pub mod properties;
pub mod validate;

#[cfg(test)]
mod util;

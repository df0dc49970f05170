//! End-to-end tests of the engine: documents in, resolved properties,
//! validation reports and host assignments out.

mod common;
mod hosting;
mod resolution;
mod validation;

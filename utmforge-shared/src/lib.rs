//! utmforge shared - common types for the image build engine
//!
//! This crate contains the error taxonomy and the well-known names
//! (state keys, automation scripts) used across the workspace.

pub mod constants;
pub mod errors;

pub use errors::{UtmforgeError, UtmforgeResult};

//! Build state shared across actions.
//!
//! - [`context`] - directories, image, origin registry and extra environment

pub mod context;

//! Core primitives.
//!
//! Small, dependency-light helpers shared by the network layer.

pub mod format;
pub mod token;

// Re-export core helpers
pub use format::strip_formatting;
pub use token::generate_token;

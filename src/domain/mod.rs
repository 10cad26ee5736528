//! Domain layer for Arch Guardian
//!
//! Architecture: Domain Model - Pure data for files, dependencies and violations
//! - Contains the project model the scanner produces and rules consume
//! - Independent of file system walking, parsing and plugin infrastructure
//! - Expresses the shared vocabulary of graphs, layers and findings

pub mod project;
pub mod violations;

// Re-export main domain types for convenience
pub use project::*;
pub use violations::*;

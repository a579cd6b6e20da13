//! Configuration parsing and validation.

pub mod processed; // Validated configuration
pub mod raw; // Structs directly mapping to the YAML structure

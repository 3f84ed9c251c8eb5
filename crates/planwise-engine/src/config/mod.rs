//! Simulation configuration: YAML parsing, semantic validation, fingerprinting.

pub mod fingerprint;
pub mod parser;
pub mod types;
pub mod validator;

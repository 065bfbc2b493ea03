//! Configuration
//!
//! Registry settings, hierarchy descriptions and their validation.

pub mod config;
pub mod types;
pub mod validator;

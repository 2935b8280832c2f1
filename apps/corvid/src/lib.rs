//! # corvid
//!
//! Library half of the Corvid binary: argument parsing, configuration
//! loading and the job runner. `main.rs` only wires logging and calls
//! [`cli::execute`].

pub mod cli;
pub mod config;
pub mod jobs;

//! Sprechpfad Trainer
//!
//! The service crate: persistence, the learning-path orchestration core,
//! exercise execution, reporting and the command-line surface. The
//! `sprechpfad` binary is a thin wrapper around this library.

pub mod audio;
pub mod cli;
pub mod config;
pub mod db;
pub mod exercise;
pub mod models;
pub mod path;
pub mod report;
pub mod state;

//! Operator tooling for running an order CSV import from the terminal.

pub mod config;
pub mod report;
pub mod run;

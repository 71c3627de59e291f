//! Client for the order CSV import endpoints.
//!
//! Uploads a CSV file, follows the server's calculation progress over
//! Server-Sent Events, reconciles the final summary once the calculation
//! is done and exports the full per-row error report. [`ImportController`]
//! ties these together for one import session.
//!
//! [`ImportController`]: controller::ImportController

pub mod api;
pub mod controller;
pub mod credentials;
pub mod export;
pub mod gateway;
pub mod progress;
pub mod sse;

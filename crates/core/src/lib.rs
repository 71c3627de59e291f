//! Domain types and pure logic for the order CSV import client.
//!
//! Everything here is free of I/O: wire types, phase derivation, error
//! preview pagination and result presentation helpers.

pub mod error;
pub mod import;
pub mod pagination;
pub mod phase;
pub mod report;
pub mod types;

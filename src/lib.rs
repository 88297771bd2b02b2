//! Client for the RF4S fishing bot: a reconnecting TCP link speaking
//! newline-delimited JSON, and a status snapshot kept in sync with it.

pub mod config;
pub mod link;

//! Pairlink: pair a phone number to a messaging session over HTTP, then
//! export the resulting credentials to blob storage.

pub mod cli;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod pairing;
pub mod server;
pub mod storage;

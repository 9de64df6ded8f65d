//! Pairlink pairing and presence server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod db;
pub mod metrics;
pub mod moderation;
pub mod pairs;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod ws;

// Library entry point; the binary and the integration tests build on it

pub mod auth;
pub mod config;
pub mod error;
pub mod mixcloud;
pub mod retry;

#[cfg(test)]
mod testutil;

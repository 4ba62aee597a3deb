pub mod config;
pub mod encoder;
pub mod error;
pub mod execution;
pub mod notify;
pub mod runtime;
pub mod schedule;
pub mod service;
pub mod upload;
pub mod vod;

#[cfg(test)]
mod testing;

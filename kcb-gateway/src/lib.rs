//! Gateway exposing a KCB-5 robot controller's I/O over HTTP.
//!
//! Digital pins, servos and analog inputs are reached through a line
//! protocol on one shared serial link; raw I2C/SPI writes go straight to the
//! bus devices. See [`gateway::Gateway`] for the operation set.

pub mod api;
pub mod api_client;
pub mod bus;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod payload;
pub mod tracing;
pub mod types;

//! # homebound-agent
//!
//! Host process for the homebound pipeline.
//!
//! This library provides the pipeline wiring, the HTTP backend transport,
//! software platform adapters, radio backend selection and the local REST
//! API. The BlueZ radio is built with the `bluetooth` feature.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod http;
pub mod logging;
pub mod platform;
pub mod radio;
pub mod runtime;
pub mod state;

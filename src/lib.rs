#![cfg_attr(docsrs, feature(doc_cfg))]
//! # cumeter_lib
//!
//! This crate reads an electricity meter over a serial line. The meter
//! speaks a DL/T 645 style request/response protocol: every request is a
//! fixed frame, every reply carries a BCD payload shifted by `0x33` at a
//! fixed position.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `cumeter` command-line tool and pulls in `serialport` and `serde`.
//!
//! ### Client Features
//! - `serialport`: Enables the **synchronous** transport using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** session using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `protocol_serde`: Enables `serde` serialization of decoded readings.
//! - `bin-dependencies`: Enables all features required by the `cumeter` binary executable.

/// Contains error types for the library.
mod error;
/// Request table and composite command sequences.
pub mod commands;
/// Byte transcoding, value decoding and reply frame geometry.
pub mod protocol;
/// Request/reply exchange over a [`session::Transport`].
pub mod session;

pub use error::{Error, HexBytes};

/// Synchronous serial transport.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous session on Tokio.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;

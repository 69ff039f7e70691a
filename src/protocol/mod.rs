//! Wire protocol for Corsair Link hubs.
//!
//! This module contains the opcode and register constants for both dialects,
//! the batched request builder with its typed response fields, and the
//! numeric codings shared by all models.

pub mod codec;
pub mod commands;
pub mod values;

pub use codec::{BlockField, ByteField, Request, RequestBuilder, Response, WordField, WriteAck};
pub use commands::*;

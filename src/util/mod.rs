//! Shared helpers: base64 header bytes and human-readable amount parsing.

pub mod amount;
pub mod b64;

pub use amount::{AmountParseError, MoneyAmount};
pub use b64::Base64Bytes;

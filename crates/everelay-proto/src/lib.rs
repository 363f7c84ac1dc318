//! Wire types for client/relay command frames.
//!
//! Frames are JSON arrays whose first element is a command tag, which
//! doesn't map onto a plain `#[derive(Deserialize)]` enum; parsing and
//! serialization are done by hand against `serde_json::Value` instead.

pub mod capability;
pub mod client;
pub mod relay;

pub use capability::wants_capability_document;
pub use client::{ChangesOptions, ClientMessage, ParseError};
pub use relay::{ChangeEntry, RelayMessage};

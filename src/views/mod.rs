//! Read-only materialized views of store state

use std::sync::Arc;

use serde::de::DeserializeOwned;

pub mod map;
pub mod node;

pub use map::{MapListener, MapView};
pub use node::NodeView;

/// Turns raw node bytes into a typed value; `None` marks an undecodable
/// payload, which the views treat as absent.
pub type Decode<T> = Arc<dyn Fn(&[u8]) -> Option<T> + Send + Sync>;

/// Decoder for JSON payloads.
pub fn json_decoder<T: DeserializeOwned>() -> Decode<T> {
    Arc::new(|bytes| serde_json::from_slice(bytes).ok())
}

/// Decoder that keeps the raw bytes.
pub fn raw_decoder() -> Decode<Vec<u8>> {
    Arc::new(|bytes| Some(bytes.to_vec()))
}

/// Decoder for UTF-8 string payloads.
pub fn utf8_decoder() -> Decode<String> {
    Arc::new(|bytes| String::from_utf8(bytes.to_vec()).ok())
}

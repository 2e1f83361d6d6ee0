//! Transport layer for socket communication
//!
//! Line-delimited JSON over the service's Unix socket. The transport layer is
//! organized into:
//! - `codec`: NDJSON encoding/decoding for messages
//! - `async_transport`: Tokio-based client/server connection halves

mod async_transport;
mod codec;

pub use async_transport::{AsyncConnection, AsyncTransport};
pub use codec::decode_server_message;
pub use codec::encode_server_message;

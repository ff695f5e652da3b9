//! TCP+msgpack IPC transport layer.
//!
//! Length-prefixed msgpack framing: one accept loop, one task per connection
//! translating socket frames into commands for the single kernel actor.

pub mod codec;
pub mod handlers;
pub mod router;
pub mod server;

pub use server::IpcServer;

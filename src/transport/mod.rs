//! 传输层
//!
//! - `queue` - 进程内的有界队列与端点对
//! - `stream` - 字节流分帧，用于真实的进程边界

pub mod queue;
pub mod stream;

pub use queue::{link, Endpoint, TransportQueue};
pub use stream::{forward_from_stream, forward_to_stream, read_envelope, write_envelope};

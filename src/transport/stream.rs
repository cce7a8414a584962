//! 字节流上的信封分帧
//!
//! 真实进程之间通过管道或套接字通信时使用。帧格式与 `Envelope::to_bytes`
//! 完全一致，读取时逐段解析帧头，负载长度超过上限直接拒绝。

use std::io::{ErrorKind, Read, Write};

use super::queue::TransportQueue;
use crate::core::error::{TransportError, TransportResult};
use crate::protocol::envelope::{Envelope, EnvelopeCategory};

/// 写出一个信封
pub fn write_envelope<W: Write>(
    writer: &mut W,
    envelope: &Envelope,
    max_payload: usize,
) -> TransportResult<()> {
    let size = envelope.payload().len();
    let limit = max_payload.min(u32::MAX as usize);
    if size > limit {
        return Err(TransportError::FrameTooLarge { size, limit });
    }
    writer.write_all(&envelope.to_bytes())?;
    writer.flush()?;
    Ok(())
}

/// 读取一个信封
///
/// 在帧边界遇到 EOF 视为对端正常关闭，返回 `QueueClosed`；
/// 帧内截断返回 `Malformed`。
pub fn read_envelope<R: Read>(reader: &mut R, max_payload: usize) -> TransportResult<Envelope> {
    let mut word = [0u8; 4];
    if !read_frame_start(reader, &mut word)? {
        return Err(TransportError::QueueClosed);
    }
    let type_id = u32::from_le_bytes(word);

    let mut tag = [0u8; 1];
    read_within_frame(reader, &mut tag)?;
    let category = EnvelopeCategory::from_byte(tag[0])?;

    let correlation_id = if category.has_correlation() {
        read_within_frame(reader, &mut word)?;
        Some(u32::from_le_bytes(word))
    } else {
        None
    };

    read_within_frame(reader, &mut word)?;
    let len = u32::from_le_bytes(word) as usize;
    if len > max_payload {
        return Err(TransportError::FrameTooLarge {
            size: len,
            limit: max_payload,
        });
    }

    let mut payload = vec![0u8; len];
    read_within_frame(reader, &mut payload)?;
    Envelope::from_parts(type_id, category, correlation_id, payload)
}

// 读取帧的第一个字段，流在此之前结束时返回 false
fn read_frame_start<R: Read>(reader: &mut R, buf: &mut [u8]) -> TransportResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(TransportError::Malformed(
                    "stream ended inside envelope header".to_string(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn read_within_frame<R: Read>(reader: &mut R, buf: &mut [u8]) -> TransportResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            TransportError::Malformed("stream ended inside envelope".to_string())
        } else {
            TransportError::Io(e)
        }
    })
}

/// 将字节流中的信封转发到队列，直到流结束或队列关闭
///
/// 返回转发的信封数量。流结束时关闭队列。
pub fn forward_from_stream<R: Read>(
    reader: &mut R,
    queue: &TransportQueue,
    max_payload: usize,
) -> TransportResult<usize> {
    let mut forwarded = 0;
    loop {
        match read_envelope(reader, max_payload) {
            Ok(envelope) => {
                queue.send(envelope)?;
                forwarded += 1;
            }
            Err(TransportError::QueueClosed) => {
                queue.close();
                return Ok(forwarded);
            }
            Err(e) => {
                tracing::warn!(target: "bridge.transport", error = %e, "stream framing failed");
                queue.close();
                return Err(e);
            }
        }
    }
}

/// 将队列中的信封写入字节流，直到队列关闭
pub fn forward_to_stream<W: Write>(
    queue: &TransportQueue,
    writer: &mut W,
    max_payload: usize,
) -> TransportResult<usize> {
    let mut forwarded = 0;
    loop {
        match queue.receive() {
            Ok(envelope) => {
                write_envelope(writer, &envelope, max_payload)?;
                forwarded += 1;
            }
            Err(TransportError::QueueClosed) => return Ok(forwarded),
            Err(e) => return Err(e),
        }
    }
}

//! 消息信封
//!
//! ```text
//! [typeId: u32 LE][category: u8][correlationId: u32 LE, 仅 Query/Response][payloadLen: u32 LE][payload]
//! ```
//!
//! Response 的负载首字节为状态：0 表示成功，其后按查询的响应 schema 编码；
//! 1 表示失败，其后按 `{reason: Str}` 编码。

use super::catalog::{Category, MessageKind};
use super::marshal::Marshaller;
use super::value::{Record, Schema, TypeTag};
use crate::core::error::{MarshalError, MarshalResult, TransportError, TransportResult};

/// 线上类别标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeCategory {
    Notification = 0,
    Query = 1,
    Command = 2,
    Response = 3,
}

impl EnvelopeCategory {
    pub fn from_byte(byte: u8) -> TransportResult<Self> {
        match byte {
            0 => Ok(EnvelopeCategory::Notification),
            1 => Ok(EnvelopeCategory::Query),
            2 => Ok(EnvelopeCategory::Command),
            3 => Ok(EnvelopeCategory::Response),
            other => Err(TransportError::Malformed(format!(
                "unknown category tag {}",
                other
            ))),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// 该类别是否携带关联 id
    pub fn has_correlation(self) -> bool {
        matches!(self, EnvelopeCategory::Query | EnvelopeCategory::Response)
    }

    /// 目录类别是否与此信封类别相符
    pub fn carries(self, category: Category) -> bool {
        matches!(
            (self, category),
            (EnvelopeCategory::Notification, Category::Notification)
                | (EnvelopeCategory::Query, Category::Query)
                | (EnvelopeCategory::Response, Category::Query)
                | (EnvelopeCategory::Command, Category::Command)
        )
    }
}

impl From<Category> for EnvelopeCategory {
    fn from(category: Category) -> Self {
        match category {
            Category::Notification => EnvelopeCategory::Notification,
            Category::Query => EnvelopeCategory::Query,
            Category::Command => EnvelopeCategory::Command,
        }
    }
}

/// 一条传输中的消息
///
/// 所有权随队列整体转移，发送方不保留任何引用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    type_id: u32,
    category: EnvelopeCategory,
    correlation_id: Option<u32>,
    payload: Vec<u8>,
}

impl Envelope {
    pub fn notification(type_id: u32, payload: Vec<u8>) -> Self {
        Self {
            type_id,
            category: EnvelopeCategory::Notification,
            correlation_id: None,
            payload,
        }
    }

    pub fn command(type_id: u32, payload: Vec<u8>) -> Self {
        Self {
            type_id,
            category: EnvelopeCategory::Command,
            correlation_id: None,
            payload,
        }
    }

    pub fn query(type_id: u32, correlation_id: u32, payload: Vec<u8>) -> Self {
        Self {
            type_id,
            category: EnvelopeCategory::Query,
            correlation_id: Some(correlation_id),
            payload,
        }
    }

    pub fn response(type_id: u32, correlation_id: u32, payload: Vec<u8>) -> Self {
        Self {
            type_id,
            category: EnvelopeCategory::Response,
            correlation_id: Some(correlation_id),
            payload,
        }
    }

    /// 按消息种类构建非查询信封
    pub fn for_kind(kind: &MessageKind, payload: Vec<u8>) -> Self {
        match kind.category {
            Category::Command => Self::command(kind.type_id, payload),
            _ => Self::notification(kind.type_id, payload),
        }
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn category(&self) -> EnvelopeCategory {
        self.category
    }

    pub fn correlation_id(&self) -> Option<u32> {
        self.correlation_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// 帧头长度
    pub fn header_len(&self) -> usize {
        if self.category.has_correlation() {
            13
        } else {
            9
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// 负载长度需在 u32 范围内，`BridgeConfig::validate` 保证上限不越界
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.type_id.to_le_bytes());
        out.push(self.category.as_byte());
        if let Some(id) = self.correlation_id {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// 从完整帧解析信封
    pub fn from_bytes(bytes: &[u8], max_payload: usize) -> TransportResult<Self> {
        let mut cursor = 0usize;
        let type_id = read_u32(bytes, &mut cursor)?;
        let category = EnvelopeCategory::from_byte(read_u8(bytes, &mut cursor)?)?;
        let correlation_id = if category.has_correlation() {
            Some(read_u32(bytes, &mut cursor)?)
        } else {
            None
        };
        let len = read_u32(bytes, &mut cursor)? as usize;
        if len > max_payload {
            return Err(TransportError::FrameTooLarge {
                size: len,
                limit: max_payload,
            });
        }
        let rest = &bytes[cursor..];
        if rest.len() != len {
            return Err(TransportError::Malformed(format!(
                "declared payload of {} bytes, found {}",
                len,
                rest.len()
            )));
        }
        Ok(Self {
            type_id,
            category,
            correlation_id,
            payload: rest.to_vec(),
        })
    }

    /// 由已解析的帧头各部分组装
    pub(crate) fn from_parts(
        type_id: u32,
        category: EnvelopeCategory,
        correlation_id: Option<u32>,
        payload: Vec<u8>,
    ) -> TransportResult<Self> {
        if category.has_correlation() != correlation_id.is_some() {
            return Err(TransportError::Malformed(format!(
                "correlation id presence does not match category {:?}",
                category
            )));
        }
        Ok(Self {
            type_id,
            category,
            correlation_id,
            payload,
        })
    }
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> TransportResult<u8> {
    let byte = bytes
        .get(*cursor)
        .copied()
        .ok_or_else(|| TransportError::Malformed("truncated envelope header".to_string()))?;
    *cursor += 1;
    Ok(byte)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> TransportResult<u32> {
    let end = *cursor + 4;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| TransportError::Malformed("truncated envelope header".to_string()))?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(slice);
    *cursor = end;
    Ok(u32::from_le_bytes(raw))
}

pub const STATUS_OK: u8 = 0;
pub const STATUS_FAILED: u8 = 1;

/// 失败响应的负载布局
pub fn failure_schema() -> Schema {
    Schema::new().field("reason", TypeTag::Str)
}

/// 编码成功响应
pub fn encode_response_ok(
    marshaller: &Marshaller,
    kind: &MessageKind,
    result: &Record,
) -> MarshalResult<Vec<u8>> {
    let body = marshaller.encode(result, &kind.response)?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(STATUS_OK);
    out.extend_from_slice(&body);
    Ok(out)
}

/// 编码失败响应
pub fn encode_response_failed(marshaller: &Marshaller, reason: &str) -> MarshalResult<Vec<u8>> {
    let body = marshaller.encode(&Record::new().with("reason", reason), &failure_schema())?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(STATUS_FAILED);
    out.extend_from_slice(&body);
    Ok(out)
}

/// 解码响应负载
///
/// 外层 `Err` 表示负载本身无法解析，内层 `Err` 是远端报告的失败原因。
pub fn decode_response(
    marshaller: &Marshaller,
    kind: &MessageKind,
    payload: &[u8],
) -> MarshalResult<Result<Record, String>> {
    let (status, body) = payload
        .split_first()
        .ok_or_else(|| MarshalError::Decode("empty response payload".to_string()))?;
    match *status {
        STATUS_OK => Ok(Ok(marshaller.decode(body, &kind.response)?)),
        STATUS_FAILED => {
            let record = marshaller.decode(body, &failure_schema())?;
            Ok(Err(record.string("reason")?.to_string()))
        }
        other => Err(MarshalError::Decode(format!(
            "unknown response status {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let env = Envelope::query(0x0102_0304, 7, vec![0xAA, 0xBB]);
        let bytes = env.to_bytes();
        assert_eq!(
            bytes,
            vec![4, 3, 2, 1, 1, 7, 0, 0, 0, 2, 0, 0, 0, 0xAA, 0xBB]
        );
        assert_eq!(bytes.len(), env.encoded_len());

        let env = Envelope::notification(5, vec![]);
        assert_eq!(env.to_bytes(), vec![5, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_parse_frame() {
        let env = Envelope::response(9, 42, vec![1, 2, 3]);
        let parsed = Envelope::from_bytes(&env.to_bytes(), 1024).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.correlation_id(), Some(42));

        let cmd = Envelope::command(3, vec![9]);
        let parsed = Envelope::from_bytes(&cmd.to_bytes(), 1024).unwrap();
        assert_eq!(parsed.correlation_id(), None);
        assert_eq!(parsed.category(), EnvelopeCategory::Command);
    }

    #[test]
    fn test_rejects_bad_frames() {
        assert!(matches!(
            Envelope::from_bytes(&[1, 0, 0], 1024),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::from_bytes(&[1, 0, 0, 0, 9, 0, 0, 0, 0], 1024),
            Err(TransportError::Malformed(_))
        ));

        let big = Envelope::notification(1, vec![0; 32]).to_bytes();
        assert!(matches!(
            Envelope::from_bytes(&big, 16),
            Err(TransportError::FrameTooLarge { size: 32, limit: 16 })
        ));

        let mut short = Envelope::notification(1, vec![1, 2, 3]).to_bytes();
        short.pop();
        assert!(matches!(
            Envelope::from_bytes(&short, 1024),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_response_status() {
        let kind = MessageKind::query(
            1,
            "Ping",
            Schema::new(),
            Schema::new().field("n", TypeTag::Int),
        );
        let m = Marshaller::default();

        let ok = encode_response_ok(&m, &kind, &Record::new().with("n", 3)).unwrap();
        assert_eq!(ok[0], STATUS_OK);
        let decoded = decode_response(&m, &kind, &ok).unwrap();
        assert_eq!(decoded, Ok(Record::new().with("n", 3)));

        let failed = encode_response_failed(&m, "no map loaded").unwrap();
        let decoded = decode_response(&m, &kind, &failed).unwrap();
        assert_eq!(decoded, Err("no map loaded".to_string()));

        assert!(decode_response(&m, &kind, &[]).is_err());
        assert!(decode_response(&m, &kind, &[7]).is_err());
    }

    #[test]
    fn test_category_carries() {
        assert!(EnvelopeCategory::Response.carries(Category::Query));
        assert!(!EnvelopeCategory::Command.carries(Category::Notification));
    }
}

//! 值编解码器
//!
//! 按 schema 驱动的二进制编码。字段按 schema 声明顺序写出，名称不上线，
//! 每个值前有一个类型标签字节；序列与记录带 `u32` 长度前缀；字符串为
//! `u32` 字节长度 + UTF-8；所有数值均为定宽小端序。
//!
//! ```text
//! payload := count:u32 value*
//! value   := tag:u8 body
//! body    := bool:u8 | i32 | f32 | len:u32 utf8 | f32 f32 | f32 f32 f32
//!          | count:u32 value*          (seq / record)
//! ```
//!
//! 解码沿期望的 schema 递归：数量或标签不一致时返回 `SchemaMismatch`，
//! 字节流截断或非法时返回 `Decode`。解码结果全部是新分配的值。

use glam::{Vec2, Vec3};

use super::value::{Record, Schema, ShareableValue, TypeTag};
use crate::core::error::{MarshalError, MarshalResult};

/// 默认负载上限
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_POS2: u8 = 5;
const TAG_POS3: u8 = 6;
const TAG_SEQ: u8 = 7;
const TAG_RECORD: u8 = 8;

fn tag_byte(tag: &TypeTag) -> u8 {
    match tag {
        TypeTag::Bool => TAG_BOOL,
        TypeTag::Int => TAG_INT,
        TypeTag::Float => TAG_FLOAT,
        TypeTag::Str => TAG_STR,
        TypeTag::Pos2 => TAG_POS2,
        TypeTag::Pos3 => TAG_POS3,
        TypeTag::Seq(_) => TAG_SEQ,
        TypeTag::Record(_) => TAG_RECORD,
    }
}

/// 编解码器
#[derive(Debug, Clone, Copy)]
pub struct Marshaller {
    max_payload: usize,
}

impl Default for Marshaller {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl Marshaller {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// 按 schema 编码记录
    pub fn encode(&self, record: &Record, schema: &Schema) -> MarshalResult<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        write_record(&mut out, record, schema, "")?;
        if out.len() > self.max_payload {
            return Err(MarshalError::PayloadTooLarge {
                size: out.len(),
                limit: self.max_payload,
            });
        }
        Ok(out)
    }

    /// 按 schema 解码记录
    pub fn decode(&self, bytes: &[u8], schema: &Schema) -> MarshalResult<Record> {
        if bytes.len() > self.max_payload {
            return Err(MarshalError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_payload,
            });
        }
        let mut reader = WireReader::new(bytes);
        let record = read_record(&mut reader, schema, "")?;
        if reader.remaining() != 0 {
            return Err(MarshalError::Decode(format!(
                "{} trailing bytes after payload",
                reader.remaining()
            )));
        }
        Ok(record)
    }
}

/// 使用默认上限编码
pub fn encode(record: &Record, schema: &Schema) -> MarshalResult<Vec<u8>> {
    Marshaller::default().encode(record, schema)
}

/// 使用默认上限解码
pub fn decode(bytes: &[u8], schema: &Schema) -> MarshalResult<Record> {
    Marshaller::default().decode(bytes, schema)
}

fn path_of(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> MarshalResult<()> {
    let len = u32::try_from(len).map_err(|_| MarshalError::PayloadTooLarge {
        size: len,
        limit: u32::MAX as usize,
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_record(out: &mut Vec<u8>, record: &Record, schema: &Schema, path: &str) -> MarshalResult<()> {
    if record.len() != schema.len() {
        return Err(MarshalError::SchemaMismatch(format!(
            "{}: record has {} fields, schema declares {}",
            if path.is_empty() { "payload" } else { path },
            record.len(),
            schema.len()
        )));
    }
    write_len(out, schema.len())?;
    for field in schema.fields() {
        let field_path = path_of(path, &field.name);
        let value = record.get(&field.name).ok_or_else(|| {
            MarshalError::SchemaMismatch(format!("missing field `{}`", field_path))
        })?;
        write_value(out, value, &field.tag, &field_path)?;
    }
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &ShareableValue, tag: &TypeTag, path: &str) -> MarshalResult<()> {
    out.push(tag_byte(tag));
    match (value, tag) {
        (ShareableValue::Bool(b), TypeTag::Bool) => out.push(u8::from(*b)),
        (ShareableValue::Int(i), TypeTag::Int) => out.extend_from_slice(&i.to_le_bytes()),
        (ShareableValue::Float(f), TypeTag::Float) => out.extend_from_slice(&f.to_le_bytes()),
        (ShareableValue::Str(s), TypeTag::Str) => {
            write_len(out, s.len())?;
            out.extend_from_slice(s.as_bytes());
        }
        (ShareableValue::Pos2(p), TypeTag::Pos2) => {
            out.extend_from_slice(&p.x.to_le_bytes());
            out.extend_from_slice(&p.y.to_le_bytes());
        }
        (ShareableValue::Pos3(p), TypeTag::Pos3) => {
            out.extend_from_slice(&p.x.to_le_bytes());
            out.extend_from_slice(&p.y.to_le_bytes());
            out.extend_from_slice(&p.z.to_le_bytes());
        }
        (ShareableValue::Seq(items), TypeTag::Seq(inner)) => {
            write_len(out, items.len())?;
            for (i, item) in items.iter().enumerate() {
                write_value(out, item, inner, &format!("{}[{}]", path, i))?;
            }
        }
        (ShareableValue::Record(record), TypeTag::Record(schema)) => {
            write_record(out, record, schema, path)?;
        }
        (value, tag) => {
            return Err(MarshalError::SchemaMismatch(format!(
                "field `{}`: expected {}, got {}",
                path,
                tag,
                value.kind_name()
            )))
        }
    }
    Ok(())
}

/// 字节读取器
struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> MarshalResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(MarshalError::Decode(format!(
                "unexpected end of payload at byte {} (need {}, have {})",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> MarshalResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn array4(&mut self) -> MarshalResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(buf)
    }

    fn u32(&mut self) -> MarshalResult<u32> {
        Ok(u32::from_le_bytes(self.array4()?))
    }

    fn i32(&mut self) -> MarshalResult<i32> {
        Ok(i32::from_le_bytes(self.array4()?))
    }

    fn f32(&mut self) -> MarshalResult<f32> {
        Ok(f32::from_le_bytes(self.array4()?))
    }

    /// 读取长度前缀，并确认剩余字节足以容纳 `min_item` 大小的元素
    fn len(&mut self, min_item: usize) -> MarshalResult<usize> {
        let len = self.u32()? as usize;
        if len.saturating_mul(min_item) > self.remaining() {
            return Err(MarshalError::Decode(format!(
                "declared length {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        Ok(len)
    }
}

fn read_record(reader: &mut WireReader<'_>, schema: &Schema, path: &str) -> MarshalResult<Record> {
    let count = reader.u32()? as usize;
    if count != schema.len() {
        return Err(MarshalError::SchemaMismatch(format!(
            "{}: stream declares {} fields, schema expects {}",
            if path.is_empty() { "payload" } else { path },
            count,
            schema.len()
        )));
    }
    let mut record = Record::new();
    for field in schema.fields() {
        let field_path = path_of(path, &field.name);
        let value = read_value(reader, &field.tag, &field_path)?;
        record.insert(&field.name, value);
    }
    Ok(record)
}

fn read_value(reader: &mut WireReader<'_>, tag: &TypeTag, path: &str) -> MarshalResult<ShareableValue> {
    let actual = reader.u8()?;
    let expected = tag_byte(tag);
    if actual != expected {
        return Err(MarshalError::SchemaMismatch(format!(
            "field `{}`: expected tag {} ({}), stream has tag {}",
            path, expected, tag, actual
        )));
    }
    let value = match tag {
        TypeTag::Bool => match reader.u8()? {
            0 => ShareableValue::Bool(false),
            1 => ShareableValue::Bool(true),
            other => {
                return Err(MarshalError::Decode(format!(
                    "field `{}`: invalid bool byte {}",
                    path, other
                )))
            }
        },
        TypeTag::Int => ShareableValue::Int(reader.i32()?),
        TypeTag::Float => ShareableValue::Float(reader.f32()?),
        TypeTag::Str => {
            let len = reader.len(1)?;
            let bytes = reader.take(len)?;
            let text = std::str::from_utf8(bytes).map_err(|e| {
                MarshalError::Decode(format!("field `{}`: invalid UTF-8: {}", path, e))
            })?;
            ShareableValue::Str(text.to_owned())
        }
        TypeTag::Pos2 => {
            let x = reader.f32()?;
            let y = reader.f32()?;
            ShareableValue::Pos2(Vec2::new(x, y))
        }
        TypeTag::Pos3 => {
            let x = reader.f32()?;
            let y = reader.f32()?;
            let z = reader.f32()?;
            ShareableValue::Pos3(Vec3::new(x, y, z))
        }
        TypeTag::Seq(inner) => {
            // 每个元素至少有一个标签字节
            let len = reader.len(1)?;
            let mut items = Vec::with_capacity(len);
            for i in 0..len {
                items.push(read_value(reader, inner, &format!("{}[{}]", path, i))?);
            }
            ShareableValue::Seq(items)
        }
        TypeTag::Record(schema) => ShareableValue::Record(read_record(reader, schema, path)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn object_settings() -> Schema {
        Schema::new()
            .field("player", TypeTag::Int)
            .field("selections", TypeTag::seq(TypeTag::Str))
            .field(
                "variantgroups",
                TypeTag::seq(TypeTag::seq(TypeTag::Str)),
            )
    }

    fn create_object_schema() -> Schema {
        Schema::new()
            .field("id", TypeTag::Str)
            .field("settings", TypeTag::Record(object_settings()))
            .field("pos", TypeTag::Pos3)
            .field("usetarget", TypeTag::Bool)
            .field("target", TypeTag::Pos3)
            .field("angle", TypeTag::Float)
    }

    fn create_object() -> Record {
        Record::new()
            .with("id", "units/hele_spearman")
            .with(
                "settings",
                Record::new()
                    .with("player", 1)
                    .with("selections", vec!["ranked", "élite"])
                    .with("variantgroups", ShareableValue::Seq(Vec::new())),
            )
            .with("pos", Vec3::new(10.0, 0.0, -4.5))
            .with("usetarget", false)
            .with("target", Vec3::ZERO)
            .with("angle", 1.25f32)
    }

    #[test]
    fn test_round_trip_nested() {
        let schema = create_object_schema();
        let record = create_object();
        let bytes = encode(&record, &schema).unwrap();
        let decoded = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_field_order_follows_schema() {
        let schema = Schema::new()
            .field("a", TypeTag::Int)
            .field("b", TypeTag::Int);
        // 记录按相反顺序构建，线上仍按 schema 顺序
        let forward = Record::new().with("a", 1).with("b", 2);
        let reversed = Record::new().with("b", 2).with("a", 1);
        assert_eq!(
            encode(&forward, &schema).unwrap(),
            encode(&reversed, &schema).unwrap()
        );
    }

    #[test]
    fn test_empty_schema_payload() {
        let schema = Schema::new();
        let bytes = encode(&Record::new(), &schema).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert!(decode(&bytes, &schema).unwrap().is_empty());
    }

    #[test]
    fn test_encode_rejects_wrong_shape() {
        let schema = Schema::new().field("id", TypeTag::Int);
        let err = encode(&Record::new().with("id", "7"), &schema).unwrap_err();
        assert!(matches!(err, MarshalError::SchemaMismatch(_)));

        let err = encode(&Record::new().with("id", 7).with("extra", 1), &schema).unwrap_err();
        assert!(matches!(err, MarshalError::SchemaMismatch(_)));
    }

    #[test]
    fn test_decode_field_count_mismatch() {
        let sender = Schema::new()
            .field("id", TypeTag::Int)
            .field("pos", TypeTag::Pos2);
        let receiver = Schema::new().field("id", TypeTag::Int);
        let bytes = encode(
            &Record::new().with("id", 7).with("pos", Vec2::new(1.0, 2.0)),
            &sender,
        )
        .unwrap();
        assert!(matches!(
            decode(&bytes, &receiver),
            Err(MarshalError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_decode_tag_mismatch() {
        let sender = Schema::new().field("pos", TypeTag::Pos2);
        let receiver = Schema::new().field("pos", TypeTag::Pos3);
        let bytes = encode(&Record::new().with("pos", Vec2::new(1.0, 2.0)), &sender).unwrap();
        assert!(matches!(
            decode(&bytes, &receiver),
            Err(MarshalError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_decode_truncated_and_trailing() {
        let schema = Schema::new().field("name", TypeTag::Str);
        let bytes = encode(&Record::new().with("name", "terrain"), &schema).unwrap();

        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(
            decode(truncated, &schema),
            Err(MarshalError::Decode(_))
        ));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(
            decode(&trailing, &schema),
            Err(MarshalError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_length_prefix() {
        let schema = Schema::new().field("data", TypeTag::seq(TypeTag::Float));
        // count=1, tag=seq, len=u32::MAX
        let mut bytes = vec![1, 0, 0, 0, TAG_SEQ];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode(&bytes, &schema),
            Err(MarshalError::Decode(_))
        ));
    }

    #[test]
    fn test_string_bytes_are_utf8() {
        let schema = Schema::new().field("filename", TypeTag::Str);
        let bytes = encode(&Record::new().with("filename", "maps/Ω.pmp"), &schema).unwrap();
        // count(4) + tag(1) + len(4) + utf8
        assert_eq!(&bytes[5..9], &("maps/Ω.pmp".len() as u32).to_le_bytes());
        assert_eq!(&bytes[9..], "maps/Ω.pmp".as_bytes());
    }

    #[test]
    fn test_payload_limit() {
        let schema = Schema::new().field("data", TypeTag::seq(TypeTag::Float));
        let record = Record::new().with("data", vec![0.5f32; 64]);
        let small = Marshaller::new(32);
        assert!(matches!(
            small.encode(&record, &schema),
            Err(MarshalError::PayloadTooLarge { .. })
        ));
    }

    fn arb_value(depth: u32) -> BoxedStrategy<(TypeTag, ShareableValue)> {
        let leaf = prop_oneof![
            any::<bool>().prop_map(|b| (TypeTag::Bool, ShareableValue::Bool(b))),
            any::<i32>().prop_map(|i| (TypeTag::Int, ShareableValue::Int(i))),
            (-1.0e6f32..1.0e6).prop_map(|f| (TypeTag::Float, ShareableValue::Float(f))),
            ".{0,12}".prop_map(|s| (TypeTag::Str, ShareableValue::Str(s))),
            (-1.0e3f32..1.0e3, -1.0e3f32..1.0e3)
                .prop_map(|(x, y)| (TypeTag::Pos2, ShareableValue::Pos2(Vec2::new(x, y)))),
        ];
        if depth == 0 {
            return leaf.boxed();
        }
        prop_oneof![
            2 => leaf,
            1 => (0usize..4).prop_flat_map(move |n| {
                // 同构序列：所有元素复用第一个元素的类型
                arb_value(depth - 1).prop_flat_map(move |(tag, first)| {
                    let tag_for_rest = tag.clone();
                    proptest::collection::vec(Just(first.clone()), n).prop_map(move |items| {
                        (TypeTag::seq(tag_for_rest.clone()), ShareableValue::Seq(items))
                    })
                })
            }),
            1 => proptest::collection::vec(arb_value(depth - 1), 0..4).prop_map(|fields| {
                let mut schema = Schema::new();
                let mut record = Record::new();
                for (i, (tag, value)) in fields.into_iter().enumerate() {
                    let name = format!("f{}", i);
                    schema = schema.field(&name, tag);
                    record.insert(&name, value);
                }
                (TypeTag::Record(schema), ShareableValue::Record(record))
            }),
        ]
        .boxed()
    }

    proptest! {
        #[test]
        fn round_trip_reproduces_value(fields in proptest::collection::vec(arb_value(2), 0..6)) {
            let mut schema = Schema::new();
            let mut record = Record::new();
            for (i, (tag, value)) in fields.into_iter().enumerate() {
                let name = format!("field{}", i);
                schema = schema.field(&name, tag);
                record.insert(&name, value);
            }
            let bytes = encode(&record, &schema).unwrap();
            let decoded = decode(&bytes, &schema).unwrap();
            prop_assert_eq!(decoded, record);
        }
    }
}

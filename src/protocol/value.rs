//! 可共享值
//!
//! 跨进程边界传递的封闭值类型集合。所有值都是独立拥有的深拷贝，
//! 解码永远不会引用发送方或输入缓冲区的内存。

use glam::{Vec2, Vec3};
use serde_json::{Map, Number, Value};
use std::fmt;

use crate::core::error::{MarshalError, MarshalResult};

/// 值类型标签
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Int,
    Float,
    Str,
    Pos2,
    Pos3,
    /// 同构序列
    Seq(Box<TypeTag>),
    /// 命名字段记录
    Record(Schema),
}

impl TypeTag {
    pub fn seq(element: TypeTag) -> Self {
        TypeTag::Seq(Box::new(element))
    }

    /// 规范文本描述，用于目录指纹
    pub fn canonical(&self) -> String {
        match self {
            TypeTag::Bool => "bool".to_string(),
            TypeTag::Int => "int".to_string(),
            TypeTag::Float => "float".to_string(),
            TypeTag::Str => "str".to_string(),
            TypeTag::Pos2 => "pos2".to_string(),
            TypeTag::Pos3 => "pos3".to_string(),
            TypeTag::Seq(inner) => format!("seq<{}>", inner.canonical()),
            TypeTag::Record(schema) => format!("rec{{{}}}", schema.canonical()),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// 字段定义
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDef {
    pub name: String,
    pub tag: TypeTag,
}

/// 有序字段布局
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字段（构建器风格）
    pub fn field(mut self, name: &str, tag: TypeTag) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            tag,
        });
        self
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn canonical(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}:{}", f.name, f.tag.canonical()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// 可共享值
#[derive(Debug, Clone, PartialEq)]
pub enum ShareableValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Pos2(Vec2),
    Pos3(Vec3),
    Seq(Vec<ShareableValue>),
    Record(Record),
}

impl ShareableValue {
    /// 值的类型名称（用于错误信息）
    pub fn kind_name(&self) -> &'static str {
        match self {
            ShareableValue::Bool(_) => "bool",
            ShareableValue::Int(_) => "int",
            ShareableValue::Float(_) => "float",
            ShareableValue::Str(_) => "str",
            ShareableValue::Pos2(_) => "pos2",
            ShareableValue::Pos3(_) => "pos3",
            ShareableValue::Seq(_) => "seq",
            ShareableValue::Record(_) => "rec",
        }
    }

    /// 检查值是否符合类型标签（递归）
    pub fn matches(&self, tag: &TypeTag) -> bool {
        match (self, tag) {
            (ShareableValue::Bool(_), TypeTag::Bool)
            | (ShareableValue::Int(_), TypeTag::Int)
            | (ShareableValue::Float(_), TypeTag::Float)
            | (ShareableValue::Str(_), TypeTag::Str)
            | (ShareableValue::Pos2(_), TypeTag::Pos2)
            | (ShareableValue::Pos3(_), TypeTag::Pos3) => true,
            (ShareableValue::Seq(items), TypeTag::Seq(inner)) => {
                items.iter().all(|item| item.matches(inner))
            }
            (ShareableValue::Record(record), TypeTag::Record(schema)) => record.matches(schema),
            _ => false,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            ShareableValue::Record(r) => Some(r),
            _ => None,
        }
    }

    /// 转换为脚本宿主使用的 JSON 值
    ///
    /// 位置编码为数组，记录编码为对象。
    pub fn to_json(&self) -> Value {
        match self {
            ShareableValue::Bool(b) => Value::Bool(*b),
            ShareableValue::Int(i) => Value::Number(Number::from(*i)),
            ShareableValue::Float(f) => float_to_json(*f),
            ShareableValue::Str(s) => Value::String(s.clone()),
            ShareableValue::Pos2(p) => Value::Array(vec![float_to_json(p.x), float_to_json(p.y)]),
            ShareableValue::Pos3(p) => Value::Array(vec![
                float_to_json(p.x),
                float_to_json(p.y),
                float_to_json(p.z),
            ]),
            ShareableValue::Seq(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            ShareableValue::Record(record) => {
                let mut map = Map::new();
                for (name, value) in record.iter() {
                    map.insert(name.to_string(), value.to_json());
                }
                Value::Object(map)
            }
        }
    }

    /// 按期望类型从 JSON 值构建
    pub fn from_json(value: &Value, tag: &TypeTag) -> MarshalResult<Self> {
        let mismatch = || {
            MarshalError::SchemaMismatch(format!("expected {}, got json {}", tag, json_kind(value)))
        };
        match tag {
            TypeTag::Bool => value.as_bool().map(ShareableValue::Bool).ok_or_else(mismatch),
            TypeTag::Int => {
                let n = value.as_i64().ok_or_else(mismatch)?;
                i32::try_from(n)
                    .map(ShareableValue::Int)
                    .map_err(|_| MarshalError::SchemaMismatch(format!("integer {} out of range", n)))
            }
            TypeTag::Float => value
                .as_f64()
                .map(|f| ShareableValue::Float(f as f32))
                .ok_or_else(mismatch),
            TypeTag::Str => value
                .as_str()
                .map(|s| ShareableValue::Str(s.to_string()))
                .ok_or_else(mismatch),
            TypeTag::Pos2 => {
                let c = json_floats(value, 2).ok_or_else(mismatch)?;
                Ok(ShareableValue::Pos2(Vec2::new(c[0], c[1])))
            }
            TypeTag::Pos3 => {
                let c = json_floats(value, 3).ok_or_else(mismatch)?;
                Ok(ShareableValue::Pos3(Vec3::new(c[0], c[1], c[2])))
            }
            TypeTag::Seq(inner) => {
                let items = value.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .map(|item| ShareableValue::from_json(item, inner))
                    .collect::<MarshalResult<Vec<_>>>()
                    .map(ShareableValue::Seq)
            }
            TypeTag::Record(schema) => {
                let map = value.as_object().ok_or_else(mismatch)?;
                let mut record = Record::new();
                for field in schema.fields() {
                    let item = map.get(&field.name).ok_or_else(|| {
                        MarshalError::SchemaMismatch(format!("missing field `{}`", field.name))
                    })?;
                    record.insert(&field.name, ShareableValue::from_json(item, &field.tag)?);
                }
                Ok(ShareableValue::Record(record))
            }
        }
    }
}

fn float_to_json(f: f32) -> Value {
    Number::from_f64(f as f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn json_floats(value: &Value, n: usize) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    if items.len() != n {
        return None;
    }
    items.iter().map(|v| v.as_f64().map(|f| f as f32)).collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<bool> for ShareableValue {
    fn from(v: bool) -> Self {
        ShareableValue::Bool(v)
    }
}

impl From<i32> for ShareableValue {
    fn from(v: i32) -> Self {
        ShareableValue::Int(v)
    }
}

impl From<f32> for ShareableValue {
    fn from(v: f32) -> Self {
        ShareableValue::Float(v)
    }
}

impl From<&str> for ShareableValue {
    fn from(v: &str) -> Self {
        ShareableValue::Str(v.to_string())
    }
}

impl From<String> for ShareableValue {
    fn from(v: String) -> Self {
        ShareableValue::Str(v)
    }
}

impl From<Vec2> for ShareableValue {
    fn from(v: Vec2) -> Self {
        ShareableValue::Pos2(v)
    }
}

impl From<Vec3> for ShareableValue {
    fn from(v: Vec3) -> Self {
        ShareableValue::Pos3(v)
    }
}

impl From<Record> for ShareableValue {
    fn from(v: Record) -> Self {
        ShareableValue::Record(v)
    }
}

impl<T: Into<ShareableValue>> From<Vec<T>> for ShareableValue {
    fn from(v: Vec<T>) -> Self {
        ShareableValue::Seq(v.into_iter().map(Into::into).collect())
    }
}

/// 命名字段记录，保持插入顺序
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, ShareableValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字段（构建器风格）
    pub fn with(mut self, name: &str, value: impl Into<ShareableValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// 插入或替换字段
    pub fn insert(&mut self, name: &str, value: impl Into<ShareableValue>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&ShareableValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ShareableValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// 字段名与类型是否与 schema 完全一致（顺序无关，数量必须相同）
    pub fn matches(&self, schema: &Schema) -> bool {
        self.len() == schema.len()
            && schema
                .fields()
                .iter()
                .all(|f| self.get(&f.name).map_or(false, |v| v.matches(&f.tag)))
    }

    fn require(&self, name: &str) -> MarshalResult<&ShareableValue> {
        self.get(name)
            .ok_or_else(|| MarshalError::SchemaMismatch(format!("missing field `{}`", name)))
    }

    pub fn boolean(&self, name: &str) -> MarshalResult<bool> {
        match self.require(name)? {
            ShareableValue::Bool(v) => Ok(*v),
            other => Err(wrong_kind(name, "bool", other)),
        }
    }

    pub fn int(&self, name: &str) -> MarshalResult<i32> {
        match self.require(name)? {
            ShareableValue::Int(v) => Ok(*v),
            other => Err(wrong_kind(name, "int", other)),
        }
    }

    pub fn float(&self, name: &str) -> MarshalResult<f32> {
        match self.require(name)? {
            ShareableValue::Float(v) => Ok(*v),
            other => Err(wrong_kind(name, "float", other)),
        }
    }

    pub fn string(&self, name: &str) -> MarshalResult<&str> {
        match self.require(name)? {
            ShareableValue::Str(v) => Ok(v),
            other => Err(wrong_kind(name, "str", other)),
        }
    }

    pub fn pos2(&self, name: &str) -> MarshalResult<Vec2> {
        match self.require(name)? {
            ShareableValue::Pos2(v) => Ok(*v),
            other => Err(wrong_kind(name, "pos2", other)),
        }
    }

    pub fn pos3(&self, name: &str) -> MarshalResult<Vec3> {
        match self.require(name)? {
            ShareableValue::Pos3(v) => Ok(*v),
            other => Err(wrong_kind(name, "pos3", other)),
        }
    }

    pub fn seq(&self, name: &str) -> MarshalResult<&[ShareableValue]> {
        match self.require(name)? {
            ShareableValue::Seq(v) => Ok(v),
            other => Err(wrong_kind(name, "seq", other)),
        }
    }

    pub fn record(&self, name: &str) -> MarshalResult<&Record> {
        match self.require(name)? {
            ShareableValue::Record(v) => Ok(v),
            other => Err(wrong_kind(name, "rec", other)),
        }
    }

    /// 读取字符串序列
    pub fn strings(&self, name: &str) -> MarshalResult<Vec<String>> {
        self.seq(name)?
            .iter()
            .map(|v| match v {
                ShareableValue::Str(s) => Ok(s.clone()),
                other => Err(wrong_kind(name, "str", other)),
            })
            .collect()
    }

    /// 读取整数序列
    pub fn ints(&self, name: &str) -> MarshalResult<Vec<i32>> {
        self.seq(name)?
            .iter()
            .map(|v| match v {
                ShareableValue::Int(i) => Ok(*i),
                other => Err(wrong_kind(name, "int", other)),
            })
            .collect()
    }

    /// 读取浮点序列
    pub fn floats(&self, name: &str) -> MarshalResult<Vec<f32>> {
        self.seq(name)?
            .iter()
            .map(|v| match v {
                ShareableValue::Float(f) => Ok(*f),
                other => Err(wrong_kind(name, "float", other)),
            })
            .collect()
    }
}

fn wrong_kind(name: &str, expected: &str, actual: &ShareableValue) -> MarshalError {
    MarshalError::SchemaMismatch(format!(
        "field `{}`: expected {}, got {}",
        name,
        expected,
        actual.kind_name()
    ))
}

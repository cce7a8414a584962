//! 协议层
//!
//! - `value` - 可跨边界传递的值模型
//! - `marshal` - 按 schema 编解码
//! - `catalog` - 消息种类注册表
//! - `envelope` - 信封与线上布局
//! - `messages` - 标准编辑器目录与强类型消息

pub mod catalog;
pub mod envelope;
pub mod marshal;
pub mod messages;
pub mod value;

pub use catalog::{control, Category, MergePolicy, MessageCatalog, MessageKind};
pub use envelope::{Envelope, EnvelopeCategory};
pub use marshal::{Marshaller, DEFAULT_MAX_PAYLOAD};
pub use messages::{editor_catalog, Message, QueryMessage, RecordType};
pub use value::{FieldDef, Record, Schema, ShareableValue, TypeTag};

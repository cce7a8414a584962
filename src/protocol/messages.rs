//! 标准编辑器消息目录
//!
//! 编辑器与模拟端之间使用的全部消息种类，以及常用消息的强类型封装。
//! 世界坐标使用 `Pos3`，屏幕坐标使用 `Pos2`。

use glam::{Vec2, Vec3};

use super::catalog::{control, MergePolicy, MessageCatalog, MessageKind};
use super::value::{Record, Schema, ShareableValue, TypeTag};
use crate::core::error::{CatalogResult, MarshalError, MarshalResult};
use crate::impl_default;

/// 可与 `Record` 互转的类型
pub trait RecordType: Sized {
    fn schema() -> Schema;
    fn to_record(&self) -> Record;
    fn from_record(record: &Record) -> MarshalResult<Self>;
}

/// 带固定 type id 的消息
pub trait Message: RecordType {
    const TYPE_ID: u32;
}

/// 查询消息及其结果类型
pub trait QueryMessage: Message {
    type Response: RecordType;
}

/// 消息 type id
pub mod ids {
    // 通知
    pub const INIT: u32 = 1;
    pub const SHUTDOWN: u32 = 2;
    pub const RENDER_ENABLE: u32 = 3;
    pub const RESIZE_SCREEN: u32 = 4;
    pub const GENERATE_MAP: u32 = 5;
    pub const LOAD_MAP: u32 = 6;
    pub const SAVE_MAP: u32 = 7;
    pub const RENDER_STYLE: u32 = 8;
    pub const MESSAGE_TRACE: u32 = 9;
    pub const SCREENSHOT: u32 = 10;
    pub const BRUSH: u32 = 11;
    pub const BRUSH_PREVIEW: u32 = 12;
    pub const OBJECT_PREVIEW: u32 = 13;
    pub const SCROLL_CONSTANT: u32 = 14;
    pub const SCROLL: u32 = 15;
    pub const SMOOTH_ZOOM: u32 = 16;
    pub const ROTATE_AROUND: u32 = 17;
    pub const SET_SELECTION_PREVIEW: u32 = 18;

    // 查询
    pub const GET_TERRAIN_GROUPS: u32 = 30;
    pub const GET_TERRAIN_GROUP_PREVIEWS: u32 = 31;
    pub const GET_OBJECTS_LIST: u32 = 32;
    pub const EXIT: u32 = 33;
    pub const GET_ENVIRONMENT_SETTINGS: u32 = 34;
    pub const PICK_OBJECT: u32 = 35;
    pub const GET_OBJECT_SETTINGS: u32 = 36;

    // 命令
    pub const CREATE_OBJECT: u32 = 50;
    pub const SET_ENVIRONMENT_SETTINGS: u32 = 51;
    pub const ALTER_ELEVATION: u32 = 52;
    pub const FLATTEN_ELEVATION: u32 = 53;
    pub const PAINT_TERRAIN: u32 = 54;
    pub const MOVE_OBJECT: u32 = 55;
    pub const ROTATE_OBJECT: u32 = 56;
    pub const DELETE_OBJECT: u32 = 57;
    pub const SET_OBJECT_SETTINGS: u32 = 58;
}

/// 地形绘制优先级
pub mod paint_priority {
    pub const HIGH: i32 = 0;
    pub const LOW: i32 = 1;
}

/// 无效对象 id
pub const INVALID_OBJECT: i32 = -1;

pub fn object_id_is_valid(id: i32) -> bool {
    id >= 0
}

fn record_tag<T: RecordType>() -> TypeTag {
    TypeTag::Record(T::schema())
}

fn nested<T: RecordType>(record: &Record, name: &str) -> MarshalResult<T> {
    T::from_record(record.record(name)?)
}

fn nested_list<T: RecordType>(record: &Record, name: &str) -> MarshalResult<Vec<T>> {
    record
        .seq(name)?
        .iter()
        .map(|item| match item {
            ShareableValue::Record(r) => T::from_record(r),
            other => Err(MarshalError::SchemaMismatch(format!(
                "field `{}`: expected rec, got {}",
                name,
                other.kind_name()
            ))),
        })
        .collect()
}

/// 对象设置
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSettings {
    pub player: i32,
    pub selections: Vec<String>,
    /// 只读，编辑器发往模拟端时应为空
    pub variant_groups: Vec<Vec<String>>,
}

impl RecordType for ObjectSettings {
    fn schema() -> Schema {
        Schema::new()
            .field("player", TypeTag::Int)
            .field("selections", TypeTag::seq(TypeTag::Str))
            .field("variantgroups", TypeTag::seq(TypeTag::seq(TypeTag::Str)))
    }

    fn to_record(&self) -> Record {
        let groups: Vec<ShareableValue> = self
            .variant_groups
            .iter()
            .map(|g| ShareableValue::from(g.clone()))
            .collect();
        Record::new()
            .with("player", self.player)
            .with("selections", self.selections.clone())
            .with("variantgroups", ShareableValue::Seq(groups))
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        let variant_groups = record
            .seq("variantgroups")?
            .iter()
            .map(|group| match group {
                ShareableValue::Seq(items) => items
                    .iter()
                    .map(|v| match v {
                        ShareableValue::Str(s) => Ok(s.clone()),
                        other => Err(MarshalError::SchemaMismatch(format!(
                            "variantgroups: expected str, got {}",
                            other.kind_name()
                        ))),
                    })
                    .collect(),
                other => Err(MarshalError::SchemaMismatch(format!(
                    "variantgroups: expected seq, got {}",
                    other.kind_name()
                ))),
            })
            .collect::<MarshalResult<Vec<Vec<String>>>>()?;
        Ok(Self {
            player: record.int("player")?,
            selections: record.strings("selections")?,
            variant_groups,
        })
    }
}

/// 环境设置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentSettings {
    /// 0..1 对应地形最低到最高，允许越界
    pub water_height: f32,
    pub water_shininess: f32,
    pub water_waviness: f32,
    /// 0..2π
    pub sun_rotation: f32,
    /// -π/2..π/2
    pub sun_elevation: f32,
}

impl_default!(EnvironmentSettings {
    water_height: 0.2,
    water_shininess: 150.0,
    water_waviness: 8.0,
    sun_rotation: 0.0,
    sun_elevation: std::f32::consts::FRAC_PI_4,
});

impl RecordType for EnvironmentSettings {
    fn schema() -> Schema {
        Schema::new()
            .field("water_height", TypeTag::Float)
            .field("water_shininess", TypeTag::Float)
            .field("water_waviness", TypeTag::Float)
            .field("sun_rotation", TypeTag::Float)
            .field("sun_elevation", TypeTag::Float)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("water_height", self.water_height)
            .with("water_shininess", self.water_shininess)
            .with("water_waviness", self.water_waviness)
            .with("sun_rotation", self.sun_rotation)
            .with("sun_elevation", self.sun_elevation)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            water_height: record.float("water_height")?,
            water_shininess: record.float("water_shininess")?,
            water_waviness: record.float("water_waviness")?,
            sun_rotation: record.float("sun_rotation")?,
            sun_elevation: record.float("sun_elevation")?,
        })
    }
}

/// 对象列表项
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectListItem {
    pub id: i32,
    pub name: String,
    /// 0 = entity, 1 = actor
    pub kind: i32,
}

impl RecordType for ObjectListItem {
    fn schema() -> Schema {
        Schema::new()
            .field("id", TypeTag::Int)
            .field("name", TypeTag::Str)
            .field("type", TypeTag::Int)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("type", self.kind)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            id: record.int("id")?,
            name: record.string("name")?.to_string(),
            kind: record.int("type")?,
        })
    }
}

/// 地形组预览
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainGroupPreview {
    pub name: String,
    /// RGB，每个分量一个整数
    pub image_data: Vec<i32>,
}

impl RecordType for TerrainGroupPreview {
    fn schema() -> Schema {
        Schema::new()
            .field("name", TypeTag::Str)
            .field("imagedata", TypeTag::seq(TypeTag::Int))
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("name", self.name.as_str())
            .with("imagedata", self.image_data.clone())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            name: record.string("name")?.to_string(),
            image_data: record.ints("imagedata")?,
        })
    }
}

/// 无字段消息或空结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack;

impl RecordType for Ack {
    fn schema() -> Schema {
        Schema::new()
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_record: &Record) -> MarshalResult<Self> {
        Ok(Ack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Init;

impl RecordType for Init {
    fn schema() -> Schema {
        Schema::new()
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_record: &Record) -> MarshalResult<Self> {
        Ok(Init)
    }
}

impl Message for Init {
    const TYPE_ID: u32 = ids::INIT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shutdown;

impl RecordType for Shutdown {
    fn schema() -> Schema {
        Schema::new()
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_record: &Record) -> MarshalResult<Self> {
        Ok(Shutdown)
    }
}

impl Message for Shutdown {
    const TYPE_ID: u32 = ids::SHUTDOWN;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderEnable {
    pub enabled: bool,
}

impl RecordType for RenderEnable {
    fn schema() -> Schema {
        Schema::new().field("enabled", TypeTag::Bool)
    }

    fn to_record(&self) -> Record {
        Record::new().with("enabled", self.enabled)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            enabled: record.boolean("enabled")?,
        })
    }
}

impl Message for RenderEnable {
    const TYPE_ID: u32 = ids::RENDER_ENABLE;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeScreen {
    pub width: i32,
    pub height: i32,
}

impl RecordType for ResizeScreen {
    fn schema() -> Schema {
        Schema::new()
            .field("width", TypeTag::Int)
            .field("height", TypeTag::Int)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("width", self.width)
            .with("height", self.height)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            width: record.int("width")?,
            height: record.int("height")?,
        })
    }
}

impl Message for ResizeScreen {
    const TYPE_ID: u32 = ids::RESIZE_SCREEN;
}

/// 生成空白地图，尺寸以 patch 为单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateMap {
    pub size: i32,
}

impl RecordType for GenerateMap {
    fn schema() -> Schema {
        Schema::new().field("size", TypeTag::Int)
    }

    fn to_record(&self) -> Record {
        Record::new().with("size", self.size)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            size: record.int("size")?,
        })
    }
}

impl Message for GenerateMap {
    const TYPE_ID: u32 = ids::GENERATE_MAP;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTrace {
    pub enable: bool,
}

impl RecordType for MessageTrace {
    fn schema() -> Schema {
        Schema::new().field("enable", TypeTag::Bool)
    }

    fn to_record(&self) -> Record {
        Record::new().with("enable", self.enable)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            enable: record.boolean("enable")?,
        })
    }
}

impl Message for MessageTrace {
    const TYPE_ID: u32 = ids::MESSAGE_TRACE;
}

/// 笔刷形状，`data` 为 width*height 的权重
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub width: i32,
    pub height: i32,
    pub data: Vec<f32>,
}

impl RecordType for Brush {
    fn schema() -> Schema {
        Schema::new()
            .field("width", TypeTag::Int)
            .field("height", TypeTag::Int)
            .field("data", TypeTag::seq(TypeTag::Float))
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("width", self.width)
            .with("height", self.height)
            .with("data", self.data.clone())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            width: record.int("width")?,
            height: record.int("height")?,
            data: record.floats("data")?,
        })
    }
}

impl Message for Brush {
    const TYPE_ID: u32 = ids::BRUSH;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSelectionPreview {
    pub ids: Vec<i32>,
}

impl RecordType for SetSelectionPreview {
    fn schema() -> Schema {
        Schema::new().field("ids", TypeTag::seq(TypeTag::Int))
    }

    fn to_record(&self) -> Record {
        Record::new().with("ids", self.ids.clone())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            ids: record.ints("ids")?,
        })
    }
}

impl Message for SetSelectionPreview {
    const TYPE_ID: u32 = ids::SET_SELECTION_PREVIEW;
}

// ---- 查询 ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetTerrainGroups;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TerrainGroups {
    pub group_names: Vec<String>,
}

impl RecordType for GetTerrainGroups {
    fn schema() -> Schema {
        Schema::new()
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_record: &Record) -> MarshalResult<Self> {
        Ok(GetTerrainGroups)
    }
}

impl RecordType for TerrainGroups {
    fn schema() -> Schema {
        Schema::new().field("groupnames", TypeTag::seq(TypeTag::Str))
    }

    fn to_record(&self) -> Record {
        Record::new().with("groupnames", self.group_names.clone())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            group_names: record.strings("groupnames")?,
        })
    }
}

impl Message for GetTerrainGroups {
    const TYPE_ID: u32 = ids::GET_TERRAIN_GROUPS;
}

impl QueryMessage for GetTerrainGroups {
    type Response = TerrainGroups;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetObjectsList;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectsList {
    pub objects: Vec<ObjectListItem>,
}

impl RecordType for GetObjectsList {
    fn schema() -> Schema {
        Schema::new()
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_record: &Record) -> MarshalResult<Self> {
        Ok(GetObjectsList)
    }
}

impl RecordType for ObjectsList {
    fn schema() -> Schema {
        Schema::new().field("objects", TypeTag::seq(record_tag::<ObjectListItem>()))
    }

    fn to_record(&self) -> Record {
        let items: Vec<ShareableValue> = self
            .objects
            .iter()
            .map(|o| ShareableValue::Record(o.to_record()))
            .collect();
        Record::new().with("objects", ShareableValue::Seq(items))
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            objects: nested_list(record, "objects")?,
        })
    }
}

impl Message for GetObjectsList {
    const TYPE_ID: u32 = ids::GET_OBJECTS_LIST;
}

impl QueryMessage for GetObjectsList {
    type Response = ObjectsList;
}

/// 请求模拟端退出，响应表示已确认
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Exit;

impl RecordType for Exit {
    fn schema() -> Schema {
        Schema::new()
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_record: &Record) -> MarshalResult<Self> {
        Ok(Exit)
    }
}

impl Message for Exit {
    const TYPE_ID: u32 = ids::EXIT;
}

impl QueryMessage for Exit {
    type Response = Ack;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetEnvironmentSettings;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnvironmentReply {
    pub settings: EnvironmentSettings,
}

impl RecordType for GetEnvironmentSettings {
    fn schema() -> Schema {
        Schema::new()
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_record: &Record) -> MarshalResult<Self> {
        Ok(GetEnvironmentSettings)
    }
}

impl RecordType for EnvironmentReply {
    fn schema() -> Schema {
        Schema::new().field("settings", record_tag::<EnvironmentSettings>())
    }

    fn to_record(&self) -> Record {
        Record::new().with("settings", self.settings.to_record())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            settings: nested(record, "settings")?,
        })
    }
}

impl Message for GetEnvironmentSettings {
    const TYPE_ID: u32 = ids::GET_ENVIRONMENT_SETTINGS;
}

impl QueryMessage for GetEnvironmentSettings {
    type Response = EnvironmentReply;
}

/// 按屏幕坐标拾取对象
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickObject {
    pub pos: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickResult {
    /// 未命中时为 `INVALID_OBJECT`
    pub id: i32,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl RecordType for PickObject {
    fn schema() -> Schema {
        Schema::new().field("pos", TypeTag::Pos2)
    }

    fn to_record(&self) -> Record {
        Record::new().with("pos", self.pos)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            pos: record.pos2("pos")?,
        })
    }
}

impl RecordType for PickResult {
    fn schema() -> Schema {
        Schema::new()
            .field("id", TypeTag::Int)
            .field("offsetx", TypeTag::Int)
            .field("offsety", TypeTag::Int)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("offsetx", self.offset_x)
            .with("offsety", self.offset_y)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            id: record.int("id")?,
            offset_x: record.int("offsetx")?,
            offset_y: record.int("offsety")?,
        })
    }
}

impl Message for PickObject {
    const TYPE_ID: u32 = ids::PICK_OBJECT;
}

impl QueryMessage for PickObject {
    type Response = PickResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetObjectSettings {
    pub id: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSettingsReply {
    pub settings: ObjectSettings,
}

impl RecordType for GetObjectSettings {
    fn schema() -> Schema {
        Schema::new().field("id", TypeTag::Int)
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            id: record.int("id")?,
        })
    }
}

impl RecordType for ObjectSettingsReply {
    fn schema() -> Schema {
        Schema::new().field("settings", record_tag::<ObjectSettings>())
    }

    fn to_record(&self) -> Record {
        Record::new().with("settings", self.settings.to_record())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            settings: nested(record, "settings")?,
        })
    }
}

impl Message for GetObjectSettings {
    const TYPE_ID: u32 = ids::GET_OBJECT_SETTINGS;
}

impl QueryMessage for GetObjectSettings {
    type Response = ObjectSettingsReply;
}

/// 目录指纹握手
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub accepted: bool,
    pub fingerprint: String,
}

impl RecordType for Handshake {
    fn schema() -> Schema {
        Schema::new().field("fingerprint", TypeTag::Str)
    }

    fn to_record(&self) -> Record {
        Record::new().with("fingerprint", self.fingerprint.as_str())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            fingerprint: record.string("fingerprint")?.to_string(),
        })
    }
}

impl RecordType for HandshakeReply {
    fn schema() -> Schema {
        Schema::new()
            .field("accepted", TypeTag::Bool)
            .field("fingerprint", TypeTag::Str)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("accepted", self.accepted)
            .with("fingerprint", self.fingerprint.as_str())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            accepted: record.boolean("accepted")?,
            fingerprint: record.string("fingerprint")?.to_string(),
        })
    }
}

impl Message for Handshake {
    const TYPE_ID: u32 = control::HANDSHAKE;
}

impl QueryMessage for Handshake {
    type Response = HandshakeReply;
}

// ---- 命令 ----

/// 放置对象。`use_target` 为真时朝向 `target`，否则使用 `angle`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateObject {
    pub template: String,
    pub settings: ObjectSettings,
    pub pos: Vec3,
    pub use_target: bool,
    pub target: Vec3,
    pub angle: f32,
}

impl RecordType for CreateObject {
    fn schema() -> Schema {
        Schema::new()
            .field("id", TypeTag::Str)
            .field("settings", record_tag::<ObjectSettings>())
            .field("pos", TypeTag::Pos3)
            .field("usetarget", TypeTag::Bool)
            .field("target", TypeTag::Pos3)
            .field("angle", TypeTag::Float)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.template.as_str())
            .with("settings", self.settings.to_record())
            .with("pos", self.pos)
            .with("usetarget", self.use_target)
            .with("target", self.target)
            .with("angle", self.angle)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            template: record.string("id")?.to_string(),
            settings: nested(record, "settings")?,
            pos: record.pos3("pos")?,
            use_target: record.boolean("usetarget")?,
            target: record.pos3("target")?,
            angle: record.float("angle")?,
        })
    }
}

impl Message for CreateObject {
    const TYPE_ID: u32 = ids::CREATE_OBJECT;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetEnvironmentSettings {
    pub settings: EnvironmentSettings,
}

impl RecordType for SetEnvironmentSettings {
    fn schema() -> Schema {
        Schema::new().field("settings", record_tag::<EnvironmentSettings>())
    }

    fn to_record(&self) -> Record {
        Record::new().with("settings", self.settings.to_record())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            settings: nested(record, "settings")?,
        })
    }
}

impl Message for SetEnvironmentSettings {
    const TYPE_ID: u32 = ids::SET_ENVIRONMENT_SETTINGS;
}

/// 以 `pos` 为中心按当前笔刷升降地形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlterElevation {
    pub pos: Vec3,
    pub amount: f32,
}

impl RecordType for AlterElevation {
    fn schema() -> Schema {
        elevation_schema()
    }

    fn to_record(&self) -> Record {
        Record::new().with("pos", self.pos).with("amount", self.amount)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            pos: record.pos3("pos")?,
            amount: record.float("amount")?,
        })
    }
}

impl Message for AlterElevation {
    const TYPE_ID: u32 = ids::ALTER_ELEVATION;
}

/// 将笔刷范围内的地形向中心高度拉平
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlattenElevation {
    pub pos: Vec3,
    pub amount: f32,
}

impl RecordType for FlattenElevation {
    fn schema() -> Schema {
        elevation_schema()
    }

    fn to_record(&self) -> Record {
        Record::new().with("pos", self.pos).with("amount", self.amount)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            pos: record.pos3("pos")?,
            amount: record.float("amount")?,
        })
    }
}

impl Message for FlattenElevation {
    const TYPE_ID: u32 = ids::FLATTEN_ELEVATION;
}

fn elevation_schema() -> Schema {
    Schema::new()
        .field("pos", TypeTag::Pos3)
        .field("amount", TypeTag::Float)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaintTerrain {
    pub pos: Vec3,
    pub texture: String,
    /// `paint_priority::HIGH` 或 `paint_priority::LOW`
    pub priority: i32,
}

impl RecordType for PaintTerrain {
    fn schema() -> Schema {
        Schema::new()
            .field("pos", TypeTag::Pos3)
            .field("texture", TypeTag::Str)
            .field("priority", TypeTag::Int)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("pos", self.pos)
            .with("texture", self.texture.as_str())
            .with("priority", self.priority)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            pos: record.pos3("pos")?,
            texture: record.string("texture")?.to_string(),
            priority: record.int("priority")?,
        })
    }
}

impl Message for PaintTerrain {
    const TYPE_ID: u32 = ids::PAINT_TERRAIN;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveObject {
    pub id: i32,
    pub pos: Vec3,
}

impl RecordType for MoveObject {
    fn schema() -> Schema {
        Schema::new()
            .field("id", TypeTag::Int)
            .field("pos", TypeTag::Pos3)
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id).with("pos", self.pos)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            id: record.int("id")?,
            pos: record.pos3("pos")?,
        })
    }
}

impl Message for MoveObject {
    const TYPE_ID: u32 = ids::MOVE_OBJECT;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotateObject {
    pub id: i32,
    pub use_target: bool,
    pub target: Vec3,
    pub angle: f32,
}

impl RecordType for RotateObject {
    fn schema() -> Schema {
        Schema::new()
            .field("id", TypeTag::Int)
            .field("usetarget", TypeTag::Bool)
            .field("target", TypeTag::Pos3)
            .field("angle", TypeTag::Float)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("usetarget", self.use_target)
            .with("target", self.target)
            .with("angle", self.angle)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            id: record.int("id")?,
            use_target: record.boolean("usetarget")?,
            target: record.pos3("target")?,
            angle: record.float("angle")?,
        })
    }
}

impl Message for RotateObject {
    const TYPE_ID: u32 = ids::ROTATE_OBJECT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteObject {
    pub id: i32,
}

impl RecordType for DeleteObject {
    fn schema() -> Schema {
        Schema::new().field("id", TypeTag::Int)
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id)
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            id: record.int("id")?,
        })
    }
}

impl Message for DeleteObject {
    const TYPE_ID: u32 = ids::DELETE_OBJECT;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetObjectSettings {
    pub id: i32,
    pub settings: ObjectSettings,
}

impl RecordType for SetObjectSettings {
    fn schema() -> Schema {
        Schema::new()
            .field("id", TypeTag::Int)
            .field("settings", record_tag::<ObjectSettings>())
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("settings", self.settings.to_record())
    }

    fn from_record(record: &Record) -> MarshalResult<Self> {
        Ok(Self {
            id: record.int("id")?,
            settings: nested(record, "settings")?,
        })
    }
}

impl Message for SetObjectSettings {
    const TYPE_ID: u32 = ids::SET_OBJECT_SETTINGS;
}

fn notification<T: Message>(name: &str) -> MessageKind {
    MessageKind::notification(T::TYPE_ID, name, T::schema())
}

fn query<T: QueryMessage>(name: &str) -> MessageKind {
    MessageKind::query(T::TYPE_ID, name, T::schema(), T::Response::schema())
}

fn command<T: Message>(name: &str, merge: MergePolicy) -> MessageKind {
    MessageKind::command(T::TYPE_ID, name, merge, T::schema())
}

/// 构建标准编辑器目录
pub fn editor_catalog() -> CatalogResult<MessageCatalog> {
    use MergePolicy::{MergeableWithPrevious as Merge, None as NoMerge};

    let position = Schema::new()
        .field("enable", TypeTag::Bool)
        .field("pos", TypeTag::Pos3);
    let object_preview = Schema::new()
        .field("id", TypeTag::Str)
        .field("settings", record_tag::<ObjectSettings>())
        .field("pos", TypeTag::Pos3)
        .field("usetarget", TypeTag::Bool)
        .field("target", TypeTag::Pos3)
        .field("angle", TypeTag::Float);
    let screen_drag = || {
        Schema::new()
            .field("type", TypeTag::Int)
            .field("pos", TypeTag::Pos2)
    };
    let filename = || Schema::new().field("filename", TypeTag::Str);

    let kinds = vec![
        notification::<Init>("Init"),
        notification::<Shutdown>("Shutdown"),
        notification::<RenderEnable>("RenderEnable"),
        notification::<ResizeScreen>("ResizeScreen"),
        notification::<GenerateMap>("GenerateMap"),
        MessageKind::notification(ids::LOAD_MAP, "LoadMap", filename()),
        MessageKind::notification(ids::SAVE_MAP, "SaveMap", filename()),
        MessageKind::notification(
            ids::RENDER_STYLE,
            "RenderStyle",
            Schema::new().field("wireframe", TypeTag::Bool),
        ),
        notification::<MessageTrace>("MessageTrace"),
        MessageKind::notification(
            ids::SCREENSHOT,
            "Screenshot",
            Schema::new().field("tiles", TypeTag::Int),
        ),
        notification::<Brush>("Brush"),
        MessageKind::notification(ids::BRUSH_PREVIEW, "BrushPreview", position),
        MessageKind::notification(ids::OBJECT_PREVIEW, "ObjectPreview", object_preview),
        MessageKind::notification(
            ids::SCROLL_CONSTANT,
            "ScrollConstant",
            Schema::new()
                .field("dir", TypeTag::Int)
                .field("speed", TypeTag::Float),
        ),
        MessageKind::notification(ids::SCROLL, "Scroll", screen_drag()),
        MessageKind::notification(
            ids::SMOOTH_ZOOM,
            "SmoothZoom",
            Schema::new().field("amount", TypeTag::Float),
        ),
        MessageKind::notification(ids::ROTATE_AROUND, "RotateAround", screen_drag()),
        notification::<SetSelectionPreview>("SetSelectionPreview"),
        query::<GetTerrainGroups>("GetTerrainGroups"),
        MessageKind::query(
            ids::GET_TERRAIN_GROUP_PREVIEWS,
            "GetTerrainGroupPreviews",
            Schema::new()
                .field("groupname", TypeTag::Str)
                .field("imagewidth", TypeTag::Int)
                .field("imageheight", TypeTag::Int),
            Schema::new().field(
                "previews",
                TypeTag::seq(record_tag::<TerrainGroupPreview>()),
            ),
        ),
        query::<GetObjectsList>("GetObjectsList"),
        query::<Exit>("Exit"),
        query::<GetEnvironmentSettings>("GetEnvironmentSettings"),
        query::<PickObject>("PickObject"),
        query::<GetObjectSettings>("GetObjectSettings"),
        command::<CreateObject>("CreateObject", NoMerge),
        command::<SetEnvironmentSettings>("SetEnvironmentSettings", Merge),
        command::<AlterElevation>("AlterElevation", Merge),
        command::<FlattenElevation>("FlattenElevation", Merge),
        command::<PaintTerrain>("PaintTerrain", Merge),
        command::<MoveObject>("MoveObject", Merge),
        command::<RotateObject>("RotateObject", Merge),
        command::<DeleteObject>("DeleteObject", NoMerge),
        command::<SetObjectSettings>("SetObjectSettings", NoMerge),
    ];

    let mut catalog = MessageCatalog::new();
    for kind in kinds {
        catalog.register(kind)?;
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::catalog::Category;
    use crate::protocol::marshal::{decode, encode};

    #[test]
    fn test_editor_catalog_builds() {
        let catalog = editor_catalog().unwrap();
        // 18 通知 + 7 查询 + 9 命令 + 5 控制消息
        assert_eq!(catalog.len(), 39);

        let paint = catalog.lookup_name("PaintTerrain").unwrap();
        assert_eq!(paint.category, Category::Command);
        assert!(paint.is_mergeable());

        let delete = catalog.lookup(ids::DELETE_OBJECT).unwrap();
        assert_eq!(delete.merge, MergePolicy::None);

        let list = catalog.lookup(ids::GET_OBJECTS_LIST).unwrap();
        assert_eq!(list.category, Category::Query);
        assert_eq!(list.response, ObjectsList::schema());
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = editor_catalog().unwrap().fingerprint();
        let b = editor_catalog().unwrap().fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_typed_record_matches_schema() {
        let create = CreateObject {
            template: "units/hele_infantry".to_string(),
            settings: ObjectSettings {
                player: 1,
                selections: vec!["a".to_string()],
                variant_groups: vec![],
            },
            pos: Vec3::new(1.0, 0.0, 2.0),
            use_target: false,
            target: Vec3::ZERO,
            angle: 0.5,
        };
        let record = create.to_record();
        assert!(record.matches(&CreateObject::schema()));

        let bytes = encode(&record, &CreateObject::schema()).unwrap();
        let back = CreateObject::from_record(&decode(&bytes, &CreateObject::schema()).unwrap())
            .unwrap();
        assert_eq!(back, create);
    }

    #[test]
    fn test_object_settings_nested_groups() {
        let settings = ObjectSettings {
            player: 2,
            selections: vec![],
            variant_groups: vec![
                vec!["red".to_string(), "blue".to_string()],
                vec![],
            ],
        };
        let back = ObjectSettings::from_record(&settings.to_record()).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_from_record_reports_missing_field() {
        let err = MoveObject::from_record(&Record::new().with("id", 3)).unwrap_err();
        assert!(matches!(err, MarshalError::SchemaMismatch(_)));
    }

    #[test]
    fn test_object_id_validity() {
        assert!(object_id_is_valid(0));
        assert!(!object_id_is_valid(INVALID_OBJECT));
    }
}

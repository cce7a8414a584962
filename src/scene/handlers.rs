//! 标准消息目录在模拟侧的处理器

use glam::Vec3;

use crate::command::CommandHandler;
use crate::core::error::{DispatchResult, HandlerError};
use crate::dispatch::Dispatcher;
use crate::protocol::messages::{
    ids, paint_priority, Ack, AlterElevation, Brush, CreateObject, DeleteObject, EnvironmentReply,
    EnvironmentSettings, Exit, FlattenElevation, GenerateMap, GetEnvironmentSettings,
    GetObjectSettings, GetObjectsList, GetTerrainGroups, Init, MessageTrace, MoveObject,
    ObjectSettings, ObjectSettingsReply, ObjectsList, PaintTerrain, PickObject, PickResult,
    RecordType, RenderEnable, ResizeScreen, RotateObject, SetEnvironmentSettings,
    SetObjectSettings, SetSelectionPreview, Shutdown, TerrainGroupPreview, TerrainGroups,
};
use crate::protocol::value::{Record, ShareableValue};
use crate::scene::serialization::SerializedMap;
use crate::scene::state::{facing, BrushShape, SceneObject, SceneState, Tile};

/// 地形组预览图的最大边长
pub const MAX_PREVIEW_SIZE: i32 = 256;

/// 为标准目录注册全部处理器
pub fn register_handlers(dispatcher: &mut Dispatcher<SceneState>) -> DispatchResult<()> {
    register_notifications(dispatcher)?;
    register_queries(dispatcher)?;
    register_commands(dispatcher)
}

fn register_notifications(d: &mut Dispatcher<SceneState>) -> DispatchResult<()> {
    d.on_message(|_: &mut SceneState, _: Init| {
        tracing::info!(target: "bridge.dispatch", "simulation initialised");
        Ok(())
    })?;
    d.on_message(|scene: &mut SceneState, _: Shutdown| {
        scene.exit_requested = true;
        Ok(())
    })?;
    d.on_message(|scene: &mut SceneState, m: RenderEnable| {
        scene.viewport.rendering = m.enabled;
        Ok(())
    })?;
    d.on_message(|scene: &mut SceneState, m: ResizeScreen| {
        if m.width <= 0 || m.height <= 0 {
            return Err(HandlerError::new(format!(
                "invalid screen size {}x{}",
                m.width, m.height
            )));
        }
        scene.viewport.width = m.width;
        scene.viewport.height = m.height;
        Ok(())
    })?;
    d.on_message(|scene: &mut SceneState, m: GenerateMap| {
        if m.size < 1 {
            return Err(HandlerError::new(format!("invalid map size {}", m.size)));
        }
        scene.generate_map(m.size);
        tracing::info!(target: "bridge.dispatch", size = m.size, "map generated");
        Ok(())
    })?;
    d.on_message(|scene: &mut SceneState, m: MessageTrace| {
        scene.message_trace = m.enable;
        Ok(())
    })?;
    d.on_message(|scene: &mut SceneState, m: Brush| {
        let brush = BrushShape {
            width: m.width,
            height: m.height,
            data: m.data,
        };
        if !brush.is_valid() {
            return Err(HandlerError::new(format!(
                "brush {}x{} with {} weights",
                brush.width,
                brush.height,
                brush.data.len()
            )));
        }
        scene.brush = brush;
        Ok(())
    })?;
    d.on_message(|scene: &mut SceneState, m: SetSelectionPreview| {
        scene.selection_preview = m.ids;
        Ok(())
    })?;
    d.on_notification(ids::RENDER_STYLE, |scene, record| {
        scene.viewport.wireframe = record.boolean("wireframe")?;
        Ok(())
    })?;
    d.on_notification(ids::SAVE_MAP, |scene, record| {
        let filename = record.string("filename")?;
        SerializedMap::from_scene(scene).save_to_file(filename)?;
        tracing::info!(target: "bridge.dispatch", filename, "map saved");
        Ok(())
    })?;
    d.on_notification(ids::LOAD_MAP, |scene, record| {
        let filename = record.string("filename")?;
        SerializedMap::load_from_file(filename)?.apply_to(scene)?;
        tracing::info!(target: "bridge.dispatch", filename, "map loaded");
        Ok(())
    })?;
    // 整张地图被替换后旧的撤销历史不再适用
    d.reset_history_on(ids::GENERATE_MAP)?;
    d.reset_history_on(ids::LOAD_MAP)
}

fn register_queries(d: &mut Dispatcher<SceneState>) -> DispatchResult<()> {
    d.on_request(|scene: &mut SceneState, _: GetObjectsList| {
        Ok(ObjectsList {
            objects: scene.object_list(),
        })
    })?;
    d.on_request(|scene: &mut SceneState, _: GetEnvironmentSettings| {
        Ok(EnvironmentReply {
            settings: scene.environment,
        })
    })?;
    d.on_request(|scene: &mut SceneState, q: PickObject| {
        let (id, offset) = scene.pick(q.pos);
        Ok(PickResult {
            id,
            offset_x: offset.x.round() as i32,
            offset_y: offset.y.round() as i32,
        })
    })?;
    d.on_request(|scene: &mut SceneState, q: GetObjectSettings| {
        let object = existing(scene, q.id)?;
        Ok(ObjectSettingsReply {
            settings: object.settings.clone(),
        })
    })?;
    d.on_request(|scene: &mut SceneState, _: GetTerrainGroups| {
        Ok(TerrainGroups {
            group_names: scene.terrain_groups.keys().cloned().collect(),
        })
    })?;
    d.on_query(ids::GET_TERRAIN_GROUP_PREVIEWS, |scene, record| {
        let group = record.string("groupname")?;
        let width = record.int("imagewidth")?;
        let height = record.int("imageheight")?;
        let previews = terrain_previews(scene, group, width, height)?;
        Ok(Record::new().with(
            "previews",
            previews
                .iter()
                .map(|p| ShareableValue::Record(p.to_record()))
                .collect::<Vec<_>>(),
        ))
    })?;
    d.on_request(|scene: &mut SceneState, _: Exit| {
        scene.exit_requested = true;
        Ok(Ack)
    })
}

fn register_commands(d: &mut Dispatcher<SceneState>) -> DispatchResult<()> {
    d.on_command(ids::CREATE_OBJECT, Box::new(CreateObjectHandler))?;
    d.on_command(ids::SET_ENVIRONMENT_SETTINGS, Box::new(EnvironmentHandler))?;
    d.on_command(ids::ALTER_ELEVATION, Box::new(AlterElevationHandler))?;
    d.on_command(ids::FLATTEN_ELEVATION, Box::new(FlattenElevationHandler))?;
    d.on_command(ids::PAINT_TERRAIN, Box::new(PaintTerrainHandler))?;
    d.on_command(ids::MOVE_OBJECT, Box::new(MoveObjectHandler))?;
    d.on_command(ids::ROTATE_OBJECT, Box::new(RotateObjectHandler))?;
    d.on_command(ids::DELETE_OBJECT, Box::new(DeleteObjectHandler))?;
    d.on_command(ids::SET_OBJECT_SETTINGS, Box::new(ObjectSettingsHandler))
}

fn existing(scene: &SceneState, id: i32) -> Result<&SceneObject, HandlerError> {
    scene
        .object(id)
        .ok_or_else(|| HandlerError::new(format!("no object {}", id)))
}

fn same_id(previous: &Record, next: &Record) -> bool {
    matches!((previous.int("id"), next.int("id")), (Ok(a), Ok(b)) if a == b)
}

/// 纹理名生成的纯色预览，RGB 每像素三个整数
fn terrain_previews(
    scene: &SceneState,
    group: &str,
    width: i32,
    height: i32,
) -> Result<Vec<TerrainGroupPreview>, HandlerError> {
    if !(1..=MAX_PREVIEW_SIZE).contains(&width) || !(1..=MAX_PREVIEW_SIZE).contains(&height) {
        return Err(HandlerError::new(format!(
            "preview size {}x{} out of range",
            width, height
        )));
    }
    let textures = scene
        .terrain_groups
        .get(group)
        .ok_or_else(|| HandlerError::new(format!("unknown terrain group {}", group)))?;
    let pixels = (width * height) as usize;
    Ok(textures
        .iter()
        .map(|name| {
            let color = texture_color(name);
            TerrainGroupPreview {
                name: name.clone(),
                image_data: color.iter().copied().cycle().take(pixels * 3).collect(),
            }
        })
        .collect())
}

fn texture_color(name: &str) -> [i32; 3] {
    let hash = name
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    [
        (hash & 0xff) as i32,
        ((hash >> 8) & 0xff) as i32,
        ((hash >> 16) & 0xff) as i32,
    ]
}

fn texture_known(scene: &SceneState, texture: &str) -> bool {
    scene
        .terrain_groups
        .values()
        .any(|textures| textures.iter().any(|t| t == texture))
}

// ---------------------------------------------------------------------------
// 对象编辑
// ---------------------------------------------------------------------------

struct CreateObjectHandler;

impl CommandHandler<SceneState> for CreateObjectHandler {
    /// 前像是即将分配的 id
    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        let create = CreateObject::from_record(fields)?;
        if create.template.is_empty() {
            return Err(HandlerError::new("empty object template"));
        }
        Ok(scene.next_object_id().into())
    }

    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let create = CreateObject::from_record(fields)?;
        let angle = if create.use_target {
            facing(create.pos, create.target)
        } else {
            create.angle
        };
        let id = scene.spawn_object(SceneObject::new(
            create.template,
            create.pos,
            angle,
            create.settings,
        ));
        tracing::debug!(target: "bridge.command", id, "object created");
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        if let ShareableValue::Int(id) = pre_image {
            scene.remove_object(*id);
            scene.next_object_id = *id;
        }
    }
}

struct MoveObjectHandler;

impl CommandHandler<SceneState> for MoveObjectHandler {
    fn can_merge(&self, previous: &Record, next: &Record) -> bool {
        same_id(previous, next)
    }

    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        let id = fields.int("id")?;
        Ok(Record::new()
            .with("id", id)
            .with("pos", existing(scene, id)?.pos)
            .into())
    }

    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let m = MoveObject::from_record(fields)?;
        let object = scene
            .object_mut(m.id)
            .ok_or_else(|| HandlerError::new(format!("no object {}", m.id)))?;
        object.pos = m.pos;
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        if let Some(record) = pre_image.as_record() {
            if let (Ok(id), Ok(pos)) = (record.int("id"), record.pos3("pos")) {
                if let Some(object) = scene.object_mut(id) {
                    object.pos = pos;
                }
            }
        }
    }
}

struct RotateObjectHandler;

impl CommandHandler<SceneState> for RotateObjectHandler {
    fn can_merge(&self, previous: &Record, next: &Record) -> bool {
        same_id(previous, next)
    }

    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        let id = fields.int("id")?;
        Ok(Record::new()
            .with("id", id)
            .with("angle", existing(scene, id)?.angle)
            .into())
    }

    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let r = RotateObject::from_record(fields)?;
        let object = scene
            .object_mut(r.id)
            .ok_or_else(|| HandlerError::new(format!("no object {}", r.id)))?;
        object.angle = if r.use_target {
            facing(object.pos, r.target)
        } else {
            r.angle
        };
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        if let Some(record) = pre_image.as_record() {
            if let (Ok(id), Ok(angle)) = (record.int("id"), record.float("angle")) {
                if let Some(object) = scene.object_mut(id) {
                    object.angle = angle;
                }
            }
        }
    }
}

struct DeleteObjectHandler;

impl CommandHandler<SceneState> for DeleteObjectHandler {
    /// 前像是完整的对象
    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        let id = DeleteObject::from_record(fields)?.id;
        let object = existing(scene, id)?;
        Ok(Record::new()
            .with("id", id)
            .with("template", object.template.as_str())
            .with("pos", object.pos)
            .with("angle", object.angle)
            .with("settings", object.settings.to_record())
            .into())
    }

    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let id = DeleteObject::from_record(fields)?.id;
        scene
            .remove_object(id)
            .map(|_| ())
            .ok_or_else(|| HandlerError::new(format!("no object {}", id)))
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        let Some(record) = pre_image.as_record() else {
            return;
        };
        let restored = (|| -> Result<(i32, SceneObject), HandlerError> {
            Ok((
                record.int("id")?,
                SceneObject::new(
                    record.string("template")?,
                    record.pos3("pos")?,
                    record.float("angle")?,
                    ObjectSettings::from_record(record.record("settings")?)?,
                ),
            ))
        })();
        match restored {
            Ok((id, object)) => scene.insert_object(id, object),
            Err(e) => tracing::warn!(target: "bridge.command", error = %e, "deleted object could not be restored"),
        }
    }
}

struct ObjectSettingsHandler;

impl CommandHandler<SceneState> for ObjectSettingsHandler {
    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        let id = fields.int("id")?;
        Ok(Record::new()
            .with("id", id)
            .with("settings", existing(scene, id)?.settings.to_record())
            .into())
    }

    /// 变体组只读，保持原值
    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let s = SetObjectSettings::from_record(fields)?;
        let object = scene
            .object_mut(s.id)
            .ok_or_else(|| HandlerError::new(format!("no object {}", s.id)))?;
        object.settings.player = s.settings.player;
        object.settings.selections = s.settings.selections;
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        if let Some(record) = pre_image.as_record() {
            let settings = record
                .record("settings")
                .and_then(ObjectSettings::from_record);
            if let (Ok(id), Ok(settings)) = (record.int("id"), settings) {
                if let Some(object) = scene.object_mut(id) {
                    object.settings = settings;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 环境与地形
// ---------------------------------------------------------------------------

struct EnvironmentHandler;

impl CommandHandler<SceneState> for EnvironmentHandler {
    fn capture(&self, scene: &SceneState, _fields: &Record) -> Result<ShareableValue, HandlerError> {
        Ok(scene.environment.to_record().into())
    }

    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        scene.environment = SetEnvironmentSettings::from_record(fields)?.settings;
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        if let Some(settings) = pre_image
            .as_record()
            .and_then(|r| EnvironmentSettings::from_record(r).ok())
        {
            scene.environment = settings;
        }
    }
}

/// 笔刷覆盖且在地图内的格子
fn brush_cells(scene: &SceneState, pos: Vec3) -> Vec<(i32, i32, f32)> {
    let center = scene.terrain.tile_at(pos);
    scene
        .brush
        .footprint(center)
        .into_iter()
        .filter(|(x, z, _)| scene.terrain.height(*x, *z).is_some())
        .collect()
}

fn capture_heights(scene: &SceneState, pos: Vec3) -> ShareableValue {
    let cells: Vec<ShareableValue> = brush_cells(scene, pos)
        .into_iter()
        .filter_map(|(x, z, _)| {
            scene.terrain.height(x, z).map(|h| {
                Record::new()
                    .with("x", x)
                    .with("z", z)
                    .with("height", h)
                    .into()
            })
        })
        .collect();
    ShareableValue::Seq(cells)
}

fn restore_heights(scene: &mut SceneState, pre_image: &ShareableValue) {
    let ShareableValue::Seq(cells) = pre_image else {
        return;
    };
    for cell in cells.iter().filter_map(ShareableValue::as_record) {
        if let (Ok(x), Ok(z), Ok(h)) = (cell.int("x"), cell.int("z"), cell.float("height")) {
            scene.terrain.set_height(x, z, h);
        }
    }
}

struct AlterElevationHandler;

impl CommandHandler<SceneState> for AlterElevationHandler {
    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        Ok(capture_heights(scene, fields.pos3("pos")?))
    }

    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let alter = AlterElevation::from_record(fields)?;
        for (x, z, weight) in brush_cells(scene, alter.pos) {
            if let Some(h) = scene.terrain.height(x, z) {
                scene.terrain.set_height(x, z, h + alter.amount * weight);
            }
        }
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        restore_heights(scene, pre_image);
    }
}

/// 压平会丢失原始起伏，前像保存笔刷覆盖区域的原高度
struct FlattenElevationHandler;

impl CommandHandler<SceneState> for FlattenElevationHandler {
    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        let pos = fields.pos3("pos")?;
        let (cx, cz) = scene.terrain.tile_at(pos);
        if scene.terrain.height(cx, cz).is_none() {
            return Err(HandlerError::new("brush centre is outside the map"));
        }
        Ok(capture_heights(scene, pos))
    }

    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let flatten = FlattenElevation::from_record(fields)?;
        let (cx, cz) = scene.terrain.tile_at(flatten.pos);
        let target = scene
            .terrain
            .height(cx, cz)
            .ok_or_else(|| HandlerError::new("brush centre is outside the map"))?;
        for (x, z, weight) in brush_cells(scene, flatten.pos) {
            if let Some(h) = scene.terrain.height(x, z) {
                let t = (flatten.amount * weight).clamp(0.0, 1.0);
                scene.terrain.set_height(x, z, h + (target - h) * t);
            }
        }
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        restore_heights(scene, pre_image);
    }
}

struct PaintTerrainHandler;

impl CommandHandler<SceneState> for PaintTerrainHandler {
    /// 同一纹理与优先级的连续笔画合并
    fn can_merge(&self, previous: &Record, next: &Record) -> bool {
        previous.string("texture").ok() == next.string("texture").ok()
            && previous.int("priority").ok() == next.int("priority").ok()
    }

    fn capture(&self, scene: &SceneState, fields: &Record) -> Result<ShareableValue, HandlerError> {
        let paint = PaintTerrain::from_record(fields)?;
        if !texture_known(scene, &paint.texture) {
            return Err(HandlerError::new(format!("unknown texture {}", paint.texture)));
        }
        if paint.priority != paint_priority::HIGH && paint.priority != paint_priority::LOW {
            return Err(HandlerError::new(format!("invalid priority {}", paint.priority)));
        }
        let cells = brush_cells(scene, paint.pos)
            .into_iter()
            .filter_map(|(x, z, _)| {
                scene.terrain.tile(x, z).map(|tile| {
                    Record::new()
                        .with("x", x)
                        .with("z", z)
                        .with("texture", tile.texture.as_str())
                        .with("priority", tile.priority)
                        .into()
                })
            })
            .collect();
        Ok(ShareableValue::Seq(cells))
    }

    /// 低优先级笔画不覆盖高优先级铺设的格子
    fn commit(&mut self, scene: &mut SceneState, fields: &Record) -> Result<(), HandlerError> {
        let paint = PaintTerrain::from_record(fields)?;
        for (x, z, _) in brush_cells(scene, paint.pos) {
            let covered = scene
                .terrain
                .tile(x, z)
                .map_or(false, |tile| tile.priority == paint_priority::HIGH);
            if paint.priority == paint_priority::LOW && covered {
                continue;
            }
            scene.terrain.set_tile(
                x,
                z,
                Tile {
                    texture: paint.texture.clone(),
                    priority: paint.priority,
                },
            );
        }
        Ok(())
    }

    fn restore(&mut self, scene: &mut SceneState, pre_image: &ShareableValue) {
        let ShareableValue::Seq(cells) = pre_image else {
            return;
        };
        for cell in cells.iter().filter_map(ShareableValue::as_record) {
            if let (Ok(x), Ok(z), Ok(texture), Ok(priority)) = (
                cell.int("x"),
                cell.int("z"),
                cell.string("texture"),
                cell.int("priority"),
            ) {
                scene.terrain.set_tile(
                    x,
                    z,
                    Tile {
                        texture: texture.to_string(),
                        priority,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::core::error::CommandError;
    use crate::protocol::envelope::Envelope;
    use crate::protocol::messages::{editor_catalog, Message, QueryMessage, INVALID_OBJECT};
    use glam::Vec2;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher<SceneState> {
        let catalog = Arc::new(editor_catalog().unwrap());
        let mut d = Dispatcher::new(catalog, SceneState::new(8), &BridgeConfig::default());
        register_handlers(&mut d).unwrap();
        d
    }

    fn create(d: &mut Dispatcher<SceneState>, template: &str, pos: Vec3) -> i32 {
        let id = d.state().next_object_id();
        d.apply_message(&CreateObject {
            template: template.to_string(),
            settings: ObjectSettings {
                player: 1,
                selections: vec![],
                variant_groups: vec![],
            },
            pos,
            use_target: false,
            target: Vec3::ZERO,
            angle: 0.0,
        })
        .unwrap();
        id
    }

    fn ask<Q: QueryMessage>(d: &mut Dispatcher<SceneState>, q: Q) -> Q::Response {
        d.query_local(&q).unwrap()
    }

    fn notify<M: Message>(d: &mut Dispatcher<SceneState>, message: &M) {
        let payload = crate::protocol::marshal::encode(&message.to_record(), &M::schema()).unwrap();
        d.dispatch(Envelope::notification(M::TYPE_ID, payload)).unwrap();
    }

    fn notify_file(d: &mut Dispatcher<SceneState>, type_id: u32, path: &std::path::Path) {
        let kind = Arc::clone(d.catalog().lookup(type_id).unwrap());
        let record = Record::new().with("filename", path.to_str().unwrap());
        let payload = crate::protocol::marshal::encode(&record, &kind.schema).unwrap();
        d.dispatch(Envelope::notification(type_id, payload)).unwrap();
    }

    #[test]
    fn test_create_and_undo_restores_id() {
        let mut d = dispatcher();
        let id = create(&mut d, "units/hele_infantry", Vec3::new(4.0, 0.0, 4.0));
        assert_eq!(id, 1);
        assert_eq!(d.state().object_count(), 1);

        d.undo().unwrap();
        assert_eq!(d.state().object_count(), 0);
        assert_eq!(d.state().next_object_id(), 1);

        d.redo().unwrap();
        assert_eq!(d.state().object(1).unwrap().template, "units/hele_infantry");
    }

    #[test]
    fn test_move_merges_only_same_object() {
        let mut d = dispatcher();
        let a = create(&mut d, "a", Vec3::ZERO);
        let b = create(&mut d, "b", Vec3::ZERO);
        d.seal();
        let before = d.commands().len();

        for x in 1..=3 {
            d.apply_message(&MoveObject {
                id: a,
                pos: Vec3::new(x as f32, 0.0, 0.0),
            })
            .unwrap();
        }
        d.apply_message(&MoveObject {
            id: b,
            pos: Vec3::new(0.0, 0.0, 5.0),
        })
        .unwrap();
        assert_eq!(d.commands().len(), before + 2);

        d.undo().unwrap();
        d.undo().unwrap();
        assert_eq!(d.state().object(a).unwrap().pos, Vec3::ZERO);
        assert_eq!(d.state().object(b).unwrap().pos, Vec3::ZERO);
    }

    #[test]
    fn test_move_missing_object_rejected() {
        let mut d = dispatcher();
        let err = d
            .apply_message(&MoveObject {
                id: 42,
                pos: Vec3::ONE,
            })
            .unwrap_err();
        assert!(err.to_string().contains("no object 42"));
        assert!(d.commands().is_empty());
    }

    #[test]
    fn test_rotate_towards_target() {
        let mut d = dispatcher();
        let id = create(&mut d, "a", Vec3::ZERO);
        d.apply_message(&RotateObject {
            id,
            use_target: true,
            target: Vec3::new(0.0, 0.0, -3.0),
            angle: 0.0,
        })
        .unwrap();
        let angle = d.state().object(id).unwrap().angle;
        assert!((angle.abs() - std::f32::consts::PI).abs() < 1e-5);
        d.undo().unwrap();
        assert_eq!(d.state().object(id).unwrap().angle, 0.0);
    }

    #[test]
    fn test_delete_undo_restores_object() {
        let mut d = dispatcher();
        let id = create(&mut d, "actor|props/barrel", Vec3::new(2.0, 0.0, 3.0));
        let original = d.state().object(id).unwrap().clone();
        d.apply_message(&DeleteObject { id }).unwrap();
        assert!(d.state().object(id).is_none());
        d.undo().unwrap();
        assert_eq!(d.state().object(id), Some(&original));
    }

    #[test]
    fn test_object_settings_keep_variant_groups() {
        let mut d = dispatcher();
        let id = create(&mut d, "a", Vec3::ZERO);
        d.state_mut().object_mut(id).unwrap().settings.variant_groups = vec![vec!["red".into()]];
        d.apply_message(&SetObjectSettings {
            id,
            settings: ObjectSettings {
                player: 3,
                selections: vec!["winter".into()],
                variant_groups: vec![],
            },
        })
        .unwrap();

        let reply = ask(&mut d, GetObjectSettings { id });
        assert_eq!(reply.settings.player, 3);
        assert_eq!(reply.settings.variant_groups, vec![vec!["red".to_string()]]);

        d.undo().unwrap();
        assert_eq!(ask(&mut d, GetObjectSettings { id }).settings.player, 1);
    }

    #[test]
    fn test_environment_merge_and_undo() {
        let mut d = dispatcher();
        let original = d.state().environment;
        for h in [0.3, 0.4, 0.5] {
            d.apply_message(&SetEnvironmentSettings {
                settings: EnvironmentSettings {
                    water_height: h,
                    ..original
                },
            })
            .unwrap();
        }
        assert_eq!(d.commands().len(), 1);
        assert_eq!(ask(&mut d, GetEnvironmentSettings).settings.water_height, 0.5);
        d.undo().unwrap();
        assert_eq!(d.state().environment, original);
    }

    #[test]
    fn test_paint_stroke_merges_into_one_undo() {
        let mut d = dispatcher();
        let stroke = |x: f32| PaintTerrain {
            pos: Vec3::new(x, 0.0, 1.0),
            texture: "desert_sand".to_string(),
            priority: paint_priority::HIGH,
        };
        for x in [1.0, 5.0, 9.0] {
            d.apply_message(&stroke(x)).unwrap();
        }
        assert_eq!(d.commands().len(), 1);
        assert_eq!(d.commands().last().unwrap().step_count(), 3);
        assert_eq!(d.state().terrain.tile(2, 0).unwrap().texture, "desert_sand");

        // 低优先级不覆盖
        d.seal();
        d.apply_message(&PaintTerrain {
            pos: Vec3::new(1.0, 0.0, 1.0),
            texture: "snow_forest".to_string(),
            priority: paint_priority::LOW,
        })
        .unwrap();
        assert_eq!(d.state().terrain.tile(0, 0).unwrap().texture, "desert_sand");

        d.undo().unwrap();
        d.undo().unwrap();
        assert!(d
            .state()
            .terrain
            .tiles()
            .iter()
            .all(|t| t.texture == "grass1"));
    }

    #[test]
    fn test_paint_rejects_unknown_texture() {
        let mut d = dispatcher();
        assert!(d
            .apply_message(&PaintTerrain {
                pos: Vec3::ZERO,
                texture: "lava".to_string(),
                priority: paint_priority::HIGH,
            })
            .is_err());
    }

    #[test]
    fn test_elevation_with_brush() {
        let mut d = dispatcher();
        let brush = Brush {
            width: 3,
            height: 3,
            data: vec![0.0, 0.5, 0.0, 0.5, 1.0, 0.5, 0.0, 0.5, 0.0],
        };
        d.dispatch(crate::protocol::envelope::Envelope::notification(
            Brush::TYPE_ID,
            crate::protocol::marshal::encode(&brush.to_record(), &Brush::schema()).unwrap(),
        ))
        .unwrap();
        assert_eq!(d.state().brush.width, 3);

        let centre = Vec3::new(9.0, 0.0, 9.0);
        d.apply_message(&AlterElevation {
            pos: centre,
            amount: 2.0,
        })
        .unwrap();
        assert_eq!(d.state().terrain.height(2, 2), Some(2.0));
        assert_eq!(d.state().terrain.height(1, 2), Some(1.0));
        assert_eq!(d.state().terrain.height(1, 1), Some(0.0));

        d.seal();
        d.apply_message(&FlattenElevation {
            pos: Vec3::new(5.0, 0.0, 9.0),
            amount: 1.0,
        })
        .unwrap();
        assert_eq!(d.state().terrain.height(2, 2), Some(1.5));

        d.undo().unwrap();
        assert_eq!(d.state().terrain.height(2, 2), Some(2.0));
        d.undo().unwrap();
        assert!(d.state().terrain.heights().iter().all(|h| *h == 0.0));
    }

    #[test]
    fn test_queries() {
        let mut d = dispatcher();
        let id = create(&mut d, "units/cart", Vec3::new(10.0, 0.0, 10.0));

        let list = ask(&mut d, GetObjectsList);
        assert_eq!(list.objects.len(), 1);
        assert_eq!(list.objects[0].name, "cart");

        let picked = ask(&mut d, PickObject {
            pos: Vec2::new(78.0, 81.0),
        });
        assert_eq!((picked.id, picked.offset_x, picked.offset_y), (id, -2, 1));
        let missed = ask(&mut d, PickObject { pos: Vec2::ZERO });
        assert_eq!(missed.id, INVALID_OBJECT);

        let groups = ask(&mut d, GetTerrainGroups);
        assert_eq!(groups.group_names, vec!["desert", "grass", "snow"]);

        assert!(!d.state().exit_requested);
        ask(&mut d, Exit);
        assert!(d.state().exit_requested);
    }

    #[test]
    fn test_terrain_previews() {
        let scene = SceneState::new(4);
        let previews = terrain_previews(&scene, "grass", 2, 2).unwrap();
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].image_data.len(), 12);
        assert_eq!(previews[0].image_data[0..3], previews[0].image_data[3..6]);
        assert!(terrain_previews(&scene, "grass", 0, 2).is_err());
        assert!(terrain_previews(&scene, "lava", 2, 2).is_err());
    }

    #[test]
    fn test_generate_map_and_bad_brush() {
        let mut d = dispatcher();
        create(&mut d, "a", Vec3::ZERO);
        let generate = GenerateMap { size: 16 };
        d.dispatch(crate::protocol::envelope::Envelope::notification(
            GenerateMap::TYPE_ID,
            crate::protocol::marshal::encode(&generate.to_record(), &GenerateMap::schema()).unwrap(),
        ))
        .unwrap();
        assert_eq!(d.state().terrain.size(), 16);
        assert_eq!(d.state().object_count(), 0);

        let bad = Brush {
            width: 2,
            height: 2,
            data: vec![1.0],
        };
        assert!(d
            .dispatch(crate::protocol::envelope::Envelope::notification(
                Brush::TYPE_ID,
                crate::protocol::marshal::encode(&bad.to_record(), &Brush::schema()).unwrap(),
            ))
            .is_err());
        assert_eq!(d.state().brush, BrushShape::default());
    }

    #[test]
    fn test_flatten_undo_keeps_later_notifications() {
        let mut d = dispatcher();
        notify(
            &mut d,
            &Brush {
                width: 3,
                height: 3,
                data: vec![0.0, 0.5, 0.0, 0.5, 1.0, 0.5, 0.0, 0.5, 0.0],
            },
        );
        d.apply_message(&AlterElevation {
            pos: Vec3::new(9.0, 0.0, 9.0),
            amount: 2.0,
        })
        .unwrap();
        d.seal();
        d.apply_message(&FlattenElevation {
            pos: Vec3::new(5.0, 0.0, 9.0),
            amount: 1.0,
        })
        .unwrap();
        assert_eq!(d.state().terrain.height(2, 2), Some(1.5));

        notify(
            &mut d,
            &ResizeScreen {
                width: 1920,
                height: 1080,
            },
        );
        notify(
            &mut d,
            &Brush {
                width: 1,
                height: 1,
                data: vec![1.0],
            },
        );

        d.undo().unwrap();
        assert_eq!(d.state().terrain.height(2, 2), Some(2.0));
        assert_eq!(d.state().terrain.height(1, 2), Some(1.0));
        assert_eq!(d.state().viewport.width, 1920);
        assert_eq!(d.state().viewport.height, 1080);
        assert_eq!(d.state().brush, BrushShape::default());

        d.undo().unwrap();
        assert!(d.state().terrain.heights().iter().all(|h| *h == 0.0));
        assert_eq!(d.state().viewport.width, 1920);
    }

    #[test]
    fn test_flatten_outside_map_rejected() {
        let mut d = dispatcher();
        assert!(d
            .apply_message(&FlattenElevation {
                pos: Vec3::new(-100.0, 0.0, -100.0),
                amount: 1.0,
            })
            .is_err());
        assert!(d.commands().is_empty());
    }

    #[test]
    fn test_generate_map_clears_history() {
        let mut d = dispatcher();
        create(&mut d, "a", Vec3::ZERO);
        d.seal();
        d.apply_message(&AlterElevation {
            pos: Vec3::new(1.0, 0.0, 1.0),
            amount: 1.0,
        })
        .unwrap();
        d.undo().unwrap();
        assert!(d.commands().can_redo());

        notify(&mut d, &GenerateMap { size: 16 });
        assert!(d.commands().is_empty());
        assert!(matches!(d.undo(), Err(CommandError::NothingToUndo)));
        assert!(matches!(d.redo(), Err(CommandError::NothingToRedo)));
        assert_eq!(d.state().terrain.size(), 16);
        assert!(d.state().terrain.heights().iter().all(|h| *h == 0.0));
    }

    #[test]
    fn test_undo_after_load_map_keeps_loaded_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");

        let mut d = dispatcher();
        let id = create(&mut d, "units/cart", Vec3::new(4.0, 0.0, 4.0));
        notify_file(&mut d, ids::SAVE_MAP, &path);
        notify_file(&mut d, ids::LOAD_MAP, &path);

        assert_eq!(d.state().object_count(), 1);
        assert!(d.commands().is_empty());
        assert!(matches!(d.undo(), Err(CommandError::NothingToUndo)));
        assert_eq!(d.state().object(id).unwrap().template, "units/cart");
    }

    #[test]
    fn test_failed_load_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher();
        create(&mut d, "a", Vec3::ZERO);

        let kind = Arc::clone(d.catalog().lookup(ids::LOAD_MAP).unwrap());
        let missing = dir.path().join("missing.json");
        let record = Record::new().with("filename", missing.to_str().unwrap());
        let payload = crate::protocol::marshal::encode(&record, &kind.schema).unwrap();
        assert!(d.dispatch(Envelope::notification(ids::LOAD_MAP, payload)).is_err());

        assert_eq!(d.commands().len(), 1);
        d.undo().unwrap();
        assert_eq!(d.state().object_count(), 0);
    }
}

//! 模拟侧的参考场景状态
//!
//! 地形是 `size × size` 的格子，每格一个高度与一个纹理。世界坐标的 x/z
//! 按 `TILE_SIZE` 映射到格子，y 为高度。屏幕坐标按 `Viewport::scale`
//! 做俯视正交投影。

use std::collections::BTreeMap;

use glam::{Vec2, Vec3};

use crate::impl_default;
use crate::protocol::messages::{
    paint_priority, EnvironmentSettings, ObjectListItem, ObjectSettings, INVALID_OBJECT,
};

/// 每格对应的世界长度
pub const TILE_SIZE: f32 = 4.0;

/// 新地图默认的边长（格）
pub const DEFAULT_MAP_SIZE: i32 = 64;

/// 新地图铺设的纹理
pub const DEFAULT_TEXTURE: &str = "grass1";

/// actor 模板的前缀
pub const ACTOR_PREFIX: &str = "actor|";

pub const OBJECT_KIND_ENTITY: i32 = 0;
pub const OBJECT_KIND_ACTOR: i32 = 1;

/// 拾取半径（像素）
pub const PICK_RADIUS: f32 = 12.0;

/// 放置在场景中的对象
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub template: String,
    pub pos: Vec3,
    pub angle: f32,
    pub settings: ObjectSettings,
}

impl SceneObject {
    pub fn new(template: impl Into<String>, pos: Vec3, angle: f32, settings: ObjectSettings) -> Self {
        Self {
            template: template.into(),
            pos,
            angle,
            settings,
        }
    }

    /// 模板路径的最后一段
    pub fn name(&self) -> &str {
        let template = self.template.strip_prefix(ACTOR_PREFIX).unwrap_or(&self.template);
        template.rsplit('/').next().unwrap_or(template)
    }

    pub fn kind(&self) -> i32 {
        if self.template.starts_with(ACTOR_PREFIX) {
            OBJECT_KIND_ACTOR
        } else {
            OBJECT_KIND_ENTITY
        }
    }
}

/// 一格地形的纹理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub texture: String,
    pub priority: i32,
}

/// 地形
#[derive(Debug, Clone, PartialEq)]
pub struct Terrain {
    size: i32,
    heights: Vec<f32>,
    tiles: Vec<Tile>,
}

impl Terrain {
    /// 平坦的新地形，`size` 小于 1 时按 1 处理
    pub fn flat(size: i32) -> Self {
        let size = size.max(1);
        let count = (size * size) as usize;
        Self {
            size,
            heights: vec![0.0; count],
            tiles: vec![
                Tile {
                    texture: DEFAULT_TEXTURE.to_string(),
                    priority: paint_priority::LOW,
                };
                count
            ],
        }
    }

    pub(crate) fn from_parts(size: i32, heights: Vec<f32>, tiles: Vec<Tile>) -> Option<Self> {
        let count = (size.max(0) * size.max(0)) as usize;
        if size < 1 || heights.len() != count || tiles.len() != count {
            return None;
        }
        Some(Self {
            size,
            heights,
            tiles,
        })
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    fn index(&self, x: i32, z: i32) -> Option<usize> {
        if x < 0 || z < 0 || x >= self.size || z >= self.size {
            return None;
        }
        Some((z * self.size + x) as usize)
    }

    /// 世界坐标所在的格子
    pub fn tile_at(&self, pos: Vec3) -> (i32, i32) {
        (
            (pos.x / TILE_SIZE).floor() as i32,
            (pos.z / TILE_SIZE).floor() as i32,
        )
    }

    pub fn height(&self, x: i32, z: i32) -> Option<f32> {
        self.index(x, z).map(|i| self.heights[i])
    }

    pub fn set_height(&mut self, x: i32, z: i32, height: f32) {
        if let Some(i) = self.index(x, z) {
            self.heights[i] = height;
        }
    }

    pub fn tile(&self, x: i32, z: i32) -> Option<&Tile> {
        self.index(x, z).map(|i| &self.tiles[i])
    }

    pub fn set_tile(&mut self, x: i32, z: i32, tile: Tile) {
        if let Some(i) = self.index(x, z) {
            self.tiles[i] = tile;
        }
    }
}

/// 笔刷形状，`data` 按行存放权重
#[derive(Debug, Clone, PartialEq)]
pub struct BrushShape {
    pub width: i32,
    pub height: i32,
    pub data: Vec<f32>,
}

impl_default!(BrushShape {
    width: 1,
    height: 1,
    data: vec![1.0],
});

impl BrushShape {
    /// 形状与数据长度一致
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == (self.width * self.height) as usize
    }

    /// 以 `center` 格为中心的覆盖范围，按 (x, z, 权重) 列出，跳过零权重
    pub fn footprint(&self, center: (i32, i32)) -> Vec<(i32, i32, f32)> {
        let x0 = center.0 - self.width / 2;
        let z0 = center.1 - self.height / 2;
        let mut cells = Vec::new();
        for dz in 0..self.height {
            for dx in 0..self.width {
                let weight = self.data[(dz * self.width + dx) as usize];
                if weight != 0.0 {
                    cells.push((x0 + dx, z0 + dz, weight));
                }
            }
        }
        cells
    }
}

/// 视口设置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
    pub rendering: bool,
    pub wireframe: bool,
    /// 每个世界单位对应的像素
    pub scale: f32,
}

impl_default!(Viewport {
    width: 800,
    height: 600,
    rendering: true,
    wireframe: false,
    scale: 8.0,
});

impl Viewport {
    /// 世界坐标投影到屏幕
    pub fn project(&self, pos: Vec3) -> Vec2 {
        Vec2::new(pos.x * self.scale, pos.z * self.scale)
    }
}

/// 场景状态
#[derive(Debug, Clone, PartialEq)]
pub struct SceneState {
    pub(crate) objects: BTreeMap<i32, SceneObject>,
    pub(crate) next_object_id: i32,
    pub terrain: Terrain,
    /// 地形组名到纹理名
    pub terrain_groups: BTreeMap<String, Vec<String>>,
    pub environment: EnvironmentSettings,
    pub viewport: Viewport,
    pub brush: BrushShape,
    pub selection_preview: Vec<i32>,
    pub message_trace: bool,
    /// 收到 Exit 查询后置位
    pub exit_requested: bool,
}

impl Default for SceneState {
    fn default() -> Self {
        Self::new(DEFAULT_MAP_SIZE)
    }
}

impl SceneState {
    pub fn new(map_size: i32) -> Self {
        let mut terrain_groups = BTreeMap::new();
        terrain_groups.insert(
            "grass".to_string(),
            vec!["grass1".to_string(), "grass_field".to_string()],
        );
        terrain_groups.insert(
            "desert".to_string(),
            vec!["desert_sand".to_string(), "desert_rocks".to_string()],
        );
        terrain_groups.insert("snow".to_string(), vec!["snow_forest".to_string()]);
        Self {
            objects: BTreeMap::new(),
            next_object_id: 1,
            terrain: Terrain::flat(map_size),
            terrain_groups,
            environment: EnvironmentSettings::default(),
            viewport: Viewport::default(),
            brush: BrushShape::default(),
            selection_preview: Vec::new(),
            message_trace: false,
            exit_requested: false,
        }
    }

    /// 生成空白地图，对象被清空
    pub fn generate_map(&mut self, size: i32) {
        self.terrain = Terrain::flat(size);
        self.objects.clear();
        self.selection_preview.clear();
    }

    pub fn object(&self, id: i32) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: i32) -> Option<&mut SceneObject> {
        self.objects.get_mut(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = (i32, &SceneObject)> {
        self.objects.iter().map(|(id, obj)| (*id, obj))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// 下一个新对象将获得的 id
    pub fn next_object_id(&self) -> i32 {
        self.next_object_id
    }

    pub(crate) fn insert_object(&mut self, id: i32, object: SceneObject) {
        self.objects.insert(id, object);
        if id >= self.next_object_id {
            self.next_object_id = id + 1;
        }
    }

    pub(crate) fn spawn_object(&mut self, object: SceneObject) -> i32 {
        let id = self.next_object_id;
        self.insert_object(id, object);
        id
    }

    pub(crate) fn remove_object(&mut self, id: i32) -> Option<SceneObject> {
        self.objects.remove(&id)
    }

    /// 对象列表，按 id 排序
    pub fn object_list(&self) -> Vec<ObjectListItem> {
        self.objects
            .iter()
            .map(|(id, obj)| ObjectListItem {
                id: *id,
                name: obj.name().to_string(),
                kind: obj.kind(),
            })
            .collect()
    }

    /// 屏幕坐标拾取最近的对象
    ///
    /// 返回对象 id 与光标相对对象投影点的像素偏移。没有对象落在拾取
    /// 半径内时返回 `INVALID_OBJECT`。
    pub fn pick(&self, screen: Vec2) -> (i32, Vec2) {
        let mut best: Option<(i32, Vec2, f32)> = None;
        for (id, obj) in &self.objects {
            let offset = screen - self.viewport.project(obj.pos);
            let distance = offset.length();
            if distance > PICK_RADIUS {
                continue;
            }
            if best.map_or(true, |(_, _, d)| distance < d) {
                best = Some((*id, offset, distance));
            }
        }
        match best {
            Some((id, offset, _)) => (id, offset),
            None => (INVALID_OBJECT, Vec2::ZERO),
        }
    }
}

/// 从 `pos` 看向 `target` 的朝向角
pub fn facing(pos: Vec3, target: Vec3) -> f32 {
    let delta = target - pos;
    delta.x.atan2(delta.z)
}

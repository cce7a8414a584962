//! 地图文件

use serde::{Deserialize, Serialize};
use glam::Vec3;
use std::path::Path;
use thiserror::Error;

use crate::core::error::HandlerError;
use crate::protocol::messages::{EnvironmentSettings, ObjectSettings};
use crate::scene::state::{SceneObject, SceneState, Terrain, Tile};

/// 地图文件读写错误
#[derive(Error, Debug)]
pub enum MapFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid map: {0}")]
    Invalid(String),
}

impl From<MapFileError> for HandlerError {
    fn from(err: MapFileError) -> Self {
        HandlerError::new(err.to_string())
    }
}

/// 序列化的地图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedMap {
    pub size: i32,
    pub heights: Vec<f32>,
    pub tiles: Vec<SerializedTile>,
    pub environment: SerializedEnvironment,
    pub objects: Vec<SerializedObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTile {
    pub texture: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SerializedEnvironment {
    pub water_height: f32,
    pub water_shininess: f32,
    pub water_waviness: f32,
    pub sun_rotation: f32,
    pub sun_elevation: f32,
}

/// 序列化的对象，位置存为数组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedObject {
    pub id: i32,
    pub template: String,
    pub position: [f32; 3],
    pub angle: f32,
    pub player: i32,
    #[serde(default)]
    pub selections: Vec<String>,
}

impl SerializedMap {
    pub fn from_scene(scene: &SceneState) -> Self {
        let env = scene.environment;
        Self {
            size: scene.terrain.size(),
            heights: scene.terrain.heights().to_vec(),
            tiles: scene
                .terrain
                .tiles()
                .iter()
                .map(|t| SerializedTile {
                    texture: t.texture.clone(),
                    priority: t.priority,
                })
                .collect(),
            environment: SerializedEnvironment {
                water_height: env.water_height,
                water_shininess: env.water_shininess,
                water_waviness: env.water_waviness,
                sun_rotation: env.sun_rotation,
                sun_elevation: env.sun_elevation,
            },
            objects: scene
                .objects()
                .map(|(id, obj)| SerializedObject {
                    id,
                    template: obj.template.clone(),
                    position: obj.pos.to_array(),
                    angle: obj.angle,
                    player: obj.settings.player,
                    selections: obj.settings.selections.clone(),
                })
                .collect(),
        }
    }

    /// 替换场景中的地形、环境与对象
    ///
    /// 地图数据不完整时返回错误，场景保持不变。
    pub fn apply_to(&self, scene: &mut SceneState) -> Result<(), MapFileError> {
        let tiles = self
            .tiles
            .iter()
            .map(|t| Tile {
                texture: t.texture.clone(),
                priority: t.priority,
            })
            .collect();
        let terrain = Terrain::from_parts(self.size, self.heights.clone(), tiles).ok_or_else(|| {
            MapFileError::Invalid(format!(
                "terrain of size {} needs {} cells",
                self.size,
                self.size.max(0) * self.size.max(0)
            ))
        })?;

        scene.terrain = terrain;
        let env = self.environment;
        scene.environment = EnvironmentSettings {
            water_height: env.water_height,
            water_shininess: env.water_shininess,
            water_waviness: env.water_waviness,
            sun_rotation: env.sun_rotation,
            sun_elevation: env.sun_elevation,
        };
        scene.objects.clear();
        scene.selection_preview.clear();
        for obj in &self.objects {
            scene.insert_object(
                obj.id,
                SceneObject::new(
                    obj.template.clone(),
                    Vec3::from_array(obj.position),
                    obj.angle,
                    ObjectSettings {
                        player: obj.player,
                        selections: obj.selections.clone(),
                        variant_groups: Vec::new(),
                    },
                ),
            );
        }
        Ok(())
    }

    /// 保存为 JSON
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), MapFileError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, MapFileError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::paint_priority;

    #[test]
    fn test_map_file_io() {
        let mut scene = SceneState::new(4);
        scene.terrain.set_height(1, 2, 3.5);
        scene.terrain.set_tile(
            0,
            0,
            Tile {
                texture: "snow_forest".to_string(),
                priority: paint_priority::HIGH,
            },
        );
        scene.environment.water_height = 0.7;
        scene.insert_object(
            7,
            SceneObject::new("units/cart", Vec3::new(1.0, 0.0, 2.0), 0.5, ObjectSettings::default()),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        SerializedMap::from_scene(&scene).save_to_file(&path).unwrap();

        let mut loaded = SceneState::new(1);
        SerializedMap::load_from_file(&path)
            .unwrap()
            .apply_to(&mut loaded)
            .unwrap();
        assert_eq!(loaded.terrain, scene.terrain);
        assert_eq!(loaded.environment, scene.environment);
        assert_eq!(loaded.object(7), scene.object(7));
        assert_eq!(loaded.next_object_id(), 8);
    }

    #[test]
    fn test_incomplete_map_rejected() {
        let mut scene = SceneState::new(2);
        let mut map = SerializedMap::from_scene(&scene);
        map.heights.pop();
        assert!(matches!(
            map.apply_to(&mut scene),
            Err(MapFileError::Invalid(_))
        ));
        assert_eq!(scene.terrain.size(), 2);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SerializedMap::load_from_file("/nonexistent/bridge/map.json"),
            Err(MapFileError::Io(_))
        ));
    }
}

//! 参考场景
//!
//! 模拟侧的示例状态，以及标准编辑器目录的全部处理器。

pub mod handlers;
pub mod serialization;
pub mod state;

pub use handlers::register_handlers;
pub use serialization::{MapFileError, SerializedMap};
pub use state::{BrushShape, SceneObject, SceneState, Terrain, Tile, Viewport};

//! # Game Engine Bridge
//!
//! 编辑器进程与游戏模拟之间的强类型双向消息桥。
//!
//! ## Features
//!
//! - **Message Catalog**: 两端共享的消息目录，按 type id 与字段 schema 描述每种消息
//! - **Value Marshalling**: 按 schema 编解码的小端二进制负载
//! - **Transport**: 有界、可关闭的 FIFO 队列，以及基于字节流的信封分帧
//! - **Dispatch**: 接收端唯一分发点，处理通知、查询与命令
//! - **Undo/Redo**: 命令日志，连续的同类交互式编辑合并为一次撤销
//! - **Queries**: 带超时的同步查询，按关联 id 匹配响应
//!
//! ## Architecture Design
//!
//! 编辑器侧只通过 `Messenger` 发送消息；模拟侧的 `Dispatcher` 拥有状态
//! 与命令队列，所有修改都在它的线程上发生。两侧之间只有传输队列。
//!
//! ### Example
//!
//! ```ignore
//! use game_engine_bridge::{editor_catalog, scene, spawn_simulation, BridgeConfig};
//! use game_engine_bridge::protocol::messages::{GetObjectsList, MoveObject};
//!
//! let catalog = std::sync::Arc::new(editor_catalog()?);
//! let (editor, sim) = spawn_simulation(
//!     &BridgeConfig::default(),
//!     catalog,
//!     scene::SceneState::default(),
//!     scene::register_handlers,
//! )?;
//! editor.handshake()?;
//! editor.messenger().send(&MoveObject { id: 1, pos: glam::Vec3::ONE })?;
//! let objects = editor.messenger().request(&GetObjectsList)?;
//! editor.shutdown()?;
//! let final_state = sim.join()?;
//! ```
//!
//! ## Modules
//!
//! - [`core`]: 错误类型、日志、通用宏
//! - [`config`]: 配置文件与环境变量
//! - [`protocol`]: 值模型、编解码、消息目录、信封
//! - [`transport`]: 传输队列与流分帧
//! - [`dispatch`]: 消息分发器
//! - [`command`]: 命令日志（合并/撤销/重做）
//! - [`query`]: 查询关联
//! - [`session`]: 两端的组装
//! - [`scripting`]: 脚本宿主边界
//! - [`stats`]: 统计埋点
//! - [`scene`]: 参考场景

/// Error taxonomy, logging bootstrap and shared macros
pub mod core;
/// Configuration system
pub mod config;
/// Value model, marshalling, catalog and envelopes
pub mod protocol;
/// Bounded closable queues and stream framing
pub mod transport;
/// Receive-side message dispatch
pub mod dispatch;
/// Merge/undo/redo command log
pub mod command;
/// Query/response correlation
pub mod query;
/// Editor and simulation wiring
pub mod session;
/// Script host boundary
pub mod scripting;
/// Passive instrumentation
pub mod stats;
/// Reference simulation scene
pub mod scene;

pub use crate::config::BridgeConfig;
pub use crate::core::error::{BridgeError, BridgeResult};
pub use crate::dispatch::Dispatcher;
pub use crate::protocol::{editor_catalog, Envelope, MessageCatalog, Record, ShareableValue};
pub use crate::session::{spawn_simulation, EditorLink, Messenger, SimulationHandle};

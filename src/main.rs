//! 本地回环演示：编辑器与模拟在同一进程的两个线程上通过桥通信

use std::sync::Arc;

use game_engine_bridge::core::init_logging;
use game_engine_bridge::protocol::messages::{
    paint_priority, CreateObject, Exit, GetObjectsList, MoveObject, ObjectSettings, PaintTerrain,
};
use game_engine_bridge::scene::{register_handlers, SceneState};
use game_engine_bridge::{editor_catalog, spawn_simulation, BridgeConfig, BridgeResult};
use glam::Vec3;

fn run() -> BridgeResult<()> {
    let mut config = BridgeConfig::load_or_default();
    config.apply_env_overrides();
    init_logging(&config.logging);

    let catalog = Arc::new(editor_catalog()?);
    let (editor, simulation) =
        spawn_simulation(&config, catalog, SceneState::default(), register_handlers)?;
    let reply = editor.handshake()?;
    tracing::info!(fingerprint = %reply.fingerprint, "catalogs match");

    let messenger = editor.messenger();
    messenger.send(&CreateObject {
        template: "units/hele_infantry_spearman".to_string(),
        settings: ObjectSettings {
            player: 1,
            ..ObjectSettings::default()
        },
        pos: Vec3::new(12.0, 0.0, 12.0),
        use_target: false,
        target: Vec3::ZERO,
        angle: 0.0,
    })?;
    messenger.seal()?;

    // 一次拖动产生多条移动命令，合并为一个撤销步骤
    for step in 1..=5 {
        messenger.send(&MoveObject {
            id: 1,
            pos: Vec3::new(12.0 + step as f32, 0.0, 12.0),
        })?;
    }
    messenger.seal()?;

    for x in 0..4 {
        messenger.send(&PaintTerrain {
            pos: Vec3::new(x as f32 * 4.0, 0.0, 0.0),
            texture: "desert_sand".to_string(),
            priority: paint_priority::HIGH,
        })?;
    }
    messenger.undo()?;

    let objects = messenger.request(&GetObjectsList)?;
    for object in &objects.objects {
        println!("object {} {} (type {})", object.id, object.name, object.kind);
    }
    messenger.request(&Exit)?;

    for rejection in editor.take_rejections() {
        println!("rejected {}: {}", rejection.command, rejection.reason);
    }
    let editor_stats = editor.stats().snapshot();
    editor.shutdown()?;
    let scene = simulation.join()?;

    println!(
        "objects: {}, exit requested: {}",
        scene.object_count(),
        scene.exit_requested
    );
    match serde_json::to_string_pretty(&editor_stats) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::warn!(error = %e, "failed to render stats"),
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Bridge demo failed: {}", e);
        std::process::exit(1);
    }
}

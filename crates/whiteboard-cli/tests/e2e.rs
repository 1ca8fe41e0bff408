//! File-backed rooms across process restarts, export, and the scripted demo.

use tempfile::TempDir;
use whiteboard_cli::{DemoOptions, FileStore, SvgExporter, run_demo};
use whiteboard_core::{
    BroadcastBus, ClassStatus, Origin, Point, Role, RoomEvent, RoomStore, SenderId, SyncConfig,
    SyncEngine, Tool,
};

fn trainer<'a>(store: &'a FileStore, room: &str) -> SyncEngine<&'a FileStore> {
    let config = SyncConfig::immediate();
    let bus = BroadcastBus::new(SenderId::generate(), &Origin::new(), &config);
    SyncEngine::new(room, Role::Trainer, bus, store, config)
}

#[test]
fn test_room_survives_restart() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());

    {
        let mut engine = trainer(&store, "persist");
        engine.join().unwrap();
        engine.start_class().unwrap();
        engine
            .add_stroke(vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)], "#000", 2.0, Tool::Pen)
            .unwrap();
        engine.add_page().unwrap();
        engine.leave();
    }

    let mut engine = trainer(&store, "persist");
    let restored = std::sync::Arc::new(std::sync::Mutex::new(None));
    let restored_clone = std::sync::Arc::clone(&restored);
    let _sub = engine.subscribe_events(move |event| {
        if let RoomEvent::Joined { restored, .. } = event {
            *restored_clone.lock().unwrap() = Some(restored);
        }
    });
    engine.join().unwrap();

    assert_eq!(*restored.lock().unwrap(), Some(true));
    assert_eq!(engine.class_status(), ClassStatus::Live);
    assert_eq!(engine.pages().len(), 2);
    assert_eq!(engine.current_page_index(), 1);
    assert_eq!(engine.pages()[0].operations.len(), 1);
    // History is not persisted
    assert!(!engine.can_undo());
}

#[test]
fn test_reset_removes_room_file() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());

    let mut engine = trainer(&store, "reset-me");
    engine.join().unwrap();
    engine.start_class().unwrap();
    engine.leave();

    let room_store = RoomStore::new(&store, "reset-me");
    assert!(room_store.load().is_some());
    room_store.clear().unwrap();
    assert!(room_store.load().is_none());
}

#[test]
fn test_export_through_engine() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().join("rooms"));

    let mut engine = trainer(&store, "export");
    engine.join().unwrap();
    engine.start_class().unwrap();
    engine
        .add_text(Point::new(10.0, 20.0), "Hello", "#000000", 16.0)
        .unwrap();
    engine.add_page().unwrap();

    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let events_clone = std::sync::Arc::clone(&events);
    let _sub = engine.subscribe_events(move |event| events_clone.lock().unwrap().push(event));

    let mut exporter = SvgExporter::new(dir.path().join("out"));
    let report = engine.export_with(&mut exporter).unwrap();

    assert_eq!(report.pages, 2);
    let svg = std::fs::read_to_string(&report.location).unwrap();
    assert!(svg.contains(">Hello</text>"));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, RoomEvent::ExportFinished { ok: true, .. })));
}

#[tokio::test]
async fn test_demo_converges_over_channel() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    let options = DemoOptions {
        room_id: "demo".to_string(),
        strokes: 3,
        fallback: false,
    };

    let summary = run_demo(&store, SyncConfig::immediate(), &options).await.unwrap();

    assert!(summary.converged);
    assert!(!summary.restored);
    assert_eq!(summary.pages, 1);
    // Three strokes plus the closing label
    assert_eq!(summary.operations, 4);
    assert!(RoomStore::new(&store, "demo").load().is_some());
}

#[tokio::test]
async fn test_demo_converges_over_fallback_and_restores() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    let options = DemoOptions {
        room_id: "demo-fallback".to_string(),
        strokes: 2,
        fallback: true,
    };

    let first = run_demo(&store, SyncConfig::immediate(), &options).await.unwrap();
    assert!(first.converged);
    assert_eq!(first.operations, 3);

    // Second run picks up the saved board and keeps drawing on it
    let second = run_demo(&store, SyncConfig::immediate(), &options).await.unwrap();
    assert!(second.converged);
    assert!(second.restored);
    assert_eq!(second.operations, 6);
}

#[tokio::test]
async fn test_demo_refuses_ended_class() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());

    let mut engine = trainer(&store, "over");
    engine.join().unwrap();
    engine.start_class().unwrap();
    engine.end_class().unwrap();
    engine.leave();

    let options = DemoOptions {
        room_id: "over".to_string(),
        strokes: 1,
        fallback: false,
    };
    assert!(run_demo(&store, SyncConfig::immediate(), &options).await.is_err());
}

//! Scripted two-peer classroom session.
//!
//! A trainer engine backed by the file store draws on the board while a
//! trainee engine in the same process follows along over the room bus.
//! Both are driven from a tokio interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use whiteboard_core::{
    BootstrapState, BroadcastBus, ClassStatus, KeyValueStore, Origin, Point, Role, RoomEvent,
    SenderId, StrokeStyle, SyncConfig, SyncEngine, Tool,
};

/// How often both engines are polled.
pub const TICK: Duration = Duration::from_millis(50);

/// Give up on convergence after this many ticks.
const MAX_TICKS: usize = 600;

/// New page every this many strokes.
const STROKES_PER_PAGE: usize = 12;

const PALETTE: [&str; 4] = ["#1f77b4", "#d62728", "#2ca02c", "#000000"];

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub room_id: String,
    pub strokes: usize,
    /// Run without the broadcast hub so messages go through shared storage.
    pub fallback: bool,
}

/// What the trainer ended up with, and whether the trainee caught up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSummary {
    pub restored: bool,
    pub pages: usize,
    pub operations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bootstrapping,
    Drawing { drawn: usize },
    Converging,
}

pub async fn run_demo<S: KeyValueStore>(
    store: S,
    config: SyncConfig,
    options: &DemoOptions,
) -> Result<DemoSummary> {
    let origin = if options.fallback {
        Origin::without_broadcast()
    } else {
        Origin::new()
    };
    let room = options.room_id.as_str();

    let trainer_config = SyncConfig {
        broadcast_previews: true,
        ..config.clone()
    };
    let trainer_bus = BroadcastBus::new(SenderId::generate(), &origin, &trainer_config);
    let mut trainer = SyncEngine::new(room, Role::Trainer, trainer_bus, store, trainer_config);

    let trainee_bus = BroadcastBus::new(SenderId::generate(), &origin, &config);
    let mut trainee = SyncEngine::new(
        room,
        Role::Trainee,
        trainee_bus,
        origin.storage().context(),
        config,
    );

    let restored = Arc::new(AtomicBool::new(false));
    let restored_flag = Arc::clone(&restored);
    let _trainer_events = trainer.subscribe_events(move |event| {
        if let RoomEvent::Joined { restored: true, .. } = event {
            restored_flag.store(true, Ordering::SeqCst);
        }
    });
    let _trainee_events = trainee.subscribe_events(|event| match event {
        RoomEvent::StrokePreview { .. } => {}
        other => debug!("Trainee: {:?}", other),
    });

    trainer.join()?;
    if trainer.class_status() == ClassStatus::Ended {
        bail!("Class in room {} has already ended; reset it first", room);
    }
    trainee.join()?;
    info!(
        "Demo running in room {} ({} transport)",
        room,
        if options.fallback { "storage" } else { "channel" }
    );

    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut phase = Phase::Bootstrapping;
    let mut converged = false;

    for _ in 0..MAX_TICKS {
        ticker.tick().await;
        trainee.poll();
        trainer.poll();

        phase = match phase {
            Phase::Bootstrapping => {
                if trainee.bootstrap_state() != BootstrapState::Synced {
                    continue;
                }
                if trainer.class_status() == ClassStatus::NotStarted {
                    trainer.start_class()?;
                }
                Phase::Drawing { drawn: 0 }
            }
            Phase::Drawing { drawn } if drawn < options.strokes => {
                if drawn > 0 && drawn % STROKES_PER_PAGE == 0 {
                    trainer.add_page()?;
                }
                draw_stroke(&mut trainer, drawn)?;
                Phase::Drawing { drawn: drawn + 1 }
            }
            Phase::Drawing { drawn } => {
                let label = format!("{} strokes", drawn);
                trainer.add_text(Point::new(40.0, 560.0), label, "#444444", 18.0)?;
                Phase::Converging
            }
            Phase::Converging => {
                if trainee.document() == trainer.document() {
                    converged = true;
                    break;
                }
                Phase::Converging
            }
        };
    }

    if !converged {
        warn!("Trainee did not converge within {} ticks", MAX_TICKS);
    }

    let summary = DemoSummary {
        restored: restored.load(Ordering::SeqCst),
        pages: trainer.pages().len(),
        operations: trainer.pages().iter().map(|p| p.operations.len()).sum(),
        converged,
    };

    trainee.leave();
    trainer.leave();
    Ok(summary)
}

/// Draw one zigzag stroke through the begin/extend/finish gesture path.
fn draw_stroke<S: KeyValueStore>(engine: &mut SyncEngine<S>, n: usize) -> Result<()> {
    let slot = n % STROKES_PER_PAGE;
    let x = 60.0 + 170.0 * (slot % 4) as f64;
    let y = 80.0 + 150.0 * (slot / 4) as f64;
    let style = StrokeStyle {
        color: PALETTE[n % PALETTE.len()].to_string(),
        width: 2.0 + (n % 3) as f64,
        tool: Tool::Pen,
    };

    engine.begin_stroke(Point::new(x, y), style)?;
    for step in 1..=6 {
        let dy = if step % 2 == 0 { 0.0 } else { 40.0 };
        engine.extend_stroke(Point::new(x + 20.0 * step as f64, y + dy))?;
    }
    engine.finish_stroke()?;
    Ok(())
}

//! SyncEngine: owns a room's document and keeps it in step with peers.
//!
//! Local actions follow one sequence:
//!
//! 1. Authorization check (`can_edit`)
//! 2. History push of the pre-mutation pages (stroke, text, clear only)
//! 3. Local mutation, announced through a `RoomEvent`
//! 4. Broadcast of the matching message
//! 5. Write-through persistence
//!
//! Broadcast and persistence failures are logged; the local mutation stands.
//!
//! Incoming messages are queued by a bus handler and applied from `poll`, so
//! nothing re-enters the engine while it is mutating. The bootstrap handshake
//! for late joiners works as follows:
//!
//! 1. A trainee sends `request_state` once `request_state_delay` has passed
//! 2. The trainer answers with `state_snapshot`
//! 3. The trainee replaces its whole document with the snapshot
//! 4. If nothing arrives within `host_wait_notice`, a `WaitingForHost` notice fires

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::config::SyncConfig;
use crate::document::{can_edit, ClassStatus, Document, DocumentError, Role};
use crate::events::{ChangeOrigin, EventBus, PreviewStage, RoomEvent, Subscription};
use crate::export::{ExportError, ExportReport, Exporter};
use crate::history::HistoryManager;
use crate::operations::{
    add_operation_to_page, clear_page, create_empty_page, create_stroke, create_text,
    DrawOperation, OperationId, Page, PageId, Point, StrokeStyle, Tool,
};
use crate::protocol::{
    AddTextPayload, MessageKind, PageRef, PagesPayload, RealtimeMessage, SetPagePayload,
    StatusPayload, StrokeEndPayload, StrokePreviewPayload,
};
use crate::sender_id::SenderId;
use crate::storage::{KeyValueStore, RoomStore};
use crate::transport::{BroadcastBus, TransportError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{role} cannot {action} while class is {status}")]
    NotAuthorized {
        action: &'static str,
        role: Role,
        status: ClassStatus,
    },

    #[error("Invalid class status transition: {from} -> {to}")]
    InvalidTransition { from: ClassStatus, to: ClassStatus },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("No stroke in progress")]
    NoStrokeInProgress,

    #[error("Text is empty")]
    EmptyText,

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Progress of the late-joiner handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Nothing to request (trainers, or not joined yet).
    Idle,
    /// `request_state` goes out at `due`.
    Scheduled { due: Instant },
    /// `request_state` was sent at `since`; no snapshot yet.
    AwaitingHost { since: Instant, notified: bool },
    /// A snapshot has been applied.
    Synced,
}

/// A stroke being drawn locally, not yet committed.
#[derive(Debug, Clone)]
struct StrokeDraft {
    points: Vec<Point>,
    style: StrokeStyle,
}

/// Room session for one peer.
pub struct SyncEngine<S: KeyValueStore> {
    room_id: String,
    role: Role,
    config: SyncConfig,
    document: Document,
    history: HistoryManager,
    bus: BroadcastBus,
    store: RoomStore<S>,
    events: Arc<EventBus<RoomEvent>>,
    inbox: Option<Receiver<RealtimeMessage>>,
    inbox_subscription: Option<Subscription>,
    bootstrap: BootstrapState,
    draft: Option<StrokeDraft>,
}

impl<S: KeyValueStore> SyncEngine<S> {
    /// Create a session. Nothing is loaded or sent until [`SyncEngine::join`].
    pub fn new(
        room_id: impl Into<String>,
        role: Role,
        bus: BroadcastBus,
        store: S,
        config: SyncConfig,
    ) -> Self {
        let room_id = room_id.into();
        Self {
            store: RoomStore::new(store, &room_id),
            history: HistoryManager::with_limit(config.history_limit),
            room_id,
            role,
            config,
            document: Document::new(),
            bus,
            events: Arc::new(EventBus::new()),
            inbox: None,
            inbox_subscription: None,
            bootstrap: BootstrapState::Idle,
            draft: None,
        }
    }

    /// Load persisted state, bind the bus to the room, and schedule the
    /// bootstrap request when joining as a trainee.
    pub fn join(&mut self) -> Result<()> {
        let restored = match self.store.load() {
            Some(doc) => {
                info!(
                    "Restored room {} ({} pages, {})",
                    self.room_id,
                    doc.page_count(),
                    doc.class_status()
                );
                self.document = doc;
                true
            }
            None => false,
        };

        self.bus.initialize(&self.room_id)?;

        let (tx, rx) = mpsc::channel();
        let subscription = self.bus.subscribe(move |msg| {
            // Receiver gone means the session is shutting down
            let _ = tx.send(msg);
        });
        self.inbox = Some(rx);
        self.inbox_subscription = Some(subscription);

        if self.role == Role::Trainee {
            self.bootstrap = BootstrapState::Scheduled {
                due: Instant::now() + self.config.request_state_delay,
            };
        }

        info!("Joined room {} as {} ({})", self.room_id, self.role, self.bus.sender_id());
        self.events.emit(RoomEvent::Joined {
            room_id: self.room_id.clone(),
            role: self.role,
            restored,
        });
        Ok(())
    }

    /// Disconnect from the room. Local state is kept.
    pub fn leave(&mut self) {
        self.inbox_subscription = None;
        self.inbox = None;
        self.bus.disconnect();
        self.bootstrap = BootstrapState::Idle;
    }

    // ===== Accessors =====

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn sender_id(&self) -> SenderId {
        self.bus.sender_id()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn pages(&self) -> &[Page] {
        self.document.pages()
    }

    pub fn current_page(&self) -> &Page {
        self.document.current_page()
    }

    pub fn current_page_index(&self) -> usize {
        self.document.current_page_index()
    }

    pub fn class_status(&self) -> ClassStatus {
        self.document.class_status()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn can_edit(&self) -> bool {
        can_edit(self.role, self.document.class_status())
    }

    pub fn can_undo(&self) -> bool {
        self.can_edit() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.can_edit() && self.history.can_redo()
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.bootstrap
    }

    /// True once the host-wait notice has fired and no snapshot has arrived since.
    pub fn is_waiting_for_host(&self) -> bool {
        matches!(
            self.bootstrap,
            BootstrapState::AwaitingHost { notified: true, .. }
        )
    }

    /// Points of the stroke currently being drawn.
    pub fn stroke_in_progress(&self) -> Option<&[Point]> {
        self.draft.as_ref().map(|d| d.points.as_slice())
    }

    /// Room notices. Subscribe before `join` to observe `Joined`.
    pub fn events(&self) -> &Arc<EventBus<RoomEvent>> {
        &self.events
    }

    pub fn subscribe_events(
        &self,
        callback: impl Fn(RoomEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    // ===== Driving =====

    /// Advance timers and apply queued messages using the current time.
    pub fn poll(&mut self) -> usize {
        self.poll_at(Instant::now())
    }

    /// Advance timers to `now` and apply queued messages.
    ///
    /// Returns the number of peer messages applied.
    pub fn poll_at(&mut self, now: Instant) -> usize {
        self.drive_bootstrap(now);
        self.bus.poll(now);
        self.process_incoming()
    }

    fn drive_bootstrap(&mut self, now: Instant) {
        match self.bootstrap {
            BootstrapState::Scheduled { due } if now >= due => {
                match self.bus.send(MessageKind::RequestState) {
                    Ok(_) => info!("Requested room state for {}", self.room_id),
                    Err(e) => warn!("Failed to request room state: {}", e),
                }
                self.bootstrap = BootstrapState::AwaitingHost {
                    since: now,
                    notified: false,
                };
                self.events.emit(RoomEvent::StateRequested);
            }
            BootstrapState::AwaitingHost {
                since,
                notified: false,
            } if now.duration_since(since) >= self.config.host_wait_notice => {
                warn!("No snapshot for room {} yet; waiting for host", self.room_id);
                self.bootstrap = BootstrapState::AwaitingHost {
                    since,
                    notified: true,
                };
                self.events.emit(RoomEvent::WaitingForHost {
                    room_id: self.room_id.clone(),
                });
            }
            _ => {}
        }
    }

    /// Apply every queued message from other peers.
    pub fn process_incoming(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let next = match &self.inbox {
                Some(inbox) => inbox.try_recv().ok(),
                None => None,
            };
            let Some(msg) = next else {
                break;
            };
            if msg.sender_id == self.bus.sender_id() {
                // Local echo of our own send
                continue;
            }
            self.apply_remote(msg);
            applied += 1;
        }
        applied
    }

    fn apply_remote(&mut self, msg: RealtimeMessage) {
        let from = msg.sender_id;
        debug!("Applying {} from {}", msg.type_name(), from);

        match msg.kind {
            MessageKind::RequestState => self.answer_state_request(from),
            MessageKind::StateSnapshot(doc) => self.apply_snapshot(doc),
            MessageKind::StrokeStart(preview) => self.emit_preview(from, PreviewStage::Start, preview),
            MessageKind::StrokeMove(preview) => self.emit_preview(from, PreviewStage::Move, preview),
            MessageKind::StrokeEnd(payload) => {
                let op = payload.to_operation();
                self.append_remote(payload.page_id.as_ref(), op, "stroke_end");
            }
            MessageKind::AddText(payload) => {
                let op = payload.to_operation();
                self.append_remote(payload.page_id.as_ref(), op, "add_text");
            }
            MessageKind::ClearPage(target) => {
                if let Some(index) = self.resolve_page(target.page_id.as_ref(), "clear_page") {
                    self.document.update_page(index, clear_page);
                    self.persist();
                    self.emit_document_changed(ChangeOrigin::Remote);
                }
            }
            MessageKind::AddPage(target) => self.apply_remote_add_page(target),
            MessageKind::SetPage(SetPagePayload { index }) => {
                match self.document.set_current_page_index(index) {
                    Ok(()) => {
                        self.persist();
                        self.emit_page_changed();
                    }
                    Err(e) => warn!("Ignoring set_page from {}: {}", from, e),
                }
            }
            MessageKind::Undo(PagesPayload { pages }) | MessageKind::Redo(PagesPayload { pages }) => {
                self.document.replace_pages(pages);
                self.persist();
                self.emit_document_changed(ChangeOrigin::Remote);
                self.emit_page_changed();
            }
            MessageKind::ClassStatusChanged(StatusPayload { status }) => {
                self.document.set_class_status(status);
                info!("Class in room {} is now {}", self.room_id, status);
                self.persist();
                self.events.emit(RoomEvent::ClassStatusChanged {
                    status,
                    origin: ChangeOrigin::Remote,
                });
            }
        }
    }

    fn answer_state_request(&mut self, from: SenderId) {
        if self.role != Role::Trainer {
            debug!("Ignoring request_state from {} (not the trainer)", from);
            return;
        }
        match self.bus.send(MessageKind::StateSnapshot(self.document.clone())) {
            Ok(_) => {
                info!("Sent state snapshot to {}", from);
                self.events.emit(RoomEvent::SnapshotSent);
            }
            Err(e) => warn!("Failed to send state snapshot: {}", e),
        }
    }

    fn apply_snapshot(&mut self, doc: Document) {
        info!(
            "Applying snapshot for room {} ({} pages, {})",
            self.room_id,
            doc.page_count(),
            doc.class_status()
        );
        self.document.overwrite(doc);
        // Snapshots older than the received state must not be undoable
        self.history.clear();
        if self.role == Role::Trainee {
            self.bootstrap = BootstrapState::Synced;
        }
        self.persist();
        self.events.emit(RoomEvent::SnapshotReceived {
            page_count: self.document.page_count(),
            class_status: self.document.class_status(),
        });
        self.emit_document_changed(ChangeOrigin::Remote);
        self.emit_page_changed();
    }

    fn emit_preview(&self, from: SenderId, stage: PreviewStage, preview: StrokePreviewPayload) {
        self.events.emit(RoomEvent::StrokePreview {
            sender_id: from,
            stage,
            points: preview.points,
            style: preview.style,
        });
    }

    /// Find the page a message targets. Without an id, the current page is used.
    fn resolve_page(&self, page_id: Option<&PageId>, msg_type: &str) -> Option<usize> {
        match page_id {
            Some(id) => {
                let index = self.document.position_of(id);
                if index.is_none() {
                    warn!("Ignoring {} for unknown page {}", msg_type, id);
                }
                index
            }
            None => Some(self.document.current_page_index()),
        }
    }

    fn append_remote(&mut self, page_id: Option<&PageId>, op: DrawOperation, msg_type: &str) {
        let Some(index) = self.resolve_page(page_id, msg_type) else {
            return;
        };
        let duplicate = self.document.pages()[index]
            .operations
            .iter()
            .any(|existing| existing.id() == op.id());
        if duplicate {
            debug!("Skipping duplicate {} {}", msg_type, op.id());
            return;
        }
        self.document
            .update_page(index, |page| add_operation_to_page(page, op));
        self.persist();
        self.emit_document_changed(ChangeOrigin::Remote);
    }

    fn apply_remote_add_page(&mut self, target: PageRef) {
        let page = match target.page_id {
            Some(id) if self.document.position_of(&id).is_some() => {
                debug!("Skipping duplicate add_page {}", id);
                return;
            }
            Some(id) => Page::with_id(id),
            None => create_empty_page(),
        };
        self.document.push_page(page);
        self.document.advance_page();
        self.persist();
        self.emit_document_changed(ChangeOrigin::Remote);
        self.emit_page_changed();
    }

    // ===== Local actions =====

    fn ensure_can_edit(&self, action: &'static str) -> Result<()> {
        if self.can_edit() {
            return Ok(());
        }
        debug!("Rejected {} for {} in {}", action, self.role, self.document.class_status());
        Err(SyncError::NotAuthorized {
            action,
            role: self.role,
            status: self.document.class_status(),
        })
    }

    /// Commit a finished stroke to the current page.
    pub fn add_stroke(
        &mut self,
        points: Vec<Point>,
        color: impl Into<String>,
        width: f64,
        tool: Tool,
    ) -> Result<OperationId> {
        self.ensure_can_edit("add_stroke")?;
        Ok(self.commit_operation(create_stroke(points, color, width, tool)))
    }

    /// Place a text label on the current page.
    pub fn add_text(
        &mut self,
        position: Point,
        text: impl Into<String>,
        color: impl Into<String>,
        font_size: f64,
    ) -> Result<OperationId> {
        self.ensure_can_edit("add_text")?;
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SyncError::EmptyText);
        }
        Ok(self.commit_operation(create_text(position, text, color, font_size)))
    }

    fn commit_operation(&mut self, op: DrawOperation) -> OperationId {
        let index = self.document.current_page_index();
        let page_id = self.document.current_page().id.clone();
        let id = op.id().clone();
        let kind = match &op {
            DrawOperation::Stroke(stroke) => {
                MessageKind::StrokeEnd(StrokeEndPayload::from_stroke(page_id, stroke))
            }
            DrawOperation::Text(text) => {
                MessageKind::AddText(AddTextPayload::from_text(page_id, text))
            }
        };

        self.history.push_state(self.document.pages());
        self.document
            .update_page(index, |page| add_operation_to_page(page, op));
        self.emit_document_changed(ChangeOrigin::Local);
        self.broadcast(kind);
        self.persist();
        id
    }

    /// Start drawing a stroke at `point`.
    pub fn begin_stroke(&mut self, point: Point, style: StrokeStyle) -> Result<()> {
        self.ensure_can_edit("draw")?;
        if self.config.broadcast_previews {
            self.broadcast(MessageKind::StrokeStart(StrokePreviewPayload {
                page_id: Some(self.document.current_page().id.clone()),
                points: vec![point],
                style: Some(style.clone()),
            }));
        }
        self.draft = Some(StrokeDraft {
            points: vec![point],
            style,
        });
        Ok(())
    }

    pub fn extend_stroke(&mut self, point: Point) -> Result<()> {
        self.ensure_can_edit("draw")?;
        let draft = self.draft.as_mut().ok_or(SyncError::NoStrokeInProgress)?;
        draft.points.push(point);
        if self.config.broadcast_previews {
            self.broadcast(MessageKind::StrokeMove(StrokePreviewPayload {
                page_id: Some(self.document.current_page().id.clone()),
                points: vec![point],
                style: None,
            }));
        }
        Ok(())
    }

    /// Commit the stroke in progress.
    ///
    /// Gestures with fewer than two points are discarded and return `Ok(None)`.
    pub fn finish_stroke(&mut self) -> Result<Option<OperationId>> {
        let draft = self.draft.take().ok_or(SyncError::NoStrokeInProgress)?;
        if draft.points.len() < 2 {
            debug!("Discarding stroke with {} point(s)", draft.points.len());
            return Ok(None);
        }
        let StrokeStyle { color, width, tool } = draft.style;
        self.add_stroke(draft.points, color, width, tool).map(Some)
    }

    pub fn cancel_stroke(&mut self) {
        self.draft = None;
    }

    /// Remove every operation from the current page.
    pub fn clear_page(&mut self) -> Result<()> {
        self.ensure_can_edit("clear_page")?;
        let index = self.document.current_page_index();
        let page_id = self.document.current_page().id.clone();

        self.history.push_state(self.document.pages());
        self.document.update_page(index, clear_page);
        self.emit_document_changed(ChangeOrigin::Local);
        self.broadcast(MessageKind::ClearPage(PageRef::new(page_id)));
        self.persist();
        Ok(())
    }

    /// Append an empty page and make it current. Returns its index.
    pub fn add_page(&mut self) -> Result<usize> {
        self.ensure_can_edit("add_page")?;
        let page = create_empty_page();
        let page_id = page.id.clone();

        let index = self.document.push_page(page);
        self.document.set_current_page_index(index)?;
        self.emit_document_changed(ChangeOrigin::Local);
        self.emit_page_changed();
        self.broadcast(MessageKind::AddPage(PageRef::new(page_id)));
        self.persist();
        Ok(index)
    }

    pub fn set_page(&mut self, index: usize) -> Result<()> {
        self.ensure_can_edit("set_page")?;
        self.document.set_current_page_index(index)?;
        self.emit_page_changed();
        self.broadcast(MessageKind::SetPage(SetPagePayload { index }));
        self.persist();
        Ok(())
    }

    /// Go back one page. Returns false when already on the first page.
    pub fn previous_page(&mut self) -> Result<bool> {
        self.ensure_can_edit("set_page")?;
        match self.document.current_page_index().checked_sub(1) {
            Some(index) => self.set_page(index).map(|()| true),
            None => Ok(false),
        }
    }

    /// Go forward one page. Returns false when already on the last page.
    pub fn next_page(&mut self) -> Result<bool> {
        self.ensure_can_edit("set_page")?;
        let index = self.document.current_page_index() + 1;
        if index < self.document.page_count() {
            self.set_page(index).map(|()| true)
        } else {
            Ok(false)
        }
    }

    pub fn undo(&mut self) -> Result<()> {
        self.ensure_can_edit("undo")?;
        let pages = self
            .history
            .undo(self.document.pages())
            .ok_or(SyncError::NothingToUndo)?;
        self.install_pages(pages, |pages| MessageKind::Undo(PagesPayload { pages }));
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        self.ensure_can_edit("redo")?;
        let pages = self.history.redo().ok_or(SyncError::NothingToRedo)?;
        self.install_pages(pages, |pages| MessageKind::Redo(PagesPayload { pages }));
        Ok(())
    }

    fn install_pages(&mut self, pages: Vec<Page>, message: impl FnOnce(Vec<Page>) -> MessageKind) {
        self.document.replace_pages(pages);
        self.emit_document_changed(ChangeOrigin::Local);
        self.emit_page_changed();
        self.broadcast(message(self.document.pages().to_vec()));
        self.persist();
    }

    /// Trainer only: `NOT_STARTED -> LIVE`. Clears local history.
    pub fn start_class(&mut self) -> Result<()> {
        self.transition_class(ClassStatus::Live, "start class")?;
        self.history.clear();
        Ok(())
    }

    /// Trainer only: `LIVE -> ENDED`.
    pub fn end_class(&mut self) -> Result<()> {
        self.transition_class(ClassStatus::Ended, "end class")
    }

    fn transition_class(&mut self, next: ClassStatus, action: &'static str) -> Result<()> {
        let current = self.document.class_status();
        if self.role != Role::Trainer {
            return Err(SyncError::NotAuthorized {
                action,
                role: self.role,
                status: current,
            });
        }
        self.document.transition(next).map_err(|_| SyncError::InvalidTransition {
            from: current,
            to: next,
        })?;
        self.draft = None;

        info!("Class in room {} is now {}", self.room_id, next);
        self.events.emit(RoomEvent::ClassStatusChanged {
            status: next,
            origin: ChangeOrigin::Local,
        });
        self.broadcast(MessageKind::ClassStatusChanged(StatusPayload { status: next }));
        self.persist();
        Ok(())
    }

    /// Hand the current pages to `exporter`. Reports the outcome as a room event.
    pub fn export_with(&self, exporter: &mut dyn Exporter) -> Result<ExportReport> {
        match exporter.export(&self.room_id, self.document.pages()) {
            Ok(report) => {
                info!("Exported {} page(s) to {}", report.pages, report.location);
                self.events.emit(RoomEvent::ExportFinished {
                    ok: true,
                    detail: report.location.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                warn!("Export failed for room {}: {}", self.room_id, e);
                self.events.emit(RoomEvent::ExportFinished {
                    ok: false,
                    detail: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    // ===== Side effects =====

    fn broadcast(&self, kind: MessageKind) {
        let msg_type = kind.type_name();
        if let Err(e) = self.bus.send(kind) {
            warn!("Failed to broadcast {}: {}", msg_type, e);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.document) {
            warn!("Failed to persist room {}: {}", self.room_id, e);
        }
    }

    fn emit_document_changed(&self, origin: ChangeOrigin) {
        self.events.emit(RoomEvent::DocumentChanged { origin });
    }

    fn emit_page_changed(&self) {
        self.events.emit(RoomEvent::PageChanged {
            index: self.document.current_page_index(),
            page_count: self.document.page_count(),
        });
    }
}

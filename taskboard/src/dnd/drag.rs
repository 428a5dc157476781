//! The drag gesture state machine.

use tokio::sync::watch;

use taskboard_proto::ids::TaskId;
use taskboard_proto::task::{Task, TaskStatus};

use super::OFFSCREEN_SENTINEL;
use super::zones::DropZoneRegistry;

/// Pointer coordinates in the board's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerPosition {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl PointerPosition {
    /// Creates a position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// The parked position, `(sentinel, sentinel)`.
    #[must_use]
    pub const fn offscreen(sentinel: f64) -> Self {
        Self::new(sentinel, sentinel)
    }
}

impl Default for PointerPosition {
    fn default() -> Self {
        Self::offscreen(OFFSCREEN_SENTINEL)
    }
}

/// Where the gesture is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DragState {
    /// Nothing is being dragged.
    #[default]
    Idle,
    /// A card is being dragged.
    Dragging {
        /// The dragged task as last seen.
        task: Task,
    },
}

/// How a drag ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Dropped on another column; its callback ran.
    Accepted {
        /// The moved task.
        task_id: TaskId,
        /// Column it left.
        from: TaskStatus,
        /// Column it was dropped on.
        to: TaskStatus,
    },
    /// Dropped on its own column; nothing happened.
    SameColumn {
        /// The dragged task.
        task_id: TaskId,
    },
    /// Released outside every zone; the card snaps back.
    Cancelled {
        /// The dragged task.
        task_id: TaskId,
    },
    /// No drag was in progress.
    NotDragging,
}

/// Owns the dragged card and the live pointer position.
#[derive(Debug)]
pub struct DragController {
    state: DragState,
    pointer: watch::Sender<PointerPosition>,
    offscreen: PointerPosition,
}

impl Default for DragController {
    fn default() -> Self {
        Self::new(OFFSCREEN_SENTINEL)
    }
}

impl DragController {
    /// Creates an idle controller that parks the pointer at `sentinel`.
    #[must_use]
    pub fn new(sentinel: f64) -> Self {
        let offscreen = PointerPosition::offscreen(sentinel);
        let (pointer, _) = watch::channel(offscreen);
        Self {
            state: DragState::Idle,
            pointer,
            offscreen,
        }
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> &DragState {
        &self.state
    }

    /// Returns `true` while a card is being dragged.
    #[must_use]
    pub const fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// The dragged task, if any.
    #[must_use]
    pub const fn active_item(&self) -> Option<&Task> {
        match &self.state {
            DragState::Dragging { task } => Some(task),
            DragState::Idle => None,
        }
    }

    /// Returns `true` if `task_id`'s own card should be hidden because its
    /// drag overlay is showing instead.
    #[must_use]
    pub fn is_hidden(&self, task_id: &TaskId) -> bool {
        self.active_item().is_some_and(|t| t.id == *task_id)
    }

    /// A stream of pointer positions for the drag overlay.
    #[must_use]
    pub fn pointer_stream(&self) -> watch::Receiver<PointerPosition> {
        self.pointer.subscribe()
    }

    /// The last reported pointer position.
    #[must_use]
    pub fn pointer(&self) -> PointerPosition {
        *self.pointer.borrow()
    }

    /// Starts dragging `task`. A drag already in progress is abandoned.
    pub fn start_drag(&mut self, task: Task) {
        tracing::debug!(task_id = %task.id, status = %task.status, "drag started");
        self.state = DragState::Dragging { task };
    }

    /// Records a pointer move. Ignored while idle.
    pub fn move_pointer(&self, x: f64, y: f64) {
        if self.is_dragging() {
            self.pointer.send_replace(PointerPosition::new(x, y));
        }
    }

    /// Refreshes the dragged task from the store. `None` means it is gone,
    /// which cancels the drag.
    pub fn sync_active(&mut self, latest: Option<Task>) {
        let DragState::Dragging { task } = &mut self.state else {
            return;
        };
        match latest {
            Some(latest) if latest.id == task.id => *task = latest,
            Some(_) => {}
            None => {
                tracing::debug!(task_id = %task.id, "dragged task vanished, drag cancelled");
                self.reset();
            }
        }
    }

    /// Ends the drag at `(x, y)`.
    ///
    /// Runs the resolved zone's callback only when the zone's column
    /// differs from the task's current status. Always returns to idle with
    /// the pointer parked off screen.
    pub fn end_drag(&mut self, x: f64, y: f64, zones: &DropZoneRegistry) -> DropOutcome {
        let DragState::Dragging { task } = std::mem::take(&mut self.state) else {
            return DropOutcome::NotDragging;
        };
        self.reset();

        let outcome = match zones.resolve(x, y) {
            None => DropOutcome::Cancelled { task_id: task.id },
            Some(zone) if zone.id == task.status => DropOutcome::SameColumn { task_id: task.id },
            Some(zone) => {
                zone.accept(&task);
                DropOutcome::Accepted {
                    task_id: task.id,
                    from: task.status,
                    to: zone.id,
                }
            }
        };
        tracing::debug!(task_id = %task.id, x, y, ?outcome, "drag ended");
        outcome
    }

    /// Back to idle without resolving anything.
    pub fn reset(&mut self) {
        self.state = DragState::Idle;
        self.pointer.send_replace(self.offscreen);
    }
}

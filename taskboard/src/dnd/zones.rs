//! Column hit-regions.

use std::fmt;
use std::sync::Arc;

use taskboard_proto::task::{Task, TaskStatus};

/// An axis-aligned rectangle in the board's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Rect {
    /// Creates a rectangle.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns `true` if `(x, y)` lies inside or on any edge.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// Callback run when a task is dropped onto a zone.
pub type AcceptFn = Arc<dyn Fn(&Task) + Send + Sync>;

/// A registered column.
#[derive(Clone)]
pub struct DropZone {
    /// The column this zone stands for.
    pub id: TaskStatus,
    /// Where the column is on screen.
    pub rect: Rect,
    on_accept: AcceptFn,
}

impl DropZone {
    /// Hands `task` to the zone's callback.
    pub fn accept(&self, task: &Task) {
        (self.on_accept)(task);
    }
}

impl fmt::Debug for DropZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropZone")
            .field("id", &self.id)
            .field("rect", &self.rect)
            .finish_non_exhaustive()
    }
}

/// The live set of drop zones for one board view.
///
/// Cloning is cheap; callbacks are shared.
#[derive(Debug, Clone, Default)]
pub struct DropZoneRegistry {
    zones: Vec<DropZone>,
}

impl DropZoneRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the zone for `id`, replacing any earlier registration.
    ///
    /// The replacement moves to the end of the registration order.
    pub fn register<F>(&mut self, id: TaskStatus, rect: Rect, on_accept: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.zones.retain(|z| z.id != id);
        self.zones.push(DropZone {
            id,
            rect,
            on_accept: Arc::new(on_accept),
        });
        tracing::trace!(zone = %id, ?rect, "drop zone registered");
    }

    /// Removes the zone for `id`, if any.
    pub fn unregister(&mut self, id: TaskStatus) {
        self.zones.retain(|z| z.id != id);
    }

    /// The first zone, in registration order, containing `(x, y)`.
    #[must_use]
    pub fn resolve(&self, x: f64, y: f64) -> Option<&DropZone> {
        self.zones.iter().find(|z| z.rect.contains(x, y))
    }

    /// The zone registered for `id`.
    #[must_use]
    pub fn get(&self, id: TaskStatus) -> Option<&DropZone> {
        self.zones.iter().find(|z| z.id == id)
    }

    /// Removes every zone.
    pub fn clear(&mut self) {
        self.zones.clear();
    }

    /// Number of registered zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns `true` if no zone is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

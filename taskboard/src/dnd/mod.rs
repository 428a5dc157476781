//! Drag and drop of task cards between board columns.
//!
//! Two channels, kept apart on purpose: pointer moves go to a
//! [`tokio::sync::watch`] stream that only the drag overlay reads, and the
//! single drop decision resolves against the [`DropZoneRegistry`] on
//! release. Only the drop touches the task store.

pub mod drag;
pub mod zones;

pub use drag::{DragController, DragState, DropOutcome, PointerPosition};
pub use zones::{DropZone, DropZoneRegistry, Rect};

/// Coordinate the pointer is parked at while nothing is dragged.
pub const OFFSCREEN_SENTINEL: f64 = -9999.0;

//! Client-side synchronization and interaction engine for a
//! collaborative task board.

pub mod backend;
pub mod boards;
pub mod comments;
pub mod config;
pub mod dnd;
pub mod error;
pub mod events;
pub mod feed;
pub mod identity;
pub mod members;
pub mod mutation;
pub mod presence;
pub mod session;
pub mod tasks;

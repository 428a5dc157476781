//! Shared data model and change-feed vocabulary for `Taskboard`.

pub mod board;
pub mod comment;
pub mod feed;
pub mod ids;
pub mod member;
pub mod notification;
pub mod presence;
pub mod task;

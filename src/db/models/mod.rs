//! Database models.

pub mod event;

pub use self::event::*;

pub mod auth;
pub mod calendar;
pub mod events;
pub mod health;
pub mod import;
pub mod settings;

pub mod auth;
pub mod calendar_view;
pub mod events;
pub mod feed;
pub mod fingerprint;
pub mod import;
pub mod init;
pub mod recurrence;
pub mod validation;

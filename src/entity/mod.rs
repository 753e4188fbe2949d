//! Database entity models for laravel-sessions-seaorm-store.
//!
//! The only entity is `session`, the Laravel-shaped row that stores one session.

/// Session entity model for Sea-ORM database interaction.
pub mod session;

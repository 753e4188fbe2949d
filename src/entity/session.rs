//! Session entity model for Sea-ORM database interaction.
//!
//! This module defines the row shape used by Laravel's `database` session driver, so a
//! table created by `php artisan session:table` and one created by this crate's migration
//! are interchangeable.

use sea_orm::entity::prelude::*;

/// Sea-ORM entity model representing one session row.
///
/// The entity maps to the `sessions` table by default. `DbStore` builds its queries
/// against the configured table name, so this model is mostly used to decode rows.
///
/// # Database Schema
///
/// | Column        | Type                 | Description                              |
/// |---------------|----------------------|------------------------------------------|
/// | id            | VARCHAR (Primary Key)| Raw session identifier                   |
/// | user_id       | BIGINT NULL          | Resolved user, when one is known         |
/// | ip_address    | VARCHAR(45) NULL     | Client address at the last write         |
/// | user_agent    | TEXT NULL            | Client user agent, at most 255 chars     |
/// | payload       | TEXT                 | Base64 of the serialized session data    |
/// | last_activity | BIGINT               | Unix timestamp of the last write         |
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// The raw (never encrypted) session identifier.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Identifier of the authenticated user, if any.
    pub user_id: Option<i64>,

    /// Client network address recorded at the last write.
    ///
    /// Nullable because Laravel itself may store `NULL` here.
    pub ip_address: Option<String>,

    /// Client user agent recorded at the last write.
    pub user_agent: Option<String>,

    /// Base64-encoded serialized session data.
    #[sea_orm(column_type = "Text")]
    pub payload: String,

    /// Unix timestamp of the last write. Reads never touch it.
    pub last_activity: i64,
}

/// Required enum for Sea-ORM entity relations.
///
/// Sessions are not linked to other entities here; `user_id` is resolved by the host
/// application.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

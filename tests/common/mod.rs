#![allow(dead_code)]

// Shared helpers for integration tests.
//
// Every test gets its own in-memory SQLite database. The pool is capped at one connection so
// the migrated schema and the store see the same database.
use std::sync::Arc;

use laravel_sessions_seaorm_store::migration::{Migrator, MigratorTrait};
use laravel_sessions_seaorm_store::{
    DbStore, ManualClock, RecordStore, RequestContext, StaticContext, StoreConfig,
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

pub const KEY: &str = "base64:MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
pub const COOKIE: &str = "myapp_session";
pub const RAW_ID: &str = "aBcDeFgHiJkLmNoPqRsTuVwXyZ23456789ABCDEF";

pub const LOGIN_KEY: &str = "login_web_59ba36addc2b2f9401580f014c7f58ea4e30989d";
pub const VIEW_ERROR_BAG: &[u8] =
    b"O:31:\"Illuminate\\Support\\ViewErrorBag\":1:{s:7:\"\0*\0bags\";a:0:{}}";

// What Laravel stores after a failed form validation for a logged-in user.
pub const LARAVEL_PAYLOAD: &[u8] = b"a:3:{\
    s:6:\"_token\";s:40:\"aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd\";\
    s:50:\"login_web_59ba36addc2b2f9401580f014c7f58ea4e30989d\";i:7;\
    s:6:\"errors\";O:31:\"Illuminate\\Support\\ViewErrorBag\":1:{s:7:\"\0*\0bags\";a:0:{}}}";

pub async fn connect() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .expect("in-memory sqlite connects");
    Migrator::up(&db, None)
        .await
        .expect("sessions table migrates");
    db
}

pub fn clock(now: i64) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(now))
}

pub fn config(clock: &Arc<ManualClock>) -> StoreConfig {
    StoreConfig::new(COOKIE).with_clock(clock.clone())
}

pub async fn store(config: StoreConfig) -> DbStore {
    DbStore::new(connect().await, config)
        .await
        .expect("store builds")
}

pub fn context() -> Arc<dyn RequestContext> {
    Arc::new(StaticContext::new("192.0.2.10", "Mozilla/5.0 (X11; Linux x86_64)"))
}

pub fn records(store: &DbStore) -> RecordStore {
    store.for_request(context())
}

// Tests for the session manager: cookie handling, identifier generation, regeneration and
// saving attributes back to the store.
mod common;

use std::sync::Mutex;

use laravel_sessions_seaorm_store::serialize;
use laravel_sessions_seaorm_store::{
    CookieParams, CookieTransport, DbStore, ManagerConfig, SerializeHandler, SessionManager,
    SessionState,
};
use time::Duration;
use tower_cookies::cookie::CookieJar;

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

async fn encrypted_store() -> DbStore {
    let clock = common::clock(1_000);
    common::store(common::config(&clock).with_laravel_key(common::KEY)).await
}

fn manager(store: &DbStore) -> SessionManager {
    SessionManager::new(common::records(store), ManagerConfig::default())
}

fn jar() -> Mutex<CookieJar> {
    Mutex::new(CookieJar::new())
}

#[tokio::test]
async fn start_emits_a_wrapped_cookie() {
    let store = encrypted_store().await;
    let mut session = manager(&store);
    let cookies = jar();

    assert_eq!(session.state(), SessionState::Unbound);
    assert!(session.start(&cookies).await.unwrap());
    assert_eq!(session.state(), SessionState::BoundNew);
    assert!(session.attributes().is_empty());

    let value = cookies.cookie_value(common::COOKIE).expect("session cookie set");
    assert_eq!(Some(value.as_str()), session.id());
    assert!(store.codec().is_wrapped(&value));

    let raw = store.codec().decode(&value).unwrap();
    assert_eq!(raw.chars().count(), 40);
    assert!(raw.chars().all(|c| BASE58.contains(c)));
}

#[tokio::test]
async fn cookie_carries_configured_attributes() {
    let store = encrypted_store().await;
    let config = ManagerConfig::default().with_cookie(
        CookieParams::default()
            .with_path("/app")
            .with_secure(true)
            .with_lifetime(Duration::hours(2)),
    );
    let mut session = SessionManager::new(common::records(&store), config);
    let cookies = jar();

    session.start(&cookies).await.unwrap();

    let jar = cookies.lock().unwrap();
    let cookie = jar.get(common::COOKIE).unwrap();
    assert_eq!(cookie.path(), Some("/app"));
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.max_age(), Some(Duration::hours(2)));
    assert!(cookie.expires_datetime().is_some());
}

#[tokio::test]
async fn generated_ids_are_raw_base58() {
    let store = encrypted_store().await;
    let mut session = manager(&store);

    let raw = session.generate_custom_id().await.unwrap();
    assert_eq!(raw.chars().count(), 40);
    assert!(raw.chars().all(|c| BASE58.contains(c)));
    assert!(!store.codec().is_wrapped(&raw));

    let bound = session.id().unwrap();
    assert_ne!(bound, raw);
    assert_eq!(store.codec().decode(bound).as_deref(), Some(raw.as_str()));
    assert_eq!(session.state(), SessionState::BoundNew);

    assert_ne!(session.generate_custom_id().await.unwrap(), raw);
}

#[tokio::test]
async fn saved_attributes_survive_a_resume() {
    let store = encrypted_store().await;
    let cookies = jar();

    let mut first = manager(&store);
    first.start(&cookies).await.unwrap();
    first.insert("foo", "bar").unwrap();
    first.insert("count", 3).unwrap();
    assert!(first.save().await.unwrap());

    let mut second = manager(&store);
    assert!(second.resume(&cookies).await.unwrap());
    assert_eq!(second.state(), SessionState::BoundExisting);
    assert_eq!(second.id(), first.id());

    second.start(&cookies).await.unwrap();
    assert_eq!(second.state(), SessionState::BoundExisting);
    assert_eq!(second.get::<String>("foo").as_deref(), Some("bar"));
    assert_eq!(second.get::<i64>("count"), Some(3));
}

#[tokio::test]
async fn resume_ignores_unknown_cookies() {
    let store = encrypted_store().await;
    let mut session = manager(&store);

    let cookies = jar();
    assert!(!session.resume(&cookies).await.unwrap());

    let wrapped = store.codec().encode(common::RAW_ID).unwrap();
    cookies
        .lock()
        .unwrap()
        .add(tower_cookies::Cookie::new(common::COOKIE, wrapped));
    assert!(!session.resume(&cookies).await.unwrap());
    assert_eq!(session.id(), None);
    assert_eq!(session.state(), SessionState::Unbound);
}

#[tokio::test]
async fn set_id_wraps_raw_ids_once() {
    let store = encrypted_store().await;
    let mut session = manager(&store);

    session.set_id(common::RAW_ID).await.unwrap();
    let wrapped = session.id().unwrap().to_owned();
    assert!(store.codec().is_wrapped(&wrapped));

    session.set_id(&wrapped).await.unwrap();
    assert_eq!(session.id(), Some(wrapped.as_str()));
}

#[tokio::test]
async fn unencrypted_manager_keeps_raw_ids() {
    let store = encrypted_store().await;
    let mut session = SessionManager::new(
        common::records(&store),
        ManagerConfig::default().with_encrypt(false),
    );
    let cookies = jar();

    session.start(&cookies).await.unwrap();
    let value = cookies.cookie_value(common::COOKIE).unwrap();
    assert_eq!(value.chars().count(), 40);
    assert!(!store.codec().is_wrapped(&value));
}

#[tokio::test]
async fn regenerate_keeps_attributes_and_old_row() {
    let store = encrypted_store().await;
    let mut session = manager(&store);
    let cookies = jar();

    session.start(&cookies).await.unwrap();
    session.insert("foo", "bar").unwrap();
    session.save().await.unwrap();
    let old = session.id().unwrap().to_owned();

    session.regenerate_id(false, &cookies).await.unwrap();
    let new = session.id().unwrap().to_owned();

    assert_ne!(old, new);
    assert_eq!(cookies.cookie_value(common::COOKIE), Some(new.clone()));
    assert_eq!(session.get::<String>("foo").as_deref(), Some("bar"));
    assert!(session.exist_id(&old).await.unwrap());

    session.save().await.unwrap();
    assert!(session.exist_id(&new).await.unwrap());
}

#[tokio::test]
async fn regenerate_with_delete_drops_old_row() {
    let store = encrypted_store().await;
    let mut session = manager(&store);
    let cookies = jar();

    session.start(&cookies).await.unwrap();
    session.insert("foo", "bar").unwrap();
    session.save().await.unwrap();
    let old = session.id().unwrap().to_owned();

    session.regenerate_id(true, &cookies).await.unwrap();

    assert_ne!(session.id(), Some(old.as_str()));
    assert!(!session.exist_id(&old).await.unwrap());
    assert!(session.attributes().is_empty());
    assert_eq!(session.state(), SessionState::BoundNew);
}

#[tokio::test]
async fn destroy_unbinds_the_session() {
    let store = encrypted_store().await;
    let mut session = manager(&store);
    let cookies = jar();

    session.start(&cookies).await.unwrap();
    session.insert("foo", "bar").unwrap();
    session.save().await.unwrap();
    let id = session.id().unwrap().to_owned();

    assert!(session.destroy().await.unwrap());
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(session.id(), None);
    assert!(session.attributes().is_empty());
    assert!(!session.exist_id(&id).await.unwrap());
    assert!(!session.save().await.unwrap());
}

#[tokio::test]
async fn save_uses_configured_handler_without_session_var() {
    let clock = common::clock(1_000);
    let store = common::store(
        common::config(&clock)
            .with_data_from_session_var(false)
            .with_serialize_handler(SerializeHandler::Php),
    )
    .await;
    let mut session = manager(&store);
    let cookies = jar();

    session.start(&cookies).await.unwrap();
    session.insert("foo", "bar").unwrap();
    session.save().await.unwrap();

    let mut records = common::records(&store);
    let payload = records.read(session.id().unwrap()).await.unwrap();
    assert_eq!(payload, b"foo|s:3:\"bar\";");
    assert_eq!(
        serialize::decode(SerializeHandler::Php, &payload).unwrap(),
        *session.attributes()
    );
}

#[tokio::test]
async fn save_uses_php_serialize_with_session_var() {
    let clock = common::clock(1_000);
    let store = common::store(
        common::config(&clock)
            .with_data_from_session_var(true)
            .with_serialize_handler(SerializeHandler::Php),
    )
    .await;
    let mut session = manager(&store);
    let cookies = jar();

    session.start(&cookies).await.unwrap();
    session.insert("foo", "bar").unwrap();
    session.save().await.unwrap();

    let mut records = common::records(&store);
    let payload = records.read(session.id().unwrap()).await.unwrap();
    assert_eq!(payload, b"a:1:{s:3:\"foo\";s:3:\"bar\";}");
}

#[tokio::test]
async fn undecodable_payload_starts_empty() {
    let clock = common::clock(1_000);
    let store = common::store(common::config(&clock)).await;

    let mut records = common::records(&store);
    records.write(common::RAW_ID, b"not php").await.unwrap();

    let mut session = SessionManager::new(
        common::records(&store),
        ManagerConfig::default().with_encrypt(false),
    );
    session.set_id(common::RAW_ID).await.unwrap();
    assert_eq!(session.state(), SessionState::BoundExisting);

    session.start(&jar()).await.unwrap();
    assert!(session.attributes().is_empty());
    assert!(!session.is_readable());
    assert_eq!(session.state(), SessionState::BoundExisting);

    session.insert("foo", "bar").unwrap();
    assert!(!session.save().await.unwrap());
    assert_eq!(records.read(common::RAW_ID).await.unwrap(), b"not php");
}

#[tokio::test]
async fn laravel_objects_survive_a_save() {
    let clock = common::clock(1_000);
    let store = common::store(common::config(&clock)).await;

    let mut records = common::records(&store);
    records
        .write(common::RAW_ID, common::LARAVEL_PAYLOAD)
        .await
        .unwrap();

    let mut session = SessionManager::new(
        common::records(&store),
        ManagerConfig::default().with_encrypt(false),
    );
    session.set_id(common::RAW_ID).await.unwrap();
    session.start(&jar()).await.unwrap();

    assert!(session.is_readable());
    assert_eq!(
        session.get::<String>("_token").as_deref(),
        Some("aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd")
    );
    assert_eq!(session.get::<i64>(common::LOGIN_KEY), Some(7));
    assert_eq!(session.preserved_keys().collect::<Vec<_>>(), ["errors"]);

    session.insert("foo", "bar").unwrap();
    assert!(session.save().await.unwrap());

    let payload = records.read(common::RAW_ID).await.unwrap();
    let saved = serialize::decode_session(SerializeHandler::PhpSerialize, &payload).unwrap();
    assert_eq!(saved.attributes["_token"], "aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd");
    assert_eq!(saved.attributes[common::LOGIN_KEY], 7);
    assert_eq!(saved.attributes["foo"], "bar");
    assert_eq!(saved.raw["errors"], common::VIEW_ERROR_BAG);
}

#[tokio::test]
async fn overwriting_a_preserved_value_replaces_it() {
    let clock = common::clock(1_000);
    let store = common::store(common::config(&clock)).await;

    let mut records = common::records(&store);
    records
        .write(common::RAW_ID, common::LARAVEL_PAYLOAD)
        .await
        .unwrap();

    let mut session = SessionManager::new(
        common::records(&store),
        ManagerConfig::default().with_encrypt(false),
    );
    session.set_id(common::RAW_ID).await.unwrap();
    session.start(&jar()).await.unwrap();

    session.insert("errors", Vec::<String>::new()).unwrap();
    assert_eq!(session.preserved_keys().count(), 0);
    session.remove(common::LOGIN_KEY);
    session.save().await.unwrap();

    let payload = records.read(common::RAW_ID).await.unwrap();
    let saved = serialize::decode(SerializeHandler::PhpSerialize, &payload).unwrap();
    assert_eq!(saved["errors"], serde_json::json!([]));
    assert!(!saved.contains_key(common::LOGIN_KEY));
}

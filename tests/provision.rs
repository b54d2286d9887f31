//! Сквозная выдача/продление подписки против mock-панели и БД в памяти.

use squadron_admin::config::PanelConfig;
use squadron_admin::db::Db;
use squadron_admin::panel::{PanelClient, PanelError};
use squadron_admin::provision::Provisioner;
use squadron_admin::squads::CapacityPolicy;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DAY: i64 = 86_400;

async fn provisioner(uri: &str) -> (Provisioner, Arc<Db>) {
    let panel = Arc::new(
        PanelClient::new(&PanelConfig {
            base_url: uri.to_string(),
            token: Some("test-token".to_string()),
            username: None,
            password: None,
            request_timeout_seconds: 5,
        })
        .expect("клиент должен создаваться"),
    );
    let db = Arc::new(Db::open_in_memory().await.expect("БД в памяти"));
    let policy = CapacityPolicy {
        max_members_per_squad: 30,
        name_prefix: "internal".to_string(),
        normalization_delay: Duration::ZERO,
    };
    (Provisioner::new(panel, db.clone(), policy), db)
}

async fn mount_squads(mock_server: &MockServer, squads: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/internal-squads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "internalSquads": squads }
        })))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn new_subscriber_is_created_and_assigned() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/by-username/42"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "uuid": "u-42", "username": "42" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    mount_squads(
        &mock_server,
        json!([{ "uuid": "s-1", "name": "internal-1", "info": { "membersCount": 5 } }]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/users/bulk/update-squads"))
        .and(body_json(json!({
            "uuids": ["u-42"],
            "activeInternalSquads": ["s-1"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (provisioner, db) = provisioner(&mock_server.uri()).await;
    let before = chrono::Utc::now().timestamp();
    let outcome = provisioner.provision_or_extend(42, 30).await.unwrap();
    let after = chrono::Utc::now().timestamp();

    assert!(outcome.user_created);
    assert!(!outcome.squad_created);
    assert!(outcome.normalization.is_none());
    assert_eq!(outcome.squad_name, "internal-1");
    assert!(outcome.new_expire >= before + 30 * DAY);
    assert!(outcome.new_expire <= after + 30 * DAY);

    assert_eq!(db.get_expiry(42).await.unwrap(), Some(outcome.new_expire));
}

#[tokio::test]
async fn future_expiry_is_extended_from_its_end() {
    let mock_server = MockServer::start().await;

    // 2030-01-01T00:00:00Z, заведомо в будущем относительно часов теста.
    Mock::given(method("GET"))
        .and(path("/api/users/by-username/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "uuid": "u-42",
                "username": "42",
                "expireAt": "2030-01-01T00:00:00Z"
            }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/api/users"))
        .and(body_json(json!({
            "username": "42",
            "expireAt": "2030-01-31T00:00:00Z"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .expect(1)
        .mount(&mock_server)
        .await;

    mount_squads(
        &mock_server,
        json!([{ "uuid": "s-1", "name": "internal-1", "info": { "membersCount": 5 } }]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/users/bulk/update-squads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (provisioner, db) = provisioner(&mock_server.uri()).await;
    let outcome = provisioner.provision_or_extend(42, 30).await.unwrap();

    assert!(!outcome.user_created);
    assert_eq!(outcome.new_expire, 1_893_456_000 + 30 * DAY);
    assert_eq!(db.get_expiry(42).await.unwrap(), Some(outcome.new_expire));
}

#[tokio::test]
async fn expired_subscription_extends_from_now() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/by-username/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "uuid": "u-42",
                "username": "42",
                "expireAt": "2020-01-01T00:00:00Z"
            }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .expect(1)
        .mount(&mock_server)
        .await;

    mount_squads(
        &mock_server,
        json!([{ "uuid": "s-1", "name": "internal-1", "info": { "membersCount": 5 } }]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/users/bulk/update-squads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .mount(&mock_server)
        .await;

    let (provisioner, _db) = provisioner(&mock_server.uri()).await;
    let before = chrono::Utc::now().timestamp();
    let outcome = provisioner.provision_or_extend(42, 7).await.unwrap();

    // Истёкший срок не продлевается от прошлого, точка отсчёта — сейчас.
    assert!(outcome.new_expire >= before + 7 * DAY);
}

#[tokio::test]
async fn full_panel_grows_a_squad_and_normalizes_it() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/by-username/42"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "uuid": "u-42", "username": "42" }
        })))
        .mount(&mock_server)
        .await;

    mount_squads(
        &mock_server,
        json!([{
            "uuid": "s-1",
            "name": "internal-1",
            "info": { "membersCount": 30 },
            "inbounds": [{ "uuid": "in-a" }]
        }]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/internal-squads"))
        .and(body_json(json!({ "name": "internal-2", "inbounds": ["in-a"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "uuid": "s-2", "name": "internal-2" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/users/bulk/update-squads"))
        .and(body_json(json!({
            "uuids": ["u-42"],
            "activeInternalSquads": ["s-2"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Обход нормализации: список пользователей уже в нужном состоянии.
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "users": [{
                    "uuid": "u-42",
                    "username": "42",
                    "activeInternalSquads": [{ "uuid": "s-2" }]
                }],
                "total": 1
            }
        })))
        .mount(&mock_server)
        .await;

    let (provisioner, _db) = provisioner(&mock_server.uri()).await;
    let outcome = provisioner.provision_or_extend(42, 30).await.unwrap();

    assert!(outcome.squad_created);
    assert_eq!(outcome.squad_name, "internal-2");
    let handle = outcome.normalization.expect("нормализация должна запуститься");
    handle.await.unwrap();
}

#[tokio::test]
async fn broken_store_does_not_abort_provisioning() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/by-username/42"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "uuid": "u-42", "username": "42" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    mount_squads(
        &mock_server,
        json!([{ "uuid": "s-1", "name": "internal-1", "info": { "membersCount": 5 } }]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/users/bulk/update-squads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = std::env::temp_dir().join(format!("squadron-admin-store-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let db_path = dir.join("subscriptions.db");
    let db = Arc::new(Db::open(&db_path).await.unwrap());

    // Ломаем хранилище из-под клиента: запись срока упадёт на "no such table".
    let saboteur =
        sqlx::sqlite::SqlitePool::connect(&format!("sqlite:{}", db_path.display()))
            .await
            .unwrap();
    sqlx::query("DROP TABLE subscription")
        .execute(&saboteur)
        .await
        .unwrap();
    saboteur.close().await;

    let panel = Arc::new(
        PanelClient::new(&PanelConfig {
            base_url: mock_server.uri(),
            token: Some("test-token".to_string()),
            username: None,
            password: None,
            request_timeout_seconds: 5,
        })
        .unwrap(),
    );
    let provisioner = Provisioner::new(
        panel,
        db,
        CapacityPolicy {
            max_members_per_squad: 30,
            name_prefix: "internal".to_string(),
            normalization_delay: Duration::ZERO,
        },
    );

    // Состояние панели уже применено, сбой локальной БД не отменяет выдачу.
    let outcome = provisioner.provision_or_extend(42, 30).await.unwrap();
    assert!(outcome.user_created);
    assert_eq!(outcome.squad_name, "internal-1");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn panel_failure_surfaces_and_db_stays_clean() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/by-username/42"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let (provisioner, db) = provisioner(&mock_server.uri()).await;
    let error = provisioner.provision_or_extend(42, 30).await.unwrap_err();
    assert!(matches!(error, PanelError::Status { status: 500, .. }));
    assert_eq!(db.get_expiry(42).await.unwrap(), None);
}

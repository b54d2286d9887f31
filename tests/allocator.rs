//! Выбор и создание отрядов против mock-панели.

use squadron_admin::config::PanelConfig;
use squadron_admin::panel::PanelClient;
use squadron_admin::squads::{allocate, CapacityPolicy};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn panel(uri: &str) -> PanelClient {
    PanelClient::new(&PanelConfig {
        base_url: uri.to_string(),
        token: Some("test-token".to_string()),
        username: None,
        password: None,
        request_timeout_seconds: 5,
    })
    .expect("клиент должен создаваться")
}

fn policy(ceiling: i64) -> CapacityPolicy {
    CapacityPolicy {
        max_members_per_squad: ceiling,
        name_prefix: "internal".to_string(),
        normalization_delay: Duration::ZERO,
    }
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
async fn picks_first_squad_with_room_without_creating() {
    let mock_server = MockServer::start().await;
    mount_squads(
        &mock_server,
        json!([
            { "uuid": "s-1", "name": "internal-1", "info": { "membersCount": 29 } },
            { "uuid": "s-2", "name": "internal-2", "info": { "membersCount": 3 } }
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/internal-squads"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = panel(&mock_server.uri());
    let allocation = allocate(&client, &policy(30)).await.unwrap();
    assert_eq!(allocation.squad.uuid, "s-1");
    assert!(!allocation.was_created);
}

#[tokio::test]
async fn squad_at_ceiling_is_skipped() {
    let mock_server = MockServer::start().await;
    mount_squads(
        &mock_server,
        json!([
            { "uuid": "s-1", "name": "internal-1", "info": { "membersCount": 30 } },
            { "uuid": "s-2", "name": "internal-2", "info": { "membersCount": 29 } }
        ]),
    )
    .await;

    let client = panel(&mock_server.uri());
    let allocation = allocate(&client, &policy(30)).await.unwrap();
    assert_eq!(allocation.squad.uuid, "s-2");
    assert!(!allocation.was_created);
}

#[tokio::test]
async fn creates_next_squad_with_template_inbounds_when_all_full() {
    let mock_server = MockServer::start().await;
    mount_squads(
        &mock_server,
        json!([
            { "uuid": "s-1", "name": "internal-1", "info": { "membersCount": 30 } },
            {
                "uuid": "s-2",
                "name": "internal-2",
                "info": { "membersCount": 30 },
                "inbounds": [{ "uuid": "in-a" }, { "uuid": "in-b" }]
            }
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/internal-squads"))
        .and(body_json(json!({
            "name": "internal-3",
            "inbounds": ["in-a", "in-b"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "uuid": "s-3", "name": "internal-3" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = panel(&mock_server.uri());
    let allocation = allocate(&client, &policy(30)).await.unwrap();
    assert_eq!(allocation.squad.uuid, "s-3");
    assert_eq!(allocation.squad.name, "internal-3");
    assert!(allocation.was_created);
}

#[tokio::test]
async fn first_squad_ever_is_created_with_empty_inbounds() {
    let mock_server = MockServer::start().await;
    mount_squads(&mock_server, json!([])).await;

    Mock::given(method("POST"))
        .and(path("/api/internal-squads"))
        .and(body_json(json!({ "name": "internal-1", "inbounds": [] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "uuid": "s-1", "name": "internal-1" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = panel(&mock_server.uri());
    let allocation = allocate(&client, &policy(30)).await.unwrap();
    assert_eq!(allocation.squad.name, "internal-1");
    assert!(allocation.was_created);
}

#[tokio::test]
async fn foreign_squad_names_do_not_affect_numbering() {
    let mock_server = MockServer::start().await;
    mount_squads(
        &mock_server,
        json!([
            { "uuid": "s-x", "name": "vip-7", "info": { "membersCount": 30 } },
            { "uuid": "s-2", "name": "internal-2", "info": { "membersCount": 30 } }
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/internal-squads"))
        .and(body_json(json!({ "name": "internal-3", "inbounds": [] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "uuid": "s-3", "name": "internal-3" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = panel(&mock_server.uri());
    let allocation = allocate(&client, &policy(30)).await.unwrap();
    assert_eq!(allocation.squad.name, "internal-3");
}

//! REST API integration tests against an in-memory cluster.

#![allow(clippy::panic)]

mod common;

use pg_ha_coordinator::adapter::{AdapterCommand, NodeState};
use reqwest::StatusCode;

use common::{cluster, spawn_app};

async fn get_json(url: &str) -> (StatusCode, serde_json::Value) {
    let Ok(response) = reqwest::get(url).await else {
        panic!("request to {url} failed");
    };
    let status = response.status();
    let Ok(body) = response.json::<serde_json::Value>().await else {
        panic!("expected a JSON body from {url}");
    };
    (status, body)
}

async fn post_json(url: &str) -> (StatusCode, serde_json::Value) {
    let Ok(response) = reqwest::Client::new().post(url).send().await else {
        panic!("request to {url} failed");
    };
    let status = response.status();
    let Ok(body) = response.json::<serde_json::Value>().await else {
        panic!("expected a JSON body from {url}");
    };
    (status, body)
}

#[tokio::test]
async fn health_reports_member() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;
    let (status, body) = get_json(&app.url("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["member"], "m1");
}

#[tokio::test]
async fn leader_tick_is_visible_through_state_and_members() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;
    app.coordinator.tick().await;

    let (status, body) = get_json(&app.url("/api/v1/state")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "leading");
    assert_eq!(body["engine"], "memory");
    assert_eq!(body["last_tick"]["action"]["kind"], "none");

    let (status, body) = get_json(&app.url("/api/v1/members")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["leader"], "m1");
    let Some(data) = body["data"].as_array() else {
        panic!("expected a member array");
    };
    assert_eq!(data.len(), 3);
    let verdict = |name: &str| {
        data.iter()
            .find(|m| m["name"] == name)
            .map(|m| m["healthy"].clone())
    };
    assert_eq!(verdict("m1"), Some(serde_json::json!(true)));
    assert_eq!(verdict("m2"), Some(serde_json::json!(false)));
    assert_eq!(verdict("m3"), Some(serde_json::json!(true)));
}

#[tokio::test]
async fn lagging_member_is_reported_unhealthy() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;

    let (status, body) = get_json(&app.url("/api/v1/members/m2/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], false);
    assert!(body["reason"].is_string());

    let (status, body) = get_json(&app.url("/api/v1/members/m3/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
}

#[tokio::test]
async fn healthy_members_excludes_leader() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;
    let (status, body) = get_json(&app.url("/api/v1/members/healthy?exclude_leader=m1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        serde_json::json!([{ "name": "m3", "host": "m3.pg.svc", "port": 5432 }])
    );
}

#[tokio::test]
async fn secondary_sees_other_leader() {
    let app = spawn_app("m3", cluster(Some("m1"))).await;

    let (status, body) = get_json(&app.url("/api/v1/leader")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_leader"], false);

    let (status, body) = get_json(&app.url("/api/v1/leader/other")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["leader"]["name"], "m1");
}

#[tokio::test]
async fn manual_promote_and_demote_drive_the_engine() {
    let app = spawn_app("m3", cluster(Some("m1"))).await;

    let (status, body) = post_json(&app.url("/api/v1/promote")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["command"], "promote");
    assert_eq!(body["state"], "leading");

    let (status, body) = post_json(&app.url("/api/v1/demote")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "demoting");

    assert_eq!(
        app.adapter.commands().await,
        vec![AdapterCommand::Promote, AdapterCommand::Demote]
    );
}

#[tokio::test]
async fn follow_and_recover_report_details() {
    let app = spawn_app("m3", cluster(Some("m1"))).await;
    app.adapter
        .set_node(NodeState::stopped("m3", true, 1, 9_500))
        .await;

    let (status, body) = post_json(&app.url("/api/v1/recover")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detail"]["started"], true);

    let (status, body) = post_json(&app.url("/api/v1/follow")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["command"], "follow");
    assert_eq!(body["detail"]["rewound"], false);
}

#[tokio::test]
async fn store_outage_surfaces_as_unavailable() {
    let app = spawn_app("m1", cluster(Some("m1"))).await;
    app.store.set_unavailable(true);

    let (status, body) = get_json(&app.url("/api/v1/members/m2/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], 5002);
}

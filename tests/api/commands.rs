use serde_json::json;
use uuid::Uuid;

use crate::helpers::spawn_app;

fn tenant_payload(id: &str) -> serde_json::Value {
    json!({
        "command": "addTenant",
        "id": id,
        "name": format!("tenant {id}"),
        "active": true,
        "client_base_url": null,
        "client_sync_path": null,
        "client_attachment_path": null,
        "client_auth": { "method": "none" },
        "default_limit_per_hour": null,
        "default_limit_per_day": null,
        "suspended_batches": null,
        "api_key_hash": null,
        "api_key_expires_at": null,
    })
}

#[tokio::test]
async fn add_tenant_then_get_tenant_round_trips() {
    let app = spawn_app().await;
    let tenant_id = Uuid::new_v4().to_string();

    let added = app.post_command(tenant_payload(&tenant_id)).await;
    assert_eq!(added["ok"], json!(true));

    let fetched = app
        .post_command(json!({ "command": "getTenant", "tenant_id": tenant_id }))
        .await;
    assert_eq!(fetched["ok"], json!(true));
    assert_eq!(fetched["data"]["id"], json!(tenant_id));
    assert_eq!(fetched["data"]["active"], json!(true));
}

#[tokio::test]
async fn delete_tenant_removes_it_from_list_tenants() {
    let app = spawn_app().await;
    let tenant_id = Uuid::new_v4().to_string();
    app.post_command(tenant_payload(&tenant_id)).await;

    let deleted = app
        .post_command(json!({ "command": "deleteTenant", "tenant_id": tenant_id }))
        .await;
    assert_eq!(deleted["ok"], json!(true));

    let listed = app.post_command(json!({ "command": "listTenants" })).await;
    let ids: Vec<&str> = listed["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert!(!ids.contains(&tenant_id.as_str()));
}

#[tokio::test]
async fn suspend_then_activate_round_trips_suspended_batches() {
    let app = spawn_app().await;
    let tenant_id = Uuid::new_v4().to_string();
    app.post_command(tenant_payload(&tenant_id)).await;

    let suspended = app
        .post_command(json!({
            "command": "suspend",
            "tenant_id": tenant_id,
            "batch_code": null,
        }))
        .await;
    assert_eq!(suspended["ok"], json!(true));
    assert_eq!(suspended["data"]["suspended_batches"], json!("*"));

    let activated = app
        .post_command(json!({
            "command": "activate",
            "tenant_id": tenant_id,
            "batch_code": null,
        }))
        .await;
    assert_eq!(activated["ok"], json!(true));
    assert_eq!(activated["data"]["suspended_batches"], json!(null));
}

#[tokio::test]
async fn unknown_tenant_get_returns_error_result() {
    let app = spawn_app().await;
    let resp = app
        .post_command(json!({ "command": "getTenant", "tenant_id": "does-not-exist" }))
        .await;
    assert_eq!(resp["ok"], json!(false));
    assert!(resp["error"].as_str().is_some());
}

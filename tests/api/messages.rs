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

fn account_payload(id: &str, tenant_id: &str) -> serde_json::Value {
    json!({
        "command": "addAccount",
        "id": id,
        "tenant_id": tenant_id,
        "host": "smtp.example.test",
        "port": 587,
        "user": "relay",
        "password": "hunter2",
        "use_tls": false,
        "ttl": 300,
        "limit_per_minute": null,
        "limit_per_hour": null,
        "limit_per_day": null,
        "limit_behavior": "defer",
        "batch_size": null,
        "is_pec_account": false,
        "imap_last_uid": null,
        "imap_uidvalidity": null,
        "imap_last_sync": null,
    })
}

fn message(id: &str, account_id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "account_id": account_id,
        "priority": "medium",
        "from": "sender@example.test",
        "to": ["recipient@example.test"],
        "subject": "hello",
        "body": "world",
        "content_type": "plain",
    })
}

async fn tenant_with_account() -> (crate::helpers::TestApp, String, String) {
    let app = spawn_app().await;
    let tenant_id = Uuid::new_v4().to_string();
    let account_id = Uuid::new_v4().to_string();
    app.post_command(tenant_payload(&tenant_id)).await;
    app.post_command(account_payload(&account_id, &tenant_id)).await;
    (app, tenant_id, account_id)
}

#[tokio::test]
async fn add_messages_queues_valid_entries() {
    let (app, tenant_id, account_id) = tenant_with_account().await;

    let resp = app
        .post_command(json!({
            "command": "addMessages",
            "tenant_id": tenant_id,
            "messages": [message("msg-1", &account_id)],
            "default_priority": null,
        }))
        .await;

    assert_eq!(resp["ok"], json!(true));
    assert_eq!(resp["data"]["queued"], json!(1));
    assert_eq!(resp["data"]["rejected"], json!([]));
}

#[tokio::test]
async fn add_messages_rejects_entries_missing_required_fields() {
    let (app, tenant_id, _account_id) = tenant_with_account().await;

    let mut bad = message("msg-1", "does-not-matter");
    bad["from"] = json!(null);

    let resp = app
        .post_command(json!({
            "command": "addMessages",
            "tenant_id": tenant_id,
            "messages": [bad],
            "default_priority": null,
        }))
        .await;

    assert_eq!(resp["data"]["queued"], json!(0));
    let rejected = resp["data"]["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["reason"], json!("missing from"));
}

#[tokio::test]
async fn resubmitting_same_id_replaces_the_pending_message() {
    let (app, tenant_id, account_id) = tenant_with_account().await;

    let first = app
        .post_command(json!({
            "command": "addMessages",
            "tenant_id": tenant_id,
            "messages": [message("dup-id", &account_id)],
            "default_priority": null,
        }))
        .await;
    assert_eq!(first["data"]["queued"], json!(1));

    let mut second_body = message("dup-id", &account_id);
    second_body["subject"] = json!("replacement subject");
    let second = app
        .post_command(json!({
            "command": "addMessages",
            "tenant_id": tenant_id,
            "messages": [second_body],
            "default_priority": null,
        }))
        .await;
    assert_eq!(second["data"]["queued"], json!(1));

    let listed = app
        .post_command(json!({
            "command": "listMessages",
            "tenant_id": tenant_id,
            "active_only": null,
        }))
        .await;
    let messages = listed["data"].as_array().unwrap();
    assert_eq!(messages.len(), 1, "the replacement updates the existing row, not a second one");
}

#[tokio::test]
async fn delete_messages_reports_removed_count() {
    let (app, tenant_id, account_id) = tenant_with_account().await;
    app.post_command(json!({
        "command": "addMessages",
        "tenant_id": tenant_id,
        "messages": [message("to-delete", &account_id)],
        "default_priority": null,
    }))
    .await;

    let resp = app
        .post_command(json!({
            "command": "deleteMessages",
            "tenant_id": tenant_id,
            "ids": ["to-delete", "never-existed"],
        }))
        .await;

    assert_eq!(resp["data"]["removed"], json!(1));
    assert_eq!(resp["data"]["not_found"], json!(["never-existed"]));
}

use std::time::Duration;

use mailcore::reporter;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

/// Events recorded against a message are delivered to the owning tenant's
/// sync endpoint (spec.md §4.6, §8 scenario 1 "happy path").
#[tokio::test]
async fn recorded_event_is_posted_to_the_tenant_sync_url() {
    let app = spawn_app().await;
    let tenant_id = Uuid::new_v4().to_string();
    let account_id = Uuid::new_v4().to_string();

    Mock::given(method("POST"))
        .and(path("/mail-proxy/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "queued": 0 })))
        .expect(1)
        .mount(&app.tenant_server)
        .await;

    app.post_command(json!({
        "command": "addTenant",
        "id": tenant_id,
        "name": "reporting tenant",
        "active": true,
        "client_base_url": app.tenant_server.uri(),
        "client_sync_path": null,
        "client_attachment_path": null,
        "client_auth": { "method": "none" },
        "default_limit_per_hour": null,
        "default_limit_per_day": null,
        "suspended_batches": null,
        "api_key_hash": null,
        "api_key_expires_at": null,
    }))
    .await;

    app.post_command(json!({
        "command": "addAccount",
        "id": account_id,
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
    }))
    .await;

    app.post_command(json!({
        "command": "addMessages",
        "tenant_id": tenant_id,
        "messages": [{
            "id": "evt-msg",
            "account_id": account_id,
            "priority": "medium",
            "from": "sender@example.test",
            "to": ["recipient@example.test"],
            "subject": "hello",
            "body": "world",
            "content_type": "plain",
        }],
        "default_priority": null,
    }))
    .await;

    let listed = app
        .post_command(json!({ "command": "listMessages", "tenant_id": tenant_id, "active_only": null }))
        .await;
    let pk = listed["data"][0]["pk"].as_str().unwrap().to_string();

    app.post_command(json!({
        "command": "recordExternalEvent",
        "message_pk": pk,
        "event_type": "sent",
        "description": null,
        "metadata": null,
    }))
    .await;

    let reporter_core = app.core.clone();
    tokio::spawn(async move { reporter::run_loop(reporter_core).await });

    // The reporter wakes immediately off `wake_client_event` (set by
    // `recordExternalEvent` above), so this only needs to wait for the
    // spawned task to get scheduled, not for the fallback interval.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let requests = app.tenant_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let reports = body["delivery_report"].as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["id"], json!("evt-msg"));
    assert!(reports[0]["sent_ts"].is_i64());
}

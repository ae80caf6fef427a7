use std::sync::Arc;

use mailcore::configuration::get_configuration;
use mailcore::configuration::DatabaseSettings;
use mailcore::core::Core;
use mailcore::startup::Application;
use mailcore::telemetry::get_subscriber;
use mailcore::telemetry::init_subscriber;
use once_cell::sync::Lazy;
use secrecy::ExposeSecret;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::MockServer;

/// Init a static subscriber using the `once_cell` crate.
///
/// To opt in to verbose logging, use the env var `TEST_LOG`:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| match std::env::var("TEST_LOG") {
    Ok(_) => {
        let subscriber = get_subscriber("test", "debug", std::io::stdout);
        init_subscriber(subscriber);
    }
    Err(_) => {
        let subscriber = get_subscriber("test", "debug", std::io::sink);
        init_subscriber(subscriber);
    }
});

pub struct TestApp {
    pub addr: String,
    pub port: u16,
    pub pool: PgPool,
    pub core: Arc<Core>,
    /// Stands in for a tenant's callback endpoint (delivery reports,
    /// `endpoint`-mode attachment fetches).
    pub tenant_server: MockServer,
}

impl TestApp {
    /// POSTs a `Command` (already JSON-shaped the way `Command`'s `serde(tag
    /// = "command")` expects) to the control API and returns the decoded
    /// `CommandResult` body.
    pub async fn post_command(&self, body: serde_json::Value) -> serde_json::Value {
        let resp = reqwest::Client::new()
            .post(format!("{}/command", self.addr))
            .json(&body)
            .send()
            .await
            .expect("execute request");
        resp.json().await.expect("decode response body")
    }
}

/// Read `DatabaseSettings` and create a db with a randomised name (same
/// migrations, via `sqlx::migrate!`). The returned pool is scoped to a
/// single test, so tests never observe each other's rows.
async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    let mut conn = PgConnection::connect(cfg.connection_string_without_db().expose_secret())
        .await
        .expect("postgres must be running");

    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str())
        .await
        .unwrap();

    let pool = PgPool::connect(cfg.connection_string().expose_secret())
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.expect("failed to migrate");
    pool
}

/// Spawn a `TestApp` on a randomised db and a randomised port, with a
/// `wiremock::MockServer` standing in for tenant callback endpoints.
pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let tenant_server = MockServer::start().await;

    let cfg = {
        let mut rand_cfg = get_configuration().expect("failed to read configuration");
        rand_cfg.database.database_name = Uuid::new_v4().to_string();
        rand_cfg.application.port = 0;
        rand_cfg
    };

    let pool = configure_database(&cfg.database).await;
    let store = mailcore::store::Store::new(pool.clone());
    let core = Arc::new(Core::new(store, cfg));

    let app = Application::build(core.clone()).await.unwrap();
    let port = app.get_port();
    let addr = format!("http://127.0.0.1:{port}");

    tokio::spawn(app.run_until_stopped());

    TestApp {
        addr,
        port,
        pool,
        core,
        tenant_server,
    }
}

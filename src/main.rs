use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;

use tokio::task::JoinError;

use mailcore::configuration::get_configuration;
use mailcore::core::Core;
use mailcore::dispatcher;
use mailcore::pool_cleanup;
use mailcore::reporter;
use mailcore::startup::Application;
use mailcore::store::Store;
use mailcore::telemetry::get_subscriber;
use mailcore::telemetry::init_subscriber;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} failed (inner)"
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} failed (outer)"
            )
        }
    }
}

/// Initialise telemetry, load config, connect the store, and start the
/// server plus the three background loops (SPEC_FULL.md §5 — generalized
/// from the teacher's server/delivery/expiry trio to
/// dispatcher/reporter/pool-cleanup).
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("mailcore", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration().expect("failed to read configuration");

    let store = Store::connect(secrecy::ExposeSecret::expose_secret(
        &cfg.database.connection_string(),
    ))
    .await?;
    store.migrate().await?;
    let core = Arc::new(Core::new(store, cfg));

    let application = Application::build(core.clone()).await?;
    let server_thread = tokio::spawn(application.run_until_stopped());
    let dispatcher_thread = tokio::spawn(dispatcher::run_loop(core.clone()));
    let reporter_thread = tokio::spawn(reporter::run_loop(core.clone()));
    let pool_cleanup_thread = tokio::spawn(pool_cleanup::run_loop(core));

    tokio::select! {
        o = server_thread => { report_exit("API", o) },
        o = dispatcher_thread => { report_exit("Dispatcher", o) },
        o = reporter_thread => { report_exit("Reporter", o) },
        o = pool_cleanup_thread => { report_exit("SMTP pool cleanup", o) },
    }

    Ok(())
}

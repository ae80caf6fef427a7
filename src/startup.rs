use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::App;
use actix_web::HttpServer;
use tracing_actix_web::TracingLogger;

use crate::core::Core;
use crate::routes::handle_command;
use crate::routes::health_check;

/// Wrapper for actix's `Server` with access to the bound port. Not to be
/// confused with actix's `App`!
pub struct Application {
    /// Left private; use `get_port` to access
    port: u16,
    server: Server,
}

impl Application {
    /// Binds the thin control-API layer to `core.settings.application.{host,
    /// port}` over the already-built, already-shared `Core` (REDESIGN
    /// FLAGS: "Global service handle" → one `Core` constructed once in
    /// `main`, handed to both this server and the background loops).
    pub async fn build(core: Arc<Core>) -> Result<Self, anyhow::Error> {
        let addr = format!(
            "{}:{}",
            core.settings.application.host, core.settings.application.port
        );
        let listener = TcpListener::bind(addr)?;
        let port = listener.local_addr().unwrap().port();

        let server = run(listener, core)?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// Because this consumes `self`, this should be the final function call
    /// (or passed to `tokio::spawn`).
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

/// The server is not responsible for binding to an address, it only listens
/// to an already bound address. Declares the two endpoints this crate's
/// control surface needs: a health check, and a single command-dispatch
/// route that deserializes a JSON body into a `Command` and runs it through
/// `Core::handle` (SPEC_FULL.md §6 — auth header parsing and per-command
/// routing are the outer-surface concerns left out of scope; the `Command`
/// tag carries the operation instead of the URL).
pub fn run(listener: TcpListener, core: Arc<Core>) -> Result<Server, anyhow::Error> {
    let core = web::Data::new(core);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/command", web::post().to(handle_command))
            .app_data(core.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

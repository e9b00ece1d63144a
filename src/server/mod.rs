//! Ambient status-websocket server: an optional `actix-web` server that
//! mirrors kernel events to any connected dashboard over a websocket. Not
//! part of the upload engine's own contract (the concrete DOM/UI surface is
//! out of scope); callers that don't want it simply never call `server::run`.

mod error;
mod status;

pub use self::error::{Error, ErrorKind, Result};
pub use self::status::Registry;

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;

use crate::kernel::Kernel;

async fn status_route(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<Arc<Registry>>,
) -> actix_web::Result<HttpResponse> {
    ws::start(status::StatusSession::new(registry.get_ref().clone()), &req, stream)
}

/// Starts the status websocket server and wires it to mirror every event the
/// kernel emits. Returns once the server is listening; the server itself
/// runs until the returned handle is stopped or dropped.
pub async fn run(kernel: Arc<Kernel>, addr: SocketAddr) -> Result<actix_web::dev::Server> {
    let registry = Registry::new();

    let broadcast_registry = registry.clone();
    kernel.events.on("*", move |event| {
        if let Some(payload) = status::event_payload(event) {
            broadcast_registry.broadcast(payload);
        }
    });

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .route("/status", web::get().to(status_route))
    })
    .bind(addr)
    .map_err(Error::from)?
    .run();

    Ok(server)
}

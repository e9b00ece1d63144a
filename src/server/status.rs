//! Status websocket session: mirrors kernel events to connected dashboard
//! clients, the way the teacher's `StatusServer`/`WebSocketServer` pair fans
//! a `messages::Response` out to every registered websocket address. The
//! teacher's thread-local `CLIENTS` set becomes a shared `Mutex<Vec<Addr<..>>>`
//! registry here; broadcasting still means "do_send to every connected
//! address, dropping the ones that disconnected".

use std::sync::{Arc, Mutex};

use actix::prelude::*;
use actix_web_actors::ws;
use log::info;

use crate::events::Event;

#[derive(Message)]
#[rtype(result = "()")]
struct Broadcast(String);

#[derive(Default)]
pub struct Registry {
    clients: Mutex<Vec<Addr<StatusSession>>>,
}

impl Registry {
    pub fn new() -> Arc<Registry> {
        Arc::new(Registry::default())
    }

    fn register(&self, addr: Addr<StatusSession>) {
        self.clients.lock().unwrap().push(addr);
    }

    /// Sends `payload` to every connected client, dropping any that have
    /// since disconnected.
    pub fn broadcast(&self, payload: String) {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|addr| addr.connected());
        for addr in clients.iter() {
            addr.do_send(Broadcast(payload.clone()));
        }
    }
}

/// One connected dashboard client.
pub struct StatusSession {
    registry: Arc<Registry>,
}

impl StatusSession {
    pub fn new(registry: Arc<Registry>) -> Self {
        StatusSession { registry }
    }
}

impl Actor for StatusSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("status session connected");
        self.registry.register(ctx.address());
    }
}

impl Handler<Broadcast> for StatusSession {
    type Result = ();

    fn handle(&mut self, msg: Broadcast, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StatusSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        if let Ok(ws::Message::Ping(bytes)) = msg {
            ctx.pong(&bytes);
        }
    }
}

/// Turns a kernel event into the JSON payload broadcast to dashboards. Only
/// state-shaped events are worth mirroring; purely internal signals like
/// `StateUpdate` are already covered by the render debounce on the UI side.
pub fn event_payload(event: &Event) -> Option<String> {
    let value = match event {
        Event::Progress(percentage) => serde_json::json!({
            "type": "progress",
            "percentage": percentage,
        }),
        Event::Complete(result) => serde_json::json!({
            "type": "complete",
            "result": result,
        }),
        Event::UploadProgress {
            file_id,
            bytes_uploaded,
            bytes_total,
            ..
        } => serde_json::json!({
            "type": "upload-progress",
            "fileId": file_id.0,
            "bytesUploaded": bytes_uploaded,
            "bytesTotal": bytes_total,
        }),
        Event::RestrictionFailed { file_id, message } => serde_json::json!({
            "type": "restriction-failed",
            "fileId": file_id.as_ref().map(|id| id.0.clone()),
            "message": message,
        }),
        _ => return None,
    };
    serde_json::to_string(&value).ok()
}

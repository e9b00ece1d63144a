//! Minimal bring-up binary: initializes logging, loads configuration, opens
//! the durable database, wires the built-in uploaders into a `Kernel`, and
//! serves the status websocket mirror until interrupted.
//!
//! Grounded on the teacher's `Context::setup_logging`/`Context::new`
//! sequence, trimmed to what an embeddable engine actually needs at
//! startup -- no CLI subcommands, since acquisition and rendering surfaces
//! are external collaborators here, not agent services.

use std::net::SocketAddr;

use log::{error, info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use conveyor::config::Config;
use conveyor::database::{Database, Source};
use conveyor::kernel::plugin::Plugin;
use conveyor::uploader::http::HttpUploader;
use conveyor::uploader::remote::RemoteUploader;
use conveyor::Kernel;

const LOG_FORMAT: &str = "{d(%Y-%m-%d %H:%M:%S)} {l} [{T}] {m}{n}";

fn setup_logging() {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_FORMAT)))
        .build();

    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .expect("couldn't build the console logger");

    log4rs::init_config(config).expect("couldn't initialize the logger");
}

#[tokio::main]
async fn main() {
    setup_logging();

    let config = Config::from_config_file_or_default().unwrap_or_else(|e| {
        error!("couldn't load configuration, falling back to defaults: {}", e);
        Config::default()
    });

    let database = match conveyor::database_file() {
        Ok(path) => match Database::new(&Source::File(path)) {
            Ok(db) => Some(db),
            Err(e) => {
                error!("couldn't open the database, running without persistence: {}", e);
                None
            }
        },
        Err(e) => {
            error!("couldn't locate the home directory, running without persistence: {}", e);
            None
        }
    };

    let kernel = Kernel::new(config.clone(), database);

    kernel
        .use_plugin(Plugin::Uploader(Box::new(HttpUploader::new(
            config.xhr.clone(),
            config.engine.upload_concurrency,
        ))))
        .await
        .expect("uploader-http-direct is the only uploader installed so far");
    kernel
        .use_plugin(Plugin::Uploader(Box::new(RemoteUploader::new(
            kernel
                .companion
                .clone()
                .expect("Kernel::new always constructs a companion client"),
        ))))
        .await
        .expect("uploader-remote is the only other uploader installed so far");

    if let Err(e) = kernel.recover_batches() {
        error!("couldn't recover in-flight batches: {}", e);
    }

    let addr: SocketAddr = "127.0.0.1:7117".parse().expect("a valid socket address");
    match conveyor::server::run(kernel.clone(), addr).await {
        Ok(server) => {
            info!("status server listening on {}", addr);
            let handle = server.handle();
            tokio::spawn(server);
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c, shutting down");
            handle.stop(true).await;
        }
        Err(e) => {
            error!("couldn't start the status server: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    kernel.close();
}

//! Minimal yrelay deployment: one WebSocket endpoint, redb
//! persistence, lifecycle logging.

use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::{env, path};
use tracing::info;

use yrelay::Server;
use yrelay::extensions::Logger;
use yrelay::types::context::Context;
use yrelay_store_adapter_redb::StoreAdapterRedb;

pub struct Config {
	pub db_dir: path::PathBuf,
	pub listen: String,
	pub scheduler_threads: usize,
}

impl Config {
	fn from_env() -> Self {
		Self {
			db_dir: path::PathBuf::from(env::var("DB_DIR").unwrap_or("./data".to_string())),
			listen: env::var("LISTEN").unwrap_or("127.0.0.1:4444".to_string()),
			scheduler_threads: env::var("SCHEDULER_THREADS")
				.ok()
				.and_then(|threads| threads.parse().ok())
				.unwrap_or(2),
		}
	}
}

async fn ws_handler(
	ws: WebSocketUpgrade,
	State(server): State<Arc<Server>>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
	ws.on_upgrade(move |socket| async move {
		yrelay::websocket::serve_socket(server, socket, addr.to_string(), Context::new()).await;
	})
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let config = Config::from_env();
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.worker_threads(config.scheduler_threads)
		.enable_all()
		.build()
		.expect("FATAL: cannot build runtime");
	runtime.block_on(run(config));
}

async fn run(config: Config) {
	let store = StoreAdapterRedb::new(config.db_dir.join("documents.db"))
		.await
		.expect("FATAL: cannot open document store");

	let server = Server::builder()
		.extension(Logger::new())
		.extension(store)
		.scheduler_threads(config.scheduler_threads)
		.build()
		.await
		.expect("FATAL: cannot build server");
	let server = Arc::new(server);

	let app = Router::new()
		.route("/sync", any(ws_handler))
		.with_state(server.clone());

	let listener = tokio::net::TcpListener::bind(&config.listen)
		.await
		.expect("FATAL: cannot bind listener");
	info!("Listening on {}", config.listen);

	let serve = tokio::spawn(async move {
		axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
	});

	tokio::select! {
		result = serve => {
			if let Ok(Err(err)) = result {
				tracing::error!("server error: {}", err);
			}
		}
		_ = tokio::signal::ctrl_c() => {
			info!("Shutting down");
			server.close().await;
		}
	}
}

// vim: ts=4

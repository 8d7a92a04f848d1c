//! WebSocket transport glue for axum.
//!
//! Wraps one upgraded socket in the `Transport` capability and runs the
//! read loop that feeds inbound binary frames into the client
//! connection. The protocol is binary-only; text, ping and pong frames
//! are ignored.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::prelude::*;
use crate::server::Server;
use yrelay_types::context::Context;
use yrelay_types::transport::{self, Transport};

pub struct WebSocketTransport {
	tx: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
	open: AtomicBool,
	connection_id: Box<str>,
	remote_address: Box<str>,
}

impl WebSocketTransport {
	pub fn new(tx: SplitSink<WebSocket, Message>, remote_address: impl Into<Box<str>>) -> Self {
		Self {
			tx: tokio::sync::Mutex::new(tx),
			open: AtomicBool::new(true),
			connection_id: Uuid::new_v4().to_string().into(),
			remote_address: remote_address.into(),
		}
	}
}

#[async_trait]
impl Transport for WebSocketTransport {
	async fn send(&self, data: Vec<u8>) -> YrResult<()> {
		if !self.is_open() {
			return Err(Error::TransportClosed);
		}
		let mut tx = self.tx.lock().await;
		if tx.send(Message::Binary(data.into())).await.is_err() {
			self.open.store(false, Ordering::SeqCst);
			return Err(Error::TransportClosed);
		}
		Ok(())
	}

	async fn close(&self, code: u16, reason: &str) {
		if self.open.swap(false, Ordering::SeqCst) {
			let mut tx = self.tx.lock().await;
			let frame = CloseFrame { code, reason: reason.to_owned().into() };
			let _ = tx.send(Message::Close(Some(frame))).await;
		}
	}

	fn is_open(&self) -> bool {
		self.open.load(Ordering::SeqCst)
	}

	fn connection_id(&self) -> &str {
		&self.connection_id
	}

	fn remote_address(&self) -> &str {
		&self.remote_address
	}
}

/// Drive one upgraded WebSocket against the server until the peer
/// disconnects or the connection is closed.
pub async fn serve_socket(
	server: Arc<Server>,
	socket: WebSocket,
	remote_address: String,
	initial_context: Context,
) {
	let (tx, mut rx) = socket.split();
	let transport = Arc::new(WebSocketTransport::new(tx, remote_address));
	debug!(
		"websocket connection {} from {}",
		transport.connection_id(),
		transport.remote_address()
	);

	let client = match server.handle_connection(transport.clone(), initial_context).await {
		Ok(client) => client,
		Err(err) => {
			warn!("connection rejected: {}", err);
			return;
		}
	};

	while let Some(frame) = rx.next().await {
		match frame {
			Ok(Message::Binary(data)) => client.handle_message(&data).await,
			Ok(Message::Close(_)) => break,
			Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_)) => {}
			Err(err) => {
				debug!("websocket error on {}: {}", transport.connection_id(), err);
				break;
			}
		}
		if client.is_closed() {
			break;
		}
	}

	client.close(transport::CLOSE_NORMAL, "connection closed").await;
	debug!("websocket connection {} closed", transport.connection_id());
}

// vim: ts=4

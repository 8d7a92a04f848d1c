//! Message envelope and protocol message types.
//!
//! Every frame on the wire is `varstring(document_name) ||
//! varint(message_type) || payload`. Sync payloads carry a further
//! varint sub-type. Unknown message codes decode successfully and are
//! ignored by dispatch; a frame that cannot be decoded at all is a
//! protocol violation and closes the transport.

use crate::codec::{Decoder, Encoder};
use crate::prelude::*;

/// Message types recognised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
	/// Yjs sync protocol sub-message
	Sync = 0,
	/// Raw awareness (presence) update
	Awareness = 1,
	/// Reserved; payload treated as opaque by dispatch
	Auth = 2,
	/// Empty payload; server replies with the current awareness states
	QueryAwareness = 3,
	/// Application payload echoed only to the sender
	Stateless = 5,
	/// Application payload fanned out to peers, excluding the sender
	BroadcastStateless = 6,
	/// Server-sent acceptance/rejection marker
	SyncStatus = 8,
}

impl MessageType {
	pub fn from_code(code: u64) -> Option<Self> {
		match code {
			0 => Some(MessageType::Sync),
			1 => Some(MessageType::Awareness),
			2 => Some(MessageType::Auth),
			3 => Some(MessageType::QueryAwareness),
			5 => Some(MessageType::Stateless),
			6 => Some(MessageType::BroadcastStateless),
			8 => Some(MessageType::SyncStatus),
			_ => None,
		}
	}

	pub fn code(self) -> u64 {
		self as u64
	}
}

/// Sync protocol sub-messages (§ Yjs sync handshake).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
	/// State vector; the peer asks for the diff against it.
	Step1(Vec<u8>),
	/// Update computed against a previously received state vector.
	Step2(Vec<u8>),
	/// Incremental update; application semantics identical to step 2.
	Update(Vec<u8>),
}

pub const SYNC_STEP_1: u64 = 0;
pub const SYNC_STEP_2: u64 = 1;
pub const SYNC_UPDATE: u64 = 2;

impl SyncMessage {
	/// Decode a sync payload: `varint(sub_type) || length-prefixed(body)`.
	pub fn decode(payload: &[u8]) -> YrResult<Self> {
		let mut dec = Decoder::new(payload);
		let sub_type = dec.read_var_uint()?;
		let body = dec.read_var_bytes()?.to_vec();
		match sub_type {
			SYNC_STEP_1 => Ok(SyncMessage::Step1(body)),
			SYNC_STEP_2 => Ok(SyncMessage::Step2(body)),
			SYNC_UPDATE => Ok(SyncMessage::Update(body)),
			other => {
				Err(Error::MalformedMessage(format!("unknown sync sub-type {}", other).into()))
			}
		}
	}

	/// True when the message carries changes to apply to the document.
	pub fn carries_changes(&self) -> bool {
		matches!(self, SyncMessage::Step2(_) | SyncMessage::Update(_))
	}
}

/// A decoded inbound frame.
///
/// `raw` keeps the original bytes so the client connection can requeue
/// the frame while authentication for its document is in flight.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
	pub document_name: Box<str>,
	/// Raw message-type code from the wire.
	pub code: u64,
	/// `None` for codes the server does not recognise; such frames are
	/// ignored without disconnecting.
	pub kind: Option<MessageType>,
	pub payload: Vec<u8>,
	pub raw: Vec<u8>,
}

impl IncomingMessage {
	pub fn decode(data: &[u8]) -> YrResult<Self> {
		let mut dec = Decoder::new(data);
		let document_name = dec.read_var_string()?;
		if document_name.is_empty() {
			return Err(Error::MalformedMessage("empty document name".into()));
		}
		let document_name: Box<str> = document_name.into();
		let code = dec.read_var_uint()?;
		Ok(Self {
			document_name,
			code,
			kind: MessageType::from_code(code),
			payload: dec.remaining().to_vec(),
			raw: data.to_vec(),
		})
	}
}

fn envelope(document_name: &str, kind: MessageType, payload_len: usize) -> Encoder {
	let mut enc = Encoder::with_capacity(document_name.len() + payload_len + 8);
	enc.write_var_string(document_name);
	enc.write_var_uint(kind.code());
	enc
}

fn encode_sync(document_name: &str, sub_type: u64, body: &[u8]) -> Vec<u8> {
	let mut enc = envelope(document_name, MessageType::Sync, body.len() + 8);
	enc.write_var_uint(sub_type);
	enc.write_var_bytes(body);
	enc.into_inner()
}

/// SYNC / step 1 carrying a state vector.
pub fn encode_sync_step1(document_name: &str, state_vector: &[u8]) -> Vec<u8> {
	encode_sync(document_name, SYNC_STEP_1, state_vector)
}

/// SYNC / step 2 carrying an update computed against a state vector.
pub fn encode_sync_step2(document_name: &str, update: &[u8]) -> Vec<u8> {
	encode_sync(document_name, SYNC_STEP_2, update)
}

/// SYNC / incremental update.
pub fn encode_sync_update(document_name: &str, update: &[u8]) -> Vec<u8> {
	encode_sync(document_name, SYNC_UPDATE, update)
}

/// Raw awareness update payload in a frame of its own.
pub fn encode_awareness(document_name: &str, payload: &[u8]) -> Vec<u8> {
	let mut enc = envelope(document_name, MessageType::Awareness, payload.len());
	enc.write_raw(payload);
	enc.into_inner()
}

/// Request for the current awareness states (empty payload).
pub fn encode_query_awareness(document_name: &str) -> Vec<u8> {
	envelope(document_name, MessageType::QueryAwareness, 0).into_inner()
}

/// Authentication frame carrying an opaque token.
pub fn encode_auth(document_name: &str, token: &str) -> Vec<u8> {
	let mut enc = envelope(document_name, MessageType::Auth, token.len() + 4);
	enc.write_var_string(token);
	enc.into_inner()
}

/// Application payload echoed only to the sender.
pub fn encode_stateless(document_name: &str, payload: &str) -> Vec<u8> {
	let mut enc = envelope(document_name, MessageType::Stateless, payload.len() + 4);
	enc.write_var_string(payload);
	enc.into_inner()
}

/// Application payload fanned out to peers, excluding the sender.
pub fn encode_broadcast_stateless(document_name: &str, payload: &str) -> Vec<u8> {
	let mut enc = envelope(document_name, MessageType::BroadcastStateless, payload.len() + 4);
	enc.write_var_string(payload);
	enc.into_inner()
}

/// Server-sent acceptance (`true`) or read-only rejection (`false`).
pub fn encode_sync_status(document_name: &str, accepted: bool) -> Vec<u8> {
	let mut enc = envelope(document_name, MessageType::SyncStatus, 1);
	enc.write_var_uint(u64::from(accepted));
	enc.into_inner()
}


// vim: ts=4

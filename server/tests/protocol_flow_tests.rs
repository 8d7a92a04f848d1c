//! End-to-end protocol tests over an in-memory transport: the sync
//! handshake, update fan-out, read-only gating, awareness, stateless
//! messages and the authentication flow.
//!
//! Authentication and document loading run on their own tasks, so the
//! tests wait for the observable replies instead of assuming the flow
//! finished when `handle_message` returned.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
	MockTransport, RecordingExtension, empty_state_vector, text_from_updates,
	two_sequential_updates, update_inserting, wait_until,
};
use yrelay::Server;
use yrelay::awareness::Awareness;
use yrelay::conn::ClientConnection;
use yrelay::types::codec::Encoder;
use yrelay::types::context::Context;
use yrelay::types::protocol::{
	MessageType, SyncMessage, encode_auth, encode_awareness, encode_broadcast_stateless,
	encode_query_awareness, encode_stateless, encode_sync_step1, encode_sync_update,
};
use yrelay::types::transport::{CLOSE_AUTH_FAILED, Transport};

async fn build_server(ext: &Arc<RecordingExtension>) -> Server {
	let _ = tracing_subscriber::fmt().try_init();
	Server::builder()
		.extension_arc(ext.clone())
		.debounce(Duration::from_millis(50))
		.max_debounce(Duration::from_millis(200))
		.unload_grace(Duration::from_millis(100))
		.build()
		.await
		.unwrap()
}

async fn connect(server: &Server, transport: &Arc<MockTransport>) -> Arc<ClientConnection> {
	let transport: Arc<dyn Transport> = transport.clone();
	server.handle_connection(transport, Context::new()).await.unwrap()
}

/// Open one document: send step 1 and wait for the handshake to
/// complete (the status frame is the last reply).
async fn open_document(client: &Arc<ClientConnection>, transport: &MockTransport, name: &str) {
	client.handle_message(&encode_sync_step1(name, &empty_state_vector())).await;
	assert!(
		wait_until(Duration::from_secs(2), || {
			transport.sync_statuses_for(name) == vec![true]
		})
		.await,
		"handshake for '{}' never completed",
		name
	);
}

fn update_payloads(transport: &MockTransport) -> Vec<Vec<u8>> {
	transport
		.sync_messages()
		.into_iter()
		.filter_map(|msg| match msg {
			SyncMessage::Update(update) => Some(update),
			_ => None,
		})
		.collect()
}

#[tokio::test]
async fn two_peers_converge_on_text() {
	let ext = RecordingExtension::new();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let t2 = MockTransport::new("t2");
	let c1 = connect(&server, &t1).await;
	let c2 = connect(&server, &t2).await;

	// Both peers open with step 1 and an empty state vector.
	open_document(&c1, &t1, "doc-1").await;
	open_document(&c2, &t2, "doc-1").await;

	for transport in [&t1, &t2] {
		let sync = transport.sync_messages();
		assert!(
			matches!(&sync[..], [SyncMessage::Step2(_), SyncMessage::Step1(_)]),
			"expected step2 + reciprocal step1, got {:?}",
			sync
		);
		// Fresh document: the awareness snapshot is the empty frame.
		let awareness = transport.frames_of(MessageType::Awareness);
		assert_eq!(awareness.len(), 1);
		assert_eq!(awareness[0].payload, vec![0x00]);
		assert_eq!(transport.sync_statuses(), vec![true]);
	}
	assert_eq!(ext.loads(), 1, "one load for both peers");

	// T1 edits; T2 must receive the update.
	let update = update_inserting("hello");
	c1.handle_message(&encode_sync_update("doc-1", &update)).await;

	assert!(
		wait_until(Duration::from_secs(2), || !update_payloads(&t2).is_empty()).await,
		"peer never received the update broadcast"
	);
	let received = update_payloads(&t2);
	assert_eq!(text_from_updates(&received), "hello");

	// The originator receives the broadcast as well; applying it is
	// idempotent on the client.
	assert!(
		wait_until(Duration::from_secs(2), || !update_payloads(&t1).is_empty()).await,
		"originator excluded from the broadcast"
	);
	assert_eq!(ext.changes(), 1);
}

#[tokio::test]
async fn slow_auth_does_not_block_other_documents() {
	let ext = RecordingExtension::with_auth_delay_for("slow-doc", Duration::from_millis(400));
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let c1 = connect(&server, &t1).await;

	// The slow document's flow starts first, then the fast one on the
	// same transport.
	c1.handle_message(&encode_sync_step1("slow-doc", &empty_state_vector())).await;
	c1.handle_message(&encode_sync_step1("fast-doc", &empty_state_vector())).await;

	// The fast document completes while the slow authentication is
	// still sleeping.
	assert!(
		wait_until(Duration::from_millis(300), || {
			t1.sync_statuses_for("fast-doc") == vec![true]
		})
		.await,
		"fast document stalled behind the slow one"
	);
	assert!(
		!ext.event_log().iter().any(|event| event == "onAuthenticate:slow-doc"),
		"slow authentication finished too early for this assertion to mean anything"
	);
	assert!(t1.sync_statuses_for("slow-doc").is_empty());

	// The slow flow still finishes on its own.
	assert!(
		wait_until(Duration::from_secs(2), || {
			t1.sync_statuses_for("slow-doc") == vec![true]
		})
		.await
	);
	assert_eq!(ext.loads(), 2);
}

#[tokio::test]
async fn read_only_peer_is_rejected_without_engine_mutation() {
	let ext = RecordingExtension::read_only();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let t2 = MockTransport::new("t2");
	let c1 = connect(&server, &t1).await;
	let c2 = connect(&server, &t2).await;

	// Step 1 is always allowed for a read-only peer.
	open_document(&c1, &t1, "doc-ro").await;
	open_document(&c2, &t2, "doc-ro").await;
	assert!(c1.document_connection("doc-ro").await.unwrap().is_read_only());

	c1.handle_message(&encode_sync_update("doc-ro", &update_inserting("nope"))).await;
	assert_eq!(t1.sync_statuses(), vec![true, false]);

	// The engine stays untouched: no change event, no broadcast to the
	// peer, no pending save.
	tokio::time::sleep(Duration::from_millis(150)).await;
	assert_eq!(ext.changes(), 0);
	assert!(update_payloads(&t2).is_empty());
	assert!(!server.has_pending_save("doc-ro"));
	assert_eq!(ext.stores(), 0);
}

#[tokio::test]
async fn unknown_message_codes_are_ignored_without_disconnect() {
	let ext = RecordingExtension::new();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let c1 = connect(&server, &t1).await;

	let mut enc = Encoder::new();
	enc.write_var_string("doc-u");
	enc.write_var_uint(42);
	enc.write_var_uint(7);
	c1.handle_message(&enc.into_inner()).await;

	// The connection keeps working.
	c1.handle_message(&encode_sync_step1("doc-u", &empty_state_vector())).await;
	assert!(
		wait_until(Duration::from_secs(2), || t1.sync_statuses() == vec![true]).await,
		"connection stopped working after an unknown message code"
	);
	assert!(t1.is_open());
	assert!(t1.close_code().is_none());
}

#[tokio::test]
async fn malformed_frame_closes_with_1003() {
	let ext = RecordingExtension::new();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let c1 = connect(&server, &t1).await;

	c1.handle_message(&[0xff, 0xff, 0xff]).await;
	assert_eq!(t1.close_code(), Some(1003));
	assert!(c1.is_closed());
}

#[tokio::test]
async fn stateless_echo_and_broadcast() {
	let ext = RecordingExtension::new();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let t2 = MockTransport::new("t2");
	let c1 = connect(&server, &t1).await;
	let c2 = connect(&server, &t2).await;
	open_document(&c1, &t1, "doc-s").await;
	open_document(&c2, &t2, "doc-s").await;

	// STATELESS goes back to the sender only.
	c1.handle_message(&encode_stateless("doc-s", "ping")).await;
	assert!(
		wait_until(Duration::from_secs(1), || {
			t1.frames_of(MessageType::Stateless).len() == 1
		})
		.await
	);
	assert!(t2.frames_of(MessageType::Stateless).is_empty());

	// BROADCAST_STATELESS reaches the peers, not the sender.
	c1.handle_message(&encode_broadcast_stateless("doc-s", "hello-all")).await;
	assert!(
		wait_until(Duration::from_secs(1), || {
			!t2.frames_of(MessageType::BroadcastStateless).is_empty()
		})
		.await
	);
	assert!(t1.frames_of(MessageType::BroadcastStateless).is_empty());
}

#[tokio::test]
async fn awareness_fans_out_and_is_cleaned_up_on_disconnect() {
	let ext = RecordingExtension::new();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let t2 = MockTransport::new("t2");
	let c1 = connect(&server, &t1).await;
	let c2 = connect(&server, &t2).await;
	open_document(&c1, &t1, "doc-a").await;
	open_document(&c2, &t2, "doc-a").await;
	let baseline = t2.frames_of(MessageType::Awareness).len();

	// T1 announces presence; T2 sees it.
	let mut enc = Encoder::new();
	enc.write_var_uint(1);
	enc.write_var_uint(7);
	enc.write_var_uint(1);
	enc.write_var_string(r#"{"user":"alice"}"#);
	c1.handle_message(&encode_awareness("doc-a", &enc.into_inner())).await;

	assert!(
		wait_until(Duration::from_secs(1), || {
			t2.frames_of(MessageType::Awareness).len() > baseline
		})
		.await
	);
	let probe = Awareness::new();
	let frames = t2.frames_of(MessageType::Awareness);
	probe.apply_update(&frames[frames.len() - 1].payload).unwrap();
	assert_eq!(probe.entry(7).unwrap().clock, 1);

	// Query returns the current table.
	let before_query = t2.frames_of(MessageType::Awareness).len();
	c2.handle_message(&encode_query_awareness("doc-a")).await;
	assert!(
		wait_until(Duration::from_secs(1), || {
			t2.frames_of(MessageType::Awareness).len() > before_query
		})
		.await
	);
	let frames = t2.frames_of(MessageType::Awareness);
	let snapshot = Awareness::new();
	snapshot.apply_update(&frames[frames.len() - 1].payload).unwrap();
	assert_eq!(snapshot.len(), 1);

	// Disconnect evicts T1's awareness client with a bumped clock.
	let before_close = t2.frames_of(MessageType::Awareness).len();
	c1.close(1000, "bye").await;
	assert!(
		wait_until(Duration::from_secs(1), || {
			t2.frames_of(MessageType::Awareness).len() > before_close
		})
		.await
	);
	let frames = t2.frames_of(MessageType::Awareness);
	let removal = &frames[frames.len() - 1].payload;
	let change = probe.apply_update(removal).unwrap();
	assert_eq!(change.accepted.len(), 1);
	assert!(change.accepted[0].is_removal());
	assert_eq!(change.accepted[0].clock, 2);
	assert!(probe.is_empty());
}

#[tokio::test]
async fn stale_awareness_clock_is_not_fanned_out() {
	let ext = RecordingExtension::new();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let t2 = MockTransport::new("t2");
	let c1 = connect(&server, &t1).await;
	let c2 = connect(&server, &t2).await;
	open_document(&c1, &t1, "doc-a").await;
	open_document(&c2, &t2, "doc-a").await;

	let entry = |clock: u64, state: &str| {
		let mut enc = Encoder::new();
		enc.write_var_uint(1);
		enc.write_var_uint(9);
		enc.write_var_uint(clock);
		enc.write_var_string(state);
		enc.into_inner()
	};

	c1.handle_message(&encode_awareness("doc-a", &entry(5, "fresh"))).await;
	assert!(
		wait_until(Duration::from_secs(1), || {
			t2.frames_of(MessageType::Awareness).len() >= 2
		})
		.await
	);
	let count = t2.frames_of(MessageType::Awareness).len();

	// Stale clock: applied nowhere, broadcast nowhere.
	c1.handle_message(&encode_awareness("doc-a", &entry(4, "stale"))).await;
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(t2.frames_of(MessageType::Awareness).len(), count);
}

#[tokio::test]
async fn auth_frame_carries_the_token() {
	let ext = RecordingExtension::new();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let c1 = connect(&server, &t1).await;

	c1.handle_message(&encode_auth("doc-t", "secret-token")).await;
	assert!(
		wait_until(Duration::from_secs(2), || !ext.auth_tokens.lock().unwrap().is_empty())
			.await
	);
	assert_eq!(
		ext.auth_tokens.lock().unwrap().as_slice(),
		&[Some(Box::from("secret-token"))]
	);

	// A sync-initiated flow carries no token.
	c1.handle_message(&encode_sync_step1("doc-t", &empty_state_vector())).await;
	assert!(
		wait_until(Duration::from_secs(2), || t1.sync_statuses() == vec![true]).await
	);
}

#[tokio::test]
async fn rejected_authentication_closes_with_4403() {
	let ext = RecordingExtension::rejecting_auth();
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let c1 = connect(&server, &t1).await;

	c1.handle_message(&encode_sync_step1("doc-x", &empty_state_vector())).await;
	assert!(
		wait_until(Duration::from_secs(2), || t1.close_code() == Some(CLOSE_AUTH_FAILED))
			.await,
		"transport was not closed with 4403"
	);
	assert!(c1.is_closed());
	assert_eq!(ext.loads(), 0, "no document load after rejected auth");
	assert!(server.loaded_documents().is_empty());
}

#[tokio::test]
async fn frames_queued_during_authentication_run_in_order() {
	let ext = RecordingExtension::with_auth_delay(Duration::from_millis(150));
	let server = build_server(&ext).await;

	let t1 = MockTransport::new("t1");
	let c1 = connect(&server, &t1).await;

	let (u1, u2, expected) = two_sequential_updates();

	// The first frame starts the (slow) auth flow; the updates arrive
	// mid-authentication and must queue FIFO behind it.
	c1.handle_message(&encode_sync_step1("doc-q", &empty_state_vector())).await;
	c1.handle_message(&encode_sync_update("doc-q", &u1)).await;
	c1.handle_message(&encode_sync_update("doc-q", &u2)).await;

	assert!(
		wait_until(Duration::from_secs(2), || ext.changes() == 2).await,
		"queued updates were not applied"
	);
	assert_eq!(ext.loads(), 1);

	// A late joiner sees the combined result.
	let t2 = MockTransport::new("t2");
	let c2 = connect(&server, &t2).await;
	open_document(&c2, &t2, "doc-q").await;
	let sync = t2.sync_messages();
	let SyncMessage::Step2(diff) = &sync[0] else {
		panic!("expected step2 first, got {:?}", sync);
	};
	assert_eq!(text_from_updates(std::slice::from_ref(diff)), expected);
}

// vim: ts=4

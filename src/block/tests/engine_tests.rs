//! Tests for the direction-specific engine entry points.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use rstest::rstest;
use tokio::time::timeout;

use crate::{
    block::{
        BlockConfig, BlockEngine, BlockOptions, BlockSize, ExchangeKey, content_format_error,
        incomplete_response,
    },
    message::{ContentFormat, Message, MessageType, ResponseCode, Token, Transaction},
};

fn client_addr() -> SocketAddr { SocketAddr::from(([10, 0, 0, 1], 5683)) }

fn server_addr() -> SocketAddr { SocketAddr::from(([10, 0, 0, 2], 5683)) }

fn engine(max: usize) -> BlockEngine {
    BlockEngine::new(BlockConfig::new(
        BlockSize::new(max).expect("valid block size"),
        Duration::from_secs(30),
    ))
}

fn block(num: u32, more: bool, size: usize) -> BlockOptions {
    BlockOptions::new(num, more, BlockSize::new(size).expect("valid block size"))
}

fn patterned(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| u8::try_from(i % 251).expect("fits")).collect::<Vec<u8>>())
}

/// Inbound PUT fragment as the server sees it.
fn put_fragment(
    token: &Token,
    options: BlockOptions,
    payload: Bytes,
    format: u16,
    size1: usize,
) -> Transaction {
    let mut request = Message::request(server_addr(), token.clone());
    request.source = Some(client_addr());
    request.block1 = Some(options);
    request.size1 = Some(size1);
    request.payload = Some(payload);
    request.content_format = Some(ContentFormat::new(format));
    Transaction::new(request)
}

#[tokio::test]
async fn outgoing_request_slices_oversized_payload() {
    let client = engine(64);
    let token = Token::new(vec![0x01]);
    let mut request = Message::request(server_addr(), token.clone());
    request.payload = Some(patterned(300));
    request.content_format = Some(ContentFormat::new(0));

    let request = client.on_outgoing_request(request).await;

    assert_eq!(request.block1, Some(block(0, true, 64)));
    assert_eq!(request.size1, Some(300));
    assert_eq!(request.payload, Some(patterned(300).slice(0..64)));
    assert_eq!(client.store.block1_sent.len(), 1);
}

#[tokio::test]
async fn outgoing_request_without_block_options_passes_through() {
    let client = engine(64);
    let mut request = Message::request(server_addr(), Token::new(vec![0x02]));
    request.payload = Some(patterned(32));

    let request = client.on_outgoing_request(request).await;

    assert_eq!(request.block1, None);
    assert_eq!(request.payload, Some(patterned(32)));
    assert_eq!(client.store.block1_sent.len(), 0);
}

#[tokio::test]
async fn put_reassembly_completes_and_drops_the_session() {
    let server = engine(64);
    let token = Token::new(vec![0x03]);
    let payload = patterned(128);

    let first = server
        .on_incoming_request(put_fragment(&token, block(0, true, 64), payload.slice(0..64), 0, 128))
        .await;
    assert!(first.block_transfer);
    let response = first.response.expect("continue response");
    assert_eq!(response.code, Some(ResponseCode::Continue));
    assert_eq!(response.block1, Some(block(0, true, 64)));

    let second = server
        .on_incoming_request(put_fragment(
            &token,
            block(1, false, 64),
            payload.slice(64..128),
            0,
            128,
        ))
        .await;
    assert!(!second.block_transfer);
    assert_eq!(second.request.payload, Some(payload));
    assert!(second.transfer_duration.is_some());
    assert_eq!(server.store.block1_received.len(), 0);
}

#[tokio::test]
async fn content_format_mismatch_aborts_but_keeps_stored_bytes() {
    let server = engine(64);
    let token = Token::new(vec![0x04]);
    let payload = patterned(128);

    server
        .on_incoming_request(put_fragment(&token, block(0, true, 64), payload.slice(0..64), 0, 128))
        .await;

    let aborted = server
        .on_incoming_request(put_fragment(
            &token,
            block(1, false, 64),
            payload.slice(64..128),
            41,
            128,
        ))
        .await;

    assert!(aborted.block_transfer);
    let response = aborted.response.expect("error response");
    assert_eq!(response.code, Some(ResponseCode::UnsupportedContentFormat));
    assert_eq!(response.mtype, MessageType::Reset);

    // The stale session is left in place with the first fragment intact.
    let key = ExchangeKey::new(client_addr(), token);
    let state = server.store.block1_received.get(&key).expect("session retained");
    assert_eq!(state.assembled_payload(), Some(payload.slice(0..64)));
}

#[tokio::test]
async fn get_serves_staged_fragment_and_flags_transfer() {
    let server = engine(128);
    let token = Token::new(vec![0x05]);
    let resource = patterned(300);

    // Early negotiation stages a payload-less session.
    let mut first = Message::request(server_addr(), token.clone());
    first.source = Some(client_addr());
    first.block2 = Some(block(0, true, 128));
    let mut tx = server.on_incoming_request(Transaction::new(first)).await;
    assert!(tx.response.is_none());
    assert!(!tx.block_transfer);

    // The resource handler produces the body; the outgoing side slices it.
    let mut body = Message::response(client_addr(), token.clone());
    body.payload = Some(resource.clone());
    tx.response = Some(body);
    let tx = server.on_outgoing_response(tx).await;
    let response = tx.response.expect("fragmented response");
    assert_eq!(response.payload, Some(resource.slice(0..128)));
    assert_eq!(response.block2, Some(block(0, true, 128)));
    assert_eq!(response.size2, Some(300));

    // A follow-up request is served straight from the staged session.
    let mut second = Message::request(server_addr(), token.clone());
    second.source = Some(client_addr());
    second.block2 = Some(block(2, false, 128));
    let tx = server.on_incoming_request(Transaction::new(second)).await;
    assert!(tx.block_transfer);
    let response = tx.response.expect("content response");
    assert_eq!(response.code, Some(ResponseCode::Content));
    assert_eq!(response.payload, Some(resource.slice(256..300)));
    assert_eq!(response.size2, Some(300));
}

#[tokio::test]
async fn get_for_out_of_range_block_echoes_the_request_triple() {
    let server = engine(128);
    let token = Token::new(vec![0x06]);

    let mut first = Message::request(server_addr(), token.clone());
    first.source = Some(client_addr());
    first.block2 = Some(block(0, true, 128));
    let mut tx = server.on_incoming_request(Transaction::new(first)).await;
    let mut body = Message::response(client_addr(), token.clone());
    body.payload = Some(patterned(300));
    tx.response = Some(body);
    server.on_outgoing_response(tx).await;

    let mut out_of_range = Message::request(server_addr(), token.clone());
    out_of_range.source = Some(client_addr());
    out_of_range.block2 = Some(block(9, false, 128));
    let tx = server.on_incoming_request(Transaction::new(out_of_range)).await;

    let response = tx.response.expect("content response");
    assert_eq!(response.payload, None);
    assert_eq!(response.block2, Some(block(9, false, 128)));
    assert_eq!(response.size2, Some(300));
}

#[tokio::test]
async fn early_negotiation_waits_for_the_producer() {
    let server = Arc::new(engine(128));
    let token = Token::new(vec![0x07]);
    let resource = patterned(500);

    // First request negotiates; its body is still being produced.
    let mut first = Message::request(server_addr(), token.clone());
    first.source = Some(client_addr());
    first.block2 = Some(block(0, true, 128));
    let mut tx = server.on_incoming_request(Transaction::new(first)).await;

    // A near-simultaneous request for block 2 must wait for the body.
    let waiter = {
        let server = Arc::clone(&server);
        let token = token.clone();
        tokio::spawn(async move {
            let mut request = Message::request(server_addr(), token);
            request.source = Some(client_addr());
            request.block2 = Some(block(2, true, 128));
            server.on_incoming_request(Transaction::new(request)).await
        })
    };

    let mut body = Message::response(client_addr(), token.clone());
    body.payload = Some(resource.clone());
    tx.response = Some(body);
    server.on_outgoing_response(tx).await;

    let waited = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter must be woken")
        .expect("waiter task must not panic");
    let response = waited.response.expect("content response");
    assert_eq!(response.payload, Some(resource.slice(256..384)));
    assert_eq!(response.block2, Some(block(2, true, 128)));
}

#[tokio::test]
async fn block1_confirmations_advance_the_follow_up_request() {
    let client = engine(64);
    let token = Token::new(vec![0x08]);
    let payload = patterned(160);

    let mut request = Message::request(server_addr(), token.clone());
    request.payload = Some(payload.clone());
    request.mid = Some(7);
    let request = client.on_outgoing_request(request).await;

    let mut confirmation = Message::response(client_addr(), token.clone());
    confirmation.source = Some(server_addr());
    confirmation.block1 = Some(block(0, true, 64));
    let tx = client
        .on_incoming_response(Transaction::with_response(request, confirmation))
        .await;

    assert!(tx.block_transfer);
    assert_eq!(tx.request.mid, None);
    assert_eq!(tx.request.block1, Some(block(1, true, 64)));
    assert_eq!(tx.request.payload, Some(payload.slice(64..128)));
    assert_eq!(tx.request.size1, Some(160));

    let mut confirmation = Message::response(client_addr(), token.clone());
    confirmation.source = Some(server_addr());
    confirmation.block1 = Some(block(1, true, 64));
    let tx = client
        .on_incoming_response(Transaction::with_response(tx.request, confirmation))
        .await;
    assert_eq!(tx.request.block1, Some(block(2, false, 64)));
    assert_eq!(tx.request.payload, Some(payload.slice(128..160)));

    let mut confirmation = Message::response(client_addr(), token.clone());
    confirmation.source = Some(server_addr());
    confirmation.block1 = Some(block(2, false, 64));
    let tx = client
        .on_incoming_response(Transaction::with_response(tx.request, confirmation))
        .await;

    assert!(!tx.block_transfer);
    assert_eq!(tx.request.block1, None);
    // The sent-side session is only reclaimed by the expiry sweep.
    assert_eq!(client.store.block1_sent.len(), 1);
}

#[tokio::test]
async fn get_without_declared_size_extends_until_more_clears() {
    let client = engine(64);
    let token = Token::new(vec![0x0B]);
    let payload = patterned(128);

    let mut request = Message::request(server_addr(), token.clone());
    request.block2 = Some(block(0, true, 64));
    let request = client.on_outgoing_request(request).await;

    // The server declared no overall size; only the `more` flag says
    // whether blocks remain.
    let mut first = Message::response(client_addr(), token.clone());
    first.source = Some(server_addr());
    first.block2 = Some(block(0, true, 64));
    first.payload = Some(payload.slice(0..64));
    let tx = client
        .on_incoming_response(Transaction::with_response(request, first))
        .await;

    assert!(tx.block_transfer);
    assert_eq!(tx.request.block2, Some(block(1, true, 64)));

    let mut second = Message::response(client_addr(), token.clone());
    second.source = Some(server_addr());
    second.block2 = Some(block(1, false, 64));
    second.payload = Some(payload.slice(64..128));
    let tx = client
        .on_incoming_response(Transaction::with_response(tx.request, second))
        .await;

    assert!(!tx.block_transfer);
    let response = tx.response.expect("completed response");
    assert_eq!(response.payload, Some(payload));
}

#[tokio::test]
async fn served_fragment_restores_the_stored_content_format() {
    let server = engine(128);
    let token = Token::new(vec![0x0C]);
    let resource = patterned(300);

    let mut first = Message::request(server_addr(), token.clone());
    first.source = Some(client_addr());
    first.block2 = Some(block(0, true, 128));
    let mut tx = server.on_incoming_request(Transaction::new(first)).await;

    let mut body = Message::response(client_addr(), token.clone());
    body.payload = Some(resource.clone());
    body.content_format = Some(ContentFormat::new(41));
    tx.response = Some(body);
    server.on_outgoing_response(tx).await;

    // The follow-up names no format; the served fragment's wins.
    let mut follow_up = Message::request(server_addr(), token.clone());
    follow_up.source = Some(client_addr());
    follow_up.block2 = Some(block(1, true, 128));
    let tx = server.on_incoming_request(Transaction::new(follow_up)).await;

    let response = tx.response.expect("content response");
    assert_eq!(response.content_format, Some(ContentFormat::new(41)));
    assert_eq!(response.payload, Some(resource.slice(128..256)));
}

#[tokio::test]
async fn response_format_change_mid_collection_aborts_the_transfer() {
    let client = engine(64);
    let token = Token::new(vec![0x0D]);
    let payload = patterned(128);

    let mut request = Message::request(server_addr(), token.clone());
    request.block2 = Some(block(0, true, 64));
    let request = client.on_outgoing_request(request).await;

    let mut first = Message::response(client_addr(), token.clone());
    first.source = Some(server_addr());
    first.block2 = Some(block(0, true, 64));
    first.size2 = Some(128);
    first.payload = Some(payload.slice(0..64));
    first.content_format = Some(ContentFormat::new(0));
    let tx = client
        .on_incoming_response(Transaction::with_response(request, first))
        .await;
    assert!(tx.block_transfer);

    let mut second = Message::response(client_addr(), token.clone());
    second.source = Some(server_addr());
    second.block2 = Some(block(1, false, 64));
    second.payload = Some(payload.slice(64..128));
    second.content_format = Some(ContentFormat::new(41));
    let tx = client
        .on_incoming_response(Transaction::with_response(tx.request, second))
        .await;

    assert!(tx.block_transfer);
    let response = tx.response.expect("error response");
    assert_eq!(response.code, Some(ResponseCode::UnsupportedContentFormat));
    assert_eq!(response.mtype, MessageType::Reset);
}

#[tokio::test]
async fn incoming_empty_passes_the_transaction_through() {
    let server = engine(64);
    let mut request = Message::request(server_addr(), Token::new(vec![0x09]));
    request.source = Some(client_addr());
    request.payload = Some(patterned(8));
    let empty = Message::default();

    let tx = server.on_incoming_empty(&empty, Transaction::new(request)).await;

    assert!(!tx.block_transfer);
    assert_eq!(tx.request.payload, Some(patterned(8)));
    assert!(tx.response.is_none());
}

#[rstest]
#[case(ResponseCode::RequestEntityIncomplete, MessageType::Acknowledgement)]
#[case(ResponseCode::UnsupportedContentFormat, MessageType::Reset)]
fn error_helpers_synthesize_terminal_responses(
    #[case] code: ResponseCode,
    #[case] mtype: MessageType,
) {
    let mut request = Message::request(server_addr(), Token::new(vec![0x0A]));
    request.source = Some(client_addr());
    let tx = Transaction::new(request);

    let tx = match code {
        ResponseCode::RequestEntityIncomplete => incomplete_response(tx),
        _ => content_format_error(tx),
    };

    assert!(tx.block_transfer);
    let response = tx.response.expect("synthesized response");
    assert_eq!(response.code, Some(code));
    assert_eq!(response.mtype, mtype);
    assert_eq!(response.destination, Some(client_addr()));
}

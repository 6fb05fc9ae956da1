//! End-to-end exchanges between the connection worker and the request
//! handler, over loopback TCP and over in-memory pipes.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use conntime_metrics::records::RecordSink;
use conntime_metrics::{Measurement, ResultCollector};
use conntime_net::framing::FrameReader;
use conntime_net::{Acceptor, Connection, ConnectionWorker, RequestHandler, Target};
use slog::o;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}

#[derive(Default, Clone)]
struct MemorySink(Arc<Mutex<Vec<Measurement>>>);

impl RecordSink for MemorySink {
    fn write_record(&mut self, m: &Measurement) -> io::Result<()> {
        self.0.lock().unwrap().push(m.clone());
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn start_server(payload_size: Option<usize>) -> (SocketAddr, CancellationToken) {
    let cancel = CancellationToken::new();
    let acceptor = Acceptor::bind(
        "127.0.0.1:0",
        RequestHandler::new(payload_size, logger()),
        logger(),
    )
    .await
    .expect("bind server");
    let addr = acceptor.local_addr().unwrap();
    tokio::spawn(acceptor.run(cancel.clone()));
    (addr, cancel)
}

fn target(addr: SocketAddr, payload_size: Option<usize>) -> Target {
    Target {
        host: addr.ip().to_string(),
        port: addr.port(),
        payload_size,
    }
}

fn assert_complete(m: &Measurement) {
    assert!(m.start().is_some());
    assert!(m.connected().is_some());
    assert!(m.server_received().is_some(), "server receipt missing");
    assert!(m.first_response().is_some());
    assert!(m.completed().is_some());
}

#[tokio::test]
async fn loopback_round_trip_records_every_instant() {
    let (addr, cancel) = start_server(None).await;
    let worker = ConnectionWorker::new(target(addr, None), logger());

    let m = tokio::time::timeout(Duration::from_secs(5), worker.measure())
        .await
        .expect("measurement timed out");

    assert_complete(&m);
    let connect = m.connect_time().unwrap();
    let server = m.server_receive_time().unwrap();
    let response = m.response_time().unwrap();
    assert!(connect >= chrono::Duration::zero());
    assert!(server >= connect);
    assert!(response >= server);
    assert!(m.latency().unwrap() <= response);
    cancel.cancel();
}

#[tokio::test]
async fn loopback_round_trip_with_payloads() {
    let (addr, cancel) = start_server(Some(2048)).await;
    let worker = ConnectionWorker::new(target(addr, Some(4096)), logger());

    let m = tokio::time::timeout(Duration::from_secs(5), worker.measure())
        .await
        .expect("measurement timed out");

    assert_complete(&m);
    cancel.cancel();
}

#[tokio::test]
async fn refused_connection_keeps_only_start() {
    // grab a free port and release it again
    let addr = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    };
    let worker = ConnectionWorker::new(target(addr, None), logger());

    let m = tokio::time::timeout(Duration::from_secs(5), worker.measure())
        .await
        .expect("measurement timed out");

    assert!(m.start().is_some());
    assert!(m.connected().is_none());
    assert!(m.connect_time().is_none());
    assert!(m.response_time().is_none());
}

#[tokio::test]
async fn pipe_exchange_without_sockets() {
    let (client, server) = Connection::pipe(64 * 1024);
    let handler = RequestHandler::new(None, logger());
    let worker = ConnectionWorker::new(
        Target {
            host: "pipe".into(),
            port: 0,
            payload_size: Some(1024),
        },
        logger(),
    );

    let (m, served) = tokio::join!(worker.measure_with(Utc::now(), client), handler.handle(server));

    served.expect("handler failed");
    assert_complete(&m);
}

#[tokio::test]
async fn stalled_peer_does_not_block_other_clients() {
    let (addr, cancel) = start_server(None).await;
    // connected, but never sends a byte
    let _stalled = TcpStream::connect(addr).await.unwrap();
    let worker = ConnectionWorker::new(target(addr, None), logger());

    let m = tokio::time::timeout(Duration::from_secs(5), worker.measure())
        .await
        .expect("measurement blocked behind the stalled peer");

    assert_complete(&m);
    cancel.cancel();
}

// Reads the request, then answers with `reply` instead of a well-formed
// response.
async fn answer_with(mut server: Connection, reply: &'static [u8]) {
    let mut frames = FrameReader::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = server.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending its request");
        if frames.push(&chunk[..n]).unwrap().is_some() {
            break;
        }
    }
    server.write_all(reply).await.unwrap();
    server.close().await.unwrap();
}

async fn measure_against(reply: &'static [u8]) -> Measurement {
    let (client, server) = Connection::pipe(64 * 1024);
    let worker = ConnectionWorker::new(target("127.0.0.1:9".parse().unwrap(), None), logger());
    let (m, ()) = tokio::join!(worker.measure_with(Utc::now(), client), answer_with(server, reply));
    m
}

#[tokio::test]
async fn unparseable_reply_drops_only_server_receipt() {
    let m = measure_against(b"2024-01-01T00:00:00Z\nnot an instant\n").await;

    assert!(m.start().is_some());
    assert!(m.connected().is_some());
    assert!(m.first_response().is_some());
    assert!(m.completed().is_some());
    assert!(m.server_received().is_none());
    assert!(m.server_receive_time().is_none());
    assert!(m.response_time().is_some());
}

#[tokio::test]
async fn empty_reply_still_completes() {
    let m = measure_against(b"").await;

    assert!(m.start().is_some());
    assert!(m.connected().is_some());
    assert!(m.completed().is_some());
    assert!(m.first_response().is_none());
    assert!(m.server_received().is_none());
}

#[tokio::test]
async fn results_reach_every_collector_in_order() {
    let (addr, cancel) = start_server(None).await;
    let file = MemorySink::default();
    let live = MemorySink::default();
    let file_collector = ResultCollector::spawn("file", file.clone(), logger()).unwrap();
    let live_collector = ResultCollector::spawn("live", live.clone(), logger()).unwrap();

    let mut worker = ConnectionWorker::new(target(addr, None), logger());
    worker.add_collector(file_collector.handle());
    worker.add_collector(live_collector.handle());
    for _ in 0..3 {
        worker.run().await;
    }

    assert_eq!(file_collector.shutdown().unwrap(), 3);
    assert_eq!(live_collector.shutdown().unwrap(), 3);
    assert_eq!(*file.0.lock().unwrap(), *live.0.lock().unwrap());
    cancel.cancel();
}

#[tokio::test]
async fn closed_collector_stops_hand_off() {
    let first = MemorySink::default();
    let second = MemorySink::default();
    let first_collector = ResultCollector::spawn("first", first.clone(), logger()).unwrap();
    let second_collector = ResultCollector::spawn("second", second.clone(), logger()).unwrap();

    let mut worker = ConnectionWorker::new(target("127.0.0.1:9".parse().unwrap(), None), logger());
    worker.add_collector(first_collector.handle());
    worker.add_collector(second_collector.handle());

    // the first collector refuses, so the second never sees the sample
    assert_eq!(first_collector.shutdown().unwrap(), 0);
    worker.hand_off(Measurement::builder().start(Utc::now()).build());

    assert_eq!(second_collector.shutdown().unwrap(), 0);
    assert!(first.0.lock().unwrap().is_empty());
    assert!(second.0.lock().unwrap().is_empty());
}

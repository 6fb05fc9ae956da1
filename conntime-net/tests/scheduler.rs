use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conntime_metrics::records::RecordSink;
use conntime_metrics::{Measurement, ResultCollector};
use conntime_net::{Acceptor, BurstSchedule, BurstScheduler, ConnectionWorker, RequestHandler, Target, TermSummary};
use slog::o;
use tokio_util::sync::CancellationToken;

fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}

fn unreachable_target() -> Target {
    let addr = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    };
    Target {
        host: addr.ip().to_string(),
        port: addr.port(),
        payload_size: None,
    }
}

fn schedule(floor: u64, ceiling: u64, period_ms: u64, budget_ms: u64) -> BurstSchedule {
    BurstSchedule {
        floor_threads: floor,
        ceiling_threads: ceiling,
        period: Duration::from_millis(period_ms),
        budget: Duration::from_millis(budget_ms),
    }
}

#[derive(Default, Clone)]
struct CountingSink(Arc<AtomicU64>);

impl RecordSink for CountingSink {
    fn write_record(&mut self, _m: &Measurement) -> io::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Launch counting (virtual time)
// ============================================================================

#[tokio::test(start_paused = true)]
async fn every_term_launches_once_per_period_within_budget() {
    let worker = ConnectionWorker::new(unreachable_target(), logger());
    let scheduler = BurstScheduler::new(schedule(1, 3, 1000, 3500), worker, logger());

    let summary = scheduler.run(&CancellationToken::new()).await;

    assert!(!summary.cancelled);
    assert_eq!(
        summary.terms,
        vec![
            TermSummary { threads: 1, launches: 4 },
            TermSummary { threads: 2, launches: 4 },
            TermSummary { threads: 3, launches: 4 },
        ]
    );
    assert_eq!(summary.launches(), 12);
    assert_eq!(summary.connections(), 24);
}

#[tokio::test(start_paused = true)]
async fn floor_skips_small_terms() {
    let worker = ConnectionWorker::new(unreachable_target(), logger());
    let scheduler = BurstScheduler::new(schedule(5, 16, 1000, 1500), worker, logger());

    let summary = scheduler.run(&CancellationToken::new()).await;

    let threads: Vec<u64> = summary.terms.iter().map(|t| t.threads).collect();
    assert_eq!(threads, vec![6, 10, 16]);
    assert!(summary.terms.iter().all(|t| t.launches == 2));
}

#[tokio::test(start_paused = true)]
async fn zero_period_is_raised_to_the_minimum() {
    let worker = ConnectionWorker::new(unreachable_target(), logger());
    let scheduler = BurstScheduler::new(schedule(1, 1, 0, 10), worker, logger());

    let summary = scheduler.run(&CancellationToken::new()).await;

    assert_eq!(summary.terms.len(), 1);
    let launches = summary.terms[0].launches;
    assert!((1..=10).contains(&launches), "launches: {}", launches);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_launches_nothing() {
    let worker = ConnectionWorker::new(unreachable_target(), logger());
    let scheduler = BurstScheduler::new(schedule(1, 100, 1000, 60_000), worker, logger());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = scheduler.run(&cancel).await;

    assert!(summary.cancelled);
    assert!(summary.terms.is_empty());
    assert_eq!(scheduler.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_further_launches() {
    let worker = ConnectionWorker::new(unreachable_target(), logger());
    let scheduler = BurstScheduler::new(schedule(1, 100, 1000, 60_000), worker, logger());
    let cancel = CancellationToken::new();

    let (summary, ()) = tokio::join!(scheduler.run(&cancel), async {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
    });

    assert!(summary.cancelled);
    assert_eq!(summary.terms, vec![TermSummary { threads: 1, launches: 2 }]);
}

// ============================================================================
// Drain
// ============================================================================

async fn start_server() -> (SocketAddr, CancellationToken) {
    let cancel = CancellationToken::new();
    let acceptor = Acceptor::bind("127.0.0.1:0", RequestHandler::new(None, logger()), logger())
        .await
        .expect("bind server");
    let addr = acceptor.local_addr().unwrap();
    tokio::spawn(acceptor.run(cancel.clone()));
    (addr, cancel)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_waits_for_every_launched_worker() {
    let (addr, server) = start_server().await;
    let sink = CountingSink::default();
    let collector = ResultCollector::spawn("file", sink.clone(), logger()).unwrap();
    let worker = ConnectionWorker::with_collector(
        Target {
            host: addr.ip().to_string(),
            port: addr.port(),
            payload_size: None,
        },
        collector.handle(),
        logger(),
    );
    let scheduler = BurstScheduler::new(schedule(1, 2, 50, 120), worker, logger());

    let summary = scheduler.run(&CancellationToken::new()).await;
    assert!(scheduler.drain(Duration::from_secs(10)).await);
    assert_eq!(scheduler.in_flight(), 0);
    drop(scheduler);

    let written = collector.shutdown().unwrap();
    assert!(summary.connections() > 0);
    assert_eq!(written, summary.connections());
    assert_eq!(sink.0.load(Ordering::SeqCst), written);
    server.cancel();
}

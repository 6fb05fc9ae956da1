use crate::measurement::Measurement;
use crate::sink::RecordSink;
use crossbeam::channel::{unbounded, Receiver, Sender};
use slog::{debug, o, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Queue item of a result collector.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Result(Measurement),
    /// Finalize the sink and stop consuming.
    Shutdown,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("result collector '{0}' is closed")]
    Closed(Arc<str>),
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("result collector '{name}' failed: {source}")]
    Sink {
        name: Arc<str>,
        #[source]
        source: io::Error,
    },
    #[error("result collector '{0}' consumer panicked")]
    Panicked(Arc<str>),
}

/// Ordered sink for measurements produced by many concurrent workers.
///
/// Submissions go through an unbounded FIFO; a single consumer thread writes
/// them to the `RecordSink` in dequeue order. `shutdown` enqueues the
/// `Record::Shutdown` marker, after which the consumer finalizes the sink and
/// exits. Anything submitted after that is dropped.
pub struct ResultCollector {
    name: Arc<str>,
    tx: Sender<Record>,
    consumer: Option<JoinHandle<io::Result<u64>>>,
}

impl ResultCollector {
    pub fn spawn<S>(name: &str, sink: S, logger: slog::Logger) -> io::Result<ResultCollector>
    where
        S: RecordSink + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = unbounded();
        let logger = logger.new(o!("collector" => name.to_string()));
        let consumer = thread::Builder::new()
            .name(format!("collector-{}", name))
            .spawn(move || consume(rx, sink, logger))?;
        Ok(ResultCollector {
            name,
            tx,
            consumer: Some(consumer),
        })
    }

    pub fn handle(&self) -> CollectorHandle {
        CollectorHandle {
            name: self.name.clone(),
            sender: self.tx.clone(),
        }
    }

    /// Send the shutdown marker and wait until the sink is finalized. Returns
    /// the number of records written.
    pub fn shutdown(mut self) -> Result<u64, CollectorError> {
        self.finalize()
    }

    fn finalize(&mut self) -> Result<u64, CollectorError> {
        let consumer = match self.consumer.take() {
            Some(c) => c,
            None => return Ok(0),
        };
        // the consumer only goes away early if it panicked; join reports that
        let _ = self.tx.send(Record::Shutdown);
        match consumer.join() {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(source)) => Err(CollectorError::Sink {
                name: self.name.clone(),
                source,
            }),
            Err(_) => Err(CollectorError::Panicked(self.name.clone())),
        }
    }
}

impl Drop for ResultCollector {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

fn consume<S: RecordSink>(rx: Receiver<Record>, mut sink: S, logger: slog::Logger) -> io::Result<u64> {
    let mut written = 0;
    loop {
        match rx.recv() {
            Ok(Record::Result(m)) => match sink.write_record(&m) {
                Ok(()) => written += 1,
                Err(e) => warn!(logger, "could not write result record"; "error" => %e),
            },
            Ok(Record::Shutdown) => {
                debug!(logger, "shutdown received"; "written" => written, "discarded" => rx.len());
                break;
            }
            Err(_) => {
                debug!(logger, "all producers gone"; "written" => written);
                break;
            }
        }
    }
    sink.finish()?;
    Ok(written)
}

#[derive(Debug, Clone)]
pub struct CollectorHandle {
    name: Arc<str>,
    sender: Sender<Record>,
}

impl CollectorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a measurement. Never blocks.
    pub fn submit(&self, m: Measurement) -> Result<(), SubmitError> {
        self.sender
            .send(Record::Result(m))
            .map_err(|_| SubmitError::Closed(self.name.clone()))
    }
}

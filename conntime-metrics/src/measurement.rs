use crate::timestamp::Timestamp;
use chrono::Duration;
use std::fmt;

/// Timing of a single request/response round trip. Each instant is only set if
/// the corresponding stage was reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measurement {
    start: Option<Timestamp>,
    connected: Option<Timestamp>,
    server_received: Option<Timestamp>,
    first_response: Option<Timestamp>,
    completed: Option<Timestamp>,
}

fn between(from: Option<Timestamp>, to: Option<Timestamp>) -> Option<Duration> {
    from.and_then(|f| to.map(|t| t.signed_duration_since(f)))
}

impl Measurement {
    pub fn builder() -> MeasurementBuilder {
        MeasurementBuilder::default()
    }

    pub fn start(&self) -> Option<Timestamp> {
        self.start
    }

    pub fn connected(&self) -> Option<Timestamp> {
        self.connected
    }

    pub fn server_received(&self) -> Option<Timestamp> {
        self.server_received
    }

    pub fn first_response(&self) -> Option<Timestamp> {
        self.first_response
    }

    pub fn completed(&self) -> Option<Timestamp> {
        self.completed
    }

    pub fn connect_time(&self) -> Option<Duration> {
        between(self.start, self.connected)
    }

    pub fn server_receive_time(&self) -> Option<Duration> {
        between(self.start, self.server_received)
    }

    pub fn latency(&self) -> Option<Duration> {
        between(self.start, self.first_response)
    }

    pub fn response_time(&self) -> Option<Duration> {
        between(self.start, self.completed)
    }

    pub fn metric(&self, metric: Metric) -> Option<Duration> {
        match metric {
            Metric::ConnectTime => self.connect_time(),
            Metric::ServerReceiveTime => self.server_receive_time(),
            Metric::Latency => self.latency(),
            Metric::ResponseTime => self.response_time(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MeasurementBuilder {
    inner: Measurement,
}

impl MeasurementBuilder {
    pub fn start(mut self, t: Timestamp) -> Self {
        self.inner.start = Some(t);
        self
    }

    pub fn connected(mut self, t: Timestamp) -> Self {
        self.inner.connected = Some(t);
        self
    }

    pub fn server_received(mut self, t: Timestamp) -> Self {
        self.inner.server_received = Some(t);
        self
    }

    pub fn first_response(mut self, t: Timestamp) -> Self {
        self.inner.first_response = Some(t);
        self
    }

    pub fn completed(mut self, t: Timestamp) -> Self {
        self.inner.completed = Some(t);
        self
    }

    pub fn build(self) -> Measurement {
        self.inner
    }
}

/// Durations derived from a `Measurement`, all relative to its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    ConnectTime,
    ServerReceiveTime,
    Latency,
    ResponseTime,
}

impl Metric {
    pub fn all() -> &'static [Metric] {
        static ALL_METRICS: &[Metric] = &[
            Metric::ConnectTime,
            Metric::ServerReceiveTime,
            Metric::Latency,
            Metric::ResponseTime,
        ];
        ALL_METRICS
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::ConnectTime => "Connect",
            Metric::ServerReceiveTime => "Server",
            Metric::Latency => "Latency",
            Metric::ResponseTime => "Resp",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", &self)
    }
}

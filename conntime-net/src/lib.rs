pub mod framing;
pub mod handler;
pub mod plan;
pub mod scheduler;
pub mod server;
pub mod transport;
pub mod worker;

pub use crate::handler::RequestHandler;
pub use crate::plan::BurstPlan;
pub use crate::scheduler::{BurstSchedule, BurstScheduler, RunSummary, TermSummary};
pub use crate::server::Acceptor;
pub use crate::transport::Connection;
pub use crate::worker::{ConnectionWorker, Target};

//! Durable job execution: claim-based queue, worker driver, and the two
//! job-type processors (arena simulations and live20 runs).

pub mod arena;
pub mod live20;
pub mod queue;
pub mod worker;

pub use queue::{JobQueue, JobTable};
pub use worker::{JobProcessor, Worker, WorkerConfig};

//! Arena job processor: drives a claimed simulation day by day.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use super::queue::JobQueue;
use super::worker::JobProcessor;
use crate::engine::repo;
use crate::engine::SimulationEngine;
use crate::error::{Error, Result};

pub struct ArenaProcessor {
    pool: PgPool,
    queue: JobQueue,
    engine: Arc<SimulationEngine>,
}

impl ArenaProcessor {
    pub fn new(pool: PgPool, queue: JobQueue, engine: Arc<SimulationEngine>) -> Self {
        Self {
            pool,
            queue,
            engine,
        }
    }
}

#[async_trait]
impl JobProcessor for ArenaProcessor {
    fn kind(&self) -> &'static str {
        "arena"
    }

    /// Initialise on first claim, then step days until done. Cancellation
    /// is probed between days: a cancelled simulation keeps its committed
    /// `current_day` and every snapshot written so far.
    async fn process(&self, job_id: i64) -> Result<()> {
        let sim = repo::get_simulation(&self.pool, job_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("simulation {job_id} disappeared")))?;

        if !sim.is_initialized() {
            self.engine.initialize_simulation(job_id).await?;
        }

        loop {
            if self.queue.is_cancelled(job_id).await? {
                return Err(Error::Cancelled);
            }
            match self.engine.step_day(job_id).await? {
                Some(day) => {
                    tracing::debug!(job_id, day, "arena day step committed");
                }
                None => return Ok(()),
            }
        }
    }
}

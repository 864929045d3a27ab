//! Worker loop draining one evaluation queue.
//!
//! The loop sleeps on the queue's condition variable, bounded by the poll
//! interval, and executes one query at a time:
//!
//! 1. Pop the next query while no query is active
//! 2. Drop it silently if it went stale
//! 3. Mark it active and emit `evaluation_started`
//! 4. Execute it (the only blocking step)
//! 5. Emit `evaluation_finished`, unless it was stopped meanwhile

use std::sync::Arc;
use std::time::Duration;

use crate::events::{Event, EventSender};

use super::evaluation_queue::{ActiveQuery, Shared};
use super::executor::QueryExecutor;
use super::query::Query;

pub(crate) fn run(
    shared: Arc<Shared>,
    executor: Arc<dyn QueryExecutor>,
    events: EventSender,
    poll_interval: Duration,
) {
    while let Some((query, run)) = next_query(&shared, executor.as_ref(), &events, poll_interval) {
        let result = executor.execute(&query);

        let mut state = shared.state.lock();
        let current = state.active.is_some_and(|active| active.run == run);
        if current {
            state.active = None;
        }
        if current && state.is_live(&query) {
            events.send(Event::EvaluationFinished {
                ticket: query.ticket(),
                result,
            });
        } else {
            tracing::debug!("Discarding result of stopped {}", query.id());
            if let Some(result) = result {
                result.release();
            }
        }
    }
    tracing::debug!("Worker loop finished");
}

/// Block until a live query can be started, or the queue shuts down.
fn next_query(
    shared: &Shared,
    executor: &dyn QueryExecutor,
    events: &EventSender,
    poll_interval: Duration,
) -> Option<(Query, u64)> {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return None;
        }
        if state.active.is_none() {
            if let Some(query) = state.pending.pop_front() {
                if !state.is_live(&query) {
                    tracing::debug!("Dropping stale {} for {}", query.id(), query.cell());
                    continue;
                }

                let run = state.next_run;
                state.next_run += 1;
                let ticket = query.ticket();
                state.active = Some(ActiveQuery { ticket, run });
                executor.arm(&ticket);
                events.send(Event::EvaluationStarted { ticket });
                return Some((query, run));
            }
        }
        shared.wake.wait_for(&mut state, poll_interval);
    }
}

//! FIFO of pending queries with per-cell cancellation bookkeeping.
//!
//! # Stale queries
//!
//! Every cell has a cancellation generation, starting at 0 and bumped by
//! one on each [`EvaluationQueue::stop_evaluation_by_cell`]. A query is
//! stamped with `generation + 1` when it is enqueued and stays live while
//! its stamp is greater than the cell's current generation. Any stop issued
//! after the enqueue therefore makes it stale, and the worker drops it
//! without touching the engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::events::{Event, EventSender, QueryTicket};
use crate::model::{CellId, DocumentId};

use super::executor::QueryExecutor;
use super::query::Query;
use super::worker;

/// Query picked up by the worker and not yet finished or stopped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveQuery {
    pub(crate) ticket: QueryTicket,
    /// Distinguishes consecutive runs of the same cell.
    pub(crate) run: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) pending: VecDeque<Query>,
    pub(crate) generations: FxHashMap<CellId, u64>,
    pub(crate) active: Option<ActiveQuery>,
    pub(crate) next_run: u64,
    pub(crate) shutdown: bool,
}

impl QueueState {
    pub(crate) fn generation(&self, cell: CellId) -> u64 {
        self.generations.get(&cell).copied().unwrap_or(0)
    }

    pub(crate) fn is_live(&self, query: &Query) -> bool {
        query.stamp > self.generation(query.cell())
    }
}

/// State shared between the queue handle and its worker thread.
pub(crate) struct Shared {
    pub(crate) state: Mutex<QueueState>,
    pub(crate) wake: Condvar,
}

/// Serializes queries against one executor on a dedicated worker thread.
///
/// Every document has one queue bound to its engine; markdown cells of all
/// documents share one more.
pub struct EvaluationQueue {
    name: String,
    shared: Arc<Shared>,
    executor: Arc<dyn QueryExecutor>,
    events: EventSender,
}

impl EvaluationQueue {
    /// Create the queue and spawn its worker loop.
    pub fn spawn(
        name: impl Into<String>,
        executor: Arc<dyn QueryExecutor>,
        events: EventSender,
        poll_interval: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker_executor = executor.clone();
        let worker_events = events.clone();
        thread::Builder::new()
            .name(format!("quire-{}", name))
            .spawn(move || {
                worker::run(worker_shared, worker_executor, worker_events, poll_interval)
            })?;
        tracing::debug!("Spawned worker for queue {}", name);

        Ok(Self {
            name,
            shared,
            executor,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stamp `query` and append it to the queue.
    ///
    /// `query_queued` is emitted before the worker can see the query, so it
    /// always precedes `evaluation_started`.
    pub fn add_query(&self, mut query: Query) -> QueryTicket {
        let mut state = self.shared.state.lock();
        query.stamp = state.generation(query.cell()) + 1;
        let ticket = query.ticket();
        tracing::debug!(
            "{}: queued {} for {} (stamp {})",
            self.name,
            ticket.id,
            ticket.cell,
            query.stamp
        );
        self.events.send(Event::QueryQueued { ticket });
        state.pending.push_back(query);
        drop(state);
        self.shared.wake.notify_one();
        ticket
    }

    /// Invalidate every query of `cell` and interrupt it if it is running.
    ///
    /// Returns the `cell_evaluation_stopped` event for the caller to
    /// deliver; it is produced even when nothing was running.
    pub fn stop_evaluation_by_cell(&self, document: DocumentId, cell: CellId) -> Event {
        let mut state = self.shared.state.lock();
        let generation = state.generations.entry(cell).or_insert(0);
        *generation += 1;
        tracing::debug!("{}: {} now at generation {}", self.name, cell, *generation);

        if let Some(active) = state.active
            && active.ticket.cell == cell
        {
            self.interrupt_active(&active);
            state.active = None;
        }
        Event::CellEvaluationStopped { document, cell }
    }

    /// Drain every pending query of `document`, then interrupt its running
    /// query.
    ///
    /// Returns one `cell_evaluation_stopped` event per affected query.
    pub fn stop_evaluation_by_document(&self, document: DocumentId) -> Vec<Event> {
        let mut state = self.shared.state.lock();
        let mut stopped = Vec::new();

        let mut kept = VecDeque::with_capacity(state.pending.len());
        for query in state.pending.drain(..) {
            if query.document() == document {
                stopped.push(Event::CellEvaluationStopped {
                    document,
                    cell: query.cell(),
                });
            } else {
                kept.push_back(query);
            }
        }
        state.pending = kept;

        if let Some(active) = state.active
            && active.ticket.document == document
        {
            self.interrupt_active(&active);
            state.active = None;
            stopped.push(Event::CellEvaluationStopped {
                document,
                cell: active.ticket.cell,
            });
        }
        tracing::debug!("{}: stopped {} queries of {}", self.name, stopped.len(), document);
        stopped
    }

    /// Drop the bookkeeping of a removed cell.
    ///
    /// Callers stop the cell first. Its pending queries go together with
    /// its generation, so none of them can turn live again.
    pub fn forget_cell(&self, cell: CellId) {
        let mut state = self.shared.state.lock();
        state.pending.retain(|query| query.cell() != cell);
        state.generations.remove(&cell);
    }

    fn interrupt_active(&self, active: &ActiveQuery) {
        let delivered = self.executor.interrupt(&active.ticket);
        tracing::debug!(
            "{}: interrupted {} (signal delivered: {})",
            self.name,
            active.ticket.id,
            delivered
        );
    }

    /// Current cancellation generation of `cell`.
    pub fn generation(&self, cell: CellId) -> u64 {
        self.shared.state.lock().generation(cell)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Ticket of the query being executed, if any.
    pub fn active(&self) -> Option<QueryTicket> {
        self.shared.state.lock().active.map(|a| a.ticket)
    }

    /// Stop the worker loop after its current query.
    ///
    /// The worker is detached: a query blocked on the engine finishes on
    /// its own and its result is discarded.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        state.pending.clear();
        state.active = None;
        drop(state);
        self.shared.wake.notify_all();
        tracing::debug!("{}: shut down", self.name);
    }
}

impl Drop for EvaluationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellKind, CellResult};
    use std::sync::mpsc::Receiver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tempfile::TempDir;

    /// Executor that blocks every query until released.
    #[derive(Default)]
    struct GateExecutor {
        executed: AtomicUsize,
        interrupts: AtomicUsize,
        open: Mutex<bool>,
        opened: Condvar,
    }

    impl GateExecutor {
        fn open(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }
    }

    impl QueryExecutor for GateExecutor {
        fn execute(&self, query: &Query) -> Option<CellResult> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            match query.source().strip_prefix("image:") {
                Some(path) => Some(CellResult::ImageAsset(path.into())),
                None => CellResult::text(query.source()),
            }
        }

        fn interrupt(&self, _ticket: &QueryTicket) -> bool {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn queue(executor: Arc<GateExecutor>) -> (EvaluationQueue, Receiver<Event>) {
        let (events, rx) = EventSender::channel();
        let queue = EvaluationQueue::spawn(
            "test",
            executor,
            events,
            Duration::from_millis(5),
        )
        .unwrap();
        (queue, rx)
    }

    fn wait_for(rx: &Receiver<Event>, code: &str) -> Event {
        loop {
            let event = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("timed out waiting for event");
            if event.code() == code {
                return event;
            }
        }
    }

    #[test]
    fn test_generation_increments_by_one() {
        let (queue, _rx) = queue(Arc::new(GateExecutor::default()));
        let cell = CellId(9000);
        assert_eq!(queue.generation(cell), 0);
        queue.stop_evaluation_by_cell(DocumentId(0), cell);
        queue.stop_evaluation_by_cell(DocumentId(0), cell);
        assert_eq!(queue.generation(cell), 2);
    }

    #[test]
    fn test_stop_always_reports() {
        let executor = Arc::new(GateExecutor::default());
        let (queue, _rx) = queue(executor.clone());
        let event = queue.stop_evaluation_by_cell(DocumentId(3), CellId(9001));
        assert_eq!(
            event,
            Event::CellEvaluationStopped {
                document: DocumentId(3),
                cell: CellId(9001)
            }
        );
        // Nothing was running.
        assert_eq!(executor.interrupts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_query_is_dropped() {
        let executor = Arc::new(GateExecutor::default());
        let (queue, rx) = queue(executor.clone());
        let doc = DocumentId(0);
        let (a, b) = (CellId(9002), CellId(9003));

        // Keep the worker busy with `a` so `b` stays queued.
        queue.add_query(Query::new(doc, a, CellKind::Code, "a"));
        wait_for(&rx, "evaluation_started");
        queue.add_query(Query::new(doc, b, CellKind::Code, "b"));
        queue.stop_evaluation_by_cell(doc, b);
        executor.open();

        let finished = wait_for(&rx, "evaluation_finished");
        assert!(matches!(
            finished,
            Event::EvaluationFinished { ticket, .. } if ticket.cell == a
        ));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(executor.executed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_running_query_discards_result() {
        let executor = Arc::new(GateExecutor::default());
        let (queue, rx) = queue(executor.clone());
        let doc = DocumentId(0);
        let a = CellId(9004);

        queue.add_query(Query::new(doc, a, CellKind::Code, "a"));
        wait_for(&rx, "evaluation_started");
        queue.stop_evaluation_by_cell(doc, a);
        assert_eq!(executor.interrupts.load(Ordering::SeqCst), 1);
        assert!(queue.active().is_none());

        executor.open();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_stop_by_document_drains_only_that_document() {
        let executor = Arc::new(GateExecutor::default());
        let (queue, rx) = queue(executor.clone());
        let (d0, d1) = (DocumentId(0), DocumentId(1));

        queue.add_query(Query::new(d0, CellId(9005), CellKind::Markdown, "x"));
        wait_for(&rx, "evaluation_started");
        queue.add_query(Query::new(d0, CellId(9006), CellKind::Markdown, "y"));
        queue.add_query(Query::new(d1, CellId(9007), CellKind::Markdown, "z"));

        let stopped = queue.stop_evaluation_by_document(d0);
        assert_eq!(stopped.len(), 2);
        assert_eq!(queue.pending_len(), 1);

        executor.open();
        let finished = wait_for(&rx, "evaluation_finished");
        assert_eq!(finished.document(), d1);
    }

    #[test]
    fn test_stopped_run_releases_its_image() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("result0.png");
        std::fs::write(&image, "png").unwrap();

        let executor = Arc::new(GateExecutor::default());
        let (queue, rx) = queue(executor.clone());
        let doc = DocumentId(0);
        let a = CellId(9008);

        let source = format!("image:{}", image.display());
        queue.add_query(Query::new(doc, a, CellKind::Code, source));
        wait_for(&rx, "evaluation_started");
        queue.stop_evaluation_by_cell(doc, a);
        executor.open();

        let deadline = Instant::now() + Duration::from_secs(5);
        while image.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!image.exists());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_forget_cell_drops_bookkeeping() {
        let executor = Arc::new(GateExecutor::default());
        let (queue, rx) = queue(executor.clone());
        let doc = DocumentId(0);
        let (a, b) = (CellId(9009), CellId(9010));

        queue.add_query(Query::new(doc, a, CellKind::Code, "a"));
        wait_for(&rx, "evaluation_started");
        queue.add_query(Query::new(doc, b, CellKind::Code, "b"));
        queue.stop_evaluation_by_cell(doc, b);
        assert_eq!(queue.generation(b), 1);

        queue.forget_cell(b);
        assert_eq!(queue.generation(b), 0);
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.shared.state.lock().generations.is_empty());

        executor.open();
        let finished = wait_for(&rx, "evaluation_finished");
        assert!(matches!(
            finished,
            Event::EvaluationFinished { ticket, .. } if ticket.cell == a
        ));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(executor.executed.load(Ordering::SeqCst), 1);
    }
}

//! The consumer: owns the model, applies events, notifies subscribers.
//!
//! A [`Scheduler`] lives on one thread (the UI or CLI thread). Requests such
//! as [`Scheduler::evaluate`] mutate the model directly and hand queries to
//! the evaluation queues. Worker threads report back through the event
//! channel, which [`Scheduler::poll`] drains at a fixed cadence.
//!
//! ```text
//!            evaluate()                          poll()
//! caller ─────────────► Scheduler ◄──── events ──── worker loops
//!                          │                            │
//!                    subscribers               EngineProcessPool
//! ```

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::config::SchedulerConfig;
use crate::engine::{EngineFactory, EngineProcessPool, ProcessEngineFactory};
use crate::error::{Error, Result};
use crate::events::{Event, EventSender, Notification, Outbox, QueryTicket};
use crate::markdown::{BasicMarkupRenderer, MarkupRenderer};
use crate::model::{
    CellId, CellKind, CellResult, CellStatus, Document, DocumentId, KernelState, Notebook,
};
use crate::paths::NotebookDirs;
use crate::queue::{EngineExecutor, EvaluationQueue, MarkdownExecutor, Query};

/// Handler invoked for every notification, in order.
pub type Subscriber = Box<dyn FnMut(&Notification)>;

/// Evaluation scheduler for one notebook.
pub struct Scheduler {
    config: SchedulerConfig,
    notebook: Notebook,
    pool: Arc<EngineProcessPool>,
    /// Code queues, created on first use per document.
    queues: FxHashMap<DocumentId, EvaluationQueue>,
    /// Shared queue for markdown cells of all documents.
    markdown: EvaluationQueue,
    events: EventSender,
    receiver: Receiver<Event>,
    outbox: Outbox,
    subscribers: Vec<Subscriber>,
}

impl Scheduler {
    /// Create a scheduler running engine subprocesses as configured.
    pub fn new(config: SchedulerConfig, dirs: NotebookDirs) -> Result<Self> {
        let factory = ProcessEngineFactory::new(config.engine.clone(), dirs.scratch_dir.clone());
        Self::with_parts(config, dirs, Arc::new(factory), Box::new(BasicMarkupRenderer))
    }

    /// Create a scheduler with a custom engine factory and markup renderer.
    pub fn with_parts(
        config: SchedulerConfig,
        dirs: NotebookDirs,
        factory: Arc<dyn EngineFactory>,
        renderer: Box<dyn MarkupRenderer>,
    ) -> Result<Self> {
        let (events, receiver) = EventSender::channel();
        let markdown = EvaluationQueue::spawn(
            "markdown",
            Arc::new(MarkdownExecutor::new(renderer)),
            events.clone(),
            config.worker_poll_interval(),
        )?;

        Ok(Self {
            config,
            notebook: Notebook::new(dirs),
            pool: Arc::new(EngineProcessPool::new(factory)),
            queues: FxHashMap::default(),
            markdown,
            events,
            receiver,
            outbox: Outbox::new(),
            subscribers: Vec::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn pool(&self) -> &EngineProcessPool {
        &self.pool
    }

    pub fn document(&self, id: DocumentId) -> Result<&Document> {
        self.notebook.document(id).ok_or(Error::DocumentNotFound(id))
    }

    fn cell_kind(&self, document: DocumentId, cell: CellId) -> Result<CellKind> {
        self.document(document)?
            .cell(cell)
            .map(|c| c.kind())
            .ok_or(Error::CellNotFound(cell))
    }

    /// Register a handler for all future notifications.
    pub fn subscribe(&mut self, subscriber: impl FnMut(&Notification) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// Hand pending notifications to the subscribers.
    fn flush(&mut self) {
        for notification in self.outbox.take() {
            tracing::trace!("notify {}", notification.code());
            for subscriber in &mut self.subscribers {
                subscriber(&notification);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    /// Register every document directory of the notebook root.
    pub fn populate_from_path(&mut self) -> Result<Vec<DocumentId>> {
        let result = self.notebook.populate_from_path(&mut self.outbox);
        self.flush();
        result
    }

    pub fn create_document(&mut self, name: &str) -> Result<DocumentId> {
        let result = self.notebook.create_document(name, &mut self.outbox);
        self.flush();
        result
    }

    /// Make `document` the active one and start its engine in the background.
    pub fn set_active_document(&mut self, document: DocumentId) -> Result<()> {
        self.notebook.set_active_document(document, &mut self.outbox)?;
        let doc = document_mut(&mut self.notebook, document)?;
        if doc.kernel_state() == KernelState::None {
            doc.set_kernel_state(KernelState::Starting, &mut self.outbox);
            self.spawn_kernel_start(document, false)?;
        }
        self.flush();
        Ok(())
    }

    /// Close a document: stop its work, release its engine, forget it.
    ///
    /// The directory on disk is left alone.
    pub fn delete_document(&mut self, document: DocumentId) -> Result<()> {
        self.document(document)?;
        self.stop_document_evaluation(document)?;

        if let Some(queue) = self.queues.remove(&document) {
            queue.shutdown();
        }
        for cell in self.document(document)?.cells() {
            if cell.kind() == CellKind::Markdown {
                self.markdown.forget_cell(cell.id());
            }
        }
        let pool = self.pool.clone();
        thread::Builder::new()
            .name(format!("quire-close-{}", document.as_usize()))
            .spawn(move || pool.destroy(document))?;

        self.notebook.remove_document(document, &mut self.outbox)?;
        self.flush();
        Ok(())
    }

    /// Mark a document as persisted.
    pub fn mark_saved(&mut self, document: DocumentId) -> Result<()> {
        document_mut(&mut self.notebook, document)?.mark_saved(&mut self.outbox);
        self.flush();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Cells
    // ---------------------------------------------------------------------

    pub fn create_cell(
        &mut self,
        document: DocumentId,
        position: usize,
        kind: CellKind,
        text: &str,
    ) -> Result<CellId> {
        let doc = document_mut(&mut self.notebook, document)?;
        let id = doc.create_cell(position, kind, text, &mut self.outbox);
        self.flush();
        Ok(id)
    }

    /// Append a cell at the end of the document.
    pub fn push_cell(&mut self, document: DocumentId, kind: CellKind, text: &str) -> Result<CellId> {
        let position = self.document(document)?.cell_count();
        self.create_cell(document, position, kind, text)
    }

    /// Remove a cell. In-flight work for it is cancelled first.
    pub fn remove_cell(&mut self, document: DocumentId, cell: CellId) -> Result<()> {
        let kind = self.cell_kind(document, cell)?;
        let stopped = self.stop_cell(document, cell, kind);
        self.apply(stopped);

        document_mut(&mut self.notebook, document)?.remove_cell(cell, &mut self.outbox)?;
        if let Some(queue) = self.queue(document, kind) {
            queue.forget_cell(cell);
        }
        self.flush();
        Ok(())
    }

    pub fn remove_all_cells(&mut self, document: DocumentId) -> Result<()> {
        let cells: Vec<CellId> = self.document(document)?.cells().iter().map(|c| c.id()).collect();
        for cell in cells {
            self.remove_cell(document, cell)?;
        }
        Ok(())
    }

    pub fn set_cell_text(&mut self, document: DocumentId, cell: CellId, text: &str) -> Result<()> {
        document_mut(&mut self.notebook, document)?
            .set_cell_text(cell, text, &mut self.outbox)?;
        self.flush();
        Ok(())
    }

    pub fn set_active_cell(&mut self, document: DocumentId, cell: CellId) -> Result<()> {
        document_mut(&mut self.notebook, document)?
            .set_active_cell(cell, &mut self.outbox)?;
        self.flush();
        Ok(())
    }

    /// Swap the cells at two positions.
    pub fn move_cell(&mut self, document: DocumentId, position: usize, new_position: usize) -> Result<()> {
        document_mut(&mut self.notebook, document)?
            .move_cell(position, new_position, &mut self.outbox)?;
        self.flush();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Evaluation
    // ---------------------------------------------------------------------

    /// The queue evaluating cells of `kind` in `document`.
    fn queue_for(&mut self, document: DocumentId, kind: CellKind) -> Result<&EvaluationQueue> {
        if kind == CellKind::Markdown {
            return Ok(&self.markdown);
        }
        if !self.queues.contains_key(&document) {
            let asset_dir = self.document(document)?.path().to_path_buf();
            let executor = EngineExecutor::new(
                document,
                self.pool.clone(),
                self.config.engine.clone(),
                asset_dir,
                self.events.clone(),
            );
            let queue = EvaluationQueue::spawn(
                document.to_string(),
                Arc::new(executor),
                self.events.clone(),
                self.config.worker_poll_interval(),
            )?;
            self.queues.insert(document, queue);
        }
        self.queues
            .get(&document)
            .ok_or(Error::DocumentNotFound(document))
    }

    /// Queue serving `kind` cells of `document`, if one exists yet.
    fn queue(&self, document: DocumentId, kind: CellKind) -> Option<&EvaluationQueue> {
        match kind {
            CellKind::Markdown => Some(&self.markdown),
            CellKind::Code => self.queues.get(&document),
        }
    }

    /// Stop `cell` on its queue. A code cell of a document that never
    /// evaluated anything has no queue, and nothing to stop.
    fn stop_cell(&self, document: DocumentId, cell: CellId, kind: CellKind) -> Event {
        match self.queue(document, kind) {
            Some(queue) => queue.stop_evaluation_by_cell(document, cell),
            None => Event::CellEvaluationStopped { document, cell },
        }
    }

    /// Evaluate a cell.
    ///
    /// The previous result is removed and any earlier evaluation of the cell
    /// is cancelled before the new query is queued.
    pub fn evaluate(&mut self, document: DocumentId, cell: CellId) -> Result<QueryTicket> {
        let kind = self.cell_kind(document, cell)?;
        let doc = document_mut(&mut self.notebook, document)?;
        doc.set_cell_result(cell, None, true, &mut self.outbox)?;
        doc.set_cell_status(cell, CellStatus::EvaluationToStop, &mut self.outbox)?;

        let stopped = self.queue_for(document, kind)?.stop_evaluation_by_cell(document, cell);
        self.apply(stopped);

        let doc = document_mut(&mut self.notebook, document)?;
        doc.set_cell_status(cell, CellStatus::ReadyForEvaluation, &mut self.outbox)?;
        let source = doc
            .cell(cell)
            .map(|c| c.text().to_string())
            .ok_or(Error::CellNotFound(cell))?;

        let query = Query::new(document, cell, kind, source);
        let ticket = self.queue_for(document, kind)?.add_query(query);
        if let Some(c) = document_mut(&mut self.notebook, document)?.cell_mut(cell) {
            c.set_awaiting(Some(ticket.id));
        }
        self.flush();
        Ok(ticket)
    }

    /// Cancel the evaluation of one cell.
    ///
    /// A queued query is dropped, a running one interrupted. The cell is
    /// back at rest when this returns.
    pub fn stop_evaluation(&mut self, document: DocumentId, cell: CellId) -> Result<()> {
        let kind = self.cell_kind(document, cell)?;
        document_mut(&mut self.notebook, document)?
            .set_cell_status(cell, CellStatus::EvaluationToStop, &mut self.outbox)?;
        let stopped = self.stop_cell(document, cell, kind);
        self.apply(stopped);
        self.flush();
        Ok(())
    }

    /// Cancel every queued and running evaluation of a document.
    pub fn stop_document_evaluation(&mut self, document: DocumentId) -> Result<()> {
        self.document(document)?;
        let mut stopped = self.markdown.stop_evaluation_by_document(document);
        if let Some(queue) = self.queues.get(&document) {
            stopped.extend(queue.stop_evaluation_by_document(document));
        }
        for event in stopped {
            self.apply(event);
        }
        self.flush();
        Ok(())
    }

    /// Replace the engine of a document once its busy cells have settled.
    pub fn restart_kernel(&mut self, document: DocumentId) -> Result<()> {
        self.document(document)?;
        self.apply(Event::KernelToRestart { document });
        self.start_pending_restarts();
        self.flush();
        Ok(())
    }

    /// Current cancellation generation of a cell.
    pub fn cancel_generation(&self, document: DocumentId, cell: CellId) -> Result<u64> {
        let kind = self.cell_kind(document, cell)?;
        Ok(self
            .queue(document, kind)
            .map_or(0, |queue| queue.generation(cell)))
    }

    fn spawn_kernel_start(&self, document: DocumentId, restart: bool) -> Result<()> {
        let pool = self.pool.clone();
        let events = self.events.clone();
        thread::Builder::new()
            .name(format!("quire-kernel-{}", document.as_usize()))
            .spawn(move || {
                if restart {
                    pool.destroy(document);
                }
                let slot = pool.get_or_create(document);
                let started = slot.engine().lock().start();
                match started {
                    Ok(()) => events.send(Event::KernelStarted { document }),
                    Err(e) => {
                        tracing::warn!("Failed to start engine of {}: {}", document, e);
                        events.send(Event::KernelStartFailed {
                            document,
                            message: e.to_string(),
                        });
                    }
                }
            })?;
        Ok(())
    }

    /// Launch the restarts whose documents have no busy cells left.
    fn start_pending_restarts(&mut self) {
        let ready: Vec<DocumentId> = self
            .notebook
            .documents()
            .filter(|d| d.restart_pending() && d.busy_cell_count() == 0)
            .map(|d| d.id())
            .collect();

        for document in ready {
            if let Some(doc) = self.notebook.document_mut(document) {
                doc.set_restart_pending(false);
            }
            tracing::info!("Restarting engine of {}", document);
            if let Err(e) = self.spawn_kernel_start(document, true) {
                tracing::warn!("Failed to restart engine of {}: {}", document, e);
                if let Some(doc) = self.notebook.document_mut(document) {
                    doc.set_kernel_state(KernelState::None, &mut self.outbox);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Consumer loop
    // ---------------------------------------------------------------------

    /// Apply every event that has arrived. Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.receiver.try_recv() {
            self.apply(event);
            applied += 1;
        }
        self.start_pending_restarts();
        self.flush();
        applied
    }

    /// Like [`Scheduler::poll`], but block up to `timeout` for the first event.
    pub fn poll_timeout(&mut self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => {
                self.apply(event);
                1 + self.poll()
            }
            Err(RecvTimeoutError::Timeout) => self.poll(),
            Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Poll at the configured cadence until `done` holds or `timeout` passes.
    ///
    /// Returns whether `done` was reached.
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = self.config.poll_interval().min(deadline - now);
            self.poll_timeout(wait);
        }
    }

    /// Poll until no cell of `document` is busy.
    pub fn wait_idle(&mut self, document: DocumentId, timeout: Duration) -> bool {
        self.run_until(timeout, |scheduler| {
            scheduler
                .notebook
                .document(document)
                .is_none_or(|d| d.busy_cell_count() == 0)
        })
    }

    /// Apply one event to the model.
    fn apply(&mut self, event: Event) {
        let document = event.document();
        tracing::trace!("apply {} to {}", event.code(), document);

        if let Event::KernelToRestart { .. } = event {
            self.request_restart(document);
            return;
        }

        let outbox = &mut self.outbox;
        let Some(doc) = self.notebook.document_mut(document) else {
            tracing::debug!("Ignoring {} for closed {}", event.code(), document);
            if let Event::EvaluationFinished {
                result: Some(result),
                ..
            } = &event
            {
                result.release();
            }
            return;
        };

        let outcome = match event {
            Event::QueryQueued { ticket } => {
                let ready = doc
                    .cell(ticket.cell)
                    .is_some_and(|c| c.status() == CellStatus::ReadyForEvaluation);
                if awaits(doc, &ticket) && ready {
                    doc.set_cell_status(ticket.cell, CellStatus::QueuedForEvaluation, outbox)
                } else {
                    Ok(())
                }
            }
            Event::EvaluationStarted { ticket } => {
                if awaits(doc, &ticket) {
                    doc.set_cell_status(ticket.cell, CellStatus::EvaluationInProgress, outbox)
                } else {
                    Ok(())
                }
            }
            Event::EvaluationFinished { ticket, result } => {
                if awaits(doc, &ticket) {
                    finish(doc, &ticket, result, outbox)
                } else {
                    tracing::debug!("Dropping result of cancelled {}", ticket.id);
                    if let Some(result) = result {
                        result.release();
                    }
                    Ok(())
                }
            }
            Event::CellEvaluationStopped { cell, .. } => match doc.cell_mut(cell) {
                Some(c) => {
                    c.set_awaiting(None);
                    let status = c.kind().stopped_status();
                    doc.set_cell_status(cell, status, outbox)
                }
                None => Ok(()),
            },
            Event::KernelStarted { .. } => {
                doc.set_kernel_state(KernelState::Running, outbox);
                Ok(())
            }
            Event::KernelStartFailed { message, .. } => {
                tracing::warn!("Engine of {} is not available: {}", document, message);
                doc.set_kernel_state(KernelState::None, outbox);
                Ok(())
            }
            Event::KernelToRestart { .. } => Ok(()),
        };

        if let Err(e) = outcome {
            tracing::debug!("Event for {} no longer applies: {}", document, e);
        }
    }

    /// Stop all work of a document and schedule an engine restart.
    fn request_restart(&mut self, document: DocumentId) {
        if self.notebook.document(document).is_none() {
            return;
        }
        if let Err(e) = self.stop_document_evaluation(document) {
            tracing::debug!("Failed to stop {} before restart: {}", document, e);
        }
        if let Some(doc) = self.notebook.document_mut(document) {
            doc.set_kernel_state(KernelState::Starting, &mut self.outbox);
            doc.set_restart_pending(true);
        }
    }

    /// Stop every worker and tear down every engine.
    pub fn shutdown(&mut self) {
        self.markdown.shutdown();
        for queue in self.queues.values() {
            queue.shutdown();
        }
        self.queues.clear();
        self.pool.shutdown();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn document_mut(notebook: &mut Notebook, id: DocumentId) -> Result<&mut Document> {
    notebook.document_mut(id).ok_or(Error::DocumentNotFound(id))
}

/// Whether the cell of `ticket` still waits for that query.
fn awaits(doc: &Document, ticket: &QueryTicket) -> bool {
    doc.cell(ticket.cell).is_some_and(|c| c.accepts(ticket.id))
}

/// Return a cell to rest and attach its result.
fn finish(
    doc: &mut Document,
    ticket: &QueryTicket,
    result: Option<CellResult>,
    outbox: &mut Outbox,
) -> Result<()> {
    if let Some(cell) = doc.cell_mut(ticket.cell) {
        cell.set_awaiting(None);
    }
    match ticket.kind {
        CellKind::Code => {
            doc.set_cell_status(ticket.cell, CellStatus::Idle, outbox)?;
            if result.is_some() {
                doc.set_cell_result(ticket.cell, result, true, outbox)?;
            }
        }
        CellKind::Markdown => {
            doc.set_cell_status(ticket.cell, CellStatus::Edit, outbox)?;
            if result.is_some() {
                doc.set_cell_result(ticket.cell, result, true, outbox)?;
                doc.set_cell_status(ticket.cell, CellStatus::Display, outbox)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::{Change, Source};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn scheduler(temp: &TempDir) -> (Scheduler, Rc<RefCell<Vec<Notification>>>) {
        let config = SchedulerConfig {
            poll_interval_ms: 5,
            worker_poll_interval_ms: 5,
            engine: EngineConfig::shell(),
        };
        let dirs = NotebookDirs::new(temp.path()).unwrap();
        let mut scheduler = Scheduler::new(config, dirs).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        scheduler.subscribe(move |n| sink.borrow_mut().push(n.clone()));
        (scheduler, seen)
    }

    fn statuses(seen: &[Notification], cell: CellId) -> Vec<CellStatus> {
        seen.iter()
            .filter_map(|n| match (&n.source, &n.change) {
                (Source::Cell { cell: c, .. }, Change::CellStateChange { status }) if *c == cell => {
                    Some(*status)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_markdown_evaluation_sequence() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        let cell = scheduler.push_cell(doc, CellKind::Markdown, "# Hello").unwrap();
        seen.borrow_mut().clear();

        scheduler.evaluate(doc, cell).unwrap();
        assert!(scheduler.wait_idle(doc, Duration::from_secs(5)));

        let cell_ref = scheduler.document(doc).unwrap().cell(cell).unwrap();
        assert_eq!(cell_ref.status(), CellStatus::Display);
        assert_eq!(
            cell_ref.result(),
            Some(&CellResult::Markup("<h1>Hello</h1>".into()))
        );
        assert_eq!(
            statuses(&seen.borrow(), cell),
            vec![
                CellStatus::EvaluationToStop,
                CellStatus::Edit,
                CellStatus::ReadyForEvaluation,
                CellStatus::QueuedForEvaluation,
                CellStatus::EvaluationInProgress,
                CellStatus::Edit,
                CellStatus::Display,
            ]
        );
    }

    #[test]
    fn test_stop_idle_cell_bumps_generation() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, _seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        let cell = scheduler.push_cell(doc, CellKind::Markdown, "text").unwrap();

        assert_eq!(scheduler.cancel_generation(doc, cell).unwrap(), 0);
        scheduler.stop_evaluation(doc, cell).unwrap();
        scheduler.stop_evaluation(doc, cell).unwrap();
        assert_eq!(scheduler.cancel_generation(doc, cell).unwrap(), 2);

        let cell_ref = scheduler.document(doc).unwrap().cell(cell).unwrap();
        assert_eq!(cell_ref.status(), CellStatus::Edit);
        assert_eq!(scheduler.document(doc).unwrap().busy_cell_count(), 0);
    }

    #[test]
    fn test_unknown_ids_are_errors() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, _seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        let other = scheduler.create_document("other").unwrap();
        let cell = scheduler.push_cell(other, CellKind::Code, "").unwrap();

        assert!(matches!(
            scheduler.evaluate(doc, cell),
            Err(Error::CellNotFound(_))
        ));
        scheduler.delete_document(other).unwrap();
        assert!(matches!(
            scheduler.stop_evaluation(other, cell),
            Err(Error::DocumentNotFound(_))
        ));
    }

    #[test]
    fn test_stale_event_is_ignored() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        let cell = scheduler.push_cell(doc, CellKind::Code, "echo hi").unwrap();
        seen.borrow_mut().clear();

        let ticket = QueryTicket {
            id: crate::queue::QueryId(u64::MAX),
            document: doc,
            cell,
            kind: CellKind::Code,
        };
        scheduler.apply(Event::EvaluationFinished {
            ticket,
            result: CellResult::text("late"),
        });
        scheduler.flush();

        assert!(seen.borrow().is_empty());
        assert_eq!(scheduler.document(doc).unwrap().cell(cell).unwrap().result(), None);
    }

    #[test]
    fn test_remove_idle_cell_reports_once() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        let cell = scheduler.push_cell(doc, CellKind::Markdown, "text").unwrap();
        seen.borrow_mut().clear();

        scheduler.remove_cell(doc, cell).unwrap();
        scheduler.poll_timeout(Duration::from_millis(20));

        let seen = seen.borrow();
        assert_eq!(seen.iter().filter(|n| n.code() == "deleted_cell").count(), 1);
        assert_eq!(seen.iter().filter(|n| n.code() == "cell_state_change").count(), 0);
    }

    #[test]
    fn test_remove_all_cells() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, _seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        for text in ["a", "b", "c"] {
            scheduler.push_cell(doc, CellKind::Markdown, text).unwrap();
        }

        scheduler.remove_all_cells(doc).unwrap();
        let document = scheduler.document(doc).unwrap();
        assert_eq!(document.cell_count(), 0);
        assert_eq!(document.active_cell(), None);
    }

    #[test]
    fn test_stop_code_cell_without_queue() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, _seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        let cell = scheduler.push_cell(doc, CellKind::Code, "echo hi").unwrap();

        scheduler.stop_evaluation(doc, cell).unwrap();
        assert!(scheduler.queues.is_empty());
        assert_eq!(
            scheduler.document(doc).unwrap().cell(cell).unwrap().status(),
            CellStatus::Idle
        );
        assert_eq!(scheduler.cancel_generation(doc, cell).unwrap(), 0);

        scheduler.remove_cell(doc, cell).unwrap();
        assert!(scheduler.queues.is_empty());
        assert_eq!(scheduler.document(doc).unwrap().cell_count(), 0);
    }

    #[test]
    fn test_removed_cell_leaves_no_generation() {
        let temp = TempDir::new().unwrap();
        let (mut scheduler, _seen) = scheduler(&temp);
        let doc = scheduler.create_document("notes").unwrap();
        let cell = scheduler.push_cell(doc, CellKind::Markdown, "text").unwrap();

        scheduler.stop_evaluation(doc, cell).unwrap();
        assert_eq!(scheduler.markdown.generation(cell), 1);

        scheduler.remove_cell(doc, cell).unwrap();
        assert_eq!(scheduler.markdown.generation(cell), 0);
    }

    #[test]
    fn test_kernel_start_failure_resets_state() {
        let temp = TempDir::new().unwrap();
        let config = SchedulerConfig {
            poll_interval_ms: 5,
            worker_poll_interval_ms: 5,
            engine: EngineConfig {
                program: "quire-no-such-engine".to_string(),
                ..EngineConfig::shell()
            },
        };
        let dirs = NotebookDirs::new(temp.path()).unwrap();
        let mut scheduler = Scheduler::new(config, dirs).unwrap();
        let doc = scheduler.create_document("notes").unwrap();

        scheduler.set_active_document(doc).unwrap();
        assert_eq!(
            scheduler.document(doc).unwrap().kernel_state(),
            KernelState::Starting
        );
        assert!(scheduler.run_until(Duration::from_secs(5), |s| {
            s.document(doc).unwrap().kernel_state() == KernelState::None
        }));
    }
}

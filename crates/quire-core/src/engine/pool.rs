//! Registry of engines keyed by document.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::model::DocumentId;

use super::{Engine, EngineFactory, EngineState, InterruptHandle};

/// How long `destroy` waits for an interrupted query before killing the engine.
const DESTROY_GRACE: Duration = Duration::from_secs(2);

/// Shared handle to one document's engine.
///
/// The interrupt handle is cloned out of the engine at creation so a stop
/// request never has to take the engine lock, which a worker holds while a
/// query runs.
#[derive(Clone)]
pub struct EngineSlot {
    engine: Arc<Mutex<Box<dyn Engine>>>,
    interrupt: InterruptHandle,
}

impl EngineSlot {
    fn new(engine: Box<dyn Engine>) -> Self {
        let interrupt = engine.interrupt_handle();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            interrupt,
        }
    }

    /// The engine, locked for the duration of a query.
    pub fn engine(&self) -> &Mutex<Box<dyn Engine>> {
        &self.engine
    }

    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }

    /// Interrupt the running query, if any.
    pub fn interrupt(&self) -> bool {
        self.interrupt.interrupt()
    }

    fn is_terminated(&self) -> bool {
        // A held lock means a query is running, so the engine is alive.
        self.engine
            .try_lock()
            .is_some_and(|engine| engine.state() == EngineState::Terminated)
    }

    fn shutdown(&self) {
        self.interrupt.interrupt();
        let mut engine = match self.engine.try_lock_for(DESTROY_GRACE) {
            Some(engine) => engine,
            None => {
                tracing::warn!("Engine did not stop after interrupt, killing it");
                self.interrupt.kill();
                self.engine.lock()
            }
        };
        engine.teardown();
    }
}

/// Owning registry of engines, one per document.
///
/// Entries are created on first use and released when their document is
/// closed or its kernel restarted.
pub struct EngineProcessPool {
    factory: Arc<dyn EngineFactory>,
    entries: Mutex<FxHashMap<DocumentId, EngineSlot>>,
}

impl EngineProcessPool {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// The engine of `document`, creating (but not starting) it if needed.
    ///
    /// A terminated engine is replaced by a fresh one.
    pub fn get_or_create(&self, document: DocumentId) -> EngineSlot {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get(&document) {
            if !slot.is_terminated() {
                return slot.clone();
            }
            tracing::info!("Replacing terminated engine of {}", document);
        }
        let slot = EngineSlot::new(self.factory.create(document));
        entries.insert(document, slot.clone());
        slot
    }

    pub fn get(&self, document: DocumentId) -> Option<EngineSlot> {
        self.entries.lock().get(&document).cloned()
    }

    pub fn contains(&self, document: DocumentId) -> bool {
        self.entries.lock().contains_key(&document)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Interrupt the running query of `document`. A no-op when absent or idle.
    pub fn interrupt(&self, document: DocumentId) -> bool {
        self.get(document).is_some_and(|slot| slot.interrupt())
    }

    /// Interrupt and tear down the engine of `document`. A no-op when absent.
    ///
    /// Blocks until a running query has returned.
    pub fn destroy(&self, document: DocumentId) {
        let slot = self.entries.lock().remove(&document);
        if let Some(slot) = slot {
            tracing::info!("Destroying engine of {}", document);
            slot.shutdown();
        }
    }

    /// Tear down every engine.
    pub fn shutdown(&self) {
        let slots: Vec<EngineSlot> = self.entries.lock().drain().map(|(_, s)| s).collect();
        for slot in slots {
            slot.shutdown();
        }
    }
}

impl Drop for EngineProcessPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

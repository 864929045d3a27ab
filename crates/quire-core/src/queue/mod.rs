//! Evaluation queues and their worker loops.
//!
//! A query flows through here:
//!
//! ```text
//! add_query ──► pending FIFO ──► worker loop ──► QueryExecutor::execute
//!     │                              │                    │
//!     └─ query_queued   evaluation_started   evaluation_finished
//! ```

mod evaluation_queue;
mod executor;
mod interpret;
mod query;
mod worker;

pub use evaluation_queue::EvaluationQueue;
pub use executor::{EngineExecutor, MarkdownExecutor, QueryExecutor};
pub use interpret::interpret;
pub use query::{Query, QueryId};

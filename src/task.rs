use alloy::json_abi::Event;
use alloy_primitives::Address;
use std::fmt;
use std::sync::Arc;

/// Identifies the scan stream a task belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub contract: Address,
    pub event: String,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.contract, self.event)
    }
}

/// One bounded scan of a (contract, event) pair starting at `from_block`.
///
/// Tasks are never mutated: continuations and retries are new values built
/// with [`Task::advance`] and [`Task::retry`].
#[derive(Debug, Clone)]
pub struct Task {
    pub collector: String,
    pub contract: Address,
    pub event_abi: Option<Arc<Event>>,
    pub event_name: String,
    pub from_block: u64,
    pub attempts: u32,
}

impl Task {
    pub fn new(collector: impl Into<String>, contract: Address, event: Event, from_block: u64) -> Self {
        Task {
            collector: collector.into(),
            contract,
            event_name: event.name.clone(),
            event_abi: Some(Arc::new(event)),
            from_block,
            attempts: 0,
        }
    }

    /// A task without an ABI fragment, for collectors with compiled decoders.
    pub fn named(
        collector: impl Into<String>,
        contract: Address,
        event_name: impl Into<String>,
        from_block: u64,
    ) -> Self {
        Task {
            collector: collector.into(),
            contract,
            event_abi: None,
            event_name: event_name.into(),
            from_block,
            attempts: 0,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            contract: self.contract,
            event: self.event_name.clone(),
        }
    }

    /// Continuation after a successful scan. Never moves backwards.
    pub fn advance(&self, from_block: u64) -> Self {
        Task {
            from_block: from_block.max(self.from_block),
            attempts: 0,
            ..self.clone()
        }
    }

    /// Same range again, one attempt later.
    pub fn retry(&self) -> Self {
        Task {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }
}

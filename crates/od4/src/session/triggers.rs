// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-type data trigger table.
//!
//! Registrations are rare and dispatch is per envelope, so the table is
//! copy-on-write: writers clone, modify and swap it through `ArcSwap`, and the
//! receiver thread reads whichever table is current without locking.

use crate::envelope::Envelope;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles envelopes of one data type (or all of them, for a delegate).
pub trait DataHandler: Send + Sync + 'static {
    fn on_envelope(&self, envelope: &Envelope);
}

impl<F> DataHandler for F
where
    F: Fn(&Envelope) + Send + Sync + 'static,
{
    fn on_envelope(&self, envelope: &Envelope) {
        self(envelope);
    }
}

type HandlerList = Vec<Arc<dyn DataHandler>>;

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Dispatch {
    /// Handlers that returned normally
    pub delivered: usize,
    /// Handlers that panicked
    pub panicked: usize,
}

impl Dispatch {
    pub(crate) fn is_orphan(&self) -> bool {
        self.delivered == 0 && self.panicked == 0
    }
}

/// Run one handler behind a panic boundary.
pub(crate) fn invoke(handler: &dyn DataHandler, envelope: &Envelope, outcome: &mut Dispatch) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        handler.on_envelope(envelope);
    }));
    match result {
        Ok(()) => outcome.delivered += 1,
        Err(_) => {
            outcome.panicked += 1;
            log::warn!(
                "[OD4] handler for data type {} panicked (sender stamp {})",
                envelope.data_type,
                envelope.sender_stamp
            );
        }
    }
}

pub(crate) struct TriggerTable {
    table: ArcSwap<HashMap<u32, HandlerList>>,
}

impl TriggerTable {
    pub(crate) fn new() -> Self {
        Self {
            table: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Append `handler` to the list for `data_type`.
    pub(crate) fn add(&self, data_type: u32, handler: Arc<dyn DataHandler>) {
        self.table.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(data_type)
                .or_default()
                .push(Arc::clone(&handler));
            next
        });
    }

    /// Drop every handler for `data_type`; returns how many were removed.
    pub(crate) fn remove(&self, data_type: u32) -> usize {
        let previous = self.table.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(&data_type);
            next
        });
        previous.get(&data_type).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self, data_type: u32) -> usize {
        self.table.load().get(&data_type).map_or(0, Vec::len)
    }

    pub(crate) fn data_types(&self) -> Vec<u32> {
        let mut types: Vec<u32> = self.table.load().keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Run the handlers registered for `envelope.data_type`, in order.
    pub(crate) fn dispatch(&self, envelope: &Envelope) -> Dispatch {
        let table = self.table.load();
        let mut outcome = Dispatch::default();
        if let Some(handlers) = table.get(&envelope.data_type) {
            for handler in handlers {
                invoke(handler.as_ref(), envelope, &mut outcome);
            }
        }
        outcome
    }
}

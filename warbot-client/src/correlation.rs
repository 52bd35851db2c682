//! Reply correlation.
//!
//! Replies are matched first against one-shot callbacks keyed by the
//! request's sequence number, then against standing handlers keyed by
//! request id. A one-shot entry is removed when it matches; standing
//! handlers stay registered for the lifetime of the table.

use std::collections::HashMap;
use std::rc::Rc;
use warbot_protocol::{Document, RequestId};

/// One-shot completion for a single request.
///
/// `C` is the owner of the connection; callbacks receive it mutably so they
/// can issue follow-up requests or schedule work.
pub type Callback<C> = Box<dyn FnOnce(&mut C, &Document)>;

/// Standing handler for a request id.
pub type Handler<C> = Rc<dyn Fn(&mut C, &Document)>;

/// Outcome of routing one reply.
pub enum Route<C> {
    /// A one-shot callback matched the sequence and has been removed.
    Pending(Callback<C>),
    /// A standing handler matched the request id.
    Standing(Handler<C>),
    /// Nothing is waiting for this reply.
    Unmatched,
}

impl<C> Route<C> {
    /// Invokes the matched callback or handler, if any.
    pub fn invoke(self, owner: &mut C, data: &Document) {
        match self {
            Route::Pending(callback) => callback(owner, data),
            Route::Standing(handler) => handler(owner, data),
            Route::Unmatched => {}
        }
    }

    pub fn is_unmatched(&self) -> bool {
        matches!(self, Route::Unmatched)
    }
}

impl<C> std::fmt::Debug for Route<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Route::Pending(_) => "Pending",
            Route::Standing(_) => "Standing",
            Route::Unmatched => "Unmatched",
        };
        f.write_str(name)
    }
}

/// Pending callbacks and standing handlers of one connection.
pub struct CorrelationTable<C> {
    by_sequence: HashMap<i32, Callback<C>>,
    by_request_id: HashMap<i32, Handler<C>>,
}

impl<C> CorrelationTable<C> {
    pub fn new() -> Self {
        Self {
            by_sequence: HashMap::new(),
            by_request_id: HashMap::new(),
        }
    }

    /// Stores a one-shot callback for the request sent with `sequence`.
    pub fn insert_pending(&mut self, sequence: i32, callback: Callback<C>) {
        if self.by_sequence.insert(sequence, callback).is_some() {
            tracing::warn!("Replaced pending callback for sequence {}", sequence);
        }
    }

    /// Registers (or replaces) the standing handler for `request_id`.
    pub fn register(&mut self, request_id: RequestId, handler: Handler<C>) {
        self.by_request_id.insert(request_id.value(), handler);
    }

    /// Routes a reply, removing the one-shot entry if it matches.
    pub fn route(&mut self, sequence: i32, request_id: i32) -> Route<C> {
        if let Some(callback) = self.by_sequence.remove(&sequence) {
            return Route::Pending(callback);
        }
        match self.by_request_id.get(&request_id) {
            Some(handler) => Route::Standing(Rc::clone(handler)),
            None => Route::Unmatched,
        }
    }

    /// Drops the one-shot entry for `sequence` without invoking it.
    ///
    /// Used for replies carrying an error status.
    pub fn discard(&mut self, sequence: i32) -> bool {
        self.by_sequence.remove(&sequence).is_some()
    }

    /// Drops every one-shot entry. Standing handlers are kept.
    pub fn clear_pending(&mut self) {
        self.by_sequence.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn handler_count(&self) -> usize {
        self.by_request_id.len()
    }
}

impl<C> Default for CorrelationTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

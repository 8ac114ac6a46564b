//! Change notification for form observers.
//!
//! # Architecture
//!
//! The bus keeps subscribers as `Weak` callbacks; the strong reference lives
//! in the [`Subscription`] guard handed back to the caller, so dropping the
//! guard detaches the observer. Dead entries are pruned lazily on the next
//! notification.
//!
//! # Invariants
//!
//! 1. A path event reaches subscribers whose selector names the same path,
//!    an ancestor or a descendant of it, plus every whole-form subscriber.
//! 2. `Reset` reaches every subscriber; `Submission` and `Status` reach
//!    whole-form subscribers only.
//! 3. Subscribers are notified in registration order, synchronously.
//! 4. A callback that re-enters the bus is not invoked recursively for the
//!    nested event.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::trace;

use crate::error_tree::FieldError;
use crate::form::SessionStatus;
use crate::path::FieldPath;
use crate::submit::SubmissionState;

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every change in the form
    All,
    Path(FieldPath),
    Paths(Vec<FieldPath>),
}

impl Selector {
    pub fn path(path: impl Into<FieldPath>) -> Self {
        Selector::Path(path.into())
    }

    pub fn paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        Selector::Paths(paths.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event: &FormEvent) -> bool {
        match (self, event) {
            (Selector::All, _) => true,
            (_, FormEvent::Reset { .. }) => true,
            (_, FormEvent::Submission(_) | FormEvent::Status(_)) => false,
            (selector, event) => match event.path() {
                Some(path) => selector.selects(path),
                None => false,
            },
        }
    }

    fn selects(&self, path: &FieldPath) -> bool {
        match self {
            Selector::All => true,
            Selector::Path(selected) => selected.is_related(path),
            Selector::Paths(selected) => selected.iter().any(|s| s.is_related(path)),
        }
    }
}

impl From<&str> for Selector {
    fn from(path: &str) -> Self {
        Selector::path(path)
    }
}

impl From<FieldPath> for Selector {
    fn from(path: FieldPath) -> Self {
        Selector::Path(path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormEvent {
    Value { path: FieldPath, value: Value },
    /// `error` is `None` when the field became valid
    Error {
        path: FieldPath,
        error: Option<FieldError>,
    },
    Touched { path: FieldPath, touched: bool },
    Dirty { path: FieldPath, dirty: bool },
    Disabled { path: FieldPath, disabled: bool },
    Reset { values: Value },
    Submission(SubmissionState),
    Status(SessionStatus),
}

impl FormEvent {
    pub fn path(&self) -> Option<&FieldPath> {
        match self {
            FormEvent::Value { path, .. }
            | FormEvent::Error { path, .. }
            | FormEvent::Touched { path, .. }
            | FormEvent::Dirty { path, .. }
            | FormEvent::Disabled { path, .. } => Some(path),
            FormEvent::Reset { .. } | FormEvent::Submission(_) | FormEvent::Status(_) => None,
        }
    }
}

type Callback = RefCell<dyn FnMut(&FormEvent)>;

struct Entry {
    id: u64,
    selector: Selector,
    callback: Weak<Callback>,
}

/// RAII guard for a bus subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    _callback: Rc<Callback>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Detach explicitly. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Default)]
pub struct SubscriptionBus {
    entries: RefCell<Vec<Entry>>,
    next_id: Cell<u64>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, selector: Selector, callback: F) -> Subscription
    where
        F: FnMut(&FormEvent) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let callback: Rc<Callback> = Rc::new(RefCell::new(callback));
        trace!(id, ?selector, "subscriber added");
        self.entries.borrow_mut().push(Entry {
            id,
            selector,
            callback: Rc::downgrade(&callback),
        });
        Subscription {
            id,
            _callback: callback,
        }
    }

    /// Live subscribers.
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.callback.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to matching subscribers. Returns how many were invoked.
    pub fn publish(&self, event: &FormEvent) -> usize {
        // Collect first so callbacks may subscribe or drop guards meanwhile
        let targets: Vec<Rc<Callback>> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|e| e.callback.strong_count() > 0);
            entries
                .iter()
                .filter(|e| e.selector.matches(event))
                .filter_map(|e| e.callback.upgrade())
                .collect()
        };

        let mut delivered = 0;
        for callback in targets {
            match callback.try_borrow_mut() {
                Ok(mut f) => {
                    (&mut *f)(event);
                    delivered += 1;
                }
                Err(_) => trace!("skipping re-entrant subscriber"),
            }
        }
        delivered
    }

    pub fn publish_all(&self, events: &[FormEvent]) {
        for event in events {
            self.publish(event);
        }
    }
}

impl std::fmt::Debug for SubscriptionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u64> = self.entries.borrow().iter().map(|e| e.id).collect();
        f.debug_struct("SubscriptionBus")
            .field("subscribers", &ids)
            .finish()
    }
}

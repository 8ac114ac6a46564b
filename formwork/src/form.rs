//! The form session.
//!
//! A [`Form`] is a cheap, cloneable handle to one session. All clones share
//! the same state; the engine is single-threaded and the handle is `!Send`.
//! Every operation borrows the state, does its work, releases the borrow and
//! only then notifies subscribers, so callbacks may call back into the form.
//! Asynchronous work (defaults resolution, async rules, submit handlers) runs
//! with no borrow held.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::rc::Rc;

use formwork_common::Pretty;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::array::{ArrayItem, ArrayOp, FieldArray, FieldArrayManager};
use crate::bus::{FormEvent, Selector, Subscription, SubscriptionBus};
use crate::defaults::{resolve_defaults, DefaultsResolver};
use crate::error::{FormError, InitializationError, Result, SubmitError};
use crate::error_tree::{ErrorTree, FieldError};
use crate::options::{FormOptions, Trigger};
use crate::path::{FieldPath, PathSegment};
use crate::registry::{FieldRegistry, RegisterOptions, RegisterOutcome};
use crate::rules::ValidationRule;
use crate::submit::{SubmissionController, SubmissionState, SubmitOutcome};
use crate::validation::{AsyncJob, AsyncOutcome, ValidationEngine};

/// Lifecycle of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Defaults not resolved yet
    #[default]
    NotReady,
    Ready,
    /// Terminal
    Failed { message: String },
}

/// Flags for [`Form::set_value`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetValueOptions {
    pub should_validate: bool,
    /// Publish a `Dirty` event when the derived dirty state flips
    pub should_dirty: bool,
    pub should_touch: bool,
}

impl SetValueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self) -> Self {
        self.should_validate = true;
        self
    }

    pub fn dirty(mut self) -> Self {
        self.should_dirty = true;
        self
    }

    pub fn touch(mut self) -> Self {
        self.should_touch = true;
        self
    }
}

/// Derived state of one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldState {
    pub dirty: bool,
    pub touched: bool,
    pub disabled: bool,
    pub invalid: bool,
    pub validating: bool,
    pub error: Option<FieldError>,
}

/// Derived state of the whole form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormState {
    pub is_dirty: bool,
    pub is_valid: bool,
    pub is_validating: bool,
    pub dirty_fields: Vec<FieldPath>,
    pub touched_fields: Vec<FieldPath>,
    pub submission: SubmissionState,
    pub status: SessionStatus,
}

struct FormInner {
    options: FormOptions,
    engine: ValidationEngine,
    status: SessionStatus,
    resolving: bool,
    registry: FieldRegistry,
    errors: ErrorTree,
    arrays: FieldArrayManager,
    submission: SubmissionController,
    /// Current validation generation per field; results from other
    /// generations are stale
    epochs: BTreeMap<FieldPath, u64>,
    next_epoch: u64,
    validating: BTreeSet<FieldPath>,
    /// Async checks started by synchronous writes, driven by `settle`
    queued: Vec<AsyncJob>,
}

impl FormInner {
    fn new(options: FormOptions, status: SessionStatus, defaults: Value) -> Self {
        Self {
            engine: ValidationEngine::new(options.criteria_mode),
            options,
            status,
            resolving: false,
            registry: FieldRegistry::new(defaults),
            errors: ErrorTree::new(),
            arrays: FieldArrayManager::new(),
            submission: SubmissionController::new(),
            epochs: BTreeMap::new(),
            next_epoch: 0,
            validating: BTreeSet::new(),
            queued: Vec::new(),
        }
    }

    fn check_ready(&self) -> Result<()> {
        match &self.status {
            SessionStatus::Ready => Ok(()),
            SessionStatus::NotReady => Err(InitializationError::Pending.into()),
            SessionStatus::Failed { message } => Err(InitializationError::Failed {
                message: message.clone(),
            }
            .into()),
        }
    }

    fn is_submitted(&self) -> bool {
        self.submission.state().is_submitted
    }

    fn bump_epoch(&mut self, path: &FieldPath) -> u64 {
        self.next_epoch += 1;
        self.epochs.insert(path.clone(), self.next_epoch);
        self.next_epoch
    }

    /// Invalidate pending validations at or beneath `path`.
    fn cancel(&mut self, path: &FieldPath) {
        self.epochs.retain(|p, _| !p.starts_with(path));
        self.validating.retain(|p| !p.starts_with(path));
        self.queued.retain(|job| !job.path.starts_with(path));
    }

    fn cancel_all(&mut self) {
        self.epochs.clear();
        self.validating.clear();
        self.queued.clear();
    }

    /// Registered fields at or beneath `path`, plus fields whose rules
    /// declare a dependency on it.
    fn validation_targets(&self, path: &FieldPath) -> Vec<FieldPath> {
        let mut targets: BTreeSet<FieldPath> = self
            .registry
            .paths()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        if !path.is_root() {
            targets.extend(self.registry.dependents(path));
        }
        targets.into_iter().collect()
    }

    fn set_error(
        &mut self,
        path: &FieldPath,
        error: Option<FieldError>,
        events: &mut Vec<FormEvent>,
    ) {
        if self.errors.set(path.clone(), error.clone()) {
            events.push(FormEvent::Error {
                path: path.clone(),
                error,
            });
        }
    }

    /// Run the synchronous part of validation for `targets`. Fields with
    /// async checks keep their previous error until the returned jobs land.
    fn validate_sync(
        &mut self,
        targets: &[FieldPath],
        events: &mut Vec<FormEvent>,
    ) -> Vec<AsyncJob> {
        let mut jobs = Vec::new();
        for path in targets {
            if !self.registry.is_registered(path) {
                continue;
            }
            let epoch = self.bump_epoch(path);
            if self.registry.is_disabled(path) {
                self.validating.remove(path);
                self.set_error(path, None, events);
                continue;
            }

            let value = self.registry.value(path).cloned().unwrap_or(Value::Null);
            let verdict =
                self.engine
                    .evaluate(self.registry.rules(path), &value, self.registry.values());
            if verdict.is_pending() {
                trace!(path = %path, epoch, "async validation pending");
                let tree = self.registry.values().clone();
                if let Some(job) = self.engine.job(path.clone(), epoch, verdict, value, tree) {
                    self.validating.insert(path.clone());
                    jobs.push(job);
                }
            } else {
                self.validating.remove(path);
                self.set_error(path, verdict.error(), events);
            }
        }
        jobs
    }

    fn apply_outcome(&mut self, outcome: AsyncOutcome, events: &mut Vec<FormEvent>) {
        let AsyncOutcome { path, epoch, error } = outcome;
        if !self.registry.is_registered(&path) {
            trace!(path = %path, "discarding async result for unregistered field");
            return;
        }
        if self.epochs.get(&path) != Some(&epoch) {
            trace!(path = %path, epoch, "discarding stale async result");
            return;
        }
        self.validating.remove(&path);
        if self.registry.is_disabled(&path) {
            return;
        }
        self.errors.set(path.clone(), error.clone());
        // the suspended notification is delivered even if the error is unchanged
        events.push(FormEvent::Error { path, error });
    }

    fn refresh_disabled(&mut self, events: &mut Vec<FormEvent>) {
        for (path, disabled) in self.registry.refresh_disabled() {
            if disabled {
                self.cancel(&path);
                for cleared in self.errors.clear_subtree(&path) {
                    events.push(FormEvent::Error {
                        path: cleared,
                        error: None,
                    });
                }
            }
            events.push(FormEvent::Disabled { path, disabled });
        }
    }

    fn dirty_snapshot(&self, path: &FieldPath) -> Vec<(FieldPath, bool)> {
        let mut related: Vec<(FieldPath, bool)> = self
            .registry
            .paths()
            .filter(|p| p.is_related(path))
            .map(|p| (p.clone(), self.registry.is_dirty(p)))
            .collect();
        if !self.registry.is_registered(path) {
            related.push((path.clone(), self.registry.is_dirty(path)));
        }
        related
    }

    fn dirty_events(&self, before: Vec<(FieldPath, bool)>, events: &mut Vec<FormEvent>) {
        for (path, was_dirty) in before {
            let dirty = self.registry.is_dirty(&path);
            if dirty != was_dirty {
                events.push(FormEvent::Dirty { path, dirty });
            }
        }
    }

    /// Shared body of `set_value` and `input`.
    fn write(
        &mut self,
        path: &FieldPath,
        value: Value,
        touch: bool,
        emit_dirty: bool,
        validate: bool,
    ) -> Vec<FormEvent> {
        let mut events = Vec::new();
        let before = self.dirty_snapshot(path);

        let stored = self.registry.write(path, value);
        debug!(path = %path, value = ?stored, "value written");
        events.push(FormEvent::Value {
            path: path.clone(),
            value: stored,
        });

        if emit_dirty {
            self.dirty_events(before, &mut events);
        }
        if touch && self.registry.set_touched(path, true) {
            events.push(FormEvent::Touched {
                path: path.clone(),
                touched: true,
            });
        }
        self.refresh_disabled(&mut events);

        if validate {
            let targets = self.validation_targets(path);
            let jobs = self.validate_sync(&targets, &mut events);
            self.enqueue(jobs);
        }
        events
    }

    fn validates_on(&self, path: &FieldPath, trigger: Trigger) -> bool {
        self.options
            .validates_on(trigger, self.is_submitted(), self.registry.is_touched(path))
    }

    /// Apply a structural edit to the array at `path`, moving metadata,
    /// errors and keys with their records. `None` if nothing changed.
    fn apply_array_op(&mut self, path: &FieldPath, op: ArrayOp) -> Option<Vec<FormEvent>> {
        let mut items = match self.registry.value(path) {
            Some(Value::Array(items)) => items.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                warn!(path = %path, "array operation on a non-array value ignored");
                return None;
            }
        };
        let op_name = op.name();
        let change = self.arrays.apply(path, &mut items, op)?;
        debug!(path = %path, op = op_name, "array operation applied");

        let errors_before = self.errors.subtree(path);
        let dirty_before = self.registry.is_dirty(path);

        self.cancel(path);
        self.registry.reindex(path, &change.mapping);
        self.errors.reindex(path, &change.mapping);
        if let Some(index) = change.replaced {
            let item = path.index(index);
            self.errors.clear_subtree(&item);
            let fields: Vec<FieldPath> = self
                .registry
                .paths()
                .filter(|p| p.starts_with(&item))
                .cloned()
                .collect();
            for field in fields {
                self.registry.set_touched(&field, false);
            }
        }

        let array = Value::Array(items);
        crate::path::assign(self.registry.values_mut(), path, array.clone());
        let mut events = vec![FormEvent::Value {
            path: path.clone(),
            value: array,
        }];
        if self.registry.is_dirty(path) != dirty_before {
            events.push(FormEvent::Dirty {
                path: path.clone(),
                dirty: !dirty_before,
            });
        }
        self.refresh_disabled(&mut events);

        if self.validates_on(path, Trigger::Change) {
            let targets = self.validation_targets(path);
            let jobs = self.validate_sync(&targets, &mut events);
            self.enqueue(jobs);
        }

        // errors that moved or vanished with their records
        let errors_after = self.errors.subtree(path);
        let changed: BTreeSet<&FieldPath> =
            errors_before.paths().chain(errors_after.paths()).collect();
        for p in changed {
            let after = errors_after.get(p);
            let announced = events
                .iter()
                .any(|e| matches!(e, FormEvent::Error { path: at, .. } if at == p));
            if errors_before.get(p) != after && !announced {
                events.push(FormEvent::Error {
                    path: p.clone(),
                    error: after.cloned(),
                });
            }
        }
        Some(events)
    }

    /// The array and index of `path` when it names an item of an array.
    fn array_item(&self, path: &FieldPath) -> Option<(FieldPath, usize)> {
        let PathSegment::Index(index) = path.last()? else {
            return None;
        };
        let parent = path.parent()?;
        match self.registry.value(&parent) {
            Some(Value::Array(items)) if *index < items.len() => Some((parent, *index)),
            _ => None,
        }
    }

    /// Queue async jobs for `settle`, superseding jobs already queued for
    /// the same fields.
    fn enqueue(&mut self, jobs: Vec<AsyncJob>) {
        if jobs.is_empty() {
            return;
        }
        self.queued
            .retain(|queued| !jobs.iter().any(|job| job.path == queued.path));
        self.queued.extend(jobs);
    }

    fn reset(&mut self, defaults: Option<Value>) -> Vec<FormEvent> {
        self.registry.reset(defaults);
        self.errors.clear();
        self.arrays.clear();
        self.cancel_all();
        let values = self.registry.values().clone();
        info!(values = %Pretty(&values), "form reset");
        vec![FormEvent::Reset { values }]
    }
}

/// Handle to a form session.
#[derive(Clone)]
pub struct Form {
    inner: Rc<RefCell<FormInner>>,
    bus: Rc<SubscriptionBus>,
    status_tx: Rc<watch::Sender<SessionStatus>>,
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Form")
            .field("status", &inner.status)
            .field("options", &inner.options)
            .field("values", inner.registry.values())
            .field("errors", &inner.errors)
            .finish_non_exhaustive()
    }
}

impl Form {
    fn from_inner(inner: FormInner) -> Self {
        let (status_tx, _) = watch::channel(inner.status.clone());
        Self {
            inner: Rc::new(RefCell::new(inner)),
            bus: Rc::new(SubscriptionBus::new()),
            status_tx: Rc::new(status_tx),
        }
    }

    /// A session waiting for [`initialize`](Form::initialize).
    pub fn new(options: FormOptions) -> Self {
        Self::from_inner(FormInner::new(
            options,
            SessionStatus::NotReady,
            Value::Object(Default::default()),
        ))
    }

    /// A session whose defaults are already known. Ready immediately.
    pub fn with_defaults(options: FormOptions, defaults: Value) -> Self {
        debug!(defaults = %Pretty(&defaults), "form created with static defaults");
        Self::from_inner(FormInner::new(options, SessionStatus::Ready, defaults))
    }

    /// Create a session and resolve its defaults.
    pub async fn create(options: FormOptions, resolver: &dyn DefaultsResolver) -> Result<Self> {
        let form = Self::new(options);
        form.initialize(resolver).await?;
        Ok(form)
    }

    /// Resolve defaults. May be called once per session; a failure leaves
    /// the session permanently failed.
    pub async fn initialize(&self, resolver: &dyn DefaultsResolver) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.resolving || inner.status != SessionStatus::NotReady {
                warn!("form defaults were already resolved");
                return Err(InitializationError::AlreadyStarted.into());
            }
            inner.resolving = true;
        }
        info!("form initializing");

        let resolved = resolve_defaults(resolver).await;
        let (status, result) = {
            let mut inner = self.inner.borrow_mut();
            let (status, result) = match resolved {
                Ok(defaults) => {
                    inner.registry = FieldRegistry::new(defaults);
                    (SessionStatus::Ready, Ok(()))
                }
                Err(e) => {
                    let status = SessionStatus::Failed {
                        message: e.to_string(),
                    };
                    (status, Err(FormError::from(e)))
                }
            };
            inner.status = status.clone();
            (status, result)
        };

        info!(?status, "form status changed");
        self.status_tx.send_replace(status.clone());
        self.bus.publish(&FormEvent::Status(status));
        result
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.borrow().status.clone()
    }

    /// Wait until the session leaves `NotReady`.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.status_tx.subscribe();
        let status = match rx
            .wait_for(|status| *status != SessionStatus::NotReady)
            .await
        {
            Ok(status) => status.clone(),
            Err(_) => return Err(InitializationError::Pending.into()),
        };
        match status {
            SessionStatus::Failed { message } => {
                Err(InitializationError::Failed { message }.into())
            }
            _ => Ok(()),
        }
    }

    pub fn options(&self) -> FormOptions {
        self.inner.borrow().options.clone()
    }

    /// Declare a field and its rules.
    pub fn register(
        &self,
        path: impl Into<FieldPath>,
        rules: Vec<ValidationRule>,
        options: RegisterOptions,
    ) -> Result<RegisterOutcome> {
        let path = path.into();
        let mut inner = self.inner.borrow_mut();
        inner.check_ready()?;
        let outcome = inner.registry.register(path.clone(), rules, options);
        if outcome == RegisterOutcome::Replaced {
            // results computed with the old rules no longer apply
            inner.epochs.remove(&path);
            inner.validating.remove(&path);
        }
        Ok(outcome)
    }

    /// Remove a field (and fields beneath it) and its errors. Returns false
    /// for an unknown path.
    pub fn unregister(&self, path: impl Into<FieldPath>) -> Result<bool> {
        let path = path.into();
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            let drop_value = inner.options.should_unregister;
            // array items leave through the array so later records keep
            // their keys and metadata
            let item = drop_value.then(|| inner.array_item(&path)).flatten();
            let removed = inner
                .registry
                .unregister(&path, drop_value && item.is_none());
            if removed.is_empty() {
                warn!(path = %path, "unregister of unknown path ignored");
                return Ok(false);
            }
            debug!(path = %path, fields = removed.len(), "field unregistered");

            let mut events = Vec::new();
            for field in &removed {
                inner.cancel(field);
                for cleared in inner.errors.clear_subtree(field) {
                    events.push(FormEvent::Error {
                        path: cleared,
                        error: None,
                    });
                }
            }
            match item {
                Some((array, index)) => {
                    let edit = inner.apply_array_op(&array, ArrayOp::Remove(index));
                    events.extend(edit.unwrap_or_default());
                }
                None if drop_value => events.push(FormEvent::Value {
                    path: path.clone(),
                    value: Value::Null,
                }),
                None => {}
            }
            events
        };
        self.bus.publish_all(&events);
        Ok(true)
    }

    /// Programmatic write. Subscribers are always notified.
    pub fn set_value(
        &self,
        path: impl Into<FieldPath>,
        value: Value,
        options: SetValueOptions,
    ) -> Result<bool> {
        let path = path.into();
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            if !inner.registry.is_known(&path) {
                warn!(path = %path, "set_value on unknown path ignored");
                return Ok(false);
            }
            inner.write(
                &path,
                value,
                options.should_touch,
                options.should_dirty,
                options.should_validate,
            )
        };
        self.bus.publish_all(&events);
        Ok(true)
    }

    /// A user edit: dirty state is published, touched is left alone and
    /// validation follows the configured mode.
    pub fn input(&self, path: impl Into<FieldPath>, value: Value) -> Result<bool> {
        let path = path.into();
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            if !inner.registry.is_registered(&path) {
                warn!(path = %path, "input on unregistered path ignored");
                return Ok(false);
            }
            let validate = inner.validates_on(&path, Trigger::Change);
            inner.write(&path, value, false, true, validate)
        };
        self.bus.publish_all(&events);
        Ok(true)
    }

    /// The field lost focus: mark it touched and validate per mode.
    pub fn blur(&self, path: impl Into<FieldPath>) -> Result<bool> {
        let path = path.into();
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            if !inner.registry.is_registered(&path) {
                warn!(path = %path, "blur on unregistered path ignored");
                return Ok(false);
            }
            let mut events = Vec::new();
            let validate = inner.validates_on(&path, Trigger::Blur);
            if inner.registry.set_touched(&path, true) {
                events.push(FormEvent::Touched {
                    path: path.clone(),
                    touched: true,
                });
            }
            if validate {
                let targets = inner.validation_targets(&path);
                let jobs = inner.validate_sync(&targets, &mut events);
                inner.enqueue(jobs);
            }
            events
        };
        self.bus.publish_all(&events);
        Ok(true)
    }

    /// Copy of the value at `path`.
    pub fn get_value(&self, path: impl Into<FieldPath>) -> Result<Option<Value>> {
        let path = path.into();
        let inner = self.inner.borrow();
        inner.check_ready()?;
        let value = inner.registry.value(&path).cloned();
        if value.is_none() && !inner.registry.is_known(&path) {
            warn!(path = %path, "get_value on unknown path");
        }
        Ok(value)
    }

    /// Copies of the values at several paths, in order.
    pub fn get_values<I, P>(&self, paths: I) -> Result<Vec<Option<Value>>>
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        let inner = self.inner.borrow();
        inner.check_ready()?;
        Ok(paths
            .into_iter()
            .map(|p| inner.registry.value(&p.into()).cloned())
            .collect())
    }

    /// Copy of the whole value tree.
    pub fn values(&self) -> Result<Value> {
        let inner = self.inner.borrow();
        inner.check_ready()?;
        Ok(inner.registry.values().clone())
    }

    pub fn errors(&self) -> Result<ErrorTree> {
        let inner = self.inner.borrow();
        inner.check_ready()?;
        Ok(inner.errors.clone())
    }

    pub fn error(&self, path: impl Into<FieldPath>) -> Result<Option<FieldError>> {
        let path = path.into();
        let inner = self.inner.borrow();
        inner.check_ready()?;
        Ok(inner.errors.get(&path).cloned())
    }

    pub fn field_state(&self, path: impl Into<FieldPath>) -> Result<FieldState> {
        let path = path.into();
        let inner = self.inner.borrow();
        inner.check_ready()?;
        let error = inner.errors.get(&path).cloned();
        Ok(FieldState {
            dirty: inner.registry.is_dirty(&path),
            touched: inner.registry.is_touched(&path),
            disabled: inner.registry.is_disabled(&path),
            invalid: error.is_some(),
            validating: inner.validating.contains(&path),
            error,
        })
    }

    pub fn form_state(&self) -> Result<FormState> {
        let inner = self.inner.borrow();
        inner.check_ready()?;
        Ok(FormState {
            is_dirty: inner.registry.is_form_dirty(),
            is_valid: inner.errors.is_empty(),
            is_validating: !inner.validating.is_empty(),
            dirty_fields: inner.registry.dirty_fields(),
            touched_fields: inner.registry.touched_fields(),
            submission: inner.submission.state(),
            status: inner.status.clone(),
        })
    }

    /// Inject an error, e.g. one reported by a server. The next validation
    /// of the field replaces it.
    pub fn set_error(
        &self,
        path: impl Into<FieldPath>,
        message: impl Into<String>,
    ) -> Result<bool> {
        let path = path.into();
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            if !inner.registry.is_known(&path) {
                warn!(path = %path, "set_error on unknown path ignored");
                return Ok(false);
            }
            let mut events = Vec::new();
            inner.set_error(&path, Some(FieldError::manual(message)), &mut events);
            events
        };
        self.bus.publish_all(&events);
        Ok(true)
    }

    /// Clear errors at or beneath `path`, or all errors for `None`.
    pub fn clear_errors(&self, path: Option<FieldPath>) -> Result<()> {
        let path = path.unwrap_or_default();
        let events: Vec<FormEvent> = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            inner
                .errors
                .clear_subtree(&path)
                .into_iter()
                .map(|path| FormEvent::Error { path, error: None })
                .collect()
        };
        self.bus.publish_all(&events);
        Ok(())
    }

    /// Validate the fields at or beneath `path` (the root validates the whole
    /// form), awaiting async rules. Returns whether the subtree is valid.
    pub async fn trigger(&self, path: impl Into<FieldPath>) -> Result<bool> {
        let path = path.into();
        let (events, jobs) = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            if !path.is_root() && !inner.registry.is_known(&path) {
                warn!(path = %path, "trigger on unknown path ignored");
                return Ok(false);
            }
            let targets = inner.validation_targets(&path);
            let mut events = Vec::new();
            let jobs = inner.validate_sync(&targets, &mut events);
            (events, jobs)
        };
        self.bus.publish_all(&events);
        self.run_jobs(jobs).await;

        let inner = self.inner.borrow();
        Ok(!inner.errors.has_errors_under(&path))
    }

    /// Validate every registered field. Errors at paths with no registered
    /// field are dropped, so the resulting tree reflects the rules alone.
    pub async fn validate_form(&self) -> Result<bool> {
        let stale: Vec<FormEvent> = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            inner.queued.clear();
            let orphaned: Vec<FieldPath> = inner
                .errors
                .paths()
                .filter(|p| !inner.registry.is_registered(p))
                .cloned()
                .collect();
            orphaned
                .into_iter()
                .filter_map(|p| inner.errors.remove(&p).map(|_| p))
                .map(|path| FormEvent::Error { path, error: None })
                .collect()
        };
        self.bus.publish_all(&stale);

        let valid = self.trigger(FieldPath::root()).await?;
        debug!(valid, "form validated");
        Ok(valid)
    }

    /// Drive async validations queued by writes until none remain.
    pub async fn settle(&self) -> Result<()> {
        loop {
            let jobs = {
                let mut inner = self.inner.borrow_mut();
                inner.check_ready()?;
                std::mem::take(&mut inner.queued)
            };
            if jobs.is_empty() {
                return Ok(());
            }
            self.run_jobs(jobs).await;
        }
    }

    async fn run_jobs(&self, jobs: Vec<AsyncJob>) {
        if jobs.is_empty() {
            return;
        }
        let mut running: FuturesUnordered<_> = jobs.into_iter().map(AsyncJob::run).collect();
        while let Some(outcome) = running.next().await {
            let mut events = Vec::new();
            self.inner.borrow_mut().apply_outcome(outcome, &mut events);
            self.bus.publish_all(&events);
        }
    }

    /// Observe changes. Keep the returned guard alive for as long as the
    /// callback should run.
    pub fn subscribe<F>(&self, selector: impl Into<Selector>, callback: F) -> Subscription
    where
        F: FnMut(&FormEvent) + 'static,
    {
        self.bus.subscribe(selector.into(), callback)
    }

    /// Validate the whole form, then hand the values to `on_valid` or the
    /// errors to `on_invalid`.
    ///
    /// A call made while another submission is in flight returns
    /// [`SubmitOutcome::Rejected`] without running anything. Handler errors
    /// are returned as [`SubmitError::Handler`].
    pub async fn submit<E, V, VFut, I, IFut>(
        &self,
        on_valid: V,
        on_invalid: I,
    ) -> std::result::Result<SubmitOutcome, SubmitError<E>>
    where
        V: FnOnce(Value) -> VFut,
        VFut: Future<Output = std::result::Result<(), E>>,
        I: FnOnce(ErrorTree) -> IFut,
        IFut: Future<Output = std::result::Result<(), E>>,
    {
        let state = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            if !inner.submission.begin() {
                return Ok(SubmitOutcome::Rejected);
            }
            inner.submission.state()
        };
        self.bus.publish(&FormEvent::Submission(state));
        let mut guard = SubmitGuard { form: self, armed: true };

        let valid = self.validate_form().await?;
        let (state, payload) = {
            let mut inner = self.inner.borrow_mut();
            inner.submission.validated(valid);
            let payload = if valid {
                Ok(inner.registry.enabled_values())
            } else {
                Err(inner.errors.clone())
            };
            (inner.submission.state(), payload)
        };
        self.bus.publish(&FormEvent::Submission(state));

        let (outcome, handled) = match payload {
            Ok(values) => {
                debug!(values = %Pretty(&values), "submitting valid form");
                (SubmitOutcome::Valid, on_valid(values).await)
            }
            Err(errors) => {
                debug!(errors = errors.len(), "submitting invalid form");
                (SubmitOutcome::Invalid, on_invalid(errors).await)
            }
        };

        let events = {
            let mut inner = self.inner.borrow_mut();
            let mut events = Vec::new();
            if handled.is_err() {
                warn!("submit handler failed");
                inner.submission.handler_failed();
            } else if outcome == SubmitOutcome::Valid && inner.options.reset_on_submit_success {
                events = inner.reset(None);
            }
            inner.submission.finish();
            events.push(FormEvent::Submission(inner.submission.state()));
            events
        };
        guard.armed = false;
        self.bus.publish_all(&events);

        handled.map_err(SubmitError::Handler)?;
        Ok(outcome)
    }

    /// Restore the defaults (or adopt `defaults` as the new defaults), clear
    /// touched flags and errors, and reset submission flags. The submit count
    /// is kept.
    pub fn reset(&self, defaults: Option<Value>) -> Result<()> {
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            inner.submission.reset();
            let mut events = inner.reset(defaults);
            events.push(FormEvent::Submission(inner.submission.state()));
            events
        };
        self.bus.publish_all(&events);
        Ok(())
    }

    /// Handle for the array field at `path`.
    pub fn field_array(&self, path: impl Into<FieldPath>) -> FieldArray<'_> {
        FieldArray::new(self, path.into())
    }

    pub(crate) fn array_items(&self, path: &FieldPath) -> Result<Vec<ArrayItem>> {
        let mut inner = self.inner.borrow_mut();
        inner.check_ready()?;
        let items = match inner.registry.value(path) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        Ok(inner.arrays.items(path, &items))
    }

    pub(crate) fn apply_array_op(&self, path: &FieldPath, op: ArrayOp) -> Result<bool> {
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.check_ready()?;
            match inner.apply_array_op(path, op) {
                Some(events) => events,
                None => return Ok(false),
            }
        };
        self.bus.publish_all(&events);
        Ok(true)
    }
}

/// Returns the controller to `Idle` if a submit future is dropped midway.
struct SubmitGuard<'a> {
    form: &'a Form,
    armed: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut inner) = self.form.inner.try_borrow_mut() {
            warn!("submission abandoned before completion");
            inner.submission.finish();
        }
    }
}

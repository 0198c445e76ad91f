//! Per-page operation state machine.
//!
//! A page moves `Idle → Dispatching → (Committing | Reloading) → Idle`.
//! Exactly one operation holds the dispatch slot at a time; the slot is a
//! `SlotGuard` that hands itself to the next FIFO waiter when dropped, so an
//! abandoned operation future can never wedge the page.

use crate::config::{ConcurrencyPolicy, RuntimeConfig};
use crate::error::PageError;
use crate::hierarchy::unreachable;
use crate::protocol::{Command, Event, Object, Operation, PageConfig, RenderConfig, Scenario, merge_shallow};
use crate::registry::{CustomProps, OperationSink, PageView, Registry, render_page};
use crate::transport::ProtocolTransport;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dispatching,
    Committing,
    Reloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Local command applied, no request issued.
    Committed,
    /// Response applied as the new page.
    Reloaded,
    /// Round trip done but the page was left as is (`skipRender`).
    Skipped,
    /// Response arrived after unmount or navigation and was dropped.
    Discarded,
    JumpedOut,
    /// The confirm hook refused the operation.
    Declined,
}

/// Published after every applied transition.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub revision: u64,
    pub page: Option<Arc<PageConfig>>,
}

/// Collaborator callbacks supplied by the embedding application.
#[async_trait]
pub trait PageHooks: Send + Sync {
    async fn confirm(&self, _component: &str, _message: &str) -> bool {
        true
    }

    fn on_error(&self, _error: &PageError) {}

    fn on_jump_out(&self, _component: &str, _command: &Command) {}

    fn on_complete(&self, _snapshot: &Snapshot) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl PageHooks for NoHooks {}

#[derive(Debug, Clone)]
pub struct PageOptions {
    pub scenario: Scenario,
    pub in_params: Object,
    pub config: RuntimeConfig,
}

impl PageOptions {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            in_params: Object::new(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_in_params(mut self, in_params: Object) -> Self {
        self.in_params = in_params;
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }
}

type ReloadResult = Option<Result<Outcome, PageError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Operation,
    Reload,
}

struct Waiter {
    kind: SlotKind,
    tx: oneshot::Sender<SlotGuard>,
}

struct PageState {
    phase: Phase,
    page: Option<Arc<PageConfig>>,
    in_params: Object,
    revision: u64,
    generation: u64,
    waiters: VecDeque<Waiter>,
    queued_reload: Option<watch::Receiver<ReloadResult>>,
    terminated: bool,
    unmounted: bool,
}

impl PageState {
    fn ensure_live(&self) -> Result<(), PageError> {
        if self.unmounted {
            Err(PageError::Unmounted)
        } else if self.terminated {
            Err(PageError::Terminated)
        } else {
            Ok(())
        }
    }

    fn queued_operations(&self) -> usize {
        self.waiters
            .iter()
            .filter(|waiter| waiter.kind == SlotKind::Operation && !waiter.tx.is_closed())
            .count()
    }
}

struct Shared {
    scenario: Scenario,
    config: RuntimeConfig,
    transport: Arc<dyn ProtocolTransport>,
    hooks: Arc<dyn PageHooks>,
    state: Mutex<PageState>,
    snapshots: watch::Sender<Snapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &PageState) -> Snapshot {
        let snapshot = Snapshot {
            revision: state.revision,
            page: state.page.clone(),
        };
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }
}

/// Ownership of the dispatch slot. Dropping it passes the slot on.
struct SlotGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            release_slot(&self.shared);
        }
    }
}

fn release_slot(shared: &Arc<Shared>) {
    let mut state = shared.lock();

    while let Some(waiter) = state.waiters.pop_front() {
        if waiter.kind == SlotKind::Reload {
            state.queued_reload = None;
        }

        state.phase = Phase::Dispatching;
        let guard = SlotGuard {
            shared: shared.clone(),
            armed: true,
        };

        match waiter.tx.send(guard) {
            Ok(()) => return,
            // Waiter gave up; its guard must not re-enter this lock.
            Err(mut guard) => guard.armed = false,
        }
    }

    state.phase = Phase::Idle;
}

/// A reserved place in the dispatch order.
enum Ticket {
    Ready(SlotGuard),
    Queued(oneshot::Receiver<SlotGuard>),
}

enum Dispatch {
    Done(Outcome),
    Pending { op: Operation, ticket: Ticket },
}

/// Handle to one mounted config page. Clones share the same page.
#[derive(Clone)]
pub struct PageInstance {
    shared: Arc<Shared>,
}

impl PageInstance {
    pub fn mount(
        options: PageOptions,
        transport: Arc<dyn ProtocolTransport>,
        hooks: Arc<dyn PageHooks>,
    ) -> Self {
        let (snapshots, _) = watch::channel(Snapshot::default());

        Self {
            shared: Arc::new(Shared {
                scenario: options.scenario,
                config: options.config,
                transport,
                hooks,
                state: Mutex::new(PageState {
                    phase: Phase::Idle,
                    page: None,
                    in_params: options.in_params,
                    revision: 0,
                    generation: 0,
                    waiters: VecDeque::new(),
                    queued_reload: None,
                    terminated: false,
                    unmounted: false,
                }),
                snapshots,
            }),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.shared.scenario
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn in_params(&self) -> Object {
        self.shared.lock().in_params.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Render the current page, or `None` before the first load.
    pub fn render(&self, registry: &Registry, custom_props: &CustomProps) -> Option<PageView> {
        let page = self.snapshot().page?;
        let sink: Arc<dyn OperationSink> = Arc::new(self.clone());
        Some(render_page(registry, &page, custom_props, sink))
    }

    /// Initial fetch. Same as a reload with no event.
    pub async fn load(&self) -> Result<Outcome, PageError> {
        self.reload_and_wait().await
    }

    /// Force a refetch with no event, reusing the current `inParams`.
    /// Calls made while a reload is still queued join that reload.
    pub fn reload(&self) {
        if let Err(err) = self.request_reload() {
            warn!(%err, "reload request dropped");
        }
    }

    pub async fn reload_and_wait(&self) -> Result<Outcome, PageError> {
        let mut rx = self.request_reload()?;
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            rx.changed().await.map_err(|_| PageError::Unmounted)?;
        }
    }

    /// Replace `inParams` and refetch. Runs as an operation, so the
    /// concurrency policy applies and `inParams` is untouched on rejection.
    pub async fn set_in_params(&self, in_params: Object) -> Result<Outcome, PageError> {
        let guard = self.acquire(SlotKind::Operation).await?;
        self.shared.lock().in_params = in_params;
        self.run_reload(guard, None, false).await
    }

    pub async fn exec_operation(
        &self,
        component: &str,
        operation: &str,
        local_patch: Option<Object>,
    ) -> Result<Outcome, PageError> {
        match self.begin_operation(component, operation)? {
            Dispatch::Done(outcome) => Ok(outcome),
            Dispatch::Pending { op, ticket } => {
                self.finish_operation(component, operation, op, ticket, local_patch)
                    .await
            }
        }
    }

    /// Synchronous half of an operation: resolves it and takes its place in
    /// the dispatch order. jumpOut completes here.
    fn begin_operation(&self, component: &str, operation: &str) -> Result<Dispatch, PageError> {
        let op = self.lookup(component, operation)?;

        if let Some(command) = op.jump_out() {
            return self.jump_out(component, command).map(Dispatch::Done);
        }

        let ticket = self.reserve(SlotKind::Operation)?;
        Ok(Dispatch::Pending { op, ticket })
    }

    async fn finish_operation(
        &self,
        component: &str,
        operation: &str,
        op: Operation,
        ticket: Ticket,
        local_patch: Option<Object>,
    ) -> Result<Outcome, PageError> {
        if let Some(message) = &op.confirm {
            if !self.shared.hooks.confirm(component, message).await {
                debug!(component, operation, "operation declined");
                return Ok(Outcome::Declined);
            }
        }

        let guard = self.wait(ticket).await?;

        // The page may have been replaced while this operation was queued.
        let op = self.lookup(component, operation)?;

        match op.local_command() {
            Some(command) => {
                let target = command.target.as_deref().unwrap_or(component);
                let patch = command.state.clone().unwrap_or_default();
                self.commit(target, &patch)?;
                drop(guard);
                Ok(Outcome::Committed)
            }
            None => {
                let event = Event {
                    component: component.to_string(),
                    operation: op.effective_key(operation).to_string(),
                    operation_data: op.operation_data(local_patch),
                };
                self.run_reload(guard, Some(event), op.skip_render).await
            }
        }
    }

    /// Merge `patch` into a component's own state without a request.
    pub async fn update_state(&self, component: &str, patch: Object) -> Result<Outcome, PageError> {
        let ticket = self.reserve(SlotKind::Operation)?;
        self.finish_update(component, &patch, ticket).await
    }

    async fn finish_update(
        &self,
        component: &str,
        patch: &Object,
        ticket: Ticket,
    ) -> Result<Outcome, PageError> {
        let guard = self.wait(ticket).await?;
        self.commit(component, patch)?;
        drop(guard);
        Ok(Outcome::Committed)
    }

    /// Detach from the page. Responses still in flight are dropped on arrival.
    pub fn unmount(&self) {
        let mut state = self.shared.lock();
        state.unmounted = true;
        state.generation = state.generation.wrapping_add(1);
        state.waiters.clear();
        state.queued_reload = None;
        debug!(scenario = %self.shared.scenario.scenario_key, "page unmounted");
    }

    fn lookup(&self, component: &str, operation: &str) -> Result<Operation, PageError> {
        let state = self.shared.lock();
        state.ensure_live()?;

        let page = state.page.as_ref().ok_or(PageError::NotLoaded)?;
        let spec = page
            .component(component)
            .ok_or_else(|| PageError::UnknownComponent(component.to_string()))?;
        let op = spec
            .operation(operation)
            .ok_or_else(|| PageError::UnknownOperation {
                component: component.to_string(),
                operation: operation.to_string(),
            })?;

        if op.disabled {
            return Err(PageError::OperationDisabled {
                component: component.to_string(),
                operation: operation.to_string(),
            });
        }

        Ok(op.clone())
    }

    async fn acquire(&self, kind: SlotKind) -> Result<SlotGuard, PageError> {
        let ticket = self.reserve(kind)?;
        self.wait(ticket).await
    }

    fn reserve(&self, kind: SlotKind) -> Result<Ticket, PageError> {
        let mut state = self.shared.lock();
        state.ensure_live()?;

        if state.phase == Phase::Idle && state.waiters.is_empty() {
            state.phase = Phase::Dispatching;
            if kind == SlotKind::Reload {
                state.queued_reload = None;
            }
            return Ok(Ticket::Ready(SlotGuard {
                shared: self.shared.clone(),
                armed: true,
            }));
        }

        if kind == SlotKind::Operation {
            let full = match self.shared.config.policy {
                ConcurrencyPolicy::Reject => true,
                ConcurrencyPolicy::Queue => {
                    state.queued_operations() >= self.shared.config.queue_capacity
                }
            };
            if full {
                return Err(PageError::ConcurrentOperation);
            }
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { kind, tx });
        Ok(Ticket::Queued(rx))
    }

    async fn wait(&self, ticket: Ticket) -> Result<SlotGuard, PageError> {
        let guard = match ticket {
            Ticket::Ready(guard) => guard,
            Ticket::Queued(rx) => match rx.await {
                Ok(guard) => guard,
                Err(_) => {
                    // Waiters are only dropped on unmount or jumpOut.
                    self.shared.lock().ensure_live()?;
                    return Err(PageError::Unmounted);
                }
            },
        };
        self.shared.lock().ensure_live()?;
        Ok(guard)
    }

    /// Hand a fire-and-forget failure to `on_error`. Request failures were
    /// already reported by `run_reload`.
    fn report(&self, err: &PageError) {
        if !matches!(
            err,
            PageError::ProtocolRequestFailure(_) | PageError::MissingProtocol
        ) {
            self.shared.hooks.on_error(err);
        }
    }

    fn commit(&self, target: &str, patch: &Object) -> Result<(), PageError> {
        let snapshot = {
            let mut state = self.shared.lock();
            state.phase = Phase::Committing;

            let page = state.page.as_ref().ok_or(PageError::NotLoaded)?;
            let mut next = PageConfig::clone(page);
            let spec = next
                .components
                .get_mut(target)
                .ok_or_else(|| PageError::UnknownComponent(target.to_string()))?;
            spec.state = Some(merge_shallow(spec.state.as_ref(), patch));

            state.page = Some(Arc::new(next));
            state.revision += 1;
            self.shared.publish(&state)
        };

        debug!(target, revision = snapshot.revision, "committed local state");
        Ok(())
    }

    async fn run_reload(
        &self,
        guard: SlotGuard,
        event: Option<Event>,
        skip_render: bool,
    ) -> Result<Outcome, PageError> {
        let (request, generation) = {
            let mut state = self.shared.lock();
            state.phase = Phase::Reloading;
            state.generation = state.generation.wrapping_add(1);

            let request = RenderConfig {
                scenario: self.shared.scenario.clone(),
                in_params: state.in_params.clone(),
                protocol: state.page.as_deref().cloned(),
                event,
            };
            (request, state.generation)
        };

        debug!(event = ?request.event, generation, "dispatching render request");
        let response = self.shared.transport.render(&request).await;

        let result = {
            let mut state = self.shared.lock();
            if state.unmounted || state.terminated || state.generation != generation {
                drop(state);
                drop(guard);
                debug!(generation, "discarding stale render response");
                return Ok(Outcome::Discarded);
            }

            match response {
                Ok(RenderConfig {
                    protocol: Some(page),
                    ..
                }) => {
                    if skip_render {
                        Ok((Outcome::Skipped, None))
                    } else {
                        let dead = unreachable(&page);
                        if !dead.is_empty() {
                            debug!(?dead, "components not reachable from root");
                        }
                        state.page = Some(Arc::new(page));
                        state.revision += 1;
                        Ok((Outcome::Reloaded, Some(self.shared.publish(&state))))
                    }
                }
                Ok(_) => Err(PageError::MissingProtocol),
                Err(err) => Err(PageError::from(err)),
            }
        };

        drop(guard);

        match result {
            Ok((outcome, snapshot)) => {
                if let Some(snapshot) = snapshot {
                    debug!(revision = snapshot.revision, "applied render response");
                    self.shared.hooks.on_complete(&snapshot);
                }
                Ok(outcome)
            }
            Err(err) => {
                error!(%err, "render request failed; keeping current page");
                self.shared.hooks.on_error(&err);
                Err(err)
            }
        }
    }

    fn jump_out(&self, component: &str, command: &Command) -> Result<Outcome, PageError> {
        {
            let mut state = self.shared.lock();
            state.ensure_live()?;
            state.terminated = true;
            state.generation = state.generation.wrapping_add(1);
            state.waiters.clear();
            state.queued_reload = None;
        }

        info!(component, target = ?command.target, "page jumped out");
        self.shared.hooks.on_jump_out(component, command);
        Ok(Outcome::JumpedOut)
    }

    fn request_reload(&self) -> Result<watch::Receiver<ReloadResult>, PageError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PageError::NoRuntime)?;

        let (tx, rx) = {
            let mut state = self.shared.lock();
            state.ensure_live()?;
            if let Some(rx) = &state.queued_reload {
                debug!("coalescing reload into the queued one");
                return Ok(rx.clone());
            }

            let (tx, rx) = watch::channel(None);
            state.queued_reload = Some(rx.clone());
            (tx, rx)
        };

        let page = self.clone();
        runtime.spawn(async move {
            let result = match page.acquire(SlotKind::Reload).await {
                Ok(guard) => page.run_reload(guard, None, false).await,
                Err(err) => Err(err),
            };
            tx.send_replace(Some(result));
        });

        Ok(rx)
    }
}

/// Fire-and-forget entry points for renderer callbacks. The dispatch slot
/// is reserved before spawning, so operations run in the order they were
/// fired; failures go to `PageHooks::on_error`.
impl OperationSink for PageInstance {
    fn exec_operation(&self, component: &str, operation: &str, data: Option<Object>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(component, operation, "no runtime to dispatch operation");
            self.report(&PageError::NoRuntime);
            return;
        };

        let (op, ticket) = match self.begin_operation(component, operation) {
            Ok(Dispatch::Done(_)) => return,
            Ok(Dispatch::Pending { op, ticket }) => (op, ticket),
            Err(err) => {
                warn!(%err, component, operation, "operation refused");
                self.report(&err);
                return;
            }
        };

        let page = self.clone();
        let component = component.to_string();
        let operation = operation.to_string();
        runtime.spawn(async move {
            let result = page
                .finish_operation(&component, &operation, op, ticket, data)
                .await;
            if let Err(err) = result {
                warn!(%err, component, operation, "operation failed");
                page.report(&err);
            }
        });
    }

    fn update_state(&self, component: &str, state: Object) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(component, "no runtime to apply state update");
            self.report(&PageError::NoRuntime);
            return;
        };

        let ticket = match self.reserve(SlotKind::Operation) {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(%err, component, "state update refused");
                self.report(&err);
                return;
            }
        };

        let page = self.clone();
        let component = component.to_string();
        runtime.spawn(async move {
            if let Err(err) = page.finish_update(&component, &state, ticket).await {
                warn!(%err, component, "state update failed");
                page.report(&err);
            }
        });
    }
}

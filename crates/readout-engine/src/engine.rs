//! The engine: registries, dispatch, and the scheduling loop

use crate::agent::{Agent, AgentTask};
use crate::error::{EngineError, EngineResult};
use crate::event::{Event, Handler};
use crate::readout::{FnSource, Readout};
use crate::schedule::Scheduled;
use dashmap::DashMap;
use futures::future::join_all;
use indexmap::IndexMap;
use readout_core::{validate_name, AgentId, EventId, PredicateId, ReadoutId, StateMachine, Value};
use readout_predicate::{CheckContext, CheckError, Predicate, RelevanceKey};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Lifecycle of an engine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    ShuttingDown,
    Finished,
}

/// When the loop next has work. `Immediate` sorts before any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Deadline {
    Immediate,
    At(Instant),
}

/// Requests engine shutdown from another task or a signal handler.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.tx.send_replace(true);
    }
}

/// The automation engine.
///
/// All registration goes through `&mut self` before [`Engine::run`], so
/// nothing can be added while the loop is driving updates. Readouts,
/// machines, and agents share one flat name namespace; event names are
/// claimed in the same namespace but follow no identifier syntax.
pub struct Engine {
    name: String,

    readouts: IndexMap<ReadoutId, Readout>,
    readouts_by_name: HashMap<String, ReadoutId>,

    predicates: IndexMap<PredicateId, Predicate>,
    predicates_by_signature: HashMap<String, PredicateId>,
    relevance: HashMap<PredicateId, BTreeSet<RelevanceKey>>,

    events: IndexMap<EventId, Event>,
    events_by_name: HashMap<String, EventId>,
    events_by_predicate: HashMap<PredicateId, Vec<EventId>>,
    handlers: HashMap<EventId, Vec<Box<dyn Handler>>>,

    // Interior mutability so handlers holding `&Engine` can transition.
    machines: DashMap<String, StateMachine>,

    agents: IndexMap<AgentId, Agent>,

    names: HashSet<String>,
    state: RunState,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    pub fn new(name: impl Into<String>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            readouts: IndexMap::new(),
            readouts_by_name: HashMap::new(),
            predicates: IndexMap::new(),
            predicates_by_signature: HashMap::new(),
            relevance: HashMap::new(),
            events: IndexMap::new(),
            events_by_name: HashMap::new(),
            events_by_predicate: HashMap::new(),
            handlers: HashMap::new(),
            machines: DashMap::new(),
            agents: IndexMap::new(),
            names: HashSet::new(),
            state: RunState::Stopped,
            shutdown_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Validate an identifier and claim it in the shared namespace.
    fn claim_name(&mut self, name: &str) -> EngineResult<()> {
        validate_name(name)?;
        if !self.names.insert(name.to_string()) {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    // ---- registration -----------------------------------------------------

    pub fn add_readout(&mut self, readout: Readout) -> EngineResult<ReadoutId> {
        self.claim_name(readout.name())?;
        let id = readout.id();
        debug!(readout = readout.name(), period = ?readout.period(), "readout registered");
        self.readouts_by_name.insert(readout.name().to_string(), id);
        self.readouts.insert(id, readout);
        Ok(id)
    }

    /// Register a readout whose source yields strings.
    pub fn add_sensor<F, Fut>(
        &mut self,
        name: &str,
        period: Duration,
        mut source: F,
    ) -> EngineResult<ReadoutId>
    where
        F: FnMut() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.add_readout(Readout::new(
            name,
            period,
            FnSource(move || {
                let fut = source();
                async move { fut.await.map(Value::from) }
            }),
        ))
    }

    /// Register a readout whose source yields integers.
    pub fn add_gauge<F, Fut>(
        &mut self,
        name: &str,
        period: Duration,
        mut source: F,
    ) -> EngineResult<ReadoutId>
    where
        F: FnMut() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<i64>> + Send + 'static,
    {
        self.add_readout(Readout::new(
            name,
            period,
            FnSource(move || {
                let fut = source();
                async move { fut.await.map(Value::from) }
            }),
        ))
    }

    /// Register a periodic agent. Agent labels are informational and do
    /// not claim a name.
    pub fn add_agent(
        &mut self,
        label: &str,
        period: Duration,
        task: impl AgentTask + 'static,
    ) -> AgentId {
        let agent = Agent::new(label, period, task);
        let id = agent.id();
        debug!(agent = label, period = ?period, "agent registered");
        self.agents.insert(id, agent);
        id
    }

    /// Register a predicate, deduplicating by signature: registering a
    /// logically identical predicate twice yields the same id, and its
    /// events all fire from one evaluation.
    pub fn add_predicate(&mut self, predicate: Predicate) -> PredicateId {
        let signature = predicate.signature();
        if let Some(&id) = self.predicates_by_signature.get(&signature) {
            return id;
        }
        let id = PredicateId::new();
        debug!(predicate = %signature, "predicate registered");
        self.relevance.insert(id, predicate.relevance());
        self.predicates_by_signature.insert(signature, id);
        self.predicates.insert(id, predicate);
        id
    }

    pub fn add_event(&mut self, name: &str, predicate: PredicateId) -> EngineResult<EventId> {
        if !self.predicates.contains_key(&predicate) {
            return Err(EngineError::PredicateNotFound(predicate));
        }
        if !self.names.insert(name.to_string()) {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        let event = Event::new(name, predicate);
        let id = event.id;
        self.events_by_name.insert(name.to_string(), id);
        self.events_by_predicate
            .entry(predicate)
            .or_default()
            .push(id);
        self.events.insert(id, event);
        Ok(id)
    }

    pub fn add_handler(
        &mut self,
        event: EventId,
        handler: impl Handler + 'static,
    ) -> EngineResult<()> {
        if !self.events.contains_key(&event) {
            return Err(EngineError::EventIdNotFound(event));
        }
        self.handlers
            .entry(event)
            .or_default()
            .push(Box::new(handler));
        Ok(())
    }

    /// Parse conditions, conjoin them, and wire an event with a handler.
    ///
    /// This is the main registration entry point: `when(&["a > 1",
    /// "m@on"], "hot", handler)` fires `hot` whenever both conditions
    /// hold after a relevant change.
    pub fn when(
        &mut self,
        conditions: &[&str],
        event_name: &str,
        handler: impl Handler + 'static,
    ) -> EngineResult<EventId> {
        if conditions.is_empty() {
            return Err(EngineError::NoConditions);
        }
        let mut parts = conditions
            .iter()
            .map(|text| Predicate::parse(text))
            .collect::<Result<Vec<_>, _>>()?;
        let predicate = if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::and(parts)
        };
        self.when_predicate(predicate, event_name, handler)
    }

    /// Like [`Engine::when`] for an already-built predicate.
    pub fn when_predicate(
        &mut self,
        predicate: Predicate,
        event_name: &str,
        handler: impl Handler + 'static,
    ) -> EngineResult<EventId> {
        let predicate = self.add_predicate(predicate);
        let event = self.add_event(event_name, predicate)?;
        self.add_handler(event, handler)?;
        Ok(event)
    }

    /// Register a handler for a state transition condition, creating the
    /// state machine if it does not exist yet. The backing event gets a
    /// generated name.
    pub fn on_transition(
        &mut self,
        condition: &str,
        handler: impl Handler + 'static,
    ) -> EngineResult<EventId> {
        let predicate = Predicate::parse(condition)?;
        let machine = match &predicate {
            Predicate::Transition(t) => t.machine.clone(),
            _ => return Err(EngineError::NotATransition(condition.to_string())),
        };
        self.add_state_machine(&machine)?;
        let event_name = format!("transition-{}", Ulid::new());
        self.when_predicate(predicate, &event_name, handler)
    }

    /// Register a state machine, starting in the init state. Re-adding an
    /// existing machine is a no-op.
    pub fn add_state_machine(&mut self, name: &str) -> EngineResult<()> {
        if self.machines.contains_key(name) {
            return Ok(());
        }
        self.claim_name(name)?;
        debug!(machine = name, "state machine registered");
        self.machines
            .insert(name.to_string(), StateMachine::new(name));
        Ok(())
    }

    // ---- lookups ----------------------------------------------------------

    /// Latest value of a readout.
    pub fn read(&self, name: &str) -> EngineResult<Value> {
        let readout = self
            .readouts_by_name
            .get(name)
            .and_then(|id| self.readouts.get(id))
            .ok_or_else(|| EngineError::ReadoutNotFound(name.to_string()))?;
        Ok(readout.read()?.clone())
    }

    /// Snapshot of a state machine.
    pub fn machine(&self, name: &str) -> EngineResult<StateMachine> {
        self.machines
            .get(name)
            .map(|machine| machine.clone())
            .ok_or_else(|| EngineError::MachineNotFound(name.to_string()))
    }

    pub fn machine_state(&self, name: &str) -> EngineResult<String> {
        Ok(self.machine(name)?.state)
    }

    pub fn event(&self, name: &str) -> EngineResult<&Event> {
        self.events_by_name
            .get(name)
            .and_then(|id| self.events.get(id))
            .ok_or_else(|| EngineError::EventNotFound(name.to_string()))
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    // ---- transitions ------------------------------------------------------

    /// Move a state machine to a new state and fire matching transition
    /// events before returning.
    ///
    /// While the returned future runs, the machine reports the old state
    /// in `from_state`; transition predicates only match inside this
    /// window. Setting the current state again is a no-op and fires
    /// nothing. The window is closed even when a predicate check fails,
    /// in which case the first failure is returned.
    pub async fn set_machine_state(&self, name: &str, state: &str) -> EngineResult<()> {
        let from = {
            let mut machine = self
                .machines
                .get_mut(name)
                .ok_or_else(|| EngineError::MachineNotFound(name.to_string()))?;
            if machine.state == state {
                return Ok(());
            }
            let from = machine.state.clone();
            machine.from_state = Some(from.clone());
            machine.state = state.to_string();
            from
        };
        info!(machine = name, from = %from, to = state, "state transition");

        let _window = TransitionWindow {
            machines: &self.machines,
            name,
        };
        self.transition_effects(name).await
    }

    /// Evaluate and dispatch everything relevant to a machine's in-flight
    /// transition. Strict: a failed check aborts with the error.
    async fn transition_effects(&self, name: &str) -> EngineResult<()> {
        let mut keys = BTreeSet::new();
        keys.insert(RelevanceKey::Machine(name.to_string()));

        let mut satisfied = Vec::new();
        for (id, result) in self.check_relevant(&keys).await {
            if result? {
                satisfied.push(id);
            }
        }
        self.trigger_events(&self.events_for(&satisfied)).await;
        Ok(())
    }

    // ---- evaluation and dispatch ------------------------------------------

    /// Concurrently check every predicate whose relevance set intersects
    /// `keys`.
    async fn check_relevant(
        &self,
        keys: &BTreeSet<RelevanceKey>,
    ) -> Vec<(PredicateId, Result<bool, CheckError>)> {
        let due = self.predicates.iter().filter(|(id, _)| {
            self.relevance
                .get(*id)
                .map_or(false, |rel| !rel.is_disjoint(keys))
        });
        join_all(due.map(|(id, predicate)| async move { (*id, predicate.check(self).await) }))
            .await
    }

    /// Main-loop evaluation: a failed check is logged and treated as
    /// unsatisfied, so one bad predicate cannot stall the loop.
    async fn evaluate_and_trigger(&self, keys: &BTreeSet<RelevanceKey>) {
        let mut satisfied = Vec::new();
        for (id, result) in self.check_relevant(keys).await {
            match result {
                Ok(true) => satisfied.push(id),
                Ok(false) => {}
                Err(err) => warn!(predicate = %id, error = %err, "predicate check failed"),
            }
        }
        self.trigger_events(&self.events_for(&satisfied)).await;
    }

    fn events_for(&self, satisfied: &[PredicateId]) -> Vec<EventId> {
        satisfied
            .iter()
            .flat_map(|id| self.events_by_predicate.get(id).into_iter().flatten())
            .copied()
            .collect()
    }

    async fn trigger_events(&self, event_ids: &[EventId]) {
        join_all(
            event_ids
                .iter()
                .filter_map(|id| self.events.get(id))
                .map(|event| self.trigger_event(event)),
        )
        .await;
    }

    /// Run all handlers of one event concurrently. Handler errors are
    /// logged and isolated from each other.
    async fn trigger_event(&self, event: &Event) {
        debug!(event = %event.name, "event fired");
        let Some(handlers) = self.handlers.get(&event.id) else {
            return;
        };
        join_all(handlers.iter().map(|handler| async move {
            if let Err(err) = handler.handle(event, self).await {
                warn!(event = %event.name, error = %err, "event handler failed");
            }
        }))
        .await;
    }

    // ---- the loop ---------------------------------------------------------

    /// One scheduling pass: update due readouts concurrently, evaluate
    /// predicates touched by changed values, dispatch their events, then
    /// run due agents concurrently. Returns the next deadline, or `None`
    /// when nothing is scheduled at all.
    pub async fn step(&mut self) -> Option<Deadline> {
        let now = Instant::now();

        let updates = self
            .readouts
            .values_mut()
            .filter(|readout| readout.is_due(now))
            .map(|readout| async move {
                let changed = readout.update().await;
                (changed, readout.name().to_string())
            });
        let changed: BTreeSet<RelevanceKey> = join_all(updates)
            .await
            .into_iter()
            .filter_map(|(changed, name)| changed.then_some(RelevanceKey::Readout(name)))
            .collect();

        if !changed.is_empty() {
            self.evaluate_and_trigger(&changed).await;
        }

        // Agents take a shared engine reference, so lend them out of the
        // registry for the duration of the batch.
        let mut agents = std::mem::take(&mut self.agents);
        {
            let engine = &*self;
            join_all(
                agents
                    .values_mut()
                    .filter(|agent| agent.is_due(now))
                    .map(|agent| agent.update(engine)),
            )
            .await;
        }
        self.agents = agents;

        self.next_deadline()
    }

    /// Earliest due instant across readouts and agents.
    pub fn next_deadline(&self) -> Option<Deadline> {
        let readouts = self.readouts.values().map(Scheduled::next_due);
        let agents = self.agents.values().map(Scheduled::next_due);
        readouts
            .chain(agents)
            .map(|due| due.map_or(Deadline::Immediate, Deadline::At))
            .min()
    }

    /// Drive the scheduling loop until shutdown.
    ///
    /// The loop sleeps until the next deadline between passes and wakes
    /// early on a shutdown request, whether from a [`ShutdownHandle`] or
    /// from SIGINT/SIGTERM. An engine with no readouts and no agents
    /// shuts down immediately. Each engine value runs once.
    pub async fn run(&mut self) -> EngineResult<()> {
        if self.state != RunState::Stopped {
            return Err(EngineError::AlreadyFinished);
        }
        self.state = RunState::Running;
        info!(
            engine = %self.name,
            readouts = self.readouts.len(),
            machines = self.machines.len(),
            events = self.events.len(),
            agents = self.agents.len(),
            "engine starting"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        spawn_signal_listener(self.shutdown_handle());

        while self.state == RunState::Running {
            if *shutdown_rx.borrow() {
                self.state = RunState::ShuttingDown;
                break;
            }
            match self.step().await {
                None => {
                    warn!("nothing scheduled; shutting down");
                    self.state = RunState::ShuttingDown;
                }
                Some(Deadline::Immediate) => continue,
                Some(Deadline::At(at)) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = shutdown_rx.changed() => {
                            self.state = RunState::ShuttingDown;
                        }
                    }
                }
            }
        }

        self.state = RunState::Finished;
        info!(engine = %self.name, "engine stopped");
        Ok(())
    }
}

/// Clears a machine's `from_state` on drop, so the transition window
/// closes whether evaluation succeeds, fails, or the future is dropped
/// mid-flight.
struct TransitionWindow<'a> {
    machines: &'a DashMap<String, StateMachine>,
    name: &'a str,
}

impl Drop for TransitionWindow<'_> {
    fn drop(&mut self) {
        if let Some(mut machine) = self.machines.get_mut(self.name) {
            machine.from_state = None;
        }
    }
}

impl CheckContext for Engine {
    fn readout_value(&self, name: &str) -> Result<Value, CheckError> {
        let readout = self
            .readouts_by_name
            .get(name)
            .and_then(|id| self.readouts.get(id))
            .ok_or_else(|| CheckError::UnknownReadout(name.to_string()))?;
        readout
            .value()
            .cloned()
            .ok_or_else(|| CheckError::NeverUpdated(name.to_string()))
    }

    fn machine_snapshot(&self, name: &str) -> Result<StateMachine, CheckError> {
        self.machines
            .get(name)
            .map(|machine| machine.clone())
            .ok_or_else(|| CheckError::UnknownMachine(name.to_string()))
    }
}

fn spawn_signal_listener(handle: ShutdownHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        handle.request();
    });
}

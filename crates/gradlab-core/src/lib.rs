//! Core simulation engine shared across the GradLab workspace.
//!
//! GradLab visualizes gradient descent on a procedurally generated
//! trigonometric height field. This crate owns the numerical core: the
//! scalar field and its finite-difference gradient estimator, the per-agent
//! optimizer state machine, and the registry that coordinates batched
//! operations across all live agents. Rendering, picking, and widgets live
//! in display crates that consume this one through [`TelemetrySink`] and the
//! field lookup methods.

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// Forward-difference probe distance used by [`SurfaceField::gradient`].
///
/// The estimate carries `O(h)` truncation error; callers needing exact
/// derivatives must differentiate the closed form themselves.
pub const GRADIENT_PROBE_STEP: f32 = 0.01;

/// Coordinate in the surface's local 2D domain.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub z: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }
}

/// Accumulated momentum carried between optimization steps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity {
    pub vx: f32,
    pub vz: f32,
}

impl Velocity {
    /// Construct a new velocity vector.
    #[must_use]
    pub const fn new(vx: f32, vz: f32) -> Self {
        Self { vx, vz }
    }
}

/// Finite-difference gradient sample `(df/dx, df/dz)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Gradient {
    pub dx: f32,
    pub dz: f32,
}

impl Gradient {
    /// Construct a new gradient vector.
    #[must_use]
    pub const fn new(dx: f32, dz: f32) -> Self {
        Self { dx, dz }
    }
}

/// World-space point used for trails and display placement.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl WorldPoint {
    /// Construct a new world-space point.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Coefficients and placement of the trigonometric height field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FieldParams {
    /// Frequency of the sine term along the local x axis.
    pub freq_x: f32,
    /// Frequency of the cosine term along the local z axis.
    pub freq_z: f32,
    /// Weight of the diagonal `sin(x + z)` cross term.
    pub cross_strength: f32,
    /// Vertical exaggeration applied when lifting points into world space.
    pub height_scale: f32,
    /// World-space anchor the local domain is measured from.
    pub origin: WorldPoint,
}

impl Default for FieldParams {
    fn default() -> Self {
        Self {
            freq_x: 2.0,
            freq_z: 3.0,
            cross_strength: 0.5,
            height_scale: 1.0,
            origin: WorldPoint::default(),
        }
    }
}

/// Scalar height field `f(x, z) = sin(a·x) + cos(b·z) + c·sin(x + z)`.
///
/// Evaluation is a pure function of the coordinates and the current
/// coefficients: no hidden state, no randomness. Coefficient edits apply
/// immediately to subsequent lookups and never touch agent state, so an
/// agent's trail may show positions computed under a now-stale field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceField {
    params: FieldParams,
}

impl Default for SurfaceField {
    fn default() -> Self {
        Self::new(FieldParams::default())
    }
}

impl SurfaceField {
    /// Construct a field, clamping `height_scale` to be non-negative.
    #[must_use]
    pub fn new(mut params: FieldParams) -> Self {
        params.height_scale = params.height_scale.max(0.0);
        Self { params }
    }

    /// Evaluate the field at local coordinates. Total over all reals.
    #[must_use]
    pub fn evaluate(&self, x: f32, z: f32) -> f32 {
        let p = &self.params;
        (p.freq_x * x).sin() + (p.freq_z * z).cos() + p.cross_strength * (x + z).sin()
    }

    /// Forward finite-difference gradient estimate at `(x, z)`.
    ///
    /// Deliberately numerical rather than analytic: the field stays
    /// pluggable at the cost of one extra evaluation per axis.
    #[must_use]
    pub fn gradient(&self, x: f32, z: f32) -> Gradient {
        let h = GRADIENT_PROBE_STEP;
        let fx = self.evaluate(x, z);
        Gradient {
            dx: (self.evaluate(x + h, z) - fx) / h,
            dz: (self.evaluate(x, z + h) - fx) / h,
        }
    }

    /// World-space height used to place agents visually.
    ///
    /// Not part of the optimization math; the optimizer operates purely in
    /// the 2D domain.
    #[must_use]
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        self.evaluate(x, z) * self.params.height_scale + self.params.origin.y
    }

    /// Lift a local coordinate onto the surface in world space.
    #[must_use]
    pub fn world_position(&self, x: f32, z: f32) -> WorldPoint {
        WorldPoint::new(
            self.params.origin.x + x,
            self.height_at(x, z),
            self.params.origin.z + z,
        )
    }

    /// Atomically replace the three trig coefficients.
    ///
    /// `height_scale` and the origin are left untouched.
    pub fn set_coefficients(&mut self, a: f32, b: f32, c: f32) {
        self.params.freq_x = a;
        self.params.freq_z = b;
        self.params.cross_strength = c;
    }

    /// Change the vertical exaggeration, clamped to be non-negative.
    pub fn set_height_scale(&mut self, height_scale: f32) {
        self.params.height_scale = height_scale.max(0.0);
    }

    /// Current field parameters.
    #[must_use]
    pub const fn params(&self) -> &FieldParams {
        &self.params
    }
}

/// Whether an agent steps automatically when the clock advances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
}

/// Snapshot handed to the display collaborator on every step and reset.
///
/// The gradient is the sample that produced the update, taken at the
/// position the agent occupied before moving.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentReport {
    pub position: Position,
    pub gradient: Gradient,
    pub world: WorldPoint,
}

/// Display-side collaborator notified of agent lifecycle and motion.
pub trait TelemetrySink: Send {
    /// A new agent appeared, carrying its display color token.
    fn on_spawned(&mut self, id: AgentId, color: [f32; 3], report: &AgentReport);

    /// An agent stepped or was reset.
    fn on_report(&mut self, id: AgentId, report: &AgentReport);

    /// An agent was removed; its display counterpart goes with it.
    fn on_removed(&mut self, id: AgentId);
}

/// No-op telemetry sink.
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn on_spawned(&mut self, _id: AgentId, _color: [f32; 3], _report: &AgentReport) {}
    fn on_report(&mut self, _id: AgentId, _report: &AgentReport) {}
    fn on_removed(&mut self, _id: AgentId) {}
}

/// One independent gradient-descent trajectory on the shared surface.
///
/// Agents are plain data records owned by the registry; the display reads
/// position and gradient out of the reports each step rather than the agent
/// living inside a renderable node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerAgent {
    position: Position,
    velocity: Velocity,
    start_position: Position,
    learning_rate: f32,
    momentum: f32,
    use_momentum: bool,
    run_state: RunState,
    step_accumulator: f32,
    step_interval: f32,
    trail: VecDeque<WorldPoint>,
    trail_capacity: Option<usize>,
    color: [f32; 3],
}

impl OptimizerAgent {
    /// Build an agent at `start` using the shared spawn defaults.
    #[must_use]
    pub fn from_config(config: &DescentConfig, start: Position, color: [f32; 3]) -> Self {
        Self {
            position: start,
            velocity: Velocity::default(),
            start_position: start,
            learning_rate: config.learning_rate,
            momentum: config.momentum,
            use_momentum: config.use_momentum,
            run_state: RunState::Stopped,
            step_accumulator: 0.0,
            step_interval: config.step_interval,
            trail: VecDeque::new(),
            trail_capacity: config.trail_capacity,
            color,
        }
    }

    /// Current position in the surface's local domain.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Accumulated momentum. Zero outside momentum mode.
    #[must_use]
    pub const fn velocity(&self) -> Velocity {
        self.velocity
    }

    /// The spawn coordinate this agent resets to. Immutable after creation.
    #[must_use]
    pub const fn start_position(&self) -> Position {
        self.start_position
    }

    /// Current run state.
    #[must_use]
    pub const fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Step size applied on the next update.
    #[must_use]
    pub const fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Whether the next update uses the momentum rule.
    #[must_use]
    pub const fn use_momentum(&self) -> bool {
        self.use_momentum
    }

    /// Momentum coefficient applied while momentum mode is on.
    #[must_use]
    pub const fn momentum(&self) -> f32 {
        self.momentum
    }

    /// Opaque display color token assigned at spawn time.
    #[must_use]
    pub const fn color(&self) -> [f32; 3] {
        self.color
    }

    /// Visited world-space positions, oldest first.
    #[must_use]
    pub const fn trail(&self) -> &VecDeque<WorldPoint> {
        &self.trail
    }

    /// Begin automatic stepping. No-op when already running.
    pub fn start(&mut self) {
        self.run_state = RunState::Running;
    }

    /// Suppress future automatic stepping. Idempotent.
    ///
    /// Stopping is a flag flip; an in-progress step always completes.
    pub fn stop(&mut self) {
        self.run_state = RunState::Stopped;
    }

    /// Return to the spawn point with zero velocity and an empty trail.
    ///
    /// The run state is preserved; callers wanting "reset and stop" or
    /// "reset and run" combine this with [`Self::stop`] / [`Self::start`].
    pub fn reset(&mut self, field: &SurfaceField) -> AgentReport {
        self.position = self.start_position;
        self.velocity = Velocity::default();
        self.step_accumulator = 0.0;
        self.trail.clear();
        self.report(field)
    }

    /// Take exactly one optimization step, in either run state.
    pub fn step(&mut self, field: &SurfaceField) -> AgentReport {
        let gradient = field.gradient(self.position.x, self.position.z);

        if self.use_momentum {
            self.velocity.vx = self.momentum * self.velocity.vx - self.learning_rate * gradient.dx;
            self.velocity.vz = self.momentum * self.velocity.vz - self.learning_rate * gradient.dz;
            self.position.x += self.velocity.vx;
            self.position.z += self.velocity.vz;
        } else {
            self.position.x -= self.learning_rate * gradient.dx;
            self.position.z -= self.learning_rate * gradient.dz;
        }

        let world = field.world_position(self.position.x, self.position.z);
        if let Some(capacity) = self.trail_capacity {
            while self.trail.len() >= capacity {
                self.trail.pop_front();
            }
        }
        self.trail.push_back(world);

        AgentReport {
            position: self.position,
            gradient,
            world,
        }
    }

    /// Advance this agent's clock by `dt` seconds of simulated time.
    ///
    /// Steps at most once per call regardless of how large `dt` is, and at
    /// least once per `step_interval` provided calls arrive frequently
    /// enough. No-op unless running.
    pub fn advance(&mut self, dt: f32, field: &SurfaceField) -> Option<AgentReport> {
        if self.run_state != RunState::Running {
            return None;
        }
        self.step_accumulator += dt;
        if self.step_accumulator >= self.step_interval {
            self.step_accumulator = 0.0;
            Some(self.step(field))
        } else {
            None
        }
    }

    /// Change the step size used by future steps.
    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// Toggle between vanilla and momentum updates for future steps.
    ///
    /// Position, velocity, and trail are untouched.
    pub fn set_use_momentum(&mut self, use_momentum: bool) {
        self.use_momentum = use_momentum;
    }

    fn report(&self, field: &SurfaceField) -> AgentReport {
        AgentReport {
            position: self.position,
            gradient: field.gradient(self.position.x, self.position.z),
            world: field.world_position(self.position.x, self.position.z),
        }
    }
}

/// Errors that can occur when constructing or commanding a world.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// An operation required the shared surface before one was bound.
    #[error("no surface field is bound")]
    FieldMissing,
}

/// Static configuration for a GradLab world.
///
/// `learning_rate` and `use_momentum` double as the shared defaults applied
/// to newly spawned agents; the broadcast setters keep them in sync with
/// live agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescentConfig {
    /// Step size applied to newly spawned agents.
    pub learning_rate: f32,
    /// Whether new agents use momentum updates.
    pub use_momentum: bool,
    /// Momentum coefficient applied while momentum mode is on.
    pub momentum: f32,
    /// Seconds of simulated time between automatic optimization steps.
    pub step_interval: f32,
    /// Optional trail length cap; `None` keeps every visited point.
    pub trail_capacity: Option<usize>,
    /// Optional RNG seed for reproducible agent colors.
    pub rng_seed: Option<u64>,
}

impl Default for DescentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            use_momentum: false,
            momentum: 0.9,
            step_interval: 0.1,
            trail_capacity: None,
            rng_seed: None,
        }
    }
}

impl DescentConfig {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), WorldError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(WorldError::InvalidConfig("learning_rate must be positive"));
        }
        if !self.step_interval.is_finite() || self.step_interval <= 0.0 {
            return Err(WorldError::InvalidConfig("step_interval must be positive"));
        }
        if !self.momentum.is_finite() || !(0.0..1.0).contains(&self.momentum) {
            return Err(WorldError::InvalidConfig("momentum must be in [0, 1)"));
        }
        if self.trail_capacity == Some(0) {
            return Err(WorldError::InvalidConfig(
                "trail_capacity must be non-zero when set",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Operations external drivers submit to a world.
///
/// UI callbacks, scripted demos, and test harnesses all funnel through the
/// same surface via [`apply_control_command`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ControlCommand {
    /// Spawn a new agent at the given local coordinates.
    Spawn { x: f32, z: f32 },
    /// Start every registered agent.
    RunAll,
    /// Step every agent exactly once, regardless of run state.
    StepAll,
    /// Reset every agent to its start and begin running.
    ResetAndRunAll,
    /// Reset every agent and suppress automatic stepping.
    ResetAllAndStop,
    /// Destroy every agent.
    ClearAll,
    /// Update the shared learning rate and push it to every live agent.
    SetLearningRate(f32),
    /// Update the shared momentum mode and push it to every live agent.
    SetMomentumMode(bool),
    /// Replace the field's trig coefficients.
    SetCoefficients { a: f32, b: f32, c: f32 },
}

/// Apply a control command to the world.
pub fn apply_control_command(
    world: &mut DescentWorld,
    command: ControlCommand,
) -> Result<(), WorldError> {
    match command {
        ControlCommand::Spawn { x, z } => world.spawn(Position::new(x, z)).map(|_| ()),
        ControlCommand::RunAll => {
            world.run_all();
            Ok(())
        }
        ControlCommand::StepAll => {
            world.step_all();
            Ok(())
        }
        ControlCommand::ResetAndRunAll => {
            world.reset_and_run_all();
            Ok(())
        }
        ControlCommand::ResetAllAndStop => {
            world.reset_all_and_stop();
            Ok(())
        }
        ControlCommand::ClearAll => {
            world.clear_all();
            Ok(())
        }
        ControlCommand::SetLearningRate(value) => world.set_learning_rate_all(value),
        ControlCommand::SetMomentumMode(flag) => {
            world.set_momentum_mode_all(flag);
            Ok(())
        }
        ControlCommand::SetCoefficients { a, b, c } => world.set_coefficients(a, b, c),
    }
}

/// Aggregate state owning the surface, the agent registry, and telemetry.
///
/// Single-threaded and tick-driven: all per-agent advancement happens
/// synchronously inside [`DescentWorld::advance`], one agent after another
/// in spawn order. Agents share no mutable state except the field
/// coefficients, so that order never affects correctness; a coefficient
/// edit mid-tick is observed by every agent stepped afterwards.
pub struct DescentWorld {
    config: DescentConfig,
    field: Option<SurfaceField>,
    agents: SlotMap<AgentId, OptimizerAgent>,
    order: Vec<AgentId>,
    rng: SmallRng,
    telemetry: Box<dyn TelemetrySink>,
}

impl fmt::Debug for DescentWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescentWorld")
            .field("config", &self.config)
            .field("field", &self.field)
            .field("agent_count", &self.order.len())
            .finish()
    }
}

impl DescentWorld {
    /// Instantiate a new world using the supplied configuration.
    pub fn new(config: DescentConfig) -> Result<Self, WorldError> {
        Self::with_telemetry(config, Box::new(NullTelemetry))
    }

    /// Instantiate a new world with a display telemetry sink attached.
    pub fn with_telemetry(
        config: DescentConfig,
        telemetry: Box<dyn TelemetrySink>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        Ok(Self {
            config,
            field: None,
            agents: SlotMap::with_key(),
            order: Vec::new(),
            rng,
            telemetry,
        })
    }

    /// Install or replace the shared surface field.
    pub fn bind_field(&mut self, params: FieldParams) {
        self.field = Some(SurfaceField::new(params));
    }

    /// Replace the telemetry sink.
    pub fn set_telemetry(&mut self, telemetry: Box<dyn TelemetrySink>) {
        self.telemetry = telemetry;
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub const fn config(&self) -> &DescentConfig {
        &self.config
    }

    /// The bound surface field, if any.
    #[must_use]
    pub const fn field(&self) -> Option<&SurfaceField> {
        self.field.as_ref()
    }

    /// Mutable access to the bound surface field (for hot edits).
    #[must_use]
    pub const fn field_mut(&mut self) -> Option<&mut SurfaceField> {
        self.field.as_mut()
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.order.len()
    }

    /// Returns true when no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns true if `id` refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// Iterate over live agent handles in spawn order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.order.iter().copied()
    }

    /// Iterate over live agents in spawn order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &OptimizerAgent)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.agents.get(*id).map(|agent| (*id, agent)))
    }

    /// Borrow one agent.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&OptimizerAgent> {
        self.agents.get(id)
    }

    /// Mutably borrow one agent.
    #[must_use]
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut OptimizerAgent> {
        self.agents.get_mut(id)
    }

    /// Spawn a new agent at `start`, returning its handle.
    ///
    /// The agent is bound to the shared field with the current shared
    /// `learning_rate` and momentum mode, assigned a display color from the
    /// world RNG, and reset before returning so it begins in a consistent
    /// zero-velocity, empty-trail state.
    pub fn spawn(&mut self, start: Position) -> Result<AgentId, WorldError> {
        let field = self.field.as_ref().ok_or(WorldError::FieldMissing)?;
        let color = random_color(&mut self.rng);
        let mut agent = OptimizerAgent::from_config(&self.config, start, color);
        let report = agent.reset(field);
        let id = self.agents.insert(agent);
        self.order.push(id);
        self.telemetry.on_spawned(id, color, &report);
        Ok(id)
    }

    /// Remove an agent, dropping it from all future broadcasts.
    pub fn remove(&mut self, id: AgentId) -> Option<OptimizerAgent> {
        let agent = self.agents.remove(id)?;
        self.order.retain(|handle| *handle != id);
        self.telemetry.on_removed(id);
        Some(agent)
    }

    /// Start every registered agent. Agents already running are unaffected.
    pub fn run_all(&mut self) {
        for agent in self.agents.values_mut() {
            agent.start();
        }
    }

    /// Step every agent exactly once, regardless of run state.
    ///
    /// Enables manual single-step inspection independent of the run/stop
    /// toggle.
    pub fn step_all(&mut self) {
        let Some(field) = self.field.as_ref() else {
            return;
        };
        for id in &self.order {
            if let Some(agent) = self.agents.get_mut(*id) {
                let report = agent.step(field);
                self.telemetry.on_report(*id, &report);
            }
        }
    }

    /// Reset every agent to its start and begin running.
    ///
    /// Guarantees each agent starts its run from a clean state even if
    /// previously mid-trajectory.
    pub fn reset_and_run_all(&mut self) {
        let Some(field) = self.field.as_ref() else {
            return;
        };
        for id in &self.order {
            if let Some(agent) = self.agents.get_mut(*id) {
                let report = agent.reset(field);
                agent.start();
                self.telemetry.on_report(*id, &report);
            }
        }
    }

    /// Reset every agent and suppress automatic stepping.
    pub fn reset_all_and_stop(&mut self) {
        let Some(field) = self.field.as_ref() else {
            return;
        };
        for id in &self.order {
            if let Some(agent) = self.agents.get_mut(*id) {
                let report = agent.reset(field);
                agent.stop();
                self.telemetry.on_report(*id, &report);
            }
        }
    }

    /// Destroy every agent and its display counterpart.
    ///
    /// Subsequent broadcasts are defined no-ops until new agents spawn.
    pub fn clear_all(&mut self) {
        for id in self.order.drain(..) {
            self.agents.remove(id);
            self.telemetry.on_removed(id);
        }
    }

    /// Update the shared learning rate and push it to every live agent.
    ///
    /// Applies retroactively to in-flight trajectories.
    pub fn set_learning_rate_all(&mut self, learning_rate: f32) -> Result<(), WorldError> {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(WorldError::InvalidConfig("learning_rate must be positive"));
        }
        self.config.learning_rate = learning_rate;
        for agent in self.agents.values_mut() {
            agent.set_learning_rate(learning_rate);
        }
        Ok(())
    }

    /// Update the shared momentum mode and push it to every live agent.
    pub fn set_momentum_mode_all(&mut self, use_momentum: bool) {
        self.config.use_momentum = use_momentum;
        for agent in self.agents.values_mut() {
            agent.set_use_momentum(use_momentum);
        }
    }

    /// Replace the field's trig coefficients.
    ///
    /// No agent state is touched; trails recorded under the old field are
    /// kept as-is.
    pub fn set_coefficients(&mut self, a: f32, b: f32, c: f32) -> Result<(), WorldError> {
        let field = self.field.as_mut().ok_or(WorldError::FieldMissing)?;
        field.set_coefficients(a, b, c);
        Ok(())
    }

    /// Advance simulated time by `dt` seconds.
    ///
    /// Each running agent steps at most once, in spawn order, synchronously
    /// within this call. This is the only clock the simulation has; any
    /// driving loop works, real-time or deterministic.
    pub fn advance(&mut self, dt: f32) {
        let Some(field) = self.field.as_ref() else {
            return;
        };
        for id in &self.order {
            if let Some(agent) = self.agents.get_mut(*id)
                && let Some(report) = agent.advance(dt, field)
            {
                self.telemetry.on_report(*id, &report);
            }
        }
    }

    /// Begin automatic stepping for one agent. Returns `false` for unknown
    /// handles.
    pub fn start_agent(&mut self, id: AgentId) -> bool {
        if let Some(agent) = self.agents.get_mut(id) {
            agent.start();
            true
        } else {
            false
        }
    }

    /// Suppress automatic stepping for one agent.
    pub fn stop_agent(&mut self, id: AgentId) -> bool {
        if let Some(agent) = self.agents.get_mut(id) {
            agent.stop();
            true
        } else {
            false
        }
    }

    /// Manually step one agent, reporting the result to telemetry.
    pub fn step_agent(&mut self, id: AgentId) -> bool {
        let Some(field) = self.field.as_ref() else {
            return false;
        };
        if let Some(agent) = self.agents.get_mut(id) {
            let report = agent.step(field);
            self.telemetry.on_report(id, &report);
            true
        } else {
            false
        }
    }

    /// Reset one agent to its start, reporting the result to telemetry.
    pub fn reset_agent(&mut self, id: AgentId) -> bool {
        let Some(field) = self.field.as_ref() else {
            return false;
        };
        if let Some(agent) = self.agents.get_mut(id) {
            let report = agent.reset(field);
            self.telemetry.on_report(id, &report);
            true
        } else {
            false
        }
    }
}

/// Sample a saturated display color in the style of an HSV picker.
fn random_color(rng: &mut dyn RngCore) -> [f32; 3] {
    let hue = rng.random_range(0.0..1.0);
    let saturation = rng.random_range(0.6..1.0);
    let value = rng.random_range(0.7..1.0);
    hsv_to_rgb(hue, saturation, value)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let sector = (h * 6.0).rem_euclid(6.0);
    let i = sector.floor();
    let f = sector - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as u32 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

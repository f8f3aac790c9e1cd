use anyhow::{Context, Result};
use gradlab_core::{
    AgentId, AgentReport, ControlCommand, DescentConfig, DescentWorld, FieldParams,
    TelemetrySink, apply_control_command,
};
use tracing::{debug, info};

/// Fixed driver tick, emulating a 60 Hz display loop.
const TICK: f32 = 1.0 / 60.0;

fn main() -> Result<()> {
    init_tracing();
    let mut world = bootstrap_world()?;
    info!("Starting GradLab descent shell");

    run_demo(&mut world)?;
    report_final_state(&world);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Telemetry sink that forwards agent reports to the tracing pipeline.
struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn on_spawned(&mut self, id: AgentId, color: [f32; 3], report: &AgentReport) {
        info!(
            ?id,
            r = color[0],
            g = color[1],
            b = color[2],
            x = report.position.x,
            z = report.position.z,
            "Agent spawned",
        );
    }

    fn on_report(&mut self, id: AgentId, report: &AgentReport) {
        debug!(
            ?id,
            x = report.position.x,
            z = report.position.z,
            dfdx = report.gradient.dx,
            dfdz = report.gradient.dz,
            height = report.world.y,
            "Agent report",
        );
    }

    fn on_removed(&mut self, id: AgentId) {
        info!(?id, "Agent removed");
    }
}

fn load_config() -> Result<DescentConfig> {
    match std::env::var_os("GRADLAB_CONFIG") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config from {}", path.to_string_lossy()))?;
            serde_json::from_str(&raw).context("parsing GRADLAB_CONFIG as DescentConfig")
        }
        None => Ok(DescentConfig {
            rng_seed: Some(0x5EED_CAFE),
            ..DescentConfig::default()
        }),
    }
}

fn bootstrap_world() -> Result<DescentWorld> {
    let config = load_config()?;
    let mut world = DescentWorld::with_telemetry(config, Box::new(TracingTelemetry))?;
    world.bind_field(FieldParams::default());
    Ok(world)
}

/// Scripted stand-in for the interactive session: spawn a few agents where
/// a user would click, let them run, then restart the batch with momentum.
fn run_demo(world: &mut DescentWorld) -> Result<()> {
    let script = [
        ControlCommand::Spawn { x: 2.1, z: -1.4 },
        ControlCommand::Spawn { x: -0.7, z: 0.9 },
        ControlCommand::Spawn { x: 1.3, z: 2.6 },
        ControlCommand::RunAll,
    ];
    for command in script {
        apply_control_command(world, command)?;
    }
    advance_seconds(world, 4.0);
    log_summary(world, "vanilla run");

    apply_control_command(world, ControlCommand::SetMomentumMode(true))?;
    apply_control_command(world, ControlCommand::ResetAndRunAll)?;
    advance_seconds(world, 4.0);
    log_summary(world, "momentum run");

    apply_control_command(world, ControlCommand::ResetAllAndStop)?;
    Ok(())
}

fn advance_seconds(world: &mut DescentWorld, seconds: f32) {
    let ticks = (seconds / TICK).round() as usize;
    for _ in 0..ticks {
        world.advance(TICK);
    }
}

fn log_summary(world: &DescentWorld, phase: &str) {
    let Some(field) = world.field() else {
        return;
    };
    for (id, agent) in world.iter() {
        let position = agent.position();
        let gradient = field.gradient(position.x, position.z);
        info!(
            phase,
            ?id,
            x = position.x,
            z = position.z,
            value = field.evaluate(position.x, position.z),
            grad_norm = (gradient.dx * gradient.dx + gradient.dz * gradient.dz).sqrt(),
            trail_len = agent.trail().len(),
            "Agent summary",
        );
    }
}

fn report_final_state(world: &DescentWorld) {
    info!(
        agents = world.agent_count(),
        learning_rate = world.config().learning_rate,
        momentum_mode = world.config().use_momentum,
        "Demo complete",
    );
}

//! # Control agents
//!
//! An agent turns the latest sensor data into a control command at a fixed rate. Agents are
//! selected by [`AgentKind`] in the agent parameters and run by an [`AgentRunner`], which owns a
//! dedicated scheduler so that agent steps never wait on telemetry.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod detect;
pub mod gain_sched;
pub mod line_follow;
pub mod params;
pub mod pid;

pub use line_follow::{LineFollowAgent, LineFollower, StepReport};
pub use params::Params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use comms_if::tc::ControlCmd;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    data_store::DataStore,
    sched::{SchedError, Scheduler, TaskList},
};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A control strategy.
pub trait Agent: Send {
    fn name(&self) -> &'static str;

    /// Called once before the first step.
    fn start(&mut self);

    /// Called once after the last step. Must leave the control cell neutral.
    fn stop(&mut self);

    /// Run one control step.
    fn step(&mut self) -> StepOutcome;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Agent which never drives, only keeps the control cell neutral when stopped.
pub struct IdleAgent {
    store: Arc<DataStore>,
}

/// Runs an agent at a fixed step period.
pub struct AgentRunner {
    agent: Arc<Mutex<Box<dyn Agent>>>,
    step_period: Duration,
    scheduler: Option<Scheduler>,
    stats: Arc<Mutex<AgentStats>>,
}

/// Counters over the steps an agent has run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStats {
    pub steps: u64,
    pub not_ready: u64,
    pub line_lost: u64,
    pub tracking: u64,

    /// Most recent report from a step that ran the control law
    pub last_report: Option<StepReport>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    LineFollow,
    Idle,
}

/// Result of a single agent step.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// No frame yet or session inactive, nothing was actuated
    NotReady,

    /// Line not detected, the fallback steering was applied
    LineLost(StepReport),

    /// Line detected and tracked
    Tracking(StepReport),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("The line colour box is empty, no pixel can ever match it")]
    EmptyColourBox,

    #[error("The scan width must be non-zero")]
    ZeroScanWidth,

    #[error("The agent step period must be non-zero")]
    ZeroStepPeriod,

    #[error("Could not start the agent scheduler: {0}")]
    SchedError(#[from] SchedError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl IdleAgent {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }
}

impl Agent for IdleAgent {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn start(&mut self) {
        info!("Idle agent started");
    }

    fn stop(&mut self) {
        self.store.set_control(ControlCmd::NEUTRAL);
    }

    fn step(&mut self) -> StepOutcome {
        StepOutcome::NotReady
    }
}

impl AgentStats {
    fn record(&mut self, outcome: StepOutcome) {
        self.steps += 1;

        match outcome {
            StepOutcome::NotReady => self.not_ready += 1,
            StepOutcome::LineLost(r) => {
                self.line_lost += 1;
                self.last_report = Some(r);
            }
            StepOutcome::Tracking(r) => {
                self.tracking += 1;
                self.last_report = Some(r);
            }
        }
    }
}

impl AgentRunner {
    pub fn new(agent: Box<dyn Agent>, step_period: Duration) -> Result<Self, AgentError> {
        if step_period == Duration::from_secs(0) {
            return Err(AgentError::ZeroStepPeriod);
        }

        Ok(Self {
            agent: Arc::new(Mutex::new(agent)),
            step_period,
            scheduler: None,
            stats: Arc::new(Mutex::new(AgentStats::default())),
        })
    }

    /// Start the agent and begin stepping it. Does nothing if already running.
    pub fn start(&mut self) -> Result<(), AgentError> {
        if self.scheduler.is_some() {
            return Ok(());
        }

        let name = {
            let mut agent = self.agent.lock().expect("AgentRunner: agent mutex poisoned");
            agent.start();
            agent.name()
        };

        let agent = self.agent.clone();
        let stats = self.stats.clone();

        let mut tasks = TaskList::new();
        tasks.add("agent_step", self.step_period, false, move || {
            let outcome = agent
                .lock()
                .expect("AgentRunner: agent mutex poisoned")
                .step();
            stats
                .lock()
                .expect("AgentRunner: stats mutex poisoned")
                .record(outcome);
        });

        self.scheduler = Some(Scheduler::start("agent", tasks)?);

        info!(
            "{} agent running every {} ms",
            name,
            self.step_period.as_millis()
        );

        Ok(())
    }

    /// Stop stepping and then stop the agent. Calling it more than once has no effect.
    pub fn stop(&mut self) {
        let mut scheduler = match self.scheduler.take() {
            Some(s) => s,
            None => return,
        };

        scheduler.stop();

        self.agent
            .lock()
            .expect("AgentRunner: agent mutex poisoned")
            .stop();
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn stats(&self) -> AgentStats {
        self.stats
            .lock()
            .expect("AgentRunner: stats mutex poisoned")
            .clone()
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the agent selected in the parameters.
pub fn build(params: &Params, store: Arc<DataStore>) -> Result<Box<dyn Agent>, AgentError> {
    let agent: Box<dyn Agent> = match params.kind {
        AgentKind::LineFollow => Box::new(LineFollowAgent::new(params.clone(), store)?),
        AgentKind::Idle => Box::new(IdleAgent::new(store)),
    };

    Ok(agent)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        agent::detect::test::line_image,
        data_store::{DriveMode, SessionFlags},
    };
    use std::thread;

    fn store() -> Arc<DataStore> {
        Arc::new(DataStore::new(
            Arc::new(SessionFlags::new(DriveMode::Autonomous)),
            2,
            2,
        ))
    }

    #[test]
    fn test_build_kind() {
        let store = store();

        let agent = build(&Params::default(), store.clone()).unwrap();
        assert_eq!(agent.name(), "line_follow");

        let params = Params {
            kind: AgentKind::Idle,
            ..Params::default()
        };
        let mut agent = build(&params, store).unwrap();
        assert_eq!(agent.name(), "idle");
        assert!(matches!(agent.step(), StepOutcome::NotReady));
    }

    #[test]
    fn test_runner_lifecycle() {
        let store = store();
        store.flags.calibrate();
        store.set_latest_frame(line_image(64, 48, 10, 10..14));

        let agent = build(&Params::default(), store.clone()).unwrap();
        let mut runner = AgentRunner::new(agent, Duration::from_millis(5)).unwrap();

        runner.start().unwrap();
        runner.start().unwrap();
        assert!(runner.is_running());

        thread::sleep(Duration::from_millis(60));
        assert!(!store.control().is_neutral());

        runner.stop();
        runner.stop();

        let stats = runner.stats();
        assert!(stats.tracking > 0);
        assert_eq!(stats.steps, stats.tracking + stats.line_lost + stats.not_ready);

        // Stopping zeroes the control cell and no further step can overwrite it
        assert!(store.control().is_neutral());
        thread::sleep(Duration::from_millis(20));
        assert!(store.control().is_neutral());

        // The session stays calibrated, so a restart resumes tracking straight away
        assert!(store.flags.is_active());
        runner.start().unwrap();
        thread::sleep(Duration::from_millis(60));
        runner.stop();
        assert!(runner.stats().tracking > stats.tracking);
    }

    #[test]
    fn test_zero_period() {
        let agent = Box::new(IdleAgent::new(store()));
        assert!(matches!(
            AgentRunner::new(agent, Duration::from_secs(0)),
            Err(AgentError::ZeroStepPeriod)
        ));
    }
}

//! Main vehicle-side executable entry point.
//!
//! # Architecture
//!
//! The executable is made of a few threads sharing the data store:
//!
//!     - The main scheduler, driving the periodic ticks:
//!         - Telemetry sends, one per channel
//!         - Link watchdog
//!         - Control receive
//!         - Actuator writes
//!     - The agent runner, stepping the selected agent
//!     - The control receive worker
//!     - The simulation client, if a simulator endpoint is given
//!
//! Usage: `veh_exec [duration_s]`. Without a duration the executable runs until killed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::{
    env,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

// Internal
use comms_if::net::NetParams;
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};
use veh_lib::{
    act_client::{actuator_task, share_sink, write_neutral, RpmMap, UdpActuator},
    agent::{self, AgentRunner, AgentStats},
    data_store::{DataStore, SessionFlags},
    params::VehExecParams,
    sched::{Scheduler, TaskList, TaskStats},
    sensor_feed::SensorFeed,
    sim_client::{SimClient, SimClientStats},
    tc_client::{ControlReceiver, ControlRxStats},
    tm_server::{ChannelReport, TmServer},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Period of the main thread's run loop check.
const MAIN_LOOP_PERIOD: Duration = Duration::from_millis(100);

/// Period of the calibration check.
const CALIBRATE_TICK: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Summary of a run, written into the session directory on exit.
#[derive(Serialize)]
struct RunSummary {
    run_time_s: f64,
    agent: AgentStats,
    channels: Vec<ChannelReport>,
    control_rx: ControlRxStats,
    sim: Option<SimClientStats>,
    tasks: Vec<TaskStats>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("veh_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Vehicle Executable\n");
    info!("Running on: {}", host::get_host_desc());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- ARGUMENTS ----

    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    let run_duration = match args.len() {
        1 => {
            info!("No duration given, running until stopped");
            None
        }
        2 => {
            let secs: f64 = args[1]
                .parse()
                .wrap_err_with(|| format!("Invalid run duration \"{}\"", args[1]))?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(eyre!("Run duration must be a positive number of seconds"));
            }
            info!("Running for {:.1} s", secs);
            Some(Duration::from_secs_f64(secs))
        }
        n => {
            return Err(eyre!(
                "Expected either zero or one argument, found {}",
                n - 1
            ))
        }
    };

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;
    let agent_params: agent::Params =
        util::params::load("line_follow.toml").wrap_err("Could not load agent params")?;
    let exec_params: VehExecParams =
        util::params::load("veh_exec.toml").wrap_err("Could not load exec params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE DATASTORE ----

    let flags = Arc::new(SessionFlags::new(exec_params.drive_mode));

    if exec_params.assume_calibrated {
        flags.calibrate();
        info!("Session assumed calibrated");
    } else {
        flags.set_should_calibrate(true);
        info!("Session waiting for pose tracking before calibrating");
    }

    let store = Arc::new(DataStore::new(
        flags.clone(),
        net_params.cam.buffer_capacity,
        net_params.depth.buffer_capacity,
    ));

    let feed = Arc::new(SensorFeed::new(store.clone(), exec_params.jpeg_quality));

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let tm_server = TmServer::new(&net_params, store.clone())
        .wrap_err("Failed to initialise the TmServer")?;
    info!("TmServer initialised with {} channels", tm_server.channels().len());

    let mut control_rx =
        ControlReceiver::start(&net_params).wrap_err("Failed to start the control receiver")?;
    info!("Control receiver initialised");

    info!("Network initialisation complete");

    // ---- SCHEDULER ----

    let gate_flags = flags.clone();
    let mut tasks = TaskList::new().with_gate(move || gate_flags.is_active());

    tm_server.register(
        &mut tasks,
        Duration::from_millis(net_params.watchdog_tick_ms),
    );

    tasks.add(
        "control_rx",
        Duration::from_millis(net_params.control_rx_tick_ms),
        true,
        control_rx.tick_task(store.clone()),
    );

    let actuator = match exec_params.actuator {
        Some(ref act) => {
            let sink = share_sink(
                UdpActuator::new(&act.endpoint, RpmMap::from_params(act))
                    .wrap_err("Failed to initialise the actuator")?,
            );
            tasks.add(
                "actuator",
                Duration::from_millis(act.tick_ms),
                true,
                actuator_task(sink.clone(), store.clone()),
            );
            Some(sink)
        }
        None => {
            info!("No actuator configured");
            None
        }
    };

    let cal_flags = flags.clone();
    tasks.add("calibrate", CALIBRATE_TICK, false, move || {
        if cal_flags.should_calibrate() && cal_flags.is_tracking() {
            cal_flags.calibrate();
            info!("Calibration complete, session active");
        }
    });

    let mut scheduler = Scheduler::start("veh_exec", tasks).wrap_err("Failed to start the scheduler")?;

    // ---- AGENT ----

    let built_agent =
        agent::build(&agent_params, store.clone()).wrap_err("Failed to build the agent")?;
    let mut agent_runner = AgentRunner::new(
        built_agent,
        Duration::from_millis(agent_params.step_period_ms),
    )
    .wrap_err("Failed to create the agent runner")?;
    agent_runner.start().wrap_err("Failed to start the agent")?;

    // ---- SIMULATION ----

    let mut sim_client = match net_params.sim_endpoint {
        Some(ref endpoint) => Some(
            SimClient::start(endpoint, net_params.recv_buffer_size, feed.clone())
                .wrap_err("Failed to start the SimClient")?,
        ),
        None => {
            info!("No simulator endpoint, waiting on external sensor data");
            None
        }
    };

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    let start = Instant::now();

    loop {
        if let Some(d) = run_duration {
            if start.elapsed() >= d {
                info!("Run duration elapsed, stopping");
                break;
            }
        }

        thread::sleep(MAIN_LOOP_PERIOD);
    }

    // ---- SHUTDOWN ----

    if let Some(ref mut c) = sim_client {
        c.stop();
    }
    agent_runner.stop();
    scheduler.stop();
    if let Some(ref sink) = actuator {
        if let Err(e) = write_neutral(sink) {
            warn!("Could not stop the actuator: {}", e);
        }
    }
    control_rx.stop();
    tm_server.shutdown();
    store.drain();

    let summary = RunSummary {
        run_time_s: start.elapsed().as_secs_f64(),
        agent: agent_runner.stats(),
        channels: tm_server.report(),
        control_rx: control_rx.stats(),
        sim: sim_client.as_ref().map(|c| c.stats()),
        tasks: scheduler.stats().to_vec(),
    };

    info!(
        "Agent stepped {} times ({} tracking, {} line lost)",
        summary.agent.steps, summary.agent.tracking, summary.agent.line_lost
    );

    let summary_path = session.path("run_summary.json");
    match serde_json::to_string_pretty(&summary) {
        Ok(s) => std::fs::write(&summary_path, s)
            .wrap_err_with(|| format!("Could not write the run summary to {:?}", summary_path))?,
        Err(e) => warn!("Could not serialise the run summary: {}", e),
    }

    info!("End of execution");

    Ok(())
}

//! # Scheduler
//!
//! Runs a set of periodic tasks from a single driving thread. Each task fires once its interval
//! has elapsed since it last fired, the very first poll fires every task. Gated tasks only fire
//! while the gate (usually "session active") is open.
//!
//! All task actions must be non-blocking, a slow task delays every other task on the same
//! scheduler.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error};
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest the driving thread sleeps between polls, bounds the latency of `stop()`.
const MAX_POLL_SLEEP: Duration = Duration::from_millis(5);

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

pub type TaskAction = Box<dyn FnMut() + Send>;

pub type Gate = Box<dyn Fn() -> bool + Send>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The set of tasks run by a scheduler.
pub struct TaskList {
    tasks: Vec<Task>,
    gate: Option<Gate>,
}

struct Task {
    interval: Duration,
    gated: bool,
    last_fired: Option<Instant>,
    action: TaskAction,
    stats: TaskStats,
}

/// Counters for one task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub name: String,

    /// Number of times the task has fired
    pub fired: u64,

    /// Number of polls on which the task was due but its gate was closed
    pub gated_out: u64,
}

/// Drives a [`TaskList`] from a background thread.
pub struct Scheduler {
    name: String,
    run: Arc<AtomicBool>,
    jh: Option<JoinHandle<Vec<TaskStats>>>,
    stats: Vec<TaskStats>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("Could not spawn the {0} scheduler thread: {1}")]
    SpawnError(String, io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskList {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            gate: None,
        }
    }

    /// Set the gate consulted by gated tasks. Without a gate gated tasks always fire.
    pub fn with_gate<G>(mut self, gate: G) -> Self
    where
        G: Fn() -> bool + Send + 'static,
    {
        self.gate = Some(Box::new(gate));
        self
    }

    /// Register a new task.
    pub fn add<F>(&mut self, name: &str, interval: Duration, gated: bool, action: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.tasks.push(Task {
            interval,
            gated,
            last_fired: None,
            action: Box::new(action),
            stats: TaskStats {
                name: name.into(),
                ..Default::default()
            },
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Fire every task due at `now`, returning how many fired.
    pub fn poll(&mut self, now: Instant) -> usize {
        let gate_open = match self.gate {
            Some(ref g) => g(),
            None => true,
        };

        let mut num_fired = 0;

        for task in self.tasks.iter_mut() {
            let due = match task.last_fired {
                Some(t) => now.saturating_duration_since(t) >= task.interval,
                None => true,
            };

            if !due {
                continue;
            }

            if task.gated && !gate_open {
                task.stats.gated_out += 1;
                continue;
            }

            (task.action)();
            task.last_fired = Some(now);
            task.stats.fired += 1;
            num_fired += 1;
        }

        num_fired
    }

    /// Time from `now` until the next task becomes due.
    pub fn time_to_next(&self, now: Instant) -> Duration {
        self.tasks
            .iter()
            .map(|t| match t.last_fired {
                Some(last) => (last + t.interval).saturating_duration_since(now),
                None => Duration::from_secs(0),
            })
            .min()
            .unwrap_or(MAX_POLL_SLEEP)
    }

    pub fn stats(&self) -> Vec<TaskStats> {
        self.tasks.iter().map(|t| t.stats.clone()).collect()
    }
}

impl Scheduler {
    /// Start driving the tasks on a new thread.
    pub fn start(name: &str, mut tasks: TaskList) -> Result<Self, SchedError> {
        let run = Arc::new(AtomicBool::new(true));
        let run_clone = run.clone();

        let jh = thread::Builder::new()
            .name(format!("{}_sched", name))
            .spawn(move || {
                while run_clone.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    tasks.poll(now);
                    thread::sleep(tasks.time_to_next(Instant::now()).min(MAX_POLL_SLEEP));
                }

                // Tasks, and every reference they hold, are dropped with the thread
                tasks.stats()
            })
            .map_err(|e| SchedError::SpawnError(name.into(), e))?;

        debug!("{} scheduler started", name);

        Ok(Self {
            name: name.into(),
            run,
            jh: Some(jh),
            stats: Vec::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.jh.is_some()
    }

    /// Stop the scheduler and wait for its thread to exit.
    ///
    /// Once this returns no task will fire again. Calling it more than once has no effect.
    pub fn stop(&mut self) {
        let jh = match self.jh.take() {
            Some(jh) => jh,
            None => return,
        };

        self.run.store(false, Ordering::Relaxed);

        match jh.join() {
            Ok(stats) => self.stats = stats,
            Err(_) => error!("{} scheduler thread panicked", self.name),
        }

        debug!("{} scheduler stopped", self.name);
    }

    /// Task counters, available once the scheduler has stopped.
    pub fn stats(&self) -> &[TaskStats] {
        &self.stats
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_poll_intervals() {
        let (fast, fast_fn) = counter();
        let (slow, slow_fn) = counter();

        let mut tasks = TaskList::new();
        tasks.add("fast", Duration::from_millis(10), false, fast_fn);
        tasks.add("slow", Duration::from_millis(50), false, slow_fn);

        let t0 = Instant::now();

        // First poll fires everything
        assert_eq!(tasks.poll(t0), 2);

        for i in 1..=10 {
            tasks.poll(t0 + Duration::from_millis(10 * i));
        }

        assert_eq!(fast.load(Ordering::SeqCst), 11);
        assert_eq!(slow.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gate() {
        let open = Arc::new(AtomicBool::new(false));
        let (gated, gated_fn) = counter();
        let (free, free_fn) = counter();

        let open_clone = open.clone();
        let mut tasks = TaskList::new().with_gate(move || open_clone.load(Ordering::SeqCst));
        tasks.add("gated", Duration::from_millis(10), true, gated_fn);
        tasks.add("free", Duration::from_millis(10), false, free_fn);

        let t0 = Instant::now();
        tasks.poll(t0);
        tasks.poll(t0 + Duration::from_millis(10));
        assert_eq!(gated.load(Ordering::SeqCst), 0);
        assert_eq!(free.load(Ordering::SeqCst), 2);

        // Opening the gate fires the gated task straight away, it was never fired before
        open.store(true, Ordering::SeqCst);
        tasks.poll(t0 + Duration::from_millis(15));
        assert_eq!(gated.load(Ordering::SeqCst), 1);

        let stats = tasks.stats();
        assert_eq!(stats[0].name, "gated");
        assert_eq!(stats[1].name, "free");
        assert_eq!(stats[0].gated_out, 2);
        assert_eq!(stats[0].fired, 1);
    }

    #[test]
    fn test_time_to_next() {
        let (_, f) = counter();
        let mut tasks = TaskList::new();
        tasks.add("t", Duration::from_millis(40), false, f);

        let t0 = Instant::now();
        assert_eq!(tasks.time_to_next(t0), Duration::from_secs(0));

        tasks.poll(t0);
        assert_eq!(
            tasks.time_to_next(t0 + Duration::from_millis(15)),
            Duration::from_millis(25)
        );
    }

    #[test]
    fn test_stop_idempotent() {
        let (count, f) = counter();

        let mut tasks = TaskList::new();
        tasks.add("tick", Duration::from_millis(1), false, f);

        let mut sched = Scheduler::start("test", tasks).unwrap();
        thread::sleep(Duration::from_millis(30));

        sched.stop();
        assert!(!sched.is_running());
        let fired = count.load(Ordering::SeqCst);
        assert!(fired > 0);
        assert_eq!(sched.stats()[0].fired as usize, fired);

        // Nothing fires after stop, and the task's reference to the counter is gone
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), fired);
        assert_eq!(Arc::strong_count(&count), 1);

        sched.stop();
    }
}

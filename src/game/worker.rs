//! Simulation worker: one OS thread owning one simulation, fed by a command queue

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::arena::{Simulation, StepResult};
use super::ActionVector;

type Reply = oneshot::Sender<Result<StepResult, WorkerError>>;

/// Commands executed strictly in enqueue order
pub enum WorkerCommand {
    Attach(Box<dyn Simulation>),
    Advance {
        step_length: f32,
        actions: Vec<ActionVector>,
        reply: Reply,
    },
    AdvanceOnly {
        step_length: f32,
    },
    Reset {
        reply: Reply,
    },
    Shutdown,
}

impl WorkerCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Attach(_) => "attach",
            Self::Advance { .. } => "advance",
            Self::AdvanceOnly { .. } => "advance_only",
            Self::Reset { .. } => "reset",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Thread running, no simulation attached yet
    Idle,
    Running,
    /// Shut down, or poisoned by a panic
    Stopped,
}

/// Pending result of an `Advance` or `Reset`
#[derive(Debug)]
pub struct StepHandle {
    rx: oneshot::Receiver<Result<StepResult, WorkerError>>,
}

impl StepHandle {
    /// Block the calling thread until the worker answers.
    ///
    /// Must not be called from inside an async runtime; use `recv` there.
    pub fn wait(self) -> Result<StepResult, WorkerError> {
        self.rx
            .blocking_recv()
            .map_err(|_| WorkerError::Disconnected)?
    }

    pub async fn recv(self) -> Result<StepResult, WorkerError> {
        self.rx.await.map_err(|_| WorkerError::Disconnected)?
    }
}

/// Handle to the worker thread
pub struct SimWorker {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    state: Arc<Mutex<WorkerState>>,
    thread: Option<JoinHandle<()>>,
}

impl SimWorker {
    /// Start an idle worker with no simulation attached
    pub fn spawn() -> Result<Self, WorkerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(WorkerState::Idle));
        let thread_state = Arc::clone(&state);

        let thread = thread::Builder::new()
            .name("sim-worker".to_string())
            .spawn(move || run_worker(rx, thread_state))
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            tx,
            state,
            thread: Some(thread),
        })
    }

    /// Start a worker and attach `simulation` as its first command
    pub fn with_simulation(simulation: impl Simulation) -> Result<Self, WorkerError> {
        let worker = Self::spawn()?;
        worker.attach(simulation)?;
        Ok(worker)
    }

    pub fn attach(&self, simulation: impl Simulation) -> Result<(), WorkerError> {
        self.send(WorkerCommand::Attach(Box::new(simulation)))
    }

    pub fn advance(
        &self,
        step_length: f32,
        actions: Vec<ActionVector>,
    ) -> Result<StepHandle, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerCommand::Advance {
            step_length,
            actions,
            reply,
        })?;
        Ok(StepHandle { rx })
    }

    /// Fire-and-forget physics sub-step
    pub fn advance_only(&self, step_length: f32) -> Result<(), WorkerError> {
        self.send(WorkerCommand::AdvanceOnly { step_length })
    }

    pub fn reset(&self) -> Result<StepHandle, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerCommand::Reset { reply })?;
        Ok(StepHandle { rx })
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Enqueue `Shutdown` and join the thread.
    ///
    /// Commands queued before this still run. Calling twice is harmless.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // The thread may already be gone after a fatal sequencing error
        let _ = self.tx.send(WorkerCommand::Shutdown);
        if thread.join().is_err() {
            warn!("Sim worker thread exited with a panic");
        }
        *self.state.lock() = WorkerState::Stopped;
    }

    fn send(&self, command: WorkerCommand) -> Result<(), WorkerError> {
        if self.thread.is_none() {
            return Err(WorkerError::Disconnected);
        }
        self.tx
            .send(command)
            .map_err(|_| WorkerError::Disconnected)
    }
}

impl Drop for SimWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks the worker stopped however the thread exits
struct StoppedOnExit(Arc<Mutex<WorkerState>>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        *self.0.lock() = WorkerState::Stopped;
    }
}

fn run_worker(mut rx: mpsc::UnboundedReceiver<WorkerCommand>, state: Arc<Mutex<WorkerState>>) {
    let _guard = StoppedOnExit(Arc::clone(&state));
    let mut simulation: Option<Box<dyn Simulation>> = None;
    // Set once a command panicked; later commands are refused with it
    let mut poisoned: Option<String> = None;

    debug!("Sim worker started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            WorkerCommand::Shutdown => break,
            WorkerCommand::Attach(sim) => {
                if poisoned.is_none() {
                    debug!(players = sim.num_players(), "Simulation attached");
                    simulation = Some(sim);
                    *state.lock() = WorkerState::Running;
                }
            }
            command => {
                if let Some(message) = &poisoned {
                    refuse(command, message);
                    continue;
                }
                let Some(sim) = simulation.as_mut() else {
                    error!(command = command.name(), "Command sent to a worker with no simulation attached");
                    panic!("sim worker received {} before a simulation was attached", command.name());
                };
                if let Err(message) = execute(sim.as_mut(), command) {
                    error!(error = %message, "Simulation panicked, stopping worker");
                    *state.lock() = WorkerState::Stopped;
                    poisoned = Some(message);
                }
            }
        }
    }

    debug!("Sim worker stopped");
}

/// Run one command, returning the panic message if the simulation panicked
fn execute(sim: &mut dyn Simulation, command: WorkerCommand) -> Result<(), String> {
    match command {
        WorkerCommand::Advance {
            step_length,
            actions,
            reply,
        } => {
            let result = catch_unwind(AssertUnwindSafe(|| sim.advance(step_length, &actions)))
                .map_err(panic_message);
            respond(reply, result)
        }
        WorkerCommand::AdvanceOnly { step_length } => {
            catch_unwind(AssertUnwindSafe(|| sim.advance_only(step_length))).map_err(panic_message)
        }
        WorkerCommand::Reset { reply } => {
            let result = catch_unwind(AssertUnwindSafe(|| sim.reset())).map_err(panic_message);
            respond(reply, result)
        }
        WorkerCommand::Attach(_) | WorkerCommand::Shutdown => Ok(()),
    }
}

fn respond(reply: Reply, result: Result<StepResult, String>) -> Result<(), String> {
    match result {
        Ok(step) => {
            // The caller may have stopped waiting; that is its business
            let _ = reply.send(Ok(step));
            Ok(())
        }
        Err(message) => {
            let _ = reply.send(Err(WorkerError::Panicked(message.clone())));
            Err(message)
        }
    }
}

fn refuse(command: WorkerCommand, message: &str) {
    match command {
        WorkerCommand::Advance { reply, .. } | WorkerCommand::Reset { reply } => {
            let _ = reply.send(Err(WorkerError::Panicked(message.to_string())));
        }
        _ => {}
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Simulation panicked: {0}")]
    Panicked(String),

    #[error("Worker thread is gone")]
    Disconnected,
}

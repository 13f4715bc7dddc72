//! Worker lifecycle state machine.

use color_eyre::{eyre::eyre, Result};

/// Lifecycle states of one cache worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, nothing installed yet
  New,
  /// Install in progress (pre-caching the manifest)
  Installing,
  /// Installed, waiting to take over
  Installed,
  /// Activation in progress (evicting stale stores)
  Activating,
  /// Active and controlling the fetch path
  Activated,
  /// Failed or superseded, permanently out of service
  Redundant,
}

impl WorkerState {
  /// Only an activated worker serves the cache-first fetch path.
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Activated)
  }
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::New => write!(f, "new"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// Tracks the state of one worker version and enforces legal transitions.
#[derive(Debug)]
pub struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self {
      state: WorkerState::New,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  pub fn begin_install(&mut self) -> Result<()> {
    self.transition(WorkerState::New, WorkerState::Installing)
  }

  /// Install finished; the worker is waiting and has already signalled
  /// readiness to supersede whatever version is active.
  pub fn finish_install(&mut self) -> Result<()> {
    self.transition(WorkerState::Installing, WorkerState::Installed)?;
    self.skip_waiting = true;
    Ok(())
  }

  /// Activation may start from `Installed`, or from `New` when a restarted
  /// process activates a version installed by an earlier one.
  pub fn begin_activate(&mut self) -> Result<()> {
    match self.state {
      WorkerState::Installed | WorkerState::New => {
        self.state = WorkerState::Activating;
        Ok(())
      }
      other => Err(eyre!("Cannot activate from state '{}'", other)),
    }
  }

  pub fn finish_activate(&mut self) -> Result<()> {
    self.transition(WorkerState::Activating, WorkerState::Activated)
  }

  /// Reattach to an already-installed version: straight to `Activated`,
  /// the way a restarted worker resumes control without re-installing.
  pub fn resume(&mut self) -> Result<()> {
    self.transition(WorkerState::New, WorkerState::Activated)
  }

  pub fn request_skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  /// Permanently take this worker out of service.
  pub fn fail(&mut self) {
    self.state = WorkerState::Redundant;
  }

  fn transition(&mut self, from: WorkerState, to: WorkerState) -> Result<()> {
    if self.state != from {
      return Err(eyre!(
        "Invalid lifecycle transition to '{}' from '{}' (expected '{}')",
        to,
        self.state,
        from
      ));
    }
    self.state = to;
    Ok(())
  }
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}

//! Shutter and flap state machines.
//!
//! Both actuators follow the same two-phase protocol: `control()` only issues
//! the open/close command, and the terminal state is observed by later
//! `refresh()` calls made from the poll loop.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::channel::ByteChannel;
use crate::error::CommandOutcome;
use crate::protocol::{ActuatorReport, Command, DomeLink, LinkError};

/// Which actuator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
pub enum ActuatorKind {
    Shutter,
    Flap,
}

impl ActuatorKind {
    /// Status query for this actuator.
    pub fn query(&self) -> Command {
        match self {
            ActuatorKind::Shutter => Command::GetShutter,
            ActuatorKind::Flap => Command::GetFlap,
        }
    }

    /// Open or close command for this actuator.
    pub fn command(&self, target: ActuatorTarget) -> Command {
        match (self, target) {
            (ActuatorKind::Shutter, ActuatorTarget::Open) => Command::OpenShutter,
            (ActuatorKind::Shutter, ActuatorTarget::Close) => Command::CloseShutter,
            (ActuatorKind::Flap, ActuatorTarget::Open) => Command::OpenFlap,
            (ActuatorKind::Flap, ActuatorTarget::Close) => Command::CloseFlap,
        }
    }
}

/// Observed actuator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
pub enum ActuatorState {
    Open,
    Closed,
    Moving,
    #[default]
    Unknown,
}

/// Requested end state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ActuatorTarget {
    Open,
    Close,
}

impl ActuatorTarget {
    /// Terminal state reached when this target completes.
    pub fn terminal_state(&self) -> ActuatorState {
        match self {
            ActuatorTarget::Open => ActuatorState::Open,
            ActuatorTarget::Close => ActuatorState::Closed,
        }
    }
}

/// Human-readable description; defined for every state.
pub fn describe(kind: ActuatorKind, state: ActuatorState) -> String {
    match state {
        ActuatorState::Open => format!("{kind} is open."),
        ActuatorState::Closed => format!("{kind} is closed."),
        ActuatorState::Moving => format!("{kind} is in motion."),
        ActuatorState::Unknown => format!("{kind} status is unknown."),
    }
}

/// The requested travel finished: Moving before, and now the terminal state
/// of `target`.
fn completed_target(
    previous: ActuatorState,
    current: ActuatorState,
    target: Option<ActuatorTarget>,
) -> Option<ActuatorTarget> {
    let target = target?;
    (previous == ActuatorState::Moving && current == target.terminal_state()).then_some(target)
}

/// Tracked state of one actuator.
#[derive(Debug, Clone)]
pub struct Actuator {
    kind: ActuatorKind,
    state: ActuatorState,
    target: Option<ActuatorTarget>,
    faulted: bool,
    completed: Option<ActuatorTarget>,
}

impl Actuator {
    pub fn new(kind: ActuatorKind) -> Self {
        Self {
            kind,
            state: ActuatorState::Unknown,
            target: None,
            faulted: false,
            completed: None,
        }
    }

    pub fn kind(&self) -> ActuatorKind {
        self.kind
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    pub fn target(&self) -> Option<ActuatorTarget> {
        self.target
    }

    /// Last status reply was not understood.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Target reached by the most recent refresh, if that refresh observed
    /// the end of travel.
    pub fn just_completed(&self) -> Option<ActuatorTarget> {
        self.completed
    }

    pub fn describe(&self) -> String {
        describe(self.kind, self.state)
    }

    /// Issue an open or close command.
    pub fn control<C: ByteChannel>(
        &mut self,
        link: &mut DomeLink<C>,
        target: ActuatorTarget,
    ) -> CommandOutcome {
        self.target = Some(target);

        let outcome = link.execute(self.kind.command(target));
        match &outcome {
            CommandOutcome::Accepted => {
                self.state = ActuatorState::Moving;
                self.faulted = false;
                match target {
                    ActuatorTarget::Open => info!("{} is opening...", self.kind),
                    ActuatorTarget::Close => info!("{} is closing...", self.kind),
                }
            }
            CommandOutcome::Rejected => error!("{} {target} request was rejected", self.kind),
            CommandOutcome::Error(e) => error!("{} {target} request failed: {e}", self.kind),
        }
        outcome
    }

    /// Query the controller and update the tracked state.
    ///
    /// Transport failures leave the previous state in place; an unintelligible
    /// reply marks the actuator Unknown and faulted.
    pub fn refresh<C: ByteChannel>(
        &mut self,
        link: &mut DomeLink<C>,
    ) -> Result<ActuatorState, LinkError> {
        self.completed = None;
        let report = match link.query_actuator(self.kind.query()) {
            Ok(report) => report,
            Err(e) => {
                if e.is_protocol() {
                    self.mark_faulted();
                }
                error!("{} status query failed: {e}", self.kind);
                return Err(e);
            }
        };

        let previous = self.state;
        self.state = match report {
            ActuatorReport::Open => ActuatorState::Open,
            ActuatorReport::Closed => ActuatorState::Closed,
            ActuatorReport::Running => ActuatorState::Moving,
            ActuatorReport::Other(suffix) => {
                error!("Unknown {} status: {suffix}", self.kind);
                self.mark_faulted();
                return Ok(self.state);
            }
        };
        self.faulted = false;

        self.completed = completed_target(previous, self.state, self.target);
        match self.completed {
            Some(ActuatorTarget::Open) => info!("{} is open.", self.kind),
            Some(ActuatorTarget::Close) => info!("{} is closed.", self.kind),
            None => {}
        }

        Ok(self.state)
    }

    fn mark_faulted(&mut self) {
        self.state = ActuatorState::Unknown;
        self.faulted = true;
    }
}

//! Lifecycle of a single chat turn.
//!
//! ```text
//! Preparing -> Executing -> Streaming -> Finalizing -> Succeeded
//!     |            |            |            |
//!     +------------+------------+------------+--> Failed | Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use strum_macros::{Display, EnumString};
use thiserror::Error;

const MAX_LOG_SIZE: usize = 32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TurnState {
    /// Loading the session, writing the human message, building the workflow
    Preparing,
    /// Execution requested, no output headers written yet
    Executing,
    /// Response headers are out and engine output is being relayed
    Streaming,
    /// The run has returned; result is being inspected
    Finalizing,
    Succeeded,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self, target) {
            (_, Self::Failed | Self::Cancelled) => true,
            (Self::Preparing, Self::Executing) => true,
            (Self::Executing, Self::Streaming) => true,
            (Self::Streaming, Self::Finalizing) => true,
            (Self::Finalizing, Self::Succeeded) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum TurnEvent {
    Prepared,
    StreamOpened,
    RunReturned,
    Completed,
    Failed(String),
    Cancelled,
}

impl TurnEvent {
    fn target(&self, from: TurnState) -> Option<TurnState> {
        match (from, self) {
            (TurnState::Preparing, Self::Prepared) => Some(TurnState::Executing),
            (TurnState::Executing, Self::StreamOpened) => Some(TurnState::Streaming),
            (TurnState::Streaming, Self::RunReturned) => Some(TurnState::Finalizing),
            (TurnState::Finalizing, Self::Completed) => Some(TurnState::Succeeded),
            (_, Self::Failed(_)) => Some(TurnState::Failed),
            (_, Self::Cancelled) => Some(TurnState::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid turn transition from {from} on event {event}")]
    InvalidTransition { from: TurnState, event: TurnEvent },

    #[error("Cannot process event {event} in terminal turn state {state}")]
    TerminalState { state: TurnState, event: TurnEvent },
}

#[derive(Debug, Clone)]
pub struct TurnTransition {
    pub from: TurnState,
    pub event: TurnEvent,
    pub to: TurnState,
    pub timestamp: DateTime<Utc>,
}

/// Validates turn state changes and keeps a short log of them.
#[derive(Debug)]
pub struct TurnStateMachine {
    current_state: TurnState,
    log: VecDeque<TurnTransition>,
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: TurnState::Preparing,
            log: VecDeque::with_capacity(8),
        }
    }

    pub fn current_state(&self) -> TurnState {
        self.current_state
    }

    pub fn log(&self) -> &VecDeque<TurnTransition> {
        &self.log
    }

    pub fn handle_event(&mut self, event: TurnEvent) -> Result<TurnState, TransitionError> {
        let from = self.current_state;
        if from.is_terminal() {
            return Err(TransitionError::TerminalState { state: from, event });
        }

        let to = match event.target(from) {
            Some(to) if from.can_transition_to(to) => to,
            _ => return Err(TransitionError::InvalidTransition { from, event }),
        };

        self.current_state = to;
        self.log.push_back(TurnTransition {
            from,
            event,
            to,
            timestamp: Utc::now(),
        });
        while self.log.len() > MAX_LOG_SIZE {
            self.log.pop_front();
        }

        Ok(to)
    }

    /// Applies `event`, logging instead of failing when it does not apply.
    pub fn advance(&mut self, event: TurnEvent) -> TurnState {
        if let Err(e) = self.handle_event(event) {
            tracing::debug!(error = %e, "[ChatHub] Ignoring turn event");
        }
        self.current_state
    }
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

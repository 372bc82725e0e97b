//! MIDI learn session
//!
//! Captures the next qualifying event and assigns its trigger to a target
//! binding. Capture and commit are separate steps when the trigger already
//! belongs to another binding, so the performer confirms before a control
//! is taken away from it.
//!
//! ```text
//! Idle ──start──► Listening ──event (free key)──────────► Idle
//!                    │  ▲
//!                    │  └──confirm(false), fresh deadline──┐
//!                    ├──event (owned key)──► Resolving ────┤
//!                    │                          └─confirm(true)──► Idle
//!                    └──deadline passed──► TimedOut ──next tick──► Idle
//! ```
//!
//! Time is passed in explicitly (`now`) so the owner drives the deadline
//! from its own tick.

use crate::binding::BindingTable;
use crate::input::MidiInputEvent;
use crate::types::TriggerKey;
use crate::MidiError;
use std::time::{Duration, Instant};

/// Default time a learn session waits for input
pub const DEFAULT_LEARN_TIMEOUT: Duration = Duration::from_secs(10);

/// Learn session state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LearnStatus {
    /// No session; input flows to the dispatcher
    #[default]
    Idle,
    /// Waiting for the next qualifying event
    Listening { target: String },
    /// Captured a trigger owned by another binding; waiting for a decision
    Resolving {
        target: String,
        candidate: TriggerKey,
        conflicting: String,
    },
    /// No qualifying event arrived before the deadline (until the next tick)
    TimedOut { target: String },
}

/// Result of a learn step, reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    /// Trigger assigned to the target binding
    Assigned {
        binding_id: String,
        trigger: TriggerKey,
        /// Binding that lost the trigger (after a confirmed reassignment)
        replaced: Option<String>,
    },
    /// Trigger is owned by another binding; call `confirm_reassign`
    Conflict {
        target: String,
        candidate: TriggerKey,
        conflicting: String,
    },
    /// Reassignment declined; listening again
    Declined { target: String },
    /// Nothing received before the deadline
    TimedOut { target: String },
    /// Target binding was removed while the session was active
    TargetMissing { target: String },
}

/// Handle returned when a session starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnHandle {
    pub binding_id: String,
    pub deadline: Instant,
}

/// Single learn session state machine
#[derive(Debug, Clone)]
pub struct LearnSession {
    status: LearnStatus,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl Default for LearnSession {
    fn default() -> Self {
        Self::new(DEFAULT_LEARN_TIMEOUT)
    }
}

impl LearnSession {
    pub fn new(timeout: Duration) -> Self {
        Self {
            status: LearnStatus::Idle,
            deadline: None,
            timeout,
        }
    }

    pub fn status(&self) -> &LearnStatus {
        &self.status
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether input is currently diverted away from the dispatcher
    pub fn is_intercepting(&self) -> bool {
        matches!(
            self.status,
            LearnStatus::Listening { .. } | LearnStatus::Resolving { .. }
        )
    }

    /// Begin listening for `target`
    ///
    /// An active session is cancelled first; its target is returned.
    pub fn start(
        &mut self,
        target: impl Into<String>,
        now: Instant,
    ) -> (LearnHandle, Option<String>) {
        let cancelled = match &self.status {
            LearnStatus::Listening { target } | LearnStatus::Resolving { target, .. } => {
                Some(target.clone())
            }
            _ => None,
        };

        let target = target.into();
        let deadline = now + self.timeout;
        self.status = LearnStatus::Listening {
            target: target.clone(),
        };
        self.deadline = Some(deadline);

        log::info!(
            "MIDI: Learn started for '{}' ({} ms)",
            target,
            self.timeout.as_millis()
        );

        (
            LearnHandle {
                binding_id: target,
                deadline,
            },
            cancelled,
        )
    }

    /// Return to idle without touching the table
    ///
    /// Returns false if there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        if self.status == LearnStatus::Idle {
            return false;
        }
        log::info!("MIDI: Learn cancelled ({:?})", self.status);
        self.reset();
        true
    }

    /// Apply the deadline
    ///
    /// A timed-out session stays `TimedOut` until the next tick, then
    /// returns to `Idle`.
    pub fn tick(&mut self, now: Instant) -> Option<LearnOutcome> {
        let target = match &self.status {
            LearnStatus::Listening { target } => target,
            LearnStatus::TimedOut { .. } => {
                self.reset();
                return None;
            }
            _ => return None,
        };
        match self.deadline {
            Some(deadline) if now > deadline => {
                let target = target.clone();
                log::info!("MIDI: Learn for '{}' timed out, no input received", target);
                self.status = LearnStatus::TimedOut {
                    target: target.clone(),
                };
                self.deadline = None;
                Some(LearnOutcome::TimedOut { target })
            }
            _ => None,
        }
    }

    /// Offer an event to the session
    ///
    /// Only learnable events while listening produce an outcome; anything
    /// else is swallowed while the session intercepts.
    pub fn capture(
        &mut self,
        event: &MidiInputEvent,
        table: &mut BindingTable,
    ) -> Option<LearnOutcome> {
        let LearnStatus::Listening { target } = &self.status else {
            return None;
        };
        if !event.is_learnable() {
            log::trace!("MIDI: Learn ignoring {:?}", event);
            return None;
        }
        let candidate = event.trigger_key()?;
        let target = target.clone();

        if !table.contains(&target) {
            log::warn!("MIDI: Learn target '{}' no longer exists", target);
            self.reset();
            return Some(LearnOutcome::TargetMissing { target });
        }

        if let Some(owner) = table.owner_of(&candidate) {
            if owner != target {
                let conflicting = owner.to_string();
                log::info!(
                    "MIDI: {} already bound to '{}', asking before reassigning to '{}'",
                    candidate,
                    conflicting,
                    target
                );
                self.status = LearnStatus::Resolving {
                    target: target.clone(),
                    candidate,
                    conflicting: conflicting.clone(),
                };
                return Some(LearnOutcome::Conflict {
                    target,
                    candidate,
                    conflicting,
                });
            }
        }

        Some(self.commit(table, target, candidate, None))
    }

    /// Resolve a pending conflict
    ///
    /// `true` moves the trigger to the target (leaving the other binding
    /// unbound); `false` keeps both bindings and listens again with a fresh
    /// deadline.
    pub fn confirm_reassign(
        &mut self,
        accept: bool,
        table: &mut BindingTable,
        now: Instant,
    ) -> Result<LearnOutcome, MidiError> {
        let LearnStatus::Resolving {
            target,
            candidate,
            conflicting,
        } = self.status.clone()
        else {
            return Err(MidiError::NotResolving);
        };

        if !accept {
            log::info!("MIDI: Reassignment declined, listening again for '{}'", target);
            self.status = LearnStatus::Listening {
                target: target.clone(),
            };
            self.deadline = Some(now + self.timeout);
            return Ok(LearnOutcome::Declined { target });
        }

        if !table.contains(&target) {
            log::warn!("MIDI: Learn target '{}' no longer exists", target);
            self.reset();
            return Ok(LearnOutcome::TargetMissing { target });
        }

        // Whoever owns the candidate now gives it up
        let owner = table
            .owner_of(&candidate)
            .filter(|owner| *owner != target)
            .map(str::to_string);
        let replaced = match owner {
            Some(owner) => {
                table.clear_trigger(&owner)?;
                Some(owner)
            }
            None => {
                log::debug!(
                    "MIDI: '{}' released {} before reassignment",
                    conflicting,
                    candidate
                );
                None
            }
        };

        Ok(self.commit(table, target, candidate, replaced))
    }

    fn commit(
        &mut self,
        table: &mut BindingTable,
        target: String,
        trigger: TriggerKey,
        replaced: Option<String>,
    ) -> LearnOutcome {
        self.reset();
        match table.assign_trigger(&target, trigger) {
            Ok(previous) => {
                log::info!(
                    "MIDI: Learned {} for '{}' (was {})",
                    trigger,
                    target,
                    previous.map_or_else(|| "unbound".to_string(), |t| t.to_string())
                );
                LearnOutcome::Assigned {
                    binding_id: target,
                    trigger,
                    replaced,
                }
            }
            Err(e) => {
                log::warn!("MIDI: Failed to commit learned trigger: {}", e);
                LearnOutcome::TargetMissing { target }
            }
        }
    }

    fn reset(&mut self) {
        self.status = LearnStatus::Idle;
        self.deadline = None;
    }
}

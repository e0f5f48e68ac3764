//! [`ScriptedGrounding`] – deterministic grounding stand-in.
//!
//! Queued responses are consumed first-in first-out; once a queue is empty
//! the configured default is returned for every further call.  This makes
//! "fails verification once, then succeeds" a one-liner:
//!
//! ```rust
//! use handeye_perception::ScriptedGrounding;
//!
//! let grounding = ScriptedGrounding::new().then_verify(false);
//! // first verify -> false, every later verify -> true (the default)
//! # drop(grounding);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use handeye_types::{Action, Frame, GroundingError};

use crate::grounding::GroundingClient;

/// One call observed by a [`ScriptedGrounding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroundingCall {
    Plan(String),
    Verify(String),
}

/// A grounding client that replays scripted answers.
pub struct ScriptedGrounding {
    plans: VecDeque<Result<Action, GroundingError>>,
    verdicts: VecDeque<Result<bool, GroundingError>>,
    default_action: Action,
    default_verdict: bool,
    calls: Arc<Mutex<Vec<GroundingCall>>>,
}

impl Default for ScriptedGrounding {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGrounding {
    /// Taps the centre of the screen and always verifies `true`.
    pub fn new() -> Self {
        Self {
            plans: VecDeque::new(),
            verdicts: VecDeque::new(),
            default_action: Action::tap(0.5, 0.5),
            default_verdict: true,
            calls: Arc::default(),
        }
    }

    pub fn with_default_action(mut self, action: Action) -> Self {
        self.default_action = action;
        self
    }

    pub fn with_default_verdict(mut self, verdict: bool) -> Self {
        self.default_verdict = verdict;
        self
    }

    /// Queue one planned action.
    pub fn then_plan(mut self, action: Action) -> Self {
        self.plans.push_back(Ok(action));
        self
    }

    /// Queue one planning failure.
    pub fn then_plan_error(mut self, err: GroundingError) -> Self {
        self.plans.push_back(Err(err));
        self
    }

    /// Queue one verification verdict.
    pub fn then_verify(mut self, verdict: bool) -> Self {
        self.verdicts.push_back(Ok(verdict));
        self
    }

    /// Queue one verification failure.
    pub fn then_verify_error(mut self, err: GroundingError) -> Self {
        self.verdicts.push_back(Err(err));
        self
    }

    /// Shared view of the calls made so far.
    pub fn calls(&self) -> Arc<Mutex<Vec<GroundingCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: GroundingCall) {
        lock(&self.calls).push(call);
    }
}

/// Lock a call log, tolerating poisoning from a panicked test thread.
pub(crate) fn lock(calls: &Mutex<Vec<GroundingCall>>) -> MutexGuard<'_, Vec<GroundingCall>> {
    calls.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl GroundingClient for ScriptedGrounding {
    async fn plan(&mut self, _frame: &Frame, goal: &str) -> Result<Action, GroundingError> {
        self.record(GroundingCall::Plan(goal.to_string()));
        self.plans
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_action.clone()))
    }

    async fn verify(&mut self, _frame: &Frame, goal: &str) -> Result<bool, GroundingError> {
        self.record(GroundingCall::Verify(goal.to_string()));
        self.verdicts
            .pop_front()
            .unwrap_or(Ok(self.default_verdict))
    }
}

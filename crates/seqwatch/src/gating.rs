//! Decides whether list polling should run, and how often, from the
//! statuses currently held and whether anyone is looking.

use std::time::Duration;

use serde::Serialize;

use crate::config::PollingConfig;
use crate::model::{StatusClass, StatusSource};

/// Urgency tier picked from the held statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Something is running.
    Fast,
    /// Something is queued, nothing running.
    Medium,
    /// Everything is terminal.
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub fast: Duration,
    pub medium: Duration,
    pub slow: Duration,
}

impl PollIntervals {
    pub fn for_tier(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Fast => self.fast,
            Tier::Medium => self.medium,
            Tier::Slow => self.slow,
        }
    }
}

impl From<&PollingConfig> for PollIntervals {
    fn from(config: &PollingConfig) -> Self {
        Self {
            fast: config.fast(),
            medium: config.medium(),
            slow: config.slow(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub enabled: bool,
    pub tier: Tier,
    pub interval: Duration,
    /// Polling should restart with an immediate refresh.
    pub resumed: bool,
}

#[derive(Debug, Clone)]
pub struct PollGate {
    intervals: PollIntervals,
    visible: bool,
    /// Whether the last evaluation saw non-terminal work; `None` before
    /// the first evaluation.
    had_pending: Option<bool>,
    resume_on_visible: bool,
}

impl PollGate {
    /// Creates a gate for a visible view.
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            visible: true,
            had_pending: None,
            resume_on_visible: false,
        }
    }

    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Records whether the hosting view is visible. Takes effect on the
    /// next [`evaluate`](Self::evaluate).
    pub fn set_visible(&mut self, visible: bool) {
        if visible && !self.visible {
            self.resume_on_visible = true;
        }
        if !visible {
            self.resume_on_visible = false;
        }
        self.visible = visible;
    }

    pub fn evaluate<'a, S, I>(&mut self, records: I) -> GateDecision
    where
        S: StatusSource + 'a,
        I: IntoIterator<Item = &'a S>,
    {
        let mut any_active = false;
        let mut any_queued = false;
        for record in records {
            match record.current_status().class() {
                StatusClass::Active => any_active = true,
                StatusClass::Queued => any_queued = true,
                StatusClass::Terminal => {}
            }
        }

        let tier = if any_active {
            Tier::Fast
        } else if any_queued {
            Tier::Medium
        } else {
            Tier::Slow
        };
        let has_pending = any_active || any_queued;
        let enabled = has_pending && self.visible;

        let came_back = self.had_pending == Some(false) && has_pending;
        let resumed = enabled && (came_back || self.resume_on_visible);

        if came_back {
            log::debug!("Non-terminal work appeared, resuming polling");
        }
        self.had_pending = Some(has_pending);
        if self.visible {
            self.resume_on_visible = false;
        }

        GateDecision {
            enabled,
            tier,
            interval: self.intervals.for_tier(tier),
            resumed,
        }
    }
}

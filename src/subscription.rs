//! Per-list subscription state machine.
//!
//! Transitions never perform I/O: each returns the control message the caller
//! should send, and the caller confirms a successful subscribe send so a failed
//! send is retried on the next poll.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::protocol::ControlMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    AwaitingSnapshot,
    Ready,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubscriptionState::Unsubscribed => "unsubscribed",
            SubscriptionState::Subscribing => "subscribing",
            SubscriptionState::AwaitingSnapshot => "awaiting_snapshot",
            SubscriptionState::Ready => "ready",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    list: String,
    state: SubscriptionState,
    snapshot_timeout: Duration,
    deadline: Option<Instant>,
    resync_quiet_until: Option<Instant>,
}

impl Subscription {
    pub fn new(list: impl Into<String>, snapshot_timeout: Duration) -> Self {
        Self {
            list: list.into(),
            state: SubscriptionState::Unsubscribed,
            snapshot_timeout,
            deadline: None,
            resync_quiet_until: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_ready(&self) -> bool {
        self.state == SubscriptionState::Ready
    }

    /// Transport is up: restart the cycle.
    pub fn begin(&mut self) -> ControlMessage {
        self.state = SubscriptionState::Subscribing;
        self.deadline = None;
        self.resync_quiet_until = None;
        ControlMessage::SubscribeList {
            list: self.list.clone(),
        }
    }

    /// The subscribe request reached the transport; start waiting for a snapshot.
    pub fn subscribe_sent(&mut self, now: Instant) {
        if self.state == SubscriptionState::Subscribing {
            self.state = SubscriptionState::AwaitingSnapshot;
            self.deadline = Some(now + self.snapshot_timeout);
        }
    }

    pub fn snapshot_applied(&mut self) {
        self.state = SubscriptionState::Ready;
        self.deadline = None;
        self.resync_quiet_until = None;
    }

    /// A delta arrived with no baseline to apply it to.
    pub fn delta_before_ready(&mut self, now: Instant) -> Option<ControlMessage> {
        match self.state {
            SubscriptionState::Subscribing | SubscriptionState::AwaitingSnapshot => {
                self.request_resync(now)
            }
            SubscriptionState::Unsubscribed | SubscriptionState::Ready => None,
        }
    }

    /// The viewing surface became visible again.
    pub fn became_visible(&mut self, now: Instant) -> Option<ControlMessage> {
        if self.state == SubscriptionState::Ready {
            self.request_resync(now)
        } else {
            None
        }
    }

    /// Timer step: retries a pending subscribe and resyncs on snapshot timeout.
    pub fn poll(&mut self, now: Instant) -> Option<ControlMessage> {
        match self.state {
            SubscriptionState::Subscribing => Some(ControlMessage::SubscribeList {
                list: self.list.clone(),
            }),
            SubscriptionState::AwaitingSnapshot => match self.deadline {
                Some(deadline) if now >= deadline => {
                    self.resync_quiet_until = None;
                    self.request_resync(now)
                }
                _ => None,
            },
            SubscriptionState::Unsubscribed | SubscriptionState::Ready => None,
        }
    }

    pub fn disconnected(&mut self) {
        self.state = SubscriptionState::Unsubscribed;
        self.deadline = None;
        self.resync_quiet_until = None;
    }

    fn request_resync(&mut self, now: Instant) -> Option<ControlMessage> {
        if matches!(self.resync_quiet_until, Some(until) if now < until) {
            return None;
        }

        self.resync_quiet_until = Some(now + self.snapshot_timeout);
        if self.state == SubscriptionState::AwaitingSnapshot {
            self.deadline = Some(now + self.snapshot_timeout);
        }
        Some(ControlMessage::Resync {
            list: self.list.clone(),
        })
    }
}

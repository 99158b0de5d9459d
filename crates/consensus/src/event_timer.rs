//! One-shot timers feeding the consensus event queue
//!
//! Timer tasks never touch consensus state: on expiry they only enqueue an
//! [`Event::Timer`]. Since a task can fire right before being cancelled,
//! every armed timer carries a sequence number and the worker checks each
//! received event with [`EventTimer::accept`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use n0_future::task::AbortOnDropHandle;
use snafu::{OptionExt as _, Snafu};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use vbft_consensus_core::height::{Height, View};

use crate::event::Event;

const LOG_TARGET: &str = "vbft::consensus::timer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum TimerKind {
    /// Leader's delay before proposing
    Round,
    ProposeBlock,
    EndorseBlock,
    CommitBlock,
    ChangeView,
    PeerHeartbeat,
}

impl TimerKind {
    /// Whether the delay grows with the view number
    fn backs_off(self) -> bool {
        matches!(
            self,
            TimerKind::ProposeBlock
                | TimerKind::EndorseBlock
                | TimerKind::CommitBlock
                | TimerKind::ChangeView
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub kind: TimerKind,
    pub round: Height,
    pub view: View,
    seq: u64,
}

#[derive(Debug, Snafu)]
#[snafu(display("No delay configured for timer kind {kind}"))]
pub struct UnknownEventKindError {
    kind: TimerKind,
}

pub type EventTimerResult<T> = Result<T, UnknownEventKindError>;

pub struct EventTimer {
    delays: BTreeMap<TimerKind, Duration>,
    max_backoff_exp: u32,
    armed: HashMap<(TimerKind, Height), (u64, AbortOnDropHandle<()>)>,
    current_round: Height,
    next_seq: u64,
    event_tx: mpsc::Sender<Event>,
}

impl EventTimer {
    pub fn new(
        delays: BTreeMap<TimerKind, Duration>,
        max_backoff_exp: u32,
        event_tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            delays,
            max_backoff_exp,
            armed: HashMap::new(),
            current_round: Height::ZERO,
            next_seq: 0,
            event_tx,
        }
    }

    pub fn current_round(&self) -> Height {
        self.current_round
    }

    /// Arm the [`TimerKind::Round`] timer with an explicit delay
    pub fn start_timer(&mut self, round: Height, delay: Duration) {
        self.arm(TimerKind::Round, round, View::ZERO, delay);
    }

    /// Arm a timer of `kind`, with the configured delay for it
    pub fn start_event_timer(
        &mut self,
        kind: TimerKind,
        round: Height,
        view: View,
    ) -> EventTimerResult<()> {
        let base = *self.delays.get(&kind).context(UnknownEventKindSnafu { kind })?;

        let delay = if kind.backs_off() {
            base.saturating_mul(1u32 << view.to_number().min(self.max_backoff_exp).min(31))
        } else {
            base
        };

        self.arm(kind, round, view, delay);
        Ok(())
    }

    fn arm(&mut self, kind: TimerKind, round: Height, view: View, delay: Duration) {
        if round < self.current_round {
            trace!(target: LOG_TARGET, %kind, %round, "Ignoring timer for past round");
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let event = TimerEvent {
            kind,
            round,
            view,
            seq,
        };
        let event_tx = self.event_tx.clone();
        let handle = AbortOnDropHandle::new(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(Event::Timer(event)).await;
        }));

        trace!(target: LOG_TARGET, %kind, %round, %view, ?delay, "Timer armed");
        // Replacing drops (and so aborts) the previous task
        self.armed.insert((kind, round), (seq, handle));
    }

    pub fn cancel_timer(&mut self, round: Height) {
        self.cancel_event_timer(TimerKind::Round, round);
    }

    pub fn cancel_event_timer(&mut self, kind: TimerKind, round: Height) {
        if self.armed.remove(&(kind, round)).is_some() {
            trace!(target: LOG_TARGET, %kind, %round, "Timer cancelled");
        }
    }

    /// Cancel timers of every kind for `round`
    pub fn cancel_round(&mut self, round: Height) {
        self.armed.retain(|(_, r), _| *r != round);
    }

    /// Move to a new round, cancelling every timer of the earlier ones
    pub fn set_current_round(&mut self, round: Height) {
        if round <= self.current_round {
            return;
        }
        debug!(target: LOG_TARGET, %round, "Advancing timer round");
        self.current_round = round;
        self.armed.retain(|(_, r), _| round <= *r);
    }

    /// Check a received timer event is still current, disarming it if so
    ///
    /// Returns `false` for events of timers that were cancelled or replaced
    /// after they already fired.
    pub fn accept(&mut self, event: &TimerEvent) -> bool {
        let key = (event.kind, event.round);
        match self.armed.get(&key) {
            Some((seq, _)) if *seq == event.seq => {
                self.armed.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, kind: TimerKind, round: Height) -> bool {
        self.armed.contains_key(&(kind, round))
    }
}

#[cfg(test)]
mod tests;

use crate::config::HeartbeatConfig;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};

/// Outcome of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Reply seen recently enough; a new ping should go out.
    Alive,
    /// No reply within `interval + timeout`; the socket must be closed.
    Dead { silent_for: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    Tick,
    ReplyDeadline,
}

/// Ping/pong liveness tracking for one connected session.
///
/// Created when the socket opens and dropped when it closes, which cancels
/// both timers. Only [`Heartbeat::check`] may declare the connection dead; the
/// reply deadline merely reports a late pong.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_pong: Instant,
    last_ping: Option<Instant>,
    ticker: Interval,
    reply_deadline: Option<Pin<Box<Sleep>>>,
}

impl Heartbeat {
    pub fn start(config: HeartbeatConfig) -> Self {
        let now = Instant::now();
        let period = config.interval().max(Duration::from_millis(1));
        let mut ticker = interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            config,
            last_pong: now,
            last_ping: None,
            ticker,
            reply_deadline: None,
        }
    }

    /// Waits for the next tick or reply deadline.
    pub async fn next(&mut self) -> HeartbeatEvent {
        let fired = tokio::select! {
            _ = self.ticker.tick() => HeartbeatEvent::Tick,
            _ = wait_deadline(&mut self.reply_deadline) => HeartbeatEvent::ReplyDeadline,
        };
        if fired == HeartbeatEvent::ReplyDeadline {
            self.reply_deadline = None;
        }
        fired
    }

    pub fn check(&self, now: Instant) -> Liveness {
        let silent_for = now.saturating_duration_since(self.last_pong);
        if silent_for > self.config.interval() + self.config.timeout() {
            Liveness::Dead { silent_for }
        } else {
            Liveness::Alive
        }
    }

    /// Marks a ping as sent and arms the reply deadline.
    pub fn ping_sent(&mut self, now: Instant) {
        self.last_ping = Some(now);
        self.reply_deadline = Some(Box::pin(sleep(self.config.timeout())));
    }

    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = now;
    }

    /// True when the last ping has not been answered yet.
    pub fn reply_overdue(&self) -> bool {
        matches!(self.last_ping, Some(ping) if self.last_pong < ping)
    }

    pub fn last_pong(&self) -> Instant {
        self.last_pong
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }
}

async fn wait_deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{trace, warn};

use super::{CloseReason, Session};
use crate::shared_types::CONTROL_ID;
use crate::wire::FrameType;

// -----------------------------------------------------------------------------
// ----- Pulse -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    Quiet,
    Ping,
    Dead,
}

// -----------------------------------------------------------------------------
// ----- HeartbeatMonitor ------------------------------------------------------

/// Per-session keep-alive. Every `interval` it looks at how long the session
/// has gone without an inbound frame: past one interval it queues a PING,
/// past `missed_threshold` intervals it closes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMonitor {
    interval: Duration,
    missed_threshold: u32,
}

impl HeartbeatMonitor {
    /// `None` when `interval` is zero, which disables the heartbeat.
    pub fn new(interval: Duration, missed_threshold: u32) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }

        Some(Self {
            interval,
            missed_threshold: missed_threshold.max(1),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Duration {
        self.interval.saturating_mul(self.missed_threshold)
    }

    pub fn check(&self, idle: Duration) -> Pulse {
        if idle >= self.deadline() {
            Pulse::Dead
        } else if idle >= self.interval {
            Pulse::Ping
        } else {
            Pulse::Quiet
        }
    }

    pub fn spawn(self, session: Arc<Session>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = session.closed() => break,

                    _ = ticker.tick() => match self.check(session.idle_for()) {
                        Pulse::Quiet => {}
                        Pulse::Ping => {
                            // a full queue only means the peer is busy
                            if session.send_control(FrameType::Ping, CONTROL_ID).is_ok() {
                                trace!("{} {} ping", session.role(), session.conn_id());
                            }
                        }
                        Pulse::Dead => {
                            warn!(
                                "{} {} missed {} heartbeats, closing",
                                session.role(),
                                session.conn_id(),
                                self.missed_threshold
                            );
                            session.close(CloseReason::HeartbeatTimeout);
                            break;
                        }
                    },
                }
            }
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Role, SessionSettings};
    use crate::shared_types::{ConnId, SessionState};

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn zero_interval_disables() {
        assert!(HeartbeatMonitor::new(Duration::ZERO, 3).is_none());
    }

    #[test]
    fn pings_after_one_interval_and_dies_after_threshold() {
        let hb = HeartbeatMonitor::new(SECOND, 3).unwrap();

        assert_eq!(hb.check(Duration::from_millis(999)), Pulse::Quiet);
        assert_eq!(hb.check(SECOND), Pulse::Ping);
        assert_eq!(hb.check(SECOND * 2), Pulse::Ping);
        assert_eq!(hb.check(SECOND * 3), Pulse::Dead);
    }

    fn active_client() -> (Arc<Session>, tokio::sync::mpsc::Receiver<crate::wire::Packet>) {
        let (session, rx) = Session::new(
            ConnId(1),
            None,
            SessionSettings {
                role: Role::Client,
                buffer_size: 64,
                send_queue_size: 8,
                max_virtual_conns: None,
                ping_interval: SECOND,
            },
        );
        session.set_state(SessionState::Active);
        (session, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reader_is_not_idle() {
        let (session, mut rx) = active_client();
        let handle = HeartbeatMonitor::new(SECOND, 3)
            .unwrap()
            .spawn(session.clone());

        let stall = session.stall();
        tokio::time::sleep(SECOND * 10).await;

        assert!(session.close_reason().is_none());
        assert!(rx.try_recv().is_err());

        drop(stall);
        handle.await.unwrap();
        assert_eq!(session.close_reason(), Some(CloseReason::HeartbeatTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_is_pinged_then_closed() {
        let (session, mut rx) = Session::new(
            ConnId(1),
            None,
            SessionSettings {
                role: Role::Client,
                buffer_size: 64,
                send_queue_size: 8,
                max_virtual_conns: None,
                ping_interval: SECOND,
            },
        );
        session.set_state(SessionState::Active);

        let handle = HeartbeatMonitor::new(SECOND, 3)
            .unwrap()
            .spawn(session.clone());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), FrameType::Ping);

        handle.await.unwrap();
        assert_eq!(session.close_reason(), Some(CloseReason::HeartbeatTimeout));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------

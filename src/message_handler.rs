//! Per-outgoing-message retry state machine (C8, §4.8): `INIT → SEND →
//! WAIT → {SEND (on retry) | SUCCESS | REJECT | TIMEOUT | CANCEL}`.
//!
//! `current_timeout` tracks the total elapsed time, from the handler's
//! start, at which the *next* retransmit or give-up is due — not the
//! relative wait itself. Re-arming the timer computes the delta between
//! that absolute target and the elapsed time already spent, which is what
//! reproduces the published schedule (count=2, base=30s, scale=1.5 fires
//! retransmits at t=0, 30, 45 and gives up at t=67.5, not t=0, 30, 75).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ax25::Frame;
use crate::interface::{AX25Interface, TransmitHandle};
use crate::signal::Signal;
use crate::time::{self, SharedRandom};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Init,
    Send,
    Wait,
    Success,
    Reject,
    Timeout,
    Cancel,
}

impl HandlerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandlerState::Success | HandlerState::Reject | HandlerState::Timeout | HandlerState::Cancel
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub retransmit_count: u32,
    pub retransmit_timeout_base: Duration,
    pub retransmit_timeout_rand: Duration,
    pub retransmit_timeout_scale: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            retransmit_count: 2,
            retransmit_timeout_base: Duration::from_secs(30),
            retransmit_timeout_rand: Duration::from_secs(5),
            retransmit_timeout_scale: 1.5,
        }
    }
}

struct Inner {
    state: HandlerState,
    retries_remaining: u32,
    elapsed: Duration,
    current_timeout: Duration,
    in_flight: Option<TransmitHandle>,
}

/// Drives retransmission of a single outgoing APRS message until it is
/// ACKed, REJected, cancelled, or exhausts its retries.
pub struct APRSMessageHandler {
    frame: Frame,
    interface: Arc<AX25Interface>,
    random: SharedRandom,
    config: RetryConfig,
    inner: Mutex<Inner>,
    timer: Mutex<Option<time::CancelToken>>,
    fired: AtomicBool,
    pub done: Signal<HandlerState>,
}

impl std::fmt::Debug for APRSMessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("APRSMessageHandler")
            .field("frame", &self.frame)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl APRSMessageHandler {
    pub fn new(
        frame: Frame,
        interface: Arc<AX25Interface>,
        random: SharedRandom,
        config: RetryConfig,
    ) -> Arc<Self> {
        let retries_remaining = config.retransmit_count;
        Arc::new(APRSMessageHandler {
            frame,
            interface,
            random,
            config,
            inner: Mutex::new(Inner {
                state: HandlerState::Init,
                retries_remaining,
                elapsed: Duration::ZERO,
                current_timeout: Duration::ZERO,
                in_flight: None,
            }),
            timer: Mutex::new(None),
            fired: AtomicBool::new(false),
            done: Signal::new(),
        })
    }

    pub fn state(&self) -> HandlerState {
        self.inner.lock().unwrap().state
    }

    /// Sends the first transmit attempt and arms the retry timer. Call
    /// exactly once, immediately after registering the handler.
    pub fn start(self: &Arc<Self>) {
        let jitter = self.random.uniform(self.config.retransmit_timeout_rand.as_secs_f64());
        let first_timeout =
            time::secs_f64(self.config.retransmit_timeout_base.as_secs_f64() + jitter);
        self.inner.lock().unwrap().current_timeout = first_timeout;
        self.transmit();
        self.arm(first_timeout);
    }

    fn transmit(self: &Arc<Self>) {
        let handle = self.interface.transmit(self.frame.clone(), None).ok();
        let mut inner = self.inner.lock().unwrap();
        inner.state = HandlerState::Send;
        inner.in_flight = handle;
        inner.state = HandlerState::Wait;
    }

    fn arm(self: &Arc<Self>, wait: Duration) {
        let this = self.clone();
        let token = time::schedule(wait, async move {
            this.on_timer();
        });
        *self.timer.lock().unwrap() = Some(token);
    }

    fn on_timer(self: &Arc<Self>) {
        let wait = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.elapsed = inner.current_timeout;
            if inner.retries_remaining == 0 {
                inner.state = HandlerState::Timeout;
                None
            } else {
                inner.retries_remaining -= 1;
                let new_timeout = time::secs_f64(
                    inner.current_timeout.as_secs_f64() * self.config.retransmit_timeout_scale,
                );
                let wait = new_timeout.saturating_sub(inner.elapsed);
                inner.current_timeout = new_timeout;
                Some(wait)
            }
        };
        match wait {
            Some(wait) => {
                self.transmit();
                self.arm(wait);
            }
            None => self.finish(HandlerState::Timeout),
        }
    }

    /// Called by C7 on receipt of an `ack<msgid>` addressed to us.
    pub fn on_ack(self: &Arc<Self>) {
        self.finish(HandlerState::Success);
    }

    /// Called by C7 on receipt of a `rej<msgid>` addressed to us.
    pub fn on_reject(self: &Arc<Self>) {
        self.finish(HandlerState::Reject);
    }

    pub fn cancel(self: &Arc<Self>) {
        if let Some(handle) = self.inner.lock().unwrap().in_flight.take() {
            self.interface.cancel_transmit(&handle);
        }
        self.finish(HandlerState::Cancel);
    }

    fn finish(self: &Arc<Self>, state: HandlerState) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = state;
        }
        if let Some(token) = self.timer.lock().unwrap().take() {
            token.cancel();
        }
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.done.emit(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsign::{Callsign, Path};
    use crate::error::Error;
    use crate::interface::{FrameSink, InterfaceConfig};
    use crate::router::Router;
    use crate::time::FixedRandom;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        sent_at: Arc<StdMutex<Vec<tokio::time::Instant>>>,
    }

    impl FrameSink for RecordingSink {
        fn send(&self, _data: Bytes) -> Result<(), Error> {
            self.sent_at.lock().unwrap().push(tokio::time::Instant::now());
            Ok(())
        }
    }

    fn message() -> Frame {
        Frame::Ui {
            path: Path::new(Callsign::new("APRS", 0), Callsign::new("N0CALL", 0)),
            pf: false,
            pid: 0xF0,
            payload: Bytes::from_static(b":N0CALL-5:hi{1"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn s5_retransmit_schedule_and_timeout() {
        let sent_at = Arc::new(StdMutex::new(Vec::new()));
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink { sent_at: sent_at.clone() });
        let iface = AX25Interface::new(
            sink,
            &Signal::new(),
            Arc::new(Router::new()),
            Arc::new(FixedRandom::zero()),
            crate::ax25::Modulo::Mod8,
            InterfaceConfig {
                cts_delay: Duration::ZERO,
                cts_rand: Duration::ZERO,
            },
        );
        let config = RetryConfig {
            retransmit_count: 2,
            retransmit_timeout_base: Duration::from_secs(30),
            retransmit_timeout_rand: Duration::ZERO,
            retransmit_timeout_scale: 1.5,
        };
        let handler = APRSMessageHandler::new(message(), iface, Arc::new(FixedRandom::zero()), config);
        let done_state = Arc::new(StdMutex::new(None));
        let d = done_state.clone();
        handler.done.connect(move |s| *d.lock().unwrap() = Some(*s));

        let start = tokio::time::Instant::now();
        handler.start();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(15)).await;
        tokio::task::yield_now().await;

        let offsets: Vec<Duration> = sent_at.lock().unwrap().iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![Duration::from_secs(0), Duration::from_secs(30), Duration::from_secs(45)]
        );
        assert_eq!(handler.state(), HandlerState::Wait);

        tokio::time::advance(Duration::from_millis(22_500)).await;
        tokio::task::yield_now().await;
        assert_eq!(handler.state(), HandlerState::Timeout);
        assert_eq!(*done_state.lock().unwrap(), Some(HandlerState::Timeout));
    }

    #[tokio::test]
    async fn ack_reaches_success_and_fires_done_once() {
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink {
            sent_at: Arc::new(StdMutex::new(Vec::new())),
        });
        let iface = AX25Interface::new(
            sink,
            &Signal::new(),
            Arc::new(Router::new()),
            Arc::new(FixedRandom::zero()),
            crate::ax25::Modulo::Mod8,
            InterfaceConfig::default(),
        );
        let handler = APRSMessageHandler::new(
            message(),
            iface,
            Arc::new(FixedRandom::zero()),
            RetryConfig::default(),
        );
        let fire_count = Arc::new(StdMutex::new(0));
        let f = fire_count.clone();
        handler.done.connect(move |_| *f.lock().unwrap() += 1);

        handler.start();
        handler.on_ack();
        handler.on_ack();
        handler.on_reject();

        assert_eq!(handler.state(), HandlerState::Success);
        assert_eq!(*fire_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_is_terminal_and_cancels_in_flight_transmit() {
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink {
            sent_at: Arc::new(StdMutex::new(Vec::new())),
        });
        let iface = AX25Interface::new(
            sink,
            &Signal::new(),
            Arc::new(Router::new()),
            Arc::new(FixedRandom::zero()),
            crate::ax25::Modulo::Mod8,
            InterfaceConfig::default(),
        );
        let handler = APRSMessageHandler::new(
            message(),
            iface,
            Arc::new(FixedRandom::zero()),
            RetryConfig::default(),
        );
        handler.start();
        handler.cancel();
        assert_eq!(handler.state(), HandlerState::Cancel);
        handler.on_ack();
        assert_eq!(handler.state(), HandlerState::Cancel, "terminal state does not change");
    }
}

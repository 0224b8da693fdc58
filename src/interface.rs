//! The AX.25 interface and CSMA-style transmit scheduler (C5): the one
//! piece of this crate that owns a real event loop. Everything here runs
//! single-threaded-cooperative per §5 — the `Mutex`es exist only to let
//! the scheduled-callback closures reach back into the interface; they
//! are never held across an `.await`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::ax25::{self, Frame, Modulo};
use crate::error::Error;
use crate::kiss::KissPort;
use crate::router::Router;
use crate::signal::Signal;
use crate::time::{self, SharedRandom};

/// Decouples the scheduler from the concrete KISS transport so it can be
/// driven by a fake sink in tests without standing up a byte stream.
pub trait FrameSink: Send + Sync {
    fn send(&self, data: Bytes) -> Result<(), Error>;
}

impl FrameSink for KissPort {
    fn send(&self, data: Bytes) -> Result<(), Error> {
        KissPort::send(self, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediumState {
    Idle,
    RxCooldown,
    TxCooldown,
}

#[derive(Debug, Clone, Copy)]
pub struct InterfaceConfig {
    pub cts_delay: std::time::Duration,
    pub cts_rand: std::time::Duration,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        InterfaceConfig {
            cts_delay: std::time::Duration::from_millis(100),
            cts_rand: std::time::Duration::from_millis(100),
        }
    }
}

/// Returned by [`AX25Interface::transmit`]; identifies one queued record
/// for [`AX25Interface::cancel_transmit`]. Two transmits of
/// value-identical frames get distinct handles, per spec ("by identity,
/// not value").
#[derive(Debug, Clone)]
pub struct TransmitHandle(Arc<AtomicBool>);

impl TransmitHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type OnSent = Box<dyn FnOnce(&Frame) + Send>;

struct TxRecord {
    frame: Frame,
    encoded: Vec<u8>,
    on_sent: Option<OnSent>,
    cancelled: Arc<AtomicBool>,
}

/// CSMA-style transmit scheduler and receive dispatcher for one KISS
/// port.
pub struct AX25Interface {
    sink: Arc<dyn FrameSink>,
    router: Arc<Router>,
    random: SharedRandom,
    modulo: Modulo,
    config: InterfaceConfig,
    state: Mutex<MediumState>,
    queue: Mutex<VecDeque<TxRecord>>,
    timer: Mutex<Option<time::CancelToken>>,
    pub received_msg: Signal<Frame>,
    /// Emitted by [`AX25Interface::close`]; C7 subscribes to this to fail
    /// its outstanding message handlers (§7: "device-closed errors cancel
    /// and fail all queued transmits and outstanding message handlers").
    pub closed: Signal<()>,
}

impl AX25Interface {
    pub fn new(
        sink: Arc<dyn FrameSink>,
        received: &Signal<Bytes>,
        router: Arc<Router>,
        random: SharedRandom,
        modulo: Modulo,
        config: InterfaceConfig,
    ) -> Arc<Self> {
        let iface = Arc::new(AX25Interface {
            sink,
            router,
            random,
            modulo,
            config,
            state: Mutex::new(MediumState::Idle),
            queue: Mutex::new(VecDeque::new()),
            timer: Mutex::new(None),
            received_msg: Signal::new(),
            closed: Signal::new(),
        });
        let weak = Arc::downgrade(&iface);
        received.connect(move |bytes: &Bytes| {
            if let Some(iface) = weak.upgrade() {
                iface.on_received(bytes.clone());
            }
        });
        iface
    }

    /// Encodes and enqueues `frame`. Encode failures (e.g. too many
    /// digipeaters) are surfaced immediately; nothing is queued.
    pub fn transmit(
        self: &Arc<Self>,
        frame: Frame,
        on_sent: Option<OnSent>,
    ) -> Result<TransmitHandle, Error> {
        let encoded = ax25::encode(&frame)?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = TransmitHandle(cancelled.clone());
        self.queue.lock().unwrap().push_back(TxRecord {
            frame,
            encoded,
            on_sent,
            cancelled,
        });
        self.pump();
        Ok(handle)
    }

    /// Best-effort cancellation: a no-op if the record already left the
    /// queue.
    pub fn cancel_transmit(&self, handle: &TransmitHandle) {
        handle.cancel();
    }

    /// Cancels every queued transmit, e.g. on KISS port close.
    pub fn cancel_all(&self) {
        for record in self.queue.lock().unwrap().iter() {
            record.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Called when this interface's underlying device has closed: cancels
    /// every queued transmit and notifies subscribers (§5/§7). The caller
    /// is responsible for wiring the concrete device's close/error signal
    /// to this method, e.g. `kiss_port.closed.connect(move |_| iface.close())`.
    pub fn close(&self) {
        self.cancel_all();
        self.closed.emit(&());
    }

    fn pump(self: &Arc<Self>) {
        loop {
            if *self.state.lock().unwrap() != MediumState::Idle {
                return;
            }
            let record = match self.queue.lock().unwrap().pop_front() {
                Some(r) => r,
                None => return,
            };
            if record.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = self.sink.send(Bytes::from(record.encoded)) {
                log::error!("ax25: failed to submit frame to KISS port: {e}");
                continue;
            }
            self.enter_cooldown(MediumState::TxCooldown);
            if let Some(on_sent) = record.on_sent {
                on_sent(&record.frame);
            }
            return;
        }
    }

    fn on_received(self: &Arc<Self>, bytes: Bytes) {
        let decoded = ax25::decode(&bytes, self.modulo);
        self.enter_cooldown(MediumState::RxCooldown);
        match decoded {
            Ok(frame) => {
                self.received_msg.emit(&frame);
                self.router.dispatch(&frame);
            }
            Err(e) => log::warn!("ax25: dropping malformed frame: {e}"),
        }
    }

    fn enter_cooldown(self: &Arc<Self>, which: MediumState) {
        *self.state.lock().unwrap() = which;
        let jitter = self.random.uniform(self.config.cts_rand.as_secs_f64());
        let delay = time::secs_f64(self.config.cts_delay.as_secs_f64() + jitter);
        let iface = self.clone();
        let token = time::schedule(delay, async move {
            *iface.state.lock().unwrap() = MediumState::Idle;
            iface.pump();
        });
        *self.timer.lock().unwrap() = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsign::{Callsign, Path};
    use crate::time::FixedRandom;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingSink {
        sent: Arc<StdMutex<Vec<(Bytes, std::time::Instant)>>>,
    }

    impl FrameSink for RecordingSink {
        fn send(&self, data: Bytes) -> Result<(), Error> {
            self.sent.lock().unwrap().push((data, std::time::Instant::now()));
            Ok(())
        }
    }

    fn ui(payload: &[u8]) -> Frame {
        Frame::Ui {
            path: Path::new(Callsign::new("APZAIO", 0), Callsign::new("VK4MSL", 0)),
            pf: false,
            pid: 0xF0,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn s4_second_transmit_waits_for_cooldown() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink { sent: sent.clone() });
        let received = Signal::new();
        let config = InterfaceConfig {
            cts_delay: Duration::from_millis(100),
            cts_rand: Duration::ZERO,
        };
        let iface = AX25Interface::new(
            sink,
            &received,
            Arc::new(Router::new()),
            Arc::new(FixedRandom::zero()),
            Modulo::Mod8,
            config,
        );

        iface.transmit(ui(b"one"), None).unwrap();
        iface.transmit(ui(b"two"), None).unwrap();

        tokio::task::yield_now().await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_millis(99)).await;
        tokio::task::yield_now().await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_transmit_is_skipped() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink { sent: sent.clone() });
        let received = Signal::new();
        let iface = AX25Interface::new(
            sink,
            &received,
            Arc::new(Router::new()),
            Arc::new(FixedRandom::zero()),
            Modulo::Mod8,
            InterfaceConfig::default(),
        );

        // Manually hold the medium busy so both frames queue up first.
        *iface.state.lock().unwrap() = MediumState::TxCooldown;
        let handle = iface.transmit(ui(b"cancel-me"), None).unwrap();
        iface.transmit(ui(b"keep-me"), None).unwrap();
        iface.cancel_transmit(&handle);
        *iface.state.lock().unwrap() = MediumState::Idle;
        iface.pump();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0].0[..], &ax25::encode(&ui(b"keep-me")).unwrap()[..]);
    }

    #[tokio::test]
    async fn received_frame_dispatches_through_router_and_signal() {
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink {
            sent: Arc::new(StdMutex::new(Vec::new())),
        });
        let received = Signal::new();
        let router = Arc::new(Router::new());
        let hit = Arc::new(StdMutex::new(false));
        let h = hit.clone();
        router.bind_exact("APZAIO", None, move |_| *h.lock().unwrap() = true);

        let signal_hit = Arc::new(StdMutex::new(false));
        let sh = signal_hit.clone();

        let iface = AX25Interface::new(
            sink,
            &received,
            router,
            Arc::new(FixedRandom::zero()),
            Modulo::Mod8,
            InterfaceConfig::default(),
        );
        iface.received_msg.connect(move |_| *sh.lock().unwrap() = true);

        let encoded = ax25::encode(&ui(b"hello")).unwrap();
        received.emit(&Bytes::from(encoded));

        assert!(*hit.lock().unwrap());
        assert!(*signal_hit.lock().unwrap());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_but_still_triggers_cooldown() {
        let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink {
            sent: Arc::new(StdMutex::new(Vec::new())),
        });
        let received = Signal::new();
        let iface = AX25Interface::new(
            sink,
            &received,
            Arc::new(Router::new()),
            Arc::new(FixedRandom::zero()),
            Modulo::Mod8,
            InterfaceConfig::default(),
        );

        received.emit(&Bytes::from_static(b"\x00\x01"));
        assert_eq!(*iface.state.lock().unwrap(), MediumState::RxCooldown);
    }
}

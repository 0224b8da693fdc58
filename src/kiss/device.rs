//! The KISS port multiplexer (C3.device / C3.port): owns the byte stream
//! to a TNC, runs its init/reset sequences, and fans decoded frames out
//! to up to 16 [`KissPort`]s. The core only knows it has an
//! `AsyncRead + AsyncWrite` byte stream — serial/TCP transports are out
//! of scope (§1) and are the caller's problem to construct.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::signal::Signal;

use super::codec::{encode, KissCodec, KissCommand, KissFrame};

pub const MAX_PORTS: u8 = 16;

/// One TNC-init parameter, written as its own KISS command frame during
/// [`KissDevice::open`].
#[derive(Debug, Clone, Copy)]
pub struct InitParam {
    pub command: KissCommand,
    pub value: u8,
}

#[derive(Debug, Clone)]
pub struct KissDeviceConfig {
    /// Bytes written to drop the TNC out of whatever command mode it
    /// booted into, before the KISS-mode return frame. Empty by default;
    /// TNC-specific.
    pub cmd_mode_exit: Vec<u8>,
    /// Delay observed between each octet of the init sequence.
    pub init_delay: Duration,
    /// TXDELAY/PERSIST/SLOTTIME/TXTAIL (and friends), sent in order.
    pub tnc_init: Vec<InitParam>,
    /// Splits outbound writes larger than this many bytes into pieces.
    pub send_block_size: Option<usize>,
    pub send_block_delay: Duration,
    /// Sends the return-to-command-mode frame on close.
    pub reset_on_close: bool,
    /// Outbound write queue depth before [`Error::QueueFull`].
    pub write_queue_depth: usize,
}

impl Default for KissDeviceConfig {
    fn default() -> Self {
        KissDeviceConfig {
            cmd_mode_exit: Vec::new(),
            init_delay: Duration::from_millis(100),
            tnc_init: Vec::new(),
            send_block_size: None,
            send_block_delay: Duration::ZERO,
            reset_on_close: false,
            write_queue_depth: 64,
        }
    }
}

/// A single numbered port on a [`KissDevice`].
pub struct KissPort {
    port: u8,
    pub received: Arc<Signal<Bytes>>,
    /// Emitted once, by [`KissDevice::close`]. Callers that layer an
    /// `AX25Interface` on top of this port should connect this to
    /// [`crate::interface::AX25Interface::close`] so a device close
    /// reaches that interface's queued transmits and C7's message
    /// handlers (§5/§7).
    pub closed: Arc<Signal<()>>,
    writer: mpsc::Sender<Vec<u8>>,
}

impl KissPort {
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Frames `data` as a KISS data frame for this port and enqueues it
    /// on the device's shared output queue.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        let frame = KissFrame::data(self.port, data.into());
        let wire = encode(&frame);
        self.writer.try_send(wire).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Error::DeviceClosed,
        })
    }
}

/// Owns the byte stream and background reader/writer tasks for a KISS
/// TNC. Dropping this, or calling [`KissDevice::close`], cancels both
/// tasks and every queued write.
pub struct KissDevice {
    ports: Vec<Arc<KissPort>>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    reset_on_close: bool,
    write_tx: mpsc::Sender<Vec<u8>>,
}

impl KissDevice {
    /// Runs the init sequence, then spawns the reader and writer tasks.
    pub async fn open<S>(mut stream: S, port_count: u8, config: KissDeviceConfig) -> Result<Self, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if port_count == 0 || port_count > MAX_PORTS {
            return Err(Error::PortOutOfRange(port_count));
        }

        let mut init_bytes = config.cmd_mode_exit.clone();
        init_bytes.extend_from_slice(&[0xC0, 0xFF, 0xC0]);
        for param in &config.tnc_init {
            init_bytes.extend_from_slice(&encode(&KissFrame {
                port: 0,
                command: param.command,
                data: Bytes::copy_from_slice(&[param.value]),
            }));
        }
        write_paced(&mut stream, &init_bytes, config.init_delay).await?;

        let (write_tx, write_rx) = mpsc::channel(config.write_queue_depth);
        let closed = Arc::new(AtomicBool::new(false));

        let ports: Vec<Arc<KissPort>> = (0..port_count)
            .map(|port| {
                Arc::new(KissPort {
                    port,
                    received: Arc::new(Signal::new()),
                    closed: Arc::new(Signal::new()),
                    writer: write_tx.clone(),
                })
            })
            .collect();

        let (read_half, write_half) = tokio::io::split(stream);
        let writer_task = tokio::spawn(run_writer(
            write_half,
            write_rx,
            config.send_block_size,
            config.send_block_delay,
        ));
        let reader_task = tokio::spawn(run_reader(read_half, ports.clone()));

        Ok(KissDevice {
            ports,
            writer_task,
            reader_task,
            closed,
            reset_on_close: config.reset_on_close,
            write_tx,
        })
    }

    pub fn port(&self, index: u8) -> Result<Arc<KissPort>, Error> {
        self.ports
            .get(index as usize)
            .cloned()
            .ok_or(Error::PortOutOfRange(index))
    }

    pub fn port_count(&self) -> u8 {
        self.ports.len() as u8
    }

    /// Cancels the background tasks and notifies every port's `closed`
    /// signal, so an `AX25Interface` layered on top (per the daemon's
    /// `kiss_port.closed.connect(...)` wiring) cancels its queued
    /// transmits and fails outstanding message handlers (§5/§7).
    pub async fn close(self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.reset_on_close {
            let _ = self.write_tx.try_send(vec![0xC0, 0xFF, 0xC0]);
        }
        self.reader_task.abort();
        self.writer_task.abort();
        for port in &self.ports {
            port.closed.emit(&());
        }
    }
}

async fn write_paced<S>(stream: &mut S, bytes: &[u8], delay: Duration) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    for &b in bytes {
        stream.write_all(&[b]).await?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    stream.flush().await?;
    Ok(())
}

async fn run_writer<W>(
    mut write_half: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    block_size: Option<usize>,
    block_delay: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(wire) = rx.recv().await {
        let chunk_size = block_size.unwrap_or(wire.len()).max(1);
        for (i, chunk) in wire.chunks(chunk_size).enumerate() {
            if i > 0 && !block_delay.is_zero() {
                tokio::time::sleep(block_delay).await;
            }
            if let Err(e) = write_half.write_all(chunk).await {
                log::error!("kiss: write error, closing device: {e}");
                return;
            }
        }
        if let Err(e) = write_half.flush().await {
            log::error!("kiss: flush error, closing device: {e}");
            return;
        }
    }
}

async fn run_reader<R>(mut read_half: R, ports: Vec<Arc<KissPort>>)
where
    R: AsyncRead + Unpin,
{
    let mut codec = KissCodec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                log::info!("kiss: underlying stream closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("kiss: read error, closing device: {e}");
                return;
            }
        };
        for &byte in &buf[..n] {
            if let Some(frame) = codec.decode_byte(byte) {
                dispatch(&ports, frame);
            }
        }
    }
}

fn dispatch(ports: &[Arc<KissPort>], frame: KissFrame) {
    match frame.command {
        KissCommand::Data => match ports.get(frame.port as usize) {
            Some(port) => port.received.emit(&frame.data),
            None => log::warn!("kiss: data frame for unknown port {}", frame.port),
        },
        other => log::debug!("kiss: ignoring non-data frame from TNC: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn round_trips_a_data_frame_through_a_duplex_stream() {
        let (a, mut b) = tokio::io::duplex(4096);
        let device = KissDevice::open(a, 2, KissDeviceConfig::default())
            .await
            .unwrap();

        // drain the init sequence the device just wrote
        let mut drain = [0u8; 256];
        let _ = tokio::time::timeout(Duration::from_millis(50), b.read(&mut drain))
            .await
            .unwrap()
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let port0 = device.port(0).unwrap();
        port0.received.connect(move |bytes: &Bytes| {
            r.lock().unwrap().push(bytes.clone());
        });

        b.write_all(&[0xC0, 0x00, b'h', b'i', 0xC0]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(received.lock().unwrap().as_slice(), &[Bytes::from_static(b"hi")]);
    }

    #[tokio::test]
    async fn send_chunks_large_writes() {
        let (a, mut b) = tokio::io::duplex(65536);
        let config = KissDeviceConfig {
            send_block_size: Some(4),
            send_block_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let device = KissDevice::open(a, 1, config).await.unwrap();

        let mut drain = [0u8; 256];
        let _ = tokio::time::timeout(Duration::from_millis(50), b.read(&mut drain))
            .await
            .unwrap()
            .unwrap();

        let port0 = device.port(0).unwrap();
        port0.send(Bytes::from_static(b"0123456789")).unwrap();

        let mut out = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            match tokio::time::timeout(Duration::from_millis(200), b.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => panic!("{e}"),
            }
            if out.contains(&0xC0) && out.len() > 1 && out.last() == Some(&0xC0) {
                break;
            }
        }
        assert!(out.starts_with(&[0xC0, 0x00]));
        assert!(out.ends_with(&[0xC0]));
    }

    #[test]
    fn out_of_range_port_count_is_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (a, _b) = tokio::io::duplex(64);
            let result = KissDevice::open(a, 0, KissDeviceConfig::default()).await;
            assert!(matches!(result, Err(Error::PortOutOfRange(0))));
        });
    }

}

// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Best-effort streaming of container snapshots to a remote observer.
//!
//! Every call to [`ResultPublisher::publish`] emits one JSON frame per board:
//!
//! ```json
//! {"stream": "Occ", "board": 0, "header": 310.0,
//!  "chips": [{"optical_group": 0, "hybrid": 0, "chip": 0, "value": ...}]}
//! ```
//!
//! Failures never reach the control loop. They are logged and counted.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use calib_log::{debug, warn};
use detector_container::{BoardData, DataContainer};
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("Sink is disconnected")]
    Disconnected,
    #[error("Sink queue is full")]
    QueueFull,
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transport of encoded frames.
pub trait PublishSink: Send {
    fn send(&mut self, frame: Vec<u8>) -> Result<(), PublishError>;
}

#[derive(Serialize)]
struct ChipEntry<'a, T> {
    optical_group: u16,
    hybrid: u16,
    chip: u16,
    value: &'a T,
}

#[derive(Serialize)]
struct BoardSnapshot<'a, T> {
    stream: &'a str,
    board: u16,
    header: Option<f64>,
    chips: Vec<ChipEntry<'a, T>>,
}

fn encode<T: Serialize>(
    board: &BoardData<T>,
    stream: &str,
    header: Option<f64>,
) -> Result<Vec<u8>, PublishError> {
    let chips = board
        .chips()
        .map(|(address, value)| ChipEntry {
            optical_group: address.optical_group,
            hybrid: address.hybrid,
            chip: address.chip,
            value,
        })
        .collect();
    let snapshot = BoardSnapshot {
        stream,
        board: board.id(),
        header,
        chips,
    };
    Ok(serde_json::to_vec(&snapshot)?)
}

/// Publisher with an optional sink. Without a sink, publishing is a no-op.
#[derive(Default)]
pub struct ResultPublisher {
    sink: Option<Box<dyn PublishSink>>,
    sent: u64,
    dropped: u64,
}

impl ResultPublisher {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: impl PublishSink + 'static) -> Self {
        ResultPublisher {
            sink: Some(Box::new(sink)),
            ..Default::default()
        }
    }

    pub fn attach(&mut self, sink: impl PublishSink + 'static) {
        self.sink = Some(Box::new(sink));
    }

    pub fn detach(&mut self) -> Option<Box<dyn PublishSink>> {
        self.sink.take()
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Frames handed to the sink.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Frames lost to encoding or transport failures.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Send one frame per board of `container`.
    pub fn publish<T: Serialize>(
        &mut self,
        container: &DataContainer<T>,
        stream: &str,
        header: Option<f64>,
    ) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        for board in container.boards() {
            let result = encode(board, stream, header).and_then(|frame| sink.send(frame));
            match result {
                Ok(()) => self.sent += 1,
                Err(err) => {
                    self.dropped += 1;
                    debug!("Dropped '{stream}' frame of board {}: {err}", board.id());
                }
            }
        }
    }
}

/// Socket write timeout of [`QueuedSink::connect`].
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Sink writing length-prefixed frames from a background thread.
///
/// Each frame is preceded by its length as a big-endian `u32`. Frames are
/// dropped while the queue is full, so a slow reader never stalls the
/// publishing thread. Dropping the sink detaches the worker, which exits
/// once the remaining frames are written. Use [`QueuedSink::close`] to wait
/// for them.
pub struct QueuedSink {
    sender: Option<SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedSink {
    pub fn new<W: Write + Send + 'static>(mut writer: W, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(capacity.max(1));
        let worker = thread::spawn(move || {
            for frame in receiver {
                let Ok(len) = u32::try_from(frame.len()) else {
                    warn!("Skipping oversized frame of {} bytes", frame.len());
                    continue;
                };
                let written = writer
                    .write_all(&len.to_be_bytes())
                    .and_then(|_| writer.write_all(&frame))
                    .and_then(|_| writer.flush());
                if let Err(err) = written {
                    warn!("Result stream closed: {err}");
                    break;
                }
            }
        });
        QueuedSink {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Stream frames to a TCP listener.
    pub fn connect<A: ToSocketAddrs>(address: A, capacity: usize) -> std::io::Result<Self> {
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        Ok(QueuedSink::new(stream, capacity))
    }

    /// Stop accepting frames and wait up to `timeout` for the worker to
    /// write the queued ones.
    ///
    /// Returns `false` if the worker is still busy at the deadline. It is then
    /// left running in the background.
    pub fn close(mut self, timeout: Duration) -> bool {
        self.sender.take();
        let Some(worker) = self.worker.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!("Result stream still draining after {timeout:?}");
                return false;
            }
            thread::sleep(DRAIN_POLL);
        }
        if worker.join().is_err() {
            warn!("Result stream worker panicked");
            return false;
        }
        true
    }
}

impl PublishSink for QueuedSink {
    fn send(&mut self, frame: Vec<u8>) -> Result<(), PublishError> {
        let sender = self.sender.as_ref().ok_or(PublishError::Disconnected)?;
        sender.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => PublishError::QueueFull,
            TrySendError::Disconnected(_) => PublishError::Disconnected,
        })
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the queue is drained.
        // The worker is detached, never joined here.
        self.sender.take();
        self.worker.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::RecordingSink;
    use detector_container::Topology;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::mpsc::{Receiver, Sender};
    use std::sync::{Arc, Mutex};

    struct FailingSink;

    impl PublishSink for FailingSink {
        fn send(&mut self, _frame: Vec<u8>) -> Result<(), PublishError> {
            Err(PublishError::Disconnected)
        }
    }

    #[test]
    fn test_one_frame_per_board() {
        let topology = Topology::uniform(3, 1, 1, 2);
        let container = DataContainer::from_fn(&topology, |key| key.index.chip as u32 * 10);
        let sink = RecordingSink::default();
        let mut publisher = ResultPublisher::with_sink(sink.clone());
        publisher.publish(&container, "ClkDelay", Some(4.0));
        let frames = sink.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(publisher.sent(), 3);
        assert_eq!(frames[2]["stream"], "ClkDelay");
        assert_eq!(frames[2]["board"], 2);
        assert_eq!(frames[2]["header"], 4.0);
        assert_eq!(frames[2]["chips"][1]["chip"], 1);
        assert_eq!(frames[2]["chips"][1]["value"], 10);
    }

    #[test]
    fn test_disabled_is_noop() {
        let container = DataContainer::with_payload(&Topology::uniform(1, 1, 1, 1), 1.0);
        let mut publisher = ResultPublisher::disabled();
        assert!(!publisher.is_enabled());
        publisher.publish(&container, "Occ", None);
        assert_eq!(publisher.sent(), 0);
        assert_eq!(publisher.dropped(), 0);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let container = DataContainer::with_payload(&Topology::uniform(2, 1, 1, 1), 1.0);
        let mut publisher = ResultPublisher::with_sink(FailingSink);
        publisher.publish(&container, "Occ", None);
        assert_eq!(publisher.dropped(), 2);
        assert!(publisher.detach().is_some());
        assert!(!publisher.is_enabled());
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_queued_sink_length_prefix() {
        let buffer = SharedBuffer::default();
        let mut sink = QueuedSink::new(buffer.clone(), 4);
        sink.send(b"abc".to_vec()).unwrap();
        sink.send(b"de".to_vec()).unwrap();
        assert!(sink.close(Duration::from_secs(5)));
        let bytes = buffer.0.lock().unwrap().clone();
        assert_eq!(bytes, b"\0\0\0\x03abc\0\0\0\x02de");
    }

    #[test]
    fn test_queued_sink_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let reader = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut bytes = vec![];
            stream.read_to_end(&mut bytes).unwrap();
            bytes
        });
        let container = DataContainer::with_payload(&Topology::uniform(1, 1, 1, 1), 7u32);
        let mut publisher = ResultPublisher::with_sink(QueuedSink::connect(address, 8).unwrap());
        publisher.publish(&container, "Occ", None);
        drop(publisher);
        let bytes = reader.join().unwrap();
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(bytes.len(), 4 + len);
        let frame: serde_json::Value = serde_json::from_slice(&bytes[4..]).unwrap();
        assert_eq!(frame["chips"][0]["value"], 7);
        assert!(frame["header"].is_null());
    }

    /// Writer taking `delay` per write call.
    struct SlowWriter {
        delay: Duration,
    }

    impl Write for SlowWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            thread::sleep(self.delay);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_replacing_slow_sink_does_not_block() {
        let container = DataContainer::with_payload(&Topology::uniform(8, 1, 1, 1), 1.0);
        let slow = QueuedSink::new(
            SlowWriter {
                delay: Duration::from_millis(300),
            },
            8,
        );
        let mut publisher = ResultPublisher::with_sink(slow);
        publisher.publish(&container, "Occ", None);
        assert_eq!(publisher.sent(), 8);

        let start = Instant::now();
        publisher.attach(RecordingSink::default());
        assert!(start.elapsed() < Duration::from_millis(250));
        publisher.publish(&container, "Occ", None);
        assert_eq!(publisher.sent(), 16);

        let start = Instant::now();
        drop(publisher);
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_close_times_out_on_slow_writer() {
        let mut sink = QueuedSink::new(
            SlowWriter {
                delay: Duration::from_millis(200),
            },
            4,
        );
        for _ in 0..4 {
            sink.send(vec![0; 4]).unwrap();
        }
        let start = Instant::now();
        assert!(!sink.close(Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    /// Writer announcing each write, then blocking until its gate opens or
    /// is dropped.
    struct GatedWriter {
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl Write for GatedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_full_queue_drops_frames() {
        let (open, gate) = mpsc::channel();
        let (entered, writing) = mpsc::channel();
        let mut sink = QueuedSink::new(GatedWriter { entered, gate }, 1);
        sink.send(vec![1]).unwrap();
        // The worker now blocks on the first frame, the queue takes one more.
        writing.recv().unwrap();
        sink.send(vec![2]).unwrap();
        assert!(matches!(sink.send(vec![3]), Err(PublishError::QueueFull)));

        let container = DataContainer::with_payload(&Topology::uniform(4, 1, 1, 1), 1.0);
        let mut publisher = ResultPublisher::with_sink(sink);
        let start = Instant::now();
        publisher.publish(&container, "Occ", None);
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(publisher.sent(), 0);
        assert_eq!(publisher.dropped(), 4);
        drop(open);
    }

    #[test]
    fn test_zero_capacity_still_queues() {
        let buffer = SharedBuffer::default();
        let mut sink = QueuedSink::new(buffer.clone(), 0);
        sink.send(b"x".to_vec()).unwrap();
        assert!(sink.close(Duration::from_secs(5)));
        assert_eq!(buffer.0.lock().unwrap().as_slice(), b"\0\0\0\x01x");
    }
}

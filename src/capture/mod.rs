//! Background capture loop and its OS seam.
//!
//! The loop owns the acknowledge/data-ready handshake with the system
//! debug-output facility: signal "buffer free", wait for data or a stop
//! request, and turn each broadcast into a `CapturedMessage` handed to the
//! owning thread's queue. Timeouts and wait failures are retried
//! indefinitely; only the stop signal (or a vanished consumer) ends the
//! loop.
//!
//! The OS side lives behind the `DebugSource` trait so the loop can be
//! exercised without binding the machine-wide facility.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use metrics::counter;
use thiserror::Error;

use crate::events::{CapturedMessage, ProcessInfo};
use crate::identity::ResolveIdentity;
use crate::queue::QueueSender;
use crate::registry;

#[cfg(windows)]
pub(crate) mod dbwin;
#[cfg(windows)]
pub use dbwin::DbwinSource;

/// Reference wait cadence of the handshake loop.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Failures while binding to or waiting on the OS facility.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to initialize world-accessible security: {0}")]
    Security(#[source] io::Error),

    #[error("failed to create handshake event '{name}': {source}")]
    Event {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to create shared buffer '{name}': {source}")]
    SharedMemory {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to map a view of '{name}': {source}")]
    MapView {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("wait on handshake objects failed: {0}")]
    Wait(#[source] io::Error),

    #[error("debug-output capture is not supported on this platform")]
    Unsupported,
}

/// One broadcast as read from the shared buffer: the writer's pid followed
/// by its NUL-terminated single-byte text, already copied out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDebugEvent {
    pub process_id: u32,
    pub text: Vec<u8>,
}

/// Outcome of one bounded wait cycle.
#[derive(Debug)]
pub enum Wait {
    /// A broadcaster published into the shared buffer.
    Data(RawDebugEvent),
    /// Nothing arrived within the timeout; wait again.
    Timeout,
    /// The stop signal fired.
    Stopped,
}

/// Seam between the capture loop and the OS handshake.
pub trait DebugSource: Send {
    /// Tell any waiting broadcaster the shared buffer is free.
    fn acknowledge(&mut self) -> Result<(), CaptureError>;

    /// Block until data, stop, or the timeout, whichever comes first.
    fn wait(&mut self, stop: &StopSignal, timeout: Duration) -> Result<Wait, CaptureError>;
}

impl<T: DebugSource + ?Sized> DebugSource for Box<T> {
    fn acknowledge(&mut self) -> Result<(), CaptureError> {
        (**self).acknowledge()
    }

    fn wait(&mut self, stop: &StopSignal, timeout: Duration) -> Result<Wait, CaptureError> {
        (**self).wait(stop, timeout)
    }
}

/// Cooperative stop for the capture thread, observed within one wait
/// cycle. On Windows it doubles as a native event so the wait returns the
/// moment it is raised rather than at the next timeout.
#[derive(Clone)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
    #[cfg(windows)]
    event: Option<Arc<crate::win32::OwnedHandle>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            raised: Arc::new(AtomicBool::new(false)),
            #[cfg(windows)]
            event: dbwin::stop_event().map(Arc::new),
        }
    }

    /// Request termination.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        #[cfg(windows)]
        if let Some(event) = &self.event {
            unsafe { windows_sys::Win32::System::Threading::SetEvent(event.raw()) };
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    #[cfg(windows)]
    pub(crate) fn native_event(&self) -> Option<windows_sys::Win32::Foundation::HANDLE> {
        self.event.as_ref().map(|e| e.raw())
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one source until the stop signal fires.
///
/// Every broadcast becomes a `CapturedMessage`: identity resolved once,
/// the next process-wide sequence id claimed, the current wall clock
/// stamped. The message goes to the queue sender; the owning thread
/// delivers the change notification.
pub(crate) fn run_loop<S: DebugSource>(
    mut source: S,
    queue: QueueSender,
    stop: StopSignal,
    timeout: Duration,
    resolver: Arc<dyn ResolveIdentity>,
) {
    loop {
        if stop.is_raised() {
            break;
        }
        if let Err(e) = source.acknowledge() {
            // A broken acknowledge starves broadcasters but is not fatal;
            // keep waiting so a stop request still lands.
            log::debug!("acknowledge failed: {e}");
        }
        match source.wait(&stop, timeout) {
            Ok(Wait::Stopped) => break,
            Ok(Wait::Timeout) => {
                counter!("dbgcap_wait_timeouts_total").increment(1);
            }
            Err(e) => {
                counter!("dbgcap_wait_failures_total").increment(1);
                log::debug!("wait failed, retrying: {e}");
            }
            Ok(Wait::Data(raw)) => {
                let process = ProcessInfo {
                    process_id: raw.process_id,
                    process_name: resolver.executable_name(raw.process_id),
                };
                let message = CapturedMessage {
                    sequence_id: registry::sequencer().next_id(),
                    timestamp: Local::now(),
                    text: raw.text,
                    process,
                };
                counter!("dbgcap_messages_captured_total").increment(1);
                if !queue.push(message) {
                    // Owning side is gone; nothing left to publish to.
                    break;
                }
            }
        }
    }
    log::debug!("capture loop exited");
}

/// Thread entry: bind to the facility, then run the loop. A setup failure
/// never enters the wait loop; it is logged and recorded on the startup
/// flag, and subscribers simply see nothing.
pub(crate) fn capture_thread<F>(
    factory: F,
    queue: QueueSender,
    stop: StopSignal,
    timeout: Duration,
    resolver: Arc<dyn ResolveIdentity>,
    startup_failed: Arc<AtomicBool>,
) where
    F: FnOnce() -> Result<Box<dyn DebugSource + Send>, CaptureError>,
{
    match factory() {
        Ok(source) => run_loop(source, queue, stop, timeout, resolver),
        Err(e) => {
            startup_failed.store(true, Ordering::Release);
            log::warn!("debug-output capture unavailable: {e}");
        }
    }
}

/// Factory for the real OS facility.
#[cfg(windows)]
pub(crate) fn platform_source() -> Result<Box<dyn DebugSource + Send>, CaptureError> {
    Ok(Box::new(DbwinSource::create()?))
}

#[cfg(not(windows))]
pub(crate) fn platform_source() -> Result<Box<dyn DebugSource + Send>, CaptureError> {
    Err(CaptureError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MessageQueue, QueueChange};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        steps: VecDeque<Result<Wait, CaptureError>>,
        acks: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(steps: Vec<Result<Wait, CaptureError>>) -> (Self, Arc<AtomicUsize>) {
            let acks = Arc::new(AtomicUsize::new(0));
            (Self { steps: steps.into(), acks: Arc::clone(&acks) }, acks)
        }
    }

    impl DebugSource for Scripted {
        fn acknowledge(&mut self) -> Result<(), CaptureError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn wait(&mut self, _stop: &StopSignal, _timeout: Duration) -> Result<Wait, CaptureError> {
            self.steps.pop_front().unwrap_or(Ok(Wait::Stopped))
        }
    }

    fn data(process_id: u32, text: &str) -> Result<Wait, CaptureError> {
        Ok(Wait::Data(RawDebugEvent { process_id, text: text.as_bytes().to_vec() }))
    }

    fn resolver() -> Arc<dyn ResolveIdentity> {
        Arc::new(|pid: u32| if pid == 1234 { "notepad.exe".to_string() } else { String::new() })
    }

    fn collect(queue: &MessageQueue) -> Vec<CapturedMessage> {
        let mut out = Vec::new();
        queue.drain(|c| {
            if let QueueChange::ItemAdded(m) = c {
                out.push(m);
            }
        });
        out
    }

    #[test]
    fn broadcast_becomes_an_enriched_message() {
        let (source, _) = Scripted::new(vec![data(1234, "hello")]);
        let (tx, queue) = MessageQueue::channel();

        run_loop(source, tx, StopSignal::new(), Duration::from_millis(10), resolver());

        let messages = collect(&queue);
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.text, b"hello");
        assert_eq!(msg.process.process_id, 1234);
        assert_eq!(msg.process.process_name, "notepad.exe");
        assert!(msg.sequence_id > 0);
    }

    #[test]
    fn sequence_ids_increase_across_loops() {
        let run = || {
            let (source, _) = Scripted::new(vec![data(1234, "a"), data(1234, "b")]);
            let (tx, queue) = MessageQueue::channel();
            run_loop(source, tx, StopSignal::new(), Duration::from_millis(10), resolver());
            collect(&queue)
        };

        let first = run();
        let second = run();
        let ids: Vec<u64> =
            first.iter().chain(second.iter()).map(|m| m.sequence_id).collect();
        assert!(ids.windows(2).all(|w| w[1] > w[0]), "not strictly increasing: {ids:?}");
    }

    #[test]
    fn timeout_is_not_termination() {
        let (source, _) = Scripted::new(vec![Ok(Wait::Timeout), data(9, "late")]);
        let (tx, queue) = MessageQueue::channel();

        run_loop(source, tx, StopSignal::new(), Duration::from_millis(10), resolver());

        assert_eq!(collect(&queue).len(), 1);
    }

    #[test]
    fn wait_failure_is_retried() {
        let broken = Err(CaptureError::Wait(io::Error::other("transient")));
        let (source, acks) = Scripted::new(vec![broken, data(9, "after")]);
        let (tx, queue) = MessageQueue::channel();

        run_loop(source, tx, StopSignal::new(), Duration::from_millis(10), resolver());

        assert_eq!(collect(&queue).len(), 1);
        // One acknowledge per iteration: failure, data, final stop.
        assert_eq!(acks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn raised_stop_short_circuits_before_any_handshake() {
        let (source, acks) = Scripted::new(vec![data(9, "never")]);
        let (tx, queue) = MessageQueue::channel();
        let stop = StopSignal::new();
        stop.raise();

        run_loop(source, tx, stop, Duration::from_millis(10), resolver());

        assert!(collect(&queue).is_empty());
        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn vanished_consumer_ends_the_loop() {
        let steps: Vec<_> = (0..5).map(|_| data(9, "orphan")).collect();
        let (source, acks) = Scripted::new(steps);
        let (tx, queue) = MessageQueue::channel();
        drop(queue);

        run_loop(source, tx, StopSignal::new(), Duration::from_millis(10), resolver());

        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_signal_latches() {
        let stop = StopSignal::new();
        assert!(!stop.is_raised());
        stop.raise();
        assert!(stop.is_raised());
        assert!(stop.clone().is_raised());
    }
}

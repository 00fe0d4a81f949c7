//! Channel receivers, the public face of the capture pipeline.
//!
//! A channel receiver captures messages from one external source and
//! republishes them, binary-encoded, to subscribers. The debug-output
//! receiver here is one variant; the surrounding system wires other
//! ingestion channels through the same trait rather than any shared base
//! type.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use metrics::counter;

use crate::capture::{self, CaptureError, DEFAULT_WAIT_TIMEOUT, DebugSource, StopSignal};
use crate::identity::{ResolveIdentity, SystemResolver};
use crate::queue::{MessageQueue, QueueChange};
use crate::wire;

/// Callback invoked with the publishing channel's name and the encoded
/// wire buffer. The buffer is only valid for the duration of the call.
pub type MessageCallback = Box<dyn FnMut(&str, &[u8]) + Send>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Capability shared by every ingestion channel: a name, an enabled gate,
/// and a subscribable message event, plus the owning-thread pump that
/// delivers pending notifications.
pub trait ChannelReceiver {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);

    fn enabled(&self) -> bool;
    /// Setting the current value again has no observable effect.
    fn set_enabled(&mut self, enabled: bool);

    fn subscribe(&mut self, callback: MessageCallback) -> SubscriptionId;
    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
    fn subscriber_count(&self) -> usize;

    /// Drain pending queue changes on the owning thread. Returns how many
    /// messages were delivered to subscribers.
    fn pump(&mut self) -> usize;
}

// Feeds generated names; receivers are few, so a plain counter is enough.
static INSTANCE_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn generated_name() -> String {
    let n = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("DebugOutput{n}")
}

/// Construction knobs for `DebugOutputReceiver`.
pub struct ReceiverOptions {
    /// Channel name; generated (`DebugOutput<N>`) when absent.
    pub name: Option<String>,
    /// Initial delivery gate. The capture thread starts regardless.
    pub enabled: bool,
    /// Bounded wait used by the handshake loop.
    pub wait_timeout: Duration,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self { name: None, enabled: true, wait_timeout: DEFAULT_WAIT_TIMEOUT }
    }
}

/// Receiver for the system-wide debug-output broadcast.
///
/// Construction starts the capture thread immediately, independent of the
/// `enabled` gate; dropping the receiver raises the stop signal and joins
/// the thread, bounded by one wait timeout.
pub struct DebugOutputReceiver {
    name: String,
    enabled: bool,
    subscribers: Vec<(SubscriptionId, MessageCallback)>,
    next_subscription: u64,
    queue: MessageQueue,
    stop: StopSignal,
    thread: Option<JoinHandle<()>>,
    startup_failed: Arc<AtomicBool>,
}

impl DebugOutputReceiver {
    /// Bind to the OS debug-output facility and start capturing.
    pub fn new(options: ReceiverOptions) -> Self {
        Self::with_source(options, capture::platform_source)
    }

    /// Same pipeline, custom source. The factory runs on the capture
    /// thread; a factory error is the silent setup-failure path.
    pub fn with_source<F>(options: ReceiverOptions, factory: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn DebugSource + Send>, CaptureError> + Send + 'static,
    {
        let name = options.name.unwrap_or_else(generated_name);
        let (sender, queue) = MessageQueue::channel();
        let stop = StopSignal::new();
        let startup_failed = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread_flag = Arc::clone(&startup_failed);
        let timeout = options.wait_timeout;
        let resolver: Arc<dyn ResolveIdentity> = Arc::new(SystemResolver);

        let thread = match thread::Builder::new().name(format!("{name}-capture")).spawn(
            move || {
                capture::capture_thread(factory, sender, thread_stop, timeout, resolver, thread_flag)
            },
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("failed to start capture thread for '{name}': {e}");
                startup_failed.store(true, Ordering::Release);
                None
            }
        };

        Self {
            name,
            enabled: options.enabled,
            subscribers: Vec::new(),
            next_subscription: 0,
            queue,
            stop,
            thread,
            startup_failed,
        }
    }

    /// True when the capture thread could not bind to the OS facility. The
    /// receiver then looks enabled but produces nothing.
    pub fn startup_failed(&self) -> bool {
        self.startup_failed.load(Ordering::Acquire)
    }
}

impl ChannelReceiver for DebugOutputReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        log::debug!("channel '{}' {}", self.name, if enabled { "enabled" } else { "disabled" });
    }

    fn subscribe(&mut self, callback: MessageCallback) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.push((id, callback));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn pump(&mut self) -> usize {
        let mut delivered = 0;
        let name = self.name.clone();
        while let Some(change) = self.queue.try_next() {
            let QueueChange::ItemAdded(message) = change else {
                continue; // bulk clears and future actions are not deliveries
            };
            if !self.enabled || self.subscribers.is_empty() {
                // Disabled channels and empty subscriber lists skip encode
                // work entirely; the message is dropped here.
                continue;
            }
            let buffer = wire::encode(&message);
            for (_, callback) in self.subscribers.iter_mut() {
                callback(&name, &buffer);
            }
            delivered += 1;
            counter!("dbgcap_messages_delivered_total").increment(1);
        }
        delivered
    }
}

impl Drop for DebugOutputReceiver {
    fn drop(&mut self) {
        self.stop.raise();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("capture thread for '{}' panicked", self.name);
            }
        }
    }
}

//! Interrupt to task signalling.
//!
//! Interrupt callbacks never touch shared state: they post an [`Event`] into
//! the mailbox of the task that is currently running and return. The task is
//! the only reader, so there is nothing to race on.

use std::{
    sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError},
    time::{Duration, Instant},
};

/// Mailbox depth. One slot per interrupt source plus some slack for a timer
/// that fires while the task is busy sampling.
pub const MAILBOX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The one-shot cycle timer expired
    TimerExpired,
    /// Falling edge on the shared ready line: every peer is powered up
    PeersReady,
    /// Rising edge on the mains zero-cross comparator
    ZeroCross,
}

/// Write side of a mailbox. Cheap to clone, safe to call from interrupt
/// context (never blocks).
#[derive(Clone)]
pub struct EventSender(SyncSender<Event>);

impl EventSender {
    pub fn post(&self, event: Event) {
        match self.0.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) => log::warn!("Mailbox full, dropping {:?}", e),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Wake-up callback handed to an interrupt source.
pub struct Notifier(Box<dyn Fn() + Send>);

impl Notifier {
    pub fn new(f: impl Fn() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Notifier that posts `event` to `sender` every time it fires
    pub fn posting(sender: EventSender, event: Event) -> Self {
        Self::new(move || sender.post(event))
    }

    pub fn notify(&self) {
        self.0()
    }
}

/// Read side, owned by exactly one task.
pub struct Mailbox {
    tx: SyncSender<Event>,
    rx: Receiver<Event>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(MAILBOX_DEPTH)
    }
}

impl Mailbox {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(depth);
        Self { tx, rx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender(self.tx.clone())
    }

    /// Blocks until the next event. The mailbox keeps its own sender alive so
    /// this only returns `None` if the channel is torn down.
    pub fn next(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    pub fn try_next(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Bounded busy wait for one specific event. Polls without yielding so
    /// the caller resumes as soon as the event lands, which is what keeps the
    /// zero-cross edge usable as a phase anchor. Anything else that arrives in
    /// the meantime is stale for the caller and gets dropped.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn spin_for(&self, wanted: Event, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.try_recv() {
                Ok(e) if e == wanted => return true,
                Ok(e) => log::debug!("Dropping {:?} while waiting for {:?}", e, wanted),
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::hint::spin_loop();
                }
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Throws away whatever is queued
    pub fn drain(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

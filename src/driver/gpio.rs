use std::{num::NonZeroU32, sync::mpsc, thread};

use esp_idf_hal::{
    delay::BLOCK,
    gpio::{Input, InterruptType, Pin, PinDriver},
    task::notification::Notification,
};
use esp_idf_sys::*;

use crate::events::Notifier;
use crate::gpio::EdgeInput;

/// Edge interrupt on an input pin.
///
/// The interrupt only wakes a forwarding thread, which then calls the
/// subscribed [`Notifier`] in task context. The driver disables the
/// interrupt after every edge so [`EdgeInput::arm`] has to be called again.
pub struct InterruptPin<'a, P: Pin> {
    pin: PinDriver<'a, P, Input>,
    edge: InterruptType,
}

impl<'a, P: Pin> InterruptPin<'a, P> {
    pub fn new(
        mut pin: PinDriver<'a, P, Input>,
        edge: InterruptType,
    ) -> Result<Self, EspError> {
        pin.set_interrupt_type(edge)?;
        Ok(Self { pin, edge })
    }
}

/// Above the meter task, which spins while it waits for an edge
const FORWARDER_PRIORITY: usize = 20;

/// Spawns the thread that owns the task notification and returns the handle
/// the ISR signals through
fn spawn_forwarder(
    notifier: Notifier,
) -> Option<std::sync::Arc<esp_idf_hal::task::notification::Notifier>> {
    let mut cfg = unsafe { esp_pthread_get_default_config() };
    cfg.prio = FORWARDER_PRIORITY as _;
    cfg.stack_size = 3072;
    if let Err(e) = esp!(unsafe { esp_pthread_set_cfg(&cfg) }) {
        log::warn!("Interrupt forwarder keeps default priority: {}", e);
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new().spawn(move || {
        let notification = Notification::new();
        if tx.send(notification.notifier()).is_err() {
            return;
        }
        loop {
            if notification.wait(BLOCK).is_some() {
                notifier.notify();
            }
        }
    });

    // Back to defaults for every other thread
    let defaults = unsafe { esp_pthread_get_default_config() };
    if let Err(e) = esp!(unsafe { esp_pthread_set_cfg(&defaults) }) {
        log::warn!("Could not restore thread defaults: {}", e);
    }

    if let Err(e) = spawned {
        log::error!("Could not start interrupt forwarder: {}", e);
        return None;
    }
    rx.recv().ok()
}

impl<'a, P: Pin> EdgeInput for InterruptPin<'a, P> {
    fn subscribe(&mut self, notifier: Notifier) {
        let Some(wake) = spawn_forwarder(notifier) else {
            return;
        };
        let result = unsafe {
            self.pin.subscribe(move || {
                if let Some(bit) = NonZeroU32::new(1) {
                    wake.notify_and_yield(bit);
                }
            })
        };
        if let Err(e) = result {
            log::error!("Could not subscribe to {:?} edge: {}", self.edge, e);
        }
    }

    fn arm(&mut self) {
        if let Err(e) = self.pin.enable_interrupt() {
            log::warn!("Could not arm edge interrupt: {}", e);
        }
    }

    fn disarm(&mut self) {
        if let Err(e) = self.pin.disable_interrupt() {
            log::warn!("Could not disarm edge interrupt: {}", e);
        }
    }

    fn is_high(&self) -> bool {
        self.pin.is_high()
    }
}

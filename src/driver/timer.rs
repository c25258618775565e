use std::time::Duration;

use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};
use esp_idf_sys::EspError;

use crate::events::Notifier;
use crate::frontend::OneShotTimer;

/// One-shot timer on the esp-idf timer task. Callbacks run in task context.
pub struct TaskTimer {
    service: EspTaskTimerService,
    timer: Option<EspTimer<'static>>,
}

impl TaskTimer {
    pub fn new() -> Result<Self, EspError> {
        Ok(Self {
            service: EspTaskTimerService::new()?,
            timer: None,
        })
    }
}

impl OneShotTimer for TaskTimer {
    fn subscribe(&mut self, notifier: Notifier) {
        match self.service.timer(move || notifier.notify()) {
            Ok(timer) => self.timer = Some(timer),
            Err(e) => log::error!("Could not create cycle timer: {}", e),
        }
    }

    fn arm(&mut self, after: Duration) {
        let Some(timer) = &self.timer else {
            log::warn!("Cycle timer armed before subscribe");
            return;
        };
        if let Err(e) = timer.after(after) {
            log::error!("Could not arm cycle timer: {}", e);
        }
    }
}

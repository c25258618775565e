use embedded_hal::digital::v2::OutputPin;

#[cfg(test)]
use mockall::automock;

use crate::events::Notifier;

/// An input pin that can fire a one-shot edge interrupt.
///
/// Implementations disarm themselves after firing once, the consumer re-arms
/// when it wants the next edge.
#[cfg_attr(test, automock)]
pub trait EdgeInput {
    fn subscribe(&mut self, notifier: Notifier);
    fn arm(&mut self);
    fn disarm(&mut self);
    fn is_high(&self) -> bool;
}

/// Rendezvous with the other meters sharing the same power gate.
///
/// The ready line is wired-OR and active low: it only goes low once every
/// node has released it.
pub struct PeerLink<I: EdgeInput, O: OutputPin> {
    ready_in: I,
    ready_out: O,
}

impl<I: EdgeInput, O: OutputPin> PeerLink<I, O> {
    pub fn new(ready_in: I, mut ready_out: O) -> Self {
        // Not ready until the measurement task says so
        if ready_out.set_high().is_err() {
            log::warn!("Could not release ready line");
        }
        Self {
            ready_in,
            ready_out,
        }
    }

    pub fn subscribe(&mut self, notifier: Notifier) {
        self.ready_in.subscribe(notifier);
    }

    /// Tell the peers this node is up and stable
    pub fn signal_ready(&mut self) {
        if self.ready_out.set_low().is_err() {
            log::warn!("Could not assert ready line");
        }
    }

    pub fn all_ready(&self) -> bool {
        !self.ready_in.is_high()
    }

    /// Wait for the ready line with an interrupt instead of polling
    pub fn arm(&mut self) {
        self.ready_in.arm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPin;

    #[test]
    fn ready_line_is_active_low() {
        let mut input = MockEdgeInput::new();
        input.expect_is_high().once().return_const(true);
        input.expect_is_high().once().return_const(false);

        let link = PeerLink::new(input, RecordingPin::default());
        assert!(!link.all_ready());
        assert!(link.all_ready());
    }

    #[test]
    fn releases_line_until_signalled() {
        let pin = RecordingPin::default();
        let levels = pin.levels.clone();
        let mut link = PeerLink::new(MockEdgeInput::new(), pin);
        assert_eq!(*levels.lock().unwrap(), vec![true]);

        link.signal_ready();
        assert_eq!(*levels.lock().unwrap(), vec![true, false]);
    }
}

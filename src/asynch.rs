use embedded_hal_async::{delay::DelayNs, digital::Wait};

use crate::{
    common::EXPANSION_RECONCILE_PERIOD_MS, input::InputSink, transport::RegisterAccess,
    DriverError, Rmi4,
};

/// Async front end of an [`Rmi4`] engine.
///
/// Waits on the attention line and runs report cycles on the shared engine,
/// and drives the periodic expansion reconciliation.
pub struct Rmi4Async<'a, B: RegisterAccess, S, P> {
    rmi: &'a Rmi4<B, S>,
    irq_pin: Option<P>,
}

impl<'a, B: RegisterAccess, S: InputSink, P: Wait> Rmi4Async<'a, B, S, P> {
    pub fn new(rmi: &'a Rmi4<B, S>) -> Self {
        Self { rmi, irq_pin: None }
    }

    /// Set the IRQ pin.
    ///
    /// Use before calling [`Rmi4Async::wait_for_attention`].
    pub fn with_irq_pin(mut self, pin: P) -> Self {
        self.irq_pin = Some(pin);
        self
    }

    /// The engine this front end drives.
    pub fn engine(&self) -> &'a Rmi4<B, S> {
        self.rmi
    }

    /// Wait for the attention line to assert, then run one report cycle.
    ///
    /// The line is active low and stays asserted while the device has
    /// unread interrupt status, so a level wait never misses a report.
    ///
    /// If the IRQ pin isn't set, this will return [`DriverError::IrqPinNotSet`].
    /// Set the IRQ pin with [`Rmi4Async::with_irq_pin`].
    pub async fn wait_for_attention(&mut self) -> Result<usize, DriverError<B::BusError>> {
        let Some(ref mut irq_pin) = self.irq_pin else {
            return Err(DriverError::IrqPinNotSet);
        };

        irq_pin
            .wait_for_low()
            .await
            .map_err(|_| DriverError::IrqError)?;
        self.rmi.handle_attention()
    }

    /// Reconcile expansion modules every
    /// [`EXPANSION_RECONCILE_PERIOD_MS`](crate::EXPANSION_RECONCILE_PERIOD_MS).
    ///
    /// Never returns; run it as its own task.
    pub async fn run_expansion_reconciler<D: DelayNs>(&self, mut delay: D) {
        loop {
            self.rmi.reconcile_expansions();
            delay.delay_ms(EXPANSION_RECONCILE_PERIOD_MS).await;
        }
    }

    /// Safely clean up the front end, returning the IRQ pin if one was set.
    pub fn destroy(self) -> Option<P> {
        self.irq_pin
    }
}

//! Flow control windows (RFC 7540 Section 5.2).

/// A signed flow control window with refund bookkeeping.
///
/// One instance tracks a single direction at a single scope (connection
/// or stream). Windows live in `[-2^31, 2^31 - 1]`: a SETTINGS change can
/// push a window negative, after which no data may move until credit
/// brings it back up. Crediting past `2^31 - 1` is a protocol violation
/// the caller must surface.
#[derive(Debug)]
pub struct FlowControl {
    window: i64,
    initial: u32,
    /// Bytes debited since the last refund, receive side only.
    consumed: u32,
}

const WINDOW_MAX: i64 = 0x7FFF_FFFF;

impl FlowControl {
    pub fn new(initial: u32) -> Self {
        Self {
            window: i64::from(initial),
            initial,
            consumed: 0,
        }
    }

    /// Currently available window. Negative means a SETTINGS shrink put
    /// the peer (or us) into debt.
    pub fn available(&self) -> i64 {
        self.window
    }

    /// Debit the window, tracking the amount for later refund.
    pub fn debit(&mut self, amount: u32) {
        self.window -= i64::from(amount);
        self.consumed = self.consumed.saturating_add(amount);
    }

    /// Credit the window from a WINDOW_UPDATE. Fails if the window would
    /// exceed `2^31 - 1`.
    pub fn credit(&mut self, increment: u32) -> Result<(), WindowOverflow> {
        let next = self.window + i64::from(increment);
        if next > WINDOW_MAX {
            return Err(WindowOverflow);
        }
        self.window = next;
        Ok(())
    }

    /// Apply a signed SETTINGS_INITIAL_WINDOW_SIZE delta. The result may
    /// be negative.
    pub fn adjust(&mut self, delta: i32) {
        self.window += i64::from(delta);
    }

    /// Receive side: true once half the initial window has been consumed
    /// and a WINDOW_UPDATE refund should go out.
    pub fn refund_due(&self) -> bool {
        self.consumed >= self.initial / 2 && self.consumed > 0
    }

    /// Take the pending refund, restoring the window by the same amount.
    pub fn take_refund(&mut self) -> u32 {
        let refund = self.consumed;
        self.window += i64::from(refund);
        self.consumed = 0;
        refund
    }
}

/// Window pushed past `2^31 - 1`; FLOW_CONTROL_ERROR at the caller's
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOverflow;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_initial() {
        let fc = FlowControl::new(65_535);
        assert_eq!(fc.available(), 65_535);
        assert!(!fc.refund_due());
    }

    #[test]
    fn debit_and_refund_cycle() {
        let mut fc = FlowControl::new(65_535);

        fc.debit(30_000);
        assert_eq!(fc.available(), 35_535);
        assert!(!fc.refund_due());

        fc.debit(2_768);
        assert!(fc.refund_due());
        assert_eq!(fc.take_refund(), 32_768);
        assert_eq!(fc.available(), 65_535);
        assert!(!fc.refund_due());
    }

    #[test]
    fn credit_restores_send_window() {
        let mut fc = FlowControl::new(65_535);
        fc.debit(65_535);
        assert_eq!(fc.available(), 0);
        fc.credit(10_000).unwrap();
        assert_eq!(fc.available(), 10_000);
    }

    #[test]
    fn credit_overflow_detected() {
        let mut fc = FlowControl::new(65_535);
        assert_eq!(fc.credit(0x7FFF_FFFF - 65_535), Ok(()));
        assert_eq!(fc.available(), 0x7FFF_FFFF);
        assert_eq!(fc.credit(1), Err(WindowOverflow));
    }

    #[test]
    fn settings_shrink_can_go_negative() {
        let mut fc = FlowControl::new(65_535);
        fc.debit(40_000);
        fc.adjust(-(65_535 - 1_000));
        assert!(fc.available() < 0);

        // Credit brings it back above zero.
        fc.credit(65_535).unwrap();
        assert!(fc.available() > 0);
    }

    #[test]
    fn zero_initial_never_refunds() {
        let fc = FlowControl::new(0);
        assert!(!fc.refund_due());
    }
}

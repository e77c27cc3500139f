//! Cycle-scoped single-slot values.
//!
//! A mailbox carries a "next write" from one component to another. The
//! reader consumes it with [`Mailbox::take`]; whatever nobody consumed is
//! dropped at the cycle boundary by [`Mailbox::expire`]. Last writer in a
//! cycle wins.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox<T> {
    slot: Option<T>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: T) {
        self.slot = Some(value);
    }

    /// Read and clear.
    pub fn take(&mut self) -> Option<T> {
        self.slot.take()
    }

    pub fn peek(&self) -> Option<&T> {
        self.slot.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// Drop an unread value. Returns whether something was dropped.
    pub fn expire(&mut self) -> bool {
        self.slot.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_slot() {
        let mut m = Mailbox::new();
        assert_eq!(m.take(), None);
        m.write(true);
        assert_eq!(m.peek(), Some(&true));
        assert_eq!(m.take(), Some(true));
        assert_eq!(m.take(), None);
    }

    #[test]
    fn last_write_wins_and_expire_drops() {
        let mut m = Mailbox::new();
        m.write(1);
        m.write(2);
        assert!(m.is_pending());
        assert!(m.expire());
        assert!(!m.expire());
        assert_eq!(m.take(), None);
    }
}

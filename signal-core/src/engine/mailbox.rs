//! Depth-1 "latest wins" mailbox for deferred plan changes.

/// What the engine should run next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlanChange {
    pub sequence: u8,
    pub selector: u8,
    /// Plan slot that produced the change; `None` for unscheduled starts.
    pub plan: Option<u8>,
}

impl PlanChange {
    #[must_use]
    pub const fn new(sequence: u8, selector: u8, plan: Option<u8>) -> Self {
        Self {
            sequence,
            selector,
            plan,
        }
    }
}

/// Holds at most one pending [`PlanChange`]; a new post replaces the old one.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PlanMailbox {
    slot: Option<PlanChange>,
}

impl PlanMailbox {
    #[must_use]
    pub const fn new() -> Self {
        Self { slot: None }
    }

    /// Posts `change`, returning the request it superseded.
    pub fn post(&mut self, change: PlanChange) -> Option<PlanChange> {
        self.slot.replace(change)
    }

    pub fn take(&mut self) -> Option<PlanChange> {
        self.slot.take()
    }

    #[must_use]
    pub const fn peek(&self) -> Option<&PlanChange> {
        self.slot.as_ref()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_post_wins() {
        let mut mailbox = PlanMailbox::new();
        assert_eq!(mailbox.post(PlanChange::new(1, 0, Some(3))), None);
        let superseded = mailbox.post(PlanChange::new(2, 1, Some(4)));
        assert_eq!(superseded, Some(PlanChange::new(1, 0, Some(3))));
        assert_eq!(mailbox.take(), Some(PlanChange::new(2, 1, Some(4))));
        assert_eq!(mailbox.take(), None);
    }
}

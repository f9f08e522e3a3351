//! Interrupt-side inputs: tick flags, demand latches and debounced switches.
//!
//! Only the types in this module are shared with interrupt context. They are
//! built on atomics so the main loop can snapshot and clear them without a
//! critical section of its own.

use portable_atomic::{AtomicBool, Ordering};

/// Number of pedestrian/vehicle demand inputs.
pub const DEMAND_INPUTS: usize = 4;

/// Half-second and one-second flags raised by the tick source.
#[derive(Debug)]
pub struct TickFlags {
    half_second: AtomicBool,
    one_second: AtomicBool,
}

impl TickFlags {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            half_second: AtomicBool::new(false),
            one_second: AtomicBool::new(false),
        }
    }

    pub fn signal_half_second(&self) {
        self.half_second.store(true, Ordering::Release);
    }

    pub fn signal_one_second(&self) {
        self.one_second.store(true, Ordering::Release);
    }

    /// Reads and clears both flags.
    pub fn take(&self) -> TickSnapshot {
        TickSnapshot {
            half_second: self.half_second.swap(false, Ordering::AcqRel),
            one_second: self.one_second.swap(false, Ordering::AcqRel),
        }
    }
}

impl Default for TickFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick flags observed by one main-loop iteration.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickSnapshot {
    pub half_second: bool,
    pub one_second: bool,
}

impl TickSnapshot {
    pub const HALF: Self = Self {
        half_second: true,
        one_second: false,
    };
    pub const BOTH: Self = Self {
        half_second: true,
        one_second: true,
    };

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !self.half_second && !self.one_second
    }
}

/// Turns a steady half-second interrupt into the two tick flags.
#[derive(Debug, Default)]
pub struct TickDivider {
    odd: bool,
}

impl TickDivider {
    #[must_use]
    pub const fn new() -> Self {
        Self { odd: false }
    }

    /// Call once per half second; every second call also raises the one-second flag.
    pub fn on_half_second(&mut self, flags: &TickFlags) {
        flags.signal_half_second();
        if self.odd {
            flags.signal_one_second();
        }
        self.odd = !self.odd;
    }
}

/// Latched demand requests, one per input.
///
/// Set from the input scanner; cleared only by decision-point evaluation or
/// [`DemandLatch::clear_all`].
#[derive(Debug)]
pub struct DemandLatch {
    flags: [AtomicBool; DEMAND_INPUTS],
}

impl DemandLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flags: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
        }
    }

    /// Latches demand `index`; out-of-range inputs are ignored.
    pub fn set(&self, index: usize) {
        if let Some(flag) = self.flags.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        self.flags
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Current latches as a bit mask (bit `n` = input `n`).
    #[must_use]
    pub fn snapshot(&self) -> u8 {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| flag.load(Ordering::Acquire))
            .fold(0, |mask, (index, _)| mask | (1 << index))
    }

    /// Whether any input selected by `mask` is latched.
    #[must_use]
    pub fn any_in(&self, mask: u8) -> bool {
        self.snapshot() & mask != 0
    }

    pub fn clear_all(&self) {
        for flag in &self.flags {
            flag.store(false, Ordering::Release);
        }
    }
}

impl Default for DemandLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Consecutive stable scans required before an input level is believed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DebounceConfig {
    /// Demand inputs, scanned every 10 ms.
    pub demand_scans: u8,
    /// Manual-flash maintenance switch.
    pub maintenance_scans: u8,
}

impl DebounceConfig {
    #[must_use]
    pub const fn new(demand_scans: u8, maintenance_scans: u8) -> Self {
        Self {
            demand_scans,
            maintenance_scans,
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::new(2, 50)
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Debounced {
    level: bool,
    candidate: bool,
    stable: u8,
}

impl Debounced {
    /// Returns `true` when the accepted level changes to `sample`.
    fn update(&mut self, sample: bool, threshold: u8) -> bool {
        if sample != self.candidate {
            self.candidate = sample;
            self.stable = 0;
        }
        if self.candidate == self.level {
            self.stable = 0;
            return false;
        }
        self.stable = self.stable.saturating_add(1);
        if self.stable >= threshold.max(1) {
            self.level = self.candidate;
            self.stable = 0;
            return true;
        }
        false
    }
}

/// Edge detector feeding the [`DemandLatch`] from raw input levels.
#[derive(Debug)]
pub struct DemandScanner {
    inputs: [Debounced; DEMAND_INPUTS],
    threshold: u8,
}

impl DemandScanner {
    #[must_use]
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            inputs: [Debounced::default(); DEMAND_INPUTS],
            threshold: config.demand_scans,
        }
    }

    /// Feeds one scan of the inputs (`true` = request active).
    ///
    /// A request latches once it has read active for the configured number of
    /// consecutive scans; holding it does not latch again until released.
    pub fn scan(&mut self, active: [bool; DEMAND_INPUTS], latch: &DemandLatch) {
        for (index, (input, sample)) in self.inputs.iter_mut().zip(active).enumerate() {
            if input.update(sample, self.threshold) && input.level {
                latch.set(index);
            }
        }
    }
}

/// What the maintenance switch asks of the main loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchAction {
    /// Enter latched manual flash.
    EngageManualFlash,
    /// Stop servicing the watchdog so the controller resets.
    Halt,
}

/// Debounced manual-flash maintenance switch.
#[derive(Debug)]
pub struct MaintenanceSwitch {
    input: Debounced,
    threshold: u8,
    engaged: bool,
}

impl MaintenanceSwitch {
    #[must_use]
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            input: Debounced::default(),
            threshold: config.maintenance_scans,
            engaged: false,
        }
    }

    #[must_use]
    pub const fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Feeds one scan of the switch (`true` = pressed).
    pub fn scan(&mut self, pressed: bool) -> Option<SwitchAction> {
        if !self.input.update(pressed, self.threshold) {
            return None;
        }
        match (self.input.level, self.engaged) {
            (true, false) => {
                self.engaged = true;
                Some(SwitchAction::EngageManualFlash)
            }
            (false, true) => Some(SwitchAction::Halt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_flags_clear_on_take() {
        let flags = TickFlags::new();
        let mut divider = TickDivider::new();

        divider.on_half_second(&flags);
        assert_eq!(flags.take(), TickSnapshot::HALF);
        assert!(flags.take().is_idle());

        divider.on_half_second(&flags);
        assert_eq!(flags.take(), TickSnapshot::BOTH);
    }

    #[test]
    fn demand_latch_mask() {
        let latch = DemandLatch::new();
        latch.set(2);
        latch.set(DEMAND_INPUTS);
        assert_eq!(latch.snapshot(), 0b0100);
        assert!(latch.any_in(0b0110));
        assert!(!latch.any_in(0b0011));
        latch.clear_all();
        assert_eq!(latch.snapshot(), 0);
    }

    #[test]
    fn demand_requires_two_stable_scans() {
        let latch = DemandLatch::new();
        let mut scanner = DemandScanner::new(DebounceConfig::default());

        scanner.scan([true, false, false, false], &latch);
        scanner.scan([false, false, false, false], &latch);
        assert_eq!(latch.snapshot(), 0, "single-scan glitch must not latch");

        scanner.scan([false, true, false, false], &latch);
        assert_eq!(latch.snapshot(), 0);
        scanner.scan([false, true, false, false], &latch);
        assert_eq!(latch.snapshot(), 0b0010);

        latch.clear_all();
        scanner.scan([false, true, false, false], &latch);
        scanner.scan([false, true, false, false], &latch);
        assert_eq!(latch.snapshot(), 0, "held input latches once");
    }

    #[test]
    fn maintenance_switch_engages_then_halts() {
        let mut switch = MaintenanceSwitch::new(DebounceConfig::new(2, 3));

        assert_eq!(switch.scan(true), None);
        assert_eq!(switch.scan(true), None);
        assert_eq!(switch.scan(true), Some(SwitchAction::EngageManualFlash));
        assert!(switch.is_engaged());
        assert_eq!(switch.scan(true), None);

        assert_eq!(switch.scan(false), None);
        assert_eq!(switch.scan(false), None);
        assert_eq!(switch.scan(false), Some(SwitchAction::Halt));
    }
}

//! Plan scheduler.
//!
//! Caches the plan table and, once a minute, works out which plan should be
//! running from the wall clock, the weekday classifiers and the holiday table.
//! The scheduler never touches the outputs; it only commands a
//! [`PlanExecutor`].
//!
//! Selection rules:
//! - today's candidates are plans matching today whose start time has passed;
//!   the latest start wins and ties go to the higher slot;
//! - otherwise the latest-starting plan matching yesterday carries over past
//!   midnight;
//! - otherwise the engine is stopped, or put in fallback when the plan table
//!   is completely empty.

use core::fmt;

use crate::calendar::DateTime;
use crate::clock::{self, Clock, ClockError, ClockGuard};
use crate::engine::PlanChange;
use crate::store::layout::MAX_PLANS;
use crate::store::{self, NvStore, Plan, read_record};
use crate::telemetry::{ControllerEvent, EventSink, FallbackReason};

/// Commands the scheduler issues to whatever runs the sequences.
pub trait PlanExecutor {
    /// Starts a plan without waiting for an anchor step.
    fn start_plan<S, E>(&mut self, store: &mut S, change: PlanChange, sink: &mut E)
    where
        S: NvStore + ?Sized,
        E: EventSink + ?Sized;

    /// Queues a plan change for the next anchor step.
    fn request_plan_change<E: EventSink + ?Sized>(&mut self, change: PlanChange, sink: &mut E);

    /// Drops a queued plan change.
    fn cancel_plan_change(&mut self);

    fn stop<E: EventSink + ?Sized>(&mut self, sink: &mut E);

    fn enter_fallback<E: EventSink + ?Sized>(&mut self, reason: FallbackReason, sink: &mut E);

    /// What is actually running now.
    fn running_change(&self) -> Option<PlanChange>;

    fn pending_change(&self) -> Option<PlanChange>;
}

/// Outcome of the selection algorithm.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decision {
    /// Run the plan in this slot.
    Run(u8),
    /// Plans exist but none applies now.
    Stop,
    /// The plan table is empty.
    Fallback,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Run(plan) => write!(f, "run plan {plan}"),
            Decision::Stop => f.write_str("stop"),
            Decision::Fallback => f.write_str("fallback"),
        }
    }
}

/// Weekday and holiday status of one calendar day.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DayContext {
    pub weekday: u8,
    pub holiday: bool,
}

impl DayContext {
    #[must_use]
    pub const fn new(weekday: u8, holiday: bool) -> Self {
        Self { weekday, holiday }
    }
}

/// Picks the plan that should be running at `now_minute` (minutes since midnight).
#[must_use]
pub fn select_plan(
    plans: &[Plan],
    now_minute: u16,
    today: DayContext,
    yesterday: DayContext,
) -> Decision {
    let mut best_today: Option<(usize, u16)> = None;
    let mut best_yesterday: Option<(usize, u16)> = None;
    let mut any_configured = false;

    for (index, plan) in plans.iter().enumerate() {
        let Some(day_type) = plan.classifier() else {
            continue;
        };
        any_configured = true;
        let start = plan.start_minute();

        if day_type.matches(today.weekday, today.holiday)
            && start <= now_minute
            && best_today.is_none_or(|(_, best)| start >= best)
        {
            best_today = Some((index, start));
        }
        if day_type.matches(yesterday.weekday, yesterday.holiday)
            && best_yesterday.is_none_or(|(_, best)| start >= best)
        {
            best_yesterday = Some((index, start));
        }
    }

    match best_today.or(best_yesterday) {
        Some((index, _)) => u8::try_from(index).map_or(Decision::Fallback, Decision::Run),
        None if any_configured => Decision::Stop,
        None => Decision::Fallback,
    }
}

/// Result of one [`PlanScheduler::tick`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickOutcome {
    /// Not at the top of a minute.
    Waiting,
    /// The clock could not be read; nothing was decided.
    Skipped(ClockError),
    Evaluated(Decision),
}

/// Owns the cached plan table and the most recent selection.
#[derive(Clone, Debug)]
pub struct PlanScheduler {
    plans: [Plan; MAX_PLANS],
    selected: Option<u8>,
}

impl PlanScheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            plans: [Plan::EMPTY; MAX_PLANS],
            selected: None,
        }
    }

    #[must_use]
    pub const fn plans(&self) -> &[Plan; MAX_PLANS] {
        &self.plans
    }

    /// Plan slot chosen by the last evaluation, if any.
    #[must_use]
    pub const fn selected(&self) -> Option<u8> {
        self.selected
    }

    /// Re-reads the plan table. No decision is made.
    pub fn reload_cache<S: NvStore + ?Sized>(&mut self, store: &mut S) {
        for (index, slot) in self.plans.iter_mut().enumerate() {
            *slot = read_record(store, index).unwrap_or(Plan::EMPTY);
        }
    }

    /// Runs the selection algorithm for `now` against the cached plans.
    pub fn decide<S: NvStore + ?Sized>(&self, store: &mut S, now: &DateTime) -> Decision {
        let yesterday = now.previous_day();
        let today = DayContext::new(now.weekday, store::is_holiday(store, now.day, now.month));
        let yesterday = DayContext::new(
            yesterday.weekday,
            store::is_holiday(store, yesterday.day, yesterday.month),
        );
        select_plan(&self.plans, now.minute_of_day(), today, yesterday)
    }

    /// Loads the cache and starts the winning plan immediately.
    ///
    /// # Errors
    ///
    /// Returns the clock error when the time cannot be read; the executor is
    /// left untouched in that case.
    pub fn init<S, C, X, E>(
        &mut self,
        store: &mut S,
        clock: &mut C,
        guard: &ClockGuard,
        executor: &mut X,
        sink: &mut E,
    ) -> Result<Decision, ClockError>
    where
        S: NvStore + ?Sized,
        C: Clock + ?Sized,
        X: PlanExecutor,
        E: EventSink + ?Sized,
    {
        self.reload_cache(store);
        let now = read_clock(guard, clock, sink)?;
        let decision = self.decide(store, &now);
        self.apply(decision, store, executor, sink, true);
        Ok(decision)
    }

    /// Called once per elapsed second; re-evaluates at the top of each minute.
    pub fn tick<S, C, X, E>(
        &mut self,
        store: &mut S,
        clock: &mut C,
        guard: &ClockGuard,
        executor: &mut X,
        sink: &mut E,
    ) -> TickOutcome
    where
        S: NvStore + ?Sized,
        C: Clock + ?Sized,
        X: PlanExecutor,
        E: EventSink + ?Sized,
    {
        let now = match read_clock(guard, clock, sink) {
            Ok(now) => now,
            Err(error) => return TickOutcome::Skipped(error),
        };
        if now.second != 0 {
            return TickOutcome::Waiting;
        }
        TickOutcome::Evaluated(self.evaluate(store, &now, executor, sink))
    }

    /// Decides for `now` and commands the executor with a deferred change.
    pub fn evaluate<S, X, E>(
        &mut self,
        store: &mut S,
        now: &DateTime,
        executor: &mut X,
        sink: &mut E,
    ) -> Decision
    where
        S: NvStore + ?Sized,
        X: PlanExecutor,
        E: EventSink + ?Sized,
    {
        let decision = self.decide(store, now);
        self.apply(decision, store, executor, sink, false);
        decision
    }

    fn apply<S, X, E>(
        &mut self,
        decision: Decision,
        store: &mut S,
        executor: &mut X,
        sink: &mut E,
        immediate: bool,
    ) where
        S: NvStore + ?Sized,
        X: PlanExecutor,
        E: EventSink + ?Sized,
    {
        match decision {
            Decision::Run(index) => {
                let plan = self.plans[usize::from(index)];
                let change = PlanChange::new(plan.sequence, plan.selector, Some(index));
                if self.selected != Some(index) {
                    sink.record(ControllerEvent::PlanSelected { plan: index });
                }
                self.selected = Some(index);

                if immediate {
                    executor.start_plan(store, change, sink);
                } else if executor.running_change() == Some(change) {
                    if executor.pending_change().is_some() {
                        executor.cancel_plan_change();
                    }
                } else if executor.pending_change() != Some(change) {
                    executor.request_plan_change(change, sink);
                }
            }
            Decision::Stop => {
                self.selected = None;
                executor.stop(sink);
            }
            Decision::Fallback => {
                self.selected = None;
                executor.enter_fallback(FallbackReason::NoConfiguration, sink);
            }
        }
    }
}

impl Default for PlanScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_clock<C, E>(guard: &ClockGuard, clock: &mut C, sink: &mut E) -> Result<DateTime, ClockError>
where
    C: Clock + ?Sized,
    E: EventSink + ?Sized,
{
    clock::read_guarded(guard, clock).inspect_err(|error| {
        sink.record(match error {
            ClockError::Busy => ControllerEvent::ClockBusy,
            ClockError::Unavailable | ClockError::InvalidTime => ControllerEvent::ClockFault,
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{DayType, FRIDAY, MONDAY, SATURDAY, SUNDAY};

    const WEEKDAY: DayContext = DayContext::new(3, false);

    fn table(entries: &[(usize, Plan)]) -> [Plan; MAX_PLANS] {
        let mut plans = [Plan::EMPTY; MAX_PLANS];
        for (index, plan) in entries {
            plans[*index] = *plan;
        }
        plans
    }

    #[test]
    fn latest_elapsed_plan_wins_today() {
        let plans = table(&[
            (0, Plan::new(DayType::Everyday, 0, 0, 6, 0)),
            (1, Plan::new(DayType::Everyday, 1, 0, 9, 30)),
            (2, Plan::new(DayType::Everyday, 2, 0, 18, 0)),
        ]);
        assert_eq!(select_plan(&plans, 10 * 60, WEEKDAY, WEEKDAY), Decision::Run(1));
        assert_eq!(select_plan(&plans, 9 * 60 + 30, WEEKDAY, WEEKDAY), Decision::Run(1));
        assert_eq!(select_plan(&plans, 9 * 60 + 29, WEEKDAY, WEEKDAY), Decision::Run(0));
    }

    #[test]
    fn equal_start_times_prefer_higher_slot() {
        let plans = table(&[
            (3, Plan::new(DayType::Everyday, 0, 0, 7, 0)),
            (8, Plan::new(DayType::Weekdays, 1, 0, 7, 0)),
        ]);
        assert_eq!(select_plan(&plans, 8 * 60, WEEKDAY, WEEKDAY), Decision::Run(8));
    }

    #[test]
    fn yesterday_plan_carries_past_midnight() {
        let plans = table(&[
            (0, Plan::new(DayType::Friday, 0, 0, 22, 0)),
            (1, Plan::new(DayType::Saturday, 1, 0, 8, 0)),
        ]);
        let saturday = DayContext::new(SATURDAY, false);
        let friday = DayContext::new(FRIDAY, false);
        assert_eq!(select_plan(&plans, 60, saturday, friday), Decision::Run(0));
        assert_eq!(select_plan(&plans, 8 * 60, saturday, friday), Decision::Run(1));
    }

    #[test]
    fn holiday_uses_only_holiday_plans() {
        let plans = table(&[
            (0, Plan::new(DayType::Everyday, 0, 0, 0, 0)),
            (1, Plan::new(DayType::Holiday, 1, 0, 10, 0)),
        ]);
        let holiday = DayContext::new(MONDAY, true);
        let sunday = DayContext::new(SUNDAY, false);
        assert_eq!(select_plan(&plans, 11 * 60, holiday, sunday), Decision::Run(1));
        // Before the holiday plan starts, yesterday's everyday plan carries over.
        assert_eq!(select_plan(&plans, 9 * 60, holiday, sunday), Decision::Run(0));
    }

    #[test]
    fn empty_table_falls_back_and_unmatched_table_stops() {
        let empty = [Plan::EMPTY; MAX_PLANS];
        assert_eq!(select_plan(&empty, 0, WEEKDAY, WEEKDAY), Decision::Fallback);

        let mut unknown = [Plan::EMPTY; MAX_PLANS];
        unknown[0].day_type = 15;
        assert_eq!(select_plan(&unknown, 0, WEEKDAY, WEEKDAY), Decision::Fallback);

        let sunday_only = table(&[(0, Plan::new(DayType::Sunday, 0, 0, 0, 0))]);
        assert_eq!(select_plan(&sunday_only, 600, WEEKDAY, WEEKDAY), Decision::Stop);
    }
}

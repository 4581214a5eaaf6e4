//! Builder для `Sequence` действий.

use std::collections::VecDeque;
use std::time::Duration;

use super::{ActionId, ActionScheduler, Step, StepResult};

/// Накопитель шагов; ничего не запускается до `execute()`
///
/// ```ignore
/// let chain = host.scheduler()
///     .sequence()
///     .then_wait_ticks(5)
///     .then(|host| start_phase(host))
///     .then_wait(Duration::from_secs(2))
///     .then(|host| greet(host))
///     .execute();
/// ```
pub struct SequenceBuilder<'a, C> {
    scheduler: &'a mut ActionScheduler<C>,
    steps: VecDeque<Step<C>>,
}

impl<'a, C: 'static> SequenceBuilder<'a, C> {
    pub(super) fn new(scheduler: &'a mut ActionScheduler<C>) -> Self {
        Self {
            scheduler,
            steps: VecDeque::new(),
        }
    }

    pub fn then(mut self, step: impl FnOnce(&mut C) -> StepResult + 'static) -> Self {
        self.steps.push_back(Step::Run(Box::new(step)));
        self
    }

    pub fn then_wait(mut self, duration: Duration) -> Self {
        self.steps.push_back(Step::Wait(duration));
        self
    }

    pub fn then_wait_ticks(mut self, ticks: u32) -> Self {
        self.steps.push_back(Step::WaitTicks(ticks));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Один handle на всю цепочку
    pub fn execute(self) -> ActionId {
        self.scheduler.push_sequence(self.steps)
    }
}

//! ActionScheduler - cooperative отложенные действия
//!
//! # Архитектура
//!
//! Все действия - tagged enum в таблице `ActionId → Slot`:
//! - `OneShot` - один вызов по времени или по номеру тика
//! - `Repeating` - `count` вызовов с интервалом, потом auto-retire
//! - `EveryTick` - каждый тик, пока callback не вернёт `TickFlow::Stop`
//! - `Sequence` - шаги + ожидания, курсор двигается только после wait
//!
//! Хост вызывает `ActionScheduler::run_tick(host, dt)` один раз за тик.
//! Callback получает `&mut C` (весь хост, включая сам scheduler), поэтому
//! на время вызова действие вынимается из таблицы, а слот помечается
//! `Running`. `cancel()` изнутри callback'а помечает слот как отменённый,
//! и действие не возвращается в таблицу.
//!
//! Провалы шагов (Err или panic) логируются и не выходят за пределы тика.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::ActionError;
use crate::logger::{log, log_warning};

mod sequence;

pub use sequence::SequenceBuilder;

pub type StepResult = Result<(), ActionError>;

/// Handle запланированного действия
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

/// Ответ every-tick callback'а
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// Хост, внутри которого живёт scheduler
pub trait SchedulerHost: Sized + 'static {
    fn scheduler(&mut self) -> &mut ActionScheduler<Self>;
}

type OnceFn<C> = Box<dyn FnOnce(&mut C) -> StepResult>;
type RepeatFn<C> = Box<dyn FnMut(&mut C, u32) -> StepResult>;
type TickFn<C> = Box<dyn FnMut(&mut C, ActionId) -> Result<TickFlow, ActionError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    At(Duration),
    Tick(u64),
}

enum Step<C> {
    Run(OnceFn<C>),
    Wait(Duration),
    WaitTicks(u32),
}

enum Action<C> {
    OneShot {
        due: Due,
        callback: OnceFn<C>,
    },
    Repeating {
        interval: Duration,
        next: Duration,
        remaining: u32,
        fired: u32,
        callback: RepeatFn<C>,
    },
    EveryTick {
        callback: TickFn<C>,
    },
    Sequence {
        steps: VecDeque<Step<C>>,
        waiting: Option<Due>,
        /// Шаг провалился - цепочка стоит до явного cancel
        stalled: bool,
    },
}

enum Slot<C> {
    Idle(Action<C>),
    Running { cancelled: bool },
}

pub struct ActionScheduler<C> {
    slots: BTreeMap<ActionId, Slot<C>>,
    next_id: u64,
    elapsed: Duration,
    tick: u64,
}

impl<C> Default for ActionScheduler<C> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            next_id: 1,
            elapsed: Duration::ZERO,
            tick: 0,
        }
    }
}

impl<C: 'static> ActionScheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler time (сумма dt всех тиков)
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Действие ещё в таблице и не отменено
    pub fn is_active(&self, id: ActionId) -> bool {
        match self.slots.get(&id) {
            Some(Slot::Idle(_)) => true,
            Some(Slot::Running { cancelled }) => !cancelled,
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| !matches!(slot, Slot::Running { cancelled: true }))
            .count()
    }

    /// Один вызов через `duration` scheduler time
    pub fn delay(
        &mut self,
        duration: Duration,
        callback: impl FnOnce(&mut C) -> StepResult + 'static,
    ) -> ActionId {
        let due = Due::At(self.elapsed + duration);
        self.insert(Action::OneShot {
            due,
            callback: Box::new(callback),
        })
    }

    /// Один вызов через `ticks` тиков
    pub fn delay_ticks(
        &mut self,
        ticks: u32,
        callback: impl FnOnce(&mut C) -> StepResult + 'static,
    ) -> ActionId {
        let due = Due::Tick(self.tick + u64::from(ticks));
        self.insert(Action::OneShot {
            due,
            callback: Box::new(callback),
        })
    }

    /// `count` вызовов каждые `interval`; callback получает номер вызова (с нуля)
    pub fn repeat(
        &mut self,
        interval: Duration,
        count: u32,
        callback: impl FnMut(&mut C, u32) -> StepResult + 'static,
    ) -> ActionId {
        if count == 0 {
            // Пустой repeat сразу считается завершённым
            return self.allocate_id();
        }

        let next = self.elapsed + interval;
        self.insert(Action::Repeating {
            interval,
            next,
            remaining: count,
            fired: 0,
            callback: Box::new(callback),
        })
    }

    /// Каждый тик, пока callback не вернёт `TickFlow::Stop` или handle не отменён
    pub fn every_tick(
        &mut self,
        callback: impl FnMut(&mut C, ActionId) -> Result<TickFlow, ActionError> + 'static,
    ) -> ActionId {
        self.insert(Action::EveryTick {
            callback: Box::new(callback),
        })
    }

    /// Builder последовательности шагов
    pub fn sequence(&mut self) -> SequenceBuilder<'_, C> {
        SequenceBuilder::new(self)
    }

    /// Idempotent: повторная отмена или отмена завершённого - no-op (false)
    pub fn cancel(&mut self, id: ActionId) -> bool {
        match self.slots.get_mut(&id) {
            Some(Slot::Idle(_)) => {
                self.slots.remove(&id);
                true
            }
            Some(Slot::Running { cancelled }) => {
                let was_live = !*cancelled;
                *cancelled = true;
                was_live
            }
            None => false,
        }
    }

    /// Отменить всё (shutdown)
    pub fn cancel_all(&mut self) -> usize {
        let ids: Vec<ActionId> = self.slots.keys().copied().collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    fn push_sequence(&mut self, steps: VecDeque<Step<C>>) -> ActionId {
        self.insert(Action::Sequence {
            steps,
            waiting: None,
            stalled: false,
        })
    }

    fn allocate_id(&mut self) -> ActionId {
        let id = ActionId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert(&mut self, action: Action<C>) -> ActionId {
        let id = self.allocate_id();
        self.slots.insert(id, Slot::Idle(action));
        id
    }

    fn is_due(&self, due: Due) -> bool {
        match due {
            Due::At(at) => self.elapsed >= at,
            Due::Tick(tick) => self.tick >= tick,
        }
    }

    fn is_cancelled(&self, id: ActionId) -> bool {
        !matches!(self.slots.get(&id), Some(Slot::Running { cancelled: false }))
    }

    /// Вынуть действие на время вызова
    fn begin(&mut self, id: ActionId) -> Option<Action<C>> {
        let slot = self.slots.get_mut(&id)?;
        match std::mem::replace(slot, Slot::Running { cancelled: false }) {
            Slot::Idle(action) => Some(action),
            running => {
                *slot = running;
                None
            }
        }
    }

    /// Вернуть действие в таблицу (если не отменено и не завершено)
    fn finish(&mut self, id: ActionId, outcome: Option<Action<C>>) {
        let live = matches!(self.slots.get(&id), Some(Slot::Running { cancelled: false }));
        match outcome {
            Some(action) if live => {
                self.slots.insert(id, Slot::Idle(action));
            }
            _ => {
                self.slots.remove(&id);
            }
        }
    }
}

impl<C: SchedulerHost> ActionScheduler<C> {
    /// Продвинуть scheduler на один тик хоста
    ///
    /// Действия, созданные во время тика, впервые проверяются на следующем.
    pub fn run_tick(host: &mut C, dt: Duration) {
        let ids: Vec<ActionId> = {
            let scheduler = host.scheduler();
            scheduler.tick += 1;
            scheduler.elapsed += dt;
            scheduler.slots.keys().copied().collect()
        };

        for id in ids {
            let Some(action) = host.scheduler().begin(id) else {
                continue;
            };
            let outcome = Self::advance(host, id, action);
            host.scheduler().finish(id, outcome);
        }
    }

    fn advance(host: &mut C, id: ActionId, action: Action<C>) -> Option<Action<C>> {
        match action {
            Action::OneShot { due, callback } => {
                if !host.scheduler().is_due(due) {
                    return Some(Action::OneShot { due, callback });
                }
                if let Err(err) = guarded(|| callback(host)) {
                    log_warning(&format!("Scheduler: one-shot {:?} failed: {}", id, err));
                }
                None
            }

            Action::Repeating {
                interval,
                mut next,
                mut remaining,
                mut fired,
                mut callback,
            } => {
                if host.scheduler().elapsed < next {
                    return Some(Action::Repeating { interval, next, remaining, fired, callback });
                }
                if let Err(err) = guarded(|| callback(host, fired)) {
                    log_warning(&format!("Scheduler: repeat {:?} call {} failed: {}", id, fired, err));
                }
                fired += 1;
                remaining -= 1;
                next += interval;
                if remaining == 0 {
                    return None;
                }
                Some(Action::Repeating { interval, next, remaining, fired, callback })
            }

            Action::EveryTick { mut callback } => match guarded(|| callback(host, id)) {
                Ok(TickFlow::Continue) => Some(Action::EveryTick { callback }),
                Ok(TickFlow::Stop) => None,
                Err(err) => {
                    log_warning(&format!("Scheduler: every-tick {:?} retired after failure: {}", id, err));
                    None
                }
            },

            Action::Sequence {
                mut steps,
                mut waiting,
                stalled,
            } => {
                if stalled {
                    return Some(Action::Sequence { steps, waiting, stalled });
                }

                loop {
                    if let Some(due) = waiting {
                        if !host.scheduler().is_due(due) {
                            return Some(Action::Sequence { steps, waiting, stalled: false });
                        }
                        waiting = None;
                    }

                    let scheduler = host.scheduler();
                    match steps.pop_front() {
                        None => return None,
                        Some(Step::Wait(duration)) => {
                            waiting = Some(Due::At(scheduler.elapsed + duration));
                        }
                        Some(Step::WaitTicks(ticks)) => {
                            waiting = Some(Due::Tick(scheduler.tick + u64::from(ticks)));
                        }
                        Some(Step::Run(step)) => {
                            if let Err(err) = guarded(|| step(host)) {
                                log_warning(&format!(
                                    "Scheduler: sequence {:?} stalled ({} steps left): {}",
                                    id,
                                    steps.len(),
                                    err
                                ));
                                return Some(Action::Sequence { steps, waiting, stalled: true });
                            }
                            if host.scheduler().is_cancelled(id) {
                                log(&format!("Scheduler: sequence {:?} cancelled from its own step", id));
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Panic внутри callback'а превращается в `ActionError::Panicked`
fn guarded<T>(call: impl FnOnce() -> Result<T, ActionError>) -> Result<T, ActionError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ActionError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod scheduler_tests;

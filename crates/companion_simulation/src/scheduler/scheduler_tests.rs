//! Tests for ActionScheduler.

#[cfg(test)]
mod tests {
    use super::super::{ActionId, ActionScheduler, SchedulerHost, TickFlow};
    use crate::error::ActionError;
    use crate::logger::{capture_logs, LogLevel};
    use std::time::Duration;

    const DT: Duration = Duration::from_millis(100);

    /// Минимальный хост: scheduler + журнал событий
    #[derive(Default)]
    struct TestHost {
        scheduler: ActionScheduler<TestHost>,
        events: Vec<String>,
        counter: u32,
        self_handle: Option<ActionId>,
    }

    impl SchedulerHost for TestHost {
        fn scheduler(&mut self) -> &mut ActionScheduler<Self> {
            &mut self.scheduler
        }
    }

    fn run(host: &mut TestHost, ticks: usize) {
        for _ in 0..ticks {
            ActionScheduler::run_tick(host, DT);
        }
    }

    #[test]
    fn test_delay_fires_once_after_duration() {
        let mut host = TestHost::default();
        let id = host.scheduler.delay(Duration::from_millis(300), |h: &mut TestHost| {
            h.events.push("fired".into());
            Ok(())
        });

        run(&mut host, 2);
        assert!(host.events.is_empty());
        assert!(host.scheduler.is_active(id));

        run(&mut host, 1);
        assert_eq!(host.events, vec!["fired"]);
        assert!(!host.scheduler.is_active(id));

        run(&mut host, 5);
        assert_eq!(host.events.len(), 1);
    }

    #[test]
    fn test_delay_ticks() {
        let mut host = TestHost::default();
        host.scheduler.delay_ticks(3, |h: &mut TestHost| {
            h.counter += 1;
            Ok(())
        });

        run(&mut host, 2);
        assert_eq!(host.counter, 0);
        run(&mut host, 1);
        assert_eq!(host.counter, 1);
    }

    #[test]
    fn test_repeat_runs_count_times_then_retires() {
        let mut host = TestHost::default();
        let id = host.scheduler.repeat(Duration::from_millis(200), 3, |h: &mut TestHost, i| {
            h.events.push(format!("line {}", i));
            Ok(())
        });

        run(&mut host, 10);
        assert_eq!(host.events, vec!["line 0", "line 1", "line 2"]);
        assert!(!host.scheduler.is_active(id));
        assert_eq!(host.scheduler.active_count(), 0);
    }

    #[test]
    fn test_every_tick_stops_itself() {
        let mut host = TestHost::default();
        host.scheduler.every_tick(|h: &mut TestHost, _id| {
            h.counter += 1;
            if h.counter == 4 {
                return Ok(TickFlow::Stop);
            }
            Ok(TickFlow::Continue)
        });

        run(&mut host, 10);
        assert_eq!(host.counter, 4);
        assert_eq!(host.scheduler.active_count(), 0);
    }

    #[test]
    fn test_reentrant_cancel_from_own_callback() {
        let mut host = TestHost::default();
        let id = host.scheduler.every_tick(|h: &mut TestHost, own| {
            h.counter += 1;
            if h.counter == 2 {
                // Отмена собственного handle изнутри callback'а
                assert!(h.scheduler.cancel(own));
                assert!(!h.scheduler.cancel(own));
            }
            Ok(TickFlow::Continue)
        });
        host.self_handle = Some(id);

        run(&mut host, 6);
        assert_eq!(host.counter, 2);
        assert!(!host.scheduler.is_active(id));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut host = TestHost::default();
        let id = host.scheduler.delay(Duration::from_secs(1), |h: &mut TestHost| {
            h.counter += 1;
            Ok(())
        });

        assert!(host.scheduler.cancel(id));
        assert!(!host.scheduler.cancel(id));
        run(&mut host, 20);
        assert_eq!(host.counter, 0);

        // Отмена завершённого - тоже no-op
        let done = host.scheduler.delay_ticks(1, |_h: &mut TestHost| Ok(()));
        run(&mut host, 2);
        assert!(!host.scheduler.cancel(done));
    }

    #[test]
    fn test_sequence_respects_waits_and_order() {
        let mut host = TestHost::default();
        let id = host
            .scheduler
            .sequence()
            .then(|h: &mut TestHost| {
                h.events.push("a".into());
                Ok(())
            })
            .then_wait(Duration::from_millis(250))
            .then(|h: &mut TestHost| {
                h.events.push("b".into());
                Ok(())
            })
            .then_wait_ticks(2)
            .then(|h: &mut TestHost| {
                h.events.push("c".into());
                Ok(())
            })
            .execute();

        run(&mut host, 1);
        assert_eq!(host.events, vec!["a"]);
        run(&mut host, 2);
        assert_eq!(host.events, vec!["a"]);
        run(&mut host, 1); // 400ms >= 100ms + 250ms
        assert_eq!(host.events, vec!["a", "b"]);
        run(&mut host, 1);
        assert_eq!(host.events, vec!["a", "b"]);
        run(&mut host, 1);
        assert_eq!(host.events, vec!["a", "b", "c"]);
        assert!(!host.scheduler.is_active(id));
    }

    #[test]
    fn test_failed_step_stalls_sequence_until_cancelled() {
        let mut host = TestHost::default();
        let id = host
            .scheduler
            .sequence()
            .then(|_h: &mut TestHost| Err(ActionError::Failed("backend refused".into())))
            .then(|h: &mut TestHost| {
                h.events.push("never".into());
                Ok(())
            })
            .execute();

        run(&mut host, 5);
        assert!(host.events.is_empty());
        assert!(host.scheduler.is_active(id));

        assert!(host.scheduler.cancel(id));
        assert_eq!(host.scheduler.active_count(), 0);
    }

    #[test]
    fn test_panicking_callback_does_not_break_tick_loop() {
        let mut host = TestHost::default();
        host.scheduler.delay_ticks(1, |_h: &mut TestHost| -> Result<(), ActionError> {
            panic!("boom");
        });
        host.scheduler.delay_ticks(1, |h: &mut TestHost| {
            h.counter += 1;
            Ok(())
        });

        run(&mut host, 2);
        assert_eq!(host.counter, 1);
        assert_eq!(host.scheduler.active_count(), 0);
    }

    #[test]
    fn test_failures_are_logged_as_warnings() {
        let logs = capture_logs();
        let mut host = TestHost::default();
        host.scheduler
            .sequence()
            .then(|_h: &mut TestHost| Err(ActionError::Failed("ledger locked".into())))
            .then(|_h: &mut TestHost| Ok(()))
            .execute();
        host.scheduler.delay_ticks(1, |_h: &mut TestHost| -> Result<(), ActionError> {
            panic!("inventory exploded");
        });
        host.scheduler
            .every_tick(|_h: &mut TestHost, _id| -> Result<TickFlow, ActionError> {
                Err(ActionError::Failed("seek target lost".into()))
            });

        run(&mut host, 2);

        assert!(logs.contains(LogLevel::Warning, "stalled (1 steps left): step failed: ledger locked"));
        assert!(logs.contains(LogLevel::Warning, "failed: step panicked: inventory exploded"));
        assert!(logs.contains(LogLevel::Warning, "retired after failure: step failed: seek target lost"));
        // Тик жив: упавшие действия сняты, застрявшая цепочка ждёт cancel
        assert_eq!(host.scheduler.active_count(), 1);
    }

    #[test]
    fn test_sequence_step_can_cancel_whole_chain() {
        let mut host = TestHost::default();
        let id = host
            .scheduler
            .sequence()
            .then(|h: &mut TestHost| {
                if let Some(own) = h.self_handle {
                    h.scheduler.cancel(own);
                }
                Ok(())
            })
            .then(|h: &mut TestHost| {
                h.events.push("after cancel".into());
                Ok(())
            })
            .execute();
        host.self_handle = Some(id);

        run(&mut host, 3);
        assert!(host.events.is_empty());
        assert!(!host.scheduler.is_active(id));
    }

    #[test]
    fn test_actions_scheduled_inside_tick_start_next_tick() {
        let mut host = TestHost::default();
        host.scheduler.delay_ticks(1, |h: &mut TestHost| {
            h.scheduler.delay_ticks(0, |inner: &mut TestHost| {
                inner.events.push("nested".into());
                Ok(())
            });
            Ok(())
        });

        run(&mut host, 1);
        assert!(host.events.is_empty());
        run(&mut host, 1);
        assert_eq!(host.events, vec!["nested"]);
    }

    #[test]
    fn test_cancel_all() {
        let mut host = TestHost::default();
        host.scheduler.every_tick(|_h: &mut TestHost, _| Ok(TickFlow::Continue));
        host.scheduler.delay(Duration::from_secs(5), |_h: &mut TestHost| Ok(()));
        assert_eq!(host.scheduler.cancel_all(), 2);
        assert_eq!(host.scheduler.active_count(), 0);
    }
}

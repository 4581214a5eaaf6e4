//! Tests for CompanionState.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::scheduler::ActionScheduler;

    struct Host {
        scheduler: ActionScheduler<Host>,
    }

    impl crate::scheduler::SchedulerHost for Host {
        fn scheduler(&mut self) -> &mut ActionScheduler<Self> {
            &mut self.scheduler
        }
    }

    #[test]
    fn test_present_states() {
        assert!(!Lifecycle::Absent.is_present());
        assert!(!Lifecycle::Hidden.is_present());
        for lifecycle in [Lifecycle::Spawning, Lifecycle::Idle, Lifecycle::Following, Lifecycle::Leaving] {
            assert!(lifecycle.is_present(), "{:?}", lifecycle);
        }
        assert!(Lifecycle::Idle.is_ready());
        assert!(!Lifecycle::Spawning.is_ready());
    }

    #[test]
    fn test_busy_window() {
        let mut state = CompanionState::new(OwnerId(1), &FollowConfig::default());
        assert!(!state.is_busy(Duration::ZERO));

        state.mark_busy(Duration::from_secs(1), Duration::from_millis(1500));
        assert!(state.is_busy(Duration::from_millis(2400)));
        assert!(!state.is_busy(Duration::from_millis(2500)));
    }

    #[test]
    fn test_take_actions_includes_follow_tick() {
        let mut host = Host {
            scheduler: ActionScheduler::new(),
        };
        let chain = host.scheduler.delay(Duration::from_secs(1), |_| Ok(()));
        let tick = host.scheduler.delay(Duration::from_secs(1), |_| Ok(()));

        let mut state = CompanionState::new(OwnerId(1), &FollowConfig::default());
        state.track(chain);
        state.follow.active = true;
        state.follow.action = Some(tick);

        let actions = state.take_actions();
        assert_eq!(actions, vec![chain, tick]);
        assert!(state.active_actions.is_empty());
        assert!(!state.follow.active);
        assert!(state.take_actions().is_empty());
    }

    #[test]
    fn test_swap_action_is_untracked_and_taken() {
        let mut host = Host {
            scheduler: ActionScheduler::new(),
        };
        let chain = host.scheduler.delay(Duration::from_secs(1), |_| Ok(()));
        let swap = host.scheduler.delay_ticks(3, |_| Ok(()));

        let mut state = CompanionState::new(OwnerId(1), &FollowConfig::default());
        state.track(chain);
        state.track(swap);
        state.swap_action = Some(swap);

        state.untrack(swap);
        assert_eq!(state.active_actions.len(), 1);

        state.track(swap);
        assert_eq!(state.take_actions(), vec![chain, swap]);
        assert!(state.swap_action.is_none());
    }

    #[test]
    fn test_owns_handles() {
        let mut world = World::new();
        let anchor = world.spawn_empty().id();
        let mobile = world.spawn_empty().id();
        let stranger = world.spawn_empty().id();

        let state = CompanionState::hidden(OwnerId(9), Some(anchor), Some(mobile), &FollowConfig::default());
        assert_eq!(state.lifecycle, Lifecycle::Hidden);
        assert!(state.owns(anchor));
        assert!(state.owns(mobile));
        assert!(!state.owns(stranger));
    }
}

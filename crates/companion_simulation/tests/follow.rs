//! Follow integration test
//!
//! Trailing-waypoint следование, телепорт при отрыве, скорость,
//! отсутствие утечек scheduler handles.

use bevy::prelude::*;
use companion_simulation::*;
use std::time::Duration;

const P1: OwnerId = OwnerId(1);

/// Helper: компаньон в Idle рядом с owner'ом в (0, 0, 0)
fn setup_idle() -> HeadlessRuntime {
    let mut runtime = CompanionRuntime::new(EcsWorldBackend::new(), MemoryStore::new(), CompanionConfig::default());
    runtime.backend_mut().spawn_owner(P1, "Alice", Vec3::ZERO);
    runtime.initialize();
    runtime.spawn(P1).unwrap();
    let duration = runtime.config().spawn_sequence_duration() + Duration::from_millis(250);
    runtime.run_for(duration);
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Idle);
    runtime
}

fn step(runtime: &mut HeadlessRuntime) {
    let dt = runtime.config().tick_duration();
    runtime.tick(dt);
}

fn mobile(runtime: &HeadlessRuntime) -> Entity {
    runtime.get_companion(P1).and_then(|state| state.mobile).unwrap()
}

fn anchor(runtime: &HeadlessRuntime) -> Entity {
    runtime.get_companion(P1).and_then(|state| state.anchor).unwrap()
}

#[test]
fn test_toggle_follow_twice_returns_to_idle_without_leaks() {
    let mut runtime = setup_idle();
    assert_eq!(runtime.actions().active_count(), 0);

    assert_eq!(runtime.toggle_follow(P1).unwrap(), CommandOutcome::Applied);
    assert!(runtime.is_following(P1));
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Following);
    assert_eq!(runtime.actions().active_count(), 1);
    step(&mut runtime);

    assert_eq!(runtime.toggle_follow(P1).unwrap(), CommandOutcome::Applied);
    assert!(!runtime.is_following(P1));
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Idle);
    assert_eq!(runtime.actions().active_count(), 0);

    let state = runtime.get_companion(P1).unwrap();
    assert!(state.follow.history.is_empty());
    assert!(state.follow.action.is_none());
    assert!(state.active_actions.is_empty());
}

#[test]
fn test_start_follow_is_idempotent() {
    let mut runtime = setup_idle();
    assert_eq!(runtime.start_follow(P1).unwrap(), CommandOutcome::Applied);
    assert_eq!(runtime.start_follow(P1).unwrap(), CommandOutcome::AlreadyInState);
    assert_eq!(runtime.actions().active_count(), 1);

    assert_eq!(runtime.stop_follow(P1).unwrap(), CommandOutcome::Applied);
    assert_eq!(runtime.stop_follow(P1).unwrap(), CommandOutcome::AlreadyInState);
}

#[test]
fn test_companion_chases_trailing_waypoint() {
    let mut runtime = setup_idle();
    runtime.start_follow(P1).unwrap();
    step(&mut runtime);

    runtime.backend_mut().move_owner(P1, Vec3::new(5.0, 0.0, 0.0));
    step(&mut runtime);
    runtime.backend_mut().move_owner(P1, Vec3::new(10.0, 0.0, 0.0));
    step(&mut runtime);

    // Цель - где owner был, а не где он сейчас
    let body = mobile(&runtime);
    let state = runtime.get_companion(P1).unwrap();
    assert_eq!(state.follow.current_target, Some(Vec3::new(5.0, 0.0, 0.0)));
    assert_eq!(state.follow.history.len(), 2);
    assert_eq!(runtime.backend().seek_target(body), Some(Vec3::new(5.0, 0.0, 0.0)));

    runtime.run_for(Duration::from_secs(10));

    let position = runtime.backend().read_position(body).unwrap();
    assert!(position.distance(Vec3::new(10.0, 0.0, 0.0)) < 0.5, "body at {:?}", position);
    let anchor_position = runtime.backend().read_position(anchor(&runtime)).unwrap();
    assert!((anchor_position.y - position.y - 215.0).abs() < 1e-3);
}

#[test]
fn test_owner_far_away_triggers_teleport_and_clears_history() {
    let mut runtime = setup_idle();
    runtime.start_follow(P1).unwrap();
    runtime.backend_mut().move_owner(P1, Vec3::new(5.0, 0.0, 0.0));
    step(&mut runtime);
    runtime.backend_mut().move_owner(P1, Vec3::new(10.0, 0.0, 0.0));
    step(&mut runtime);
    assert!(!runtime.get_companion(P1).unwrap().follow.history.is_empty());

    let far = Vec3::new(60.0, 0.0, 0.0);
    runtime.backend_mut().move_owner(P1, far);
    step(&mut runtime);

    let state = runtime.get_companion(P1).unwrap();
    assert!(state.follow.history.is_empty());
    assert_eq!(state.follow.current_target, None);
    assert_eq!(runtime.backend().read_position(mobile(&runtime)), Some(far));
    assert_eq!(
        runtime.backend().read_position(anchor(&runtime)),
        Some(far + Vec3::new(0.0, 215.0, 0.0))
    );
    assert!(runtime.is_following(P1));
}

#[test]
fn test_height_difference_triggers_teleport() {
    let mut runtime = setup_idle();
    runtime.start_follow(P1).unwrap();

    let upstairs = Vec3::new(1.0, 5.0, 0.0);
    runtime.backend_mut().move_owner(P1, upstairs);
    step(&mut runtime);

    assert_eq!(runtime.backend().read_position(mobile(&runtime)), Some(upstairs));
}

#[test]
fn test_speed_follows_owner_and_mount() {
    let mut runtime = setup_idle();
    runtime.start_follow(P1).unwrap();
    step(&mut runtime);

    // Owner стоит: минимальная скорость
    let body = mobile(&runtime);
    let speed = runtime.backend().move_speed(body).unwrap();
    assert!((speed - 2.0 * 0.95).abs() < 1e-4, "speed {}", speed);

    runtime.backend_mut().set_owner_speed(P1, 6.0);
    step(&mut runtime);
    let speed = runtime.backend().move_speed(body).unwrap();
    assert!((speed - 6.0 * 0.95).abs() < 1e-4, "speed {}", speed);

    let character = runtime.backend().character(P1).unwrap();
    let mounted = runtime.config().buffs.mounted;
    runtime.backend_mut().apply_buff(character, mounted, None).unwrap();
    step(&mut runtime);
    let speed = runtime.backend().move_speed(body).unwrap();
    assert!((speed - 6.0 * 5.0 * 0.95).abs() < 1e-3, "speed {}", speed);
}

#[test]
fn test_follow_stops_when_body_destroyed() {
    let mut runtime = setup_idle();
    runtime.start_follow(P1).unwrap();
    step(&mut runtime);

    let body = mobile(&runtime);
    runtime.backend_mut().destroy(body);
    step(&mut runtime);

    assert!(!runtime.is_following(P1));
    assert_eq!(runtime.actions().active_count(), 0);
}

#[test]
fn test_follow_started_during_spawn_lands_in_following() {
    let mut runtime = CompanionRuntime::new(EcsWorldBackend::new(), MemoryStore::new(), CompanionConfig::default());
    runtime.backend_mut().spawn_owner(P1, "Alice", Vec3::ZERO);
    runtime.initialize();
    runtime.spawn(P1).unwrap();

    assert_eq!(runtime.start_follow(P1).unwrap(), CommandOutcome::Applied);
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Spawning);

    let duration = runtime.config().spawn_sequence_duration() + Duration::from_millis(250);
    runtime.run_for(duration);
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Following);
    assert!(runtime.is_following(P1));
}

#[test]
fn test_dismiss_stops_follow_and_hidden_rejects_follow() {
    let mut runtime = setup_idle();
    runtime.start_follow(P1).unwrap();
    step(&mut runtime);

    runtime.dismiss(P1).unwrap();
    assert!(!runtime.is_following(P1));
    assert_eq!(runtime.start_follow(P1).unwrap(), CommandOutcome::AlreadyBusy);

    let duration = runtime.config().dismiss_sequence_duration() + Duration::from_millis(250);
    runtime.run_for(duration);
    assert_eq!(runtime.lifecycle(P1), Lifecycle::Hidden);
    assert!(matches!(
        runtime.toggle_follow(P1),
        Err(CompanionError::NoCompanion(P1))
    ));
    assert_eq!(runtime.actions().active_count(), 0);
}

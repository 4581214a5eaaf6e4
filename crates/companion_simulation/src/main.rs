//! Headless симуляция компаньона
//!
//! Один owner: spawn → follow (owner идёт по прямой, потом телепортируется)
//! → dismiss. Тикаем с частотой из конфига, печатаем прогресс.
//!
//! Путь к TOML конфигу можно передать первым аргументом.

use bevy::prelude::*;
use companion_simulation::*;
use std::time::Duration;

const OWNER: OwnerId = OwnerId(76561198000000001);

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => match std::fs::read_to_string(&path)
            .map_err(|err| err.to_string())
            .and_then(|text| CompanionConfig::from_toml_str(&text).map_err(|err| err.to_string()))
        {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Config {} rejected: {}", path, err);
                std::process::exit(1);
            }
        },
        None => CompanionConfig::default(),
    };

    println!("Starting companion headless simulation ({} Hz)", config.tick_rate_hz);
    set_log_level(LogLevel::Info);

    let mut runtime = create_headless_runtime(config);
    runtime
        .backend_mut()
        .spawn_owner(OWNER, "Wanderer", Vec3::ZERO);
    runtime
        .backend_mut()
        .set_owner_aim(OWNER, Vec3::new(2.0, 0.0, 0.0));

    let report = runtime.initialize();
    println!("Reconciliation: {:?}", report);

    if let Err(err) = run(&mut runtime) {
        eprintln!("Simulation failed: {}", err);
        std::process::exit(1);
    }

    println!("Simulation complete!");
}

fn run(runtime: &mut HeadlessRuntime) -> Result<(), CompanionError> {
    let outcome = runtime.spawn(OWNER)?;
    println!("spawn: {:?}", outcome);
    if !outcome.is_applied() {
        return Ok(());
    }
    let spawn_time = runtime.config().spawn_sequence_duration();
    runtime.run_for(spawn_time);
    print_status(runtime, "after spawn");

    println!("follow: {:?}", runtime.toggle_follow(OWNER)?);
    runtime.backend_mut().set_owner_speed(OWNER, 4.0);
    let dt = runtime.config().tick_duration();
    for tick in 0..600u32 {
        // Owner идёт по оси X со скоростью 4 м/с
        let x = 4.0 * dt.as_secs_f32() * tick as f32;
        runtime.backend_mut().move_owner(OWNER, Vec3::new(x, 0.0, 0.0));
        runtime.tick(dt);

        if tick % 120 == 0 {
            print_status(runtime, &format!("tick {}", tick));
        }
    }

    // Рывок на 50 метров - компаньон догоняет телепортом
    runtime
        .backend_mut()
        .move_owner(OWNER, Vec3::new(90.0, 0.0, 0.0));
    runtime.tick(dt);
    print_status(runtime, "after owner teleport");

    println!("dismiss: {:?}", runtime.dismiss(OWNER)?);
    let dismiss_time = runtime.config().dismiss_sequence_duration() + Duration::from_millis(100);
    runtime.run_for(dismiss_time);
    print_status(runtime, "after dismiss");

    println!(
        "Scheduler: {} ticks, {:.1}s simulated",
        runtime.actions().tick_count(),
        runtime.actions().elapsed().as_secs_f32()
    );
    runtime.shutdown(false);
    Ok(())
}

fn print_status(runtime: &HeadlessRuntime, label: &str) {
    let Some(state) = runtime.get_companion(OWNER) else {
        println!("[{}] no companion", label);
        return;
    };
    let body = state.mobile.and_then(|mobile| runtime.backend().read_position(mobile));
    let owner = runtime.backend().resolve_owner(OWNER).map(|snapshot| snapshot.position);
    println!(
        "[{}] {:?} following={} body={:?} owner={:?} trail={}",
        label,
        state.lifecycle,
        state.follow.active,
        body,
        owner,
        state.follow.history.len()
    );
}

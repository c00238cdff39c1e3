//! Tests for TickClock

use carbon_scheduler_core_rs::{TickClock, TICKS_PER_HOUR, TIME_FACTOR};

#[test]
fn test_tick_clock_new() {
    let clock = TickClock::new(TICKS_PER_HOUR);
    assert_eq!(clock.current_tick(), 0);
    assert_eq!(clock.current_hour(), 0);
    assert_eq!(clock.ticks_per_hour(), 720);
}

#[test]
fn test_ticks_per_hour_matches_time_factor() {
    assert_eq!(TICKS_PER_HOUR * TIME_FACTOR, 3600);
    assert_eq!(TickClock::default().ticks_per_hour(), TICKS_PER_HOUR);
}

#[test]
fn test_hour_boundary() {
    let mut clock = TickClock::new(10);
    for _ in 0..9 {
        clock.advance_tick();
    }
    assert_eq!(clock.current_hour(), 0);

    clock.advance_tick();
    assert_eq!(clock.current_tick(), 10);
    assert_eq!(clock.current_hour(), 1);
}

#[test]
fn test_advance_to_never_moves_backwards() {
    let mut clock = TickClock::default();
    clock.advance_to(50);
    assert_eq!(clock.current_tick(), 50);

    clock.advance_to(20);
    assert_eq!(clock.current_tick(), 50);
}

#[test]
fn test_conversions() {
    let clock = TickClock::default();
    assert_eq!(clock.hours_to_ticks(6.0), 4320);
    assert_eq!(clock.hours_to_ticks(0.5), 360);
    assert!((clock.ticks_to_hours(1080) - 1.5).abs() < 1e-12);
    assert!((clock.per_tick_rate(0.0624) - 0.0624 / 720.0).abs() < 1e-15);
}

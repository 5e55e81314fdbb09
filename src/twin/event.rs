//! Disturbance events injected into the twin.
//!
//! Events overlay the weather and load models for a fixed number of
//! steps rather than mutating the underlying random walk, so conditions
//! recover naturally when an event expires.

use std::fmt;

/// Kinds of injectable disturbance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Heavy cloud forces cloud cover to the event magnitude.
    CloudBurst,
    /// Wind speed drops by the event magnitude fraction.
    WindLull,
    /// Load demand scales up by the event magnitude factor.
    DemandSurge,
    /// Battery health takes a one-time hit of the magnitude factor.
    BatteryFault,
}

impl EventKind {
    /// Default magnitude and duration (steps) for each kind.
    pub fn defaults(&self) -> (f32, usize) {
        match self {
            EventKind::CloudBurst => (0.9, 10),
            EventKind::WindLull => (1.0, 15),
            EventKind::DemandSurge => (1.5, 20),
            EventKind::BatteryFault => (0.8, 5),
        }
    }

    /// Parses an event name as used on the CLI and in scenario scripts.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cloud_burst" => Some(EventKind::CloudBurst),
            "wind_lull" => Some(EventKind::WindLull),
            "demand_surge" => Some(EventKind::DemandSurge),
            "battery_fault" => Some(EventKind::BatteryFault),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::CloudBurst => "cloud_burst",
            EventKind::WindLull => "wind_lull",
            EventKind::DemandSurge => "demand_surge",
            EventKind::BatteryFault => "battery_fault",
        };
        f.write_str(name)
    }
}

/// An event currently overlaying the twin.
#[derive(Debug, Clone)]
pub struct ActiveEvent {
    pub kind: EventKind,
    pub magnitude: f32,
    pub remaining_steps: usize,
}

impl ActiveEvent {
    pub fn new(kind: EventKind, magnitude: f32, duration_steps: usize) -> Self {
        Self {
            kind,
            magnitude,
            remaining_steps: duration_steps,
        }
    }

    pub fn with_defaults(kind: EventKind) -> Self {
        let (magnitude, duration) = kind.defaults();
        Self::new(kind, magnitude, duration)
    }
}

/// The set of active events, applied as modifiers each step.
#[derive(Debug, Clone, Default)]
pub struct EventOverlay {
    active: Vec<ActiveEvent>,
}

impl EventOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event. A `BatteryFault` returns its one-time health
    /// factor for the caller to apply; other kinds return `None`.
    pub fn inject(&mut self, event: ActiveEvent) -> Option<f32> {
        let health_factor = match event.kind {
            EventKind::BatteryFault => Some(event.magnitude),
            _ => None,
        };
        self.active.push(event);
        health_factor
    }

    /// Effective cloud cover after overlay.
    pub fn cloud_cover(&self, base: f32) -> f32 {
        self.active
            .iter()
            .filter(|e| e.kind == EventKind::CloudBurst)
            .fold(base, |c, e| c.max(e.magnitude))
            .clamp(0.0, 1.0)
    }

    /// Effective wind speed after overlay.
    pub fn wind_speed(&self, base: f32) -> f32 {
        self.active
            .iter()
            .filter(|e| e.kind == EventKind::WindLull)
            .fold(base, |v, e| v * (1.0 - e.magnitude).max(0.0))
    }

    /// Effective load after overlay.
    pub fn load(&self, base: f32) -> f32 {
        self.active
            .iter()
            .filter(|e| e.kind == EventKind::DemandSurge)
            .fold(base, |l, e| l * e.magnitude)
    }

    /// Counts down all events and drops the expired ones. Returns the
    /// kinds that expired this step.
    pub fn tick(&mut self) -> Vec<EventKind> {
        let mut expired = Vec::new();
        for e in &mut self.active {
            e.remaining_steps = e.remaining_steps.saturating_sub(1);
        }
        self.active.retain(|e| {
            if e.remaining_steps == 0 {
                expired.push(e.kind);
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn active(&self) -> &[ActiveEvent] {
        &self.active
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_burst_overrides_cover() {
        let mut overlay = EventOverlay::new();
        overlay.inject(ActiveEvent::with_defaults(EventKind::CloudBurst));
        assert_eq!(overlay.cloud_cover(0.2), 0.9);
        // an already-overcast sky is not brightened
        assert_eq!(overlay.cloud_cover(0.95), 0.95);
    }

    #[test]
    fn wind_lull_zeroes_full_magnitude() {
        let mut overlay = EventOverlay::new();
        overlay.inject(ActiveEvent::with_defaults(EventKind::WindLull));
        assert_eq!(overlay.wind_speed(10.0), 0.0);
    }

    #[test]
    fn demand_surge_scales_load() {
        let mut overlay = EventOverlay::new();
        overlay.inject(ActiveEvent::with_defaults(EventKind::DemandSurge));
        assert!((overlay.load(400.0) - 600.0).abs() < 1e-3);
    }

    #[test]
    fn battery_fault_returns_health_factor() {
        let mut overlay = EventOverlay::new();
        let factor = overlay.inject(ActiveEvent::with_defaults(EventKind::BatteryFault));
        assert_eq!(factor, Some(0.8));
        let none = overlay.inject(ActiveEvent::with_defaults(EventKind::CloudBurst));
        assert_eq!(none, None);
    }

    #[test]
    fn events_expire_after_duration() {
        let mut overlay = EventOverlay::new();
        overlay.inject(ActiveEvent::new(EventKind::CloudBurst, 0.9, 3));
        for _ in 0..2 {
            assert!(overlay.tick().is_empty());
        }
        let expired = overlay.tick();
        assert_eq!(expired, vec![EventKind::CloudBurst]);
        assert!(overlay.active().is_empty());
        assert_eq!(overlay.cloud_cover(0.2), 0.2);
    }

    #[test]
    fn parse_round_trips_names() {
        for kind in [
            EventKind::CloudBurst,
            EventKind::WindLull,
            EventKind::DemandSurge,
            EventKind::BatteryFault,
        ] {
            assert_eq!(EventKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(EventKind::parse("earthquake"), None);
    }
}

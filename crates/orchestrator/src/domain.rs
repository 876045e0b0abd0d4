//! Scenario seeding: scheduled emitters and clears applied between frames.

use glam::Vec2;
use sph2d_kernel::{Aabb, Emitter, ParticleSimulation};

use crate::config::{ConfigError, SimulationConfig};
use crate::geometry::Polygon;

/// A polygon ready to seed particles.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionEmitter {
    /// Region to fill.
    pub polygon: Polygon,
    /// Initial velocity of every seeded particle.
    pub velocity: Vec2,
    /// Sampling stride; `None` uses the simulation's default stride.
    pub stride: Option<f32>,
}

impl RegionEmitter {
    /// Fill the region at rest using the default stride.
    pub fn new(polygon: Polygon) -> Self {
        Self {
            polygon,
            velocity: Vec2::ZERO,
            stride: None,
        }
    }

    /// Seed `sim`; returns how many particles were added.
    pub fn seed(&self, sim: &mut ParticleSimulation) -> usize {
        match self.stride {
            Some(stride) => sim.add_region_with_stride(&self.polygon, self.velocity, stride),
            None => sim.add_region(&self.polygon, self.velocity),
        }
    }
}

/// What happened before a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameEvents {
    /// Every particle was removed.
    pub cleared: bool,
    /// Particles added by emitters.
    pub emitted: usize,
}

/// Emitters and clears keyed by the frame they precede.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    emitters: Vec<(u64, RegionEmitter)>,
    clear_at: Vec<u64>,
}

impl Scenario {
    /// Build the schedule of a validated configuration.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        let emitters = config
            .emitters
            .iter()
            .enumerate()
            .map(|(index, e)| {
                let polygon = e
                    .shape
                    .to_polygon()
                    .map_err(|source| ConfigError::Shape { index, source })?;
                Ok((
                    e.frame,
                    RegionEmitter {
                        polygon,
                        velocity: Vec2::from(e.velocity),
                        stride: e.stride,
                    },
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let mut clear_at = config.clear_at.clone();
        clear_at.sort_unstable();
        clear_at.dedup();
        let scenario = Self { emitters, clear_at };
        for (a, b) in scenario.overlapping_emitters() {
            tracing::warn!(a, b, "emitters on the same frame overlap; shared area is seeded twice");
        }
        Ok(scenario)
    }

    /// Schedule `emitter` before `frame`.
    pub fn emit_at(&mut self, frame: u64, emitter: RegionEmitter) {
        self.emitters.push((frame, emitter));
    }

    /// Schedule a clear before `frame`.
    pub fn clear_at(&mut self, frame: u64) {
        if let Err(pos) = self.clear_at.binary_search(&frame) {
            self.clear_at.insert(pos, frame);
        }
    }

    /// Number of scheduled emitters.
    pub fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    /// Bounding box of every scheduled emitter.
    pub fn bounds(&self) -> Option<Aabb> {
        self.emitters
            .iter()
            .map(|(_, e)| e.polygon.aabb())
            .reduce(|a, b| a.combine(&b))
    }

    /// Index pairs of emitters that fire on the same frame with overlapping
    /// bounding boxes.
    pub fn overlapping_emitters(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, (fa, a)) in self.emitters.iter().enumerate() {
            for (j, (fb, b)) in self.emitters.iter().enumerate().skip(i + 1) {
                if fa == fb && a.polygon.aabb().touches(&b.polygon.aabb()) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    /// Last frame with a scheduled event.
    pub fn last_event(&self) -> Option<u64> {
        let emit = self.emitters.iter().map(|(f, _)| *f).max();
        emit.max(self.clear_at.last().copied())
    }

    /// Apply the events scheduled before `frame`: clears first, then emitters
    /// in configuration order.
    pub fn apply(&self, frame: u64, sim: &mut ParticleSimulation) -> FrameEvents {
        let mut events = FrameEvents::default();
        if self.clear_at.binary_search(&frame).is_ok() {
            sim.clear();
            events.cleared = true;
        }
        for (_, emitter) in self.emitters.iter().filter(|(f, _)| *f == frame) {
            events.emitted += emitter.seed(sim);
        }
        if events.cleared || events.emitted > 0 {
            tracing::info!(
                frame,
                cleared = events.cleared,
                emitted = events.emitted,
                count = sim.count(),
                "scenario events applied"
            );
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sph2d_kernel::SimParams;

    fn sim() -> ParticleSimulation {
        ParticleSimulation::with_cpu(SimParams::with_diameter(0.1)).unwrap()
    }

    fn square() -> RegionEmitter {
        // Stride 0.075 over [0, 0.3) -> 4 x 4
        RegionEmitter::new(Polygon::rect(Vec2::splat(0.15), 0.15, 0.15).unwrap())
    }

    #[test]
    fn events_fire_only_on_their_frame() {
        let mut scenario = Scenario::default();
        scenario.emit_at(0, square());
        scenario.emit_at(2, square());
        let mut sim = sim();

        assert_eq!(scenario.apply(0, &mut sim).emitted, 16);
        assert_eq!(scenario.apply(1, &mut sim), FrameEvents::default());
        assert_eq!(scenario.apply(2, &mut sim).emitted, 16);
        assert_eq!(sim.count(), 32);
        assert_eq!(scenario.last_event(), Some(2));
    }

    #[test]
    fn clear_runs_before_emitters() {
        let mut scenario = Scenario::default();
        scenario.emit_at(0, square());
        scenario.emit_at(3, square());
        scenario.clear_at(3);
        scenario.clear_at(3);
        let mut sim = sim();
        scenario.apply(0, &mut sim);

        let events = scenario.apply(3, &mut sim);
        assert!(events.cleared);
        assert_eq!(events.emitted, 16);
        assert_eq!(sim.count(), 16);
    }

    #[test]
    fn bounds_and_overlaps_follow_the_schedule() {
        let mut scenario = Scenario::default();
        assert!(scenario.bounds().is_none());
        scenario.emit_at(0, square());
        scenario.emit_at(0, RegionEmitter::new(Polygon::rect(Vec2::splat(0.25), 0.15, 0.15).unwrap()));
        scenario.emit_at(1, square());
        scenario.emit_at(0, RegionEmitter::new(Polygon::rect(Vec2::new(2.0, 0.15), 0.1, 0.1).unwrap()));

        assert_eq!(scenario.overlapping_emitters(), vec![(0, 1)]);
        let bounds = scenario.bounds().unwrap();
        assert!((bounds.lower - Vec2::ZERO).length() < 1e-6);
        assert!((bounds.upper - Vec2::new(2.1, 0.4)).length() < 1e-6);
    }

    #[test]
    fn explicit_stride_overrides_default() {
        let mut emitter = square();
        emitter.stride = Some(0.15);
        emitter.velocity = Vec2::new(0.0, -1.0);
        let mut sim = sim();
        assert_eq!(emitter.seed(&mut sim), 4);
        assert!(sim.velocities().iter().all(|&v| v == Vec2::new(0.0, -1.0)));
    }

    #[test]
    fn from_config_keeps_schedule() {
        let config = SimulationConfig::from_json(
            r#"{
                "name": "schedule",
                "diameter": 0.1,
                "emitters": [
                    { "shape": { "type": "rect", "center": [0.15, 0.15], "half_extents": [0.15, 0.15] } },
                    { "frame": 5, "shape": { "type": "circle", "center": [2, 2], "radius": 0.2 } }
                ],
                "clear_at": [7, 4, 7]
            }"#,
        )
        .unwrap();
        let scenario = Scenario::from_config(&config).unwrap();
        assert_eq!(scenario.emitter_count(), 2);
        assert_eq!(scenario.last_event(), Some(7));

        let mut sim = ParticleSimulation::with_cpu(config.sim_params()).unwrap();
        assert_eq!(scenario.apply(0, &mut sim).emitted, 16);
        assert!(scenario.apply(4, &mut sim).cleared);
        assert_eq!(sim.count(), 0);
    }
}

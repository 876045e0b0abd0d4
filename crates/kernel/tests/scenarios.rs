//! End-to-end scenarios on the CPU backend.

use glam::Vec2;
use sph2d_kernel::{Aabb, Emitter, ParticleSimulation, SimParams, StepProfile};

struct Block(Aabb);

impl Emitter for Block {
    fn aabb(&self) -> Aabb {
        self.0
    }
    fn includes(&self, p: Vec2) -> bool {
        p.cmpge(self.0.lower).all() && p.cmplt(self.0.upper).all()
    }
}

fn corner_sim() -> ParticleSimulation {
    // Diameter 2 puts all four corners (diagonal sqrt 2) inside each
    // other's support. The lattice rest density for stride 1 exceeds the
    // corner density, so the set starts pressure-free.
    let params = SimParams {
        spacing_factor: 0.5,
        ..SimParams::with_diameter(2.0)
    };
    let mut sim = ParticleSimulation::with_cpu(params).unwrap();
    for corner in [
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
    ] {
        sim.add_particle(corner, Vec2::ZERO);
    }
    sim
}

#[test]
fn four_corners_fall_together() {
    let mut sim = corner_sim();
    let before = sim.positions().to_vec();
    sim.step(0.01).unwrap();

    assert_eq!(sim.count(), 4);
    for (i, v) in sim.velocities().iter().enumerate() {
        assert_eq!(v.x, 0.0, "particle {i} gained horizontal velocity");
        assert!((v.y + 0.098).abs() < 1e-6, "particle {i}: v.y = {}", v.y);
    }
    for (p, p0) in sim.positions().iter().zip(&before) {
        assert_eq!(p.x, p0.x);
        assert!((p.y - (p0.y - 0.00098)).abs() < 1e-6);
    }
}

#[test]
fn four_corners_share_one_density() {
    let mut sim = corner_sim();
    sim.step(0.01).unwrap();
    let w = sim.weights();
    assert!(w[0] > 0.0);
    for &other in &w[1..] {
        assert!((other - w[0]).abs() <= 1e-3 * w[0]);
    }
}

#[test]
fn clear_restarts_from_index_zero() {
    let mut sim = ParticleSimulation::with_cpu(SimParams::with_diameter(0.1)).unwrap();
    sim.add_region(&Block(Aabb::new(Vec2::ZERO, Vec2::splat(0.5))), Vec2::ZERO);
    assert!(sim.count() > 0);
    sim.step(0.001).unwrap();

    sim.clear();
    assert_eq!(sim.count(), 0);
    assert_eq!(sim.capacity(), SimParams::default().initial_capacity);

    sim.add_particle(Vec2::new(3.0, 4.0), Vec2::new(0.5, 0.0));
    assert_eq!(sim.count(), 1);
    assert_eq!(sim.positions()[0], Vec2::new(3.0, 4.0));
    assert_eq!(sim.velocities()[0], Vec2::new(0.5, 0.0));
    sim.step(0.001).unwrap();
    assert_eq!(sim.count(), 1);
}

#[test]
fn substeps_match_repeated_short_steps() {
    let block = Block(Aabb::new(Vec2::ZERO, Vec2::new(0.6, 0.4)));
    let params = SimParams::with_diameter(0.1);

    let mut split = ParticleSimulation::with_cpu(params).unwrap();
    split.add_region(&block, Vec2::new(0.2, 0.0));
    let mut manual = ParticleSimulation::with_cpu(params).unwrap();
    manual.add_region(&block, Vec2::new(0.2, 0.0));

    let dt = 0.004;
    split.step_substeps(dt, 4).unwrap();
    for _ in 0..4 {
        manual.step(dt / 4.0).unwrap();
    }

    for (a, b) in split.positions().iter().zip(manual.positions()) {
        assert!((*a - *b).length() < 1e-6);
    }
    for (a, b) in split.velocities().iter().zip(manual.velocities()) {
        assert!((*a - *b).length() < 1e-5);
    }
}

#[test]
fn zero_substeps_leave_state_unchanged() {
    let mut sim = corner_sim();
    let positions = sim.positions().to_vec();
    let velocities = sim.velocities().to_vec();

    sim.step_substeps(0.01, 0).unwrap();
    assert_eq!(sim.positions(), &positions[..]);
    assert_eq!(sim.velocities(), &velocities[..]);

    let profile = sim.step_substeps_profiled(0.01, 0).unwrap();
    assert_eq!(profile, StepProfile::default());
    assert_eq!(sim.positions(), &positions[..]);
}

#[test]
fn growth_between_steps_keeps_state() {
    let params = SimParams {
        initial_capacity: 8,
        ..SimParams::with_diameter(0.1)
    };
    let mut sim = ParticleSimulation::with_cpu(params).unwrap();
    sim.add_region(&Block(Aabb::new(Vec2::ZERO, Vec2::splat(0.2))), Vec2::ZERO);
    sim.step(0.001).unwrap();
    let snapshot = sim.positions().to_vec();

    sim.add_region(&Block(Aabb::new(Vec2::new(5.0, 0.0), Vec2::new(5.5, 0.5))), Vec2::ZERO);
    assert!(sim.capacity() >= sim.count());
    assert_eq!(&sim.positions()[..snapshot.len()], &snapshot[..]);
    sim.step(0.001).unwrap();
    assert!(sim.positions().iter().all(|p| p.is_finite()));
}

#[test]
fn falling_block_stays_finite_and_descends() {
    let mut sim = ParticleSimulation::with_cpu(SimParams::with_diameter(0.05)).unwrap();
    sim.add_region(&Block(Aabb::new(Vec2::ZERO, Vec2::splat(0.4))), Vec2::ZERO);
    let centroid = |sim: &ParticleSimulation| {
        sim.positions().iter().copied().sum::<Vec2>() / sim.count() as f32
    };
    let start = centroid(&sim);
    for _ in 0..20 {
        sim.step_substeps(0.005, 10).unwrap();
    }
    assert!(sim.positions().iter().all(|p| p.is_finite()));
    assert!(sim.velocities().iter().all(|v| v.is_finite()));
    let end = centroid(&sim);
    assert!(end.y < start.y);
    assert!((end.x - start.x).abs() < 0.05);
}

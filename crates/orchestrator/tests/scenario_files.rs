//! Shipped scenario files parse, and a scenario runs end to end from disk.

use std::path::PathBuf;

use sph2d_orchestrator::{
    create_simulation, launch, FrameSettings, Scenario, SimulationConfig,
};

fn configs_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../configs")
}

#[test]
fn shipped_configs_are_valid() {
    let mut seen = 0;
    for entry in std::fs::read_dir(configs_dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "json") {
            let config = SimulationConfig::load(&path)
                .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
            Scenario::from_config(&config).unwrap();
            seen += 1;
        }
    }
    assert!(seen >= 2, "expected shipped scenarios, found {seen}");
}

#[test]
fn scenario_file_runs_to_completion() {
    let dir = std::env::temp_dir().join(format!("sph2d-scenario-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("tiny.json");
    std::fs::write(
        &path,
        r#"{
            "name": "tiny",
            "diameter": 0.1,
            "substeps": 2,
            "max_frames": 6,
            "emitters": [
                { "shape": { "type": "rect", "center": [0.15, 0.15], "half_extents": [0.15, 0.15] } },
                { "frame": 3, "shape": { "type": "rect", "center": [2.15, 0.15], "half_extents": [0.15, 0.15] } }
            ],
            "clear_at": [2]
        }"#,
    )
    .unwrap();

    let runner = create_simulation(&path).unwrap();
    let summary = runner.join().unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(summary.frames, 6);
    // Frame 0 seeds 16, frame 2 clears, frame 3 seeds 16 more.
    assert_eq!(summary.particles, 16);
}

#[test]
fn streamed_scenario_reports_every_frame() {
    let config = SimulationConfig::from_json(
        r#"{
            "name": "stream",
            "diameter": 0.1,
            "substeps": 1,
            "max_frames": 3,
            "emitters": [
                { "frame": 1, "shape": { "type": "rect", "center": [0.15, 0.15], "half_extents": [0.15, 0.15] } }
            ]
        }"#,
    )
    .unwrap();
    let settings = FrameSettings {
        stream_frames: true,
        ..FrameSettings::from(&config)
    };
    let mut runner = launch(&config, settings).unwrap();
    let frames = runner.take_frames().unwrap();
    runner.join().unwrap();

    let counts: Vec<usize> = frames.iter().map(|s| s.count).collect();
    assert_eq!(counts, vec![0, 16, 16]);
}

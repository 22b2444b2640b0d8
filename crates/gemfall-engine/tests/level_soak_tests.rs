//! Level-level tests: config loading, warm-up pacing and seeded
//! spawn/despawn soak runs.
//!
//! The soak runs drive a level with a seeded PCG generator, so a failure
//! reproduces exactly from its seed.

use gemfall_engine::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const CONFIG: &str = r#"{
    "ids": { "replicated_node": 32, "replicated_component": 32 },
    "warmup": { "frame_budget_us": 0, "max_frames": 10000 },
    "types": [
        { "name": "gem.red",   "pool_quantity": 12, "replicated_mode": true },
        { "name": "gem.blue",  "pool_quantity": 12, "replicated_mode": true },
        { "name": "bomb",      "pool_quantity": 3 },
        { "name": "rocket",    "pool_quantity": 4, "replicated_mode": true },
        { "name": "title_card" }
    ]
}"#;

const SPAWNABLE: [&str; 4] = ["gem.red", "gem.blue", "bomb", "rocket"];

fn level() -> Level {
    let config = EngineConfig::from_json_str(CONFIG).unwrap();
    let mut level = Level::new(config).unwrap();
    for name in SPAWNABLE {
        let scene = level.scene_mut();
        let root = scene.create_node(name, None).unwrap();
        scene
            .set_attribute(root, "value", serde_json::json!(name.len()))
            .unwrap();
        if name == "bomb" || name == "rocket" {
            scene.create_node("fuse", Some(root)).unwrap();
        }
        level.register_template(name, root).unwrap();
    }
    level
}

fn warmed_level() -> Level {
    let mut level = level();
    level.start().unwrap();
    level.finish_warmup().unwrap();
    level.set_create_mode(CreateMode::Replicated);
    level
}

/// Random spawn/despawn session. Returns the final dump fingerprint.
fn soak(seed: u64, steps: usize) -> (Level, String) {
    let mut level = warmed_level();
    let board = level.scene_mut().create_node("board", None).unwrap();
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut live: Vec<NodeHandle> = Vec::new();

    for _ in 0..steps {
        match rng.gen_range(0..10) {
            0..=4 => {
                let name = SPAWNABLE[rng.gen_range(0..SPAWNABLE.len())];
                let request = match rng.gen_range(0..3) {
                    0 => IdRequest::Local,
                    1 => IdRequest::Replicated,
                    _ => IdRequest::ReplicatedAs(rng.gen_range(32..80)),
                };
                match level.spawn(name, request, Some(board)) {
                    Ok(a) => {
                        assert!(level.scene().is_enabled(a.node));
                        assert_eq!(level.scene().find_by_id(a.node_id), Some(a.node));
                        live.push(a.node);
                    }
                    Err(PoolError::PoolExhausted { .. }) => {}
                    Err(e) => panic!("unexpected spawn error: {e}"),
                }
            }
            5..=8 => {
                if !live.is_empty() {
                    let node = live.swap_remove(rng.gen_range(0..live.len()));
                    assert_eq!(level.despawn(node), Ok(Despawn::Recycled));
                }
            }
            _ => {
                if rng.gen_bool(0.2) {
                    let report = level.restore_all(false);
                    assert_eq!(report.restored as usize, live.len());
                    assert_eq!(report.failed, 0);
                    live.clear();
                    level.set_create_mode(CreateMode::Replicated);
                }
            }
        }
        assert!(!level.dump().has_anomalies());
    }

    let fingerprint = level.dump().fingerprint();
    (level, fingerprint)
}

#[test]
fn config_drives_ranges() {
    let mut level = level();
    let reserved = level.start().unwrap();
    assert_eq!(reserved.replicated_nodes.first(), 32);
    assert_eq!(reserved.local_nodes.first(), IdBases::default().local_node);
    assert!(level.pool().category_by_name("title_card").is_none());
    assert_eq!(level.pool().categories().count(), 4);
}

#[test]
fn host_nodes_built_before_start_stay_out_of_replicated_spans() {
    let mut level = level();
    let tiles: Vec<NodeHandle> = (0..40)
        .map(|i| level.scene_mut().create_node(&format!("tile{i}"), None).unwrap())
        .collect();

    let reserved = level.start().unwrap();
    level.finish_warmup().unwrap();
    level.set_create_mode(CreateMode::Replicated);

    // Root, six template nodes and forty tiles wear ids 1..=47.
    let span = reserved.replicated_nodes;
    assert_eq!(span.first(), 48);
    for &tile in &tiles {
        let id = level.scene().node_id(tile).unwrap();
        assert!(!span.contains(id), "tile {id} inside {span}");
    }

    let gem = level.spawn("gem.red", IdRequest::Replicated, None).unwrap();
    assert!(gem.replicated);
    assert_eq!(gem.refusal, None);
    assert_eq!(gem.node_id, 48);
    assert_eq!(level.scene().find_by_id(48), Some(gem.node));
}

#[test]
fn zero_budget_warmup_spans_many_frames() {
    let mut level = level();
    level.start().unwrap();
    let mut frames = 0;
    while !level.is_ready() {
        let report = level.update().unwrap();
        frames += 1;
        assert_eq!(report.frame, frames);
    }
    assert!(frames > 31, "at least one frame per clone, took {frames}");
    assert_eq!(level.warmup().diagnostics().frames, frames);
}

#[test]
fn soak_keeps_pools_consistent() {
    for seed in [1u64, 7, 42, 0xdead_beef] {
        let (mut level, _) = soak(seed, 1_500);
        let report = level.teardown();
        assert_eq!(report.failed, 0);
        assert!(level.scene().find_by_id(IdBases::default().local_node).is_none());
    }
}

#[test]
fn soak_is_reproducible_from_its_seed() {
    let (_, a) = soak(2024, 800);
    let (_, b) = soak(2024, 800);
    assert_eq!(a, b);
}

#[test]
fn replicate_after_spawn() {
    let mut level = warmed_level();
    let gem = level.spawn("gem.red", IdRequest::Local, None).unwrap();
    let id = level.replicate(gem.node, IdRequest::Replicated).unwrap();
    assert_eq!(id, 32);
    let red = level.pool().category_by_name("gem.red").unwrap();
    assert_eq!(red.local_ids_for(32).map(|l| l.node_id), Some(gem.node_id));

    assert_eq!(level.despawn(gem.node), Ok(Despawn::Recycled));
    assert_eq!(level.scene().node_id(gem.node), Some(gem.node_id));
}

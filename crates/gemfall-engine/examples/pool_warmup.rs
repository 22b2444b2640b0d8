//! Warms up a match-3 level's pools and plays a seeded spawn/despawn session.
//!
//! Run with: `cargo run --example pool_warmup -- [config.json]`
//!
//! Set `RUST_LOG=info` (or `debug`) to watch reservation, per-frame
//! population and restores.

use gemfall_engine::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const DEFAULT_CONFIG: &str = r#"{
    "warmup": { "frame_budget_us": 250 },
    "types": [
        { "name": "gem.red",    "pool_quantity": 64, "replicated_mode": true, "default_value": 10 },
        { "name": "gem.blue",   "pool_quantity": 64, "replicated_mode": true, "default_value": 10 },
        { "name": "gem.green",  "pool_quantity": 64, "replicated_mode": true, "default_value": 10 },
        { "name": "bomb",       "pool_quantity": 8,  "default_value": 50, "max_drop_quantity": 2 },
        { "name": "rocket",     "pool_quantity": 8,  "replicated_mode": true },
        { "name": "title_card" }
    ]
}"#;

const GEMS: [&str; 3] = ["gem.red", "gem.blue", "gem.green"];

/// Build a template subtree for every pooled type.
fn build_templates(level: &mut Level) -> Result<(), anyhow::Error> {
    let names: Vec<String> = level
        .registry()
        .iter()
        .filter(|d| d.pool_quantity > 0)
        .map(|d| d.name.clone())
        .collect();
    for name in names {
        let scene = level.scene_mut();
        let root = scene.create_node(&name, None)?;
        scene.set_attribute(root, "value", serde_json::json!(0))?;
        if name == "bomb" || name == "rocket" {
            scene.create_node("fuse", Some(root))?;
        }
        level.register_template(&name, root)?;
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::from_json_str(DEFAULT_CONFIG)?,
    };

    let mut level = Level::new(config)?;
    build_templates(&mut level)?;
    let reserved = level.start()?;
    println!(
        "reserved local nodes {} / replicated nodes {}",
        reserved.local_nodes, reserved.replicated_nodes
    );

    while !level.is_ready() {
        let report = level.update()?;
        if report.frame % 10 == 1 {
            println!("frame {:>3}: {}", report.frame, level.debug_console());
        }
    }
    let diag = level.warmup().diagnostics();
    println!(
        "warm-up done in {} frames ({:?} total, longest {:?})",
        diag.frames, diag.total_time, diag.longest_frame
    );

    level.set_create_mode(CreateMode::Replicated);
    let board = level.scene_mut().create_node("board", None)?;
    let mut rng = Pcg64::seed_from_u64(0x6e6f_6d61);
    let mut live: Vec<NodeHandle> = Vec::new();
    let mut exhausted = 0u32;

    for _ in 0..2_000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let name = if rng.gen_bool(0.9) {
                GEMS[rng.gen_range(0..GEMS.len())]
            } else if rng.gen_bool(0.5) {
                "bomb"
            } else {
                "rocket"
            };
            let request = if rng.gen_bool(0.5) {
                IdRequest::Replicated
            } else {
                IdRequest::Local
            };
            match level.spawn(name, request, Some(board)) {
                Ok(allocation) => live.push(allocation.node),
                Err(PoolError::PoolExhausted { .. }) => exhausted += 1,
                Err(e) => return Err(e.into()),
            }
        } else {
            let node = live.swap_remove(rng.gen_range(0..live.len()));
            level.despawn(node)?;
        }
    }

    println!("{} live, {} refused (pool exhausted)", live.len(), exhausted);
    println!("{}", level.dump());
    println!("fingerprint {}", level.dump().fingerprint());

    let report = level.teardown();
    println!(
        "teardown: {} restored, {} skipped, {} failed",
        report.restored, report.skipped, report.failed
    );
    Ok(())
}

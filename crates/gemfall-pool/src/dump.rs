//! Read-only snapshots of pool state.
//!
//! A [`PoolDump`] is what the debug console prints and what tests compare.
//! It serializes to JSON, and its [`fingerprint`](PoolDump::fingerprint) is
//! the BLAKE3 hash of that JSON, so two pools that reached the same state by
//! different routes (one long frame versus many short ones) fingerprint the
//! same.

use std::fmt;

use gemfall_scene::entity_type::EntityType;
use serde::{Deserialize, Serialize};

use crate::category::{CategoryRanges, Population};
use crate::pool::{CreateMode, PoolStage, ReservedIds};

/// Snapshot of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDump {
    pub name: String,
    pub entity_type: EntityType,
    pub replicated: bool,
    pub population: Population,
    pub population_failed: bool,
    pub requested: u32,
    pub total: u32,
    pub free: u32,
    pub in_use: u32,
    pub lost: u32,
    pub nodes_per_instance: u32,
    pub components_per_instance: u32,
    pub ranges: CategoryRanges,
    pub next_replicated_id: Option<u32>,
    /// Ids worn by free instances, top of the free list first.
    pub free_ids: Vec<u32>,
    /// `(replicated id, local id)` pairs, sorted by replicated id.
    pub replicated_to_local: Vec<(u32, u32)>,
    /// Free instances that break the free-instance invariants.
    pub anomalies: Vec<String>,
}

/// Snapshot of a whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDump {
    pub stage: PoolStage,
    pub create_mode: CreateMode,
    pub reserved: Option<ReservedIds>,
    /// Categories still waiting for population.
    pub pending: usize,
    /// Categories in registration order.
    pub categories: Vec<CategoryDump>,
}

impl PoolDump {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// BLAKE3 hex digest of the compact JSON form.
    pub fn fingerprint(&self) -> String {
        // Plain structs with string keys; serialization cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Whether any category reported an anomaly.
    pub fn has_anomalies(&self) -> bool {
        self.categories.iter().any(|c| !c.anomalies.is_empty())
    }

    pub fn category(&self, name: &str) -> Option<&CategoryDump> {
        self.categories.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for PoolDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "object pool: {:?}, create mode {:?}, {} categories ({} pending)",
            self.stage,
            self.create_mode,
            self.categories.len(),
            self.pending
        )?;
        if let Some(reserved) = &self.reserved {
            writeln!(
                f,
                "  reserved: local nodes {} components {}, replicated nodes {} components {}",
                reserved.local_nodes,
                reserved.local_components,
                reserved.replicated_nodes,
                reserved.replicated_components
            )?;
        }
        for c in &self.categories {
            writeln!(
                f,
                "  {} [{}]: {}/{} free, {} in use, {} lost, {:?}{}",
                c.name,
                c.entity_type,
                c.free,
                c.total,
                c.in_use,
                c.lost,
                c.population,
                if c.population_failed { " (short)" } else { "" }
            )?;
            writeln!(
                f,
                "    local nodes {} components {}",
                c.ranges.local_nodes, c.ranges.local_components
            )?;
            if c.replicated {
                write!(
                    f,
                    "    replicated nodes {} components {}",
                    c.ranges.replicated_nodes, c.ranges.replicated_components
                )?;
                if let Some(next) = c.next_replicated_id {
                    write!(f, ", next {next}")?;
                }
                writeln!(f)?;
                for (replicated, local) in &c.replicated_to_local {
                    writeln!(f, "      {replicated} <- {local}")?;
                }
            }
            for anomaly in &c.anomalies {
                writeln!(f, "    !! {anomaly}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::IdentifierRange;

    fn sample() -> PoolDump {
        PoolDump {
            stage: PoolStage::Created,
            create_mode: CreateMode::Local,
            reserved: None,
            pending: 0,
            categories: vec![CategoryDump {
                name: "gem".into(),
                entity_type: EntityType::from_name("gem"),
                replicated: true,
                population: Population::Done,
                population_failed: false,
                requested: 3,
                total: 3,
                free: 2,
                in_use: 1,
                lost: 0,
                nodes_per_instance: 1,
                components_per_instance: 1,
                ranges: CategoryRanges {
                    scratch_node_id: 99,
                    local_nodes: IdentifierRange::new(100, 3),
                    local_components: IdentifierRange::new(500, 3),
                    replicated_nodes: IdentifierRange::new(10, 3),
                    replicated_components: IdentifierRange::new(40, 3),
                },
                next_replicated_id: Some(12),
                free_ids: vec![101, 102],
                replicated_to_local: vec![(11, 100)],
                anomalies: Vec::new(),
            }],
        }
    }

    #[test]
    fn display_lists_categories_and_mappings() {
        let text = sample().to_string();
        assert!(text.contains("gem ["));
        assert!(text.contains("2/3 free"));
        assert!(text.contains("replicated nodes 10->12"));
        assert!(text.contains("11 <- 100"));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.categories[0].free_ids.reverse();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn json_round_trips() {
        let a = sample();
        let back: PoolDump = serde_json::from_str(&a.to_json().unwrap()).unwrap();
        assert_eq!(a, back);
    }
}

//! Identifier bases supplied by the host.

use serde::{Deserialize, Serialize};

/// Where each of the four namespaces starts packing.
///
/// The defaults keep the replicated namespace low and put the local
/// namespace high enough that a match never reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdBases {
    pub replicated_node: u32,
    pub replicated_component: u32,
    pub local_node: u32,
    pub local_component: u32,
}

impl Default for IdBases {
    fn default() -> Self {
        Self {
            replicated_node: 0x20,
            replicated_component: 0x20,
            local_node: 0x0100_0100,
            local_component: 0x0100_1000,
        }
    }
}

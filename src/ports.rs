//! Network port allocation.
//!
//! Allocation is a pure scan over an in-use set. Callers must recompute the
//! set from every known instance right before allocating and commit the
//! result together with the instance record, see
//! [`InstanceManager::create`](crate::instance::InstanceManager::create).

use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Port allocation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// Every port from the base up to 65535 is taken
    #[error("No free port at or above {base}")]
    Exhausted { base: u16 },
}

/// Returns the first port at or above `base_port` that is not in `ports_in_use`.
///
/// # Errors
///
/// Returns [`PortError::Exhausted`] when the scan reaches 65535 without a hit.
pub fn allocate(base_port: u16, ports_in_use: &HashSet<u16>) -> Result<u16, PortError> {
    (base_port..=u16::MAX)
        .find(|port| !ports_in_use.contains(port))
        .ok_or(PortError::Exhausted { base: base_port })
}

/// Allocates `count` distinct ports starting from `base_port`.
///
/// Each chosen port is added to a working copy of the in-use set, so the
/// result is strictly ascending.
pub fn allocate_many(
    base_port: u16,
    count: usize,
    ports_in_use: &HashSet<u16>,
) -> Result<Vec<u16>, PortError> {
    let mut taken = ports_in_use.clone();
    let mut allocated = Vec::with_capacity(count);
    let mut next_base = base_port;

    for _ in 0..count {
        let port = allocate(next_base, &taken)?;
        taken.insert(port);
        allocated.push(port);
        next_base = port;
    }

    Ok(allocated)
}

/// Starting points for the three ports of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortBases {
    pub game: u16,
    pub rcon: u16,
    pub query: u16,
}

impl Default for PortBases {
    fn default() -> Self {
        Self {
            game: env::ports::DEFAULT_GAME_PORT,
            rcon: env::ports::DEFAULT_RCON_PORT,
            query: env::ports::DEFAULT_QUERY_PORT,
        }
    }
}

/// Host ports assigned to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstancePorts {
    pub game: u16,
    pub rcon: u16,
    pub query: u16,
}

impl InstancePorts {
    /// All three ports, in game/rcon/query order.
    pub fn all(&self) -> [u16; 3] {
        [self.game, self.rcon, self.query]
    }
}

/// Allocates game, console and query ports that are distinct from each
/// other and from everything in `ports_in_use`.
pub fn allocate_instance_ports(
    bases: PortBases,
    ports_in_use: &HashSet<u16>,
) -> Result<InstancePorts, PortError> {
    let mut taken = ports_in_use.clone();

    let game = allocate(bases.game, &taken)?;
    taken.insert(game);
    let rcon = allocate(bases.rcon, &taken)?;
    taken.insert(rcon);
    let query = allocate(bases.query, &taken)?;

    Ok(InstancePorts { game, rcon, query })
}

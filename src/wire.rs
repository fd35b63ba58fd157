use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;
use crate::types::BlockPos;

/// One physical wire link, as stored on a single endpoint.
///
/// A link between A and B is stored redundantly: A holds `A -> B` and B
/// holds the reciprocal `B -> A`. Both records are created and destroyed
/// together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub home: BlockPos,
    pub to: BlockPos,
}

impl Connection {
    pub fn new(home: BlockPos, to: BlockPos) -> Self {
        Self { home, to }
    }

    pub fn reciprocal(&self) -> Connection {
        Connection {
            home: self.to,
            to: self.home,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.home.x, self.home.y, self.home.z, self.to.x, self.to.y, self.to.z
        )
    }
}

impl FromStr for Connection {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',').map(|p| p.trim().parse::<i32>());
        let mut next = || parts.next().unwrap_or_else(|| "".parse::<i32>());
        Ok(Connection {
            home: BlockPos::new(next()?, next()?, next()?),
            to: BlockPos::new(next()?, next()?, next()?),
        })
    }
}

/// Read-only view of the connection topology, consumed by the mixing core.
pub trait ConnectionLookup: Send + Sync {
    /// Every position directly linked to `home` by a wire.
    fn linked_positions(&self, world: i32, home: BlockPos) -> Vec<BlockPos>;
}

/// In-memory connection graph, maintained by the host persistence layer.
///
/// The mixing core only reads it through [`ConnectionLookup`]; mutation
/// happens on wire placement and block removal.
#[derive(Default)]
pub struct ConnectionStore {
    edges: RwLock<HashMap<(i32, BlockPos), Vec<Connection>>>,
}

impl ConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and create a wire between `a` and `b`.
    ///
    /// Rejects zero-length wires and wires longer than `max_cable_length`.
    /// Linking an already-linked pair is a no-op returning the existing
    /// record. On success reciprocal records exist on both endpoints.
    pub fn connect(
        &self,
        world: i32,
        a: BlockPos,
        b: BlockPos,
        max_cable_length: f32,
    ) -> Result<Connection, ConnectionError> {
        let distance = a.distance_to(b);

        if distance == 0.0 {
            return Err(ConnectionError::SameObject);
        }

        if distance > max_cable_length as f64 {
            return Err(ConnectionError::TooLong {
                length: distance,
                max: max_cable_length as f64,
            });
        }

        let connection = Connection::new(a, b);
        let mut edges = self.edges.write();

        let existing = edges
            .get(&(world, a))
            .map_or(false, |list| list.contains(&connection));
        if existing {
            return Ok(connection);
        }

        edges.entry((world, a)).or_default().push(connection);
        edges
            .entry((world, b))
            .or_default()
            .push(connection.reciprocal());

        tracing::debug!("Wired {} to {} in world {}", a, b, world);
        Ok(connection)
    }

    /// Remove the link between `a` and `b` from both endpoints.
    pub fn disconnect(&self, world: i32, a: BlockPos, b: BlockPos) {
        let mut edges = self.edges.write();
        if let Some(list) = edges.get_mut(&(world, a)) {
            list.retain(|c| c.to != b);
        }
        if let Some(list) = edges.get_mut(&(world, b)) {
            list.retain(|c| c.to != a);
        }
    }

    /// Remove every link touching `pos`, e.g. when its block is removed.
    pub fn disconnect_all(&self, world: i32, pos: BlockPos) {
        let mut edges = self.edges.write();
        let peers: Vec<BlockPos> = edges
            .remove(&(world, pos))
            .map(|list| list.iter().map(|c| c.to).collect())
            .unwrap_or_default();

        for peer in peers {
            if let Some(list) = edges.get_mut(&(world, peer)) {
                list.retain(|c| c.to != pos);
            }
        }
    }

    pub fn connections_at(&self, world: i32, pos: BlockPos) -> Vec<Connection> {
        self.edges
            .read()
            .get(&(world, pos))
            .cloned()
            .unwrap_or_default()
    }
}

impl ConnectionLookup for ConnectionStore {
    fn linked_positions(&self, world: i32, home: BlockPos) -> Vec<BlockPos> {
        self.edges
            .read()
            .get(&(world, home))
            .map(|list| list.iter().map(|c| c.to).collect())
            .unwrap_or_default()
    }
}

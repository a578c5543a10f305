//! Spatial environment for CARTSIM: a 3D lattice of locations holding agent
//! occupancy, diffusible substrate fields, and vasculature sites.
//!
//! The lattice is a collaborator with a deliberately narrow surface: the
//! simulation core queries occupancy and local substrate values, moves and
//! places agents, and writes substrate values back. Geometry is uniform;
//! every location shares the same volume, area, and maximum agent count.
//! Capacity decisions that depend on agent state (total occupant volume,
//! per-type height tolerances) belong to the caller, which owns the agents.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing or addressing the lattice.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LatticeError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Indicates a coordinate outside the lattice bounds.
    #[error("coordinate ({0}, {1}, {2}) out of bounds")]
    OutOfBounds(i32, i32, i32),
}

/// Diffusible substrates tracked per location.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Substrate {
    Glucose,
    Oxygen,
    /// Growth factor consumed by tissue agents.
    Tgfa,
    /// Signaling cytokine consumed and produced by T-cell agents.
    Il2,
}

impl Substrate {
    /// All substrates, in field-storage order.
    pub const ALL: [Substrate; 4] = [
        Substrate::Glucose,
        Substrate::Oxygen,
        Substrate::Tgfa,
        Substrate::Il2,
    ];

    const fn index(self) -> usize {
        match self {
            Substrate::Glucose => 0,
            Substrate::Oxygen => 1,
            Substrate::Tgfa => 2,
            Substrate::Il2 => 3,
        }
    }
}

/// Lattice coordinate: lateral `(x, y)` plus vertical layer `z`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    /// Construct a new coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Lateral 8-neighborhood plus the two vertical neighbors.
const NEIGHBOR_OFFSETS: [(i32, i32, i32); 10] = [
    (-1, -1, 0),
    (0, -1, 0),
    (1, -1, 0),
    (-1, 0, 0),
    (1, 0, 0),
    (-1, 1, 0),
    (0, 1, 0),
    (1, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Hook invoked when agents are placed or moved, so source/sink bookkeeping
/// on the environment side can react.
pub trait SiteObserver {
    /// A new agent was added at `at`.
    fn agent_added(&mut self, at: Coord);
    /// An agent moved from `from` to `to`.
    fn agent_moved(&mut self, from: Coord, to: Coord);
}

/// Observer that ignores all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SiteObserver for NullObserver {
    fn agent_added(&mut self, _at: Coord) {}
    fn agent_moved(&mut self, _from: Coord, _to: Coord) {}
}

/// Static lattice geometry shared by every location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatticeConfig {
    /// Lateral extent in locations.
    pub width: u32,
    /// Lateral extent in locations.
    pub height: u32,
    /// Number of vertical layers.
    pub depth: u32,
    /// Volume of one location in cubic micrometers.
    pub location_volume: f64,
    /// Cross-sectional area of one location in square micrometers.
    pub location_area: f64,
    /// Lateral spacing between location centers in micrometers.
    pub grid_size: f64,
    /// Maximum number of agents a location may hold.
    pub max_agents: usize,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            width: 20,
            height: 20,
            depth: 1,
            location_volume: 6.7e3,
            location_area: 1.1e3,
            grid_size: 30.0,
            max_agents: 6,
        }
    }
}

impl LatticeConfig {
    fn validate(&self) -> Result<(), LatticeError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(LatticeError::InvalidConfig(
                "lattice dimensions must be non-zero",
            ));
        }
        if self.location_volume <= 0.0 || self.location_area <= 0.0 || self.grid_size <= 0.0 {
            return Err(LatticeError::InvalidConfig(
                "location geometry must be positive",
            ));
        }
        if self.max_agents == 0 {
            return Err(LatticeError::InvalidConfig("max_agents must be non-zero"));
        }
        Ok(())
    }
}

/// The lattice itself, generic over the caller's agent key type.
pub struct Lattice<K: Copy + PartialEq> {
    config: LatticeConfig,
    occupants: Vec<Vec<K>>,
    fields: [Vec<f64>; 4],
    sites: Vec<bool>,
    damage: Vec<f64>,
    observer: Box<dyn SiteObserver>,
}

impl<K: Copy + PartialEq + std::fmt::Debug> std::fmt::Debug for Lattice<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lattice")
            .field("config", &self.config)
            .field("occupied", &self.occupants.iter().filter(|o| !o.is_empty()).count())
            .finish()
    }
}

impl<K: Copy + PartialEq> Lattice<K> {
    /// Build an empty lattice from the provided geometry.
    pub fn new(config: LatticeConfig) -> Result<Self, LatticeError> {
        config.validate()?;
        let len = (config.width * config.height * config.depth) as usize;
        Ok(Self {
            config,
            occupants: vec![Vec::new(); len],
            fields: [
                vec![0.0; len],
                vec![0.0; len],
                vec![0.0; len],
                vec![0.0; len],
            ],
            sites: vec![false; len],
            damage: vec![0.0; len],
            observer: Box::new(NullObserver),
        })
    }

    /// Replace the site observer.
    pub fn set_observer(&mut self, observer: Box<dyn SiteObserver>) {
        self.observer = observer;
    }

    /// Lattice geometry.
    #[must_use]
    pub fn config(&self) -> &LatticeConfig {
        &self.config
    }

    /// Returns whether `coord` lies inside the lattice.
    #[must_use]
    pub fn contains(&self, coord: Coord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && coord.z >= 0
            && (coord.x as u32) < self.config.width
            && (coord.y as u32) < self.config.height
            && (coord.z as u32) < self.config.depth
    }

    fn offset(&self, coord: Coord) -> Result<usize, LatticeError> {
        if !self.contains(coord) {
            return Err(LatticeError::OutOfBounds(coord.x, coord.y, coord.z));
        }
        let w = self.config.width as usize;
        let h = self.config.height as usize;
        Ok((coord.z as usize * h + coord.y as usize) * w + coord.x as usize)
    }

    /// Iterate over every coordinate in the lattice, in storage order.
    pub fn coords(&self) -> impl Iterator<Item = Coord> + '_ {
        let (w, h, d) = (self.config.width, self.config.height, self.config.depth);
        (0..d).flat_map(move |z| {
            (0..h).flat_map(move |y| (0..w).map(move |x| Coord::new(x as i32, y as i32, z as i32)))
        })
    }

    /// In-bounds neighbor coordinates of `coord` (lateral 8 + vertical 2).
    #[must_use]
    pub fn neighbors(&self, coord: Coord) -> Vec<Coord> {
        NEIGHBOR_OFFSETS
            .iter()
            .map(|&(dx, dy, dz)| Coord::new(coord.x + dx, coord.y + dy, coord.z + dz))
            .filter(|&c| self.contains(c))
            .collect()
    }

    /// Occupants registered at `coord`.
    pub fn occupants(&self, coord: Coord) -> Result<&[K], LatticeError> {
        Ok(&self.occupants[self.offset(coord)?])
    }

    /// Number of occupants at `coord`.
    pub fn occupancy(&self, coord: Coord) -> Result<usize, LatticeError> {
        Ok(self.occupants[self.offset(coord)?].len())
    }

    /// Register a new agent at `coord` and notify the observer.
    pub fn add_agent(&mut self, key: K, coord: Coord) -> Result<(), LatticeError> {
        let idx = self.offset(coord)?;
        self.occupants[idx].push(key);
        self.observer.agent_added(coord);
        Ok(())
    }

    /// Remove an agent from `coord`. Unknown keys are ignored.
    pub fn remove_agent(&mut self, key: K, coord: Coord) -> Result<(), LatticeError> {
        let idx = self.offset(coord)?;
        self.occupants[idx].retain(|&k| k != key);
        Ok(())
    }

    /// Move an agent between locations and notify the observer.
    pub fn move_agent(&mut self, key: K, from: Coord, to: Coord) -> Result<(), LatticeError> {
        let from_idx = self.offset(from)?;
        let to_idx = self.offset(to)?;
        self.occupants[from_idx].retain(|&k| k != key);
        self.occupants[to_idx].push(key);
        self.observer.agent_moved(from, to);
        Ok(())
    }

    /// Substrate value at `coord`.
    pub fn field(&self, substrate: Substrate, coord: Coord) -> Result<f64, LatticeError> {
        Ok(self.fields[substrate.index()][self.offset(coord)?])
    }

    /// Overwrite the substrate value at `coord`.
    pub fn set_field(
        &mut self,
        substrate: Substrate,
        coord: Coord,
        value: f64,
    ) -> Result<(), LatticeError> {
        let idx = self.offset(coord)?;
        self.fields[substrate.index()][idx] = value;
        Ok(())
    }

    /// Add `delta` to the substrate value at `coord`, clamping at zero.
    pub fn adjust_field(
        &mut self,
        substrate: Substrate,
        coord: Coord,
        delta: f64,
    ) -> Result<(), LatticeError> {
        let idx = self.offset(coord)?;
        let cell = &mut self.fields[substrate.index()][idx];
        *cell = (*cell + delta).max(0.0);
        Ok(())
    }

    /// Fill an entire substrate field with `value`.
    pub fn fill_field(&mut self, substrate: Substrate, value: f64) {
        self.fields[substrate.index()].fill(value);
    }

    /// Substrate value averaged over `coord` and its in-bounds neighbors.
    pub fn field_average(&self, substrate: Substrate, coord: Coord) -> Result<f64, LatticeError> {
        let field = &self.fields[substrate.index()];
        let mut total = field[self.offset(coord)?];
        let mut count = 1usize;
        for neighbor in self.neighbors(coord) {
            total += field[self.offset(neighbor)?];
            count += 1;
        }
        Ok(total / count as f64)
    }

    /// Mark `coord` as a vasculature/source site with the given damage.
    pub fn set_site(&mut self, coord: Coord, damage: f64) -> Result<(), LatticeError> {
        let idx = self.offset(coord)?;
        self.sites[idx] = true;
        self.damage[idx] = damage;
        Ok(())
    }

    /// Returns whether `coord` is a vasculature/source site.
    pub fn is_site(&self, coord: Coord) -> Result<bool, LatticeError> {
        Ok(self.sites[self.offset(coord)?])
    }

    /// Accumulated damage at a site (zero for non-sites).
    pub fn site_damage(&self, coord: Coord) -> Result<f64, LatticeError> {
        Ok(self.damage[self.offset(coord)?])
    }
}

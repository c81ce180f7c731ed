use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// A single maze cell. On the wire: `0` = passage, `1` = wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Passage,
    Wall,
}

impl Tile {
    pub fn code(self) -> u8 {
        match self {
            Tile::Passage => 0,
            Tile::Wall => 1,
        }
    }
}

impl Serialize for Tile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Tile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Tile::Passage),
            1 => Ok(Tile::Wall),
            other => Err(de::Error::custom(format!(
                "invalid tile {}, expected 0 or 1",
                other
            ))),
        }
    }
}

/// Rectangular maze grid, indexed `cells[x][y]`.
///
/// Serialized transparently as `[[int]]`, outer array over x.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Maze {
    cells: Vec<Vec<Tile>>,
}

impl Maze {
    /// A `width × height` grid with every cell set to `tile`.
    pub fn filled(width: usize, height: usize, tile: Tile) -> Self {
        Self {
            cells: vec![vec![tile; height]; width],
        }
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    pub fn height(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    /// Tile at `(x, y)`, or `None` outside the grid.
    pub fn get(&self, x: isize, y: isize) -> Option<Tile> {
        if x < 0 || y < 0 {
            return None;
        }
        self.cells.get(x as usize)?.get(y as usize).copied()
    }

    /// Set the tile at `(x, y)`. Out-of-range writes are ignored.
    pub fn set(&mut self, x: isize, y: isize, tile: Tile) {
        if x < 0 || y < 0 {
            return;
        }
        if let Some(cell) = self
            .cells
            .get_mut(x as usize)
            .and_then(|column| column.get_mut(y as usize))
        {
            *cell = tile;
        }
    }

    pub fn is_passage(&self, x: isize, y: isize) -> bool {
        self.get(x, y) == Some(Tile::Passage)
    }

    /// Coordinates of every passage cell, column by column.
    pub fn passages(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells.iter().enumerate().flat_map(|(x, column)| {
            column
                .iter()
                .enumerate()
                .filter(|(_, tile)| **tile == Tile::Passage)
                .map(move |(y, _)| (x, y))
        })
    }
}

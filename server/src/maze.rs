//! Growing-passage maze generator.
//!
//! Starting from an entrance in the middle of the first column, every pass
//! tries to extend each passage by one cell in each axis direction. A cell is
//! only carved when the surrounding guard cells are still walls, which keeps
//! passages from touching and the maze a tree. Generation stops after a run
//! of unproductive passes, then opens one exit on the far row and reseals
//! the entrance.

use labyrinth_shared::maze::{Maze, Tile};
use rand::seq::SliceRandom;
use rand::Rng;

/// Unproductive passes tolerated before generation stops (the counter must
/// go negative, so one more pass than this value).
/// Counts consecutive misses: a productive pass restores the full budget.
const RETRIES: i32 = 5;

/// Chance that an unguarded neighbour is carved during a pass.
const CARVE_PROBABILITY: f64 = 0.5;

const DIRECTIONS: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MazeError {
    #[error("maze must be at least 2x2, got {width}x{height}")]
    TooSmall { width: usize, height: usize },
    #[error("no passage on row {row} to open an exit from")]
    NoExitCandidate { row: usize },
}

/// Entrance used while carving; resealed before the maze is returned.
pub fn entrance(width: usize) -> (usize, usize) {
    (width / 2, 0)
}

/// Generate a `width × height` maze using `rng` for every random choice.
pub fn generate_maze(width: usize, height: usize, rng: &mut impl Rng) -> Result<Maze, MazeError> {
    if width < 2 || height < 2 {
        return Err(MazeError::TooSmall { width, height });
    }

    let mut maze = carve(width, height, rng);
    let exit_x = open_exit(&mut maze, rng)?;
    let (ex, ey) = entrance(width);
    maze.set(ex as isize, ey as isize, Tile::Wall);

    tracing::debug!(width, height, exit_x, "Maze generated");
    Ok(maze)
}

/// Grow passages from the open entrance until the retries run out.
fn carve(width: usize, height: usize, rng: &mut impl Rng) -> Maze {
    let mut maze = Maze::filled(width, height, Tile::Wall);
    let (ex, ey) = entrance(width);
    maze.set(ex as isize, ey as isize, Tile::Passage);

    let mut retries = RETRIES;
    let mut passes = 0u32;
    loop {
        passes += 1;
        if carve_pass(&mut maze, rng) > 0 {
            retries = RETRIES;
            continue;
        }
        retries -= 1;
        if retries < 0 {
            break;
        }
    }
    tracing::trace!(passes, "Carving finished");
    maze
}

/// One scan over the grid. Returns the number of cells carved.
fn carve_pass(maze: &mut Maze, rng: &mut impl Rng) -> usize {
    let mut carved = 0;
    for x in 0..maze.width() as isize {
        for y in 0..maze.height() as isize {
            if !maze.is_passage(x, y) {
                continue;
            }
            for (i, j) in DIRECTIONS {
                if try_carve(maze, x, y, i, j, rng) {
                    carved += 1;
                }
            }
        }
    }
    carved
}

/// Carve `(x+i, y+j)` if it, the cell beyond it, and the perpendicular
/// neighbours of both are walls.
fn try_carve(maze: &mut Maze, x: isize, y: isize, i: isize, j: isize, rng: &mut impl Rng) -> bool {
    let guards = [
        (x + i, y + j),
        (x + i + j, y + j + i),
        (x + i - j, y + j - i),
        (x + 2 * i, y + 2 * j),
        (x + 2 * i + j, y + 2 * j + i),
        (x + 2 * i - j, y + 2 * j - i),
    ];
    if !guards.iter().all(|&(gx, gy)| is_wall(maze, gx, gy)) {
        return false;
    }
    if !rng.gen_bool(CARVE_PROBABILITY) {
        return false;
    }
    maze.set(x + i, y + j, Tile::Passage);
    true
}

/// Outside the grid counts as open, so the border is never carved.
fn is_wall(maze: &Maze, x: isize, y: isize) -> bool {
    maze.get(x, y) == Some(Tile::Wall)
}

/// Open a random exit on the last row below a passage of the row above it.
fn open_exit(maze: &mut Maze, rng: &mut impl Rng) -> Result<usize, MazeError> {
    let row = maze.height() - 2;
    let candidates: Vec<usize> = (0..maze.width())
        .filter(|&x| maze.is_passage(x as isize, row as isize))
        .collect();
    let &x = candidates
        .choose(rng)
        .ok_or(MazeError::NoExitCandidate { row })?;
    maze.set(x as isize, (row + 1) as isize, Tile::Passage);
    Ok(x)
}

//! Wire types shared between the labyrinth server and its clients.
//!
//! TypeScript bindings for these types are exported with `ts-rs`.

pub mod maze;
pub mod protocol;
pub mod vec3;

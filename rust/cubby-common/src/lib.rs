#![warn(missing_docs)]

//! Light weight helpers shared by the cubby crates: cross-target trait
//! bounds, clock access, bounded waiting and the [Flight] cell that both the
//! credential and namespace caches are built on.

mod sync;
pub use sync::*;

pub mod time;

mod flight;
pub use flight::*;

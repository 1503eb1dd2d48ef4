//! Arenas and the interaction graph.
//!
//! Bodies and interactions are owned by slot [`Arena`]s and addressed
//! through stable integer handles; the [`InteractionGraph`] stores
//! handles only (arena owns, graph borrows), which keeps ownership
//! acyclic.
//!
//! The graph is the structural backbone of the non-smooth problem:
//!
//! - vertices are the *active* interactions, in deterministic slot order,
//!   each carrying its diagonal block and row offset;
//! - edges connect interactions that share a body and carry one
//!   off-diagonal coupling block; the symmetric counterpart is the
//!   transpose and is never recomputed.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod arena;
mod graph;

pub use arena::{Arena, ArenaKey};
pub use graph::{GraphEdge, GraphVertex, InteractionGraph};

//! Non-smooth problem assembly and solution.
//!
//! Given the interaction graph, this crate assembles the block-sparse
//! complementarity problem of one time step and solves it with a
//! non-smooth Gauss-Seidel (NSGS) iteration:
//!
//! - [`NsProblem`] computes the Delassus blocks (`C·W⁻¹·Cᵀ` on the
//!   diagonal, shared-body couplings on the edges) and the right-hand
//!   side from the free constraint outputs, tracking its own
//!   `{Uninitialized → BlocksStale → BlocksFresh → Solved}` lifecycle;
//! - [`Nsgs`] sweeps the graph vertices, solving one small
//!   complementarity problem per interaction with a law-specific local
//!   solver, until the accumulated normalized error drops below
//!   tolerance.
//!
//! Non-convergence is reported in [`NsgsResult`] as a status, never as an
//! error: the caller decides whether to retry with different parameters,
//! reduce the timestep, or accept the result. Local numerical failures
//! are folded into the global error so one bad contact cannot abort the
//! whole solve.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::module_name_repetitions)]

mod local;
mod nsgs;
mod problem;

pub use local::{solve_local, LocalStatus};
pub use nsgs::{Nsgs, NsgsResult, SolveStatus};
pub use problem::{AssemblyState, NsProblem};

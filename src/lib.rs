// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthesis imaging and self-calibration core for radio interferometry.
//!
//! Given a set of complex visibility samples tagged with projected
//! baseline coordinates, weights and times, this crate grids them onto a
//! half-plane conjugate-symmetric UV grid, Fourier-inverts the grid into
//! dirty maps and beams, deconvolves with Högbom CLEAN, restores CLEAN
//! models with an elliptical Gaussian beam, and solves for per-antenna
//! complex gains by least squares.
//!
//! File I/O, plotting and the user interface are deliberately absent;
//! observations reach the core through the [`obs`] module's collaborator
//! types.

pub mod clean;
pub mod constants;
pub mod ellipse;
mod error;
pub mod grid;
pub mod invert;
pub mod math;
pub mod model;
pub mod obs;
pub mod restore;
pub mod selfcal;
pub mod windows;

// Re-exports.
pub use clean::{mapclean, CleanPars, CleanStats, CleanStop};
pub use error::SynthError;
pub use grid::MapBeam;
pub use invert::{uvinvert, InvertPars};
pub use model::{CmpType, Modcmp, Model};
pub use obs::{MemoryStore, Moddif, Observation};
pub use restore::{mapres, RestorePars};
pub use selfcal::{slfcal, SelfCalPars, SelfCalReport};
pub use windows::{Mapwin, Subwin};

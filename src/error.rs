// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all uvsynth-related errors. This should be the *only*
//! error enum that is publicly visible from the crate root.

use thiserror::Error;

use crate::{
    clean::CleanError, grid::GridError, invert::InvertError, math::FftError, obs::ObsError,
    restore::RestoreError, selfcal::SelfCalError, windows::WindowError,
};

/// The *only* publicly visible error from uvsynth. Every numeric
/// component has its own error enum; they all funnel into this one so
/// that callers can hold a single type.
#[derive(Error, Debug)]
pub enum SynthError {
    #[error(transparent)]
    Fft(#[from] FftError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Obs(#[from] ObsError),

    #[error(transparent)]
    Invert(#[from] InvertError),

    #[error(transparent)]
    Clean(#[from] CleanError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error(transparent)]
    SelfCal(#[from] SelfCalError),

    #[error(transparent)]
    Window(#[from] WindowError),
}

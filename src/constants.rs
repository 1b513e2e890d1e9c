// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

Angles are radians, times are UT seconds and UV coordinates are
wavelengths throughout, unless a name says otherwise. Trig recurrences
are run in double precision before results drop to the grid's single
precision.
 */

pub use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Scale radians to milli-arcseconds, for human-readable reports.
pub const RAD_TO_MAS: f64 = 2.062648062470964e8;

/// Scale radians to degrees.
pub const RAD_TO_DEG: f64 = 57.29577951308232;

/// Minutes per UT second.
pub const UT_TO_MIN: f64 = 1.0 / 60.0;

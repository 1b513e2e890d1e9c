// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Högbom CLEAN: iterative peak search and beam subtraction over the
//! windowed residual map.


use log::{info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::grid::MapBeam;
use crate::model::{Modcmp, Model};
use crate::obs::{ObsError, Observation};
use crate::windows::{win_pix, Mapwin, Winran};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CleanError {
    #[error("ridiculous clean gain: {0}")]
    BadGain(f32),

    #[error("invalid dirty beam supplied - try re-inverting first")]
    BadBeam,

    #[error("all CLEAN windows lie outside the CLEAN area; no cleaning performed")]
    NoWindows,

    #[error(transparent)]
    Obs(#[from] ObsError),
}

/// Why the CLEAN loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanStop {
    /// The residual dropped to the requested cutoff.
    Converged,
    /// Negative components were prohibited and one was found.
    FirstNegative,
    /// The component limit was reached.
    IterationLimit,
    /// No non-zero flux remained inside the windows.
    Empty,
}

/// CLEAN controls.
#[derive(Clone, Copy, Debug)]
pub struct CleanPars {
    /// The magnitude is the maximum number of components; a negative
    /// value additionally stops cleaning at the first negative
    /// component (which is not subtracted).
    pub maxcmp: i32,
    /// The residual flux to stop cleaning at \[Jy/beam\].
    pub cutoff: f32,
    /// The CLEAN loop gain, in (0, 1].
    pub gain: f32,
    /// Merge delta components at equal positions.
    pub docomp: bool,
}

impl Default for CleanPars {
    fn default() -> CleanPars {
        CleanPars {
            maxcmp: 100,
            cutoff: 0.0,
            gain: 0.05,
            docomp: false,
        }
    }
}

/// What a CLEAN run did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CleanStats {
    /// The number of components subtracted.
    pub niter: usize,
    /// The total flux cleaned \[Jy\].
    pub cleaned_flux: f64,
    /// Why the loop stopped.
    pub stop: CleanStop,
}

/// Clean the map in `mb` using its beam and the given windows, with
/// flux and iteration limits. New delta components are appended to
/// `model`. On return the map holds the residual left after the
/// subtractions; components subtracted before an early stop remain
/// subtracted.
pub fn mapclean(
    obs: &Observation,
    mb: &mut MapBeam,
    mw: Option<&Mapwin>,
    model: &mut Model,
    pars: &CleanPars,
) -> Result<CleanStats, CleanError> {
    if mb.ncmp > 0 {
        warn!("mapclean: Warning: You appear to be cleaning a restored map");
    }
    if pars.gain <= 0.0 || pars.gain > 1.0 {
        return Err(CleanError::BadGain(pars.gain));
    }

    let nx = mb.nx();
    let ny = mb.ny();
    // The cleanable area is the inner half of the grid on each axis, so
    // that the beam array is twice as big in both directions.
    let area = mb.area();
    let (ixmin, ixmax, iymin, iymax) = (area.ixmin, area.ixmax, area.iymin, area.iymax);
    let xcent = nx / 2;
    let ycent = ny / 2;

    // Convert the window list to pixel ranges clipped to the clean
    // area; with no windows, one range covers the whole area.
    let wins: Vec<Winran> = match mw {
        None => vec![Winran {
            xa: ixmin,
            xb: ixmax,
            ya: iymin,
            yb: iymax,
        }],
        Some(mw) if mw.is_empty() => vec![Winran {
            xa: ixmin,
            xb: ixmax,
            ya: iymin,
            yb: iymax,
        }],
        Some(mw) => {
            let wins: Vec<Winran> = mw
                .iter()
                .filter_map(|w| win_pix(w, mb, ixmin, ixmax, iymin, iymax))
                .collect();
            if wins.is_empty() {
                return Err(CleanError::NoWindows);
            }
            wins
        }
    };

    let cutoff = pars.cutoff.abs();
    let noneg = pars.maxcmp < 0;
    let maxcmp = pars.maxcmp.unsigned_abs() as usize;

    // The beam centre value scales pixel values to Jy/beam.
    let cntr = mb.centre();
    let bmax = mb.beam[cntr];
    if bmax == 0.0 {
        return Err(CleanError::BadBeam);
    }

    let mut niter = 0usize;
    let mut ccsum = 0.0f64;
    let mut stop = CleanStop::IterationLimit;

    while niter < maxcmp {
        // The pixel of greatest absolute value inside the windows.
        let peak = match absmax(&mb.map, nx, &wins) {
            Some(p) => p,
            None => {
                info!("clean: No flux left in map - finishing early");
                stop = CleanStop::Empty;
                break;
            }
        };

        let mut maxval = mb.map[peak] / bmax;
        if maxval.abs() <= cutoff {
            info!("Clean target residual flux of {cutoff} Jy/beam attained");
            stop = CleanStop::Converged;
            break;
        }
        if noneg && maxval < 0.0 {
            info!("Clean halted at first negative component");
            stop = CleanStop::FirstNegative;
            break;
        }

        maxval *= pars.gain;

        subtract_component(mb, peak, maxval, ixmin, ixmax, iymin, iymax);

        niter += 1;
        ccsum += f64::from(maxval);
        if niter % 50 == 0 {
            info!("Component: {niter:3}  -  total flux cleaned = {ccsum:.6} Jy");
        }

        // Append the component at the peak's map coordinates.
        let xval = ((peak % nx) as f64 - xcent as f64) * mb.xinc();
        let yval = ((peak / nx) as f64 - ycent as f64) * mb.yinc();
        model.add_cmp(
            Modcmp::delta(maxval, xval as f32, yval as f32),
            pars.docomp,
        );
    }

    mb.stats(obs);

    info!("Total flux subtracted in {niter} components = {ccsum:.6} Jy");
    info!(
        "Clean residual min={:.6} max={:.6} Jy/beam",
        mb.minpix.value, mb.maxpix.value
    );
    info!(
        "Clean residual mean={:.6} rms={:.6} Jy/beam",
        mb.mapmean, mb.maprms
    );

    // The map is a residual map again.
    mb.ncmp = 0;

    Ok(CleanStats {
        niter,
        cleaned_flux: ccsum,
        stop,
    })
}

/// The flat (image-plane) index of the pixel of greatest absolute value
/// within the windowed areas, or None if only zeroes remain.
fn absmax(map: &[f32], nx: usize, wins: &[Winran]) -> Option<usize> {
    let mut maxabs = 0.0f32;
    let mut maxptr = None;
    for win in wins {
        for iy in win.ya..=win.yb {
            let base = iy * nx;
            for (i, &v) in map[base + win.xa..=base + win.xb].iter().enumerate() {
                if v < -maxabs || v > maxabs {
                    maxabs = v.abs();
                    maxptr = Some(base + win.xa + i);
                }
            }
        }
    }
    maxptr
}

/// Subtract `cmpval` times the beam, centred on the component pixel
/// `peak`, from the cleanable area of the map.
fn subtract_component(
    mb: &mut MapBeam,
    peak: usize,
    cmpval: f32,
    ixmin: usize,
    ixmax: usize,
    iymin: usize,
    iymax: usize,
) {
    let nx = mb.nx();
    let ny = mb.ny();
    let cntr = mb.centre() as i64;

    let map = &mut mb.map;
    let beam = &mb.beam[..];
    let width = ixmax - ixmin + 1;

    map[..nx * ny]
        .par_chunks_mut(nx)
        .enumerate()
        .filter(|(iy, _)| *iy >= iymin && *iy <= iymax)
        .for_each(|(iy, row)| {
            // The beam element aligned with the first pixel of this row
            // of the clean area.
            let boff = (cntr + (iy * nx + ixmin) as i64 - peak as i64) as usize;
            let brow = &beam[boff..boff + width];
            for (m, &b) in row[ixmin..=ixmax].iter_mut().zip(brow) {
                *m -= b * cmpval;
            }
        });
}

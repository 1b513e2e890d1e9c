// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Restoration: convolve a CLEAN model with an elliptical Gaussian
//! restoring beam and add it to the residual map.

#[cfg(test)]
mod tests;

use lazy_static::lazy_static;
use log::{info, warn};
use thiserror::Error;

use crate::grid::MapBeam;
use crate::model::{CmpType, Model};
use crate::obs::Observation;

/// Size of the exponential lookup table.
const ETSIZ: usize = 1024;

/// The number of sigma out to which component Gaussians are evaluated.
const NSIGMA: f64 = 4.5;

/// Conversion factor from an exponent argument to an `EXPTAB` index.
const EXPCONV: f64 = ETSIZ as f64 / (0.5 * NSIGMA * NSIGMA);

lazy_static! {
    /// exp(-x) sampled on the quadratic-form arguments used below.
    static ref EXPTAB: Vec<f32> = (0..ETSIZ)
        .map(|i| (-(i as f64) / EXPCONV).exp() as f32)
        .collect();
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreError {
    #[error("destination buffer has {got} elements; the map needs {need}")]
    BadDestination { got: usize, need: usize },
}

/// Restoration controls.
#[derive(Clone, Copy, Debug)]
pub struct RestorePars {
    /// Restoring beam major axis \[radians\].
    pub bmaj: f64,
    /// Restoring beam minor axis \[radians\].
    pub bmin: f64,
    /// Restoring beam position angle \[radians\].
    pub bpa: f64,
    /// Subtract the model instead of adding it, returning a restored
    /// map to its residual.
    pub dosub: bool,
    /// Zero the destination before restoring, leaving a map of the
    /// model alone.
    pub noresid: bool,
    /// Pre-smooth the inner quarter of the residuals with a 3x3
    /// binomial mask.
    pub dosmth: bool,
    /// The frequency at which to restore, for components with spectral
    /// indices \[Hz\].
    pub freq: f64,
}

/// Restore the CLEAN `model` into the residual map. With `dst` the
/// restored map is written there and the residual map is left
/// untouched; otherwise the map in `mb` is restored in place. The
/// cached statistics, restoring-beam record and restored-component
/// counter of `mb` are refreshed either way.
pub fn mapres(
    obs: &Observation,
    mb: &mut MapBeam,
    model: &Model,
    dst: Option<&mut [f32]>,
    pars: &RestorePars,
) -> Result<(), RestoreError> {
    let nx = mb.nx();
    let ny = mb.ny();
    let xinc = mb.xinc();
    let yinc = mb.yinc();

    // Swap bmin and bmaj if given in the wrong order.
    let (bmin, bmaj) = if pars.bmin > pars.bmaj {
        (pars.bmaj, pars.bmin)
    } else {
        (pars.bmin, pars.bmaj)
    };

    match dst {
        Some(buf) => {
            if buf.len() < nx * ny {
                return Err(RestoreError::BadDestination {
                    got: buf.len(),
                    need: nx * ny,
                });
            }
            if pars.noresid {
                buf[..nx * ny].iter_mut().for_each(|v| *v = 0.0);
            } else {
                buf[..nx * ny].copy_from_slice(&mb.map[..nx * ny]);
                if pars.dosmth {
                    res_smooth(buf, nx, ny);
                }
            }
            restore_components(buf, nx, ny, xinc, yinc, model, bmin, bmaj, pars);
        }
        None => {
            if pars.noresid {
                mb.map[..nx * ny].iter_mut().for_each(|v| *v = 0.0);
            } else if pars.dosmth {
                res_smooth(&mut mb.map, nx, ny);
            }
            restore_components(&mut mb.map, nx, ny, xinc, yinc, model, bmin, bmaj, pars);
        }
    }

    mb.stats(obs);
    info!(
        "Clean map  min={:.5}  max={:.5} Jy/beam",
        mb.minpix.value, mb.maxpix.value
    );

    // Mark the map as restored and record the beam used.
    mb.ncmp += model.ncmp();
    mb.bmin = bmin;
    mb.bmaj = bmaj;
    mb.bpa = pars.bpa;
    Ok(())
}

/// Convolve each model component with the restoring beam and add (or
/// subtract) the result.
fn restore_components(
    map: &mut [f32],
    nx: usize,
    ny: usize,
    xinc: f64,
    yinc: f64,
    model: &Model,
    bmin: f64,
    bmaj: f64,
    pars: &RestorePars,
) {
    // FWHM (radians) -> standard deviation.
    let bfac = 1.0 / 256.0f64.ln().sqrt();

    for cmp in model.iter() {
        // The Gaussian to be added for this component.
        let (mut cmin, mut cmaj, cpa) = match cmp.ctype {
            CmpType::Delta => (bmin, bmaj, pars.bpa),
            CmpType::Gaussian => gauconv(
                bmin,
                bmaj,
                pars.bpa,
                f64::from(cmp.ratio) * f64::from(cmp.major),
                f64::from(cmp.major),
                f64::from(cmp.phi),
            ),
            _ => {
                warn!("mapres: Non delta/gaussian function component not supported");
                continue;
            }
        };

        // Scale the peak to Jy/beam.
        let mut flux = f64::from(cmp.flux) * bmaj * bmin / (cmin * cmaj);
        if cmp.spcind != 0.0 {
            flux *= (pars.freq / cmp.freq0).powf(f64::from(cmp.spcind));
        }

        // FWHMs to standard deviations, and the pixel extent needed to
        // sample the Gaussian out to NSIGMA sigma along the major axis.
        cmin *= bfac;
        cmaj *= bfac;
        let nxpix = (NSIGMA * cmaj / xinc) as i64;
        let nypix = (NSIGMA * cmaj / yinc) as i64;

        // 1/(2 sigma^2) on each axis.
        let minfac = 0.5 / (cmin * cmin);
        let majfac = 0.5 / (cmaj * cmaj);

        // Pixel contributions along the rotated minor and major axes.
        let (sinpa, cospa) = cpa.sin_cos();
        let xminor = xinc * cospa;
        let yminor = -yinc * sinpa;
        let xmajor = xinc * sinpa;
        let ymajor = yinc * cospa;

        // The component centre in fractional pixels, and the clipped
        // patch to evaluate.
        let modx = (nx / 2) as f64 + f64::from(cmp.x) / xinc;
        let mody = (ny / 2) as f64 + f64::from(cmp.y) / yinc;
        let imodx = modx as i64;
        let imody = mody as i64;
        let xa = if nxpix > imodx { 0 } else { imodx - nxpix };
        let xb = (imodx + nxpix).min(nx as i64 - 1);
        let ya = if nypix > imody { 0 } else { imody - nypix };
        let yb = (imody + nypix).min(ny as i64 - 1);
        if xb < xa || yb < ya {
            continue;
        }

        for iy in ya..=yb {
            let fy = mody - iy as f64;
            let base = iy as usize * nx;
            for ix in xa..=xb {
                let fx = modx - ix as f64;
                let minor = xminor * fx + yminor * fy;
                let major = xmajor * fx + ymajor * fy;
                let arg = minfac * minor * minor + majfac * major * major;
                let iarg = (arg * EXPCONV) as usize;
                if iarg < ETSIZ {
                    let g = flux as f32 * EXPTAB[iarg];
                    let pixel = &mut map[base + ix as usize];
                    if pars.dosub {
                        *pixel -= g;
                    } else {
                        *pixel += g;
                    }
                }
            }
        }
    }
}

/// The parameters of the Gaussian formed by convolving two Gaussians,
/// in the second-moment formulation of Wild (1970), Aust. J. Phys. 23,
/// 113. Arguments and results are (minor, major, angle) with axes as
/// FWHMs.
fn gauconv(
    min_a: f64,
    maj_a: f64,
    ang_a: f64,
    min_b: f64,
    maj_b: f64,
    ang_b: f64,
) -> (f64, f64, f64) {
    // Variances add elementwise, so square everything first.
    let maj_a = maj_a * maj_a;
    let min_a = min_a * min_a;
    let maj_b = maj_b * maj_b;
    let min_b = min_b * min_b;

    // The right-hand sums of equations 7, 8 and 9 of Wild (1970).
    let sum7 = (maj_a - min_a) * (2.0 * ang_a).sin() + (maj_b - min_b) * (2.0 * ang_b).sin();
    let sum8 = (maj_a + min_a) + (maj_b + min_b);
    let sum9 = (maj_a - min_a) * (2.0 * ang_a).cos() + (maj_b - min_b) * (2.0 * ang_b).cos();

    let angle = if sum7.abs() == 0.0 && sum9.abs() == 0.0 {
        0.0
    } else {
        0.5 * sum7.atan2(sum9)
    };

    let sumvar = (sum7 * sum7 + sum9 * sum9).sqrt();
    let major = (0.5 * (sum8 + sumvar)).sqrt();
    let minor = (0.5 * (sum8 - sumvar)).abs().sqrt();
    (minor, major, angle)
}

/// Smooth the central nx/2 x ny/2 area of the map with a fixed 3x3
/// binomial mask. The patch is first shifted right into the unused
/// margin of the grid so that the smoothing can run in place.
fn res_smooth(map: &mut [f32], nx: usize, ny: usize) {
    const MASK: [[f32; 3]; 3] = [
        [0.0625, 0.125, 0.0625],
        [0.125, 0.25, 0.125],
        [0.0625, 0.125, 0.0625],
    ];
    let nhalf = 1usize;

    let xa = nx / 4;
    let ya = ny / 4;
    let xb = 3 * xa - 1;
    let yb = 3 * ya - 1;
    let width = xb - xa + 1;
    let yshift = nx / 2;

    // Shift the central patch right by yshift elements; in flat
    // addressing the displaced copy lands entirely in the margins.
    for iy in ya..=yb {
        let base = iy * nx + xa;
        map.copy_within(base..base + width, base + yshift);
    }

    // Smooth back into place, leaving a margin of one pixel unsmoothed
    // around the edges of the patch.
    let mask_offset = nhalf + nx * nhalf;
    let mut dest = xa + ya * nx + mask_offset;
    let yinc = nx / 2 + 2 * nhalf;
    for _iy in (ya + nhalf)..=(yb - nhalf) {
        for _ix in (xa + nhalf)..=(xb - nhalf) {
            let mut tmp = dest + yshift - mask_offset;
            let mut sum = 0.0f32;
            for row in &MASK {
                for &m in row {
                    sum += map[tmp] * m;
                    tmp += 1;
                }
                tmp += nx - 3;
            }
            map[dest] = sum;
            dest += 1;
        }
        dest += yinc;
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fourier inversion of visibilities into dirty maps and beams.
//!
//! The gridder convolves each visibility onto a half-plane,
//! conjugate-symmetric UV grid with a small Gaussian kernel, supporting
//! natural, uniform, radial, Gaussian-taper and error-based weighting.
//! The inverse transformer phase-shifts the grid, inverse-FFTs it and
//! divides out the Fourier transform of the gridding kernel.

#[cfg(test)]
mod tests;

use log::{info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::constants::{RAD_TO_DEG, RAD_TO_MAS};
use crate::grid::MapBeam;
use crate::math::{cnj_shift, costran, fft2d, fnint, FftDirection, FftError};
use crate::obs::{order_uv_range, ObsError, ObsState, Observation};

/// The number of pixels on either side of a sample's UV position into
/// which the gridding kernel spreads it.
const NMASK: i64 = 2;

/// The number of samples of the gridding convolution function.
const NGCF: usize = 301;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvertError {
    #[error("neither a map nor a beam was requested")]
    NothingToDo,

    #[error("uniform bin width {0} is out of the permissible range")]
    BadBinWidth(f32),

    #[error("there are no unflagged visibilities to be inverted")]
    AllFlagged,

    #[error("no visibilities were available for creating a map")]
    NoDataInRange,

    #[error(transparent)]
    Obs(#[from] ObsError),

    #[error(transparent)]
    Fft(#[from] FftError),
}

/// Gridding and weighting controls for [`uvinvert`].
#[derive(Clone, Copy, Debug, Default)]
pub struct InvertPars {
    /// UV radius below which to ignore data \[wavelengths\].
    pub uvmin: f32,
    /// UV radius beyond which to ignore data \[wavelengths\]. The range
    /// is unrestricted when the larger of the two bounds is <= 0.
    pub uvmax: f32,
    /// The value of the weighting Gaussian at radius `gaurad`, in
    /// (0, 1). Outside that range no taper is applied.
    pub gauval: f32,
    /// The UV radius at which the taper has value `gauval`
    /// \[wavelengths\]. <= 0 disables the taper.
    pub gaurad: f32,
    /// Weight each visibility by its UV radius.
    pub dorad: bool,
    /// When < 0, scale weights by |wt|^(-errpow/2).
    pub errpow: f32,
    /// The width of the uniform-weighting bins in UV-grid pixels; <= 0
    /// selects natural weighting.
    pub binwid: f32,
}

/// The gridding convolution function, sampled finely enough to be
/// indexed directly during convolution.
struct Gcf {
    convfn: [f32; NGCF],
    /// Converts a UV-grid pixel offset to a `convfn` index.
    tgtocg: f32,
}

impl Gcf {
    /// Build the Gaussian gridding convolution function and record its
    /// normalized reciprocal Fourier transform along each axis in
    /// `mb.rxft`/`mb.ryft` for use by [`uvtrans`].
    fn new(mb: &mut MapBeam) -> Gcf {
        // The convolution grid spans nmask + 0.5 target pixels; the -1
        // guards against float imprecision indexing one element past
        // the end.
        let tgtocg = (NGCF as f32 - 1.0) / (NMASK as f32 + 0.5);
        // HWHM of the gridding Gaussian in target-grid pixels.
        let hwhm = 0.7f32;
        let cghwhm = tgtocg * hwhm;
        let recvar = 2.0f32.ln() / cghwhm / cghwhm;

        let mut convfn = [0.0f32; NGCF];
        for (i, v) in convfn.iter_mut().enumerate() {
            *v = (-recvar * (i * i) as f32).exp();
        }

        let nx = mb.nx();
        let ny = mb.ny();
        costran(&convfn[..NGCF - 1], NMASK as f32 + 0.5, &mut mb.rxft[..nx]);
        costran(&convfn[..NGCF - 1], NMASK as f32 + 0.5, &mut mb.ryft[..ny]);

        // Normalized reciprocals, so that uvtrans can deconvolve the
        // kernel by multiplication.
        let peak = mb.rxft[nx / 2];
        for v in &mut mb.rxft[..nx] {
            *v = peak / *v;
        }
        let peak = mb.ryft[ny / 2];
        for v in &mut mb.ryft[..ny] {
            *v = peak / *v;
        }

        Gcf { convfn, tgtocg }
    }
}

/// The largest |U| and |V| (wavelengths) that can be gridded without
/// undersampling the image plane: Nyquist sampling leaves only half of
/// the grid on either side of the origin usable.
fn uv_limits(mb: &MapBeam) -> (f64, f64) {
    (
        mb.uinc() * (mb.nx() as f64 / 4.0 - NMASK as f64),
        mb.vinc() * (mb.ny() as f64 / 4.0 - NMASK as f64),
    )
}

/// Fourier invert the residuals between the established model (after
/// establishing any tentative model) and the observed visibilities into
/// a residual map, and/or invert the UV sampling into a dirty beam,
/// according to `mb.domap` and `mb.dobeam`.
pub fn uvinvert(
    obs: &mut Observation,
    mb: &mut MapBeam,
    pars: &InvertPars,
) -> Result<(), InvertError> {
    if !mb.dobeam && !mb.domap {
        return Err(InvertError::NothingToDo);
    }
    obs.check_ready(ObsState::Select, "uvinvert")?;

    obs.with_saved_if(|obs| {
        // Establish the tentative model if the map is to be computed.
        if mb.domap {
            obs.merge_model()?;
        }

        info!(
            "Inverting {}{}{}",
            if mb.domap { "map " } else { "" },
            if mb.domap && mb.dobeam { "and " } else { "" },
            if mb.dobeam { "beam " } else { "" }
        );

        // The map is dirty again.
        mb.ncmp = 0;

        // Bin visibilities from all IFs for uniform weighting. This
        // also checks the UV range of each IF against the grid size, so
        // it must always be called, even for natural weighting.
        uvbin(obs, mb, pars.binwid, pars.uvmin, pars.uvmax)?;

        // The gridding kernel and its reciprocal transforms.
        let gcf = Gcf::new(mb);

        if mb.domap {
            uvgrid(obs, mb, &gcf, pars, true)?;
            uvtrans(mb, true)?;
            mb.stats(obs);
            mb.domap = false;
        }
        if mb.dobeam {
            uvgrid(obs, mb, &gcf, pars, false)?;
            uvtrans(mb, false)?;
            mb.dobeam = false;
        }
        Ok(())
    })
}

/// Accumulate visibility counts binned in U and V for uniform
/// weighting, and check the UV range of every IF against the grid. When
/// `binwid` <= 0 only the zero-spacing bin is touched and the bin
/// conversion factors are zeroed, which is what natural weighting
/// requires of [`uvgrid`].
fn uvbin(
    obs: &mut Observation,
    mb: &mut MapBeam,
    binwid: f32,
    uvmin: f32,
    uvmax: f32,
) -> Result<(), InvertError> {
    if binwid < 0.0 || binwid >= mb.bin.nu as f32 || binwid >= mb.bin.nv as f32 {
        return Err(InvertError::BadBinWidth(binwid));
    }
    let dounif = binwid > 0.0;
    let binwid = if dounif && binwid < 1.0 {
        warn!("Uniform bin width adjusted to minimum of 1.0.");
        1.0
    } else {
        binwid
    };

    let (uvmin, uvmax) = order_uv_range(uvmin, uvmax);
    let docut = uvmax > 0.0;

    mb.bin.utopix = if dounif {
        1.0 / mb.uinc() / f64::from(binwid)
    } else {
        0.0
    };
    mb.bin.vtopix = if dounif {
        1.0 / mb.vinc() / f64::from(binwid)
    } else {
        0.0
    };

    let (ulimit, vlimit) = uv_limits(mb);

    let mut ngood = 0usize;
    let mut nused = 0usize;
    let mut nbadr = 0usize;
    let mut nbaduv = 0usize;
    let mut umax = 0.0f64;
    let mut vmax = 0.0f64;

    mb.bin.clear();

    let mut next = obs.next_if(0, true, true);
    while let Some(cif) = next {
        obs.get_if(cif)?;
        let uvscale = obs.ifs[cif].uvscale;
        for sub in &obs.sub {
            for integ in &sub.integ {
                for vis in &integ.vis {
                    if vis.flagged() {
                        continue;
                    }
                    let uu = f64::from(vis.u) * uvscale;
                    let vv = f64::from(vis.v) * uvscale;
                    let uvrad = (uu * uu + vv * vv).sqrt();
                    ngood += 1;
                    if docut && (uvrad < f64::from(uvmin) || uvrad > f64::from(uvmax)) {
                        nbadr += 1;
                    } else if uu.abs() > ulimit || vv.abs() > vlimit {
                        // The current cell size undersamples this
                        // visibility; record the worst overflow.
                        nbaduv += 1;
                        umax = umax.max(uu.abs());
                        vmax = vmax.max(vv.abs());
                    } else {
                        nused += 1;
                        if dounif {
                            mb.bin.bump(uu, vv);
                            // A visibility in the U=0 bin also has its
                            // conjugate mirror in the bin array.
                            if fnint((uu.abs() * mb.bin.utopix) as f32) == 0 {
                                mb.bin.bump(uu, -vv);
                            }
                        }
                    }
                }
            }
        }
        next = obs.next_if(cif + 1, true, true);
    }

    // A bin entry for the optional zero-spacing flux (and for natural
    // weighting).
    mb.bin.bump(0.0, 0.0);

    if ngood == 0 {
        return Err(InvertError::AllFlagged);
    }
    if nbadr > 0 {
        warn!(
            "Your chosen uvrange limits excluded {:.2}% of the data.",
            100.0 * nbadr as f64 / ngood as f64
        );
    }
    if nbaduv > 0 {
        warn!(
            "Your choice of large map pixels excluded {}{:.3}% of the data.",
            if nbadr > 0 { "a further " } else { "" },
            100.0 * nbaduv as f64 / ngood as f64
        );
        if umax > ulimit {
            warn!(
                " The x-axis pixel size should ideally be below {:.4} mas",
                ulimit / umax * mb.xinc() * RAD_TO_MAS
            );
        }
        if vmax > vlimit {
            warn!(
                " The y-axis pixel size should ideally be below {:.4} mas",
                vlimit / vmax * mb.yinc() * RAD_TO_MAS
            );
        }
    }
    if nused == 0 {
        return Err(InvertError::NoDataInRange);
    }
    Ok(())
}

/// Grid the UV data of all selected IFs onto the map or beam array as
/// one half of a conjugate-symmetric array of (nx/2+1) x ny complex
/// values, with U=0,V=0 at element (0,0). For the beam the datum is
/// (1,0); for the map it is the observed minus model visibility.
fn uvgrid(
    obs: &mut Observation,
    mb: &mut MapBeam,
    gcf: &Gcf,
    pars: &InvertPars,
    domap: bool,
) -> Result<(), InvertError> {
    let nx = mb.nx();
    let ny = mb.ny();
    let nugrid = nx / 2 + 1; // complex elements along U
    let nvgrid = ny; // complex elements along V
    let uinc = mb.uinc();
    let vinc = mb.vinc();

    // Beam-estimate running moments and noise sums. Running means are
    // essential because the numbers being added are very large.
    #[derive(Default)]
    struct BeamSums {
        wsum: f64,
        muu: f64,
        mvv: f64,
        muv: f64,
        nsum: f64,
    }
    let mut bm = BeamSums::default();

    {
        let uvmap = if domap { &mut mb.map } else { &mut mb.beam };
        uvmap.iter_mut().for_each(|v| *v = 0.0);
    }

    let (uvmin, uvmax) = order_uv_range(pars.uvmin, pars.uvmax);
    let docut = uvmax > 0.0;
    let (ulimit, vlimit) = uv_limits(mb);

    let dotaper = pars.gaurad > 0.0 && pars.gauval > 0.0 && pars.gauval < 1.0;
    // -ve reciprocal of the taper variance.
    let gfac = if dotaper {
        f64::from(pars.gauval).ln() / f64::from(pars.gaurad) / f64::from(pars.gaurad)
    } else {
        0.0
    };
    let dounif = pars.binwid > 0.0;
    let errpow = pars.errpow;

    let tgtocg = gcf.tgtocg;
    let convfn = &gcf.convfn;

    // Float offset of the complex element U=0, V=N/2, from which both
    // halves of the V axis are reachable by symmetric increments.
    let cntr = (nvgrid * nugrid) as i64;

    let mut wsum = 0.0f64;

    let mut next = obs.next_if(0, true, true);
    while let Some(cif) = next {
        obs.get_if(cif)?;
        let uvscale = obs.ifs[cif].uvscale;
        let uvmap = if domap { &mut mb.map } else { &mut mb.beam };
        for sub in &obs.sub {
            for integ in &sub.integ {
                for vis in &integ.vis {
                    let uu = f64::from(vis.u) * uvscale;
                    let vv = f64::from(vis.v) * uvscale;
                    let uvrad = (uu * uu + vv * vv).sqrt();
                    if vis.flagged()
                        || (docut && (uvrad < f64::from(uvmin) || uvrad > f64::from(uvmax)))
                        || uu.abs() > ulimit
                        || vv.abs() > vlimit
                    {
                        continue;
                    }

                    // Decimal and integral pixel positions.
                    let ufrc = (uu / uinc) as f32;
                    let vfrc = (vv / vinc) as f32;
                    let upix = fnint(ufrc);
                    let vpix = fnint(vfrc);

                    let mut weight = 1.0f64;
                    if dotaper {
                        weight *= (gfac * uvrad * uvrad).exp();
                    }
                    if pars.dorad {
                        weight *= uvrad;
                    }
                    if errpow < -0.001 {
                        let power = f64::from(-errpow) / 2.0;
                        let wt = f64::from(vis.wt.abs());
                        if power == 1.0 {
                            weight *= wt;
                        } else if power == 0.5 {
                            weight *= wt.sqrt();
                        } else {
                            weight *= wt.powf(power);
                        }
                    }
                    if dounif {
                        let count = mb.bin.count(uu, vv);
                        if count > 0 {
                            weight /= f64::from(count);
                        }
                    }

                    // Accumulate the moments used to estimate the clean
                    // beam and noise; beam gridding only.
                    if !domap {
                        bm.wsum += weight;
                        let runwt = weight / bm.wsum;
                        bm.muu += runwt * (uu * uu - bm.muu);
                        bm.mvv += runwt * (vv * vv - bm.mvv);
                        bm.muv += runwt * (uu * vv - bm.muv);
                        bm.nsum += weight * weight / f64::from(vis.wt);
                    }

                    let (uvrval, uvival) = if domap {
                        let diff = vis.obs_complex() - vis.mod_complex();
                        (diff.re as f32, diff.im as f32)
                    } else {
                        (1.0f32, 0.0f32)
                    };

                    // Convolve the (2 nmask + 1)^2 patch around the
                    // sample into the half-plane grid. Samples at u <= 0
                    // land on the conjugate-mirrored pixel with the
                    // imaginary part negated; samples straddling u = 0
                    // are stored on both sides.
                    for iv in vpix - NMASK..=vpix + NMASK {
                        let fv = weight as f32
                            * convfn[(tgtocg * (iv as f32 - vfrc).abs() + 0.5) as usize];
                        let vinc_f = nugrid as i64
                            * (2 * iv + if iv < 0 { nvgrid as i64 } else { -(nvgrid as i64) });
                        let normptr = cntr + vinc_f;
                        let conjptr = cntr + if iv != 0 { -vinc_f } else { vinc_f };
                        for iu in upix - NMASK..=upix + NMASK {
                            let fuv =
                                fv * convfn[(tgtocg * (iu as f32 - ufrc).abs() + 0.5) as usize];
                            wsum += f64::from(fuv);
                            let rval = uvrval * fuv;
                            let ival = uvival * fuv;
                            if iu <= 0 {
                                let rptr = (conjptr - 2 * iu) as usize;
                                uvmap[rptr] += rval;
                                uvmap[rptr + 1] -= ival;
                            }
                            if iu >= 0 {
                                let rptr = (normptr + 2 * iu) as usize;
                                uvmap[rptr] += rval;
                                uvmap[rptr + 1] += ival;
                            }
                        }
                    }
                }
            }
        }
        next = obs.next_if(cif + 1, true, true);
    }

    // Convolve in the zero-spacing flux, if given. It has zero weight
    // under radial weighting and is then ignored.
    if obs.uvzero.wt > 0.0 && !pars.dorad {
        let uvmap = if domap { &mut mb.map } else { &mut mb.beam };
        let mut weight = 1.0f64;
        let uvrval = if domap {
            obs.uvzero.amp - obs.uvzero.modamp
        } else {
            1.0
        };
        if errpow < -0.001 {
            weight *= f64::from(obs.uvzero.wt).powf(f64::from(-errpow) / 2.0);
        }
        if dounif {
            let count = mb.bin.count(0.0, 0.0);
            if count > 0 {
                weight /= f64::from(count);
            }
        }
        for iv in -NMASK..=NMASK {
            let fv = weight as f32 * convfn[(tgtocg * (iv as f32).abs() + 0.5) as usize];
            let vinc_f =
                nugrid as i64 * (2 * iv + if iv < 0 { nvgrid as i64 } else { -(nvgrid as i64) });
            let normptr = cntr + vinc_f;
            let conjptr = cntr + if iv != 0 { -vinc_f } else { vinc_f };
            for iu in -NMASK..=NMASK {
                let fuv = fv * convfn[(tgtocg * (iu as f32).abs() + 0.5) as usize];
                wsum += f64::from(fuv);
                let rval = uvrval * fuv;
                if iu <= 0 {
                    uvmap[(conjptr - 2 * iu) as usize] += rval;
                }
                if iu >= 0 {
                    uvmap[(normptr + 2 * iu) as usize] += rval;
                }
            }
        }
    }

    if wsum <= 0.0 || (!domap && bm.wsum <= 0.0) {
        warn!("uvgrid: No data in UV range.");
        return Err(InvertError::NoDataInRange);
    }

    // Divide the grid by the sum of weights, prescaled by 2 because
    // every sample appears twice in the full conjugate-symmetric UV
    // plane.
    let wnorm = (wsum * 2.0) as f32;
    {
        let uvmap = if domap { &mut mb.map } else { &mut mb.beam };
        uvmap.par_iter_mut().for_each(|v| *v /= wnorm);
    }

    // Estimate the elliptical clean beam from the weighted second
    // moments of the sampling. The second moment in the UV plane fixes
    // the curvature at the centre of the beam; an empirical fudge
    // factor extrapolates the HWHM extents from there.
    if !domap {
        let fudge = 0.7f64;
        let ftmp = ((bm.muu - bm.mvv) * (bm.muu - bm.mvv) + 4.0 * bm.muv * bm.muv).sqrt();
        mb.e_bpa = -0.5 * (2.0 * bm.muv).atan2(bm.muu - bm.mvv);
        mb.e_bmin = fudge / (2.0 * (bm.muu + bm.mvv) + 2.0 * ftmp).sqrt();
        mb.e_bmaj = fudge / (2.0 * (bm.muu + bm.mvv) - 2.0 * ftmp).sqrt();
        info!(
            "Estimated beam: bmin={:.4} mas, bmaj={:.4} mas, bpa={:.4} degrees",
            mb.e_bmin * RAD_TO_MAS,
            mb.e_bmaj * RAD_TO_MAS,
            mb.e_bpa * RAD_TO_DEG
        );

        mb.noise = (bm.nsum / bm.wsum / bm.wsum).sqrt() as f32;
        info!("Estimated noise={:.6} mJy/beam.", mb.noise * 1.0e3);
    }
    Ok(())
}

/// Phase shift and inverse transform the gridded UV data into a map or
/// beam centred on pixel (nx/2, ny/2), then multiply through by the
/// reciprocal transform of the gridding kernel to deconvolve it. The
/// resulting image occupies the first nx*ny floats of the grid.
pub fn uvtrans(mb: &mut MapBeam, domap: bool) -> Result<(), FftError> {
    let nx = mb.nx();
    let ny = mb.ny();
    let image = if domap { &mut mb.map } else { &mut mb.beam };

    cnj_shift(image, nx, ny);
    fft2d(image, nx / 2, ny, FftDirection::Inverse, true, false)?;

    // Remove the gridding convolution function.
    let rxft = &mb.rxft;
    let ryft = &mb.ryft;
    image[..nx * ny]
        .par_chunks_mut(nx)
        .zip(ryft[..ny].par_iter())
        .for_each(|(row, &ry)| {
            for (v, &rx) in row.iter_mut().zip(&rxft[..nx]) {
                *v *= rx * ry;
            }
        });
    Ok(())
}

/// The largest pixel sizes at which no visibility in the given UV
/// radius range would be excluded by the Nyquist limits of an `nx` by
/// `ny` grid. Returns (xmax, ymax) in radians.
pub fn optimal_pixel_size(
    obs: &mut Observation,
    uvmin: f32,
    uvmax: f32,
    nx: usize,
    ny: usize,
) -> Result<(f64, f64), InvertError> {
    obs.check_ready(ObsState::Select, "optimal_pixel_size")?;
    if nx < 1 || !crate::math::is_pow2(nx) {
        return Err(InvertError::Fft(FftError::NotPowerOfTwo(nx)));
    }
    if ny < 1 || !crate::math::is_pow2(ny) {
        return Err(InvertError::Fft(FftError::NotPowerOfTwo(ny)));
    }

    let (uvmin, uvmax) = order_uv_range(uvmin, uvmax);
    let docut = uvmax > 0.0;

    let mut umax = 0.0f64;
    let mut vmax = 0.0f64;
    obs.with_saved_if::<_, InvertError, _>(|obs| {
        let mut next = obs.next_if(0, true, true);
        while let Some(cif) = next {
            obs.get_if(cif)?;
            let uvscale = obs.ifs[cif].uvscale;
            for sub in &obs.sub {
                for integ in &sub.integ {
                    for vis in &integ.vis {
                        if vis.flagged() {
                            continue;
                        }
                        let uu = (f64::from(vis.u) * uvscale).abs();
                        let vv = (f64::from(vis.v) * uvscale).abs();
                        let uvrad = (uu * uu + vv * vv).sqrt();
                        if docut && (uvrad < f64::from(uvmin) || uvrad > f64::from(uvmax)) {
                            continue;
                        }
                        umax = umax.max(uu);
                        vmax = vmax.max(vv);
                    }
                }
            }
            next = obs.next_if(cif + 1, true, true);
        }
        Ok(())
    })?;

    if umax <= 0.0 || vmax <= 0.0 {
        return Err(InvertError::NoDataInRange);
    }
    Ok((
        (nx as f64 / 4.0 - NMASK as f64) / (umax * nx as f64),
        (ny as f64 / 4.0 - NMASK as f64) / (vmax * ny as f64),
    ))
}

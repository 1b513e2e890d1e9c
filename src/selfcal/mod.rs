// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Least-squares self-calibration.
//!
//! For each sub-array of each chosen IF, the solver minimises
//! `sum w_ij |g_i conj(g_j) - X_ij|^2` per solution interval, where
//! `X_ij` is the weighted mean model-normalised visibility of baseline
//! (i, j) over the interval (Cornwell & Fornalont, chapter 9 of
//! Synthesis Imaging in Radio Astronomy, 1989). The complex antenna
//! gains are assumed constant over an interval; the resulting
//! incremental corrections are optionally smoothed in time with a
//! Gaussian before being applied, to remove stair-step sampling
//! artefacts.

#[cfg(test)]
mod tests;

use itertools::Itertools;
use lazy_static::lazy_static;
use log::info;
use ndarray::Array2;
use thiserror::Error;

use crate::constants::UT_TO_MIN;
use crate::obs::{visflags, CorState, Moddif, ObsError, ObsState, Observation, Subarray};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelfCalError {
    #[error(transparent)]
    Obs(#[from] ObsError),
}

/// Self-calibration controls.
#[derive(Clone, Copy, Debug)]
pub struct SelfCalPars {
    /// The sub-array to correct, or None for all of them.
    pub isub: Option<usize>,
    /// Correct all selected IFs; otherwise only the current IF.
    pub doall: bool,
    /// The value of the weighting Gaussian at UV radius `gaurad`, in
    /// (0, 1); outside that range no taper is applied.
    pub gauval: f32,
    /// The UV radius at which the taper has value `gauval`
    /// \[wavelengths\]. <= 0 disables the taper.
    pub gaurad: f32,
    /// The solution interval \[minutes\]; <= 0 solves per integration.
    pub solint: f32,
    /// Solve for amplitude corrections.
    pub doamp: bool,
    /// Solve for phase corrections.
    pub dophs: bool,
    /// Disable the overall amplitude normalisation that stops the flux
    /// scale from wandering.
    pub dofloat: bool,
    /// The minimum number of telescopes in closed arrays required
    /// before attempting a solution.
    pub mintel: usize,
    /// Flag the corrections of un-correctable telescopes.
    pub doflag: bool,
    /// Ignore `solint` and find a single overall correction for the
    /// whole time range.
    pub doone: bool,
    /// When > 1, reject solutions with any amplitude correction outside
    /// [1/maxamp, maxamp].
    pub maxamp: f32,
    /// When > 0, reject solutions with any |phase correction| above
    /// this \[radians\].
    pub maxphs: f32,
    /// UV radius range of visibilities to use \[wavelengths\]; ignored
    /// unless the larger bound is positive.
    pub uvmin: f32,
    pub uvmax: f32,
}

impl Default for SelfCalPars {
    fn default() -> SelfCalPars {
        SelfCalPars {
            isub: None,
            doall: true,
            gauval: 0.0,
            gaurad: 0.0,
            solint: 0.0,
            doamp: false,
            dophs: true,
            dofloat: false,
            mintel: 3,
            doflag: false,
            doone: false,
            maxamp: 0.0,
            maxphs: 0.0,
            uvmin: 0.0,
            uvmax: 0.0,
        }
    }
}

/// What a self-calibration run did.
#[derive(Clone, Copy, Debug)]
pub struct SelfCalReport {
    /// Goodness of fit before the corrections.
    pub before: Moddif,
    /// Goodness of fit after the corrections.
    pub after: Moddif,
    /// True if any data were flagged.
    pub flagged: bool,
}

/// A weighted complex number in rectangular form.
#[derive(Clone, Copy, Debug, Default)]
struct ScVis {
    re: f32,
    im: f32,
    wt: f32,
}

/// The correction for a single telescope over one solution interval.
#[derive(Clone, Copy, Debug, Default)]
struct Cor {
    amp_cor: f32,
    phs_cor: f32,
    weight: f32,
}

/// All telescope corrections for one solution bin.
#[derive(Clone, Debug)]
struct Soln {
    /// Start UT of the bin \[seconds\].
    begut: f64,
    /// End UT of the bin \[seconds\].
    endut: f64,
    cors: Vec<Cor>,
}

/// Work buffers for one sub-array solve.
struct Scal {
    /// Weighted mean model-normalised visibilities per antenna pair.
    nvis: Array2<ScVis>,
    /// Complex reciprocal gain corrections.
    gain: Vec<ScVis>,
    /// Intermediary new gain estimates.
    gnew: Vec<ScVis>,
    /// Scratch corrections used while smoothing and normalising.
    cors: Vec<Cor>,
    /// One correction set per solution bin.
    solns: Vec<Soln>,
    /// Usable-baseline flags for one integration.
    usable: Vec<bool>,
    /// Per-telescope counts of usable baselines.
    telnum: Vec<usize>,
}

impl Scal {
    fn new(sub: &Subarray, utint: f64, doone: bool) -> Scal {
        let nstat = sub.nstat();
        let nbin = if utint > 0.0 && !doone {
            count_bins(sub, utint)
        } else {
            1
        };
        Scal {
            nvis: Array2::from_elem((nstat, nstat), ScVis::default()),
            gain: vec![ScVis::default(); nstat],
            gnew: vec![ScVis::default(); nstat],
            cors: vec![Cor::default(); nstat],
            solns: (0..nbin)
                .map(|_| Soln {
                    begut: 0.0,
                    endut: 0.0,
                    cors: vec![Cor::default(); nstat],
                })
                .collect(),
            usable: vec![false; sub.nbase()],
            telnum: vec![0; nstat],
        }
    }
}

struct SubResult {
    nbadtel: usize,
    flagged: bool,
}

/// Self-calibrate the observation against its model, after establishing
/// any tentative model. Corrections are solved per sub-array per IF and
/// applied multiplicatively to amplitudes and additively to phases.
pub fn slfcal(obs: &mut Observation, pars: &SelfCalPars) -> Result<SelfCalReport, SelfCalError> {
    obs.check_ready(
        if pars.doall {
            ObsState::Select
        } else {
            ObsState::GetIf
        },
        "slfcal",
    )?;
    if let Some(isub) = pars.isub {
        if isub >= obs.nsub() {
            return Err(SelfCalError::Obs(ObsError::BadSubarray(isub)));
        }
    }

    let mut flagged = false;
    let (before, after) = obs.with_saved_if::<_, SelfCalError, _>(|obs| {
        // Establish the tentative model.
        obs.merge_model()?;

        // The goodness of fit before any corrections.
        let before = obs.moddif(pars.uvmin, pars.uvmax)?;

        let (ifa, ifb) = if pars.doall {
            (0, obs.nif() - 1)
        } else {
            let cif = obs.current_if()?;
            (cif, cif)
        };
        let (isa, isb) = match pars.isub {
            Some(isub) => (isub, isub),
            None => (0, obs.nsub() - 1),
        };

        // Correct one IF at a time.
        let mut from = ifa;
        while let Some(cif) = obs.next_if(from, false, true).filter(|&c| c <= ifb) {
            if !obs.ifs[cif].sampled {
                info!("Not correcting unsampled IF {}.", cif + 1);
            } else {
                info!("Correcting IF {}.", cif + 1);
                obs.get_if(cif)?;
                // The per-baseline weight sums of this IF are about to
                // go stale.
                obs.flag_baseline_weights(cif);
                let uvscale = obs.ifs[cif].uvscale;
                for is in isa..=isb {
                    let result = slfsub(&mut obs.sub[is], is, cif, uvscale, pars);
                    flagged = flagged || result.flagged;
                    if result.nbadtel > 0 {
                        info!(
                            " A total of {} telescope corrections were {} in sub-array {}.",
                            result.nbadtel,
                            if pars.doflag { "flagged" } else { "ignored" },
                            is + 1
                        );
                    }
                }
                // Persist the corrected visibilities of this IF.
                obs.put_model()?;
            }
            from = cif + 1;
        }

        let after = obs.moddif(pars.uvmin, pars.uvmax)?;
        Ok((before, after))
    })?;

    info!(
        "Fit before self-cal, rms={:.6}Jy  sigma={:.6}",
        before.rms,
        (before.chisq / before.ndata.max(1) as f64).sqrt()
    );
    info!(
        "Fit after  self-cal, rms={:.6}Jy  sigma={:.6}",
        after.rms,
        (after.chisq / after.ndata.max(1) as f64).sqrt()
    );

    Ok(SelfCalReport {
        before,
        after,
        flagged,
    })
}

/// Self-calibrate one sub-array of the current IF.
fn slfsub(
    sub: &mut Subarray,
    isub: usize,
    cif: usize,
    uvscale: f64,
    pars: &SelfCalPars,
) -> SubResult {
    // Gradient-search controls.
    const NITER: usize = 100;
    const SLFGAIN: f32 = 0.5;
    const EPSILON: f32 = 1.0e-6;

    // The solution interval in seconds. Intervals of a second or less
    // collapse to per-integration solutions.
    let mut utint = f64::from(pars.solint) * 60.0;
    if utint <= 1.0 {
        utint = 0.0;
    }

    let mut scal = Scal::new(sub, utint, pars.doone);

    // The -ve reciprocal variance of the optional weighting taper, in
    // the units of the recorded UV coordinates.
    let mut gfac = 0.0f32;
    if pars.gaurad > 0.0 && pars.gauval > 0.0 && pars.gauval < 1.0 {
        let gaurad = f64::from(pars.gaurad) / uvscale;
        gfac = ((1.0 - f64::from(pars.gauval)).ln() / gaurad / gaurad) as f32;
    }

    let mut nbadtel = 0usize;
    let mut nbadsol = 0usize;

    // Solve for telescope gain errors over each solution interval.
    let mut uta = 0usize;
    let mut isol = 0usize;
    while uta < sub.ntime() {
        let utb = if pars.doone {
            sub.ntime() - 1
        } else {
            endbin(sub, uta, utint)
        };

        // Record the bin bounds about its midpoint; mind precision when
        // averaging large UT values.
        let utmid = sub.integ[uta].ut + (sub.integ[utb].ut - sub.integ[uta].ut) / 2.0;
        scal.solns[isol].begut = utmid - utint / 2.0;
        scal.solns[isol].endut = utmid + utint / 2.0;

        scal.nvis.fill(ScVis::default());

        // Accumulate the weighted observed/model ratios of the usable
        // integrations of the bin.
        let mut n_ut = 0usize;
        for ut in uta..=utb {
            if get_usable(
                sub,
                cif,
                ut,
                uvscale,
                pars,
                &mut scal.usable,
                &mut scal.telnum,
                &mut nbadtel,
            ) {
                n_ut += 1;
                sum_ratios(sub, ut, gfac, &scal.usable, &mut scal.nvis);
            }
        }

        if n_ut > 0 {
            // Weighted sums to weighted means.
            for cell in scal.nvis.iter_mut() {
                if cell.wt > 0.0 {
                    cell.re /= cell.wt;
                    cell.im /= cell.wt;
                }
            }

            // Unit gains give the starting residual.
            for g in &mut scal.gain {
                *g = ScVis {
                    re: 1.0,
                    im: 0.0,
                    wt: 0.0,
                };
            }
            let ini_res = slfdif(&scal.nvis, &scal.gain);

            // First estimate straight from the closed form, then
            // iterate with relaxation until the residual stalls.
            getgain(
                sub,
                &scal.nvis,
                &mut scal.gain,
                &mut scal.gnew,
                pars.doamp,
                pars.dophs,
                1.0,
            );
            let mut old_res = slfdif(&scal.nvis, &scal.gain);
            let mut new_res = old_res;
            for _ in 0..NITER {
                getgain(
                    sub,
                    &scal.nvis,
                    &mut scal.gain,
                    &mut scal.gnew,
                    pars.doamp,
                    pars.dophs,
                    SLFGAIN,
                );
                new_res = slfdif(&scal.nvis, &scal.gain);
                if (new_res - old_res).abs() <= EPSILON * ini_res {
                    break;
                }
                old_res = new_res;
            }

            // Translate gains to corrections, rejecting degraded fits
            // and out-of-bound corrections.
            let isbad = ini_res < new_res;
            if get_cors(sub, isbad, pars, &scal.gain, &mut scal.solns[isol].cors) {
                nbadsol += 1;
            } else if pars.doone || utint <= 0.0 {
                // No interpolation needed; apply directly to the bin.
                apply_cors(
                    sub,
                    cif,
                    uta,
                    utb,
                    pars.doamp,
                    pars.dophs,
                    &scal.solns[isol].cors,
                );
            }
        }

        uta = utb + 1;
        if utint > 0.0 {
            isol += 1;
        }
    }

    // Smooth and interpolate the binned solutions onto the observation
    // time grid.
    if utint > 0.0 && !pars.doone {
        apply_solns(
            sub,
            &mut scal,
            cif,
            f64::from(pars.solint),
            pars.doamp,
            pars.dophs,
        );
    }

    if nbadsol > 0 {
        info!(
            " {} solution interval{} rejected in sub-array {}.",
            nbadsol,
            if nbadsol == 1 { " was" } else { "s were" },
            isub + 1
        );
    }

    // Normalise the absolute gain corrections unless the flux scale is
    // allowed to float.
    if pars.doamp && !pars.dofloat {
        let factor = norm_cors(sub, cif, &mut scal.cors);
        info!(
            " Amplitude normalization factor in sub-array {}: {:.6}",
            isub + 1,
            factor
        );
    }

    if pars.doone {
        rep_cors(sub, isub, &scal.solns[0].cors, pars.doamp, pars.dophs);
    }

    SubResult {
        nbadtel,
        flagged: pars.doflag && nbadtel > 0,
    }
}

/// The residual of a self-cal fit: the weighted mean over antenna pairs
/// of |g_i conj(g_j) - X_ij|^2.
fn slfdif(nvis: &Array2<ScVis>, gain: &[ScVis]) -> f32 {
    let mut resid = 0.0f32;
    let mut wtsum = 0.0f32;
    for (ita, ga) in gain.iter().enumerate() {
        for (itb, gb) in gain.iter().enumerate() {
            let c = nvis[[ita, itb]];
            let re = ga.re * gb.re + ga.im * gb.im - c.re;
            let im = ga.im * gb.re - ga.re * gb.im - c.im;
            resid += c.wt * (re * re + im * im);
            wtsum += c.wt;
        }
    }
    if resid > 0.0 && wtsum > 0.0 {
        resid / wtsum
    } else {
        0.0
    }
}

/// One round of gain updates. With antenna a free and the others fixed,
/// the least-squares solution of
/// `sum_b w_ab |X_ab - g_a conj(g_b)|^2` is
/// `g_a = sum_b(w_ab g_b X_ab) / sum_b(w_ab |g_b|^2)`; the new estimate
/// is a `slfgain`-weighted blend of that and the previous value.
fn getgain(
    sub: &Subarray,
    nvis: &Array2<ScVis>,
    gain: &mut [ScVis],
    gnew: &mut [ScVis],
    doamp: bool,
    dophs: bool,
    slfgain: f32,
) {
    let nstat = sub.nstat();
    for ita in 0..nstat {
        let ga = gain[ita];
        let mut top = ScVis::default();
        let mut bot = 0.0f32;
        let mut wt_sum = 0.0f32;
        for itb in 0..nstat {
            let gb = gain[itb];
            let c = nvis[[ita, itb]];
            if c.wt > 0.0 {
                top.re += c.wt * (gb.re * c.re - gb.im * c.im);
                top.im += c.wt * (gb.re * c.im + gb.im * c.re);
                bot += c.wt * (gb.re * gb.re + gb.im * gb.im);
                wt_sum += c.wt;
            }
        }
        let gn = &mut gnew[ita];
        if bot > 0.0 {
            gn.re = (1.0 - slfgain) * ga.re + slfgain * top.re / bot;
            gn.im = (1.0 - slfgain) * ga.im + slfgain * top.im / bot;
            gn.wt = wt_sum;
        }
        // Keep the previous best estimate where no solution exists.
        if bot <= 0.0 || (gn.re == 0.0 && gn.im == 0.0) {
            *gn = ga;
        }
    }

    // Install the new estimates, removing amplitude and/or phase
    // corrections that were not asked for.
    for ((gn, gb), tel) in gnew.iter_mut().zip(gain.iter_mut()).zip(&sub.tel) {
        if gn.wt > 0.0 {
            let amp = (gn.re * gn.re + gn.im * gn.im).sqrt();
            if tel.antfix {
                gn.re = 1.0;
                gn.im = 0.0;
            } else if !dophs {
                gn.re = amp;
                gn.im = 0.0;
            } else if !doamp {
                gn.re /= amp;
                gn.im /= amp;
            }
        }
        *gb = *gn;
    }
}

/// The index of the last integration inside the solution bin that
/// starts at integration `uta`. Bin boundaries lie on multiples of
/// `utint`.
fn endbin(sub: &Subarray, uta: usize, utint: f64) -> usize {
    if utint > 0.0 {
        let begut = utint * (sub.integ[uta].ut / utint).floor();
        let endut = begut + utint;
        let mut utb = uta;
        while utb < sub.ntime() && sub.integ[utb].ut <= endut {
            utb += 1;
        }
        utb - 1
    } else {
        uta
    }
}

/// The number of solution bins the sub-array's sampling produces.
fn count_bins(sub: &Subarray, utint: f64) -> usize {
    let mut nbin = 0;
    let mut uta = 0;
    while uta < sub.ntime() {
        uta = endbin(sub, uta, utint) + 1;
        nbin += 1;
    }
    nbin
}

/// Mark which visibilities of an integration are usable for self-cal:
/// the UV range and existing flags are applied first, then baselines of
/// antennas left on only one baseline are iteratively removed so that
/// only closed sub-arrays remain. When fewer than `mintel` telescopes
/// survive, the whole integration is unusable. Dropped telescopes are
/// counted and optionally have their corrections flagged.
#[allow(clippy::too_many_arguments)]
fn get_usable(
    sub: &mut Subarray,
    cif: usize,
    ut: usize,
    uvscale: f64,
    pars: &SelfCalPars,
    usable: &mut [bool],
    telnum: &mut [usize],
    nbadtel: &mut usize,
) -> bool {
    visflags(sub, ut, uvscale, pars.uvmin, pars.uvmax, usable);

    // Closure pruning is pointless below 3 antennas.
    let ntel = count_tel(sub, pars.mintel > 2, usable, telnum);

    if ntel < pars.mintel {
        usable.iter_mut().for_each(|u| *u = false);
        telnum.iter_mut().for_each(|n| *n = 0);
    }

    // Count and optionally flag dropped telescope corrections, except
    // where corrections are pinned anyway.
    for itel in 0..sub.nstat() {
        if telnum[itel] == 0 && !sub.tel[itel].antfix {
            let already_bad = sub.integ[ut].icor[cif][itel].bad;
            if pars.doflag && !already_bad {
                *nbadtel += 1;
                sub.edit_antenna_cor(cif, ut, itel, true);
            }
        }
    }

    ntel >= pars.mintel
}

/// Count how many baselines each telescope retains in `usable`, and
/// with `doclose` iteratively drop baselines of telescopes that are
/// down to a single baseline (such telescopes cannot be separated from
/// their partner). Returns the number of telescopes still solvable.
fn count_tel(sub: &Subarray, doclose: bool, usable: &mut [bool], telnum: &mut [usize]) -> usize {
    telnum.iter_mut().for_each(|n| *n = 0);
    for (b, base) in sub.base.iter().enumerate() {
        if usable[b] {
            telnum[base.tel_a] += 1;
            telnum[base.tel_b] += 1;
        }
    }

    if doclose {
        for itel in 0..sub.nstat() {
            let mut newtel = itel;
            while telnum[newtel] == 1 {
                // Remove the lone baseline and check whether that has
                // made the telescope at its other end insoluble.
                for (b, base) in sub.base.iter().enumerate() {
                    if usable[b] && (base.tel_a == newtel || base.tel_b == newtel) {
                        usable[b] = false;
                        telnum[base.tel_a] -= 1;
                        telnum[base.tel_b] -= 1;
                        newtel = if base.tel_a == newtel {
                            base.tel_b
                        } else {
                            base.tel_a
                        };
                        break;
                    }
                }
            }
        }
    }

    telnum.iter().filter(|&&n| n > 0).count()
}

/// Accumulate the weighted complex ratios of observed/model
/// visibilities of one integration into the antenna-pair matrix. The
/// weight is `wt |Vmod|^2`, times the optional taper, times the
/// product of the antenna weights; the conjugate lands in the mirrored
/// cell.
fn sum_ratios(sub: &Subarray, ut: usize, gaufac: f32, usable: &[bool], nvis: &mut Array2<ScVis>) {
    let integ = &sub.integ[ut];
    for (b, base) in sub.base.iter().enumerate() {
        let vis = &integ.vis[b];
        if !usable[b] || vis.modamp == 0.0 {
            continue;
        }
        let ita = base.tel_a;
        let itb = base.tel_b;

        // Weight = |Vmod|^2 / Variance(Vobs): the variance of the ratio
        // Vobs/Vmod is Variance(Vobs)/|Vmod|^2, and vis.wt is
        // 1/Variance(Vobs).
        let mut wt = vis.wt * vis.modamp * vis.modamp;
        if gaufac < 0.0 {
            let uu = vis.u;
            let vv = vis.v;
            wt *= 1.0 - (gaufac * (uu * uu + vv * vv)).exp();
        }
        wt *= (sub.tel[ita].antwt * sub.tel[itb].antwt).abs();

        let amp = wt * vis.amp / vis.modamp;
        let phs = vis.phs - vis.modphs;
        let re = amp * phs.cos();
        let im = amp * phs.sin();

        let c = &mut nvis[[ita, itb]];
        c.re += re;
        c.im += im;
        c.wt += wt;
        let c = &mut nvis[[itb, ita]];
        c.re += re;
        c.im -= im;
        c.wt += wt;
    }
}

/// Convert the complex reciprocal gains to amplitude and phase
/// corrections and check them against the user limits. Unusable
/// solutions become zero-weight unit corrections, and true is returned.
fn get_cors(
    sub: &Subarray,
    isbad: bool,
    pars: &SelfCalPars,
    gain: &[ScVis],
    cors: &mut [Cor],
) -> bool {
    let doplim = pars.dophs && pars.maxphs > 0.0;
    let doalim = pars.doamp && pars.maxamp > 1.0;
    let minamp = if doalim && pars.maxamp != 0.0 {
        1.0 / pars.maxamp
    } else {
        0.0
    };

    let mut isbad = isbad;
    for (g, c) in gain.iter().zip(cors.iter_mut()).take(sub.nstat()) {
        if isbad {
            break;
        }
        if g.re == 0.0 && g.im == 0.0 {
            *c = Cor {
                amp_cor: 1.0,
                phs_cor: 0.0,
                weight: 0.0,
            };
        } else {
            c.amp_cor = 1.0 / (g.re * g.re + g.im * g.im).sqrt();
            c.phs_cor = -g.im.atan2(g.re);
            c.weight = g.wt;
            if (doplim && (c.phs_cor > pars.maxphs || c.phs_cor < -pars.maxphs))
                || (doalim && (c.amp_cor > pars.maxamp || c.amp_cor < minamp))
            {
                isbad = true;
            }
        }
    }

    if isbad {
        for c in cors.iter_mut() {
            *c = Cor {
                amp_cor: 1.0,
                phs_cor: 0.0,
                weight: 0.0,
            };
        }
    }
    isbad
}

/// Apply a set of telescope corrections to the visibilities of
/// integrations `uta..=utb` and fold them into the accumulated
/// correction records of IF `cif`. A first non-zero-weight application
/// promotes a record from Uncalibrated to Calibrated.
fn apply_cors(
    sub: &mut Subarray,
    cif: usize,
    uta: usize,
    utb: usize,
    doamp: bool,
    dophs: bool,
    cors: &[Cor],
) {
    for ut in uta..=utb {
        for b in 0..sub.base.len() {
            let ita = sub.base[b].tel_a;
            let itb = sub.base[b].tel_b;
            let vis = &mut sub.integ[ut].vis[b];
            if doamp {
                let f = cors[ita].amp_cor * cors[itb].amp_cor;
                vis.amp *= f;
                // wt = 1/amp_err^2.
                vis.wt /= f * f;
            }
            if dophs {
                vis.phs += cors[ita].phs_cor - cors[itb].phs_cor;
            }
        }

        for (ocor, icor) in sub.integ[ut].icor[cif].iter_mut().zip(cors) {
            if dophs {
                ocor.phs_cor += icor.phs_cor;
            }
            if doamp {
                ocor.amp_cor *= icor.amp_cor;
            }
            if (doamp || dophs) && icor.weight > 0.0 && ocor.state == CorState::Uncalibrated {
                ocor.state = CorState::Calibrated;
            }
        }
    }
}

/// Smoothing-table geometry: a coarse tabulation of the error function
/// over 2.5 standard deviations.
const ERFSIZ: usize = 16;
const S2: f64 = 1.4142136;
const SMOOTH_NSIGMA: f64 = 2.5;
const ERFCONV: f64 = (ERFSIZ as f64 - 1.0) * S2 / SMOOTH_NSIGMA;

lazy_static! {
    /// erf/2 from a rational approximation, one extra entry to simplify
    /// interpolation.
    static ref ERFTAB: [f64; ERFSIZ + 1] = {
        let mut tab = [0.0f64; ERFSIZ + 1];
        for (i, slot) in tab.iter_mut().enumerate() {
            let z = i as f64 / ERFCONV;
            let t = 1.0 / (1.0 + 0.47047 * z);
            *slot = 0.5
                - (0.1740121 * t * (1.0 + -0.2754975 * t * (1.0 + -7.7999287 * t)))
                    * (-z * z).exp();
        }
        tab
    };
}

/// The approximate area under a unit-area Gaussian of standard
/// deviation `sigma` between `xa` and `xb`, by linear interpolation of
/// the tabulated error function.
fn get_area(xa: f64, xb: f64, sigma: f64) -> f64 {
    fn half_area(z: f64) -> (f64, f64) {
        let sgn = if z < 0.0 { -1.0 } else { 1.0 };
        let pos = ERFCONV * sgn * z;
        let ind = pos as usize;
        let area = if ind < ERFSIZ {
            ERFTAB[ind] + (pos - ind as f64) * (ERFTAB[ind + 1] - ERFTAB[ind])
        } else {
            ERFTAB[ERFSIZ]
        };
        (sgn, area)
    }

    let (asgn, a_area) = half_area(xa / (S2 * sigma));
    let (bsgn, b_area) = half_area(xb / (S2 * sigma));
    (asgn * a_area - bsgn * b_area).abs()
}

/// Smooth and interpolate the binned solutions onto the observation
/// time grid and apply them. Each integration receives the weighted
/// mean of the corrections of nearby bins, weighted by the correction
/// weights and by the integral across each bin of a Gaussian centred
/// on the integration.
fn apply_solns(
    sub: &mut Subarray,
    scal: &mut Scal,
    cif: usize,
    solint: f64,
    doamp: bool,
    dophs: bool,
) {
    // The standard deviation that makes the Fourier transform of the
    // smoothing Gaussian have a half-width at half power of 1/(2 utint)
    // (Nyquist sampling): 2 utint sqrt(ln(sqrt 2))/pi minutes.
    let sigma = solint * 0.37478125;
    let maxoff = SMOOTH_NSIGMA * sigma;

    let mut sa = 0usize;
    for ut in 0..sub.ntime() {
        let utval = sub.integ[ut].ut;

        for ocor in &mut scal.cors {
            *ocor = Cor {
                amp_cor: 0.0,
                phs_cor: 0.0,
                weight: 0.0,
            };
        }

        // Skip bins that ended too long before this integration.
        while sa < scal.solns.len() && (utval - scal.solns[sa].endut) * UT_TO_MIN >= maxoff {
            sa += 1;
        }

        // Sum the weighted corrections of every bin within reach.
        let mut sb = sa;
        while sb < scal.solns.len() && (scal.solns[sb].begut - utval) * UT_TO_MIN < maxoff {
            let soln = &scal.solns[sb];
            let b_start = (UT_TO_MIN * (soln.begut - utval)).max(-maxoff);
            let b_end = (UT_TO_MIN * (soln.endut - utval)).min(maxoff);
            let area = get_area(b_start, b_end, sigma) as f32;
            for (ocor, icor) in scal.cors.iter_mut().zip(&soln.cors) {
                if icor.weight > 0.0 {
                    let wt = area * icor.weight;
                    ocor.amp_cor += wt * icor.amp_cor;
                    ocor.phs_cor += wt * icor.phs_cor;
                    ocor.weight += wt;
                }
            }
            sb += 1;
        }

        // Weighted sums to weighted means; unconstrained telescopes get
        // unit corrections.
        for ocor in &mut scal.cors {
            if ocor.weight > 0.0 {
                ocor.amp_cor /= ocor.weight;
                ocor.phs_cor /= ocor.weight;
            } else {
                ocor.amp_cor = 1.0;
                ocor.phs_cor = 0.0;
            }
        }

        apply_cors(sub, cif, ut, ut, doamp, dophs, &scal.cors);
    }
}

/// Normalise the accumulated amplitude corrections of non-fixed
/// antennas so that their mean is one, stopping the flux scale from
/// wandering over repeated CLEAN/self-cal iterations. Returns the
/// factor applied.
fn norm_cors(sub: &mut Subarray, cif: usize, cors: &mut [Cor]) -> f32 {
    let mut amp_sum = 0.0f64;
    let mut namp = 0usize;
    for integ in &sub.integ {
        for (itel, ocor) in integ.icor[cif].iter().enumerate() {
            if ocor.state == CorState::Calibrated && !sub.tel[itel].antfix {
                amp_sum += f64::from(ocor.amp_cor);
                namp += 1;
            }
        }
    }
    if namp < 1 {
        return 1.0;
    }
    let amp_cor = (namp as f64 / amp_sum) as f32;

    // Apply the factor everywhere, without marking uncorrected records
    // as corrected and without touching fixed antennas.
    for ut in 0..sub.ntime() {
        for itel in 0..sub.nstat() {
            cors[itel].amp_cor = if sub.tel[itel].antfix { 1.0 } else { amp_cor };
            cors[itel].weight =
                if sub.integ[ut].icor[cif][itel].state == CorState::Calibrated {
                    1.0
                } else {
                    0.0
                };
        }
        apply_cors(sub, cif, ut, ut, true, false, cors);
    }
    amp_cor
}

/// List the per-telescope corrections of a sub-array. Corrections that
/// never received weight are marked with an asterisk.
fn rep_cors(sub: &Subarray, isub: usize, cors: &[Cor], doamp: bool, dophs: bool) {
    use std::fmt::Write;

    if !(doamp || dophs) {
        return;
    }
    info!(
        " Telescope {}{} corrections in sub-array {}:",
        if doamp { "amplitude" } else { "phase" },
        if doamp && dophs { " and phase" } else { "" },
        isub + 1
    );
    let per_line = if doamp && dophs { 3 } else { 4 };
    for chunk in &cors.iter().zip(&sub.tel).chunks(per_line) {
        let mut line = String::from("  ");
        for (cor, tel) in chunk {
            let _ = write!(line, "{:<8}", tel.name);
            if doamp {
                let _ = write!(line, " {:5.2}", cor.amp_cor);
            }
            if dophs {
                let _ = write!(
                    line,
                    "{}{:5.2}",
                    if doamp { ',' } else { ' ' },
                    cor.phs_cor
                );
            }
            let _ = write!(line, "{}    ", if cor.weight > 0.0 { ' ' } else { '*' });
        }
        info!("{line}");
    }
}

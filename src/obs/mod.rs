// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The observation collaborator consumed by the imaging core.
//!
//! The core does not read or write files; it sees an [`Observation`]
//! holding sub-arrays of integrations of visibilities, one intermediate
//! frequency (IF) band of which is resident at a time. Visibility blocks
//! are paged through the [`IfStore`] seam; [`MemoryStore`] is the
//! in-memory implementation used by the tests and by callers that keep
//! whole observations resident.

use log::debug;
use num_complex::Complex;
use thiserror::Error;

use crate::constants::TAU;
use crate::model::{CmpType, Model};

/// Visibility flag bit: deleted by an editor.
pub const FLAG_DEL: u8 = 0x01;
/// Visibility flag bit: a flagged correction applies to the baseline.
pub const FLAG_BADCOR: u8 = 0x02;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObsError {
    #[error("{op}: the observation is not in the {need:?} state")]
    NotReady { op: &'static str, need: ObsState },

    #[error("IF index {0} is out of range")]
    BadIf(usize),

    #[error("sub-array index {0} is out of range")]
    BadSubarray(usize),

    #[error("no IF is currently resident")]
    NoCurrentIf,

    #[error("visibility block for IF {0} has the wrong shape")]
    BadShape(usize),
}

/// The readiness ladder of an observation. Operations guard on the
/// minimum state they require.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObsState {
    /// The observation has been indexed.
    Index,
    /// Raw IF data are available.
    RawIf,
    /// An IF can be paged in.
    GetIf,
    /// A stream selection has been made; all core operations are legal.
    Select,
}

/// A single complex visibility measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Visibility {
    /// Projected baseline coordinates \[light-seconds\]. Multiply by the
    /// IF's `uvscale` for wavelengths.
    pub u: f32,
    pub v: f32,
    pub w: f32,
    /// Observed amplitude and phase.
    pub amp: f32,
    pub phs: f32,
    /// Model amplitude and phase.
    pub modamp: f32,
    pub modphs: f32,
    /// Statistical weight, 1/variance of the real or imaginary part.
    pub wt: f32,
    /// Flag bitmask; non-zero excludes the visibility everywhere.
    pub bad: u8,
    /// Integration time \[seconds\].
    pub dt: f32,
}

impl Visibility {
    pub fn flagged(&self) -> bool {
        self.bad != 0
    }

    /// The observed value as a complex number.
    pub fn obs_complex(&self) -> Complex<f64> {
        Complex::from_polar(f64::from(self.amp), f64::from(self.phs))
    }

    /// The model value as a complex number.
    pub fn mod_complex(&self) -> Complex<f64> {
        Complex::from_polar(f64::from(self.modamp), f64::from(self.modphs))
    }
}

/// An ordered antenna pair. `wsum` caches the sum of the weights of the
/// baseline's visibilities in the current IF; see
/// [`Observation::update_baseline_weights`].
#[derive(Clone, Debug)]
pub struct Baseline {
    pub tel_a: usize,
    pub tel_b: usize,
    pub wsum: f32,
}

/// A station (telescope/antenna) of a sub-array.
#[derive(Clone, Debug)]
pub struct Station {
    pub name: String,
    /// Extra self-cal weighting for this antenna.
    pub antwt: f32,
    /// If set, self-cal holds this antenna's gain fixed at 1+0i.
    pub antfix: bool,
}

/// Calibration state of a per-antenna correction record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CorState {
    /// No correction has ever been applied.
    #[default]
    Uncalibrated,
    /// At least one non-zero-weight correction has been applied.
    Calibrated,
}

/// The accumulated correction for one antenna at one integration of one
/// IF.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Telcor {
    pub amp_cor: f32,
    pub phs_cor: f32,
    /// Orthogonal to the calibration state: set when the correction has
    /// been flagged as unusable.
    pub bad: bool,
    pub state: CorState,
}

impl Default for Telcor {
    fn default() -> Telcor {
        Telcor {
            amp_cor: 1.0,
            phs_cor: 0.0,
            bad: false,
            state: CorState::Uncalibrated,
        }
    }
}

/// One integration (time stamp) of a sub-array.
#[derive(Clone, Debug)]
pub struct Integration {
    /// The time of the integration \[UT seconds\].
    pub ut: f64,
    /// One visibility per baseline of the current IF.
    pub vis: Vec<Visibility>,
    /// Accumulated corrections, indexed \[cif\]\[itel\].
    pub icor: Vec<Vec<Telcor>>,
}

/// A partition of antennas that observed simultaneously.
#[derive(Clone, Debug)]
pub struct Subarray {
    pub tel: Vec<Station>,
    pub base: Vec<Baseline>,
    pub integ: Vec<Integration>,
}

impl Subarray {
    /// Build a sub-array with every antenna pair as a baseline, default
    /// visibilities, and unit corrections for `nif` IFs.
    pub fn with_full_baselines(names: &[&str], uts: &[f64], nif: usize) -> Subarray {
        let tel: Vec<Station> = names
            .iter()
            .map(|&name| Station {
                name: name.to_string(),
                antwt: 1.0,
                antfix: false,
            })
            .collect();
        let mut base = vec![];
        for a in 0..tel.len() {
            for b in a + 1..tel.len() {
                base.push(Baseline {
                    tel_a: a,
                    tel_b: b,
                    wsum: 0.0,
                });
            }
        }
        let integ = uts
            .iter()
            .map(|&ut| Integration {
                ut,
                vis: vec![Visibility::default(); base.len()],
                icor: vec![vec![Telcor::default(); tel.len()]; nif],
            })
            .collect();
        Subarray { tel, base, integ }
    }

    pub fn nstat(&self) -> usize {
        self.tel.len()
    }

    pub fn nbase(&self) -> usize {
        self.base.len()
    }

    pub fn ntime(&self) -> usize {
        self.integ.len()
    }

    /// Mark the correction of antenna `itel` at integration `ut` of IF
    /// `cif` as flagged (or unflagged), and propagate the
    /// bad-correction flag bit onto the visibilities of the baselines
    /// that use the antenna.
    pub fn edit_antenna_cor(&mut self, cif: usize, ut: usize, itel: usize, flag: bool) {
        let integ = &mut self.integ[ut];
        integ.icor[cif][itel].bad = flag;
        for (b, base) in self.base.iter().enumerate() {
            if base.tel_a == itel || base.tel_b == itel {
                let any_bad = integ.icor[cif][base.tel_a].bad || integ.icor[cif][base.tel_b].bad;
                if any_bad {
                    integ.vis[b].bad |= FLAG_BADCOR;
                } else {
                    integ.vis[b].bad &= !FLAG_BADCOR;
                }
            }
        }
    }
}

/// One intermediate-frequency band.
#[derive(Clone, Debug)]
pub struct IfBand {
    /// Centre frequency \[Hz\].
    pub freq: f64,
    /// Multiplies recorded (u,v,w) light-second distances into
    /// wavelengths at this IF's frequency.
    pub uvscale: f64,
    /// The IF holds data.
    pub sampled: bool,
    /// The IF is part of the current stream selection.
    pub selected: bool,
}

/// The optional zero-spacing (total) flux measurement.
#[derive(Clone, Copy, Debug, Default)]
pub struct UvZero {
    pub amp: f32,
    pub modamp: f32,
    /// Zero or negative disables the zero-spacing flux.
    pub wt: f32,
}

/// The phase-centre coordinates of the observed source.
#[derive(Clone, Copy, Debug, Default)]
pub struct Source {
    pub ra: f64,
    pub dec: f64,
}

/// Weighted goodness of fit between observed and model visibilities.
#[derive(Clone, Copy, Debug, Default)]
pub struct Moddif {
    /// sqrt of the mean squared observed-model difference \[Jy\].
    pub rms: f64,
    /// Sum of weight times squared difference.
    pub chisq: f64,
    /// The number of complex visibilities used.
    pub ndata: usize,
}

/// The paging seam for per-IF visibility blocks. Implementations hold
/// one flattened block per IF, in sub-array-major, integration-major,
/// baseline-minor order.
pub trait IfStore {
    /// Fill the working visibilities of `sub` from IF `cif`.
    fn load(&mut self, cif: usize, sub: &mut [Subarray]) -> Result<(), ObsError>;

    /// Write the working visibilities of `sub` (data and model) back to
    /// IF `cif`.
    fn save(&mut self, cif: usize, sub: &[Subarray]) -> Result<(), ObsError>;
}

/// An [`IfStore`] that keeps every IF's visibilities in memory.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    per_if: Vec<Vec<Visibility>>,
}

impl MemoryStore {
    /// Snapshot the current working visibilities of `sub` as the
    /// initial content of all `nif` IFs.
    pub fn snapshot(sub: &[Subarray], nif: usize) -> MemoryStore {
        let block: Vec<Visibility> = sub
            .iter()
            .flat_map(|s| s.integ.iter().flat_map(|i| i.vis.iter().copied()))
            .collect();
        MemoryStore {
            per_if: vec![block; nif],
        }
    }
}

impl IfStore for MemoryStore {
    fn load(&mut self, cif: usize, sub: &mut [Subarray]) -> Result<(), ObsError> {
        let block = self.per_if.get(cif).ok_or(ObsError::BadIf(cif))?;
        let mut off = 0;
        for s in sub.iter_mut() {
            for integ in &mut s.integ {
                let n = integ.vis.len();
                if off + n > block.len() {
                    return Err(ObsError::BadShape(cif));
                }
                integ.vis.copy_from_slice(&block[off..off + n]);
                off += n;
            }
        }
        if off != block.len() {
            return Err(ObsError::BadShape(cif));
        }
        Ok(())
    }

    fn save(&mut self, cif: usize, sub: &[Subarray]) -> Result<(), ObsError> {
        let block = self.per_if.get_mut(cif).ok_or(ObsError::BadIf(cif))?;
        let mut off = 0;
        for s in sub {
            for integ in &s.integ {
                let n = integ.vis.len();
                if off + n > block.len() {
                    return Err(ObsError::BadShape(cif));
                }
                block[off..off + n].copy_from_slice(&integ.vis);
                off += n;
            }
        }
        if off != block.len() {
            return Err(ObsError::BadShape(cif));
        }
        Ok(())
    }
}

/// An observation: sub-arrays, IFs, the established and tentative
/// models, and the paging store for per-IF visibilities.
pub struct Observation {
    pub sub: Vec<Subarray>,
    pub ifs: Vec<IfBand>,
    /// The established model, already reflected in the model
    /// visibilities.
    pub model: Model,
    /// The tentative model, awaiting [`Observation::merge_model`].
    pub newmod: Model,
    pub uvzero: UvZero,
    pub source: Source,
    /// Accumulated eastward shift of the phase centre \[radians\].
    pub east: f64,
    /// Accumulated northward shift of the phase centre \[radians\].
    pub north: f64,
    state: ObsState,
    cur_if: Option<usize>,
    store: Box<dyn IfStore>,
    /// The IF for which the per-baseline `wsum` caches are valid.
    bwt_cif: Option<usize>,
}

impl Observation {
    /// Build an observation over `sub` and `ifs`, paging visibilities
    /// through `store`. The observation starts in the `Select` state
    /// with no IF resident.
    pub fn new(
        sub: Vec<Subarray>,
        ifs: Vec<IfBand>,
        store: Box<dyn IfStore>,
        source: Source,
    ) -> Observation {
        Observation {
            sub,
            ifs,
            model: Model::new(),
            newmod: Model::new(),
            uvzero: UvZero::default(),
            source,
            east: 0.0,
            north: 0.0,
            state: ObsState::Select,
            cur_if: None,
            store,
            bwt_cif: None,
        }
    }

    pub fn nif(&self) -> usize {
        self.ifs.len()
    }

    pub fn nsub(&self) -> usize {
        self.sub.len()
    }

    /// Is the observation in at least the given state? The `GetIf`
    /// state additionally requires a resident IF.
    pub fn ready(&self, need: ObsState) -> bool {
        match need {
            ObsState::GetIf => self.state >= ObsState::GetIf && self.cur_if.is_some(),
            _ => self.state >= need,
        }
    }

    pub(crate) fn check_ready(&self, need: ObsState, op: &'static str) -> Result<(), ObsError> {
        if self.ready(need) {
            Ok(())
        } else {
            Err(ObsError::NotReady { op, need })
        }
    }

    /// The index of the next IF at or after `from` that satisfies the
    /// sampling/selection requirements, or None at end of IFs.
    pub fn next_if(&self, from: usize, need_sampled: bool, need_selected: bool) -> Option<usize> {
        (from..self.ifs.len()).find(|&i| {
            (!need_sampled || self.ifs[i].sampled) && (!need_selected || self.ifs[i].selected)
        })
    }

    /// Page IF `cif` into the working visibilities, writing the
    /// previously resident IF back first.
    pub fn get_if(&mut self, cif: usize) -> Result<(), ObsError> {
        if cif >= self.ifs.len() {
            return Err(ObsError::BadIf(cif));
        }
        if self.cur_if == Some(cif) {
            return Ok(());
        }
        if let Some(old) = self.cur_if {
            self.store.save(old, &self.sub)?;
        }
        debug!("Paging in IF {cif}");
        self.store.load(cif, &mut self.sub)?;
        self.cur_if = Some(cif);
        Ok(())
    }

    /// Persist the resident IF's visibilities (data and model) to the
    /// store.
    pub fn put_model(&mut self) -> Result<(), ObsError> {
        let cif = self.cur_if.ok_or(ObsError::NoCurrentIf)?;
        self.store.save(cif, &self.sub)
    }

    /// The index of the resident IF.
    pub fn current_if(&self) -> Result<usize, ObsError> {
        self.cur_if.ok_or(ObsError::NoCurrentIf)
    }

    /// The wavelength scale factor of the resident IF.
    pub fn uvscale(&self) -> Result<f64, ObsError> {
        Ok(self.ifs[self.current_if()?].uvscale)
    }

    /// Save-state of the current IF, for restoration via
    /// [`Observation::set_cif_state`].
    pub fn cif_state(&self) -> Option<usize> {
        self.cur_if
    }

    /// Restore a current-IF save-state.
    pub fn set_cif_state(&mut self, state: Option<usize>) -> Result<(), ObsError> {
        match state {
            Some(cif) => self.get_if(cif),
            None => Ok(()),
        }
    }

    /// Run `f` and restore the current-IF state on every exit path.
    pub fn with_saved_if<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<ObsError>,
    {
        let old = self.cif_state();
        let result = f(self);
        match self.set_cif_state(old) {
            Ok(()) => result,
            Err(e) => result.and(Err(E::from(e))),
        }
    }

    /// Declare the cached per-baseline weight sums of IF `cif` stale.
    pub fn flag_baseline_weights(&mut self, cif: usize) {
        if self.bwt_cif == Some(cif) {
            self.bwt_cif = None;
        }
    }

    /// Recompute the per-baseline sums of weights for the resident IF.
    pub fn update_baseline_weights(&mut self) -> Result<(), ObsError> {
        let cif = self.current_if()?;
        for sub in &mut self.sub {
            for base in &mut sub.base {
                base.wsum = 0.0;
            }
            for integ in &sub.integ {
                for (b, vis) in integ.vis.iter().enumerate() {
                    if !vis.flagged() {
                        sub.base[b].wsum += vis.wt.abs();
                    }
                }
            }
        }
        self.bwt_cif = Some(cif);
        Ok(())
    }

    /// Are the cached per-baseline weight sums valid for IF `cif`?
    pub fn baseline_weights_valid(&self, cif: usize) -> bool {
        self.bwt_cif == Some(cif)
    }

    /// Mark a per-antenna correction flagged or unflagged; see
    /// [`Subarray::edit_antenna_cor`].
    pub fn edit_antenna_cor(
        &mut self,
        isub: usize,
        cif: usize,
        ut: usize,
        itel: usize,
        flag: bool,
    ) -> Result<(), ObsError> {
        let sub = self.sub.get_mut(isub).ok_or(ObsError::BadSubarray(isub))?;
        sub.edit_antenna_cor(cif, ut, itel, flag);
        Ok(())
    }

    /// Promote the tentative model into the established model and add
    /// its Fourier-plane predictions to the model visibilities of every
    /// selected IF. A no-op when the tentative model is empty.
    pub fn merge_model(&mut self) -> Result<(), ObsError> {
        if self.newmod.is_empty() {
            return Ok(());
        }
        let cmps = self.newmod.components().to_vec();
        self.with_saved_if::<_, ObsError, _>(|obs| {
            let mut next = obs.next_if(0, true, true);
            while let Some(cif) = next {
                obs.get_if(cif)?;
                let uvscale = obs.ifs[cif].uvscale;
                for sub in &mut obs.sub {
                    for integ in &mut sub.integ {
                        for vis in &mut integ.vis {
                            let uu = f64::from(vis.u) * uvscale;
                            let vv = f64::from(vis.v) * uvscale;
                            let sum = vis.mod_complex() + model_vis(&cmps, uu, vv);
                            vis.modamp = sum.norm() as f32;
                            vis.modphs = sum.arg() as f32;
                        }
                    }
                }
                obs.put_model()?;
                next = obs.next_if(cif + 1, true, true);
            }
            Ok(())
        })?;
        // The zero-spacing model amplitude is the total model flux.
        self.uvzero.modamp += self.newmod.total_flux() as f32;
        let mut newmod = std::mem::take(&mut self.newmod);
        self.model.absorb(&mut newmod, false);
        Ok(())
    }

    /// The weighted goodness of fit between the observed and model
    /// visibilities of all selected IFs, restricted to the given UV
    /// radius range (wavelengths; ignored unless the larger bound is
    /// positive).
    pub fn moddif(&mut self, uvmin: f32, uvmax: f32) -> Result<Moddif, ObsError> {
        self.check_ready(ObsState::Select, "moddif")?;
        let (uvmin, uvmax) = order_uv_range(uvmin, uvmax);
        let docut = uvmax > 0.0;

        let mut sumsq = 0.0f64;
        let mut chisq = 0.0f64;
        let mut ndata = 0usize;
        self.with_saved_if::<_, ObsError, _>(|obs| {
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
                            let uvrad = (uu * uu + vv * vv).sqrt() as f32;
                            if docut && (uvrad < uvmin || uvrad > uvmax) {
                                continue;
                            }
                            let diff = vis.obs_complex() - vis.mod_complex();
                            sumsq += diff.norm_sqr();
                            chisq += f64::from(vis.wt) * diff.norm_sqr();
                            ndata += 1;
                        }
                    }
                }
                next = obs.next_if(cif + 1, true, true);
            }
            Ok(())
        })?;

        Ok(Moddif {
            rms: if ndata > 0 {
                (sumsq / ndata as f64).sqrt()
            } else {
                0.0
            },
            chisq,
            ndata,
        })
    }

    /// The projected right ascension and declination of a map position
    /// (radians, wrt the map centre), undoing the accumulated
    /// phase-centre shift.
    pub fn pixel_radec(&self, x: f64, y: f64) -> (f64, f64) {
        let l = -self.east + x;
        let m = -self.north + y;
        let r2 = l * l + m * m;
        if r2 >= 1.0 {
            return (self.source.ra, self.source.dec);
        }
        let n = (1.0 - r2).sqrt();
        let (s0, c0) = self.source.dec.sin_cos();
        let dec = (m * c0 + n * s0).asin();
        let ra = self.source.ra + l.atan2(n * c0 - m * s0);
        (ra, dec)
    }
}

/// The Fourier-plane prediction of a model at (uu, vv) wavelengths. The
/// rarer component shapes are predicted as point sources of their
/// integrated flux.
pub(crate) fn model_vis(cmps: &[crate::model::Modcmp], uu: f64, vv: f64) -> Complex<f64> {
    // FWHM^2 -> Gaussian envelope factor.
    let gfac = crate::constants::PI * crate::constants::PI / (4.0 * std::f64::consts::LN_2);
    let mut sum = Complex::new(0.0, 0.0);
    for cmp in cmps {
        let phase = TAU * (uu * f64::from(cmp.x) + vv * f64::from(cmp.y));
        let mut amp = f64::from(cmp.flux);
        if cmp.ctype == CmpType::Gaussian {
            let (sphi, cphi) = f64::from(cmp.phi).sin_cos();
            let umaj = uu * sphi + vv * cphi;
            let umin = uu * cphi - vv * sphi;
            let maj = f64::from(cmp.major);
            let min = maj * f64::from(cmp.ratio);
            amp *= (-gfac * ((maj * umaj).powi(2) + (min * umin).powi(2))).exp();
        }
        sum += Complex::from_polar(amp, phase);
    }
    sum
}

/// Normalise a UV radius range: negatives clamp to zero and the bounds
/// are swapped into (min, max) order.
pub(crate) fn order_uv_range(uvmin: f32, uvmax: f32) -> (f32, f32) {
    let uvmin = uvmin.max(0.0);
    let uvmax = uvmax.max(0.0);
    if uvmin > uvmax {
        (uvmax, uvmin)
    } else {
        (uvmin, uvmax)
    }
}

/// Mark which visibilities of one integration are usable given the
/// existing flags and a UV radius range in wavelengths (applied only if
/// the larger bound is positive).
pub fn visflags(
    sub: &Subarray,
    ut: usize,
    uvscale: f64,
    uvmin: f32,
    uvmax: f32,
    usable: &mut [bool],
) {
    let (uvmin, uvmax) = order_uv_range(uvmin, uvmax);
    let docut = uvmax > 0.0;
    for (b, vis) in sub.integ[ut].vis.iter().enumerate() {
        let uu = f64::from(vis.u) * uvscale;
        let vv = f64::from(vis.v) * uvscale;
        let uvrad = (uu * uu + vv * vv).sqrt() as f32;
        usable[b] = !vis.flagged() && !(docut && (uvrad < uvmin || uvrad > uvmax));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Self-calibration tests.

use approx::assert_abs_diff_eq;
use num_complex::Complex;

use super::*;
use crate::obs::tests::obs_with;
use crate::obs::{Observation, FLAG_DEL};

/// Build an observation whose observed visibilities carry the given
/// per-antenna complex gain errors over a 1 Jy point-source model:
/// V_obs = g_a conj(g_b) V_mod.
fn gains_obs(gains: &[Complex<f64>], ntime: usize, flux: f64) -> Observation {
    let nstat = gains.len();
    let uts: Vec<f64> = (0..ntime).map(|i| 60.0 * i as f64).collect();
    obs_with(nstat, &uts, 1, |subs| {
        let pairs: Vec<(usize, usize)> =
            subs[0].base.iter().map(|b| (b.tel_a, b.tel_b)).collect();
        for integ in &mut subs[0].integ {
            for (b, vis) in integ.vis.iter_mut().enumerate() {
                let (ia, ib) = pairs[b];
                let v = gains[ia] * gains[ib].conj() * flux;
                vis.amp = v.norm() as f32;
                vis.phs = v.arg() as f32;
                vis.modamp = flux as f32;
                vis.modphs = 0.0;
                vis.wt = 1.0;
                vis.u = 100.0 + b as f32;
                vis.v = 50.0 - b as f32;
            }
        }
    })
}

#[test]
fn identity_data_produces_unit_corrections() {
    let gains = vec![Complex::new(1.0, 0.0); 10];
    let mut obs = gains_obs(&gains, 30, 1.0);
    let pars = SelfCalPars {
        doamp: true,
        dophs: true,
        solint: 10.0,
        ..SelfCalPars::default()
    };
    let report = slfcal(&mut obs, &pars).unwrap();

    obs.get_if(0).unwrap();
    for integ in &obs.sub[0].integ {
        for vis in &integ.vis {
            assert_abs_diff_eq!(vis.amp, 1.0, epsilon = 1e-4);
            assert_abs_diff_eq!(vis.phs, 0.0, epsilon = 1e-4);
        }
        for cor in &integ.icor[0] {
            assert_abs_diff_eq!(cor.amp_cor, 1.0, epsilon = 1e-4);
            assert_abs_diff_eq!(cor.phs_cor, 0.0, epsilon = 1e-4);
            assert_eq!(cor.state, crate::obs::CorState::Calibrated);
        }
    }
    assert!(report.after.rms <= report.before.rms + 1e-9);
    assert!(!report.flagged);
}

#[test]
fn amplitude_errors_are_corrected_when_the_gain_floats() {
    let g = 2.0f64.sqrt();
    let gains = vec![Complex::new(g, 0.0); 8];
    let mut obs = gains_obs(&gains, 10, 1.0);
    let pars = SelfCalPars {
        doamp: true,
        dophs: true,
        dofloat: true,
        ..SelfCalPars::default()
    };
    let report = slfcal(&mut obs, &pars).unwrap();

    obs.get_if(0).unwrap();
    for integ in &obs.sub[0].integ {
        for vis in &integ.vis {
            assert_abs_diff_eq!(vis.amp, 1.0, epsilon = 1e-3);
        }
        for cor in &integ.icor[0] {
            assert_abs_diff_eq!(cor.amp_cor, (1.0 / g) as f32, epsilon = 1e-3);
        }
    }
    assert!(report.after.rms < 1e-3);
    assert!(report.before.rms > 0.9);
}

#[test]
fn amplitude_normalisation_keeps_the_flux_scale() {
    let g = 2.0f64.sqrt();
    let gains = vec![Complex::new(g, 0.0); 8];
    let mut obs = gains_obs(&gains, 10, 1.0);
    let pars = SelfCalPars {
        doamp: true,
        dophs: true,
        dofloat: false,
        ..SelfCalPars::default()
    };
    slfcal(&mut obs, &pars).unwrap();

    obs.get_if(0).unwrap();
    let mut mean = 0.0f64;
    let mut n = 0usize;
    for integ in &obs.sub[0].integ {
        // Identical gain errors on every antenna are indistinguishable
        // from a flux-scale change, so normalisation undoes the
        // correction.
        for vis in &integ.vis {
            assert_abs_diff_eq!(vis.amp, 2.0, epsilon = 5e-3);
        }
        for cor in &integ.icor[0] {
            assert_eq!(cor.state, crate::obs::CorState::Calibrated);
            mean += f64::from(cor.amp_cor);
            n += 1;
        }
    }
    assert_abs_diff_eq!(mean / n as f64, 1.0, epsilon = 1e-3);
}

#[test]
fn a_phase_error_on_one_antenna_is_removed() {
    let phi = 0.3f64;
    let mut gains = vec![Complex::new(1.0, 0.0); 10];
    gains[2] = Complex::from_polar(1.0, phi);
    let mut obs = gains_obs(&gains, 5, 1.0);
    let pars = SelfCalPars {
        dophs: true,
        doamp: false,
        ..SelfCalPars::default()
    };
    let report = slfcal(&mut obs, &pars).unwrap();

    assert!(report.before.rms > 0.05);
    assert!(report.after.rms < 1e-3);

    obs.get_if(0).unwrap();
    for integ in &obs.sub[0].integ {
        for vis in &integ.vis {
            // Residual baseline phase, safely wrapped.
            assert!(
                f64::from(vis.phs).sin().abs() < 1e-3,
                "residual baseline phase {}",
                vis.phs
            );
            assert_abs_diff_eq!(vis.amp, 1.0, epsilon = 1e-5);
        }
    }
}

#[test]
fn out_of_bound_amplitude_corrections_are_rejected() {
    let g = 2.0f64.sqrt();
    let gains = vec![Complex::new(g, 0.0); 6];
    let mut obs = gains_obs(&gains, 4, 1.0);
    let pars = SelfCalPars {
        doamp: true,
        dophs: true,
        dofloat: true,
        maxamp: 1.2,
        ..SelfCalPars::default()
    };
    slfcal(&mut obs, &pars).unwrap();

    obs.get_if(0).unwrap();
    for integ in &obs.sub[0].integ {
        for vis in &integ.vis {
            assert_abs_diff_eq!(vis.amp, 2.0, epsilon = 1e-6);
        }
        for cor in &integ.icor[0] {
            assert_abs_diff_eq!(cor.amp_cor, 1.0);
            assert_eq!(cor.state, crate::obs::CorState::Uncalibrated);
        }
    }
}

#[test]
fn fixed_antennas_keep_unit_gain() {
    let mut gains = vec![Complex::new(1.0, 0.0); 8];
    gains[0] = Complex::new(2.0, 0.0);
    let mut obs = gains_obs(&gains, 4, 1.0);
    obs.sub[0].tel[0].antfix = true;
    let pars = SelfCalPars {
        doamp: true,
        dophs: true,
        dofloat: true,
        ..SelfCalPars::default()
    };
    slfcal(&mut obs, &pars).unwrap();

    obs.get_if(0).unwrap();
    for integ in &obs.sub[0].integ {
        assert_abs_diff_eq!(integ.icor[0][0].amp_cor, 1.0);
        assert_abs_diff_eq!(integ.icor[0][0].phs_cor, 0.0);
    }
}

#[test]
fn single_overall_correction_covers_the_whole_range() {
    let gains = vec![Complex::new(1.25, 0.0); 6];
    let mut obs = gains_obs(&gains, 8, 1.0);
    let pars = SelfCalPars {
        doamp: true,
        dophs: true,
        dofloat: true,
        doone: true,
        solint: 30.0,
        ..SelfCalPars::default()
    };
    slfcal(&mut obs, &pars).unwrap();

    obs.get_if(0).unwrap();
    for integ in &obs.sub[0].integ {
        for vis in &integ.vis {
            assert_abs_diff_eq!(vis.amp, 1.0, epsilon = 1e-3);
        }
    }
}

#[test]
fn solution_bins_follow_the_interval_grid() {
    let uts: Vec<f64> = (0..30).map(|i| 60.0 * i as f64).collect();
    let obs = obs_with(3, &uts, 1, |_| {});
    let sub = &obs.sub[0];

    // A 10-minute interval starting at ut 0: integrations at 0..=600 s
    // fall in the first bin.
    assert_eq!(endbin(sub, 0, 600.0), 10);
    assert_eq!(endbin(sub, 11, 600.0), 20);
    assert_eq!(endbin(sub, 21, 600.0), 29);
    assert_eq!(count_bins(sub, 600.0), 3);

    // No interval: every integration is its own bin.
    assert_eq!(endbin(sub, 5, 0.0), 5);
}

#[test]
fn closure_pruning_drops_single_baseline_antennas() {
    let mut obs = obs_with(4, &[0.0], 1, |subs| {
        // Baselines are (0,1) (0,2) (0,3) (1,2) (1,3) (2,3); flagging
        // the last two leaves antenna 3 hanging on a single baseline.
        subs[0].integ[0].vis[4].bad = FLAG_DEL;
        subs[0].integ[0].vis[5].bad = FLAG_DEL;
    });
    obs.get_if(0).unwrap();

    let pars = SelfCalPars {
        mintel: 3,
        doflag: true,
        ..SelfCalPars::default()
    };
    let sub = &mut obs.sub[0];
    let mut usable = vec![false; sub.nbase()];
    let mut telnum = vec![0; sub.nstat()];
    let mut nbadtel = 0usize;

    let ok = get_usable(sub, 0, 0, 1.0, &pars, &mut usable, &mut telnum, &mut nbadtel);
    assert!(ok);
    assert_eq!(usable, vec![true, true, false, true, false, false]);
    assert_eq!(telnum, vec![2, 2, 2, 0]);
    assert_eq!(nbadtel, 1);
    assert!(sub.integ[0].icor[0][3].bad);

    // With a higher telescope minimum the whole integration becomes
    // unusable.
    let pars = SelfCalPars {
        mintel: 4,
        ..SelfCalPars::default()
    };
    let ok = get_usable(sub, 0, 0, 1.0, &pars, &mut usable, &mut telnum, &mut nbadtel);
    assert!(!ok);
    assert!(usable.iter().all(|&u| !u));
    assert!(telnum.iter().all(|&n| n == 0));
}

#[test]
fn gaussian_area_interpolation_is_sane() {
    let sigma = 2.0;
    let all = get_area(-2.5 * sigma, 2.5 * sigma, sigma);
    assert!(all > 0.95 && all <= 1.0);

    let left = get_area(-2.5 * sigma, 0.0, sigma);
    let right = get_area(0.0, 2.5 * sigma, sigma);
    assert_abs_diff_eq!(left, right, epsilon = 1e-12);
    assert_abs_diff_eq!(left + right, all, epsilon = 1e-12);
}

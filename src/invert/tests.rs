// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gridder and inverse-transform tests.

use approx::assert_abs_diff_eq;

use super::*;
use crate::constants::TAU;
use crate::obs::tests::obs_with;
use crate::obs::{Observation, FLAG_DEL};

const NX: usize = 64;
const NY: usize = 64;
const XINC: f64 = 1e-8;

fn test_map() -> MapBeam {
    MapBeam::new(NX, XINC, NY, XINC).unwrap()
}

/// An observation whose visibilities lie on a UV ring of the given
/// radius (wavelengths), all with the same amplitude, zero phase and
/// unit weight. One visibility per integration on a single baseline.
fn ring_obs(n: usize, radius: f64, amp: f32) -> Observation {
    let uts: Vec<f64> = (0..n).map(|i| 60.0 * i as f64).collect();
    obs_with(2, &uts, 1, |subs| {
        for (i, integ) in subs[0].integ.iter_mut().enumerate() {
            let ang = TAU * i as f64 / n as f64;
            let vis = &mut integ.vis[0];
            vis.u = (radius * ang.cos()) as f32;
            vis.v = (radius * ang.sin()) as f32;
            vis.amp = amp;
            vis.wt = 1.0;
        }
    })
}

/// An observation with visibilities at fixed UV-grid points: one
/// integration per (u_pixels, v_pixels, amp, wt) entry.
fn cluster_obs(samples: &[(f64, f64, f32, f32)]) -> Observation {
    let uinc = 1.0 / (XINC * NX as f64);
    let vinc = 1.0 / (XINC * NY as f64);
    let uts: Vec<f64> = (0..samples.len()).map(|i| 60.0 * i as f64).collect();
    obs_with(2, &uts, 1, |subs| {
        for (integ, &(up, vp, amp, wt)) in subs[0].integ.iter_mut().zip(samples) {
            let vis = &mut integ.vis[0];
            vis.u = (up * uinc) as f32;
            vis.v = (vp * vinc) as f32;
            vis.amp = amp;
            vis.wt = wt;
        }
    })
}

fn centre(mb: &MapBeam) -> usize {
    mb.nx() / 2 + mb.nx() * mb.ny() / 2
}

#[test]
fn beam_is_symmetric_with_unit_peak() {
    let mut obs = ring_obs(128, 10.0 / (XINC * NX as f64), 1.0);
    let mut mb = test_map();
    uvinvert(&mut obs, &mut mb, &InvertPars::default()).unwrap();

    let nx = mb.nx();
    let ny = mb.ny();
    let beam = &mb.beam[..nx * ny];

    // Unit peak at the centre pixel.
    assert_abs_diff_eq!(beam[centre(&mb)], 1.0, epsilon = 1e-3);

    // The centre is the absolute maximum.
    for &v in beam {
        assert!(v <= beam[centre(&mb)] + 1e-6);
    }

    // Point symmetry about the origin convention.
    for iy in 0..ny {
        for ix in 0..nx {
            let mirror = beam[(nx - ix) % nx + nx * ((ny - iy) % ny)];
            assert_abs_diff_eq!(beam[ix + nx * iy], mirror, epsilon = 1e-4);
        }
    }

    // The moment-based beam estimate and noise came out.
    assert!(mb.e_bmaj > 0.0 && mb.e_bmin > 0.0);
    assert!(mb.e_bmaj >= mb.e_bmin);
    assert!(mb.noise > 0.0);
    assert!(!mb.dobeam && !mb.domap);
}

#[test]
fn point_source_map_peaks_at_centre_with_its_amplitude() {
    let mut obs = ring_obs(128, 10.0 / (XINC * NX as f64), 2.5);
    let mut mb = test_map();
    uvinvert(&mut obs, &mut mb, &InvertPars::default()).unwrap();

    let nx = mb.nx();
    assert_abs_diff_eq!(mb.map[centre(&mb)], 2.5, epsilon = 5e-3);
    assert_eq!((mb.maxpix.ix, mb.maxpix.iy), (nx / 2, mb.ny() / 2));
    assert_abs_diff_eq!(mb.maxpix.value, 2.5, epsilon = 5e-3);
}

#[test]
fn radial_weighting_keeps_the_beam_normalised() {
    let mut obs = ring_obs(64, 9.0 / (XINC * NX as f64), 1.0);
    let mut mb = test_map();
    let pars = InvertPars {
        dorad: true,
        ..InvertPars::default()
    };
    uvinvert(&mut obs, &mut mb, &pars).unwrap();
    assert_abs_diff_eq!(mb.beam[centre(&mb)], 1.0, epsilon = 1e-3);
}

#[test]
fn natural_map_is_the_weighted_mean_at_centre() {
    // Two visibilities with different weights; all phases zero, so the
    // centre pixel is the weighted mean amplitude.
    let mut obs = cluster_obs(&[(8.0, 5.0, 1.0, 1.0), (6.0, -7.0, 3.0, 3.0)]);
    let mut mb = test_map();
    uvinvert(&mut obs, &mut mb, &InvertPars::default()).unwrap();
    // Natural weighting ignores vis.wt: plain mean.
    assert_abs_diff_eq!(mb.map[centre(&mb)], 2.0, epsilon = 5e-3);

    // Error-power weighting with errpow = -2 applies wt itself.
    let mut obs = cluster_obs(&[(8.0, 5.0, 1.0, 1.0), (6.0, -7.0, 3.0, 3.0)]);
    let mut mb = test_map();
    let pars = InvertPars {
        errpow: -2.0,
        ..InvertPars::default()
    };
    uvinvert(&mut obs, &mut mb, &pars).unwrap();
    assert_abs_diff_eq!(mb.map[centre(&mb)], 2.5, epsilon = 5e-3);
}

#[test]
fn uniform_weighting_equalises_crowded_bins() {
    // 100 visibilities stacked at one UV point and a single one
    // elsewhere.
    let mut samples = vec![(8.0, 5.0, 3.0f32, 1.0f32); 100];
    samples.push((5.0, -6.0, 1.0, 1.0));

    let mut obs = cluster_obs(&samples);
    let mut mb = test_map();
    uvinvert(&mut obs, &mut mb, &InvertPars::default()).unwrap();
    let natural_peak = mb.map[centre(&mb)];
    assert_abs_diff_eq!(natural_peak, (100.0 * 3.0 + 1.0) / 101.0, epsilon = 5e-3);

    let mut obs = cluster_obs(&samples);
    let mut mb = test_map();
    let pars = InvertPars {
        binwid: 1.0,
        ..InvertPars::default()
    };
    uvinvert(&mut obs, &mut mb, &pars).unwrap();
    let uniform_peak = mb.map[centre(&mb)];
    // Each bin now carries unit total weight.
    assert_abs_diff_eq!(uniform_peak, 2.0, epsilon = 5e-3);
    assert!(natural_peak > uniform_peak);

    // The crowded bin was indeed counted.
    let uinc = mb.uinc();
    let vinc = mb.vinc();
    assert_eq!(mb.bin.count(8.0 * uinc, 5.0 * vinc), 100);
    assert_eq!(mb.bin.count(5.0 * uinc, -6.0 * vinc), 1);
}

#[test]
fn empty_selections_are_reported() {
    // All visibilities flagged.
    let uts: Vec<f64> = (0..16).map(|i| 60.0 * i as f64).collect();
    let mut obs = obs_with(2, &uts, 1, |subs| {
        for integ in &mut subs[0].integ {
            integ.vis[0].bad = FLAG_DEL;
        }
    });
    let mut mb = test_map();
    assert_eq!(
        uvinvert(&mut obs, &mut mb, &InvertPars::default()),
        Err(InvertError::AllFlagged)
    );

    // A uv range that excludes everything.
    let mut obs = ring_obs(16, 8.0 / (XINC * NX as f64), 1.0);
    let mut mb = test_map();
    let pars = InvertPars {
        uvmin: 1e9,
        uvmax: 2e9,
        ..InvertPars::default()
    };
    assert_eq!(
        uvinvert(&mut obs, &mut mb, &pars),
        Err(InvertError::NoDataInRange)
    );
}

#[test]
fn nothing_to_do_is_an_error() {
    let mut obs = ring_obs(8, 1e6, 1.0);
    let mut mb = test_map();
    mb.domap = false;
    mb.dobeam = false;
    assert_eq!(
        uvinvert(&mut obs, &mut mb, &InvertPars::default()),
        Err(InvertError::NothingToDo)
    );
}

#[test]
fn optimal_pixel_size_reflects_the_uv_extrema() {
    let radius = 10.0 / (XINC * NX as f64);
    let mut obs = ring_obs(128, radius, 1.0);
    let (xmax, ymax) = optimal_pixel_size(&mut obs, 0.0, 0.0, NX, NY).unwrap();
    // umax is the ring radius (a sample sits at angle 0).
    assert_abs_diff_eq!(
        xmax,
        (NX as f64 / 4.0 - 2.0) / (radius * NX as f64),
        epsilon = 1e-3 * xmax
    );
    assert!(ymax > 0.0);
}

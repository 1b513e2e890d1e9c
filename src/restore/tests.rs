// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Restoration tests.

use approx::assert_abs_diff_eq;

use super::*;
use crate::constants::PI;
use crate::model::Modcmp;
use crate::obs::tests::tiny_obs;

const NX: usize = 64;
const XINC: f64 = 1e-8;

fn test_map() -> MapBeam {
    MapBeam::new(NX, XINC, NX, XINC).unwrap()
}

fn beam_pars() -> RestorePars {
    RestorePars {
        bmaj: 2.0 * XINC,
        bmin: 2.0 * XINC,
        bpa: 0.0,
        dosub: false,
        noresid: false,
        dosmth: false,
        freq: 1.0e9,
    }
}

fn gaussian_cmp() -> Modcmp {
    Modcmp {
        ctype: crate::model::CmpType::Gaussian,
        flux: 2.0,
        x: XINC as f32,
        y: XINC as f32,
        major: 2.0 * XINC as f32,
        ratio: 0.5,
        phi: (PI / 6.0) as f32,
        freq0: 1.0e9,
        spcind: 0.0,
        freepar: false,
    }
}

#[test]
fn delta_restores_to_a_unit_beam_gaussian() {
    let obs = tiny_obs();
    let mut mb = test_map();
    let mut model = Model::new();
    model.add_cmp(Modcmp::delta(1.0, 0.0, 0.0), false);

    mapres(&obs, &mut mb, &model, None, &beam_pars()).unwrap();

    let nx = mb.nx();
    let cntr = mb.centre();
    // Peak flux in Jy/beam equals the component flux for a delta.
    assert_abs_diff_eq!(mb.map[cntr], 1.0, epsilon = 1e-5);
    // Half power at one pixel (half the FWHM) from the centre.
    assert_abs_diff_eq!(mb.map[cntr + 1], 0.5, epsilon = 0.01);
    assert_abs_diff_eq!(mb.map[cntr + nx], 0.5, epsilon = 0.01);

    // The restore was recorded.
    assert_eq!(mb.ncmp, 1);
    assert_abs_diff_eq!(mb.bmaj, 2.0 * XINC);
    assert_abs_diff_eq!(mb.bmin, 2.0 * XINC);
    assert_abs_diff_eq!(mb.maxpix.value, 1.0, epsilon = 1e-5);
}

#[test]
fn restore_then_subtract_is_identity() {
    let obs = tiny_obs();
    let mut mb = test_map();
    let mut model = Model::new();
    model.add_cmp(Modcmp::delta(1.0, 0.0, 0.0), false);
    model.add_cmp(gaussian_cmp(), false);

    let mut pars = beam_pars();
    mapres(&obs, &mut mb, &model, None, &pars).unwrap();
    assert!(mb.maxpix.value > 0.5);

    pars.dosub = true;
    mapres(&obs, &mut mb, &model, None, &pars).unwrap();

    let nx = mb.nx();
    for &v in &mb.map[..nx * nx] {
        assert!(v.abs() <= 1e-5, "non-zero residual {v}");
    }
}

#[test]
fn spectral_index_scales_the_flux() {
    let obs = tiny_obs();
    let mut mb = test_map();
    let mut model = Model::new();
    let mut cmp = Modcmp::delta(1.0, 0.0, 0.0);
    cmp.freq0 = 1.0e9;
    cmp.spcind = 1.0;
    model.add_cmp(cmp, false);

    let mut pars = beam_pars();
    pars.freq = 2.0e9;
    mapres(&obs, &mut mb, &model, None, &pars).unwrap();
    assert_abs_diff_eq!(mb.map[mb.centre()], 2.0, epsilon = 1e-5);
}

#[test]
fn unsupported_components_are_skipped() {
    let obs = tiny_obs();
    let mut mb = test_map();
    let mut model = Model::new();
    let mut cmp = Modcmp::delta(5.0, 0.0, 0.0);
    cmp.ctype = crate::model::CmpType::Disk;
    model.add_cmp(cmp, false);

    mapres(&obs, &mut mb, &model, None, &beam_pars()).unwrap();
    let nx = mb.nx();
    for &v in &mb.map[..nx * nx] {
        assert_abs_diff_eq!(v, 0.0);
    }
}

#[test]
fn no_residual_replaces_the_map_with_the_model() {
    let obs = tiny_obs();
    let mut mb = test_map();
    // A residual that should vanish under noresid.
    let nx = mb.nx();
    mb.map[20 + 20 * nx] = 9.0;

    let mut model = Model::new();
    model.add_cmp(Modcmp::delta(1.0, 0.0, 0.0), false);
    let mut pars = beam_pars();
    pars.noresid = true;
    mapres(&obs, &mut mb, &model, None, &pars).unwrap();

    assert_abs_diff_eq!(mb.map[20 + 20 * nx], 0.0);
    assert_abs_diff_eq!(mb.map[mb.centre()], 1.0, epsilon = 1e-5);
}

#[test]
fn external_destination_leaves_the_residual_untouched() {
    let obs = tiny_obs();
    let mut mb = test_map();
    let nx = mb.nx();
    mb.map[30 + 30 * nx] = 0.5;

    let mut model = Model::new();
    model.add_cmp(Modcmp::delta(1.0, 0.0, 0.0), false);

    let mut buf = vec![0.0f32; nx * nx];
    mapres(&obs, &mut mb, &model, Some(&mut buf), &beam_pars()).unwrap();

    // The destination holds residual plus model; the working map only
    // the residual.
    assert_abs_diff_eq!(buf[30 + 30 * nx], 0.5, epsilon = 1e-4);
    assert_abs_diff_eq!(buf[mb.centre()], 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(mb.map[mb.centre()], 0.0);

    // Undersized destinations are refused.
    let mut small = vec![0.0f32; 16];
    assert_eq!(
        mapres(&obs, &mut mb, &model, Some(&mut small), &beam_pars()),
        Err(RestoreError::BadDestination {
            got: 16,
            need: nx * nx,
        })
    );
}

#[test]
fn smoothing_spreads_a_spike_with_the_binomial_mask() {
    let obs = tiny_obs();
    let mut mb = test_map();
    let nx = mb.nx();
    mb.map[32 + 32 * nx] = 1.0;

    let model = Model::new();
    let mut pars = beam_pars();
    pars.dosmth = true;
    mapres(&obs, &mut mb, &model, None, &pars).unwrap();

    assert_abs_diff_eq!(mb.map[32 + 32 * nx], 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(mb.map[33 + 32 * nx], 0.125, epsilon = 1e-6);
    assert_abs_diff_eq!(mb.map[31 + 32 * nx], 0.125, epsilon = 1e-6);
    assert_abs_diff_eq!(mb.map[33 + 33 * nx], 0.0625, epsilon = 1e-6);
    // Total flux inside the smoothed patch is preserved by the mask.
    let area = mb.area();
    let mut total = 0.0f32;
    for iy in area.iymin..=area.iymax {
        for &v in &mb.map[area.ixmin + iy * nx..=area.ixmax + iy * nx] {
            total += v;
        }
    }
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
}

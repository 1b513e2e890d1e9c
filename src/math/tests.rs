// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Math kernel tests.

use approx::assert_abs_diff_eq;

use super::*;

/// A deterministic but featureless test pattern.
fn pattern(i: usize) -> f32 {
    let x = i as f64;
    (0.3 + (0.7 * x).sin() + 0.1 * (0.13 * x).cos()) as f32
}

#[test]
fn complex_round_trip() {
    let adim = 8;
    let bdim = 4;
    let mut image: Vec<f32> = (0..2 * adim * bdim).map(pattern).collect();
    let original = image.clone();

    fft2d(&mut image, adim, bdim, FftDirection::Forward, false, false).unwrap();
    fft2d(&mut image, adim, bdim, FftDirection::Inverse, false, true).unwrap();

    for (got, want) in image.iter().zip(&original) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
    }
}

#[test]
fn complex_impulse_has_flat_spectrum() {
    let adim = 8;
    let bdim = 8;
    let mut image = vec![0.0f32; 2 * adim * bdim];
    image[0] = 1.0;

    fft2d(&mut image, adim, bdim, FftDirection::Forward, false, false).unwrap();

    for c in image.chunks_exact(2) {
        assert_abs_diff_eq!(c[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(c[1], 0.0, epsilon = 1e-5);
    }
}

#[test]
fn real_round_trip() {
    // nx = 16, ny = 8 real samples; adim is the number of complex
    // elements per row.
    let adim = 8;
    let bdim = 8;
    let nx = 2 * adim;
    let mut image = vec![0.0f32; 2 * (adim + 1) * bdim];
    for i in 0..nx * bdim {
        image[i] = pattern(i);
    }
    let original = image[..nx * bdim].to_vec();

    fft2d(&mut image, adim, bdim, FftDirection::Forward, true, false).unwrap();
    fft2d(&mut image, adim, bdim, FftDirection::Inverse, true, true).unwrap();

    for (got, want) in image[..nx * bdim].iter().zip(&original) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
    }
}

#[test]
fn real_forward_of_constant_is_dc_only() {
    let adim = 8;
    let bdim = 8;
    let nx = 2 * adim;
    let mut image = vec![0.0f32; 2 * (adim + 1) * bdim];
    for v in &mut image[..nx * bdim] {
        *v = 0.25;
    }

    fft2d(&mut image, adim, bdim, FftDirection::Forward, true, false).unwrap();

    // All the power lands in the (0,0) element, which holds the plain
    // sum of the samples.
    assert_abs_diff_eq!(image[0], 0.25 * (nx * bdim) as f32, epsilon = 1e-3);
    for c in image.chunks_exact(2).skip(1) {
        assert_abs_diff_eq!(c[0], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(c[1], 0.0, epsilon = 1e-3);
    }
}

#[test]
fn fft_shift_twice_is_identity() {
    let adim = 8;
    let bdim = 4;
    let mut image: Vec<f32> = (0..2 * adim * bdim).map(pattern).collect();
    let original = image.clone();

    fft_shift(&mut image, adim, bdim);
    assert_ne!(image, original);
    fft_shift(&mut image, adim, bdim);
    // Sign flips are exact.
    assert_eq!(image, original);
}

#[test]
fn cnj_shift_twice_is_identity() {
    let adim = 16;
    let bdim = 8;
    let mut image: Vec<f32> = (0..(adim + 2) * bdim).map(pattern).collect();
    let original = image.clone();

    cnj_shift(&mut image, adim, bdim);
    assert_ne!(image, original);
    cnj_shift(&mut image, adim, bdim);
    assert_eq!(image, original);
}

#[test]
fn fft_rejects_non_power_of_two() {
    let mut image = vec![0.0f32; 2 * 12 * 4];
    let result = fft2d(&mut image, 12, 4, FftDirection::Forward, false, false);
    assert_eq!(result, Err(FftError::NotPowerOfTwo(12)));

    let mut image = vec![0.0f32; 2 * 8 * 6];
    let result = fft2d(&mut image, 8, 6, FftDirection::Forward, false, false);
    assert_eq!(result, Err(FftError::NotPowerOfTwo(6)));
}

#[test]
fn costran_is_symmetric_and_peaks_at_centre() {
    // A Gaussian interpolation function, as used by the gridder.
    let ninp = 301;
    let hwhm = (ninp as f32 - 1.0) / 2.5 * 0.7;
    let recvar = (2.0f32).ln() / hwhm / hwhm;
    let inparr: Vec<f32> = (0..ninp).map(|i| (-recvar * (i * i) as f32).exp()).collect();

    let nout = 64;
    let mut outarr = vec![0.0f32; nout];
    costran(&inparr, 2.5, &mut outarr);

    let icent = nout / 2;
    for j in 1..icent - 1 {
        assert_abs_diff_eq!(outarr[icent + j], outarr[icent - j], epsilon = 1e-6);
    }
    let (_, vmax) = frange(&outarr);
    assert_abs_diff_eq!(outarr[icent], vmax, epsilon = 0.0);
}

#[test]
fn nearest_integer_rounds_away_from_zero() {
    assert_eq!(fnint(0.49), 0);
    assert_eq!(fnint(0.5), 1);
    assert_eq!(fnint(1.5), 2);
    assert_eq!(fnint(-0.49), 0);
    assert_eq!(fnint(-0.5), -1);
    assert_eq!(fnint(-1.5), -2);
    assert_eq!(dnint(2.5), 3);
    assert_eq!(dnint(-2.5), -3);
}

#[test]
fn range_scans() {
    let v = [3.0, -1.0, 2.0, 7.0, 0.5];
    assert_eq!(frange(&v), (-1.0, 7.0));
    assert_eq!(frange(&[]), (0.0, 0.0));

    // 4x3 array; patch covering the middle column.
    let map = [
        0.0, 5.0, 0.0, 0.0, //
        0.0, -2.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
    ];
    assert_eq!(imran(&map, 4, 3, 1, 1, 0, 2), (-2.0, 5.0));
    // Swapped and out-of-range bounds are repaired.
    assert_eq!(imran(&map, 4, 3, 1, 1, 9, 0), (-2.0, 5.0));
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Numeric primitives for the imaging code: a 2-D FFT with its
//! origin-shift helpers, a 1-D cosine transform, nearest-integer
//! rounding, and min/max range scans.
//!
//! The FFT works in place on a flat `f32` buffer of interleaved
//! real/imaginary pairs. Two storage conventions are supported:
//!
//! * **Complex**: `adim * bdim` complex values, organised as `bdim`
//!   consecutive rows of `adim` complex elements.
//! * **Real ↔ half conjugate-symmetric**: the buffer holds
//!   `2 * (adim + 1) * bdim` floats. For the forward transform the real
//!   samples are packed into the first `2 * adim * bdim` floats (rows of
//!   `2 * adim` reals); the transform yields one half of a conjugate
//!   symmetric array of `(adim + 1) * bdim` complex values. The inverse
//!   consumes that layout and re-packs the reals.
//!
//! The radix-2 combination uses trig recurrences in double precision so
//! that W(k) stays accurate over long rows.

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::constants::{PI, TAU};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftError {
    #[error("FFT dimension {0} is not a positive power of two")]
    NotPowerOfTwo(usize),
}

/// Transform direction. `Forward` takes the image plane to the UV plane;
/// `Inverse` goes the other way and is the direction on which callers
/// normally request rescaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

impl FftDirection {
    fn sign(self) -> f64 {
        match self {
            FftDirection::Forward => 1.0,
            FftDirection::Inverse => -1.0,
        }
    }
}

/// Is `n` a positive power of two?
pub fn is_pow2(n: usize) -> bool {
    n > 0 && n & (n - 1) == 0
}

/// Perform a 2-D FFT in place.
///
/// `adim` is the number of complex points in a row, `bdim` the number of
/// rows; both must be powers of two (`bdim` may be 1). `is_real` selects
/// the real ↔ half-conjugate-symmetric convention described in the
/// module docs. `rescale` divides the result by the number of complex
/// data points; do that on the forward or the inverse transform but not
/// both.
pub fn fft2d(
    image: &mut [f32],
    adim: usize,
    bdim: usize,
    dir: FftDirection,
    is_real: bool,
    rescale: bool,
) -> Result<(), FftError> {
    if !is_pow2(adim) {
        return Err(FftError::NotPowerOfTwo(adim));
    }
    if !is_pow2(bdim) {
        return Err(FftError::NotPowerOfTwo(bdim));
    }
    let needed = if is_real {
        2 * (adim + 1) * bdim
    } else {
        2 * adim * bdim
    };
    assert!(
        image.len() >= needed,
        "FFT buffer holds {} floats but the transform needs {}",
        image.len(),
        needed
    );

    let isign = dir.sign();

    // When a real array is being forward transformed the rows must go
    // first; for the inverse of the half-conjugate-symmetric layout they
    // must go last. For complex transforms the order is irrelevant.
    let axes: [usize; 2] = match dir {
        FftDirection::Forward => [0, 1],
        FftDirection::Inverse => [1, 0],
    };

    for &axis in &axes {
        // Element counts and float strides for the current axis.
        let (curdim, othdim, curinc, othinc) = match axis {
            0 => {
                if is_real && dir == FftDirection::Inverse {
                    fixreal(image, adim, bdim, -1);
                }
                (adim, bdim, 2, 2 * adim)
            }
            _ => {
                let mut othdim = adim;
                let mut curinc = 2 * adim;
                // Real transforms have an extra complex column to carry.
                if is_real {
                    if dir == FftDirection::Forward {
                        fixreal(image, adim, bdim, 1);
                    }
                    othdim = adim + 1;
                    curinc = 2 * (adim + 1);
                }
                (bdim, othdim, curinc, 2)
            }
        };

        bitswap(image, curdim, curinc, othdim, othinc);

        // Combine the one-point transforms produced by the swap into
        // 2-point transforms, then 4-point transforms, and so on.
        for ipos in 0..othdim {
            let vecbase = ipos * othinc;
            let mut ntrans = 2;
            while ntrans <= curdim {
                let nprev = ntrans / 2;
                let traninc = ntrans * curinc;
                let previnc = nprev * curinc;

                // W(k) = exp(isign.2.pi.i.k/ntrans), built by recurrence.
                let omega = isign * TAU / ntrans as f64;
                let (sininc, cosinc) = omega.sin_cos();
                let mut wr = 1.0f64;
                let mut wi = 0.0f64;
                let mut fwr = 1.0f32;
                let mut fwi = 0.0f32;

                for k in 0..nprev {
                    let kbase = vecbase + k * curinc;
                    // Element k of each even/odd transform pair. Since
                    // W(k + ntrans/2) = -W(k), the two output elements
                    // F(k) and F(k + ntrans/2) come out of one pass.
                    let mut er = kbase;
                    let mut or = kbase + previnc;
                    let mut slot = 0;
                    while slot < curdim {
                        let wreal = image[or] * fwr - image[or + 1] * fwi;
                        let wimag = image[or] * fwi + image[or + 1] * fwr;
                        image[or] = image[er] - wreal;
                        image[or + 1] = image[er + 1] - wimag;
                        image[er] += wreal;
                        image[er + 1] += wimag;
                        er += traninc;
                        or += traninc;
                        slot += ntrans;
                    }
                    let wtmp = wr;
                    wr = wtmp * cosinc - wi * sininc;
                    wi = wtmp * sininc + wi * cosinc;
                    // Single precision is sufficient outside the
                    // recurrence.
                    fwr = wr as f32;
                    fwi = wi as f32;
                }
                ntrans <<= 1;
            }
        }
    }

    // On request divide throughout by the number of complex data points.
    if rescale {
        let nfloat = (if is_real { adim + 1 } else { adim }) * bdim * 2;
        let ncomplex = ((if is_real { adim * 2 } else { adim }) * bdim) as f32;
        for v in &mut image[..nfloat] {
            *v /= ncomplex;
        }
    }
    Ok(())
}

/// Swap rows or columns of an FFT array where the index of each swapped
/// vector is the bit-reversed value of the other.
fn bitswap(image: &mut [f32], curdim: usize, curinc: usize, othdim: usize, othinc: usize) {
    for slot in 0..curdim {
        // Build the bit-reversed value of `slot` in `swapd`.
        let mut idim = curdim;
        let mut orig = slot;
        let mut swapd = 0;
        loop {
            idim >>= 1;
            if idim == 0 {
                break;
            }
            swapd <<= 1;
            swapd |= orig & 1;
            orig >>= 1;
        }
        // Avoid swapping vectors twice or onto themselves.
        if swapd < slot {
            let mut a = slot * curinc;
            let mut b = swapd * curinc;
            for _ in 0..othdim {
                image.swap(a, b);
                image.swap(a + 1, b + 1);
                a += othinc;
                b += othinc;
            }
        }
    }
}

/// Pre/post-process the first dimension of a real transform by pairing
/// column n with column adim-n of each row, weighted by a complex-root
/// recurrence. `isign` is 1 before a forward transform of packed reals
/// and -1 after building the rows of an inverse transform.
fn fixreal(image: &mut [f32], adim: usize, bdim: usize, isign: i32) {
    // Make way for the two floats required at x = N/2.
    if isign == 1 {
        open_real_rows(image, adim, bdim);
    }

    // One scale factor is -0.5 on forward transforms and +0.5 on
    // reverse; the other renormalizes for the simulated double-length
    // array.
    let (scal, norm): (f32, f32) = if isign == 1 { (-0.5, 1.0) } else { (0.5, 2.0) };

    let theta = f64::from(isign) * PI / adim as f64;
    let (sininc, cosinc) = theta.sin_cos();

    let rowinc = 2 * (adim + 1);
    for row in 0..bdim {
        let rowbase = row * rowinc;
        let mut rn = rowbase; // real part of element n
        let mut rm = rowbase + rowinc - 2; // real part of element adim-n

        // Column pair 0 and N is handled outside the main loop.
        if isign == 1 {
            let re0 = image[rn];
            let im0 = image[rn + 1];
            image[rm] = re0 - im0;
            image[rn] = re0 + im0;
            image[rn + 1] = 0.0;
            image[rm + 1] = 0.0;
        } else {
            let re0 = image[rn];
            let ren = image[rm];
            image[rn + 1] = norm * 0.5 * (re0 - ren);
            image[rn] = norm * 0.5 * (re0 + ren);
        }

        // Initial value of exp(isign.pi.i.n/adim) for n=1.
        let mut wr = cosinc;
        let mut wi = sininc;
        let mut fwr = wr as f32;
        let mut fwi = wi as f32;

        // Column pairs n, N-n from n=1 to n=N/2. The middle column pairs
        // with itself on the last pass.
        for icol in 1..=adim / 2 {
            rn = rowbase + 2 * icol;
            rm = rowbase + rowinc - 2 - 2 * icol;
            // sum_a(n) = 0.5(row[n] + conj(row[adim-n]))
            let rsum_a = 0.5 * (image[rn] + image[rm]);
            let isum_a = 0.5 * (image[rn + 1] - image[rm + 1]);
            // sum_b(n) = 0.5i.exp(pi.i.n/adim).(row[n] - conj(row[adim-n]))
            let rsum_b = -scal * (image[rn + 1] + image[rm + 1]);
            let isum_b = scal * (image[rn] - image[rm]);
            // data(n) = sum_a(n) + sum_b(n).exp(-pi.i.n/adim)
            let new_rn = norm * (rsum_a + fwr * rsum_b - fwi * isum_b);
            let new_in = norm * (isum_a + fwr * isum_b + fwi * rsum_b);
            // data(adim-n) = conj(sum_a(n)) - conj(sum_b(n).exp(-pi.i.n/adim))
            let new_rm = norm * (rsum_a - fwr * rsum_b + fwi * isum_b);
            let new_im = norm * (-isum_a + fwr * isum_b + fwi * rsum_b);
            image[rn] = new_rn;
            image[rn + 1] = new_in;
            image[rm] = new_rm;
            image[rm + 1] = new_im;

            let wtmp = wr;
            wr = wtmp * cosinc - wi * sininc;
            wi = wtmp * sininc + wi * cosinc;
            fwr = wr as f32;
            fwi = wi as f32;
        }
    }

    // Remove the redundant extra column at n_x = N_x/2 before the
    // inverse FFT.
    if isign == -1 {
        close_real_rows(image, adim, bdim);
    }
}

/// Insert an extra complex element at the end of each of `bdim` rows of
/// `adim` complex values, turning the array into the (adim+1) x bdim
/// layout required for the half conjugate-symmetric transform. Because
/// of the N/2 periodicity of the underlying transform the extra element
/// is a copy of element 0 of its row.
fn open_real_rows(image: &mut [f32], adim: usize, bdim: usize) {
    let oldw = 2 * adim;
    let neww = 2 * (adim + 1);
    // Work from the last row backwards so that no original is
    // overwritten before it has been moved.
    for row in (0..bdim).rev() {
        image.copy_within(row * oldw..(row + 1) * oldw, row * neww);
        image[row * neww + oldw] = image[row * neww];
        image[row * neww + oldw + 1] = image[row * neww + 1];
    }
}

/// The inverse of [`open_real_rows`]: strip the redundant complex
/// element from the end of each row and zero the freed floats at the end
/// of the array.
fn close_real_rows(image: &mut [f32], adim: usize, bdim: usize) {
    let oldw = 2 * (adim + 1);
    let neww = 2 * adim;
    for row in 1..bdim {
        image.copy_within(row * oldw..row * oldw + neww, row * neww);
    }
    for v in &mut image[neww * bdim..oldw * bdim] {
        *v = 0.0;
    }
}

/// Apply the phase shift of the shift theorem to a full complex array,
/// moving the centre of its Fourier transform between element (0,0) and
/// element (adim/2, bdim/2). The shift works out as multiplication by
/// -1 wherever the sum of the pixel indices is odd, so applying the
/// shift twice is an exact identity.
pub fn fft_shift(image: &mut [f32], adim: usize, bdim: usize) {
    for ib in 0..bdim {
        let row = ib * 2 * adim;
        let mut ia = 1 - ib % 2;
        while ia < adim {
            let p = row + 2 * ia;
            image[p] = -image[p];
            image[p + 1] = -image[p + 1];
            ia += 2;
        }
    }
}

/// The counterpart of [`fft_shift`] for the half conjugate-symmetric UV
/// layout consumed by the inverse real transform: because of the extra
/// complex column on the first dimension, only every other complex
/// element across the whole array changes sign.
pub fn cnj_shift(image: &mut [f32], adim: usize, bdim: usize) {
    let ncomplex = bdim * (adim + 2) / 2;
    let mut c = 1;
    while c < ncomplex {
        image[2 * c] = -image[2 * c];
        image[2 * c + 1] = -image[2 * c + 1];
        c += 2;
    }
}

/// Discrete cosine transform from a pseudo-continuous half-function of
/// `inparr.len()` samples spanning `inwid` grid cells, into `outarr`.
/// The zero of the output is shifted to element `outarr.len()/2` and the
/// first half of the even transform is mirrored into the second half.
/// Trig recurrences increment the cosine in the inner loop.
pub fn costran(inparr: &[f32], inwid: f32, outarr: &mut [f32]) {
    let ninp = inparr.len();
    let nout = outarr.len();
    let icent = nout / 2;
    // The 2.pi.u factor for the cosine.
    let theta = TAU * f64::from(inwid) / ninp as f64 / nout as f64;
    for (out, slot) in outarr.iter_mut().enumerate().take(icent + 1) {
        let ang = theta * (out as f64 - icent as f64);
        let (sininc, cosinc) = ang.sin_cos();
        let mut newcos = 1.0f64;
        let mut newsin = 0.0f64;
        let mut sum = 0.0f32;
        for &inp in inparr {
            sum += inp * newcos as f32;
            let wtmp = newcos;
            newcos = wtmp * cosinc - newsin * sininc;
            newsin = wtmp * sininc + newsin * cosinc;
        }
        *slot = sum;
    }
    // Mirror the first half into the second half.
    for j in 0..icent.saturating_sub(1) {
        outarr[icent + 1 + j] = outarr[icent - 1 - j];
    }
}

/// Round a float to the nearest integer, halves away from zero.
pub fn fnint(fval: f32) -> i64 {
    if fval >= 0.0 {
        (fval + 0.5) as i64
    } else {
        (fval - 0.5) as i64
    }
}

/// Round a double to the nearest integer, halves away from zero.
pub fn dnint(dval: f64) -> i64 {
    if dval >= 0.0 {
        (dval + 0.5) as i64
    } else {
        (dval - 0.5) as i64
    }
}

/// Find the min and max values of a 1-D array. An empty slice returns
/// (0, 0).
pub fn frange(vec: &[f32]) -> (f32, f32) {
    let mut iter = vec.iter();
    let first = match iter.next() {
        Some(&v) => v,
        None => return (0.0, 0.0),
    };
    iter.fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Find the min and max values in a patch of a 2-D array of `xdim` by
/// `ydim` elements. The patch bounds are swapped and clamped to the
/// array as needed.
pub fn imran(
    map: &[f32],
    xdim: usize,
    ydim: usize,
    xa: usize,
    xb: usize,
    ya: usize,
    yb: usize,
) -> (f32, f32) {
    let (mut xa, mut xb) = if xa <= xb { (xa, xb) } else { (xb, xa) };
    let (mut ya, mut yb) = if ya <= yb { (ya, yb) } else { (yb, ya) };
    xa = xa.min(xdim - 1);
    xb = xb.min(xdim - 1);
    ya = ya.min(ydim - 1);
    yb = yb.min(ydim - 1);

    let mut vmin = map[xa + ya * xdim];
    let mut vmax = vmin;
    for iy in ya..=yb {
        for &v in &map[xa + iy * xdim..=xb + iy * xdim] {
            vmin = vmin.min(v);
            vmax = vmax.max(v);
        }
    }
    (vmin, vmax)
}

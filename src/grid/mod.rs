// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The map/beam grid container and its cached statistics.
//!
//! The map and beam are flat `f32` buffers of `(nx + 2) * ny` elements.
//! The extra two floats per row accommodate the in-place half-complex
//! FFT packing of a conjugate-symmetric row of `nx/2 + 1` complex
//! values, so the same buffer is addressed with row stride `nx + 2`
//! while it holds UV data and with row stride `nx` (in its first
//! `nx * ny` floats) once it holds an image.

use log::debug;
use thiserror::Error;

use crate::math::{dnint, is_pow2};
use crate::obs::Observation;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum GridError {
    #[error("map grid size must be a power of 2 greater than 32 (got {nx} x {ny})")]
    BadGridSize { nx: usize, ny: usize },

    #[error("map cell size must be finite and positive (got {xinc} x {yinc} radians)")]
    BadCellSize { xinc: f64, yinc: f64 },

    #[error("insufficient memory for a map and beam of size {nx} x {ny}")]
    InsufficientMemory { nx: usize, ny: usize },
}

/// Details of a single map pixel, recorded for the extrema of the map.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MapPix {
    /// Pixel value \[Jy/beam\].
    pub value: f32,
    /// Array coordinate indexes of the pixel.
    pub ix: usize,
    pub iy: usize,
    /// Coordinates of the pixel wrt the map centre \[radians\].
    pub xpos: f64,
    pub ypos: f64,
    /// The projected right ascension and declination of the pixel.
    pub ra: f64,
    pub dec: f64,
}

/// The 2-D pixel bounds of the cleanable map area within the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapArea {
    pub ixmin: usize,
    pub ixmax: usize,
    pub iymin: usize,
    pub iymax: usize,
}

/// The uniform-weighting bin matrix. The array covers the +ve U half of
/// the conjugate-symmetric UV plane over U = 0..|Umax|/2,
/// V = -|Vmax|/2..|Vmax|/2; the factor of a half comes from the Nyquist
/// constraint that the UV plane be no more than half sampled.
#[derive(Clone, Debug)]
pub struct UvBin {
    /// nu * nv bin counts.
    pub bins: Vec<i32>,
    pub nu: usize,
    pub nv: usize,
    /// Conversion factor from U (wavelengths) to a bin index; 0 for
    /// natural weighting.
    pub utopix: f64,
    /// Conversion factor from V (wavelengths) to a bin index.
    pub vtopix: f64,
}

impl UvBin {
    fn new(nu: usize, nv: usize) -> UvBin {
        UvBin {
            bins: vec![0; nu * nv],
            nu,
            nv,
            utopix: 0.0,
            vtopix: 0.0,
        }
    }

    /// Zero all bin counts.
    pub fn clear(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0);
    }

    /// The flat bin index for a (U, V) position in wavelengths, or None
    /// if the position falls outside the array. Positions in the
    /// unbinned +ve U half-plane are folded onto their conjugate
    /// mirror.
    pub fn cell(&self, uu: f64, vv: f64) -> Option<usize> {
        let (uu, vv) = if uu >= 0.0 { (-uu, -vv) } else { (uu, vv) };
        let binpix = self.nu as i64 * (self.nv as i64 / 2 + dnint(vv * self.vtopix))
            + dnint(uu * self.utopix);
        if binpix >= 0 && (binpix as usize) < self.bins.len() {
            Some(binpix as usize)
        } else {
            None
        }
    }

    /// Increment the bin holding (uu, vv), if there is one.
    pub fn bump(&mut self, uu: f64, vv: f64) {
        if let Some(i) = self.cell(uu, vv) {
            self.bins[i] += 1;
        }
    }

    /// The count in the bin holding (uu, vv), or 0.
    pub fn count(&self, uu: f64, vv: f64) -> i32 {
        self.cell(uu, vv).map_or(0, |i| self.bins[i])
    }
}

/// The container of a map and its associated dirty beam, together with
/// the cell geometry, the gridding-kernel transforms, the uniform
/// weighting bins and the cached map statistics.
#[derive(Clone, Debug)]
pub struct MapBeam {
    /// Map array of (nx + 2) * ny floats.
    pub map: Vec<f32>,
    /// Beam array of (nx + 2) * ny floats.
    pub beam: Vec<f32>,
    nx: usize,
    ny: usize,
    xinc: f64,
    yinc: f64,
    uinc: f64,
    vinc: f64,
    /// Details of the max valued pixel in the map.
    pub maxpix: MapPix,
    /// Details of the min valued pixel in the map.
    pub minpix: MapPix,
    /// RMS flux in the map \[Jy/beam\].
    pub maprms: f32,
    /// Mean flux in the map \[Jy/beam\].
    pub mapmean: f32,
    /// Total flux in the map \[Jy\].
    pub mapflux: f32,
    /// The rms of the map noise predicted from the weights.
    pub noise: f32,
    /// True while the map is out of date wrt the UV data.
    pub domap: bool,
    /// True while the beam is out of date wrt the UV data.
    pub dobeam: bool,
    /// The number of model components restored into the map; 0 marks a
    /// residual map.
    pub ncmp: usize,
    /// The restoring beam last used \[radians\].
    pub bmin: f64,
    pub bmaj: f64,
    pub bpa: f64,
    /// The elliptical beam estimated from the gridding weights
    /// \[radians\].
    pub e_bmin: f64,
    pub e_bmaj: f64,
    pub e_bpa: f64,
    /// Normalized reciprocal Fourier transform of the X-axis gridding
    /// convolution function (nx + 1 slots, nx used).
    pub rxft: Vec<f32>,
    /// The same along the Y axis (ny + 1 slots, ny used).
    pub ryft: Vec<f32>,
    area: MapArea,
    /// Uniform-weighting bin matrix.
    pub bin: UvBin,
}

fn grid_vec(n: usize, nx: usize, ny: usize) -> Result<Vec<f32>, GridError> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| GridError::InsufficientMemory { nx, ny })?;
    v.resize(n, 0.0);
    Ok(v)
}

impl MapBeam {
    /// Allocate a map/beam container for an `nx` by `ny` grid of cells
    /// of `xinc` by `yinc` radians. Both dimensions must be powers of
    /// two greater than 32.
    pub fn new(nx: usize, xinc: f64, ny: usize, yinc: f64) -> Result<MapBeam, GridError> {
        if nx <= 32 || !is_pow2(nx) || ny <= 32 || !is_pow2(ny) {
            return Err(GridError::BadGridSize { nx, ny });
        }
        if xinc <= 0.0 || yinc <= 0.0 || !xinc.is_finite() || !yinc.is_finite() {
            return Err(GridError::BadCellSize { xinc, yinc });
        }

        debug!("Allocating a new {nx} x {ny} map and beam");
        let n = (nx + 2) * ny;
        let mut mb = MapBeam {
            map: grid_vec(n, nx, ny)?,
            beam: grid_vec(n, nx, ny)?,
            nx,
            ny,
            xinc,
            yinc,
            uinc: 0.0,
            vinc: 0.0,
            maxpix: MapPix::default(),
            minpix: MapPix::default(),
            maprms: 0.0,
            mapmean: 0.0,
            mapflux: 0.0,
            noise: 0.0,
            domap: true,
            dobeam: true,
            ncmp: 0,
            bmin: 0.0,
            bmaj: 0.0,
            bpa: 0.0,
            e_bmin: 0.0,
            e_bmaj: 0.0,
            e_bpa: 0.0,
            rxft: grid_vec(nx + 1, nx, ny)?,
            ryft: grid_vec(ny + 1, nx, ny)?,
            area: MapArea {
                ixmin: 0,
                ixmax: 0,
                iymin: 0,
                iymax: 0,
            },
            bin: UvBin::new(nx / 4, ny / 2),
        };
        mb.install(nx, xinc, ny, yinc);
        Ok(mb)
    }

    /// Reconfigure an existing container. The grid buffers are reused
    /// when the dimensions are unchanged and reallocated otherwise; in
    /// both cases the grids are zeroed and the cached statistics and
    /// beam records reset.
    pub fn resize(&mut self, nx: usize, xinc: f64, ny: usize, yinc: f64) -> Result<(), GridError> {
        if nx != self.nx || ny != self.ny {
            *self = MapBeam::new(nx, xinc, ny, yinc)?;
            return Ok(());
        }
        if xinc <= 0.0 || yinc <= 0.0 || !xinc.is_finite() || !yinc.is_finite() {
            return Err(GridError::BadCellSize { xinc, yinc });
        }
        self.map.iter_mut().for_each(|v| *v = 0.0);
        self.beam.iter_mut().for_each(|v| *v = 0.0);
        self.install(nx, xinc, ny, yinc);
        Ok(())
    }

    fn install(&mut self, nx: usize, xinc: f64, ny: usize, yinc: f64) {
        self.nx = nx;
        self.ny = ny;
        self.xinc = xinc;
        self.yinc = yinc;
        self.uinc = 1.0 / (xinc * nx as f64);
        self.vinc = 1.0 / (yinc * ny as f64);
        self.maxpix = MapPix::default();
        self.minpix = MapPix::default();
        self.maprms = 0.0;
        self.mapmean = 0.0;
        self.mapflux = 0.0;
        self.noise = 0.0;
        self.ncmp = 0;
        self.domap = true;
        self.dobeam = true;
        self.bmin = 0.0;
        self.bmaj = 0.0;
        self.bpa = 0.0;
        self.e_bmin = 0.0;
        self.e_bmaj = 0.0;
        self.e_bpa = 0.0;
        self.area = MapArea {
            ixmin: nx / 4,
            ixmax: nx - nx / 4 - 1,
            iymin: ny / 4,
            iymax: ny - ny / 4 - 1,
        };
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Map cell size along X \[radians\].
    pub fn xinc(&self) -> f64 {
        self.xinc
    }

    /// Map cell size along Y \[radians\].
    pub fn yinc(&self) -> f64 {
        self.yinc
    }

    /// UV grid cell size along U \[wavelengths\].
    pub fn uinc(&self) -> f64 {
        self.uinc
    }

    /// UV grid cell size along V \[wavelengths\].
    pub fn vinc(&self) -> f64 {
        self.vinc
    }

    /// The pixel bounds of the cleanable inner quarter of the grid.
    pub fn area(&self) -> MapArea {
        self.area
    }

    /// The offset of the map/beam centre pixel in image-plane (row
    /// stride nx) addressing.
    pub fn centre(&self) -> usize {
        self.nx / 2 + self.nx * self.ny / 2
    }

    /// Convert a map x coordinate (radians, wrt the map centre) to the
    /// X index of the nearest pixel.
    pub fn x_coord_to_pixel(&self, x: f64) -> i64 {
        self.nx as i64 / 2 + (x / self.xinc + 0.5).floor() as i64
    }

    /// Convert a map y coordinate (radians) to the Y index of the
    /// nearest pixel.
    pub fn y_coord_to_pixel(&self, y: f64) -> i64 {
        self.ny as i64 / 2 + (y / self.yinc + 0.5).floor() as i64
    }

    /// Convert a map-array X index to the x coordinate of the pixel
    /// (radians, wrt the map centre).
    pub fn x_pixel_to_coord(&self, ix: usize) -> f64 {
        (ix as f64 - (self.nx / 2) as f64) * self.xinc
    }

    /// Convert a map-array Y index to the y coordinate of the pixel.
    pub fn y_pixel_to_coord(&self, iy: usize) -> f64 {
        (iy as f64 - (self.ny / 2) as f64) * self.yinc
    }

    /// Determine the statistics of the cleanable part of the map and
    /// cache them. Call this whenever the map has been changed.
    pub fn stats(&mut self, obs: &Observation) {
        let MapArea {
            ixmin: xa,
            ixmax: xb,
            iymin: ya,
            iymax: yb,
        } = self.area;
        let nx = self.nx;

        let mut pmin = MapPix {
            value: self.map[xa + ya * nx],
            ix: xa,
            iy: ya,
            ..MapPix::default()
        };
        let mut pmax = pmin;

        // Min/max and the running mean flux in one sweep.
        let mut mean_flux = 0.0f32;
        let mut nsum = 0usize;
        for iy in ya..=yb {
            let row = &self.map[xa + iy * nx..=xb + iy * nx];
            for (i, &value) in row.iter().enumerate() {
                if value > pmax.value {
                    pmax.value = value;
                    pmax.ix = xa + i;
                    pmax.iy = iy;
                } else if value < pmin.value {
                    pmin.value = value;
                    pmin.ix = xa + i;
                    pmin.iy = iy;
                }
                nsum += 1;
                mean_flux += (value - mean_flux) / nsum as f32;
            }
        }

        // Second sweep for the mean square offset from the mean flux.
        let mut mean_sqr = 0.0f32;
        let mut n2 = 0usize;
        for iy in ya..=yb {
            for &value in &self.map[xa + iy * nx..=xb + iy * nx] {
                let off = value - mean_flux;
                n2 += 1;
                mean_sqr += (off * off - mean_sqr) / n2 as f32;
            }
        }

        for pix in [&mut pmin, &mut pmax] {
            pix.xpos = (pix.ix as f64 - (nx / 2) as f64) * self.xinc;
            pix.ypos = (pix.iy as f64 - (self.ny / 2) as f64) * self.yinc;
            let (ra, dec) = obs.pixel_radec(pix.xpos, pix.ypos);
            pix.ra = ra;
            pix.dec = dec;
        }

        self.minpix = pmin;
        self.maxpix = pmax;
        self.maprms = mean_sqr.sqrt();
        self.mapmean = mean_flux;
        self.mapflux = mean_flux * nsum as f32;
    }
}

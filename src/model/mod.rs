// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sky-model component lists. CLEAN appends delta components here;
//! restoration and the model-visibility predictor read them back.

use crate::windows::Mapwin;

/// Model component types. CLEAN and restoration only handle the first
/// two; the rarer shapes are carried through untouched and skipped with
/// a warning where they cannot be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpType {
    /// A point source.
    Delta,
    /// An elliptical Gaussian.
    Gaussian,
    /// A uniformly bright disk.
    Disk,
    /// A thin ring.
    Ring,
}

/// A single model component.
#[derive(Clone, Copy, Debug)]
pub struct Modcmp {
    /// The component shape.
    pub ctype: CmpType,
    /// Integrated flux \[Jy\].
    pub flux: f32,
    /// Position relative to the map centre \[radians\].
    pub x: f32,
    /// Position relative to the map centre \[radians\].
    pub y: f32,
    /// Major axis FWHM \[radians\] (unused for deltas).
    pub major: f32,
    /// Minor/major axial ratio in [0, 1].
    pub ratio: f32,
    /// Major axis position angle \[radians\].
    pub phi: f32,
    /// Reference frequency for the spectral index \[Hz\].
    pub freq0: f64,
    /// Spectral index; 0 disables the spectral term.
    pub spcind: f32,
    /// True if the component may be varied by model fitting.
    pub freepar: bool,
}

impl Modcmp {
    /// A delta component at (x, y) radians with the given flux.
    pub fn delta(flux: f32, x: f32, y: f32) -> Modcmp {
        Modcmp {
            ctype: CmpType::Delta,
            flux,
            x,
            y,
            major: 0.0,
            ratio: 0.0,
            phi: 0.0,
            freq0: 0.0,
            spcind: 0.0,
            freepar: false,
        }
    }
}

/// An ordered list of model components.
#[derive(Clone, Debug, Default)]
pub struct Model {
    cmps: Vec<Modcmp>,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    pub fn ncmp(&self) -> usize {
        self.cmps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmps.is_empty()
    }

    pub fn components(&self) -> &[Modcmp] {
        &self.cmps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Modcmp> {
        self.cmps.iter()
    }

    /// The sum of the component fluxes \[Jy\].
    pub fn total_flux(&self) -> f64 {
        self.cmps.iter().map(|c| f64::from(c.flux)).sum()
    }

    /// Append a component. With `compress`, a delta component is merged
    /// into an existing delta at exactly the same position instead of
    /// being appended.
    pub fn add_cmp(&mut self, cmp: Modcmp, compress: bool) {
        if compress && cmp.ctype == CmpType::Delta {
            if let Some(old) = self
                .cmps
                .iter_mut()
                .find(|c| c.ctype == CmpType::Delta && c.x == cmp.x && c.y == cmp.y)
            {
                old.flux += cmp.flux;
                return;
            }
        }
        self.cmps.push(cmp);
    }

    /// Move every component of `other` into this model.
    pub fn absorb(&mut self, other: &mut Model, compress: bool) {
        for cmp in other.cmps.drain(..) {
            self.add_cmp(cmp, compress);
        }
    }

    /// Split this model in two: components that lie inside at least one
    /// window are moved into the returned model, components outside all
    /// windows stay behind.
    pub fn split_by_windows(&mut self, wins: &Mapwin, compress: bool) -> Model {
        let mut inside = Model::new();
        let mut i = 0;
        while i < self.cmps.len() {
            if wins.contains(f64::from(self.cmps[i].x), f64::from(self.cmps[i].y)) {
                let cmp = self.cmps.remove(i);
                inside.add_cmp(cmp, compress);
            } else {
                i += 1;
            }
        }
        inside
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ellipse geometry shared by the beam estimator and the CLEAN window
//! code.

use crate::constants::FRAC_PI_2;

/// How much of an ellipse must fall inside a rectangle for
/// [`Ellipse::visible`] to report it visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElState {
    /// Fully inside the rectangle.
    Full,
    /// At least partially inside the rectangle.
    Part,
    /// The centre is inside the rectangle.
    Cent,
}

/// An ellipse described by its axis diameters, the clockwise angle of
/// the major axis from the +Y axis, and its centre. The bounding
/// rectangle half-extents are cached at construction.
#[derive(Clone, Copy, Debug)]
pub struct Ellipse {
    /// Minor axis diameter (world coordinates).
    pub minor: f64,
    /// Major axis diameter (world coordinates).
    pub major: f64,
    /// Major axis position angle, clockwise wrt the +Y axis (radians).
    pub pa: f64,
    /// The X coordinate of the centre.
    pub xc: f64,
    /// The Y coordinate of the centre.
    pub yc: f64,
    /// X-axis extent of the rectangular area enclosing the ellipse.
    pub xwid: f64,
    /// Y-axis extent of the rectangular area enclosing the ellipse.
    pub ywid: f64,
}

impl Ellipse {
    /// Build an ellipse. Negative axis extents are made positive, and
    /// major/minor are swapped (with a pi/2 position-angle adjustment)
    /// if given in the wrong order.
    pub fn new(minor: f64, major: f64, pa: f64, xc: f64, yc: f64) -> Ellipse {
        let minor = minor.abs();
        let major = major.abs();
        let (minor, major, pa) = if major >= minor {
            (minor, major, pa)
        } else {
            (major, minor, pa - FRAC_PI_2)
        };

        let mut el = Ellipse {
            minor,
            major,
            pa,
            xc,
            yc,
            xwid: 0.0,
            ywid: 0.0,
        };

        // The maximum X extent is at the clockwise angle
        // xang = atan(minor/major/tan(pa)); that expression overflows
        // near 0 and pi/2, so handle those angles first.
        let xang = if el.pa.abs() < 0.01 || el.major == 0.0 {
            FRAC_PI_2
        } else if (el.pa.abs() - FRAC_PI_2).abs() < 0.01 {
            0.0
        } else {
            ((1.0 / el.pa.tan()) * el.minor / el.major).atan()
        };
        let (x, _) = el.locus(xang);
        el.xwid = 2.0 * (x - el.xc).abs();

        // The maximum Y extent is at yang = -atan(minor/major*tan(pa)).
        let yang = if (el.pa.abs() - FRAC_PI_2).abs() < 0.01 || el.major == 0.0 {
            -FRAC_PI_2
        } else {
            -(el.pa.tan() * el.minor / el.major).atan()
        };
        let (_, y) = el.locus(yang);
        el.ywid = 2.0 * (y - el.yc).abs();

        el
    }

    /// Move the ellipse to a new centre, keeping its shape.
    pub fn move_to(&mut self, xc: f64, yc: f64) {
        self.xc = xc;
        self.yc = yc;
    }

    /// The (x, y) position on the ellipse at clockwise polar angle
    /// `theta` measured from the +Y axis (radians).
    pub fn locus(&self, theta: f64) -> (f64, f64) {
        let minax = self.minor * theta.sin() / 2.0;
        let majax = self.major * theta.cos() / 2.0;
        let sinpa = self.pa.sin();
        let cospa = self.pa.cos();
        (
            self.xc + minax * cospa + majax * sinpa,
            self.yc + majax * cospa - minax * sinpa,
        )
    }

    /// Report whether the ellipse lies sufficiently within the rectangle
    /// spanned by (`xa`, `ya`) and (`xb`, `yb`), using the cached
    /// bounding rectangle. The edge arguments may be given in either
    /// order.
    pub fn visible(&self, xa: f64, xb: f64, ya: f64, yb: f64, state: ElState) -> bool {
        let (xa, xb) = if xa <= xb { (xa, xb) } else { (xb, xa) };
        let (ya, yb) = if ya <= yb { (ya, yb) } else { (yb, ya) };

        let exa = self.xc - self.xwid / 2.0;
        let exb = exa + self.xwid;
        let eya = self.yc - self.ywid / 2.0;
        let eyb = eya + self.ywid;

        match state {
            ElState::Full => (exa >= xa && exb <= xb) && (eya >= ya && eyb <= yb),
            ElState::Part => !((exb < xa || exa > xb) || (eyb < ya || eya > yb)),
            // TODO: decide whether the centre test should also compare
            // yc against ya..yb; window selection has only ever
            // filtered on x here.
            ElState::Cent => (self.xc >= xa && self.xc <= xb) && (self.xc >= xa && self.xc <= xb),
        }
    }
}

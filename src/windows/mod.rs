// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rectangular CLEAN windows and their pixel-range arithmetic.

use log::info;
use thiserror::Error;

use crate::constants::{PI, RAD_TO_MAS};
use crate::ellipse::Ellipse;
use crate::grid::MapBeam;
use crate::math::{fnint, imran};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    #[error("the map and/or beam is out of date; re-invert before windowing the peak")]
    StaleMap,
}

/// A rectangular window in map coordinates. Construction normalises the
/// bounds so that `xmin <= xmax` and `ymin <= ymax`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Subwin {
    /// Window X-axis limits \[radians\].
    pub xmin: f64,
    pub xmax: f64,
    /// Window Y-axis limits \[radians\].
    pub ymin: f64,
    pub ymax: f64,
}

impl Subwin {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Subwin {
        let (xmin, xmax) = if xmin < xmax { (xmin, xmax) } else { (xmax, xmin) };
        let (ymin, ymax) = if ymin < ymax { (ymin, ymax) } else { (ymax, ymin) };
        Subwin {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    pub fn contains(&self, xpos: f64, ypos: f64) -> bool {
        xpos >= self.xmin && xpos <= self.xmax && ypos >= self.ymin && ypos <= self.ymax
    }
}

/// The pixel limits of a window within a grid area.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Winran {
    pub xa: usize,
    pub xb: usize,
    pub ya: usize,
    pub yb: usize,
}

/// An ordered list of CLEAN windows.
#[derive(Clone, Debug, Default)]
pub struct Mapwin {
    wins: Vec<Subwin>,
}

impl Mapwin {
    pub fn new() -> Mapwin {
        Mapwin::default()
    }

    pub fn nwin(&self) -> usize {
        self.wins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wins.is_empty()
    }

    pub fn windows(&self) -> &[Subwin] {
        &self.wins
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subwin> {
        self.wins.iter()
    }

    /// Append a window, normalising its bounds.
    pub fn add(&mut self, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> &Subwin {
        self.wins.push(Subwin::new(xmin, xmax, ymin, ymax));
        self.wins.last().unwrap()
    }

    /// Remove and return the window at `index`, or None if out of
    /// range.
    pub fn remove(&mut self, index: usize) -> Option<Subwin> {
        if index < self.wins.len() {
            Some(self.wins.remove(index))
        } else {
            None
        }
    }

    /// Is the given position inside one or more windows?
    pub fn contains(&self, xpos: f64, ypos: f64) -> bool {
        self.wins.iter().any(|w| w.contains(xpos, ypos))
    }

    /// Shift every window east and north by the given distances
    /// (radians).
    pub fn shift(&mut self, east: f64, north: f64) {
        for win in &mut self.wins {
            win.xmin += east;
            win.xmax += east;
            win.ymin += north;
            win.ymax += north;
        }
    }
}

/// The pixel limits of `win` within the given area of the map grid, or
/// None when every window edge lies outside the area.
///
/// The conversion encloses exactly the pixels whose centres lie inside
/// the window. When a window narrower than half a pixel would otherwise
/// produce an empty range, both limits are set to the pixel nearest the
/// window's midpoint.
pub fn win_pix(
    win: &Subwin,
    mb: &MapBeam,
    ixmin: usize,
    ixmax: usize,
    iymin: usize,
    iymax: usize,
) -> Option<Winran> {
    let xcent = mb.nx() as i64 / 2;
    let ycent = mb.ny() as i64 / 2;

    // Window bounds in fractional pixels wrt the map centre.
    let wxa = (win.xmin / mb.xinc()) as f32;
    let wxb = (win.xmax / mb.xinc()) as f32;
    let wya = (win.ymin / mb.yinc()) as f32;
    let wyb = (win.ymax / mb.yinc()) as f32;

    // Enclose only pixels whose centres are inside the window.
    let mut xa = xcent + (wxa + if wxa < 0.0 { 0.0 } else { 1.0 }) as i64;
    let mut xb = xcent + (wxb - if wxb < 0.0 { 1.0 } else { 0.0 }) as i64;
    let mut ya = ycent + (wya + if wya < 0.0 { 0.0 } else { 1.0 }) as i64;
    let mut yb = ycent + (wyb - if wyb < 0.0 { 1.0 } else { 0.0 }) as i64;

    // A collapsed range means the bounds were less than half a pixel
    // apart; use the pixel nearest the midpoint.
    if xa > xb {
        xa = xcent + fnint((wxa + wxb) / 2.0);
        xb = xa;
    }
    if ya > yb {
        ya = ycent + fnint((wya + wyb) / 2.0);
        yb = ya;
    }

    let (ixmin, ixmax) = (ixmin as i64, ixmax as i64);
    let (iymin, iymax) = (iymin as i64, iymax as i64);

    // Reject windows wholly outside the area.
    if (xa < ixmin && xb < ixmin)
        || (xa > ixmax && xb > ixmax)
        || (ya < iymin && yb < iymin)
        || (ya > iymax && yb > iymax)
    {
        return None;
    }

    Some(Winran {
        xa: xa.max(ixmin) as usize,
        xb: xb.min(ixmax) as usize,
        ya: ya.max(iymin) as usize,
        yb: yb.min(iymax) as usize,
    })
}

/// If the recorded map peak is not already enclosed by any window,
/// append a new window centred on the peak, sized by the estimated
/// clean beam's bounding rectangle scaled by `size`. With `doabs` the
/// peak is the pixel of largest absolute value, otherwise the most
/// positive pixel.
pub fn peakwin(mb: &MapBeam, mw: &mut Mapwin, size: f64, doabs: bool) -> Result<(), WindowError> {
    // The recorded peak and estimated beam are only meaningful while
    // the map and beam are up to date.
    if mb.domap || mb.dobeam {
        return Err(WindowError::StaleMap);
    }

    let (xpos, ypos) = if doabs && mb.minpix.value.abs() > mb.maxpix.value.abs() {
        (mb.minpix.xpos, mb.minpix.ypos)
    } else {
        (mb.maxpix.xpos, mb.maxpix.ypos)
    };

    if !mw.contains(xpos, ypos) {
        let el = Ellipse::new(mb.e_bmin, mb.e_bmaj, mb.e_bpa, 0.0, 0.0);
        let size = size.abs();
        mw.add(
            xpos - size * el.xwid / 2.0,
            xpos + size * el.xwid / 2.0,
            ypos - size * el.ywid / 2.0,
            ypos + size * el.ywid / 2.0,
        );
        info!(
            "Added new window around map position ({:.3}, {:.3}) mas.",
            xpos * RAD_TO_MAS,
            ypos * RAD_TO_MAS
        );
    }
    Ok(())
}

/// Report the statistics of the map (or beam) pixels within each
/// window: mean, rms, min, max and, when the map has been restored,
/// total flux in Jy.
pub fn winstats(mb: &MapBeam, domap: bool, mw: &Mapwin) {
    let image = if domap { &mb.map } else { &mb.beam };
    let nx = mb.nx();
    let ny = mb.ny();

    let mut npts = 0usize;
    let mut flux = 0.0f64;
    let mut sum_sqr = 0.0f64;
    let mut fmin = 0.0f32;
    let mut fmax = 0.0f32;

    for win in mw.iter() {
        let wr = match win_pix(win, mb, 0, nx - 1, 0, ny - 1) {
            Some(wr) => wr,
            None => continue,
        };
        let (wmin, wmax) = imran(&image[..nx * ny], nx, ny, wr.xa, wr.xb, wr.ya, wr.yb);
        if npts == 0 {
            fmin = wmin;
            fmax = wmax;
        } else {
            fmin = fmin.min(wmin);
            fmax = fmax.max(wmax);
        }
        for iy in wr.ya..=wr.yb {
            for &v in &image[wr.xa + iy * nx..=wr.xb + iy * nx] {
                npts += 1;
                flux += f64::from(v);
                sum_sqr += f64::from(v) * f64::from(v);
            }
        }
    }

    if npts != 0 {
        if mb.ncmp > 0 {
            let beam_area =
                PI / (4.0 * 2.0f64.ln()) * mb.bmaj * mb.bmin / (mb.xinc() * mb.yinc());
            info!("Total flux={:.6} Jy", flux / beam_area);
        }
        info!(
            "Mean={:.6}  rms={:.6}  min={:.6}  max={:.6} Jy/beam",
            flux / npts as f64,
            (sum_sqr / npts as f64).sqrt(),
            fmin,
            fmax
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map() -> MapBeam {
        MapBeam::new(64, 1e-8, 64, 1e-8).unwrap()
    }

    #[test]
    fn add_normalises_bounds_and_contains_works() {
        let mut mw = Mapwin::new();
        mw.add(2.0, -1.0, 5.0, 3.0);
        let win = mw.windows()[0];
        assert_eq!(win, Subwin::new(-1.0, 2.0, 3.0, 5.0));
        assert!(mw.contains(0.0, 4.0));
        assert!(!mw.contains(0.0, 2.9));
        assert!(!mw.contains(2.1, 4.0));

        mw.shift(1.0, -1.0);
        assert!(mw.contains(2.5, 3.0));
        assert_eq!(mw.remove(0), Some(Subwin::new(0.0, 3.0, 2.0, 4.0)));
        assert_eq!(mw.remove(0), None);
        assert!(mw.is_empty());
    }

    #[test]
    fn window_pixels_enclose_pixel_centres() {
        let mb = test_map();
        let xinc = mb.xinc();
        // A window from -2.5 to +2.5 pixels encloses pixels -2..=2
        // around the centre (32).
        let win = Subwin::new(-2.5 * xinc, 2.5 * xinc, -2.5 * xinc, 2.5 * xinc);
        let wr = win_pix(&win, &mb, 16, 47, 16, 47).unwrap();
        assert_eq!(
            wr,
            Winran {
                xa: 30,
                xb: 34,
                ya: 30,
                yb: 34,
            }
        );

        // Exactly one pixel: centres at integer pixel offsets.
        let win = Subwin::new(0.6 * xinc, 1.4 * xinc, -0.4 * xinc, 0.4 * xinc);
        let wr = win_pix(&win, &mb, 16, 47, 16, 47).unwrap();
        assert_eq!(
            wr,
            Winran {
                xa: 33,
                xb: 33,
                ya: 32,
                yb: 32,
            }
        );
    }

    #[test]
    fn collapsed_windows_use_the_nearest_pixel() {
        let mb = test_map();
        let xinc = mb.xinc();
        // Narrower than half a pixel, away from any pixel centre.
        let win = Subwin::new(1.3 * xinc, 1.4 * xinc, 1.3 * xinc, 1.4 * xinc);
        let wr = win_pix(&win, &mb, 16, 47, 16, 47).unwrap();
        assert_eq!(
            wr,
            Winran {
                xa: 33,
                xb: 33,
                ya: 33,
                yb: 33,
            }
        );
    }

    #[test]
    fn outside_windows_are_rejected_and_straddlers_clipped() {
        let mb = test_map();
        let xinc = mb.xinc();
        let win = Subwin::new(100.0 * xinc, 200.0 * xinc, 0.0, xinc);
        assert_eq!(win_pix(&win, &mb, 16, 47, 16, 47), None);

        // A window reaching past the area is clipped to it.
        let win = Subwin::new(10.0 * xinc, 100.0 * xinc, -100.0 * xinc, 0.0);
        let wr = win_pix(&win, &mb, 16, 47, 16, 47).unwrap();
        assert_eq!(
            wr,
            Winran {
                xa: 43,
                xb: 47,
                ya: 16,
                yb: 32,
            }
        );
    }

    #[test]
    fn peakwin_appends_a_beam_sized_window() {
        let obs = crate::obs::tests::tiny_obs();
        let mut mb = test_map();
        let nx = mb.nx();
        mb.map[40 + 40 * nx] = 3.0;
        mb.stats(&obs);
        mb.domap = false;
        mb.dobeam = false;
        mb.e_bmin = 2.0 * mb.xinc();
        mb.e_bmaj = 4.0 * mb.xinc();
        mb.e_bpa = 0.0;

        let mut mw = Mapwin::new();
        peakwin(&mb, &mut mw, 1.0, true).unwrap();
        assert_eq!(mw.nwin(), 1);
        assert!(mw.contains(mb.maxpix.xpos, mb.maxpix.ypos));

        // The peak is now windowed, so nothing further is added.
        peakwin(&mb, &mut mw, 1.0, true).unwrap();
        assert_eq!(mw.nwin(), 1);
    }

    #[test]
    fn winstats_tolerates_empty_and_offgrid_windows() {
        let mut mb = test_map();
        let nx = mb.nx();
        mb.map[32 + 32 * nx] = 2.0;

        let mut mw = Mapwin::new();
        winstats(&mb, true, &mw); // no windows: nothing to report
        mw.add(-3.0 * mb.xinc(), 3.0 * mb.xinc(), -3.0 * mb.xinc(), 3.0 * mb.xinc());
        mw.add(1.0, 2.0, 1.0, 2.0); // far off the grid
        winstats(&mb, true, &mw);
        winstats(&mb, false, &mw);
    }

    #[test]
    fn peakwin_requires_fresh_map_and_beam() {
        let mb = test_map();
        let mut mw = Mapwin::new();
        assert_eq!(peakwin(&mb, &mut mw, 1.0, true), Err(WindowError::StaleMap));
    }
}

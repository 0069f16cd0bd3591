use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geo_types::{LineString, MultiPolygon, Polygon};

use crate::classify::FeatureSet;
use crate::error::PipelineError;

/// Pixel value meaning "no feature covers this location".
pub const NODATA: u8 = 0;

// Upper bound on grid allocation; beyond this the run fails instead of
// attempting an unbounded allocation.
const MAX_GRID_PIXELS: u64 = 1 << 31;

/// Single-band classified grid. Row-major, row 0 is the northernmost row.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub width: u32,
    pub height: u32,
    /// West edge of column 0.
    pub origin_x: f64,
    /// North edge of row 0.
    pub origin_y: f64,
    /// Ground units per pixel, identical in both axes.
    pub resolution: f64,
    pub data: Vec<u8>,
}

impl RasterGrid {
    #[inline]
    pub fn get(&self, col: u32, row: u32) -> u8 {
        self.data[row as usize * self.width as usize + col as usize]
    }

    #[inline]
    fn paint(&mut self, col: i64, row: i64, class: u8) {
        if col < 0 || row < 0 || col >= self.width as i64 || row >= self.height as i64 {
            return;
        }

        // Unconditional overwrite: later features in merge order win at
        // every pixel both touch.
        self.data[row as usize * self.width as usize + col as usize] = class;
    }

    /// World coordinates -> continuous pixel coordinates (col, row).
    #[inline]
    fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.resolution,
            (self.origin_y - y) / self.resolution,
        )
    }
}

/// Burn the merged feature set into a fresh grid sized from its bounding
/// box. Features are painted in collection order with all-touched coverage;
/// every pixel a geometry touches at all receives its class id.
pub fn rasterize(set: &FeatureSet, resolution: f64) -> Result<RasterGrid, PipelineError> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(PipelineError::InvalidResolution(resolution));
    }

    let (min_x, min_y, max_x, max_y) = bounds(set)?;

    let width = ((max_x - min_x) / resolution).floor() as i64;
    let height = ((max_y - min_y) / resolution).floor() as i64;

    if width <= 0 || height <= 0 {
        return Err(PipelineError::InvalidExtent {
            width,
            height,
            min_x,
            min_y,
            max_x,
            max_y,
        });
    }

    let pixels = (width as u64)
        .checked_mul(height as u64)
        .unwrap_or(u64::MAX);
    if pixels > MAX_GRID_PIXELS {
        return Err(PipelineError::ResourceLimit {
            pixels,
            limit: MAX_GRID_PIXELS,
        });
    }

    let mut grid = RasterGrid {
        width: width as u32,
        height: height as u32,
        origin_x: min_x,
        origin_y: max_y,
        resolution,
        data: vec![NODATA; pixels as usize],
    };

    for feature in &set.features {
        burn_multipolygon(&mut grid, &feature.geometry, feature.class_id);
    }

    Ok(grid)
}

/// Axis-aligned bounding box over every geometry in the set.
fn bounds(set: &FeatureSet) -> Result<(f64, f64, f64, f64), PipelineError> {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

    for feature in &set.features {
        for polygon in &feature.geometry.0 {
            for ring in rings(polygon) {
                for coord in ring.coords() {
                    if coord.x.is_finite() && coord.y.is_finite() {
                        min_x = min_x.min(coord.x);
                        max_x = max_x.max(coord.x);
                        min_y = min_y.min(coord.y);
                        max_y = max_y.max(coord.y);
                    }
                }
            }
        }
    }

    if !min_x.is_finite() || !min_y.is_finite() {
        return Err(PipelineError::InvalidExtent {
            width: 0,
            height: 0,
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
        });
    }

    Ok((min_x, min_y, max_x, max_y))
}

fn rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors().iter())
}

fn burn_multipolygon(grid: &mut RasterGrid, geometry: &MultiPolygon<f64>, class: u8) {
    for polygon in &geometry.0 {
        burn_polygon(grid, polygon, class);
    }
}

fn burn_polygon(grid: &mut RasterGrid, polygon: &Polygon<f64>, class: u8) {
    let rings_px: Vec<Vec<(f64, f64)>> = rings(polygon)
        .map(|ring| {
            ring.coords()
                .map(|c| grid.to_pixel(c.x, c.y))
                .collect::<Vec<_>>()
        })
        .collect();

    // Interior first, then every ring edge; together these give all-touched
    // coverage: partial-coverage boundary pixels are painted even when the
    // geometry misses their centers.
    fill_interior(grid, &rings_px, class);

    for ring in &rings_px {
        for edge in ring.windows(2) {
            burn_edge(grid, edge[0], edge[1], class);
        }
    }
}

/// Scan the polygon's bounding rectangle and paint every pixel whose center
/// lies inside under the even-odd rule across all rings (holes excluded).
fn fill_interior(grid: &mut RasterGrid, rings_px: &[Vec<(f64, f64)>], class: u8) {
    let (mut xmin, mut ymin) = (f64::INFINITY, f64::INFINITY);
    let (mut xmax, mut ymax) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

    for ring in rings_px {
        for &(x, y) in ring {
            xmin = xmin.min(x);
            xmax = xmax.max(x);
            ymin = ymin.min(y);
            ymax = ymax.max(y);
        }
    }

    if !xmin.is_finite() {
        return;
    }

    let col_min = xmin.floor().max(0.0) as i64;
    let col_max = xmax.floor().min(grid.width as f64 - 1.0) as i64;
    let row_min = ymin.floor().max(0.0) as i64;
    let row_max = ymax.floor().min(grid.height as f64 - 1.0) as i64;

    if col_min > col_max || row_min > row_max {
        return;
    }

    for row in row_min..=row_max {
        for col in col_min..=col_max {
            let px = col as f64 + 0.5;
            let py = row as f64 + 0.5;

            if even_odd_inside(rings_px, px, py) {
                grid.paint(col, row, class);
            }
        }
    }
}

fn even_odd_inside(rings_px: &[Vec<(f64, f64)>], px: f64, py: f64) -> bool {
    let mut inside = false;

    for ring in rings_px {
        let n = ring.len();
        if n < 3 {
            continue;
        }

        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = ring[i];
            let (xj, yj) = ring[j];

            if (yi > py) != (yj > py) {
                let x_inter = (xj - xi) * (py - yi) / (yj - yi) + xi;
                if px < x_inter {
                    inside = !inside;
                }
            }

            j = i;
        }
    }

    inside
}

/// Paint every pixel whose cell square the edge segment intersects.
fn burn_edge(grid: &mut RasterGrid, (x0, y0): (f64, f64), (x1, y1): (f64, f64), class: u8) {
    let col_min = x0.min(x1).floor().max(0.0) as i64;
    let col_max = x0.max(x1).floor().min(grid.width as f64 - 1.0) as i64;
    let row_min = y0.min(y1).floor().max(0.0) as i64;
    let row_max = y0.max(y1).floor().min(grid.height as f64 - 1.0) as i64;

    if col_min > col_max || row_min > row_max {
        return;
    }

    for row in row_min..=row_max {
        for col in col_min..=col_max {
            if segment_touches_cell(x0, y0, x1, y1, col as f64, row as f64) {
                grid.paint(col, row, class);
            }
        }
    }
}

/// Liang-Barsky clip of the segment against the unit cell at (cx, cy);
/// a non-empty parameter range means the segment touches the cell.
fn segment_touches_cell(x0: f64, y0: f64, x1: f64, y1: f64, cx: f64, cy: f64) -> bool {
    let dx = x1 - x0;
    let dy = y1 - y0;

    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    let checks = [
        (-dx, x0 - cx),
        (dx, cx + 1.0 - x0),
        (-dy, y0 - cy),
        (dy, cy + 1.0 - y0),
    ];

    for (p, q) in checks {
        if p == 0.0 {
            // Parallel to this boundary; outside means no intersection.
            if q < 0.0 {
                return false;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return false;
                }
                if r > t0 {
                    t0 = r;
                }
            } else {
                if r < t0 {
                    return false;
                }
                if r < t1 {
                    t1 = r;
                }
            }
        }
    }

    true
}

/// Persist a grid as an LCR1 file (RLE band), creating parent directories.
pub fn write_lcr(path: &Path, grid: &RasterGrid, crs: Option<&str>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }

    let raster = lcr::LcrRaster {
        width: grid.width,
        height: grid.height,
        nodata: NODATA,
        resolution: grid.resolution,
        origin_x: grid.origin_x,
        origin_y: grid.origin_y,
        crs: crs.map(str::to_owned),
        encoding: lcr::LcrEncoding::Rle,
        data: lcr::rle_encode(&grid.data),
    };

    lcr::write_file(path, &raster).with_context(|| format!("cannot write {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifiedFeature;
    use geo_types::polygon;
    use serde_json::Map;

    fn rect(class_id: u8, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> ClassifiedFeature {
        ClassifiedFeature {
            geometry: MultiPolygon(vec![polygon![
                (x: min_x, y: min_y),
                (x: max_x, y: min_y),
                (x: max_x, y: max_y),
                (x: min_x, y: max_y),
                (x: min_x, y: min_y),
            ]]),
            source_code: "OT_PTZB_A".to_owned(),
            class_id,
            class_name: "Buildings",
            properties: Map::new(),
        }
    }

    fn set(features: Vec<ClassifiedFeature>) -> FeatureSet {
        FeatureSet {
            srs: Some("EPSG:2180".to_owned()),
            features,
        }
    }

    #[test]
    fn test_grid_sizing_floors() {
        let grid = rasterize(&set(vec![rect(1, 0.0, 0.0, 10.0, 7.5)]), 1.0).unwrap();
        assert_eq!(grid.width, 10);
        assert_eq!(grid.height, 7);
        assert_eq!(grid.origin_x, 0.0);
        assert_eq!(grid.origin_y, 7.5);
    }

    #[test]
    fn test_later_feature_wins() {
        let grid = rasterize(
            &set(vec![rect(5, 0.0, 0.0, 4.0, 4.0), rect(2, 1.0, 1.0, 3.0, 3.0)]),
            1.0,
        )
        .unwrap();

        // Pixel (1,1) covers world (1..2, 2..3): inside both, later wins.
        assert_eq!(grid.get(1, 1), 2);
        // Pixel (0,0) is touched only by the first feature.
        assert_eq!(grid.get(0, 0), 5);
    }

    #[test]
    fn test_all_touched_paints_centerless_pixels() {
        // A sliver along the top 0.1 ground units of the extent: it crosses
        // every pixel of row 0 without containing a single pixel center.
        let grid = rasterize(
            &set(vec![rect(1, 0.0, 0.0, 3.0, 2.0), rect(2, 0.0, 2.9, 3.0, 3.0)]),
            1.0,
        )
        .unwrap();

        for col in 0..grid.width {
            assert_eq!(grid.get(col, 0), 2, "row 0 col {col}");
        }
    }

    #[test]
    fn test_untouched_pixels_stay_nodata() {
        let grid = rasterize(
            &set(vec![rect(1, 0.0, 0.0, 1.0, 1.0), rect(7, 2.0, 2.0, 3.0, 3.0)]),
            1.0,
        )
        .unwrap();

        assert_eq!(grid.width, 3);
        assert_eq!(grid.height, 3);
        // Center pixel covers world (1..2, 1..2), touched by neither square.
        assert_eq!(grid.get(1, 1), NODATA);
        // South-west square paints the bottom-left pixel, north-east the
        // top-right one.
        assert_eq!(grid.get(0, 2), 1);
        assert_eq!(grid.get(2, 0), 7);
    }

    #[test]
    fn test_hole_interior_is_not_filled() {
        let mut feature = rect(3, 0.0, 0.0, 6.0, 6.0);
        feature.geometry = MultiPolygon(vec![Polygon::new(
            feature.geometry.0[0].exterior().clone(),
            vec![LineString::from(vec![
                (2.0, 2.0),
                (4.0, 2.0),
                (4.0, 4.0),
                (2.0, 4.0),
                (2.0, 2.0),
            ])],
        )]);

        let grid = rasterize(&set(vec![feature]), 1.0).unwrap();

        // Fully inside the hole, away from its boundary cells.
        assert_eq!(grid.get(3, 3), NODATA);
        // The hole boundary itself is part of the geometry and is painted.
        assert_eq!(grid.get(2, 2), 3);
        assert_eq!(grid.get(0, 0), 3);
    }

    #[test]
    fn test_degenerate_extent_is_fatal() {
        let err = rasterize(&set(vec![rect(1, 0.0, 0.0, 0.5, 0.5)]), 1.0);
        assert!(matches!(err, Err(PipelineError::InvalidExtent { .. })));
    }

    #[test]
    fn test_nonpositive_resolution_rejected() {
        let features = set(vec![rect(1, 0.0, 0.0, 4.0, 4.0)]);
        assert!(matches!(
            rasterize(&features, 0.0),
            Err(PipelineError::InvalidResolution(_))
        ));
        assert!(matches!(
            rasterize(&features, -1.0),
            Err(PipelineError::InvalidResolution(_))
        ));
    }

    #[test]
    fn test_resource_limit_guard() {
        let err = rasterize(&set(vec![rect(1, 0.0, 0.0, 1e6, 1e6)]), 0.001);
        assert!(matches!(err, Err(PipelineError::ResourceLimit { .. })));
    }

    #[test]
    fn test_rasterize_is_deterministic() {
        let features = set(vec![
            rect(5, 0.0, 0.0, 7.0, 5.0),
            rect(2, 1.5, 1.5, 3.5, 3.5),
            rect(7, 3.0, 0.5, 6.5, 2.0),
        ]);

        let a = rasterize(&features, 0.5).unwrap();
        let b = rasterize(&features, 0.5).unwrap();
        assert_eq!(a, b);
    }
}

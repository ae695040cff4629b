use crate::types::{CompositeError, CompositeResult, Point};

/// Default area-computation tolerance in map units
///
/// Vertices closer together than this are collapsed before area computation,
/// bounding the numerical error introduced by geometric simplification.
pub const DEFAULT_ERROR_MARGIN: f64 = 0.001;

/// Signed area of a polygon ring (shoelace formula)
///
/// Positive for counter-clockwise rings. The ring is open (no repeated
/// closing vertex).
pub fn signed_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let p = ring[i];
        let q = ring[(i + 1) % ring.len()];
        sum += p[0] * q[1] - q[0] * p[1];
    }
    sum / 2.0
}

/// Polygon area with an explicit error margin
///
/// Collapses near-duplicate vertices (closer than `error_margin`) and snaps
/// areas below `error_margin^2` to zero.
pub fn area(ring: &[Point], error_margin: f64) -> f64 {
    let simplified = simplify_ring(ring, error_margin);
    let a = signed_area(&simplified).abs();
    if a < error_margin * error_margin {
        0.0
    } else {
        a
    }
}

/// Drop consecutive vertices closer together than the margin
fn simplify_ring(ring: &[Point], error_margin: f64) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(ring.len());
    for &p in ring {
        match out.last() {
            Some(&last) if distance(last, p) < error_margin => {}
            _ => out.push(p),
        }
    }
    // first and last may also coincide within the margin
    if out.len() > 1 && distance(out[0], *out.last().unwrap()) < error_margin {
        out.pop();
    }
    out
}

fn distance(a: Point, b: Point) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Clip a subject polygon against a convex clip polygon (Sutherland-Hodgman)
///
/// The clip ring must be convex; the subject may be concave. Returns the
/// intersection ring, possibly empty.
pub fn clip_polygon(subject: &[Point], clip: &[Point]) -> Vec<Point> {
    if subject.len() < 3 || clip.len() < 3 {
        return Vec::new();
    }

    // orient the clip ring counter-clockwise so "inside" is a left turn
    let clip_ccw: Vec<Point> = if signed_area(clip) >= 0.0 {
        clip.to_vec()
    } else {
        clip.iter().rev().copied().collect()
    };

    let mut output: Vec<Point> = subject.to_vec();
    for i in 0..clip_ccw.len() {
        if output.is_empty() {
            break;
        }
        let a = clip_ccw[i];
        let b = clip_ccw[(i + 1) % clip_ccw.len()];

        let input = std::mem::take(&mut output);
        for j in 0..input.len() {
            let current = input[j];
            let previous = input[(j + input.len() - 1) % input.len()];
            let current_inside = cross(a, b, current) >= 0.0;
            let previous_inside = cross(a, b, previous) >= 0.0;

            if current_inside {
                if !previous_inside {
                    if let Some(p) = line_intersection(previous, current, a, b) {
                        output.push(p);
                    }
                }
                output.push(current);
            } else if previous_inside {
                if let Some(p) = line_intersection(previous, current, a, b) {
                    output.push(p);
                }
            }
        }
    }
    output
}

fn cross(a: Point, b: Point, p: Point) -> f64 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Intersection of segment p1-p2 with the infinite line a-b
fn line_intersection(p1: Point, p2: Point, a: Point, b: Point) -> Option<Point> {
    let d1 = [p2[0] - p1[0], p2[1] - p1[1]];
    let d2 = [b[0] - a[0], b[1] - a[1]];
    let denom = d1[0] * d2[1] - d1[1] * d2[0];
    if denom.abs() < f64::EPSILON {
        return None; // parallel
    }
    let t = ((a[0] - p1[0]) * d2[1] - (a[1] - p1[1]) * d2[0]) / denom;
    Some([p1[0] + t * d1[0], p1[1] + t * d1[1]])
}

/// Coverage fraction: area(footprint intersected with region) / area(region)
///
/// Pure geometric ratio, invariant to joint translation of both rings.
/// A zero-area region is rejected explicitly rather than dividing by zero.
pub fn coverage(
    footprint: &[Point],
    region_ring: &[Point],
    error_margin: f64,
) -> CompositeResult<f64> {
    let region_area = area(region_ring, error_margin);
    if region_area <= 0.0 {
        return Err(CompositeError::InvalidGeometry(
            "region has zero area".to_string(),
        ));
    }
    let intersection = clip_polygon(footprint, region_ring);
    let overlap = area(&intersection, error_margin);
    Ok((overlap / region_area).clamp(0.0, 1.0))
}

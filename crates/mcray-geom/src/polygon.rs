//! Point-in-polygon testing in facet (u, v) parameter space.
//!
//! Used at build time (centroid and outline checks) and on the hottest
//! intersection path: once per candidate whose (u, v, distance) solve
//! survived the bound checks.

use mcray_math::Point2;

/// Crossing-number containment test for a non-self-intersecting polygon.
///
/// Orientation-independent and valid for convex and concave outlines.
/// Every edge straddling the vertical line through `u` flips an up/down
/// counter by the side the query point falls on and a found counter;
/// the point is inside iff the two half-count parities disagree.
/// Allocation-free.
#[inline]
pub fn point_in_polygon(u: f64, v: f64, polygon: &[Point2]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut n_updown: i32 = 0;
    let mut n_found: u32 = 0;
    let n = polygon.len();

    for i in 0..n {
        let p1 = &polygon[i];
        let p2 = &polygon[(i + 1) % n];

        if (u < p1.x) != (u < p2.x) {
            let slope = (p2.y - p1.y) / (p2.x - p1.x);
            if (slope * u - v) < (slope * p1.x - p1.y) {
                n_updown += 1;
            } else {
                n_updown -= 1;
            }
            n_found += 1;
        }
    }

    let n_updown = n_updown.unsigned_abs();
    (((n_found / 2) & 1) ^ ((n_updown / 2) & 1)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point2> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ]
    }

    #[test]
    fn test_square_inside_outside() {
        let sq = square();
        assert!(point_in_polygon(0.5, 0.5, &sq));
        assert!(point_in_polygon(0.01, 0.99, &sq));
        assert!(!point_in_polygon(1.5, 0.5, &sq));
        assert!(!point_in_polygon(0.5, -0.5, &sq));
        assert!(!point_in_polygon(-0.1, 0.5, &sq));
        assert!(!point_in_polygon(0.5, 2.0, &sq));
    }

    #[test]
    fn test_orientation_independent() {
        let mut cw = square();
        cw.reverse();
        assert!(point_in_polygon(0.5, 0.5, &cw));
        assert!(!point_in_polygon(1.5, 0.5, &cw));
    }

    #[test]
    fn test_concave_l_shape() {
        let l_shape = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(0.0, 2.0),
        ];
        assert!(point_in_polygon(0.5, 0.5, &l_shape));
        assert!(point_in_polygon(1.5, 0.5, &l_shape));
        assert!(point_in_polygon(0.5, 1.5, &l_shape));
        // The notch
        assert!(!point_in_polygon(1.5, 1.5, &l_shape));
    }

    #[test]
    fn test_triangle() {
        let tri = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.5, 1.0),
        ];
        assert!(point_in_polygon(0.5, 0.3, &tri));
        assert!(!point_in_polygon(0.05, 0.9, &tri));
        assert!(!point_in_polygon(0.95, 0.9, &tri));
    }

    #[test]
    fn test_degenerate_polygon() {
        assert!(!point_in_polygon(0.5, 0.5, &[]));
        assert!(!point_in_polygon(
            0.5,
            0.5,
            &[Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)]
        ));
    }
}

// winding.rs — face polygons built by successive plane clipping

use crate::math::*;

const SIDE_FRONT: i32 = 0;
const SIDE_BACK: i32 = 1;
const SIDE_ON: i32 = 2;

/// Ordered polygon of vertices bounding one face of a brush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Winding {
    pub points: Vec<Vec3>,
}

impl Winding {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn area(&self) -> f64 {
        let mut total = 0.0;
        for i in 2..self.points.len() {
            let d1 = vector_subtract(&self.points[i - 1], &self.points[0]);
            let d2 = vector_subtract(&self.points[i], &self.points[0]);
            total += 0.5 * vector_length(&cross_product(&d1, &d2));
        }
        total
    }

    /// Clips the winding, keeping the part in front of the plane.
    /// Returns None when nothing (meaningful) survives.
    pub fn clip_front(&self, normal: &Vec3, dist: f64, epsilon: f64) -> Option<Winding> {
        let num = self.points.len();
        let mut dists = Vec::with_capacity(num + 1);
        let mut sides = Vec::with_capacity(num + 1);
        let mut counts = [0usize; 3];

        for p in &self.points {
            let d = dot_product(p, normal) - dist;
            dists.push(d);
            let side = if d > epsilon {
                SIDE_FRONT
            } else if d < -epsilon {
                SIDE_BACK
            } else {
                SIDE_ON
            };
            counts[side as usize] += 1;
            sides.push(side);
        }
        dists.push(dists[0]);
        sides.push(sides[0]);

        if counts[SIDE_FRONT as usize] == 0 {
            return None;
        }
        if counts[SIDE_BACK as usize] == 0 {
            return Some(self.clone());
        }

        let mut out = Winding::default();
        for i in 0..num {
            let p1 = &self.points[i];

            if sides[i] == SIDE_ON {
                out.points.push(*p1);
                continue;
            }
            if sides[i] == SIDE_FRONT {
                out.points.push(*p1);
            }
            if sides[i + 1] == SIDE_ON || sides[i + 1] == sides[i] {
                continue;
            }

            // generate the split point
            let p2 = &self.points[(i + 1) % num];
            let frac = dists[i] / (dists[i] - dists[i + 1]);
            let mut mid = [0.0; 3];
            for j in 0..3 {
                // avoid round-off when the plane is axial
                if normal[j] == 1.0 {
                    mid[j] = dist;
                } else if normal[j] == -1.0 {
                    mid[j] = -dist;
                } else {
                    mid[j] = p1[j] + frac * (p2[j] - p1[j]);
                }
            }
            out.points.push(mid);
        }

        if out.points.len() < 3 {
            return None;
        }
        Some(out)
    }
}

/// Builds the huge quad lying on the plane, to be whittled down by
/// clipping. `extent` must exceed any coordinate the map can contain.
pub fn base_winding_for_plane(normal: &Vec3, dist: f64, extent: f64) -> Winding {
    // find the major axis
    let mut max = -1.0;
    let mut x = usize::MAX;
    for i in 0..3 {
        if normal[i].abs() > max {
            max = normal[i].abs();
            x = i;
        }
    }

    let mut vup: Vec3 = if x == 2 { [1.0, 0.0, 0.0] } else { [0.0, 0.0, 1.0] };
    let v = dot_product(&vup, normal);
    vup = vector_ma(&vup, -v, normal);
    vector_normalize(&mut vup);

    let org = vector_scale(normal, dist);
    let mut vright = cross_product(&vup, normal);

    vup = vector_scale(&vup, extent);
    vright = vector_scale(&vright, extent);

    Winding {
        points: vec![
            vector_add(&vector_subtract(&org, &vright), &vup),
            vector_add(&vector_add(&org, &vright), &vup),
            vector_subtract(&vector_add(&org, &vright), &vup),
            vector_subtract(&vector_subtract(&org, &vright), &vup),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winding_area_with_colinear_point() {
        let w = Winding {
            points: vec![
                [0.0, 0.0, 0.0],
                [0.0, 32.0, 0.0], // colinear
                [0.0, 64.0, 0.0],
                [64.0, 64.0, 0.0],
                [64.0, 0.0, 0.0],
            ],
        };
        assert_eq!(w.area(), 64.0 * 64.0);
    }

    #[test]
    fn test_base_winding_lies_on_plane() {
        let normal = [0.0, 0.0, 1.0];
        let w = base_winding_for_plane(&normal, 32.0, 65536.0);
        assert_eq!(w.len(), 4);
        for p in &w.points {
            assert!((dot_product(p, &normal) - 32.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clip_to_unit_box() {
        // clip a +Z plane winding down to a 64x64 square
        let mut w = base_winding_for_plane(&[0.0, 0.0, 1.0], 0.0, 65536.0);
        for (normal, dist) in [
            ([1.0, 0.0, 0.0], 0.0),
            ([-1.0, 0.0, 0.0], -64.0),
            ([0.0, 1.0, 0.0], 0.0),
            ([0.0, -1.0, 0.0], -64.0),
        ] {
            w = w.clip_front(&normal, dist, 0.0).expect("winding vanished");
        }
        assert!((w.area() - 64.0 * 64.0).abs() < 1e-6);
    }

    #[test]
    fn test_clip_away_entirely() {
        let w = base_winding_for_plane(&[0.0, 0.0, 1.0], 0.0, 65536.0);
        assert!(w.clip_front(&[0.0, 0.0, 1.0], 1.0, 0.0).is_none());
    }
}

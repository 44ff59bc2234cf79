// math.rs — shared vector/matrix math for map compilation
//
// All geometry runs in f64; the map format stores plane points and
// texture vectors as free-form decimal text and the projection math is
// sensitive to rounding.

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f64; 3];
pub type Vec2 = [f64; 2];

/// Row-major 2x2 matrix.
pub type Mat2 = [[f64; 2]; 2];

/// Row-major 3x3 matrix.
pub type Mat3 = [[f64; 3]; 3];

pub const EQUAL_EPSILON: f64 = 0.0001;
pub const NORMAL_EPSILON: f64 = 0.000001;
pub const ZERO_EPSILON: f64 = 0.001;
pub const ANGLE_EPSILON: f64 = 0.000001;

// ============================================================
// Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_negate(v: &Vec3) -> Vec3 {
    [-v[0], -v[1], -v[2]]
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f64) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

/// veca + scale * vecb
#[inline]
pub fn vector_ma(veca: &Vec3, scale: f64, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

#[inline]
pub fn vector_compare(v1: &Vec3, v2: &Vec3) -> bool {
    v1[0] == v2[0] && v1[1] == v2[1] && v1[2] == v2[2]
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

/// Normalize in place, returns original length.
pub fn vector_normalize(v: &mut Vec3) -> f64 {
    let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn vector_length(v: &Vec3) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Snap components that sit within `epsilon` of an integer onto it.
pub fn vector_snap(v: &Vec3, epsilon: f64) -> Vec3 {
    let mut out = *v;
    for x in out.iter_mut() {
        let r = x.round();
        if (*x - r).abs() < epsilon {
            *x = r;
        }
    }
    out
}

// ============================================================
// 2x2 matrix operations
// ============================================================

pub fn mat2_mul(a: &Mat2, b: &Mat2) -> Mat2 {
    let mut out = [[0.0; 2]; 2];
    for i in 0..2 {
        for j in 0..2 {
            out[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

#[inline]
pub fn mat2_mul_vec2(m: &Mat2, v: &Vec2) -> Vec2 {
    [
        m[0][0] * v[0] + m[0][1] * v[1],
        m[1][0] * v[0] + m[1][1] * v[1],
    ]
}

/// Inverse of a 2x2; the caller is responsible for non-singular input
/// (a zero determinant yields infinities, matching the permissive
/// behavior the projection decoder relies on).
pub fn mat2_inverse(m: &Mat2) -> Mat2 {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    let inv = 1.0 / det;
    [
        [m[1][1] * inv, -m[0][1] * inv],
        [-m[1][0] * inv, m[0][0] * inv],
    ]
}

pub fn mat2_rotation_deg(degrees: f64) -> Mat2 {
    let r = degrees.to_radians();
    let (sinr, cosr) = r.sin_cos();
    [[cosr, -sinr], [sinr, cosr]]
}

pub fn mat2_scale(xscale: f64, yscale: f64) -> Mat2 {
    [[xscale, 0.0], [0.0, yscale]]
}

// ============================================================
// 3x3 matrix operations
// ============================================================

pub fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

#[inline]
pub fn mat3_mul_vec3(m: &Mat3, v: &Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

pub fn rotate_about_x(radians: f64) -> Mat3 {
    let (s, c) = radians.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

pub fn rotate_about_y(radians: f64) -> Mat3 {
    let (s, c) = radians.sin_cos();
    [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]
}

pub fn rotate_about_z(radians: f64) -> Mat3 {
    let (s, c) = radians.sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

// ============================================================
// Angle helpers
// ============================================================

pub fn normalize_degrees(mut degs: f64) -> f64 {
    while degs < 0.0 {
        degs += 360.0;
    }
    while degs > 360.0 {
        degs -= 360.0;
    }
    if (degs - 360.0).abs() < 0.001 {
        degs = 0.0;
    }
    degs
}

pub fn equal_degrees(a: f64, b: f64) -> bool {
    (normalize_degrees(a) - normalize_degrees(b)).abs() < 0.001
}

// ============================================================
// Axis-aligned bounding box
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    pub mins: Vec3,
    pub maxs: Vec3,
}

impl Default for Aabb3 {
    fn default() -> Self {
        Self {
            mins: [f64::INFINITY; 3],
            maxs: [f64::NEG_INFINITY; 3],
        }
    }
}

impl Aabb3 {
    pub fn new(mins: Vec3, maxs: Vec3) -> Self {
        Self { mins, maxs }
    }

    pub fn add_point(&mut self, p: &Vec3) {
        for i in 0..3 {
            if p[i] < self.mins[i] {
                self.mins[i] = p[i];
            }
            if p[i] > self.maxs[i] {
                self.maxs[i] = p[i];
            }
        }
    }

    /// True once at least one point has been accumulated.
    pub fn is_valid(&self) -> bool {
        self.mins[0] <= self.maxs[0]
    }

    pub fn centroid(&self) -> Vec3 {
        [
            (self.mins[0] + self.maxs[0]) * 0.5,
            (self.mins[1] + self.maxs[1]) * 0.5,
            (self.mins[2] + self.maxs[2]) * 0.5,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat2_inverse_roundtrip() {
        let m = [[2.0, 1.0], [-1.0, 3.0]];
        let inv = mat2_inverse(&m);
        let ident = mat2_mul(&m, &inv);
        assert!((ident[0][0] - 1.0).abs() < 1e-12);
        assert!(ident[0][1].abs() < 1e-12);
        assert!(ident[1][0].abs() < 1e-12);
        assert!((ident[1][1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mat2_rotation() {
        let m = mat2_rotation_deg(90.0);
        let v = mat2_mul_vec2(&m, &[1.0, 0.0]);
        assert!(v[0].abs() < 1e-12);
        assert!((v[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert!(equal_degrees(370.0, 10.0));
        assert!(!equal_degrees(180.0, 0.0));
    }

    #[test]
    fn test_aabb_centroid() {
        let mut bounds = Aabb3::default();
        assert!(!bounds.is_valid());
        bounds.add_point(&[-16.0, 0.0, 8.0]);
        bounds.add_point(&[16.0, 32.0, 24.0]);
        assert!(bounds.is_valid());
        assert_eq!(bounds.centroid(), [0.0, 16.0, 16.0]);
    }

    #[test]
    fn test_vector_snap() {
        let v = vector_snap(&[0.9999999, -0.0000001, 0.5], 1e-6);
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1], 0.0);
        assert_eq!(v[2], 0.5);
    }
}

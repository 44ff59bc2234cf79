// texdef.rs — texture projection codec
//
// Converts between the four texture definition styles found in .map
// files and the 2x4 texture vectors the bsp stages consume. Encoding
// happens at parse time; decoding drives map-format conversion.
//
// The Quake-Ed decoder recovers shift/rotate/scale from an arbitrary
// projection by stripping shear, factoring out the axis flips, and
// testing all four scale-sign combinations against the original matrix
// with a 0.001 tolerance. Sign order matters for output stability and
// must not be reordered.

use qmap_common::math::*;
use qmap_common::parser::Location;

use crate::error::{MapError, Result};
use crate::map::{MapPlane, TexVecs};
use crate::texture::TextureMeta;

/// Fixed scaling QuArK assumes between plane-point offsets and texels.
pub const QUARK_SCALE: f64 = 128.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarkStyle {
    /// vecs from (pt2 - pt0, pt1 - pt0)
    Type1,
    /// vecs from (pt1 - pt0, pt2 - pt0)
    Type2,
}

/// Texture definition as written in the map source.
#[derive(Debug, Clone, PartialEq)]
pub enum TexDef {
    QuakeEd {
        shift: Vec2,
        rotate: f64,
        scale: Vec2,
    },
    Valve {
        axes: [Vec3; 2],
        shift: Vec2,
        rotate: f64,
        scale: Vec2,
    },
    Quark(QuarkStyle),
    BrushPrimitives([[f64; 3]; 2]),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuakeEdTexDef {
    pub shift: Vec2,
    pub rotate: f64,
    pub scale: Vec2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValveTexDef {
    pub axes: [Vec3; 2],
    pub shift: Vec2,
    pub scale: Vec2,
}

// ============================================================
// Projection axes
// ============================================================

const BASE_AXES: [[Vec3; 3]; 6] = [
    [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, -1.0, 0.0]], // floor
    [[0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, -1.0, 0.0]], // ceiling
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]], // west wall
    [[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]], // east wall
    [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]], // south wall
    [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]], // north wall
];

/// Picks the dominant axis projection for a face normal. Returns the
/// s axis, t axis and the snapped normal. `oldaxis` keeps the earlier
/// table entry on exact ties, as the original tools did.
pub fn texture_axis_from_plane(normal: &Vec3, oldaxis: bool) -> (Vec3, Vec3, Vec3) {
    let mut best = 0.0;
    let mut bestaxis = 0;

    for (i, axes) in BASE_AXES.iter().enumerate() {
        let dot = dot_product(normal, &axes[0]);
        if dot > best || (dot == best && !oldaxis) {
            best = dot;
            bestaxis = i;
        }
    }

    (
        BASE_AXES[bestaxis][1],
        BASE_AXES[bestaxis][2],
        BASE_AXES[bestaxis][0],
    )
}

/// Indices of the two world axes spanning the snapped-normal plane.
fn st_axes(snapped_normal: &Vec3) -> (usize, usize) {
    if snapped_normal[0] != 0.0 {
        (1, 2)
    } else if snapped_normal[1] != 0.0 {
        (0, 2)
    } else {
        (0, 1)
    }
}

fn project_to_axis_plane(snapped_normal: &Vec3, point: &Vec3) -> Vec2 {
    let (s, t) = st_axes(snapped_normal);
    [point[s], point[t]]
}

// ============================================================
// 2d helpers
// ============================================================

fn vec2_dot(a: &Vec2, b: &Vec2) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

fn vec2_normalized(v: &Vec2) -> Vec2 {
    let length = (v[0] * v[0] + v[1] * v[1]).sqrt();
    if length == 0.0 {
        return *v;
    }
    [v[0] / length, v[1] / length]
}

fn vec2_sub(a: &Vec2, b: &Vec2) -> Vec2 {
    [a[0] - b[0], a[1] - b[1]]
}

fn extract_rotation(m: &Mat2) -> f64 {
    // where does (1, 0) go; the choice matters under shear
    m[1][0].atan2(m[0][0]).to_degrees()
}

/// Signed degrees rotating `start` onto `end`, positive clockwise.
fn clockwise_degrees_between(start: &Vec2, end: &Vec2) -> f64 {
    let start = vec2_normalized(start);
    let end = vec2_normalized(end);

    let cos_angle = vec2_dot(&start, &end).clamp(-1.0, 1.0);
    let unsigned_degrees = cos_angle.acos().to_degrees();
    if unsigned_degrees < ANGLE_EPSILON {
        return 0.0;
    }

    // right-hand rule: rotation normal up means counterclockwise
    let mut rotation_normal = cross_product(
        &[start[0], start[1], 0.0],
        &[end[0], end[1], 0.0],
    );
    vector_normalize(&mut rotation_normal);

    if rotation_normal[2] >= 0.0 {
        -unsigned_degrees
    } else {
        unsigned_degrees
    }
}

// ============================================================
// Quake-Ed (shift/rotate/scale)
// ============================================================

/// Classic encoder: rotate the projection axes in the texture plane,
/// then divide by the scales. Zero scale means no scaling.
pub fn vecs_from_quake_ed(
    normal: &Vec3,
    shift: &Vec2,
    rotate: f64,
    scale: &Vec2,
    oldaxis: bool,
) -> TexVecs {
    let (xv, yv, _) = texture_axis_from_plane(normal, oldaxis);
    let mut vecs = [xv, yv];

    let ang = rotate.to_radians();
    let (sinv, cosv) = ang.sin_cos();

    let sv = if vecs[0][0] != 0.0 {
        0
    } else if vecs[0][1] != 0.0 {
        1
    } else {
        2 // unreachable via the axis table
    };
    let tv = if vecs[1][0] != 0.0 {
        0 // unreachable via the axis table
    } else if vecs[1][1] != 0.0 {
        1
    } else {
        2
    };

    for vec in &mut vecs {
        let ns = cosv * vec[sv] - sinv * vec[tv];
        let nt = sinv * vec[sv] + cosv * vec[tv];
        vec[sv] = ns;
        vec[tv] = nt;
    }

    let mut out = TexVecs::default();
    for i in 0..2 {
        let s = if scale[i] != 0.0 { scale[i] } else { 1.0 };
        for j in 0..3 {
            out.0[i][j] = vecs[i][j] / s;
        }
    }
    out.0[0][3] = shift[0];
    out.0[1][3] = shift[1];
    out
}

/// Matrix form of the classic encoder: M = scale * rotation * axis
/// flips, applied to the axis-plane projection. Produces the same
/// vectors as `vecs_from_quake_ed` and anchors the decoder.
fn vecs_from_quake_ed_matrix(
    normal: &Vec3,
    shift: &Vec2,
    rotate: f64,
    scale: &Vec2,
    oldaxis: bool,
) -> TexVecs {
    let mut sanitized = *scale;
    for s in &mut sanitized {
        if *s == 0.0 {
            *s = 1.0;
        }
    }

    let (xv, yv, snapped_normal) = texture_axis_from_plane(normal, oldaxis);
    let s_axis = project_to_axis_plane(&snapped_normal, &xv);
    let t_axis = project_to_axis_plane(&snapped_normal, &yv);

    // identity matrix up to sign flips
    let axis_flips = [[s_axis[0], s_axis[1]], [t_axis[0], t_axis[1]]];

    let scale_m = mat2_scale(1.0 / sanitized[0], 1.0 / sanitized[1]);
    let m = mat2_mul(&mat2_mul(&scale_m, &mat2_rotation_deg(rotate)), &axis_flips);

    let (a, b) = st_axes(&snapped_normal);
    let mut out = TexVecs::default();
    out.0[0][a] = m[0][0];
    out.0[0][b] = m[0][1];
    out.0[0][3] = shift[0];
    out.0[1][a] = m[1][0];
    out.0[1][b] = m[1][1];
    out.0[1][3] = shift[1];
    out
}

/// Recovers rotate and scale from the 2x2 that maps the axis-plane
/// projection to UV. Shear is removed first, preserving either the X
/// or the Y texture axis; then the scale magnitudes and axis flips are
/// factored out and the four scale-sign combinations are tried in
/// fixed order until one reproduces the input within 0.001.
fn reverse_quake_ed(
    mut m: Mat2,
    plane: &MapPlane,
    preserve_x: bool,
    oldaxis: bool,
) -> Result<(f64, Vec2)> {
    {
        let mut xvec = [m[0][0], m[0][1]];
        let mut yvec = [m[1][0], m[1][1]];
        let mut cos_angle = vec2_dot(&vec2_normalized(&xvec), &vec2_normalized(&yvec));

        if cos_angle.abs() > 0.001 {
            // shear detected; replace the non-preserved axis with the
            // 90 degree turn of the other, keeping its projected scale
            if preserve_x {
                let cw = clockwise_degrees_between(&xvec, &yvec) > 0.0;
                let w = if cw { -1.0 } else { 1.0 };
                let new_ydir = vec2_normalized(&[-w * xvec[1], w * xvec[0]]);
                let new_yscale = vec2_dot(&yvec, &new_ydir);
                yvec = [new_ydir[0] * new_yscale, new_ydir[1] * new_yscale];
            } else {
                let cw = clockwise_degrees_between(&yvec, &xvec) > 0.0;
                let w = if cw { -1.0 } else { 1.0 };
                let new_xdir = vec2_normalized(&[-w * yvec[1], w * yvec[0]]);
                let new_xscale = vec2_dot(&xvec, &new_xdir);
                xvec = [new_xdir[0] * new_xscale, new_xdir[1] * new_xscale];
            }

            cos_angle = vec2_dot(&vec2_normalized(&xvec), &vec2_normalized(&yvec));
            if cos_angle.abs() > 0.001 {
                return Err(MapError::Internal(
                    "couldn't remove texture projection shear".to_string(),
                ));
            }

            m[0] = xvec;
            m[1] = yvec;
        }
    }

    let abs_xscale = (m[0][0] * m[0][0] + m[0][1] * m[0][1]).sqrt();
    let abs_yscale = (m[1][0] * m[1][0] + m[1][1] * m[1][1]).sqrt();
    let abs_scale_m = mat2_scale(abs_xscale, abs_yscale);

    let (xv, yv, snapped_normal) = texture_axis_from_plane(&plane.normal, oldaxis);
    let s_axis = project_to_axis_plane(&snapped_normal, &xv);
    let t_axis = project_to_axis_plane(&snapped_normal, &yv);
    let axis_flips = [[s_axis[0], s_axis[1]], [t_axis[0], t_axis[1]]];

    // M was built as scale * rotation * axisFlips; peel off the scale
    // magnitude and the flips, leaving flip signs and rotation mixed
    let flip_rotate = mat2_mul(
        &mat2_mul(&mat2_inverse(&abs_scale_m), &m),
        &mat2_inverse(&axis_flips),
    );

    // the scale signs are unknown and corrupt the extracted rotation;
    // try all four combinations
    for x_scale_sgn in [-1.0, 1.0] {
        for y_scale_sgn in [-1.0, 1.0] {
            let guessed_flip = mat2_scale(x_scale_sgn, y_scale_sgn);
            let rotate_guess = mat2_mul(&mat2_inverse(&guessed_flip), &flip_rotate);
            let angle_guess = extract_rotation(&rotate_guess);

            let m_guess = mat2_mul(
                &mat2_mul(
                    &mat2_mul(&guessed_flip, &abs_scale_m),
                    &mat2_rotation_deg(angle_guess),
                ),
                &axis_flips,
            );

            if (m[0][0] - m_guess[0][0]).abs() < 0.001
                && (m[0][1] - m_guess[0][1]).abs() < 0.001
                && (m[1][0] - m_guess[1][0]).abs() < 0.001
                && (m[1][1] - m_guess[1][1]).abs() < 0.001
            {
                return Ok((
                    angle_guess,
                    [x_scale_sgn / abs_xscale, y_scale_sgn / abs_yscale],
                ));
            }
        }
    }

    // degenerate axes; nothing sensible to recover
    Ok((0.0, [1.0, 1.0]))
}

/// Normalizes large shifts to within one texture repeat. Without the
/// texture size the shift is returned untouched.
fn normalize_shift(texture: Option<&TextureMeta>, shift: Vec2) -> Vec2 {
    let Some(texture) = texture else {
        return shift;
    };
    let full_w = shift[0] as i32 / texture.width as i32;
    let full_h = shift[1] as i32 / texture.height as i32;
    [
        shift[0] - (full_w * texture.width as i32) as f64,
        shift[1] - (full_h * texture.height as i32) as f64,
    ]
}

/// Decodes texture vectors back to shift/rotate/scale, using three
/// reference points on the face plane.
pub fn quake_ed_from_vecs(
    plane: &MapPlane,
    texture: Option<&TextureMeta>,
    vecs: &TexVecs,
    facepoints: &[Vec3; 3],
    oldaxis: bool,
) -> Result<QuakeEdTexDef> {
    let (_, _, snapped_normal) = texture_axis_from_plane(&plane.normal, oldaxis);

    let uvs = [
        vecs.uv(&facepoints[0]),
        vecs.uv(&facepoints[1]),
        vecs.uv(&facepoints[2]),
    ];
    let projected = [
        project_to_axis_plane(&snapped_normal, &facepoints[0]),
        project_to_axis_plane(&snapped_normal, &facepoints[1]),
        project_to_axis_plane(&snapped_normal, &facepoints[2]),
    ];

    // two edge vectors each side; translation cancels out
    let p0p1 = vec2_sub(&projected[1], &projected[0]);
    let p0p2 = vec2_sub(&projected[2], &projected[0]);
    let p0p1_uv = vec2_sub(&uvs[1], &uvs[0]);
    let p0p2_uv = vec2_sub(&uvs[2], &uvs[0]);

    // solve for the 2x2 mapping the projected edges onto the uv edges;
    // the s and t rows separate into two 2x2 systems
    let edges = [[p0p1[0], p0p1[1]], [p0p2[0], p0p2[1]]];
    let edges_inv = mat2_inverse(&edges);
    let ab = mat2_mul_vec2(&edges_inv, &[p0p1_uv[0], p0p2_uv[0]]);
    let cd = mat2_mul_vec2(&edges_inv, &[p0p1_uv[1], p0p2_uv[1]]);
    let tex_plane_to_uv = [[ab[0], ab[1]], [cd[0], cd[1]]];

    let (rotate, scale) = reverse_quake_ed(tex_plane_to_uv, plane, false, oldaxis)?;

    // shift is whatever offset makes the first reference point land on
    // its desired uv
    let noshift = vecs_from_quake_ed_matrix(&plane.normal, &[0.0, 0.0], rotate, &scale, oldaxis);
    let uv_actual = noshift.uv(&facepoints[0]);
    let shift = normalize_shift(
        texture,
        vec2_sub(&uvs[0], &uv_actual),
    );

    Ok(QuakeEdTexDef {
        shift,
        rotate,
        scale,
    })
}

// ============================================================
// Valve 220
// ============================================================

pub fn vecs_from_valve(axes: &[Vec3; 2], shift: &Vec2, scale: &Vec2) -> TexVecs {
    let mut out = TexVecs::default();
    for i in 0..2 {
        for j in 0..3 {
            out.0[i][j] = axes[i][j] / scale[i];
        }
        out.0[i][3] = shift[i];
    }
    out
}

pub fn valve_from_vecs(vecs: &TexVecs) -> ValveTexDef {
    let mut out = ValveTexDef::default();
    for i in 0..2 {
        let mut axis = [vecs.0[i][0], vecs.0[i][1], vecs.0[i][2]];
        let length = vector_normalize(&mut axis);
        out.scale[i] = if length != 0.0 { 1.0 / length } else { 0.0 };
        out.shift[i] = vecs.0[i][3];
        out.axes[i] = axis;
    }
    out
}

// ============================================================
// QuArK
// ============================================================

/// QuArK stores the projection implicitly in the plane points: the
/// offsets of points 1 and 2 from point 0 are the texture axes at a
/// fixed 1/128 scale. Inverting the Gram matrix recovers the vectors.
pub fn vecs_from_quark(planepts: &[Vec3; 3], style: QuarkStyle, location: &Location) -> TexVecs {
    let (v0, v1) = match style {
        QuarkStyle::Type1 => (
            vector_subtract(&planepts[2], &planepts[0]),
            vector_subtract(&planepts[1], &planepts[0]),
        ),
        QuarkStyle::Type2 => (
            vector_subtract(&planepts[1], &planepts[0]),
            vector_subtract(&planepts[2], &planepts[0]),
        ),
    };
    let v0 = vector_scale(&v0, 1.0 / QUARK_SCALE);
    let v1 = vector_scale(&v1, 1.0 / QUARK_SCALE);

    let a = dot_product(&v0, &v0);
    let b = dot_product(&v0, &v1);
    let d = dot_product(&v1, &v1);

    let mut out = TexVecs::default();
    let determinant = a * d - b * b;
    if determinant.abs() < ZERO_EPSILON {
        log::warn!("{}: face with degenerate QuArK-style texture axes", location);
    } else {
        for i in 0..3 {
            out.0[0][i] = (d * v0[i] - b * v1[i]) / determinant;
            out.0[1][i] = -(a * v1[i] - b * v0[i]) / determinant;
        }
    }

    // the texture offset is indicated by the first plane point
    let s = [out.0[0][0], out.0[0][1], out.0[0][2]];
    let t = [out.0[1][0], out.0[1][1], out.0[1][2]];
    out.0[0][3] = -dot_product(&s, &planepts[0]);
    out.0[1][3] = -dot_product(&t, &planepts[0]);
    out
}

// ============================================================
// Brush primitives
// ============================================================

/// Base texture axes for brush-primitives texturing; must agree with
/// the editor's version of the same computation bit for bit.
pub fn compute_axis_base(normal: &Vec3) -> (Vec3, Vec3) {
    let mut normal = *normal;
    for v in &mut normal {
        if v.abs() < 1e-6 {
            *v = 0.0;
        }
    }

    // the two rotations around y and z that take x to the normal
    let rot_y = -normal[2].atan2((normal[0] * normal[0] + normal[1] * normal[1]).sqrt());
    let rot_z = normal[1].atan2(normal[0]);

    let tex_x = [-rot_z.sin(), rot_z.cos(), 0.0];
    let tex_y = [
        -rot_y.sin() * rot_z.cos(),
        -rot_y.sin() * rot_z.sin(),
        -rot_y.cos(),
    ];
    (tex_x, tex_y)
}

pub fn vecs_from_brush_primitives(
    mat: &[[f64; 3]; 2],
    normal: &Vec3,
    tex_width: u32,
    tex_height: u32,
) -> TexVecs {
    let (tex_x, tex_y) = compute_axis_base(normal);
    let sizes = [tex_width as f64, tex_height as f64];

    let mut out = TexVecs::default();
    for i in 0..2 {
        for j in 0..3 {
            out.0[i][j] = sizes[i] * (tex_x[j] * mat[i][0] + tex_y[j] * mat[i][1]);
        }
        out.0[i][3] = sizes[i] * mat[i][2];
    }
    out
}

pub fn brush_primitives_from_vecs(
    plane: &MapPlane,
    tex_width: u32,
    tex_height: u32,
    vecs: &TexVecs,
) -> [[f64; 3]; 2] {
    let (tex_x, tex_y) = compute_axis_base(&plane.normal);
    let proj = vector_scale(&plane.normal, plane.dist);

    let scaled_uv = |point: &Vec3| -> Vec2 {
        let uv = vecs.uv(point);
        [uv[0] / tex_width as f64, uv[1] / tex_height as f64]
    };

    // uv of the plane-space origin and of one step along each base axis
    let st = [
        scaled_uv(&proj),
        scaled_uv(&vector_add(&tex_x, &proj)),
        scaled_uv(&vector_add(&tex_y, &proj)),
    ];

    let mut out = [[0.0; 3]; 2];
    for i in 0..2 {
        out[i][0] = st[1][i] - st[0][i];
        out[i][1] = st[2][i] - st[0][i];
        out[i][2] = st[0][i];
    }
    out
}

// ============================================================
// Validation
// ============================================================

/// A projection is unusable when its texture normal is degenerate or
/// (nearly) perpendicular to the face normal.
pub fn is_valid_projection(face_normal: &Vec3, s_vec: &Vec3, t_vec: &Vec3) -> bool {
    let mut tex_normal = cross_product(s_vec, t_vec);
    vector_normalize(&mut tex_normal);

    for v in tex_normal {
        if v.is_nan() {
            return false;
        }
    }

    let cos_angle = dot_product(&tex_normal, face_normal);
    if cos_angle.is_nan() {
        return false;
    }
    if cos_angle.abs() < ZERO_EPSILON {
        return false;
    }
    true
}

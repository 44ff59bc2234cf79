// brush.rs — brush geometry: face windings, bounds, bevel planes and
// the world extent used to seed base windings
//
// Faces come out of the parser as raw planes. The winding of each face
// is the base quad on its plane clipped by the flipped planes of every
// other face; the brush bounds fall out of the surviving points. Bevel
// planes are the axial and edge planes the collision stage expects to
// find on every brush even when no drawn face lies on them.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use qmap_common::math::*;
use qmap_common::winding::base_winding_for_plane;

use crate::map::{MapBrush, MapData, MapFace, MapPlane};
use crate::options::CompileOptions;

/// Margin added around the furthest geometry when computing the world
/// extent.
const SIDESPACE: f64 = 24.0;

// ============================================================
// Bounds and windings
// ============================================================

pub fn calculate_brush_bounds(brush: &mut MapBrush, map: &MapData) {
    brush.bounds = Aabb3::default();

    for i in 0..brush.faces.len() {
        let plane = map.planes[brush.faces[i].planenum];
        let mut w = Some(base_winding_for_plane(
            &plane.normal,
            plane.dist,
            map.world_extent,
        ));

        for j in 0..brush.faces.len() {
            if i == j || brush.faces[j].bevel {
                continue;
            }
            let Some(current) = w else {
                break;
            };
            let clip = map.planes[brush.faces[j].planenum ^ 1];
            w = current.clip_front(&clip.normal, clip.dist, 0.0);
        }

        if let Some(w) = &w {
            for p in &w.points {
                brush.bounds.add_point(p);
            }
        }
        brush.faces[i].winding = w;
    }

    let extent = map.world_extent;
    for i in 0..3 {
        if brush.bounds.mins[i] <= -extent || brush.bounds.maxs[i] >= extent {
            log::warn!("{}: brush bounds out of range", brush.location);
            break;
        }
    }
    for i in 0..3 {
        if brush.bounds.mins[i] >= extent || brush.bounds.maxs[i] <= -extent {
            log::warn!("{}: no visible sides on brush", brush.location);
            break;
        }
    }
}

// ============================================================
// Bevels
// ============================================================

fn bevel_face_from(source: &MapFace, plane: MapPlane, planenum: usize) -> MapFace {
    let mut face = source.clone();
    face.planepts = [[0.0; 3]; 3];
    face.plane = plane;
    face.planenum = planenum;
    face.raw_q2 = None;
    face.winding = None;
    face.bevel = true;
    face
}

/// Adds the bevel planes a collision hull needs: one axial plane per
/// box side, then planes through every non-axial edge perpendicular to
/// an axis. The six axial faces are swapped into canonical order
/// (x, y, z, negative facing first) as a side effect.
pub fn add_brush_bevels(brush: &mut MapBrush, map: &mut MapData, options: &CompileOptions) {
    // axial planes
    let mut order = 0;
    for axis in 0..3 {
        for dir in [-1.0, 1.0] {
            let mut i = 0;
            while i < brush.faces.len() {
                if map.planes[brush.faces[i].planenum].normal[axis] == dir {
                    break;
                }
                i += 1;
            }

            if i == brush.faces.len() {
                let mut normal = [0.0; 3];
                normal[axis] = dir;
                let dist = if dir == 1.0 {
                    brush.bounds.maxs[axis]
                } else {
                    -brush.bounds.mins[axis]
                };
                let plane = MapPlane { normal, dist };
                let planenum = map.add_or_find_plane(&plane);
                // TODO: copy surface info from the face closest to the
                // bevel instead of faces[0]
                let face = bevel_face_from(&brush.faces[0], plane, planenum);
                brush.faces.push(face);
            }

            if i != order {
                brush.faces.swap(order, i);
            }
            order += 1;
        }
    }

    if brush.faces.len() == 6 {
        return; // pure axial
    }

    // edge bevels, from the windings of the non-axial faces; pushed
    // faces have no winding and are skipped when the loop reaches them
    let mut i = 6;
    while i < brush.faces.len() {
        let Some(w) = brush.faces[i].winding.clone() else {
            i += 1;
            continue;
        };

        for j in 0..w.len() {
            let k = (j + 1) % w.len();
            let mut vec = vector_subtract(&w.points[j], &w.points[k]);
            if vector_normalize(&mut vec) < 0.5 {
                continue;
            }
            let vec = vector_snap(&vec, ZERO_EPSILON);
            if (0..3).any(|c| vec[c] == -1.0 || vec[c] == 1.0) {
                continue; // only non-axial edges need bevels
            }

            // the six slanted axials through this edge
            for axis in 0..3 {
                for dir in [-1.0, 1.0] {
                    let mut axial = [0.0; 3];
                    axial[axis] = dir;
                    let mut normal = cross_product(&vec, &axial);

                    // edge nearly parallel to the axis
                    let sin_of_angle = vector_normalize(&mut normal);
                    if sin_of_angle < ANGLE_EPSILON {
                        continue;
                    }
                    let plane = MapPlane {
                        normal,
                        dist: dot_product(&w.points[j], &normal),
                    };

                    // a proper edge bevel duplicates no existing side
                    // and keeps every brush point behind it
                    let mut usable = true;
                    for other in &brush.faces {
                        if map.planes[other.planenum].epsilon_equal(&plane) {
                            usable = false;
                            break;
                        }
                        let Some(w2) = &other.winding else {
                            continue;
                        };
                        if w2.points.iter().any(|p| plane.distance_to(p) > options.epsilon) {
                            usable = false;
                            break;
                        }
                    }
                    if !usable {
                        continue;
                    }

                    let planenum = map.add_or_find_plane(&plane);
                    let face = bevel_face_from(&brush.faces[i], plane, planenum);
                    brush.faces.push(face);
                }
            }
        }
        i += 1;
    }
}

// ============================================================
// World extent
// ============================================================

/// Point where three planes meet, if they do.
pub fn get_intersection(p1: &MapPlane, p2: &MapPlane, p3: &MapPlane) -> Option<Vec3> {
    let c23 = cross_product(&p2.normal, &p3.normal);
    let denom = dot_product(&p1.normal, &c23);
    if denom == 0.0 {
        return None;
    }

    let c31 = cross_product(&p3.normal, &p1.normal);
    let c12 = cross_product(&p1.normal, &p2.normal);
    let mut point = [0.0; 3];
    for i in 0..3 {
        point[i] = (c23[i] * p1.dist + c31[i] * p2.dist + c12[i] * p3.dist) / denom;
    }
    Some(point)
}

/// Largest absolute coordinate of any brush vertex, found by
/// intersecting plane triples and keeping the points on the hull.
/// Runs before windings exist.
pub fn get_brush_extents(brush: &MapBrush, map: &MapData) -> f64 {
    let mut extents = f64::NEG_INFINITY;
    let n = brush.faces.len();

    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let Some(vertex) = get_intersection(
                    &map.planes[brush.faces[i].planenum],
                    &map.planes[brush.faces[j].planenum],
                    &map.planes[brush.faces[k].planenum],
                ) else {
                    continue;
                };

                let legal = brush
                    .faces
                    .iter()
                    .all(|f| map.planes[f.planenum].distance_to(&vertex) <= NORMAL_EPSILON);

                if legal {
                    for v in vertex {
                        extents = extents.max(v.abs());
                    }
                }
            }
        }
    }
    extents
}

/// Derives the world extent from the geometry: the furthest vertex of
/// any brush, padded by the largest hull size and SIDESPACE. Brushes
/// are scanned in parallel with a lock-free running maximum.
pub fn calculate_world_extent(map: &MapData, options: &CompileOptions) -> f64 {
    let extents_bits = AtomicU64::new(f64::NEG_INFINITY.to_bits());

    map.entities.par_iter().for_each(|entity| {
        entity.brushes.par_iter().for_each(|brush| {
            let brush_extents = get_brush_extents(brush, map);
            let mut current = f64::from_bits(extents_bits.load(Ordering::Relaxed));
            while current < brush_extents {
                match extents_bits.compare_exchange_weak(
                    current.to_bits(),
                    brush_extents.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(seen) => current = f64::from_bits(seen),
                }
            }
        });
    });

    let mut extents = f64::from_bits(extents_bits.load(Ordering::Relaxed));
    if !extents.is_finite() {
        // a map with no brush geometry still needs a workable extent
        extents = 0.0;
    }

    let mut hull_extents: f64 = 0.0;
    for hull in options.game.hull_sizes() {
        for i in 0..3 {
            hull_extents = hull_extents.max((hull.maxs[i] - hull.mins[i]).abs());
        }
    }

    let extent = ((extents + hull_extents) * 2.0).ceil() + SIDESPACE;
    log::info!("world extents calculated to {} units", extent);
    extent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Contents;
    use crate::game::SurfFlags;
    use crate::map::MapEntity;
    use crate::texdef::TexDef;
    use qmap_common::parser::Location;

    fn test_face(map: &mut MapData, normal: Vec3, dist: f64) -> MapFace {
        let plane = MapPlane { normal, dist };
        let planenum = map.add_or_find_plane(&plane);
        MapFace {
            planepts: [[0.0; 3]; 3],
            plane,
            planenum,
            texname: "base_wall".to_string(),
            texinfo: 0,
            contents: Contents::default(),
            flags: SurfFlags::default(),
            value: 0,
            texdef: TexDef::QuakeEd {
                shift: [0.0, 0.0],
                rotate: 0.0,
                scale: [1.0, 1.0],
            },
            raw_q2: None,
            winding: None,
            bevel: false,
            lmshift: 0,
            location: Location::default(),
        }
    }

    fn cube(map: &mut MapData, half: f64) -> MapBrush {
        let mut brush = MapBrush::default();
        for (normal, dist) in [
            ([1.0, 0.0, 0.0], half),
            ([-1.0, 0.0, 0.0], half),
            ([0.0, 1.0, 0.0], half),
            ([0.0, -1.0, 0.0], half),
            ([0.0, 0.0, 1.0], half),
            ([0.0, 0.0, -1.0], half),
        ] {
            let face = test_face(map, normal, dist);
            brush.faces.push(face);
        }
        brush
    }

    // floor, three walls and a slanted top running from (64, y, 0)
    // down to (0, y, 64)
    fn wedge(map: &mut MapData) -> MapBrush {
        let mut brush = MapBrush::default();
        let s = 1.0 / 2.0f64.sqrt();
        for (normal, dist) in [
            ([0.0, 0.0, -1.0], 0.0),
            ([-1.0, 0.0, 0.0], 0.0),
            ([0.0, -1.0, 0.0], 0.0),
            ([0.0, 1.0, 0.0], 64.0),
            ([s, 0.0, s], 64.0 * s),
        ] {
            let face = test_face(map, normal, dist);
            brush.faces.push(face);
        }
        brush
    }

    #[test]
    fn test_cube_bounds_and_windings() {
        let mut map = MapData::new();
        map.world_extent = 65536.0;
        let mut brush = cube(&mut map, 32.0);
        calculate_brush_bounds(&mut brush, &map);

        assert_eq!(brush.bounds.mins, [-32.0, -32.0, -32.0]);
        assert_eq!(brush.bounds.maxs, [32.0, 32.0, 32.0]);
        for face in &brush.faces {
            let w = face.winding.as_ref().unwrap();
            assert_eq!(w.len(), 4);
            assert!((w.area() - 64.0 * 64.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_axial_brush_needs_no_bevels() {
        let mut map = MapData::new();
        map.world_extent = 65536.0;
        let options = CompileOptions::default();
        let mut brush = cube(&mut map, 32.0);
        calculate_brush_bounds(&mut brush, &map);
        add_brush_bevels(&mut brush, &mut map, &options);

        assert_eq!(brush.faces.len(), 6);
        // canonical order: -x +x -y +y -z +z
        let normals: Vec<Vec3> = brush
            .faces
            .iter()
            .map(|f| map.planes[f.planenum].normal)
            .collect();
        assert_eq!(
            normals,
            [
                [-1.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, -1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, -1.0],
                [0.0, 0.0, 1.0],
            ]
        );
    }

    #[test]
    fn test_wedge_gains_axial_bevels() {
        let mut map = MapData::new();
        map.world_extent = 65536.0;
        let options = CompileOptions::default();
        let mut brush = wedge(&mut map);
        calculate_brush_bounds(&mut brush, &map);
        add_brush_bevels(&mut brush, &mut map, &options);

        // +x and +z planes were missing; the slanted top provides no
        // valid edge bevels beyond them
        assert_eq!(brush.faces.len(), 7);
        let bevels: Vec<&MapFace> = brush.faces.iter().filter(|f| f.bevel).collect();
        assert_eq!(bevels.len(), 2);
        for bevel in bevels {
            let plane = map.planes[bevel.planenum];
            assert!(plane.normal == [1.0, 0.0, 0.0] || plane.normal == [0.0, 0.0, 1.0]);
            assert_eq!(plane.dist, 64.0);
            assert_eq!(bevel.texname, "base_wall");
        }
        // the non-axial face ends up after the six axial slots
        assert!(map.planes[brush.faces[6].planenum].normal[0] > 0.5);
        assert!(!brush.faces[6].bevel);
    }

    #[test]
    fn test_get_intersection() {
        let px = MapPlane {
            normal: [1.0, 0.0, 0.0],
            dist: 64.0,
        };
        let py = MapPlane {
            normal: [0.0, 1.0, 0.0],
            dist: 32.0,
        };
        let pz = MapPlane {
            normal: [0.0, 0.0, 1.0],
            dist: 16.0,
        };
        assert_eq!(get_intersection(&px, &py, &pz), Some([64.0, 32.0, 16.0]));

        let px2 = MapPlane {
            normal: [1.0, 0.0, 0.0],
            dist: 128.0,
        };
        assert_eq!(get_intersection(&px, &px2, &py), None);
    }

    #[test]
    fn test_world_extent_from_cube() {
        let mut map = MapData::new();
        let brush = cube(&mut map, 64.0);
        let mut entity = MapEntity::default();
        entity.brushes.push(brush);
        map.entities.push(entity);

        // largest Quake hull is 64x64x88; ceil((64 + 88) * 2) + 24
        let options = CompileOptions::default();
        assert_eq!(calculate_world_extent(&map, &options), 328.0);
    }
}

// process.rs — whole-map passes run after parsing
//
// Order matters: external map references are resolved first, then
// area portals, then the geometry pass (world extent, bounds, origin
// brushes, bevels, rotation offsets). The entity string is produced
// last, once utility entities have been folded into the world.

use std::fs;
use std::path::Path;

use qmap_common::math::*;
use qmap_common::parser::Parser;

use crate::brush::{add_brush_bevels, calculate_brush_bounds, calculate_world_extent};
use crate::error::{MapError, Result};
use crate::map::{MapData, MapEntity, MapFace, MapPlane, RotationStyle};
use crate::options::CompileOptions;
use crate::parse::parse_entity;
use crate::texture::SessionTextures;

// ============================================================
// Entity classification
// ============================================================

/// Entities whose brushes are added to the world before the entity is
/// removed from the map.
pub fn is_world_brush_entity(entity: &MapEntity) -> bool {
    let classname = entity.classname();
    [
        "func_detail",
        "func_group",
        "func_detail_illusionary",
        "func_detail_wall",
        "func_detail_fence",
        "func_illusionary_visblocker",
    ]
    .iter()
    .any(|name| classname.eq_ignore_ascii_case(name))
}

/// Entities merged into the world but kept in the entity list.
pub fn is_non_remove_world_brush_entity(entity: &MapEntity) -> bool {
    entity.classname().eq_ignore_ascii_case("func_areaportal")
}

// ============================================================
// Face transforms (external map placement)
// ============================================================

fn refresh_face_plane(face: &mut MapFace, map: &mut MapData) {
    let ab = vector_subtract(&face.planepts[0], &face.planepts[1]);
    let cb = vector_subtract(&face.planepts[2], &face.planepts[1]);
    let mut normal = cross_product(&ab, &cb);
    vector_normalize(&mut normal);
    let dist = dot_product(&face.planepts[1], &normal);
    face.planenum = map.add_or_find_plane(&MapPlane { normal, dist });
    face.plane = map.planes[face.planenum];
}

fn update_face_vecs(
    face: &mut MapFace,
    map: &mut MapData,
    options: &CompileOptions,
    transform: impl Fn(&mut [[f64; 4]; 2]),
) {
    let mut texinfo = map.texinfos[face.texinfo].clone();
    transform(&mut texinfo.vecs.0);
    texinfo.next = None;
    face.texinfo = map.find_texinfo(texinfo, options);
}

fn scale_map_face(face: &mut MapFace, map: &mut MapData, options: &CompileOptions, scale: &Vec3) {
    for point in &mut face.planepts {
        for i in 0..3 {
            point[i] *= scale[i];
        }
    }
    refresh_face_plane(face, map);

    update_face_vecs(face, map, options, |vecs| {
        for row in vecs.iter_mut() {
            for i in 0..3 {
                row[i] /= scale[i];
            }
        }
    });
}

fn rotate_map_face(face: &mut MapFace, map: &mut MapData, options: &CompileOptions, angles: &Vec3) {
    let pitch = angles[0].to_radians();
    let yaw = angles[1].to_radians();
    let roll = angles[2].to_radians();
    let rotation = mat3_mul(
        &mat3_mul(&rotate_about_z(yaw), &rotate_about_y(pitch)),
        &rotate_about_x(roll),
    );

    for point in &mut face.planepts {
        *point = mat3_mul_vec3(&rotation, point);
    }
    refresh_face_plane(face, map);

    update_face_vecs(face, map, options, |vecs| {
        for row in vecs.iter_mut() {
            let rotated = mat3_mul_vec3(&rotation, &[row[0], row[1], row[2]]);
            row[..3].copy_from_slice(&rotated);
        }
    });
}

fn translate_map_face(
    face: &mut MapFace,
    map: &mut MapData,
    options: &CompileOptions,
    offset: &Vec3,
) {
    for point in &mut face.planepts {
        *point = vector_add(point, offset);
    }
    refresh_face_plane(face, map);

    update_face_vecs(face, map, options, |vecs| {
        for row in vecs.iter_mut() {
            let axis = [row[0], row[1], row[2]];
            row[3] += dot_product(&axis, &vector_negate(offset));
        }
    });
}

// ============================================================
// External maps
// ============================================================

/// Loads an external .map file; every brush in it ends up on the
/// returned worldspawn. Planes and texinfos are interned into the
/// session tables.
fn load_external_map(
    filename: &str,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &mut SessionTextures,
) -> Result<MapEntity> {
    let data = fs::read_to_string(filename).map_err(|source| MapError::Io {
        path: filename.to_string(),
        source,
    })?;
    let mut parser = Parser::new(&data, Some(filename.to_string()));

    let mut dest = parse_entity(&mut parser, map, options, textures)?.ok_or_else(|| {
        MapError::parse(
            parser.location(),
            format!("'{}': couldn't parse worldspawn entity", filename),
        )
    })?;
    if !dest.classname().eq_ignore_ascii_case("worldspawn") {
        return Err(MapError::parse(
            parser.location(),
            format!(
                "'{}': expected first entity to be worldspawn, got: '{}'",
                filename,
                dest.classname()
            ),
        ));
    }

    while let Some(mut entity) = parse_entity(&mut parser, map, options, textures)? {
        dest.brushes.append(&mut entity.brushes);
    }

    if dest.brushes.is_empty() {
        return Err(MapError::parse(
            parser.location(),
            format!("expected at least one brush for external map {}", filename),
        ));
    }

    log::info!("'{}': loaded {} mapbrushes", filename, dest.brushes.len());
    Ok(dest)
}

/// Resolves a misc_external_map point entity: its brushes come from
/// another file, scaled, rotated and translated into place, and its
/// classname is replaced.
pub fn process_external_map_entity(
    map: &mut MapData,
    index: usize,
    options: &CompileOptions,
    textures: &mut SessionTextures,
) -> Result<()> {
    if !map.entities[index]
        .classname()
        .eq_ignore_ascii_case("misc_external_map")
    {
        return Ok(());
    }

    let mut entity = std::mem::take(&mut map.entities[index]);
    let location = entity.location.clone();

    let file = entity.epairs.get("_external_map").unwrap_or("").to_string();
    let new_classname = entity
        .epairs
        .get("_external_map_classname")
        .unwrap_or("")
        .to_string();
    if file.is_empty() || new_classname.is_empty() {
        return Err(MapError::parse(
            location,
            "misc_external_map requires _external_map and _external_map_classname",
        ));
    }
    if !entity.brushes.is_empty() {
        return Err(MapError::parse(
            location,
            "misc_external_map must be a point entity",
        ));
    }

    let external_worldspawn = load_external_map(&file, map, options, textures)?;
    entity.brushes = external_worldspawn.brushes;

    let mut origin = [0.0; 3];
    entity.epairs.get_vector("origin", &mut origin);

    let mut angles = [0.0; 3];
    entity.epairs.get_vector("_external_map_angles", &mut angles);
    if angles.iter().all(|v| v.abs() < EQUAL_EPSILON) {
        angles[1] = entity.epairs.get_float("_external_map_angle").unwrap_or(0.0);
    }

    let mut scale = [1.0; 3];
    if let Some(raw) = entity.epairs.get("_external_map_scale") {
        let comps: Vec<f64> = raw
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        if comps.len() >= 3 {
            scale = [comps[0], comps[1], comps[2]];
        } else if let Some(&first) = comps.first() {
            if first != 0.0 {
                scale = [first; 3];
            }
        }
    }

    for brush in &mut entity.brushes {
        for face in &mut brush.faces {
            scale_map_face(face, map, options, &scale);
            rotate_map_face(face, map, options, &angles);
            translate_map_face(face, map, options, &origin);
        }
    }

    entity.epairs.set("classname", &new_classname);
    entity.epairs.set("origin", "0 0 0");

    map.entities[index] = entity;
    Ok(())
}

// ============================================================
// Area portals
// ============================================================

/// func_areaportal brushes become portal volumes: forced areaportal
/// contents, faces retextured to skip, and a per-map portal number
/// written back as the entity's style key.
pub fn process_areaportal(
    map: &mut MapData,
    index: usize,
    options: &CompileOptions,
    textures: &SessionTextures,
) -> Result<()> {
    if !map.entities[index]
        .classname()
        .eq_ignore_ascii_case("func_areaportal")
    {
        return Ok(());
    }

    let skip_texinfo = map.skip_texinfo(options, &textures.table)?;
    let mut entity = std::mem::take(&mut map.entities[index]);

    if entity.brushes.len() != 1 {
        return Err(MapError::parse(
            entity.location.clone(),
            "func_areaportal can only be a single brush",
        ));
    }

    let native = options.game.areaportal_contents();
    for brush in &mut entity.brushes {
        brush.contents.native = native;
        for face in &mut brush.faces {
            face.contents.native = native;
            face.texinfo = skip_texinfo;
        }
    }

    map.num_areaportals += 1;
    entity.areaportalnum = map.num_areaportals;
    entity.epairs.set("style", &map.num_areaportals.to_string());

    map.entities[index] = entity;
    Ok(())
}

// ============================================================
// Geometry pass
// ============================================================

/// Origin of a legacy "rotate_" entity: the origin of the entity its
/// target key points at. The result is written back as an origin key.
fn fix_rotate_origin(entities: &[MapEntity], entity: &mut MapEntity) -> Vec3 {
    let mut origin = [0.0; 3];
    let target = entity.epairs.get("target").unwrap_or("").to_string();

    let mut found = false;
    if !target.is_empty() {
        for other in entities {
            if other.epairs.get("targetname") == Some(target.as_str()) {
                other.epairs.get_vector("origin", &mut origin);
                found = true;
                break;
            }
        }
    }
    if !found {
        log::warn!(
            "{}: no target for rotation entity \"{}\"",
            entity.location,
            entity.classname()
        );
    }

    entity.epairs.set(
        "origin",
        &format!(
            "{} {} {}",
            origin[0] as i32, origin[1] as i32, origin[2] as i32
        ),
    );
    origin
}

/// The per-brush geometry pass: world extent, face windings and brush
/// bounds, origin-brush extraction, bevel planes and rotation offsets.
pub fn process_map_brushes(map: &mut MapData, options: &CompileOptions) -> Result<()> {
    if options.world_extent != 0.0 {
        map.world_extent = options.world_extent;
    } else {
        map.world_extent = calculate_world_extent(map, options);
    }

    let mut num_brushes = 0usize;
    let mut num_faces = 0usize;
    let mut num_bevels = 0usize;
    let mut num_removed = 0usize;
    let mut num_offset = 0usize;

    for index in 0..map.entities.len() {
        let mut entity = std::mem::take(&mut map.entities[index]);
        let is_world = index == 0;

        entity.rotation = RotationStyle::None;

        // lightmap scale, power of two only
        let mut i = (16.0 * entity.epairs.get_float("_lmscale").unwrap_or(0.0)) as i32;
        if i == 0 {
            i = 16;
        }
        let mut lmshift: u16 = 0;
        while i > 1 {
            lmshift += 1;
            i /= 2;
        }

        let brushes = std::mem::take(&mut entity.brushes);
        let mut kept = Vec::with_capacity(brushes.len());
        for mut brush in brushes {
            brush.lmshift = lmshift;
            brush.is_hint = brush
                .faces
                .iter()
                .any(|face| map.texinfos[face.texinfo].flags.is_hint);
            calculate_brush_bounds(&mut brush, map);

            // origin brushes are removed; the entity origin becomes
            // their centroid
            if options.game.contents_are_origin(&brush.contents) {
                if is_world {
                    log::warn!("ignoring origin brush in worldspawn");
                } else if entity.epairs.has("origin") {
                    log::warn!("{}: entity has multiple origin brushes", brush.location);
                } else {
                    entity.origin = brush.bounds.centroid();
                    entity.epairs.set(
                        "origin",
                        &format!(
                            "{} {} {}",
                            entity.origin[0], entity.origin[1], entity.origin[2]
                        ),
                    );
                }
                num_removed += 1;
                entity.rotation = RotationStyle::OriginBrush;
                continue;
            }

            let old_num_faces = brush.faces.len();
            num_faces += old_num_faces;
            add_brush_bevels(&mut brush, map, options);
            num_bevels += brush.faces.len() - old_num_faces;

            // bevels included; the light stage reads this per face
            for face in &mut brush.faces {
                face.lmshift = brush.lmshift;
            }

            kept.push(brush);
        }
        entity.brushes = kept;
        num_brushes += entity.brushes.len();

        // Hipnotic rotation
        let is_rotate = entity
            .classname()
            .get(..7)
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("rotate_"));
        if entity.rotation == RotationStyle::None && is_rotate {
            entity.origin = fix_rotate_origin(&map.entities, &mut entity);
            entity.rotation = RotationStyle::Hipnotic;
        }

        // rotating entities pivot about their origin; move the brush
        // planes so the origin becomes the coordinate zero
        if entity.rotation != RotationStyle::None {
            let origin = entity.origin;
            for brush in &mut entity.brushes {
                for face in &mut brush.faces {
                    // keep textures locked to the moved geometry
                    if !options.oldrottex {
                        update_face_vecs(face, map, options, |vecs| {
                            for row in vecs.iter_mut() {
                                let axis = [row[0], row[1], row[2]];
                                row[3] += dot_product(&origin, &axis);
                            }
                        });
                    }

                    let mut plane = map.planes[face.planenum];
                    plane.dist -= dot_product(&plane.normal, &origin);
                    face.planenum = map.add_or_find_plane(&plane);
                    face.plane = map.planes[face.planenum];
                }

                calculate_brush_bounds(brush, map);
                num_offset += 1;
            }
        }

        // windings are not needed past this point
        for brush in &mut entity.brushes {
            for face in &mut brush.faces {
                face.winding = None;
            }
        }

        map.entities[index] = entity;
    }

    log::info!("{:8} brushes", num_brushes);
    log::info!("{:8} faces", num_faces);
    log::info!("{:8} bevel faces", num_bevels);
    if num_removed > 0 {
        log::info!("{:8} utility brushes removed", num_removed);
    }
    if num_offset > 0 {
        log::info!("{:8} brushes translated from origins", num_offset);
    }

    if let Some(hull_index) = options.debug_expand_hull {
        let hulls = options.game.hull_sizes();
        let Some(hull) = hulls.get(hull_index).copied() else {
            return Err(MapError::Internal(format!(
                "invalid hull index {} passed to expansion dump",
                hull_index
            )));
        };
        let world_brushes = map.world().map(|w| w.brushes.clone()).unwrap_or_default();
        crate::convert::write_expanded_hull_map(
            Path::new("expanded.map"),
            &world_brushes,
            &hull,
            map,
        )?;
    }

    Ok(())
}

// ============================================================
// Entity string
// ============================================================

/// Serializes the surviving entities to the key/value block format the
/// engine reads. World-merged brush entities are dropped; oversized
/// keys and values are warned about but written anyway.
pub fn write_entities_to_string(map: &MapData, options: &CompileOptions) -> String {
    let mut out = String::new();

    for entity in &map.entities {
        if entity.epairs.is_empty() || is_world_brush_entity(entity) {
            continue;
        }

        out.push_str("{\n");
        for (key, value) in entity.epairs.iter() {
            if key.len() >= options.game.max_entity_key() - 1 {
                log::warn!(
                    "{} has long key {} (length {} >= {})",
                    entity.classname(),
                    key,
                    key.len(),
                    options.game.max_entity_key() - 1
                );
            }
            if value.len() >= options.game.max_entity_value() - 1 {
                log::warn!(
                    "{} has long value for key {} (length {} >= {})",
                    entity.classname(),
                    key,
                    value.len(),
                    options.game.max_entity_value() - 1
                );
            }
            out.push_str(&format!("\"{}\" \"{}\"\n", key, value));
        }
        out.push_str("}\n");
    }

    out
}

// convert.rs — re-serializing a parsed map as .map text
//
// Faces are written from the interned texture vectors, not the source
// text, so a conversion run re-derives every texture definition in the
// requested convention. Plane points survive verbatim.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use qmap_common::math::*;
use qmap_common::winding::base_winding_for_plane;

use crate::error::{MapError, Result};
use crate::map::{MapBrush, MapData, MapEntity, MapFace};
use crate::options::CompileOptions;
use crate::texdef;
use crate::texture::SessionTextures;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionFormat {
    /// Classic shift/rotate/scale texturing.
    Quake,
    /// Classic texturing plus contents/flags/value trailers.
    Quake2,
    /// Valve 220 axis blocks.
    Valve,
    /// Radiant brushDef matrices.
    Bp,
}

impl ConversionFormat {
    pub fn suffix(&self) -> &'static str {
        match self {
            ConversionFormat::Quake => "-quake",
            ConversionFormat::Quake2 => "-quake2",
            ConversionFormat::Valve => "-valve",
            ConversionFormat::Bp => "-bp",
        }
    }
}

/// Writes a number the way the classic tools did: integral values as
/// integers, anything else with full round-trip precision, and a space
/// after either. Non-finite values are suppressed.
fn write_number(out: &mut String, v: f64) {
    let rounded = v.round();
    if rounded == v && v.is_finite() {
        let _ = write!(out, "{} ", rounded as i64);
    } else if v.is_finite() {
        let _ = write!(out, "{} ", v);
    } else {
        log::warn!("suppressing nan or infinity");
        out.push_str("0 ");
    }
}

fn convert_map_face(
    out: &mut String,
    face: &MapFace,
    map: &MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
    format: ConversionFormat,
) -> Result<()> {
    let texture = textures.table_find(&face.texname);
    let texinfo = &map.texinfos[face.texinfo];

    for point in &face.planepts {
        out.push_str(" ( ");
        for v in point {
            write_number(out, *v);
        }
        out.push_str(") ");
    }

    match format {
        ConversionFormat::Quake | ConversionFormat::Quake2 => {
            let quakeed = texdef::quake_ed_from_vecs(
                &face.plane,
                texture.as_ref(),
                &texinfo.vecs,
                &face.planepts,
                options.oldaxis,
            )?;

            let _ = write!(out, "{} ", face.texname);
            write_number(out, quakeed.shift[0]);
            write_number(out, quakeed.shift[1]);
            write_number(out, quakeed.rotate);
            write_number(out, quakeed.scale[0]);
            write_number(out, quakeed.scale[1]);

            if let Some(raw) = face.raw_q2 {
                let _ = write!(out, "{} {} {}", raw[0], raw[1], raw[2]);
            }
        }
        ConversionFormat::Valve => {
            let valve = texdef::valve_from_vecs(&texinfo.vecs);

            let _ = write!(out, "{} [ ", face.texname);
            write_number(out, valve.axes[0][0]);
            write_number(out, valve.axes[0][1]);
            write_number(out, valve.axes[0][2]);
            write_number(out, valve.shift[0]);
            out.push_str("] [ ");
            write_number(out, valve.axes[1][0]);
            write_number(out, valve.axes[1][1]);
            write_number(out, valve.axes[1][2]);
            write_number(out, valve.shift[1]);
            out.push_str("] 0 ");
            write_number(out, valve.scale[0]);
            write_number(out, valve.scale[1]);

            if let Some(raw) = face.raw_q2 {
                let _ = write!(out, "{} {} {}", raw[0], raw[1], raw[2]);
            }
        }
        ConversionFormat::Bp => {
            let (width, height) = texture.map_or((64, 64), |m| (m.width, m.height));
            let bp = texdef::brush_primitives_from_vecs(&face.plane, width, height, &texinfo.vecs);

            out.push_str("( ( ");
            write_number(out, bp[0][0]);
            write_number(out, bp[0][1]);
            write_number(out, bp[0][2]);
            out.push_str(") ( ");
            write_number(out, bp[1][0]);
            write_number(out, bp[1][1]);
            write_number(out, bp[1][2]);

            // brushDef always carries the native numbers
            let _ = write!(out, ") ) {} ", face.texname);
            match face.raw_q2 {
                Some(raw) => {
                    let _ = write!(out, "{} {} {}", raw[0], raw[1], raw[2]);
                }
                None => out.push_str("0 0 0"),
            }
        }
    }

    out.push('\n');
    Ok(())
}

fn convert_map_brush(
    out: &mut String,
    brush: &MapBrush,
    map: &MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
    format: ConversionFormat,
) -> Result<()> {
    out.push_str("{\n");
    if format == ConversionFormat::Bp {
        out.push_str("brushDef\n{\n");
    }
    for face in &brush.faces {
        convert_map_face(out, face, map, options, textures, format)?;
    }
    if format == ConversionFormat::Bp {
        out.push_str("}\n");
    }
    out.push_str("}\n");
    Ok(())
}

fn convert_entity(
    out: &mut String,
    entity: &MapEntity,
    map: &MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
    format: ConversionFormat,
) -> Result<()> {
    out.push_str("{\n");
    for (key, value) in entity.epairs.iter() {
        let _ = writeln!(out, "\"{}\" \"{}\"", key, value);
    }
    for brush in &entity.brushes {
        convert_map_brush(out, brush, map, options, textures, format)?;
    }
    out.push_str("}\n");
    Ok(())
}

/// Serializes the whole map in the requested convention.
pub fn convert_map(
    map: &MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
    format: ConversionFormat,
) -> Result<String> {
    let mut out = String::new();
    for entity in &map.entities {
        convert_entity(&mut out, entity, map, options, textures, format)?;
    }
    Ok(out)
}

/// Writes the converted map next to `base_path` with the format suffix
/// appended to the stem. Returns the path written.
pub fn convert_map_file(
    map: &MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
    format: ConversionFormat,
    base_path: &Path,
) -> Result<PathBuf> {
    let stem = base_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut filename = base_path.to_path_buf();
    filename.set_file_name(format!("{}{}.map", stem, format.suffix()));

    let text = convert_map(map, options, textures, format)?;
    fs::write(&filename, text).map_err(|source| MapError::Write {
        path: filename.display().to_string(),
        source,
    })?;

    log::info!("conversion saved to {}", filename.display());
    Ok(filename)
}

/// Debug dump of brushes expanded by a hull size, as a loadable map.
/// Bevel and drawn faces alike are pushed out by the hull corner that
/// lies furthest along their plane normal.
pub fn write_expanded_hull_map(
    path: &Path,
    brushes: &[MapBrush],
    hull: &Aabb3,
    map: &MapData,
) -> Result<()> {
    log::info!("writing {}", path.display());

    let mut out = String::from("{\n\"classname\" \"worldspawn\"\n");
    for brush in brushes {
        out.push_str("{\n");
        for face in &brush.faces {
            let mut plane = map.planes[face.planenum];
            let mut corner = [0.0; 3];
            for x in 0..3 {
                if plane.normal[x] > 0.0 {
                    corner[x] = hull.maxs[x];
                } else if plane.normal[x] < 0.0 {
                    corner[x] = hull.mins[x];
                }
            }
            plane.dist += dot_product(&corner, &plane.normal);

            let w = base_winding_for_plane(&plane.normal, plane.dist, map.world_extent);
            for point in w.points.iter().take(3) {
                out.push_str("( ");
                for v in point {
                    write_number(&mut out, *v);
                }
                out.push_str(") ");
            }
            let _ = writeln!(out, "{} 0 0 0 1 1", face.texname);
        }
        out.push_str("}\n");
    }
    out.push_str("}\n");

    fs::write(path, out).map_err(|source| MapError::Write {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Quake2Rules;
    use crate::parse::parse_entity;
    use qmap_common::parser::Parser;

    fn parse_map(source: &str, options: &CompileOptions) -> (MapData, SessionTextures) {
        let mut map = MapData::new();
        let mut parser = Parser::new(source, None);
        let mut textures = SessionTextures::default();
        while let Some(entity) = parse_entity(&mut parser, &mut map, options, &mut textures)
            .expect("parse failed")
        {
            map.entities.push(entity);
        }
        (map, textures)
    }

    const QUAKE_CUBE: &str = r#"
{
    "classname" "worldspawn"
    {
        ( 360 240 32 ) ( 232 240 32 ) ( 232 112 32 ) rock1 0 0 0 1 1
        ( 232 240 64 ) ( 232 240 32 ) ( 360 240 32 ) rock1 0 0 0 1 1
        ( 360 112 32 ) ( 232 112 32 ) ( 232 112 64 ) rock1 0 0 0 1 1
        ( 360 240 64 ) ( 360 240 32 ) ( 360 112 32 ) rock1 0 0 0 1 1
        ( 232 240 32 ) ( 232 240 64 ) ( 232 112 64 ) rock1 0 0 0 1 1
        ( 232 112 64 ) ( 232 240 64 ) ( 360 240 64 ) rock1 16 -32 0 1 1
    }
}
"#;

    #[test]
    fn test_write_number_formats() {
        let mut out = String::new();
        write_number(&mut out, 64.0);
        write_number(&mut out, -0.5);
        write_number(&mut out, f64::INFINITY);
        assert_eq!(out, "64 -0.5 0 ");
    }

    #[test]
    fn test_quake_round_trip_keeps_texdef() {
        let options = CompileOptions::default();
        let (map, textures) = parse_map(QUAKE_CUBE, &options);
        let out =
            convert_map(&map, &options, &textures, ConversionFormat::Quake).expect("convert");

        assert!(out.contains("\"classname\" \"worldspawn\""));
        assert!(out.contains("( 232 112 64 ) "));

        // the decoder picks the first matching sign pair, so the top
        // face comes back as the 180-degree flip of "16 -32 0 1 1";
        // both spell the same projection
        let face = map.entities[0].brushes[0]
            .faces
            .iter()
            .find(|f| f.plane.normal == [0.0, 0.0, 1.0])
            .expect("no top face");
        let quakeed = texdef::quake_ed_from_vecs(
            &face.plane,
            None,
            &map.texinfos[face.texinfo].vecs,
            &face.planepts,
            options.oldaxis,
        )
        .expect("decode failed");
        assert!(equal_degrees(quakeed.rotate, 180.0), "{}", quakeed.rotate);
        assert!((quakeed.scale[0] + 1.0).abs() < 0.001);
        assert!((quakeed.scale[1] + 1.0).abs() < 0.001);
        assert!((quakeed.shift[0] - 16.0).abs() < 0.1);
        assert!((quakeed.shift[1] + 32.0).abs() < 0.1);

        // the output parses again to identical texture vectors
        let (map2, _) = parse_map(&out, &options);
        let vecs: Vec<_> = map.texinfos.iter().map(|t| t.vecs).collect();
        let vecs2: Vec<_> = map2.texinfos.iter().map(|t| t.vecs).collect();
        assert_eq!(vecs, vecs2);
    }

    #[test]
    fn test_valve_output_format() {
        let options = CompileOptions::default();
        let (map, textures) = parse_map(QUAKE_CUBE, &options);
        let out =
            convert_map(&map, &options, &textures, ConversionFormat::Valve).expect("convert");
        assert!(out.contains("rock1 [ 1 0 0 16 ] [ 0 -1 0 -32 ] 0 1 1"));
    }

    #[test]
    fn test_bp_output_has_brushdef() {
        let options = CompileOptions::default();
        let (map, textures) = parse_map(QUAKE_CUBE, &options);
        let out = convert_map(&map, &options, &textures, ConversionFormat::Bp).expect("convert");
        assert!(out.contains("brushDef\n{\n"));
        // native numbers default to zero for a Quake source
        assert!(out.contains(") ) rock1 0 0 0"));
    }

    #[test]
    fn test_quake2_echoes_raw_numbers() {
        let source = r#"
{
    "classname" "worldspawn"
    {
        ( 360 240 32 ) ( 232 240 32 ) ( 232 112 32 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 232 240 64 ) ( 232 240 32 ) ( 360 240 32 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 360 112 32 ) ( 232 112 32 ) ( 232 112 64 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 360 240 64 ) ( 360 240 32 ) ( 360 112 32 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 232 240 32 ) ( 232 240 64 ) ( 232 112 64 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 232 112 64 ) ( 232 240 64 ) ( 360 240 64 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
    }
}
"#;
        let options = CompileOptions::for_game(Box::new(Quake2Rules::default()));
        let (map, textures) = parse_map(source, &options);
        let out =
            convert_map(&map, &options, &textures, ConversionFormat::Quake2).expect("convert");
        // whatever texdef the decoder settles on, the literal
        // contents/flags/value trailer survives on every face
        let face_lines: Vec<&str> = out
            .lines()
            .filter(|line| line.contains("e1u1/floor1_1"))
            .collect();
        assert_eq!(face_lines.len(), 6);
        for line in &face_lines {
            assert!(line.trim_end().ends_with(" 1 0 0"), "{}", line);
        }
    }
}

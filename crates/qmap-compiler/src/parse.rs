// parse.rs — .map text to entities, brushes and faces
//
// The grammar is brace-structured: entities hold key/value pairs and
// brush blocks, brushes hold one face per line. Recoverable problems
// (degenerate faces, duplicate planes, bad contents) are logged and
// repaired; structural damage is fatal.

use qmap_common::math::*;
use qmap_common::parser::{ParseFlags, Parser};

use crate::error::{MapError, Result};
use crate::game::{self, Contents, GameId, SurfFlags};
use crate::map::{
    BrushFormat, MapBrush, MapData, MapEntity, MapFace, MapPlane, TexInfo, TexVecs,
};
use crate::options::CompileOptions;
use crate::texdef::{self, QuarkStyle, TexDef};
use crate::texture::SessionTextures;

// ============================================================
// Texture-name classification
// ============================================================

fn is_skip_name(name: &str, options: &CompileOptions) -> bool {
    if options.noskip {
        return false;
    }
    for skip in [
        "skip",
        "*waterskip",
        "*slimeskip",
        "*lavaskip",
        "bevel", // zhlt compat
        "null", // zhlt compat
    ] {
        if name.eq_ignore_ascii_case(skip) {
            return true;
        }
    }
    false
}

fn is_no_expand_name(name: &str) -> bool {
    name.eq_ignore_ascii_case("bevel") // zhlt compat
}

fn is_special_name(name: &str, options: &CompileOptions) -> bool {
    if name.starts_with('*') && !options.splitturb {
        return true;
    }
    if name.len() >= 3 && name[..3].eq_ignore_ascii_case("sky") && !options.splitsky {
        return true;
    }
    false
}

fn is_hint_name(name: &str) -> bool {
    name.eq_ignore_ascii_case("hint") || name.eq_ignore_ascii_case("hintskip")
}

// ============================================================
// Surface flags
// ============================================================

fn color_epsilon_empty(c: &Vec3) -> bool {
    c.iter().all(|v| v.abs() < EQUAL_EPSILON)
}

/// Colors may be given as 0..1 floats or 0..255 bytes.
fn normalize_color_format(c: Vec3) -> Vec3 {
    if c[0] > 1.0 || c[1] > 1.0 || c[2] > 1.0 {
        c
    } else {
        vector_scale(&c, 255.0)
    }
}

/// Derives the compiler surface flags of one face from its texture
/// name, its native flag bits and the owning entity's keys.
pub fn surf_flags_for_entity(
    native: i32,
    texname: &str,
    entity: &MapEntity,
    options: &CompileOptions,
) -> SurfFlags {
    let mut flags = SurfFlags::default();
    let epairs = &entity.epairs;
    let shadow = epairs.get_int("_shadow").unwrap_or(0);

    if options.game.id() != GameId::Quake2 {
        if is_skip_name(texname, options) {
            flags.is_skip = true;
        }
        if is_hint_name(texname) {
            flags.is_hint = true;
        }
        if is_special_name(texname, options) {
            flags.native |= game::TEX_SPECIAL;
        }
    } else {
        flags.native = native;

        if flags.native & game::SURF_NODRAW != 0 || is_skip_name(texname, options) {
            flags.is_skip = true;
        }
        if flags.native & game::SURF_HINT != 0 || is_hint_name(texname) {
            flags.is_hint = true;
        }
    }
    if is_no_expand_name(texname) {
        flags.no_expand = true;
    }
    if epairs.get_int("_dirt") == Some(-1) {
        flags.no_dirt = true;
    }
    if epairs.get_int("_bounce") == Some(-1) {
        flags.no_bounce = true;
    }
    if epairs.get_int("_minlight") == Some(-1) {
        flags.no_minlight = true;
    }
    if epairs.get_int("_lightignore") == Some(1) {
        flags.light_ignore = true;
    }

    // "_minlight_exclude", "_minlight_exclude2", ...
    for i in 0..=9 {
        let key = if i == 0 {
            "_minlight_exclude".to_string()
        } else {
            format!("_minlight_exclude{}", i)
        };
        if let Some(exclude) = epairs.get(&key) {
            if !exclude.is_empty() && texname.eq_ignore_ascii_case(exclude) {
                flags.no_minlight = true;
            }
        }
    }

    if shadow == -1 {
        flags.no_shadow = true;
    }
    if entity.classname().eq_ignore_ascii_case("func_detail_illusionary") {
        // these cast no shadows unless the mapper explicitly asks
        if shadow != 1 {
            flags.no_shadow = true;
        }
    }

    let mut phongangle = epairs.get_float("_phong_angle").unwrap_or(0.0);
    let phong = epairs.get_int("_phong").unwrap_or(0);
    if phong != 0 && phongangle == 0.0 {
        phongangle = 89.0;
    }
    if phongangle != 0.0 {
        flags.phong_angle = phongangle.clamp(0.0, 360.0);
    }

    let phong_angle_concave = epairs.get_float("_phong_angle_concave").unwrap_or(0.0);
    flags.phong_angle_concave = phong_angle_concave.clamp(0.0, 360.0);

    let minlight = epairs.get_float("_minlight").unwrap_or(0.0);
    if minlight > 0.0 {
        flags.minlight = minlight.clamp(0.0, 510.0);
    }

    {
        let mut mincolor = [0.0; 3];
        epairs.get_vector("_mincolor", &mut mincolor);
        if color_epsilon_empty(&mincolor) {
            epairs.get_vector("_minlight_color", &mut mincolor);
        }
        let mincolor = normalize_color_format(mincolor);
        if !color_epsilon_empty(&mincolor) {
            for i in 0..3 {
                flags.minlight_color[i] = mincolor[i].clamp(0.0, 255.0);
            }
        }
    }

    let lightalpha = epairs.get_float("_light_alpha").unwrap_or(0.0);
    if lightalpha != 0.0 {
        flags.light_alpha = lightalpha.clamp(0.0, 1.0);
    }

    flags
}

// ============================================================
// Token helpers
// ============================================================

fn expect_token(parser: &mut Parser, flags: ParseFlags, what: &str) -> Result<()> {
    if !parser.parse_token(flags) {
        return Err(MapError::parse(
            parser.location(),
            format!("unexpected end of input, expected {}", what),
        ));
    }
    Ok(())
}

fn token_number(parser: &Parser) -> Result<f64> {
    parser.token.parse().map_err(|_| {
        MapError::parse(
            parser.location(),
            format!("couldn't parse \"{}\" as a number", parser.token),
        )
    })
}

// ============================================================
// Face-level parsing
// ============================================================

#[derive(Default)]
struct ExtendedTx {
    quark: Option<QuarkStyle>,
    /// contents, flags, value
    info: Option<[i32; 3]>,
}

/// Reads the optional trailer after a texture definition: either a
/// `//TX1` / `//TX2` comment marking QuArK-style coordinates, or up to
/// three Quake II surface numbers.
fn parse_extended_tx(parser: &mut Parser) -> ExtendedTx {
    let mut ext = ExtendedTx::default();

    let first = ParseFlags::SAMELINE | ParseFlags::COMMENT | ParseFlags::OPTIONAL;
    if !parser.parse_token(first) {
        return ext;
    }

    if let Some(rest) = parser.token.strip_prefix("//TX") {
        ext.quark = match rest.chars().next() {
            Some('1') => Some(QuarkStyle::Type1),
            Some('2') => Some(QuarkStyle::Type2),
            _ => None,
        };
        return ext;
    }

    if let Ok(contents) = parser.token.trim().parse::<i32>() {
        let mut info = [contents, 0, 0];
        for slot in &mut info[1..] {
            if !parser.parse_token(ParseFlags::SAMELINE | ParseFlags::OPTIONAL) {
                break;
            }
            if let Ok(v) = parser.token.trim().parse() {
                *slot = v;
            }
        }
        ext.info = Some(info);
    }
    ext
}

/// Reads `( x y z ) ( x y z ) ( x y z )`. The opening paren of the
/// first point is the current token.
fn parse_plane_def(parser: &mut Parser) -> Result<[Vec3; 3]> {
    let mut planepts = [[0.0; 3]; 3];

    for (i, point) in planepts.iter_mut().enumerate() {
        if i != 0 {
            expect_token(parser, ParseFlags::empty(), "\"(\"")?;
        }
        if parser.token != "(" {
            return Err(MapError::parse(
                parser.location(),
                "invalid brush plane format",
            ));
        }
        for value in point.iter_mut() {
            expect_token(parser, ParseFlags::SAMELINE, "a plane coordinate")?;
            *value = token_number(parser)?;
        }
        expect_token(parser, ParseFlags::SAMELINE, "\")\"")?;
        if parser.token != ")" {
            return Err(MapError::parse(
                parser.location(),
                "invalid brush plane format",
            ));
        }
    }
    Ok(planepts)
}

/// `[ ux uy uz ushift ] [ vx vy vz vshift ] rotate xscale yscale`
fn parse_valve220_tx(parser: &mut Parser) -> Result<([Vec3; 2], Vec2, f64, Vec2)> {
    let mut axes = [[0.0; 3]; 2];
    let mut shift = [0.0; 2];
    let mut scale = [0.0; 2];

    for i in 0..2 {
        expect_token(parser, ParseFlags::SAMELINE, "\"[\"")?;
        if parser.token != "[" {
            return Err(MapError::parse(
                parser.location(),
                "couldn't parse Valve220 texture info",
            ));
        }
        for j in 0..3 {
            expect_token(parser, ParseFlags::SAMELINE, "a texture axis value")?;
            axes[i][j] = token_number(parser)?;
        }
        expect_token(parser, ParseFlags::SAMELINE, "a texture shift value")?;
        shift[i] = token_number(parser)?;
        expect_token(parser, ParseFlags::SAMELINE, "\"]\"")?;
        if parser.token != "]" {
            return Err(MapError::parse(
                parser.location(),
                "couldn't parse Valve220 texture info",
            ));
        }
    }
    expect_token(parser, ParseFlags::SAMELINE, "a texture rotation")?;
    let rotate = token_number(parser)?;
    for s in &mut scale {
        expect_token(parser, ParseFlags::SAMELINE, "a texture scale value")?;
        *s = token_number(parser)?;
    }
    Ok((axes, shift, rotate, scale))
}

/// `( ( xx xy xshift ) ( yx yy yshift ) )`
fn parse_brush_prim_tx(parser: &mut Parser) -> Result<[[f64; 3]; 2]> {
    let bad = |parser: &Parser| {
        MapError::parse(
            parser.location(),
            "couldn't parse brush primitives texture info",
        )
    };

    expect_token(parser, ParseFlags::SAMELINE, "\"(\"")?;
    if parser.token != "(" {
        return Err(bad(parser));
    }

    let mut mat = [[0.0; 3]; 2];
    for row in &mut mat {
        expect_token(parser, ParseFlags::SAMELINE, "\"(\"")?;
        if parser.token != "(" {
            return Err(bad(parser));
        }
        for value in row.iter_mut() {
            expect_token(parser, ParseFlags::SAMELINE, "a texture matrix value")?;
            *value = token_number(parser)?;
        }
        expect_token(parser, ParseFlags::SAMELINE, "\")\"")?;
        if parser.token != ")" {
            return Err(bad(parser));
        }
    }

    expect_token(parser, ParseFlags::SAMELINE, "\")\"")?;
    if parser.token != ")" {
        return Err(bad(parser));
    }
    Ok(mat)
}

struct ParsedTexDef {
    texname: String,
    texdef: TexDef,
    vecs: TexVecs,
    contents: Contents,
    flags_native: i32,
    value: i32,
    raw_q2: Option<[i32; 3]>,
    miptex: usize,
}

fn parse_texture_def(
    parser: &mut Parser,
    format: BrushFormat,
    planepts: &[Vec3; 3],
    plane: &MapPlane,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
) -> Result<ParsedTexDef> {
    let location = parser.location();

    let (mut texname, texdef, mut ext) = match format {
        BrushFormat::BrushPrimitives => {
            let mat = parse_brush_prim_tx(parser)?;
            expect_token(parser, ParseFlags::SAMELINE, "a texture name")?;
            let texname = parser.token.clone();
            let ext = parse_extended_tx(parser);
            (texname, TexDef::BrushPrimitives(mat), ext)
        }
        BrushFormat::Normal => {
            expect_token(parser, ParseFlags::SAMELINE, "a texture name")?;
            let texname = parser.token.clone();

            if parser.parse_token(
                ParseFlags::SAMELINE | ParseFlags::PEEK | ParseFlags::OPTIONAL,
            ) && parser.token == "["
            {
                let (axes, shift, rotate, scale) = parse_valve220_tx(parser)?;
                let ext = parse_extended_tx(parser);
                (
                    texname,
                    TexDef::Valve {
                        axes,
                        shift,
                        rotate,
                        scale,
                    },
                    ext,
                )
            } else {
                let mut shift = [0.0; 2];
                let mut scale = [0.0; 2];
                for s in &mut shift {
                    expect_token(parser, ParseFlags::SAMELINE, "a texture shift value")?;
                    *s = token_number(parser)?;
                }
                expect_token(parser, ParseFlags::SAMELINE, "a texture rotation")?;
                let rotate = token_number(parser)?;
                for s in &mut scale {
                    expect_token(parser, ParseFlags::SAMELINE, "a texture scale value")?;
                    *s = token_number(parser)?;
                }

                let ext = parse_extended_tx(parser);
                let texdef = match ext.quark {
                    Some(style) => TexDef::Quark(style),
                    None => TexDef::QuakeEd {
                        shift,
                        rotate,
                        scale,
                    },
                };
                (texname, texdef, ext)
            }
        }
    };

    texname = options.remap_texture(&texname).to_string();

    // the literal numbers, before any metadata merging
    let raw_q2 = ext.info;

    let (contents_native, flags_native, value);
    if options.game.id() != GameId::Quake2 {
        // stray Quake II numbers in a Quake map are dropped so the map
        // still compiles
        ext.info = None;
        contents_native = 0;
        flags_native = 0;
        value = 0;
    } else {
        let meta = textures.table_find(&texname);
        let mut info = match (ext.info, &meta) {
            (Some(info), _) => info,
            (None, Some(meta)) => [meta.contents, meta.flags, meta.value],
            (None, None) => [0, 0, 0],
        };

        if info[0] & game::CONTENTS_TRANSLUCENT != 0 {
            // only the compiler may set TRANSLUCENT; swap it for
            // DETAIL when no transparency flag backs it up
            info[0] &= !game::CONTENTS_TRANSLUCENT;
            if info[1] & (game::SURF_TRANS33 | game::SURF_TRANS66) == 0 {
                info[0] |= game::CONTENTS_DETAIL;
                log::warn!("{}: swapped TRANSLUCENT for DETAIL", location);
            }
        }

        if info[1] & (game::SURF_SKY | game::SURF_NODRAW)
            == (game::SURF_SKY | game::SURF_NODRAW)
        {
            info[1] &= !game::SURF_NODRAW;
            log::warn!("{}: SKY | NODRAW mixed, removing NODRAW", location);
        }

        contents_native = info[0];
        flags_native = info[1];
        value = info[2];
    }

    let miptex = map.find_miptex(&texname, flags_native, value, options, &textures.table)?;

    let mut contents = Contents::native(contents_native);
    if !options.game.contents_are_valid(&contents) {
        let old = contents;
        options.game.contents_make_valid(&mut contents);
        log::warn!(
            "{}: face has invalid contents {}, remapped to {}",
            location,
            options.game.contents_to_string(&old),
            options.game.contents_to_string(&contents)
        );
    }

    let vecs = match &texdef {
        TexDef::Quark(style) => texdef::vecs_from_quark(planepts, *style, &location),
        TexDef::Valve { axes, shift, scale, .. } => texdef::vecs_from_valve(axes, shift, scale),
        TexDef::BrushPrimitives(mat) => {
            let meta = textures.table_find(&texname);
            let (width, height) = meta.map_or((64, 64), |m| (m.width, m.height));
            texdef::vecs_from_brush_primitives(mat, &plane.normal, width, height)
        }
        TexDef::QuakeEd {
            shift,
            rotate,
            scale,
        } => texdef::vecs_from_quake_ed(&plane.normal, shift, *rotate, scale, options.oldaxis),
    };

    Ok(ParsedTexDef {
        texname,
        texdef,
        vecs,
        contents,
        flags_native,
        value,
        raw_q2,
        miptex,
    })
}

/// Parses one face line. Returns None for faces that are dropped with
/// a warning (zero-length plane normal).
fn parse_brush_face(
    parser: &mut Parser,
    format: BrushFormat,
    entity: &MapEntity,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
) -> Result<Option<MapFace>> {
    let location = parser.location();
    let planepts = parse_plane_def(parser)?;

    // plane equation from the three points
    let ab = vector_subtract(&planepts[0], &planepts[1]);
    let cb = vector_subtract(&planepts[2], &planepts[1]);
    let mut normal = cross_product(&ab, &cb);
    let length = vector_normalize(&mut normal);
    let dist = dot_product(&planepts[1], &normal);
    let face_plane = MapPlane { normal, dist };

    // the texture tokens must be consumed even when the face is about
    // to be dropped, so the reader stays in sync with the line
    let parsed =
        parse_texture_def(parser, format, &planepts, &face_plane, map, options, textures)?;

    if length < NORMAL_EPSILON {
        log::warn!("{}: brush plane with no normal", location);
        map.stats.degenerate_faces += 1;
        return Ok(None);
    }

    let planenum = map.add_or_find_plane(&face_plane);
    let plane = map.planes[planenum];

    // round texture vectors sitting within epsilon of integers, to
    // protect engines doing 32-bit surface extent math
    let mut vecs = parsed.vecs;
    for row in &mut vecs.0 {
        for v in row.iter_mut() {
            let r = v.round();
            if (*v - r).abs() < ZERO_EPSILON {
                *v = r;
            }
        }
    }

    if !texdef::is_valid_projection(&plane.normal, &s_vec(&vecs), &t_vec(&vecs)) {
        log::warn!(
            "{}: repairing invalid texture projection (\"{}\" near {} {} {})",
            location,
            parsed.texname,
            planepts[0][0] as i32,
            planepts[0][1] as i32,
            planepts[0][2] as i32
        );
        vecs = texdef::vecs_from_quake_ed(
            &plane.normal,
            &[0.0, 0.0],
            0.0,
            &[1.0, 1.0],
            options.oldaxis,
        );
        if !texdef::is_valid_projection(&plane.normal, &s_vec(&vecs), &t_vec(&vecs)) {
            return Err(MapError::parse(
                location,
                format!(
                    "couldn't repair texture projection for \"{}\"",
                    parsed.texname
                ),
            ));
        }
    }

    let flags = surf_flags_for_entity(parsed.flags_native, &parsed.texname, entity, options);
    let texinfo = map.find_texinfo(
        TexInfo {
            vecs,
            miptex: parsed.miptex,
            flags: flags.clone(),
            value: parsed.value,
            next: None,
        },
        options,
    );

    map.stats.faces += 1;

    Ok(Some(MapFace {
        planepts,
        plane,
        planenum,
        texname: parsed.texname,
        texinfo,
        contents: parsed.contents,
        flags,
        value: parsed.value,
        texdef: parsed.texdef,
        raw_q2: parsed.raw_q2,
        winding: None,
        bevel: false,
        lmshift: 0,
        location,
    }))
}

fn s_vec(vecs: &TexVecs) -> Vec3 {
    [vecs.0[0][0], vecs.0[0][1], vecs.0[0][2]]
}

fn t_vec(vecs: &TexVecs) -> Vec3 {
    [vecs.0[1][0], vecs.0[1][1], vecs.0[1][2]]
}

// ============================================================
// Brush-level parsing
// ============================================================

/// Final contents of a brush: the first non-empty face contents, with
/// mixed-contents faces diagnosed, plus entity-level content modifiers.
fn brush_get_contents(
    entity: &MapEntity,
    brush: &MapBrush,
    options: &CompileOptions,
) -> Contents {
    let mut base_set = false;
    let mut base = options.game.create_empty_contents();

    for face in &brush.faces {
        let contents = options
            .game
            .face_contents(&face.texname, &face.flags, face.contents);
        if options.game.contents_are_empty(&contents) {
            continue;
        }
        if !base_set {
            base_set = true;
            base = contents;
            continue;
        }
        if !options.game.contents_types_equal(&contents, &base) {
            log::warn!(
                "{}: mixed face contents ({} != {})",
                face.location,
                options.game.contents_to_string(&base),
                options.game.contents_to_string(&contents)
            );
            break;
        }
    }

    if entity.epairs.has("_mirrorinside") {
        base.mirror_inside = Some(entity.epairs.get_int("_mirrorinside").unwrap_or(0) != 0);
    }
    if entity.epairs.has("_noclipfaces") {
        base.clips_same_type = Some(entity.epairs.get_int("_noclipfaces").unwrap_or(0) == 0);
    }
    base.illusionary_visblocker = entity
        .classname()
        .eq_ignore_ascii_case("func_illusionary_visblocker");

    base
}

/// Parses one brush block; the opening "{" has been consumed.
pub fn parse_brush(
    parser: &mut Parser,
    entity: &MapEntity,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &SessionTextures,
) -> Result<MapBrush> {
    let mut brush = MapBrush::default();

    if !parser.parse_token(ParseFlags::PEEK) {
        return Err(MapError::parse(
            parser.location(),
            "unexpected EOF after { beginning brush",
        ));
    }

    if parser.token == "(" {
        brush.format = Some(BrushFormat::Normal);
    } else {
        parser.parse_token(ParseFlags::empty());
        brush.format = Some(BrushFormat::BrushPrimitives);

        // optional marker
        if parser.token == "brushDef" {
            expect_token(parser, ParseFlags::empty(), "\"{\" after brushDef")?;
        }
        if parser.token != "{" {
            return Err(MapError::parse(
                parser.location(),
                format!(
                    "brush primitives: expected second {{ at beginning of brush, got \"{}\"",
                    parser.token
                ),
            ));
        }
    }
    let format = brush.format.unwrap();

    loop {
        if !parser.parse_token(ParseFlags::empty()) {
            return Err(MapError::parse(
                parser.location(),
                "unexpected EOF (no closing brace)",
            ));
        }
        if brush.location.line == 0 {
            brush.location = parser.location();
        }
        if parser.token == "}" {
            break;
        }

        let Some(face) = parse_brush_face(parser, format, entity, map, options, textures)?
        else {
            continue;
        };

        // check for duplicate planes
        let mut discard = false;
        for check in &brush.faces {
            if check.plane.epsilon_equal(&face.plane) {
                log::warn!("{}: brush with duplicate plane", parser.location());
                map.stats.duplicate_faces += 1;
                discard = true;
                continue;
            }
            if check.plane.flipped().epsilon_equal(&face.plane) {
                // an inward-facing copy makes the brush invalid; kept
                // for compatibility with the original tools
                log::warn!("{}: brush with duplicate plane", parser.location());
            }
        }
        if discard {
            continue;
        }

        brush.faces.push(face);
    }

    if format == BrushFormat::BrushPrimitives {
        expect_token(parser, ParseFlags::empty(), "\"}\"")?;
        if parser.token != "}" {
            return Err(MapError::parse(
                parser.location(),
                format!("brush primitives: expected }}, got \"{}\"", parser.token),
            ));
        }
    }

    brush.contents = brush_get_contents(entity, &brush, options);
    map.stats.brushes += 1;

    Ok(brush)
}

// ============================================================
// Entity-level parsing
// ============================================================

fn parse_epair(parser: &mut Parser, entity: &mut MapEntity) -> Result<()> {
    let key = parser.token.trim().to_string();
    expect_token(parser, ParseFlags::SAMELINE, "a value for the entity key")?;
    entity.epairs.set(&key, &parser.token);
    Ok(())
}

/// Parses the next entity. Returns None at end of input.
pub fn parse_entity(
    parser: &mut Parser,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &mut SessionTextures,
) -> Result<Option<MapEntity>> {
    let mut entity = MapEntity {
        location: parser.location(),
        ..Default::default()
    };

    if !parser.parse_token(ParseFlags::empty()) {
        return Ok(None);
    }
    if parser.token != "{" {
        return Err(MapError::parse(
            parser.location(),
            "invalid entity format, { not found",
        ));
    }

    loop {
        if !parser.parse_token(ParseFlags::empty()) {
            return Err(MapError::parse(
                parser.location(),
                "unexpected EOF (no closing brace)",
            ));
        }
        if parser.token == "}" {
            break;
        }
        if parser.token == "{" {
            // texture metadata is needed from the first brush onward
            if !textures.loaded() {
                let world_epairs = map
                    .world()
                    .map(|w| w.epairs.clone())
                    .unwrap_or_else(|| entity.epairs.clone());
                textures.ensure_loaded(&world_epairs, options);
            }
            let brush = parse_brush(parser, &entity, map, options, textures)?;
            entity.brushes.push(brush);
        } else {
            parse_epair(parser, &mut entity)?;
        }
    }

    // merge in alias defaults for this classname
    if let Some(defaults) = options.entity_aliases.get(entity.classname()) {
        let defaults = defaults.clone();
        for (key, value) in defaults.iter() {
            if key == "classname" || !entity.epairs.has(key) {
                entity.epairs.set(key, value);
            }
        }
    }

    Ok(Some(entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Quake2Rules, SURF_NODRAW};

    fn parse_map(source: &str, options: &CompileOptions) -> MapData {
        let mut map = MapData::new();
        let mut parser = Parser::new(source, None);
        let mut textures = SessionTextures::default();
        while let Some(entity) = parse_entity(&mut parser, &mut map, options, &mut textures)
            .expect("parse failed")
        {
            map.entities.push(entity);
        }
        map
    }

    const DUPLICATE_PLANES: &str = r#"
{
    "classname" "worldspawn"
    {
        ( 360 240 32 ) ( 232 240 32 ) ( 232 112 32 ) WBRICK1_5 0 0 0 1.000000 1.000000
        ( 232 240 64 ) ( 232 240 32 ) ( 360 240 32 ) WBRICK1_5 0 0 0 1.000000 1.000000
        ( 360 112 32 ) ( 232 112 32 ) ( 232 112 64 ) WBRICK1_5 0 0 0 1.000000 1.000000
        ( 360 112 32 ) ( 232 112 32 ) ( 232 112 64 ) WBRICK1_5 0 0 0 1.000000 1.000000
        ( 360 240 64 ) ( 360 240 32 ) ( 360 112 32 ) WBRICK1_5 0 0 0 1.000000 1.000000
        ( 232 240 32 ) ( 232 240 64 ) ( 232 112 64 ) WBRICK1_5 0 0 0 1.000000 1.000000
        ( 232 112 64 ) ( 232 240 64 ) ( 360 240 64 ) WBRICK1_5 0 0 0 1.000000 1.000000
    }
}
"#;

    #[test]
    fn test_duplicate_planes_dropped() {
        let options = CompileOptions::default();
        let map = parse_map(DUPLICATE_PLANES, &options);
        assert_eq!(map.entities.len(), 1);
        let brush = &map.entities[0].brushes[0];
        assert_eq!(brush.faces.len(), 6);
        assert_eq!(map.stats.duplicate_faces, 1);
    }

    #[test]
    fn test_quake_ed_face_vectors() {
        let source = r#"
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
        let options = CompileOptions::default();
        let map = parse_map(source, &options);
        let brush = &map.entities[0].brushes[0];
        let face = brush
            .faces
            .iter()
            .find(|f| f.plane.normal == [0.0, 0.0, 1.0])
            .expect("no top face");
        // floor axis with no rotation or scaling
        let vecs = &map.texinfos[face.texinfo].vecs;
        assert_eq!(vecs.0[0], [1.0, 0.0, 0.0, 16.0]);
        assert_eq!(vecs.0[1], [0.0, -1.0, 0.0, -32.0]);
        assert_eq!(face.plane.dist, 64.0);
    }

    #[test]
    fn test_valve220_face() {
        let source = r#"
{
    "classname" "worldspawn"
    {
        ( -64 -64 -16 ) ( -64 -63 -16 ) ( -64 -64 -15 ) brick [ 0 1 0 8 ] [ 0 0 -1 16 ] 0 2 1
        ( -64 -64 -16 ) ( -64 -64 -15 ) ( -63 -64 -16 ) brick [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
        ( -64 -64 -16 ) ( -63 -64 -16 ) ( -64 -63 -16 ) brick [ -1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
        ( 64 64 16 ) ( 64 65 16 ) ( 65 64 16 ) brick [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
        ( 64 64 16 ) ( 65 64 16 ) ( 64 64 17 ) brick [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
        ( 64 64 16 ) ( 64 64 17 ) ( 64 65 16 ) brick [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
    }
}
"#;
        let options = CompileOptions::default();
        let map = parse_map(source, &options);
        let face = &map.entities[0].brushes[0].faces[0];
        assert!(matches!(face.texdef, TexDef::Valve { .. }));
        let vecs = &map.texinfos[face.texinfo].vecs;
        // axis divided by scale, shift carried through
        assert_eq!(vecs.0[0], [0.0, 0.5, 0.0, 8.0]);
        assert_eq!(vecs.0[1], [0.0, 0.0, -1.0, 16.0]);
    }

    #[test]
    fn test_q2_extended_numbers() {
        let source = r#"
{
    "classname" "worldspawn"
    {
        ( 0 0 64 ) ( 64 0 64 ) ( 0 64 64 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 0 0 0 ) ( 0 64 0 ) ( 64 0 0 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 0 0 0 ) ( 0 0 64 ) ( 0 64 0 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 64 0 0 ) ( 64 64 0 ) ( 64 0 64 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 0 0 0 ) ( 64 0 0 ) ( 0 0 64 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
        ( 0 64 0 ) ( 0 64 64 ) ( 64 64 0 ) e1u1/floor1_1 0 0 0 1 1 1 0 0
    }
}
"#;
        let options = CompileOptions::for_game(Box::new(Quake2Rules::default()));
        let map = parse_map(source, &options);
        let brush = &map.entities[0].brushes[0];
        let face = &brush.faces[0];
        assert_eq!(face.raw_q2, Some([1, 0, 0]));
        assert_eq!(face.contents.native, game::CONTENTS_SOLID);
        assert_eq!(brush.contents.native, game::CONTENTS_SOLID);
    }

    #[test]
    fn test_translucent_swapped_for_detail() {
        let source = format!(
            r#"
{{
    "classname" "worldspawn"
    {{
        ( 0 0 64 ) ( 64 0 64 ) ( 0 64 64 ) e1u1/water1 0 0 0 1 1 {0} 0 0
        ( 0 0 0 ) ( 0 64 0 ) ( 64 0 0 ) e1u1/water1 0 0 0 1 1 {0} 0 0
        ( 0 0 0 ) ( 0 0 64 ) ( 0 64 0 ) e1u1/water1 0 0 0 1 1 {0} 0 0
        ( 64 0 0 ) ( 64 64 0 ) ( 64 0 64 ) e1u1/water1 0 0 0 1 1 {0} 0 0
        ( 0 0 0 ) ( 64 0 0 ) ( 0 0 64 ) e1u1/water1 0 0 0 1 1 {0} 0 0
        ( 0 64 0 ) ( 0 64 64 ) ( 64 64 0 ) e1u1/water1 0 0 0 1 1 {0} 0 0
    }}
}}
"#,
            game::CONTENTS_SOLID | game::CONTENTS_TRANSLUCENT
        );
        let options = CompileOptions::for_game(Box::new(Quake2Rules::default()));
        let map = parse_map(&source, &options);
        let face = &map.entities[0].brushes[0].faces[0];
        assert_eq!(face.contents.native & game::CONTENTS_TRANSLUCENT, 0);
        assert_ne!(face.contents.native & game::CONTENTS_DETAIL, 0);
    }

    #[test]
    fn test_skip_and_hint_names() {
        let options = CompileOptions::default();
        let entity = MapEntity::default();
        let flags = surf_flags_for_entity(0, "skip", &entity, &options);
        assert!(flags.is_skip);
        let flags = surf_flags_for_entity(0, "HINT", &entity, &options);
        assert!(flags.is_hint);
        // liquid textures are special unless turb splitting is on
        let flags = surf_flags_for_entity(0, "*water0", &entity, &options);
        assert_ne!(flags.native & game::TEX_SPECIAL, 0);

        let mut noskip = CompileOptions::default();
        noskip.noskip = true;
        let flags = surf_flags_for_entity(0, "skip", &entity, &noskip);
        assert!(!flags.is_skip);
    }

    #[test]
    fn test_q2_nodraw_is_skip() {
        let options = CompileOptions::for_game(Box::new(Quake2Rules::default()));
        let entity = MapEntity::default();
        let flags = surf_flags_for_entity(SURF_NODRAW, "e1u1/nodraw", &entity, &options);
        assert!(flags.is_skip);
    }

    #[test]
    fn test_entity_epairs_and_alias() {
        let mut options = CompileOptions::default();
        let mut alias = crate::map::Epairs::default();
        alias.set("light", "300");
        alias.set("delay", "2");
        options
            .entity_aliases
            .insert("light_wall".to_string(), alias);

        let source = r#"
{
    "classname" "light_wall"
    "origin" "8 16 24"
    "light" "100"
}
"#;
        let map = parse_map(source, &options);
        let entity = &map.entities[0];
        // explicit keys win over alias defaults
        assert_eq!(entity.epairs.get("light"), Some("100"));
        assert_eq!(entity.epairs.get("delay"), Some("2"));
    }

    #[test]
    fn test_degenerate_face_dropped() {
        let source = r#"
{
    "classname" "worldspawn"
    {
        ( 0 0 0 ) ( 0 0 0 ) ( 0 0 0 ) rock1 0 0 0 1 1
        ( 0 0 64 ) ( 64 0 64 ) ( 0 64 64 ) rock1 0 0 0 1 1
        ( 0 0 0 ) ( 0 64 0 ) ( 64 0 0 ) rock1 0 0 0 1 1
        ( 0 0 0 ) ( 0 0 64 ) ( 0 64 0 ) rock1 0 0 0 1 1
        ( 64 0 0 ) ( 64 64 0 ) ( 64 0 64 ) rock1 0 0 0 1 1
        ( 0 0 0 ) ( 64 0 0 ) ( 0 0 64 ) rock1 0 0 0 1 1
        ( 0 64 0 ) ( 0 64 64 ) ( 64 64 0 ) rock1 0 0 0 1 1
    }
}
"#;
        let options = CompileOptions::default();
        let map = parse_map(source, &options);
        assert_eq!(map.entities[0].brushes[0].faces.len(), 6);
        assert_eq!(map.stats.degenerate_faces, 1);
        // the dropped face left nothing in the plane table
        assert_eq!(map.planes.len(), 12);
    }

    #[test]
    fn test_texture_remap_renames_faces() {
        let source = r#"
{
    "classname" "worldspawn"
    {
        ( 0 0 64 ) ( 64 0 64 ) ( 0 64 64 ) old_floor 0 0 0 1 1
        ( 0 0 0 ) ( 0 64 0 ) ( 64 0 0 ) rock1 0 0 0 1 1
        ( 0 0 0 ) ( 0 0 64 ) ( 0 64 0 ) rock1 0 0 0 1 1
        ( 64 0 0 ) ( 64 64 0 ) ( 64 0 64 ) rock1 0 0 0 1 1
        ( 0 0 0 ) ( 64 0 0 ) ( 0 0 64 ) rock1 0 0 0 1 1
        ( 0 64 0 ) ( 0 64 64 ) ( 64 64 0 ) rock1 0 0 0 1 1
    }
}
"#;
        let mut options = CompileOptions::default();
        options
            .texture_remap
            .insert("old_floor".to_string(), "new_floor".to_string());
        let map = parse_map(source, &options);
        let brush = &map.entities[0].brushes[0];
        assert!(brush.faces.iter().any(|f| f.texname == "new_floor"));
        assert!(brush.faces.iter().all(|f| f.texname != "old_floor"));
        assert!(map.miptexes.iter().any(|m| m.name == "new_floor"));
    }
}

// map.rs — in-memory map model and the shared lookup tables
//
// Parsing fills one MapData per session. Planes, texinfos and miptex
// records are interned here; faces and brushes refer to them by index.
// Plane orientation pairs sit at adjacent indices so the opposite
// facing is always `planenum ^ 1`.

use std::collections::HashMap;

use qmap_common::math::*;
use qmap_common::parser::Location;
use qmap_common::winding::Winding;

use crate::error::{MapError, Result};
use crate::game::{Contents, GameId, SurfFlags};
use crate::options::CompileOptions;
use crate::texdef::TexDef;
use crate::texture::TextureSource;

// ============================================================
// Entity key/value pairs
// ============================================================

/// Ordered key/value list. Order is preserved so a written map diffs
/// cleanly against its source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Epairs(Vec<(String, String)>);

impl Epairs {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replaces an existing key or appends a new one.
    pub fn set(&mut self, key: &str, value: &str) {
        for (k, v) in &mut self.0 {
            if k == key {
                *v = value.to_string();
                return;
            }
        }
        self.0.push((key.to_string(), value.to_string()));
    }

    /// Appends without replacing; parse order is kept even for
    /// duplicate keys so they can be diagnosed later.
    pub fn push(&mut self, key: &str, value: &str) {
        self.0.push((key.to_string(), value.to_string()));
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|(k, _)| k != key);
        before != self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        let value = self.get(key)?.trim();
        value
            .parse()
            .ok()
            .or_else(|| value.parse::<f64>().ok().map(|f| f as i32))
    }

    /// Parses up to three numbers from the value; missing components
    /// stay untouched. Returns false when the key is absent.
    pub fn get_vector(&self, key: &str, out: &mut Vec3) -> bool {
        let Some(value) = self.get(key) else {
            return false;
        };
        for (i, num) in value.split_whitespace().take(3).enumerate() {
            if let Ok(f) = num.parse() {
                out[i] = f;
            }
        }
        true
    }
}

// ============================================================
// Planes
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPlane {
    pub normal: Vec3,
    pub dist: f64,
}

impl MapPlane {
    pub fn distance_to(&self, point: &Vec3) -> f64 {
        dot_product(point, &self.normal) - self.dist
    }

    pub fn flipped(&self) -> MapPlane {
        MapPlane {
            normal: vector_negate(&self.normal),
            dist: -self.dist,
        }
    }

    pub fn epsilon_equal(&self, other: &MapPlane) -> bool {
        (self.dist - other.dist).abs() < EQUAL_EPSILON
            && (0..3).all(|i| (self.normal[i] - other.normal[i]).abs() < EQUAL_EPSILON)
    }

    /// True when the first nonzero normal component is positive; the
    /// positive facing of each pair goes at the even table index.
    fn is_positive(&self) -> bool {
        for v in self.normal {
            if v != 0.0 {
                return v > 0.0;
            }
        }
        false
    }

    /// Pulls nearly-axial normals exactly onto the axis and integral
    /// distances exactly onto the integer, so equal planes written with
    /// different round-off land on the same table slot.
    fn snapped(&self) -> MapPlane {
        let mut plane = *self;
        // the table keys on raw bits; negating a plane turns +0.0 into
        // -0.0, so zeros are stored with the positive sign
        for v in &mut plane.normal {
            if *v == 0.0 {
                *v = 0.0;
            }
        }
        if plane.dist == 0.0 {
            plane.dist = 0.0;
        }
        for i in 0..3 {
            if (plane.normal[i] - 1.0).abs() < NORMAL_EPSILON {
                plane.normal = [0.0; 3];
                plane.normal[i] = 1.0;
                break;
            }
            if (plane.normal[i] + 1.0).abs() < NORMAL_EPSILON {
                plane.normal = [0.0; 3];
                plane.normal[i] = -1.0;
                break;
            }
        }
        let rounded = plane.dist.round();
        if (plane.dist - rounded).abs() < ZERO_EPSILON {
            plane.dist = rounded;
        }
        plane
    }
}

type PlaneKey = [u64; 4];

fn plane_key(plane: &MapPlane) -> PlaneKey {
    [
        plane.normal[0].to_bits(),
        plane.normal[1].to_bits(),
        plane.normal[2].to_bits(),
        plane.dist.to_bits(),
    ]
}

// ============================================================
// Texinfo
// ============================================================

/// The 2x4 texture projection: world position times a row plus the
/// trailing shift yields the s or t texel coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TexVecs(pub [[f64; 4]; 2]);

impl TexVecs {
    pub fn uv(&self, point: &Vec3) -> Vec2 {
        [
            point[0] * self.0[0][0]
                + point[1] * self.0[0][1]
                + point[2] * self.0[0][2]
                + self.0[0][3],
            point[0] * self.0[1][0]
                + point[1] * self.0[1][1]
                + point[2] * self.0[1][2]
                + self.0[1][3],
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TexInfo {
    pub vecs: TexVecs,
    pub miptex: usize,
    pub flags: SurfFlags,
    pub value: i32,
    /// Next texinfo of an animation chain (Quake II only).
    pub next: Option<usize>,
}

#[derive(Hash, PartialEq, Eq)]
struct TexInfoKey {
    vecs: [u64; 8],
    miptex: usize,
    flags: SurfFlags,
    value: i32,
}

fn texinfo_key(texinfo: &TexInfo) -> TexInfoKey {
    let mut vecs = [0u64; 8];
    for (i, row) in texinfo.vecs.0.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            vecs[i * 4 + j] = v.to_bits();
        }
    }
    TexInfoKey {
        vecs,
        miptex: texinfo.miptex,
        flags: texinfo.flags.clone(),
        value: texinfo.value,
    }
}

// ============================================================
// Miptex
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MipTex {
    pub name: String,
    pub flags: i32,
    pub value: i32,
    /// Name of the next animation frame, from the texture metadata.
    pub animation: Option<String>,
    /// Resolved table index of the next frame.
    pub animation_miptex: Option<usize>,
}

#[derive(Hash, PartialEq, Eq)]
struct MipTexKey {
    name: String,
    flags: i32,
    value: i32,
}

// ============================================================
// Faces, brushes, entities
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushFormat {
    /// Three plane points plus a texture definition per face line.
    Normal,
    /// Radiant `brushDef` blocks with an embedded 2x3 matrix.
    BrushPrimitives,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapFace {
    pub planepts: [Vec3; 3],
    pub plane: MapPlane,
    pub planenum: usize,
    pub texname: String,
    pub texinfo: usize,
    pub contents: Contents,
    pub flags: SurfFlags,
    pub value: i32,
    /// Texture definition as written in the source, kept for
    /// re-serialization.
    pub texdef: TexDef,
    /// Explicit contents/flags/value numbers, only when the source
    /// carried them.
    pub raw_q2: Option<[i32; 3]>,
    pub winding: Option<Winding>,
    pub bevel: bool,
    /// Lightmap scale shift, copied from the owning brush once bevels
    /// are in place.
    pub lmshift: u16,
    pub location: Location,
}

impl MapFace {
    pub fn visible(&self) -> bool {
        !self.bevel && self.winding.as_ref().map_or(false, |w| w.len() >= 3)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapBrush {
    pub faces: Vec<MapFace>,
    pub format: Option<BrushFormat>,
    pub contents: Contents,
    pub bounds: Aabb3,
    pub lmshift: u16,
    /// Any face carries a hint texinfo.
    pub is_hint: bool,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStyle {
    None,
    /// Legacy "rotate_" classname prefix; origin taken from the
    /// targeted info entity.
    Hipnotic,
    /// Origin derived from a dedicated origin-contents brush.
    OriginBrush,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntity {
    pub epairs: Epairs,
    pub brushes: Vec<MapBrush>,
    pub origin: Vec3,
    pub rotation: RotationStyle,
    pub areaportalnum: i32,
    pub location: Location,
}

impl Default for MapEntity {
    fn default() -> Self {
        Self {
            epairs: Epairs::default(),
            brushes: Vec::new(),
            origin: [0.0; 3],
            rotation: RotationStyle::None,
            areaportalnum: 0,
            location: Location::default(),
        }
    }
}

impl MapEntity {
    pub fn classname(&self) -> &str {
        self.epairs.get("classname").unwrap_or("")
    }
}

// ============================================================
// Session data
// ============================================================

#[derive(Debug, Default, Clone)]
pub struct MapStats {
    pub brushes: usize,
    pub faces: usize,
    pub degenerate_faces: usize,
    pub duplicate_faces: usize,
}

#[derive(Default)]
pub struct MapData {
    pub entities: Vec<MapEntity>,
    pub planes: Vec<MapPlane>,
    plane_hash: HashMap<PlaneKey, usize>,
    pub texinfos: Vec<TexInfo>,
    texinfo_hash: HashMap<TexInfoKey, usize>,
    pub miptexes: Vec<MipTex>,
    miptex_hash: HashMap<MipTexKey, usize>,
    skip_texinfo: Option<usize>,
    pub world_extent: f64,
    pub num_areaportals: i32,
    pub stats: MapStats,
}

impl MapData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn world(&self) -> Option<&MapEntity> {
        self.entities.first()
    }

    // --------------------------------------------------------
    // plane table
    // --------------------------------------------------------

    /// Interns a plane, returning its table index. Orientation pairs
    /// occupy adjacent slots, positive facing first, so the opposite
    /// facing of index n is always n ^ 1.
    pub fn add_or_find_plane(&mut self, plane: &MapPlane) -> usize {
        let plane = plane.snapped();
        if let Some(&index) = self.plane_hash.get(&plane_key(&plane)) {
            return index;
        }

        let (positive, flipped) = if plane.is_positive() {
            (plane, false)
        } else {
            (plane.flipped().snapped(), true)
        };
        let negative = positive.flipped().snapped();

        let index = self.planes.len();
        self.planes.push(positive);
        self.planes.push(negative);
        self.plane_hash.insert(plane_key(&positive), index);
        self.plane_hash.insert(plane_key(&negative), index + 1);

        if flipped {
            index + 1
        } else {
            index
        }
    }

    // --------------------------------------------------------
    // miptex table
    // --------------------------------------------------------

    /// Interns a texture reference. Quake identifies textures by name
    /// alone (path stripped); Quake II by name plus flags and value,
    /// and resolves the full animation chain eagerly.
    pub fn find_miptex(
        &mut self,
        name: &str,
        flags: i32,
        value: i32,
        options: &CompileOptions,
        source: &dyn TextureSource,
    ) -> Result<usize> {
        match options.game.id() {
            GameId::Quake => self.find_miptex_q1(name),
            GameId::Quake2 => Ok(self.find_miptex_q2(name, flags, value, source)),
        }
    }

    fn find_miptex_q1(&mut self, name: &str) -> Result<usize> {
        // editors sometimes write a path; only the base name matters
        let base = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();

        let key = MipTexKey {
            name: base.clone(),
            flags: 0,
            value: 0,
        };
        if let Some(&index) = self.miptex_hash.get(&key) {
            return Ok(index);
        }

        let index = self.push_miptex(base.clone(), 0, 0, None);
        if base.starts_with('+') {
            self.add_anim_frames(&base)?;
        }
        Ok(index)
    }

    /// Registers the earlier frames of a `+` animated texture so frame
    /// n never lands in the table before frames 0..n.
    fn add_anim_frames(&mut self, name: &str) -> Result<()> {
        let (basechar, frame) = match name.as_bytes().get(1) {
            Some(c @ b'0'..=b'9') => (b'0', c - b'0'),
            Some(c @ b'a'..=b'j') => (b'a', c - b'a'),
            _ => {
                return Err(MapError::Internal(format!(
                    "bad animating texture \"{}\"",
                    name
                )))
            }
        };

        let rest = &name[2..];
        for i in 0..frame {
            let framename = format!("+{}{}", (basechar + i) as char, rest);
            let key = MipTexKey {
                name: framename.clone(),
                flags: 0,
                value: 0,
            };
            if !self.miptex_hash.contains_key(&key) {
                self.push_miptex(framename, 0, 0, None);
            }
        }
        Ok(())
    }

    fn find_miptex_q2(
        &mut self,
        name: &str,
        flags: i32,
        value: i32,
        source: &dyn TextureSource,
    ) -> usize {
        let key = MipTexKey {
            name: name.to_string(),
            flags,
            value,
        };
        if let Some(&index) = self.miptex_hash.get(&key) {
            return index;
        }

        let animation = source.find(name).and_then(|meta| meta.animation);
        let index = self.push_miptex(name.to_string(), flags, value, animation);

        // walk the chain, interning each frame; existing entries stop
        // the walk so circular chains terminate
        let mut current = index;
        while let Some(next_name) = self.miptexes[current].animation.clone() {
            let meta = source.find(&next_name).unwrap_or_default();
            let next_key = MipTexKey {
                name: next_name.clone(),
                flags: meta.flags,
                value: meta.value,
            };
            if let Some(&existing) = self.miptex_hash.get(&next_key) {
                self.miptexes[current].animation_miptex = Some(existing);
                break;
            }
            let next = self.push_miptex(next_name, meta.flags, meta.value, meta.animation);
            self.miptexes[current].animation_miptex = Some(next);
            current = next;
        }
        index
    }

    fn push_miptex(
        &mut self,
        name: String,
        flags: i32,
        value: i32,
        animation: Option<String>,
    ) -> usize {
        let index = self.miptexes.len();
        self.miptex_hash.insert(
            MipTexKey {
                name: name.clone(),
                flags,
                value,
            },
            index,
        );
        self.miptexes.push(MipTex {
            name,
            flags,
            value,
            animation,
            animation_miptex: None,
        });
        index
    }

    // --------------------------------------------------------
    // texinfo table
    // --------------------------------------------------------

    /// Interns a texinfo by exact bit-pattern match. For Quake II the
    /// projection is duplicated across every frame of the texture's
    /// animation chain and the entries linked through `next`.
    pub fn find_texinfo(&mut self, texinfo: TexInfo, options: &CompileOptions) -> usize {
        for row in &texinfo.vecs.0 {
            for v in row {
                assert!(!v.is_nan(), "texinfo vector is NaN");
            }
        }

        let key = texinfo_key(&texinfo);
        if let Some(&index) = self.texinfo_hash.get(&key) {
            return index;
        }

        let index = self.texinfos.len();
        self.texinfos.push(texinfo.clone());
        self.texinfo_hash.insert(key, index);

        if options.game.id() == GameId::Quake2 {
            if let Some(next_mip) = self.miptexes[texinfo.miptex].animation_miptex {
                if next_mip != texinfo.miptex {
                    let mut next = texinfo;
                    next.miptex = next_mip;
                    next.flags.native = self.miptexes[next_mip].flags;
                    next.value = self.miptexes[next_mip].value;
                    next.next = None;
                    // the chain is circular; the frame already interned
                    // above ends the recursion
                    let next_index = self.find_texinfo(next, options);
                    self.texinfos[index].next = Some(next_index);
                }
            }
        }
        index
    }

    /// Texinfo used for faces culled by hint/skip handling; created on
    /// first use.
    pub fn skip_texinfo(
        &mut self,
        options: &CompileOptions,
        source: &dyn TextureSource,
    ) -> Result<usize> {
        if let Some(index) = self.skip_texinfo {
            return Ok(index);
        }
        let miptex = self.find_miptex("skip", 0, 0, options, source)?;
        let mut flags = SurfFlags::default();
        flags.is_skip = true;
        let index = self.find_texinfo(
            TexInfo {
                vecs: TexVecs::default(),
                miptex,
                flags,
                value: 0,
                next: None,
            },
            options,
        );
        self.skip_texinfo = Some(index);
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{NullTextureSource, TextureMeta, TextureTable};

    #[test]
    fn test_epair_order_and_lookup() {
        let mut e = Epairs::default();
        e.push("classname", "worldspawn");
        e.push("wad", "quake101.wad");
        e.set("message", "the start");
        assert_eq!(e.get("wad"), Some("quake101.wad"));
        assert_eq!(e.len(), 3);
        e.set("wad", "other.wad");
        assert_eq!(e.get("wad"), Some("other.wad"));
        assert_eq!(e.len(), 3);
        let keys: Vec<_> = e.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["classname", "wad", "message"]);
    }

    #[test]
    fn test_epair_vector() {
        let mut e = Epairs::default();
        e.set("origin", "16 -32 64");
        let mut v = [0.0; 3];
        assert!(e.get_vector("origin", &mut v));
        assert_eq!(v, [16.0, -32.0, 64.0]);
        assert!(!e.get_vector("missing", &mut v));
    }

    #[test]
    fn test_plane_pairs_adjacent() {
        let mut map = MapData::new();
        let up = MapPlane {
            normal: [0.0, 0.0, 1.0],
            dist: 32.0,
        };
        let a = map.add_or_find_plane(&up);
        let b = map.add_or_find_plane(&up.flipped());
        assert_eq!(b, a ^ 1);
        assert_eq!(map.add_or_find_plane(&up), a);
        assert_eq!(map.planes.len(), 2);
        // the positive facing sits at the even index
        assert_eq!(map.planes[a].normal[2], 1.0);
    }

    #[test]
    fn test_negated_zero_components_share_a_pair() {
        // a brush often writes the down facing first; the negated zero
        // components it carries must still hit the stored up facing
        let mut map = MapData::new();
        let down = MapPlane {
            normal: [0.0, 0.0, -1.0],
            dist: -112.0,
        };
        let a = map.add_or_find_plane(&down);
        let b = map.add_or_find_plane(&MapPlane {
            normal: [0.0, 0.0, 1.0],
            dist: 112.0,
        });
        assert_eq!(a, b ^ 1);
        assert_eq!(map.planes.len(), 2);
        for plane in &map.planes {
            for v in plane.normal {
                assert!(!(v == 0.0 && v.is_sign_negative()));
            }
        }
    }

    #[test]
    fn test_plane_snapping_merges_roundoff() {
        let mut map = MapData::new();
        let exact = MapPlane {
            normal: [1.0, 0.0, 0.0],
            dist: 128.0,
        };
        let fuzzy = MapPlane {
            normal: [0.9999999, 0.0000001, 0.0],
            dist: 128.0000004,
        };
        assert_eq!(map.add_or_find_plane(&exact), map.add_or_find_plane(&fuzzy));
    }

    #[test]
    fn test_miptex_q1_strips_path() {
        let mut map = MapData::new();
        let a = map.find_miptex_q1("textures/e1u1/CITY3_4").unwrap();
        let b = map.find_miptex_q1("city3_4").unwrap();
        assert_eq!(a, b);
        assert_eq!(map.miptexes.len(), 1);
    }

    #[test]
    fn test_miptex_q1_registers_earlier_frames() {
        let mut map = MapData::new();
        map.find_miptex_q1("+3butn").unwrap();
        let names: Vec<_> = map.miptexes.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["+3butn", "+0butn", "+1butn", "+2butn"]);

        // alternate-alphabet frames sit in their own sequence
        map.find_miptex_q1("+cbutn").unwrap();
        let names: Vec<_> = map.miptexes.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            ["+3butn", "+0butn", "+1butn", "+2butn", "+cbutn", "+abutn", "+bbutn"]
        );

        // re-requesting a frame already in the table adds nothing
        map.find_miptex_q1("+1butn").unwrap();
        assert_eq!(map.miptexes.len(), 7);
    }

    #[test]
    fn test_miptex_q1_rejects_bad_frame_char() {
        let mut map = MapData::new();
        assert!(map.find_miptex_q1("+zbutn").is_err());
        assert!(map.find_miptex_q1("+").is_err());
    }

    #[test]
    fn test_miptex_q2_animation_chain_is_circular() {
        let mut table = TextureTable::default();
        table.insert(
            "e1u1/+0slider",
            TextureMeta {
                animation: Some("e1u1/+1slider".to_string()),
                ..Default::default()
            },
        );
        table.insert(
            "e1u1/+1slider",
            TextureMeta {
                animation: Some("e1u1/+0slider".to_string()),
                ..Default::default()
            },
        );

        let mut map = MapData::new();
        let first = map.find_miptex_q2("e1u1/+0slider", 0, 0, &table);
        let second = map.miptexes[first].animation_miptex.unwrap();
        assert_ne!(first, second);
        assert_eq!(map.miptexes[second].animation_miptex, Some(first));
    }

    #[test]
    fn test_texinfo_dedup_and_chain() {
        use crate::game::Quake2Rules;

        let mut table = TextureTable::default();
        table.insert(
            "+0anim",
            TextureMeta {
                animation: Some("+1anim".to_string()),
                ..Default::default()
            },
        );
        table.insert(
            "+1anim",
            TextureMeta {
                animation: Some("+0anim".to_string()),
                ..Default::default()
            },
        );

        let options = CompileOptions::for_game(Box::new(Quake2Rules::default()));
        let mut map = MapData::new();
        let miptex = map.find_miptex("+0anim", 0, 0, &options, &table).unwrap();

        let texinfo = TexInfo {
            vecs: TexVecs([[1.0, 0.0, 0.0, 0.0], [0.0, -1.0, 0.0, 0.0]]),
            miptex,
            flags: SurfFlags::default(),
            value: 0,
            next: None,
        };
        let a = map.find_texinfo(texinfo.clone(), &options);
        assert_eq!(map.find_texinfo(texinfo, &options), a);

        // both frames got a texinfo, linked in a cycle
        let b = map.texinfos[a].next.unwrap();
        assert_ne!(a, b);
        assert_eq!(map.texinfos[b].next, Some(a));
        assert_eq!(map.texinfos.len(), 2);
    }

    #[test]
    fn test_skip_texinfo_created_once() {
        let options = CompileOptions::default();
        let mut map = MapData::new();
        let a = map.skip_texinfo(&options, &NullTextureSource).unwrap();
        let b = map.skip_texinfo(&options, &NullTextureSource).unwrap();
        assert_eq!(a, b);
        assert!(map.texinfos[a].flags.is_skip);
    }
}

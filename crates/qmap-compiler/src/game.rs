// game.rs — per-game compilation rules
//
// The compiler core consults the active game only through the
// GameRules trait: contents classification and repair, hull sizes and
// entity-string limits. Flag values follow the engine headers.

use std::hash::{Hash, Hasher};

use qmap_common::math::Aabb3;

// ============================================================
// Quake II contents / surface flags
// ============================================================

pub const CONTENTS_SOLID: i32 = 1;
pub const CONTENTS_WINDOW: i32 = 2;
pub const CONTENTS_AUX: i32 = 4;
pub const CONTENTS_LAVA: i32 = 8;
pub const CONTENTS_SLIME: i32 = 16;
pub const CONTENTS_WATER: i32 = 32;
pub const CONTENTS_MIST: i32 = 64;

pub const CONTENTS_AREAPORTAL: i32 = 0x8000;
pub const CONTENTS_PLAYERCLIP: i32 = 0x10000;
pub const CONTENTS_MONSTERCLIP: i32 = 0x20000;

pub const CONTENTS_ORIGIN: i32 = 0x1000000;
pub const CONTENTS_DETAIL: i32 = 0x8000000;
pub const CONTENTS_TRANSLUCENT: i32 = 0x10000000;
pub const CONTENTS_LADDER: i32 = 0x20000000;

/// Mutually exclusive "visible contents" categories.
const CONTENTS_VISIBLE_MASK: i32 = CONTENTS_SOLID
    | CONTENTS_WINDOW
    | CONTENTS_AUX
    | CONTENTS_LAVA
    | CONTENTS_SLIME
    | CONTENTS_WATER
    | CONTENTS_MIST;

pub const SURF_LIGHT: i32 = 0x1;
pub const SURF_SLICK: i32 = 0x2;
pub const SURF_SKY: i32 = 0x4;
pub const SURF_WARP: i32 = 0x8;
pub const SURF_TRANS33: i32 = 0x10;
pub const SURF_TRANS66: i32 = 0x20;
pub const SURF_FLOWING: i32 = 0x40;
pub const SURF_NODRAW: i32 = 0x80;
pub const SURF_HINT: i32 = 0x100;
pub const SURF_SKIP: i32 = 0x200;

// ============================================================
// Quake contents (negative leaf-style values)
// ============================================================

pub const Q1_CONTENTS_EMPTY: i32 = -1;
pub const Q1_CONTENTS_SOLID: i32 = -2;
pub const Q1_CONTENTS_WATER: i32 = -3;
pub const Q1_CONTENTS_SLIME: i32 = -4;
pub const Q1_CONTENTS_LAVA: i32 = -5;
pub const Q1_CONTENTS_SKY: i32 = -6;
// compiler-internal classifications
pub const Q1_CONTENTS_CLIP: i32 = -7;
pub const Q1_CONTENTS_ORIGIN: i32 = -8;

/// Quake texinfo "special" flag (no subdivision, no lightmap).
pub const TEX_SPECIAL: i32 = 1;

// ============================================================
// Face/brush contents
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Contents {
    pub native: i32,
    pub mirror_inside: Option<bool>,
    pub clips_same_type: Option<bool>,
    pub illusionary_visblocker: bool,
}

impl Contents {
    pub fn native(native: i32) -> Self {
        Self {
            native,
            ..Default::default()
        }
    }
}

// ============================================================
// Compiler surface flags
// ============================================================

/// Per-face surface attributes: the game-native bits plus the
/// compiler-internal flags and light-stage tweakables sourced from
/// entity keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfFlags {
    pub native: i32,
    pub is_skip: bool,
    pub is_hint: bool,
    pub no_expand: bool,
    pub no_dirt: bool,
    pub no_bounce: bool,
    pub no_minlight: bool,
    pub no_shadow: bool,
    pub light_ignore: bool,
    pub phong_angle: f64,
    pub phong_angle_concave: f64,
    pub minlight: f64,
    pub minlight_color: [f64; 3],
    pub light_alpha: f64,
}

// Texinfo deduplication keys on the full flag tuple. The float fields
// are compared and hashed by bit pattern; NaN never reaches a texinfo
// key (asserted at insertion).
impl Eq for SurfFlags {}

impl Hash for SurfFlags {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.native.hash(state);
        (self.is_skip, self.is_hint, self.no_expand).hash(state);
        (self.no_dirt, self.no_bounce, self.no_minlight).hash(state);
        (self.no_shadow, self.light_ignore).hash(state);
        self.phong_angle.to_bits().hash(state);
        self.phong_angle_concave.to_bits().hash(state);
        self.minlight.to_bits().hash(state);
        for c in &self.minlight_color {
            c.to_bits().hash(state);
        }
        self.light_alpha.to_bits().hash(state);
    }
}

// ============================================================
// Game rules
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameId {
    Quake,
    Quake2,
}

pub trait GameRules: Sync {
    fn id(&self) -> GameId;

    fn create_empty_contents(&self) -> Contents;

    fn contents_are_empty(&self, contents: &Contents) -> bool;

    fn contents_are_origin(&self, contents: &Contents) -> bool;

    fn contents_are_valid(&self, contents: &Contents) -> bool;

    /// Repairs an invalid combination in place; must leave the value in
    /// a state `contents_are_valid` accepts.
    fn contents_make_valid(&self, contents: &mut Contents);

    /// Whether two contents values belong to the same content *type*
    /// for the purposes of the mixed-face-contents check.
    fn contents_types_equal(&self, a: &Contents, b: &Contents) -> bool;

    fn contents_to_string(&self, contents: &Contents) -> String;

    /// Final contents classification of a single face.
    fn face_contents(&self, texname: &str, flags: &SurfFlags, contents: Contents) -> Contents;

    /// Collision hull dimensions; hull 0 is always the point hull.
    fn hull_sizes(&self) -> &[Aabb3];

    fn max_entity_key(&self) -> usize {
        32
    }

    fn max_entity_value(&self) -> usize {
        128
    }

    /// Contents forced onto area-portal brushes.
    fn areaportal_contents(&self) -> i32 {
        CONTENTS_AREAPORTAL
    }
}

// ============================================================
// Quake
// ============================================================

pub struct Quake1Rules {
    hulls: [Aabb3; 3],
}

impl Default for Quake1Rules {
    fn default() -> Self {
        Self {
            hulls: [
                Aabb3::new([0.0; 3], [0.0; 3]),
                Aabb3::new([-16.0, -16.0, -32.0], [16.0, 16.0, 24.0]),
                Aabb3::new([-32.0, -32.0, -64.0], [32.0, 32.0, 24.0]),
            ],
        }
    }
}

impl GameRules for Quake1Rules {
    fn id(&self) -> GameId {
        GameId::Quake
    }

    fn create_empty_contents(&self) -> Contents {
        Contents::native(Q1_CONTENTS_EMPTY)
    }

    fn contents_are_empty(&self, contents: &Contents) -> bool {
        contents.native == Q1_CONTENTS_EMPTY || contents.native == 0
    }

    fn contents_are_origin(&self, contents: &Contents) -> bool {
        contents.native == Q1_CONTENTS_ORIGIN
    }

    fn contents_are_valid(&self, _contents: &Contents) -> bool {
        true
    }

    fn contents_make_valid(&self, _contents: &mut Contents) {}

    fn contents_types_equal(&self, a: &Contents, b: &Contents) -> bool {
        a.native == b.native
    }

    fn contents_to_string(&self, contents: &Contents) -> String {
        let name = match contents.native {
            Q1_CONTENTS_EMPTY | 0 => "EMPTY",
            Q1_CONTENTS_SOLID => "SOLID",
            Q1_CONTENTS_WATER => "WATER",
            Q1_CONTENTS_SLIME => "SLIME",
            Q1_CONTENTS_LAVA => "LAVA",
            Q1_CONTENTS_SKY => "SKY",
            Q1_CONTENTS_CLIP => "CLIP",
            Q1_CONTENTS_ORIGIN => "ORIGIN",
            _ => return format!("UNKNOWN({})", contents.native),
        };
        name.to_string()
    }

    fn face_contents(&self, texname: &str, flags: &SurfFlags, _contents: Contents) -> Contents {
        if flags.is_skip || flags.is_hint {
            return Contents::native(Q1_CONTENTS_EMPTY);
        }

        let lower = texname.to_ascii_lowercase();
        let native = if let Some(rest) = lower.strip_prefix('*') {
            if rest.starts_with("lava") {
                Q1_CONTENTS_LAVA
            } else if rest.starts_with("slime") {
                Q1_CONTENTS_SLIME
            } else {
                Q1_CONTENTS_WATER
            }
        } else if lower.starts_with("sky") {
            Q1_CONTENTS_SKY
        } else if lower == "clip" {
            Q1_CONTENTS_CLIP
        } else if lower == "origin" {
            Q1_CONTENTS_ORIGIN
        } else {
            Q1_CONTENTS_SOLID
        };

        Contents::native(native)
    }

    fn hull_sizes(&self) -> &[Aabb3] {
        &self.hulls
    }
}

// ============================================================
// Quake II
// ============================================================

pub struct Quake2Rules {
    hulls: [Aabb3; 1],
}

impl Default for Quake2Rules {
    fn default() -> Self {
        // Q2 expands brushes at runtime; only the point hull exists at
        // compile time.
        Self {
            hulls: [Aabb3::new([0.0; 3], [0.0; 3])],
        }
    }
}

impl GameRules for Quake2Rules {
    fn id(&self) -> GameId {
        GameId::Quake2
    }

    fn create_empty_contents(&self) -> Contents {
        Contents::default()
    }

    fn contents_are_empty(&self, contents: &Contents) -> bool {
        contents.native & CONTENTS_VISIBLE_MASK == 0
            && contents.native & (CONTENTS_PLAYERCLIP | CONTENTS_MONSTERCLIP | CONTENTS_ORIGIN) == 0
    }

    fn contents_are_origin(&self, contents: &Contents) -> bool {
        contents.native & CONTENTS_ORIGIN != 0
    }

    fn contents_are_valid(&self, contents: &Contents) -> bool {
        let visible = contents.native & CONTENTS_VISIBLE_MASK;
        visible == 0 || (visible & (visible - 1)) == 0
    }

    fn contents_make_valid(&self, contents: &mut Contents) {
        // keep the lowest set visible category; SOLID wins over liquids
        let visible = contents.native & CONTENTS_VISIBLE_MASK;
        if visible != 0 {
            let keep = visible & visible.wrapping_neg();
            contents.native = (contents.native & !CONTENTS_VISIBLE_MASK) | keep;
        }
    }

    fn contents_types_equal(&self, a: &Contents, b: &Contents) -> bool {
        const IGNORE: i32 = CONTENTS_DETAIL | CONTENTS_TRANSLUCENT | CONTENTS_LADDER;
        (a.native & !IGNORE) == (b.native & !IGNORE)
    }

    fn contents_to_string(&self, contents: &Contents) -> String {
        let mut parts = Vec::new();
        for (bit, name) in [
            (CONTENTS_SOLID, "SOLID"),
            (CONTENTS_WINDOW, "WINDOW"),
            (CONTENTS_AUX, "AUX"),
            (CONTENTS_LAVA, "LAVA"),
            (CONTENTS_SLIME, "SLIME"),
            (CONTENTS_WATER, "WATER"),
            (CONTENTS_MIST, "MIST"),
            (CONTENTS_AREAPORTAL, "AREAPORTAL"),
            (CONTENTS_PLAYERCLIP, "PLAYERCLIP"),
            (CONTENTS_MONSTERCLIP, "MONSTERCLIP"),
            (CONTENTS_ORIGIN, "ORIGIN"),
            (CONTENTS_DETAIL, "DETAIL"),
            (CONTENTS_TRANSLUCENT, "TRANSLUCENT"),
            (CONTENTS_LADDER, "LADDER"),
        ] {
            if contents.native & bit != 0 {
                parts.push(name);
            }
        }
        if parts.is_empty() {
            return "EMPTY".to_string();
        }
        parts.join("|")
    }

    fn face_contents(&self, _texname: &str, _flags: &SurfFlags, contents: Contents) -> Contents {
        contents
    }

    fn hull_sizes(&self) -> &[Aabb3] {
        &self.hulls
    }
}

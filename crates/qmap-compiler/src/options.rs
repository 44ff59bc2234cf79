// options.rs — compile session settings
//
// One CompileOptions instance is built by the front end and threaded
// through parsing and processing by reference. Defaults match the
// classic tool behavior.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::game::{GameRules, Quake1Rules};
use crate::map::Epairs;

pub struct CompileOptions {
    pub game: Box<dyn GameRules>,

    /// Prefer the earlier axis on projection-axis ties, as the original
    /// tools did. Disabling picks the later axis.
    pub oldaxis: bool,
    /// Skip texture-coordinate correction when extracting rotation
    /// origins from origin brushes.
    pub oldrottex: bool,

    /// Treat "skip" textures as ordinary solid faces.
    pub noskip: bool,
    /// Subdivide liquid ("*" warp) surfaces like normal faces.
    pub splitturb: bool,
    /// Subdivide sky surfaces like normal faces.
    pub splitsky: bool,

    /// On-plane tolerance used when deriving face windings.
    pub epsilon: f64,
    /// Fixed world extent; 0 computes one from the map geometry.
    pub world_extent: f64,

    /// Texture name substitutions applied as faces are parsed.
    pub texture_remap: HashMap<String, String>,
    /// Default key/value sets merged into entities by classname.
    pub entity_aliases: HashMap<String, Epairs>,

    /// Dump brushes expanded by this hull instead of compiling.
    pub debug_expand_hull: Option<usize>,
    /// Extra map merged into the first one loaded.
    pub add_map: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            game: Box::new(Quake1Rules::default()),
            oldaxis: true,
            oldrottex: false,
            noskip: false,
            splitturb: false,
            splitsky: false,
            epsilon: 0.0001,
            world_extent: 0.0,
            texture_remap: HashMap::new(),
            entity_aliases: HashMap::new(),
            debug_expand_hull: None,
            add_map: None,
        }
    }
}

impl CompileOptions {
    pub fn for_game(game: Box<dyn GameRules>) -> Self {
        Self {
            game,
            ..Default::default()
        }
    }

    /// Applies the remap table to a parsed texture name.
    pub fn remap_texture<'a>(&'a self, name: &'a str) -> &'a str {
        match self.texture_remap.get(name) {
            Some(replacement) => replacement.as_str(),
            None => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_remap() {
        let mut options = CompileOptions::default();
        options
            .texture_remap
            .insert("old_rock".to_string(), "new_rock".to_string());
        assert_eq!(options.remap_texture("old_rock"), "new_rock");
        assert_eq!(options.remap_texture("unrelated"), "unrelated");
    }
}

// texture.rs — texture metadata lookup
//
// The projection codec needs texture dimensions (shift normalization,
// brush-primitives UV scaling) and Quake II embeds per-texture contents
// and surface values. Sources are pluggable; a map can compile with no
// textures on disk, falling back to 64x64.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{MapError, Result};
use crate::game::GameId;
use crate::options::CompileOptions;

pub const DEFAULT_TEXTURE_WIDTH: u32 = 64;
pub const DEFAULT_TEXTURE_HEIGHT: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct TextureMeta {
    pub width: u32,
    pub height: u32,
    /// Native contents bits (Quake II .wal), 0 elsewhere.
    pub contents: i32,
    /// Native surface bits (Quake II .wal), 0 elsewhere.
    pub flags: i32,
    pub value: i32,
    /// Next frame of an animation chain, if any.
    pub animation: Option<String>,
}

impl Default for TextureMeta {
    fn default() -> Self {
        Self {
            width: DEFAULT_TEXTURE_WIDTH,
            height: DEFAULT_TEXTURE_HEIGHT,
            contents: 0,
            flags: 0,
            value: 0,
            animation: None,
        }
    }
}

pub trait TextureSource {
    /// Case-insensitive lookup by texture name.
    fn find(&self, name: &str) -> Option<TextureMeta>;
}

/// Source with no textures at all; every lookup falls back to the
/// default dimensions at the call site.
#[derive(Default)]
pub struct NullTextureSource;

impl TextureSource for NullTextureSource {
    fn find(&self, _name: &str) -> Option<TextureMeta> {
        None
    }
}

/// In-memory table, also the accumulation point for loaded wads.
#[derive(Default)]
pub struct TextureTable {
    entries: HashMap<String, TextureMeta>,
}

impl TextureTable {
    pub fn insert(&mut self, name: &str, meta: TextureMeta) {
        self.entries.insert(name.to_ascii_lowercase(), meta);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads the lump directory of a WAD2 file and records the
    /// dimensions of every miptex in it. Pixel data is not loaded.
    pub fn add_wad(&mut self, path: &Path) -> Result<usize> {
        let data = fs::read(path).map_err(|source| MapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let count = self
            .add_wad_data(&data)
            .map_err(|msg| MapError::Internal(format!("{}: {}", path.display(), msg)))?;
        Ok(count)
    }

    fn add_wad_data(&mut self, data: &[u8]) -> std::result::Result<usize, String> {
        const LUMP_SIZE: usize = 32;
        const TYP_MIPTEX: u8 = 0x44;

        if data.len() < 12 || &data[0..4] != b"WAD2" {
            return Err("not a WAD2 file".to_string());
        }
        let numlumps = read_u32(data, 4)? as usize;
        let tableofs = read_u32(data, 8)? as usize;

        let mut added = 0;
        for i in 0..numlumps {
            let lump = tableofs + i * LUMP_SIZE;
            if lump + LUMP_SIZE > data.len() {
                return Err("lump directory overruns file".to_string());
            }
            if data[lump + 12] != TYP_MIPTEX {
                continue;
            }
            let filepos = read_u32(data, lump)? as usize;
            let name = read_name(&data[lump + 16..lump + 32]);

            // miptex header: name[16], width, height
            let width = read_u32(data, filepos + 16)?;
            let height = read_u32(data, filepos + 20)?;
            self.insert(
                &name,
                TextureMeta {
                    width,
                    height,
                    ..Default::default()
                },
            );
            added += 1;
        }
        Ok(added)
    }
}

impl TextureSource for TextureTable {
    fn find(&self, name: &str) -> Option<TextureMeta> {
        self.entries.get(&name.to_ascii_lowercase()).cloned()
    }
}

/// Per-session texture state: the metadata table plus lazy wad loading
/// driven by the worldspawn "wad" key. Loading is deferred until the
/// first brush is parsed, once the worldspawn keys are known.
#[derive(Default)]
pub struct SessionTextures {
    pub table: TextureTable,
    loaded: bool,
    /// Candidate .wad next to the map file, tried when the worldspawn
    /// lists none.
    pub fallback_wad: Option<std::path::PathBuf>,
}

impl SessionTextures {
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn table_find(&self, name: &str) -> Option<TextureMeta> {
        self.table.find(name)
    }

    pub fn ensure_loaded(&mut self, worldspawn: &crate::map::Epairs, options: &CompileOptions) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        // Quake II metadata comes from .wal files supplied up front
        if options.game.id() == GameId::Quake2 {
            return;
        }

        let mut any = false;
        if let Some(wads) = worldspawn.get("wad").or_else(|| worldspawn.get("_wad")) {
            for path in wads.split(';') {
                let path = path.trim();
                if path.is_empty() {
                    continue;
                }
                match self.table.add_wad(Path::new(path)) {
                    Ok(count) => {
                        any = any || count > 0;
                        log::info!("loaded {} textures from {}", count, path);
                    }
                    Err(err) => log::warn!("{}", err),
                }
            }
        }

        if !any {
            if let Some(fallback) = self.fallback_wad.clone() {
                if let Ok(count) = self.table.add_wad(&fallback) {
                    log::info!("loaded {} textures from {}", count, fallback.display());
                }
            }
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> std::result::Result<u32, String> {
    let bytes: [u8; 4] = data
        .get(offset..offset + 4)
        .ok_or_else(|| "truncated file".to_string())?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(bytes))
}

fn read_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_wad() -> Vec<u8> {
        // one 32x16 miptex named "tech01_1"
        let mut miptex = Vec::new();
        let mut name = [0u8; 16];
        name[..8].copy_from_slice(b"tech01_1");
        miptex.extend_from_slice(&name);
        miptex.extend_from_slice(&32u32.to_le_bytes());
        miptex.extend_from_slice(&16u32.to_le_bytes());

        let mut wad = Vec::new();
        wad.extend_from_slice(b"WAD2");
        wad.extend_from_slice(&1u32.to_le_bytes());
        let tableofs = 12 + miptex.len() as u32;
        wad.extend_from_slice(&tableofs.to_le_bytes());
        wad.extend_from_slice(&miptex);

        // lump entry
        wad.extend_from_slice(&12u32.to_le_bytes()); // filepos
        wad.extend_from_slice(&(miptex.len() as u32).to_le_bytes()); // disksize
        wad.extend_from_slice(&(miptex.len() as u32).to_le_bytes()); // size
        wad.push(0x44); // type
        wad.push(0); // compression
        wad.extend_from_slice(&[0, 0]); // pad
        wad.extend_from_slice(&name);
        wad
    }

    #[test]
    fn test_wad_directory_read() {
        let mut table = TextureTable::default();
        let added = table.add_wad_data(&tiny_wad()).unwrap();
        assert_eq!(added, 1);
        let meta = table.find("TECH01_1").unwrap();
        assert_eq!((meta.width, meta.height), (32, 16));
    }

    #[test]
    fn test_rejects_non_wad() {
        let mut table = TextureTable::default();
        assert!(table.add_wad_data(b"PACKnope").is_err());
    }

    #[test]
    fn test_null_source_finds_nothing() {
        assert!(NullTextureSource.find("anything").is_none());
    }
}

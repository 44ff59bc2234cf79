// load.rs — map file loading and the compile driver

use std::fs;
use std::path::Path;

use qmap_common::parser::Parser;

use crate::error::{MapError, Result};
use crate::map::MapData;
use crate::options::CompileOptions;
use crate::parse::parse_entity;
use crate::process::{process_areaportal, process_external_map_entity, process_map_brushes};
use crate::texture::SessionTextures;

/// Parses map text into the session, appending every entity.
pub fn load_map_text(
    source: &str,
    filename: Option<String>,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &mut SessionTextures,
) -> Result<()> {
    let mut parser = Parser::new(source, filename);
    while let Some(entity) = parse_entity(&mut parser, map, options, textures)? {
        map.entities.push(entity);
    }
    Ok(())
}

/// Parses an additional map whose geometry joins the base map. The
/// extra worldspawn becomes a func_group so its brushes merge into the
/// base world.
fn merge_add_text(
    source: &str,
    filename: Option<String>,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &mut SessionTextures,
) -> Result<()> {
    let mut parser = Parser::new(source, filename);
    while let Some(mut entity) = parse_entity(&mut parser, map, options, textures)? {
        if entity.classname() == "worldspawn" {
            entity.epairs.set("classname", "func_group");
        }
        map.entities.push(entity);
    }
    Ok(())
}

/// Loads the map file named by `path`, plus the optional -add map, and
/// logs the table statistics.
pub fn load_map_file(
    path: &Path,
    map: &mut MapData,
    options: &CompileOptions,
    textures: &mut SessionTextures,
) -> Result<()> {
    let data = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.display().to_string(),
        source,
    })?;

    // a wad sitting next to the map is the lookup of last resort
    textures.fallback_wad = Some(path.with_extension("wad"));

    load_map_text(
        &data,
        Some(path.display().to_string()),
        map,
        options,
        textures,
    )?;

    if let Some(add_path) = &options.add_map {
        let data = fs::read_to_string(add_path).map_err(|source| MapError::Io {
            path: add_path.display().to_string(),
            source,
        })?;
        merge_add_text(
            &data,
            Some(add_path.display().to_string()),
            map,
            options,
            textures,
        )?;
    }

    log::info!("{:8} entities", map.entities.len());
    log::info!("{:8} unique texnames", map.miptexes.len());
    log::info!("{:8} texinfo", map.texinfos.len());
    log::info!("{:8} unique planes", map.planes.len());
    Ok(())
}

/// Full front-end run: load, resolve external maps and area portals,
/// then the geometry pass.
pub fn load_and_process(
    path: &Path,
    options: &CompileOptions,
) -> Result<(MapData, SessionTextures)> {
    let mut map = MapData::new();
    let mut textures = SessionTextures::default();

    load_map_file(path, &mut map, options, &mut textures)?;

    for index in 0..map.entities.len() {
        process_external_map_entity(&mut map, index, options, &mut textures)?;
        process_areaportal(&mut map, index, options, &textures)?;
    }

    process_map_brushes(&mut map, options)?;
    Ok((map, textures))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_MAP: &str = r#"
{
    "classname" "worldspawn"
    "message" "base"
}
{
    "classname" "info_player_start"
    "origin" "0 0 24"
}
"#;

    const ADD_MAP: &str = r#"
{
    "classname" "worldspawn"
    "message" "addendum"
}
"#;

    #[test]
    fn test_load_map_text() {
        let options = CompileOptions::default();
        let mut map = MapData::new();
        let mut textures = SessionTextures::default();
        load_map_text(BASE_MAP, None, &mut map, &options, &mut textures).expect("load failed");
        assert_eq!(map.entities.len(), 2);
        assert_eq!(map.world().unwrap().classname(), "worldspawn");
    }

    #[test]
    fn test_add_map_worldspawn_becomes_func_group() {
        let options = CompileOptions::default();
        let mut map = MapData::new();
        let mut textures = SessionTextures::default();
        load_map_text(BASE_MAP, None, &mut map, &options, &mut textures).expect("load failed");
        merge_add_text(ADD_MAP, None, &mut map, &options, &mut textures).expect("merge failed");

        assert_eq!(map.entities.len(), 3);
        let merged = &map.entities[2];
        assert_eq!(merged.classname(), "func_group");
        assert_eq!(merged.epairs.get("message"), Some("addendum"));
        // the base worldspawn is untouched
        assert_eq!(map.world().unwrap().classname(), "worldspawn");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let options = CompileOptions::default();
        let mut map = MapData::new();
        let mut textures = SessionTextures::default();
        let err = load_map_file(
            Path::new("/nonexistent/no_such.map"),
            &mut map,
            &options,
            &mut textures,
        )
        .unwrap_err();
        assert!(matches!(err, MapError::Io { .. }));
    }
}

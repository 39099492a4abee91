use std::collections::{BTreeMap, HashMap};

use compat_q3::bsp::ShaderRecord;
use compat_q3::shader::ShaderDef;
use exporter_core::logging;

// The compiler writes this name into lump rows that should never render.
const NOSHADER: &str = "noshader";

/// Merges the shader lump with the parsed script table, keyed by lump row
/// ordinal. Rows without a script definition fall back to `default_shader`
/// (a disk probe in production, injectable for tests); rows that resolve
/// nowhere are dropped. The lump's baked surface/content flags always
/// overwrite whatever the scripts said.
pub fn resolve_materials(
    records: &[ShaderRecord],
    parsed: &HashMap<String, ShaderDef>,
    mut default_shader: impl FnMut(&str) -> Option<ShaderDef>,
) -> BTreeMap<usize, ShaderDef> {
    let mut materials = BTreeMap::new();

    for (index, record) in records.iter().enumerate() {
        if record.name == NOSHADER {
            continue;
        }
        let mut shader = match parsed.get(&record.name) {
            Some(shader) => shader.clone(),
            None => match default_shader(&record.name) {
                Some(shader) => shader,
                None => {
                    logging::warn(format!(
                        "shader lump row {} ({}) has no script and no texture, skipping",
                        index, record.name
                    ));
                    continue;
                }
            },
        };
        shader.surface_flags = record.surface_flags;
        shader.content_flags = record.content_flags;
        materials.insert(index, shader);
    }

    materials
}

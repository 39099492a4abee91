use std::path::PathBuf;

use clap::Parser;

use compat_q3::bsp::{Bsp, DrawVert, FaceRecord, LumpType, ShaderRecord};
use compat_q3::{entity, shader};
use exporter_core::logging;
use exporter_core::vfs::{self, Vfs};
use scene_cook::{assemble_scene, build_surfaces, resolve_materials};

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(
    name = "q3map-export",
    version,
    about = "Exports a compiled Quake 3 map to a glTF 2.0 scene"
)]
struct Cli {
    /// Directory holding the game's pk3 archives.
    #[arg(long, value_name = "PATH")]
    base_path: PathBuf,

    /// Map stem, e.g. q3dm1.
    #[arg(long)]
    map: String,

    /// Output directory for the scene file and its textures.
    #[arg(long, value_name = "DIR")]
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(run_export(&cli));
}

fn run_export(cli: &Cli) -> i32 {
    if cli.base_path.as_os_str().is_empty()
        || cli.map.trim().is_empty()
        || cli.output.as_os_str().is_empty()
    {
        logging::error("--base-path, --map and --output must not be empty");
        return EXIT_FAILURE;
    }

    let archives = match vfs::list_archives(&cli.base_path) {
        Ok(archives) => archives,
        Err(err) => {
            logging::error(format!("failed to list archives: {}", err));
            return EXIT_FAILURE;
        }
    };
    if archives.is_empty() {
        logging::error(format!(
            "no pk3 archives found in {}",
            cli.base_path.display()
        ));
        return EXIT_FAILURE;
    }
    logging::info(format!("found {} archives", archives.len()));

    let vfs = match Vfs::mount(&archives, &std::env::temp_dir()) {
        Ok(vfs) => vfs,
        Err(err) => {
            logging::error(format!("failed to build virtual filesystem: {}", err));
            return EXIT_FAILURE;
        }
    };
    logging::info(format!("mounted vfs at {}", vfs.mount_point().display()));

    let map_path = vfs.resolve(&format!("maps/{}.bsp", cli.map));
    if !map_path.is_file() {
        logging::error(format!("map not found in vfs: {}", map_path.display()));
        return EXIT_FAILURE;
    }

    let bsp = match Bsp::read(&map_path) {
        Ok(bsp) => bsp,
        Err(err) => {
            logging::error(format!("failed to load bsp: {}", err));
            return EXIT_FAILURE;
        }
    };

    let vertices = match bsp.records::<DrawVert>(LumpType::Vertexes) {
        Ok(records) => records,
        Err(err) => {
            logging::error(format!("bad vertex lump: {}", err));
            return EXIT_FAILURE;
        }
    };
    let meshverts = match bsp.records::<i32>(LumpType::MeshVerts) {
        Ok(records) => records,
        Err(err) => {
            logging::error(format!("bad meshvert lump: {}", err));
            return EXIT_FAILURE;
        }
    };
    let faces = match bsp.records::<FaceRecord>(LumpType::Faces) {
        Ok(records) => records,
        Err(err) => {
            logging::error(format!("bad face lump: {}", err));
            return EXIT_FAILURE;
        }
    };
    let shader_records = match bsp.records::<ShaderRecord>(LumpType::Textures) {
        Ok(records) => records,
        Err(err) => {
            logging::error(format!("bad shader lump: {}", err));
            return EXIT_FAILURE;
        }
    };
    logging::info(format!(
        "loaded bsp: {} faces, {} vertices, {} shader rows",
        faces.len(),
        vertices.len(),
        shader_records.len()
    ));

    let scripts = shader::list_shader_scripts(&vfs);
    logging::info(format!("found {} shader scripts", scripts.len()));
    let shader_table = shader::parse_shader_scripts(&vfs, &scripts);
    logging::info(format!("parsed {} shaders", shader_table.len()));

    let materials = resolve_materials(&shader_records, &shader_table, |name| {
        shader::default_shader(name, &vfs)
    });
    logging::info(format!("resolved {} materials", materials.len()));

    let surfaces = build_surfaces(&faces, &vertices, &meshverts);
    logging::info(format!("built {} surfaces", surfaces.len()));

    let raw_entities = entity::parse_entities(&bsp.entities_text());
    let entities = entity::classify_entities(&raw_entities);
    logging::info(format!("parsed {} entities", entities.len()));

    let scene = assemble_scene(&surfaces, &materials, &entities);
    logging::info(format!(
        "assembled scene: {} geometries, {} materials, {} lights",
        scene.geometries.len(),
        scene.materials.len(),
        scene.lights.len()
    ));

    match gltf_save::save_scene(&scene, &cli.output, &cli.map) {
        Ok(path) => {
            logging::info(format!("wrote {}", path.display()));
            EXIT_SUCCESS
        }
        Err(err) => {
            logging::error(format!("failed to save scene: {}", err));
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new(label: &str) -> Self {
            let mut path = std::env::temp_dir();
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            path.push(format!("q3map_export_test_{}_{}", label, stamp));
            fs::create_dir_all(&path).expect("create temp dir");
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    const LUMP_COUNT: usize = 17;
    const HEADER_LEN: usize = 8 + LUMP_COUNT * 8;

    fn build_bsp(lumps: &[(LumpType, Vec<u8>)]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_LEN];
        data[0..4].copy_from_slice(b"IBSP");
        data[4..8].copy_from_slice(&0x2eu32.to_le_bytes());
        for (kind, bytes) in lumps {
            let offset = data.len() as u32;
            let base = 8 + (*kind as usize) * 8;
            data[base..base + 4].copy_from_slice(&offset.to_le_bytes());
            data[base + 4..base + 8].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
            data.extend_from_slice(bytes);
        }
        data
    }

    fn encode_vertex(xyz: [f32; 3]) -> Vec<u8> {
        let mut out = Vec::with_capacity(44);
        for value in xyz {
            out.extend_from_slice(&value.to_le_bytes());
        }
        // st and lightmap stay zero
        out.extend_from_slice(&[0u8; 16]);
        for value in [0.0f32, 0.0, 1.0] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&[255u8; 4]);
        out
    }

    fn encode_planar_face(shader_num: i32, num_verts: i32, num_indexes: i32) -> Vec<u8> {
        let mut out = vec![0u8; 104];
        out[0..4].copy_from_slice(&shader_num.to_le_bytes());
        out[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        out[8..12].copy_from_slice(&1i32.to_le_bytes());
        out[16..20].copy_from_slice(&num_verts.to_le_bytes());
        out[24..28].copy_from_slice(&num_indexes.to_le_bytes());
        out
    }

    fn encode_shader_record(name: &str) -> Vec<u8> {
        let mut out = vec![0u8; 72];
        out[..name.len()].copy_from_slice(name.as_bytes());
        out
    }

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).expect("create archive");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).expect("start file");
            writer.write_all(data).expect("write entry");
        }
        writer.finish().expect("finish archive");
    }

    #[test]
    fn end_to_end_export() {
        // All stages share the fixed mount name, so they run in one test,
        // sequentially.
        let temp = TempDir::new("end_to_end");

        // Empty base dir: configuration failure.
        let empty_base = temp.path().join("empty");
        fs::create_dir_all(&empty_base).expect("empty base dir");
        let cli = Cli {
            base_path: empty_base,
            map: "testmap".to_string(),
            output: temp.path().join("out_none"),
        };
        assert_eq!(run_export(&cli), EXIT_FAILURE);

        // A full synthetic game directory.
        let entities_text = br#"
{
"classname" "worldspawn"
"message" "fixture"
}
{
"classname" "light"
"origin" "100 200 300"
"light" "500"
"_color" "1 0.5 0"
}
"#;
        let mut vertex_bytes = Vec::new();
        vertex_bytes.extend(encode_vertex([100.0, 200.0, 300.0]));
        vertex_bytes.extend(encode_vertex([200.0, 200.0, 300.0]));
        vertex_bytes.extend(encode_vertex([100.0, 300.0, 300.0]));
        let mut meshvert_bytes = Vec::new();
        for value in [0i32, 1, 2] {
            meshvert_bytes.extend_from_slice(&value.to_le_bytes());
        }
        let bsp_bytes = build_bsp(&[
            (LumpType::Entities, entities_text.to_vec()),
            (
                LumpType::Textures,
                encode_shader_record("textures/test/wall"),
            ),
            (LumpType::Vertexes, vertex_bytes),
            (LumpType::MeshVerts, meshvert_bytes),
            (LumpType::Faces, encode_planar_face(0, 3, 3)),
        ]);

        let shader_script = br#"
textures/test/wall
{
	q3map_surfacelight 200
	{
		map textures/test/wall.tga
	}
}
"#;
        let base = temp.path().join("baseq3");
        fs::create_dir_all(&base).expect("base dir");
        write_archive(
            &base.join("pak0.pk3"),
            &[
                ("maps/testmap.bsp", &bsp_bytes),
                ("scripts/test.shader", shader_script),
                ("textures/test/wall.tga", b"tga bytes"),
            ],
        );

        // Wrong map name: pipeline failure.
        let cli = Cli {
            base_path: base.clone(),
            map: "nope".to_string(),
            output: temp.path().join("out_nope"),
        };
        assert_eq!(run_export(&cli), EXIT_FAILURE);

        // The real export.
        let output = temp.path().join("out");
        let cli = Cli {
            base_path: base,
            map: "testmap".to_string(),
            output: output.clone(),
        };
        assert_eq!(run_export(&cli), EXIT_SUCCESS);

        assert!(output.join("testmap.bin").is_file());
        assert!(output.join("test@wall.tga").is_file());

        let text = fs::read_to_string(output.join("testmap.gltf")).expect("read gltf");
        let doc: serde_json::Value = serde_json::from_str(&text).expect("parse gltf");

        assert_eq!(doc["nodes"][0]["name"], "Worldspawn");
        assert_eq!(doc["meshes"].as_array().unwrap().len(), 1);
        assert_eq!(doc["materials"][0]["name"], "textures/test/wall");
        assert_eq!(
            doc["materials"][0]["extensions"]["KHR_materials_emissive_strength"]
                ["emissiveStrength"],
            200.0
        );
        assert_eq!(doc["images"][0]["uri"], "test@wall.tga");

        // One point light from the entity lump; the area light lives in the
        // material's emissive channel.
        let lights = doc["extensions"]["KHR_lights_punctual"]["lights"]
            .as_array()
            .unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0]["type"], "point");
        assert_eq!(lights[0]["intensity"], 50000.0);

        // The first vertex lands at (2.54, 7.62, -5.08) in the buffer.
        let bin = fs::read(output.join("testmap.bin")).expect("read bin");
        let x = f32::from_le_bytes(bin[0..4].try_into().unwrap());
        let y = f32::from_le_bytes(bin[4..8].try_into().unwrap());
        let z = f32::from_le_bytes(bin[8..12].try_into().unwrap());
        assert!((x - 2.54).abs() < 1e-4);
        assert!((y - 7.62).abs() < 1e-4);
        assert!((z + 5.08).abs() < 1e-4);
    }
}

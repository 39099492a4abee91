//! glTF 2.0 output: one JSON document, one external binary buffer, and the
//! referenced texture images copied alongside.
#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use exporter_core::logging;
use scene_cook::{Geometry, LightKind, Material, Scene, IDENTITY_TRANSFORM};

const GENERATOR: &str = "q3map-export";

// Punctual lights come out of the map in Quake's photometric scale; glTF
// consumers expect candela-ish numbers.
const PUNCTUAL_INTENSITY_SCALE: f32 = 100.0;
const EMISSIVE_STRENGTH_SCALE: f32 = 1.0;

const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const COMPONENT_F32: u32 = 5126;
const COMPONENT_U32: u32 = 5125;
const MODE_TRIANGLES: u32 = 4;

const EXT_LIGHTS_PUNCTUAL: &str = "KHR_lights_punctual";
const EXT_EMISSIVE_STRENGTH: &str = "KHR_materials_emissive_strength";

#[derive(Debug)]
pub enum SaveError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Io(err) => write!(f, "io error: {}", err),
            SaveError::Json(err) => write!(f, "json serialization failed: {}", err),
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::Io(err) => Some(err),
            SaveError::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for SaveError {
    fn from(err: std::io::Error) -> Self {
        SaveError::Io(err)
    }
}

impl From<serde_json::Error> for SaveError {
    fn from(err: serde_json::Error) -> Self {
        SaveError::Json(err)
    }
}

/// Writes `<stem>.gltf` plus `<stem>.bin` into `output_dir`, copying every
/// referenced texture next to them. Returns the path of the document.
pub fn save_scene(scene: &Scene, output_dir: &Path, stem: &str) -> Result<PathBuf, SaveError> {
    fs::create_dir_all(output_dir)?;

    let mut doc = Document::new();
    let mut bin: Vec<u8> = Vec::new();
    let mut texture_cache: HashMap<String, usize> = HashMap::new();

    doc.nodes.push(Node {
        name: Some("Worldspawn".to_string()),
        ..Node::default()
    });
    doc.scenes.push(SceneEntry { nodes: vec![0] });

    // Materials, keyed in the scene by shader-lump index.
    let mut material_lookup: HashMap<usize, usize> = HashMap::new();
    for (&key, material) in &scene.materials {
        let entry = build_material_entry(material, output_dir, &mut doc, &mut texture_cache);
        doc.materials.push(entry);
        material_lookup.insert(key, doc.materials.len() - 1);
    }

    // One mesh and one child node per geometry.
    for (&face_index, geometry) in &scene.geometries {
        let primitive = encode_geometry(geometry, &material_lookup, &mut doc, &mut bin);
        doc.meshes.push(Mesh {
            primitives: vec![primitive],
        });
        let node = Node {
            name: Some(format!("Geometry_{}", face_index)),
            mesh: Some(doc.meshes.len() - 1),
            matrix: non_identity_matrix(geometry.transform),
            ..Node::default()
        };
        push_world_child(&mut doc, node);
    }

    encode_lights(scene, &mut doc);

    if !bin.is_empty() {
        while !bin.len().is_multiple_of(4) {
            bin.push(0);
        }
        let bin_uri = format!("{}.bin", stem);
        fs::write(output_dir.join(&bin_uri), &bin)?;
        doc.buffers.push(Buffer {
            uri: bin_uri,
            byte_length: bin.len(),
        });
    }

    let gltf_path = output_dir.join(format!("{}.gltf", stem));
    fs::write(&gltf_path, serde_json::to_vec_pretty(&doc)?)?;
    Ok(gltf_path)
}

fn build_material_entry(
    material: &Material,
    output_dir: &Path,
    doc: &mut Document,
    texture_cache: &mut HashMap<String, usize>,
) -> MaterialEntry {
    let mut entry = MaterialEntry {
        name: Some(material.name.clone()),
        pbr_metallic_roughness: PbrMetallicRoughness {
            base_color_texture: None,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
        },
        emissive_factor: None,
        emissive_texture: None,
        extensions: None,
    };

    if let Some(albedo) = &material.albedo {
        if let Some(index) = add_or_reuse_texture(albedo, output_dir, doc, texture_cache) {
            entry.pbr_metallic_roughness.base_color_texture = Some(TextureRef { index });
        }
    }

    if material.emission_intensity > 0.0 {
        entry.emissive_factor = Some([1.0, 1.0, 1.0]);
        if let Some(emission) = &material.emission {
            if let Some(index) = add_or_reuse_texture(emission, output_dir, doc, texture_cache) {
                entry.emissive_texture = Some(TextureRef { index });
            }
        }
        if material.emission_intensity > 1.0 {
            declare_extension(doc, EXT_EMISSIVE_STRENGTH);
            entry.extensions = Some(MaterialExtensions {
                emissive_strength: EmissiveStrength {
                    emissive_strength: material.emission_intensity * EMISSIVE_STRENGTH_SCALE,
                },
            });
        }
    }

    entry
}

/// Copies the image next to the document under a `<dir>@<file>` name (the
/// source directory disambiguates recurring file names) and returns the
/// glTF texture index, reusing it for repeated sources.
fn add_or_reuse_texture(
    path: &Path,
    output_dir: &Path,
    doc: &mut Document,
    texture_cache: &mut HashMap<String, usize>,
) -> Option<usize> {
    let uri = image_uri(path);
    if let Some(&index) = texture_cache.get(&uri) {
        return Some(index);
    }

    let destination = output_dir.join(&uri);
    if let Err(err) = fs::copy(path, &destination) {
        logging::error(format!(
            "failed to copy texture {} to {}: {}",
            path.display(),
            destination.display(),
            err
        ));
        return None;
    }

    doc.images.push(Image { uri: uri.clone() });
    doc.textures.push(Texture {
        source: doc.images.len() - 1,
    });
    let index = doc.textures.len() - 1;
    texture_cache.insert(uri, index);
    Some(index)
}

fn image_uri(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.parent().and_then(|parent| parent.file_name()) {
        Some(dir) => format!("{}@{}", dir.to_string_lossy(), file),
        None => file,
    }
}

fn encode_geometry(
    geometry: &Geometry,
    material_lookup: &HashMap<usize, usize>,
    doc: &mut Document,
    bin: &mut Vec<u8>,
) -> MeshPrimitive {
    let mut attributes = BTreeMap::new();

    {
        let (min, max) = bounding_coords(&geometry.positions);
        let view = push_view(doc, bin, &vec3_bytes(&geometry.positions), TARGET_ARRAY_BUFFER);
        let accessor = push_accessor(
            doc,
            Accessor {
                buffer_view: view,
                byte_offset: 0,
                component_type: COMPONENT_F32,
                count: geometry.positions.len(),
                kind: "VEC3",
                min: Some(min.to_vec()),
                max: Some(max.to_vec()),
            },
        );
        attributes.insert("POSITION", accessor);
    }

    if !geometry.normals.is_empty() {
        let view = push_view(doc, bin, &vec3_bytes(&geometry.normals), TARGET_ARRAY_BUFFER);
        let accessor = push_accessor(
            doc,
            Accessor {
                buffer_view: view,
                byte_offset: 0,
                component_type: COMPONENT_F32,
                count: geometry.normals.len(),
                kind: "VEC3",
                min: None,
                max: None,
            },
        );
        attributes.insert("NORMAL", accessor);
    }

    for (semantic, uvs) in [
        ("TEXCOORD_0", &geometry.texture_uvs),
        ("TEXCOORD_1", &geometry.lightmap_uvs),
    ] {
        if uvs.is_empty() {
            continue;
        }
        let view = push_view(doc, bin, &vec2_bytes(uvs), TARGET_ARRAY_BUFFER);
        let accessor = push_accessor(
            doc,
            Accessor {
                buffer_view: view,
                byte_offset: 0,
                component_type: COMPONENT_F32,
                count: uvs.len(),
                kind: "VEC2",
                min: None,
                max: None,
            },
        );
        attributes.insert(semantic, accessor);
    }

    let indices = {
        let mut bytes = Vec::with_capacity(geometry.indices.len() * 4);
        for &index in &geometry.indices {
            bytes.extend_from_slice(&index.to_le_bytes());
        }
        let view = push_view(doc, bin, &bytes, TARGET_ELEMENT_ARRAY_BUFFER);
        push_accessor(
            doc,
            Accessor {
                buffer_view: view,
                byte_offset: 0,
                component_type: COMPONENT_U32,
                count: geometry.indices.len(),
                kind: "SCALAR",
                min: None,
                max: None,
            },
        )
    };

    MeshPrimitive {
        attributes,
        indices: Some(indices),
        material: material_lookup.get(&geometry.material_id).copied(),
        mode: MODE_TRIANGLES,
    }
}

fn encode_lights(scene: &Scene, doc: &mut Document) {
    let mut lights = Vec::new();

    for light in &scene.lights {
        // Area lights live entirely in their material's emissive channel.
        if light.kind == LightKind::Area {
            continue;
        }
        let light_index = lights.len();

        let kind = match light.kind {
            LightKind::Point => "point",
            LightKind::Directional => "directional",
            LightKind::Spot => "spot",
            LightKind::Area => unreachable!(),
        };
        let spot = (light.kind == LightKind::Spot).then(|| SpotCone {
            inner_cone_angle: safe_acos(light.cos_inner_cone),
            outer_cone_angle: safe_acos(light.cos_outer_cone),
        });
        lights.push(PunctualLight {
            name: Some(format!("Light_{}", light_index)),
            kind,
            color: light.color,
            intensity: light.intensity * PUNCTUAL_INTENSITY_SCALE,
            spot,
        });

        // glTF lights shine down their node's -Z axis.
        let rotation = match light.kind {
            LightKind::Directional | LightKind::Spot => align_negative_z(light.direction),
            _ => None,
        };
        let node = Node {
            name: Some(format!("LightNode_{}", light_index)),
            translation: Some(light.position),
            rotation,
            extensions: Some(NodeExtensions {
                khr_lights_punctual: NodeLight { light: light_index },
            }),
            ..Node::default()
        };
        push_world_child(doc, node);
    }

    if !lights.is_empty() {
        declare_extension(doc, EXT_LIGHTS_PUNCTUAL);
        doc.extensions = Some(DocumentExtensions {
            khr_lights_punctual: LightsExtension { lights },
        });
    }
}

fn push_world_child(doc: &mut Document, node: Node) {
    doc.nodes.push(node);
    let index = doc.nodes.len() - 1;
    doc.nodes[0].children.push(index);
}

fn push_view(doc: &mut Document, bin: &mut Vec<u8>, bytes: &[u8], target: u32) -> usize {
    while !bin.len().is_multiple_of(4) {
        bin.push(0);
    }
    doc.buffer_views.push(BufferView {
        buffer: 0,
        byte_offset: bin.len(),
        byte_length: bytes.len(),
        target: Some(target),
    });
    bin.extend_from_slice(bytes);
    doc.buffer_views.len() - 1
}

fn push_accessor(doc: &mut Document, accessor: Accessor) -> usize {
    doc.accessors.push(accessor);
    doc.accessors.len() - 1
}

fn declare_extension(doc: &mut Document, name: &str) {
    if !doc.extensions_used.iter().any(|used| used == name) {
        doc.extensions_used.push(name.to_string());
    }
}

fn vec3_bytes(values: &[[f32; 3]]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 12);
    for value in values {
        for component in value {
            bytes.extend_from_slice(&component.to_le_bytes());
        }
    }
    bytes
}

fn vec2_bytes(values: &[[f32; 2]]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        for component in value {
            bytes.extend_from_slice(&component.to_le_bytes());
        }
    }
    bytes
}

fn bounding_coords(points: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut min = [0.0f32; 3];
    let mut max = [0.0f32; 3];
    if let Some(first) = points.first() {
        min = *first;
        max = *first;
    }
    for point in points {
        for i in 0..3 {
            min[i] = min[i].min(point[i]);
            max[i] = max[i].max(point[i]);
        }
    }
    (min, max)
}

fn non_identity_matrix(transform: [[f32; 4]; 4]) -> Option<[f32; 16]> {
    if transform == IDENTITY_TRANSFORM {
        return None;
    }
    let mut flat = [0.0f32; 16];
    for (column, values) in transform.iter().enumerate() {
        for (row, value) in values.iter().enumerate() {
            flat[column * 4 + row] = *value;
        }
    }
    Some(flat)
}

// acos clamped so cosines straddling +-1 by a rounding error stay finite.
fn safe_acos(cos_value: f32) -> f32 {
    cos_value.clamp(-1.0, 1.0).acos()
}

/// Builds the quaternion rotating the node's -Z axis onto the light's
/// travel direction. Returns nothing for degenerate directions.
fn align_negative_z(direction: [f32; 3]) -> Option<[f32; 4]> {
    let length = vec_length(direction);
    if length <= 1e-6 {
        return None;
    }
    let z = [
        -direction[0] / length,
        -direction[1] / length,
        -direction[2] / length,
    ];
    let mut up = [0.0, 1.0, 0.0];
    if dot(z, up).abs() > 0.99 {
        up = [1.0, 0.0, 0.0];
    }
    let x = normalize(cross(up, z))?;
    let y = cross(z, x);
    Some(quaternion_from_columns(x, y, z))
}

fn quaternion_from_columns(x: [f32; 3], y: [f32; 3], z: [f32; 3]) -> [f32; 4] {
    let (m00, m01, m02) = (x[0], y[0], z[0]);
    let (m10, m11, m12) = (x[1], y[1], z[1]);
    let (m20, m21, m22) = (x[2], y[2], z[2]);

    let trace = m00 + m11 + m22;
    if trace > 0.0 {
        let s = 0.5 / (trace + 1.0).sqrt();
        [
            (m21 - m12) * s,
            (m02 - m20) * s,
            (m10 - m01) * s,
            0.25 / s,
        ]
    } else if m00 > m11 && m00 > m22 {
        let s = 2.0 * (1.0 + m00 - m11 - m22).sqrt();
        [
            0.25 * s,
            (m01 + m10) / s,
            (m02 + m20) / s,
            (m21 - m12) / s,
        ]
    } else if m11 > m22 {
        let s = 2.0 * (1.0 + m11 - m00 - m22).sqrt();
        [
            (m01 + m10) / s,
            0.25 * s,
            (m12 + m21) / s,
            (m02 - m20) / s,
        ]
    } else {
        let s = 2.0 * (1.0 + m22 - m00 - m11).sqrt();
        [
            (m02 + m20) / s,
            (m12 + m21) / s,
            0.25 * s,
            (m10 - m01) / s,
        ]
    }
}

fn vec_length(v: [f32; 3]) -> f32 {
    dot(v, v).sqrt()
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> Option<[f32; 3]> {
    let length = vec_length(v);
    if length <= 1e-6 {
        return None;
    }
    Some([v[0] / length, v[1] / length, v[2] / length])
}

// --- Document model -------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    asset: Asset,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extensions_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<DocumentExtensions>,
    scene: usize,
    scenes: Vec<SceneEntry>,
    nodes: Vec<Node>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    meshes: Vec<Mesh>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    materials: Vec<MaterialEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    accessors: Vec<Accessor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    buffer_views: Vec<BufferView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    buffers: Vec<Buffer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<Image>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    textures: Vec<Texture>,
}

impl Document {
    fn new() -> Document {
        Document {
            asset: Asset {
                version: "2.0",
                generator: GENERATOR,
            },
            extensions_used: Vec::new(),
            extensions: None,
            scene: 0,
            scenes: Vec::new(),
            nodes: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            accessors: Vec::new(),
            buffer_views: Vec::new(),
            buffers: Vec::new(),
            images: Vec::new(),
            textures: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct Asset {
    version: &'static str,
    generator: &'static str,
}

#[derive(Serialize)]
struct SceneEntry {
    nodes: Vec<usize>,
}

#[derive(Serialize, Default)]
struct Node {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mesh: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    translation: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rotation: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matrix: Option<[f32; 16]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<NodeExtensions>,
}

#[derive(Serialize)]
struct NodeExtensions {
    #[serde(rename = "KHR_lights_punctual")]
    khr_lights_punctual: NodeLight,
}

#[derive(Serialize)]
struct NodeLight {
    light: usize,
}

#[derive(Serialize)]
struct Mesh {
    primitives: Vec<MeshPrimitive>,
}

#[derive(Serialize)]
struct MeshPrimitive {
    attributes: BTreeMap<&'static str, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    indices: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    material: Option<usize>,
    mode: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MaterialEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    pbr_metallic_roughness: PbrMetallicRoughness,
    #[serde(skip_serializing_if = "Option::is_none")]
    emissive_factor: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emissive_texture: Option<TextureRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<MaterialExtensions>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PbrMetallicRoughness {
    #[serde(skip_serializing_if = "Option::is_none")]
    base_color_texture: Option<TextureRef>,
    metallic_factor: f32,
    roughness_factor: f32,
}

#[derive(Serialize)]
struct TextureRef {
    index: usize,
}

#[derive(Serialize)]
struct MaterialExtensions {
    #[serde(rename = "KHR_materials_emissive_strength")]
    emissive_strength: EmissiveStrength,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmissiveStrength {
    emissive_strength: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Accessor {
    buffer_view: usize,
    byte_offset: usize,
    component_type: u32,
    count: usize,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<Vec<f32>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BufferView {
    buffer: usize,
    byte_offset: usize,
    byte_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Buffer {
    uri: String,
    byte_length: usize,
}

#[derive(Serialize)]
struct Image {
    uri: String,
}

#[derive(Serialize)]
struct Texture {
    source: usize,
}

#[derive(Serialize)]
struct DocumentExtensions {
    #[serde(rename = "KHR_lights_punctual")]
    khr_lights_punctual: LightsExtension,
}

#[derive(Serialize)]
struct LightsExtension {
    lights: Vec<PunctualLight>,
}

#[derive(Serialize)]
struct PunctualLight {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    color: [f32; 3],
    intensity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    spot: Option<SpotCone>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpotCone {
    inner_cone_angle: f32,
    outer_cone_angle: f32,
}

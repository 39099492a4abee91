use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_4;
use std::path::PathBuf;

use compat_q3::entity::Entity;
use compat_q3::shader::{ShaderDef, TcMod};
use exporter_core::logging;

use crate::geometry::Surface;
use crate::triangulate::{triangulate, TriMesh, DEFAULT_PATCH_SUBDIVISIONS};

/// Inches to meters.
pub const QUAKE_UNITS_TO_METERS: f32 = 0.0254;

pub const IDENTITY_TRANSFORM: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub texture_uvs: Vec<[f32; 2]>,
    pub lightmap_uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    /// Key into the scene's material table (the face's shader-lump index).
    pub material_id: usize,
    pub transform: [[f32; 4]; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub albedo: Option<PathBuf>,
    pub emission: Option<PathBuf>,
    pub emission_intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Point,
    Directional,
    Spot,
    Area,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub position: [f32; 3],
    /// Direction the light travels, in scene space.
    pub direction: [f32; 3],
    pub color: [f32; 3],
    pub intensity: f32,
    pub cos_inner_cone: f32,
    pub cos_outer_cone: f32,
    /// Area lights point back at the emitting geometry and its material.
    pub geometry_index: Option<usize>,
    pub material_id: Option<usize>,
}

impl Light {
    fn new(kind: LightKind) -> Light {
        Light {
            kind,
            position: [0.0; 3],
            direction: [0.0, 0.0, -1.0],
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            cos_inner_cone: 1.0,
            cos_outer_cone: FRAC_PI_4.cos(),
            geometry_index: None,
            material_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sky {
    pub texture: PathBuf,
    pub intensity_multiplier: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    pub geometries: BTreeMap<usize, Geometry>,
    pub materials: BTreeMap<usize, Material>,
    pub lights: Vec<Light>,
    pub sky: Option<Sky>,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            positions: Vec::new(),
            normals: Vec::new(),
            texture_uvs: Vec::new(),
            lightmap_uvs: Vec::new(),
            indices: Vec::new(),
            material_id: 0,
            transform: IDENTITY_TRANSFORM,
        }
    }
}

/// Quake is Z-up in inches, the scene is Y-up in meters: rotate -90 degrees
/// around X and scale.
pub fn transform_point(p: [f32; 3]) -> [f32; 3] {
    [
        p[0] * QUAKE_UNITS_TO_METERS,
        p[2] * QUAKE_UNITS_TO_METERS,
        -p[1] * QUAKE_UNITS_TO_METERS,
    ]
}

pub fn transform_normal(n: [f32; 3]) -> [f32; 3] {
    [n[0], n[2], -n[1]]
}

/// Combines entity lights, resolved materials and typed surfaces into one
/// scene: materials keep their shader-lump keys, geometries their face
/// ordinals, and emissive geometry grows a matching area light.
pub fn assemble_scene(
    surfaces: &BTreeMap<usize, Surface>,
    shader_table: &BTreeMap<usize, ShaderDef>,
    entities: &[Entity],
) -> Scene {
    let mut scene = Scene::default();

    for entity in entities {
        push_entity_light(&mut scene, entity);
    }

    for (&shader_index, shader) in shader_table {
        scene.materials.insert(shader_index, build_material(shader));
        if let Some(sun) = &shader.sun {
            if sun.intensity > 0.0 {
                let mut light = Light::new(LightKind::Directional);
                light.color = sun.color;
                light.intensity = sun.intensity;
                light.direction = sun_travel_direction(sun.yaw_degrees, sun.elevation_degrees);
                scene.lights.push(light);
            }
        }
    }

    for (&face_index, surface) in surfaces {
        if !scene.materials.contains_key(&surface.shader_index) {
            logging::warn(format!(
                "face {} references unresolved material {}, dropping",
                face_index, surface.shader_index
            ));
            continue;
        }
        let mesh = triangulate(&surface.primitive, DEFAULT_PATCH_SUBDIVISIONS);
        scene
            .geometries
            .insert(face_index, to_geometry(&mesh, surface.shader_index));

        let material = &scene.materials[&surface.shader_index];
        if material.emission_intensity > 0.0 {
            let mut light = Light::new(LightKind::Area);
            light.intensity = material.emission_intensity;
            light.geometry_index = Some(face_index);
            light.material_id = Some(surface.shader_index);
            scene.lights.push(light);
        }
    }

    scene
}

fn build_material(shader: &ShaderDef) -> Material {
    // The albedo comes from the first stage without a texcoord modifier;
    // animated stages are not representable here and are passed over.
    let albedo = shader
        .layers
        .iter()
        .find(|layer| layer.tcmod == TcMod::NoOp)
        .map(|layer| layer.path.clone());
    Material {
        name: shader.name.clone(),
        albedo,
        emission: shader.light_image.clone(),
        emission_intensity: shader.surfacelight,
    }
}

fn push_entity_light(scene: &mut Scene, entity: &Entity) {
    match entity {
        Entity::PointLight(point) => {
            let mut light = Light::new(LightKind::Point);
            light.position = transform_point(point.origin);
            light.color = point.color;
            light.intensity = point.intensity;
            scene.lights.push(light);
        }
        Entity::SpotLight(spot) => {
            let mut light = Light::new(LightKind::Spot);
            light.position = transform_point(spot.origin);
            light.direction = transform_normal(spot.direction);
            light.color = spot.color;
            light.intensity = spot.intensity;
            // spot_angle is the full cone angle; the scene stores cosines of
            // the half-angles, with the inner cone at 80% of the outer.
            let outer = spot.spot_angle / 2.0;
            light.cos_outer_cone = outer.cos();
            light.cos_inner_cone = (outer * 0.8).cos();
            scene.lights.push(light);
        }
        Entity::Map(fields) => {
            if fields.get("classname").map(String::as_str) != Some("worldspawn") {
                return;
            }
            let Some(sunlight) = fields.get("_sunlight") else {
                return;
            };
            let mut light = Light::new(LightKind::Directional);
            light.intensity = parse_f32(sunlight).unwrap_or(1.0);
            if let Some(color) = fields.get("_sunlight_color").and_then(|v| parse_color(v)) {
                light.color = color;
            }
            if let Some(mangle) = fields.get("_sun_mangle").and_then(|v| parse_vec3(v)) {
                // "yaw pitch roll" in degrees, pitch positive up.
                light.direction = sun_travel_direction(mangle[0], mangle[1]);
            }
            scene.lights.push(light);
        }
    }
}

/// Travel direction of sunlight given where the sun sits: the unit vector
/// to the sun from yaw/elevation, negated, in scene space.
fn sun_travel_direction(yaw_degrees: f32, elevation_degrees: f32) -> [f32; 3] {
    let yaw = yaw_degrees.to_radians();
    let elevation = elevation_degrees.to_radians();
    let to_sun = [
        elevation.cos() * yaw.cos(),
        elevation.cos() * yaw.sin(),
        elevation.sin(),
    ];
    transform_normal([-to_sun[0], -to_sun[1], -to_sun[2]])
}

fn to_geometry(mesh: &TriMesh, material_id: usize) -> Geometry {
    let mut geometry = Geometry {
        material_id,
        ..Geometry::default()
    };
    geometry.positions.reserve(mesh.vertices.len());
    geometry.normals.reserve(mesh.vertices.len());
    geometry.texture_uvs.reserve(mesh.vertices.len());
    geometry.lightmap_uvs.reserve(mesh.vertices.len());
    for vertex in &mesh.vertices {
        geometry.positions.push(transform_point(vertex.xyz));
        geometry.normals.push(transform_normal(vertex.normal));
        geometry.texture_uvs.push(vertex.st);
        geometry.lightmap_uvs.push(vertex.lightmap);
    }

    // The source winding is clockwise; reversing the index stream flips
    // every triangle to counter-clockwise.
    geometry.indices.reserve(mesh.indices.len());
    for &index in mesh.indices.iter().rev() {
        geometry.indices.push(index as u32);
    }
    geometry
}

fn parse_f32(value: &str) -> Option<f32> {
    value.trim().parse().ok()
}

fn parse_vec3(value: &str) -> Option<[f32; 3]> {
    let mut parts = value.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some([x, y, z])
}

fn parse_color(value: &str) -> Option<[f32; 3]> {
    let color = parse_vec3(value)?;
    if color.iter().any(|component| *component > 1.0) {
        Some([color[0] / 255.0, color[1] / 255.0, color[2] / 255.0])
    } else {
        Some(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Primitive;
    use compat_q3::bsp::DrawVert;
    use compat_q3::entity::{self, PointLightEntity, SpotLightEntity};
    use compat_q3::shader::TextureLayer;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn approx_vec(a: [f32; 3], b: [f32; 3]) -> bool {
        approx(a[0], b[0]) && approx(a[1], b[1]) && approx(a[2], b[2])
    }

    fn plain_shader_table(name: &str) -> BTreeMap<usize, ShaderDef> {
        let mut table = BTreeMap::new();
        table.insert(
            0,
            ShaderDef {
                name: name.to_string(),
                ..ShaderDef::default()
            },
        );
        table
    }

    fn triangle_surface() -> BTreeMap<usize, Surface> {
        let mut vertices = vec![DrawVert::default(); 3];
        vertices[0].xyz = [100.0, 200.0, 300.0];
        vertices[0].normal = [0.0, 0.0, 1.0];
        vertices[1].xyz = [200.0, 200.0, 300.0];
        vertices[2].xyz = [100.0, 300.0, 300.0];

        let mut surfaces = BTreeMap::new();
        surfaces.insert(
            0,
            Surface {
                primitive: Primitive::Polygon {
                    vertices,
                    indices: vec![0, 1, 2],
                },
                shader_index: 0,
            },
        );
        surfaces
    }

    #[test]
    fn planar_triangle_is_transformed_and_rewound() {
        let surfaces = triangle_surface();
        let shaders = plain_shader_table("textures/base_wall/concrete");

        let scene = assemble_scene(&surfaces, &shaders, &[]);
        assert_eq!(scene.geometries.len(), 1);
        assert_eq!(scene.materials.len(), 1);
        assert_eq!(scene.materials[&0].name, "textures/base_wall/concrete");

        let geometry = &scene.geometries[&0];
        assert_eq!(geometry.material_id, 0);
        assert_eq!(geometry.transform, IDENTITY_TRANSFORM);
        assert!(approx_vec(geometry.positions[0], [2.54, 7.62, -5.08]));
        assert!(approx_vec(geometry.normals[0], [0.0, 1.0, 0.0]));
        assert_eq!(geometry.indices, vec![2, 1, 0]);
    }

    #[test]
    fn point_light_entity_is_carried_through() {
        let entities = vec![Entity::PointLight(PointLightEntity {
            origin: [100.0, 200.0, 300.0],
            color: [1.0, 0.5, 0.0],
            intensity: 500.0,
        })];
        let scene = assemble_scene(&BTreeMap::new(), &BTreeMap::new(), &entities);

        assert_eq!(scene.lights.len(), 1);
        let light = &scene.lights[0];
        assert_eq!(light.kind, LightKind::Point);
        assert!(approx_vec(light.position, [2.54, 7.62, -5.08]));
        assert_eq!(light.intensity, 500.0);
        assert_eq!(light.color, [1.0, 0.5, 0.0]);
    }

    #[test]
    fn spot_light_cones_come_from_the_full_angle() {
        let entities = vec![Entity::SpotLight(SpotLightEntity {
            origin: [0.0, 0.0, 100.0],
            direction: [0.0, 0.0, -1.0],
            color: [1.0, 1.0, 1.0],
            intensity: 300.0,
            spot_angle: FRAC_PI_4,
        })];
        let scene = assemble_scene(&BTreeMap::new(), &BTreeMap::new(), &entities);

        let light = &scene.lights[0];
        assert_eq!(light.kind, LightKind::Spot);
        // Straight down in map space stays straight down (-y) in scene space.
        assert!(approx_vec(light.direction, [0.0, -1.0, 0.0]));
        assert!(approx(light.cos_outer_cone, (FRAC_PI_4 / 2.0).cos()));
        assert!(approx(light.cos_inner_cone, (FRAC_PI_4 / 2.0 * 0.8).cos()));
    }

    #[test]
    fn worldspawn_sun_builds_a_directional_light() {
        let raw = entity::parse_entities(
            r#"{ "classname" "worldspawn" "_sunlight" "250" "_sunlight_color" "255 255 128" "_sun_mangle" "0 90 0" }"#,
        );
        let entities = entity::classify_entities(&raw);
        let scene = assemble_scene(&BTreeMap::new(), &BTreeMap::new(), &entities);

        assert_eq!(scene.lights.len(), 1);
        let sun = &scene.lights[0];
        assert_eq!(sun.kind, LightKind::Directional);
        assert_eq!(sun.intensity, 250.0);
        assert!(approx(sun.color[2], 128.0 / 255.0));
        // Sun straight overhead: light travels straight down, which the
        // frame change maps to scene -y.
        assert!(approx_vec(sun.direction, [0.0, -1.0, 0.0]));
    }

    #[test]
    fn worldspawn_without_sunlight_adds_nothing() {
        let raw = entity::parse_entities(r#"{ "classname" "worldspawn" "message" "hi" }"#);
        let entities = entity::classify_entities(&raw);
        let scene = assemble_scene(&BTreeMap::new(), &BTreeMap::new(), &entities);
        assert!(scene.lights.is_empty());
    }

    #[test]
    fn shader_sun_builds_a_directional_light() {
        let mut shaders = BTreeMap::new();
        shaders.insert(
            0,
            ShaderDef {
                name: "textures/skies/dm3".to_string(),
                sun: Some(compat_q3::shader::SunLight {
                    color: [1.0, 0.9, 0.8],
                    intensity: 200.0,
                    yaw_degrees: 45.0,
                    elevation_degrees: 60.0,
                }),
                ..ShaderDef::default()
            },
        );
        let scene = assemble_scene(&BTreeMap::new(), &shaders, &[]);

        assert_eq!(scene.lights.len(), 1);
        let sun = &scene.lights[0];
        assert_eq!(sun.kind, LightKind::Directional);
        assert_eq!(sun.color, [1.0, 0.9, 0.8]);
        assert_eq!(sun.intensity, 200.0);
        // Elevation 60, yaw 45: to-sun = (0.3536, 0.3536, 0.8660); negate
        // and swap into the Y-up frame.
        assert!(approx_vec(sun.direction, [-0.35355, -0.86603, 0.35355]));
    }

    #[test]
    fn albedo_takes_the_first_unmodified_layer() {
        let mut shaders = BTreeMap::new();
        shaders.insert(
            0,
            ShaderDef {
                name: "textures/base/panel".to_string(),
                layers: vec![
                    TextureLayer {
                        path: PathBuf::from("/mnt/textures/base/scroll.tga"),
                        tcmod: TcMod::Scroll { s: 1.0, t: 0.0 },
                        ..TextureLayer::opaque(PathBuf::new())
                    },
                    TextureLayer::opaque(PathBuf::from("/mnt/textures/base/panel.tga")),
                    TextureLayer::opaque(PathBuf::from("/mnt/textures/base/glow.tga")),
                ],
                ..ShaderDef::default()
            },
        );
        let scene = assemble_scene(&BTreeMap::new(), &shaders, &[]);
        assert_eq!(
            scene.materials[&0].albedo,
            Some(PathBuf::from("/mnt/textures/base/panel.tga"))
        );
    }

    #[test]
    fn emissive_geometry_grows_an_area_light() {
        let surfaces = triangle_surface();
        let mut shaders = BTreeMap::new();
        shaders.insert(
            0,
            ShaderDef {
                name: "textures/base_light/bulb".to_string(),
                surfacelight: 1500.0,
                light_image: Some(PathBuf::from("/mnt/textures/base_light/bulb.glow.tga")),
                ..ShaderDef::default()
            },
        );
        let scene = assemble_scene(&surfaces, &shaders, &[]);

        assert_eq!(scene.lights.len(), 1);
        let area = &scene.lights[0];
        assert_eq!(area.kind, LightKind::Area);
        assert_eq!(area.color, [1.0, 1.0, 1.0]);
        assert_eq!(area.intensity, 1500.0);
        assert_eq!(area.geometry_index, Some(0));
        assert_eq!(area.material_id, Some(0));
        // The back-references resolve.
        assert!(scene.geometries.contains_key(&area.geometry_index.unwrap()));
        assert!(scene.materials.contains_key(&area.material_id.unwrap()));
        assert_eq!(
            scene.materials[&0].emission,
            Some(PathBuf::from("/mnt/textures/base_light/bulb.glow.tga"))
        );
    }

    #[test]
    fn geometry_without_material_is_dropped() {
        let mut surfaces = triangle_surface();
        surfaces.get_mut(&0).unwrap().shader_index = 7;
        let shaders = plain_shader_table("textures/base_wall/concrete");

        let scene = assemble_scene(&surfaces, &shaders, &[]);
        assert!(scene.geometries.is_empty());
        assert!(scene.lights.is_empty());
    }

    #[test]
    fn every_geometry_resolves_its_material() {
        let surfaces = triangle_surface();
        let shaders = plain_shader_table("textures/base_wall/concrete");
        let scene = assemble_scene(&surfaces, &shaders, &[]);
        for geometry in scene.geometries.values() {
            assert!(scene.materials.contains_key(&geometry.material_id));
        }
    }

    #[test]
    fn winding_flip_reverses_each_triangle() {
        let mut vertices = vec![DrawVert::default(); 4];
        for (i, vertex) in vertices.iter_mut().enumerate() {
            vertex.xyz = [i as f32, 0.0, 0.0];
        }
        let mut surfaces = BTreeMap::new();
        surfaces.insert(
            0,
            Surface {
                primitive: Primitive::TriangleSoup {
                    vertices,
                    indices: vec![0, 1, 2, 0, 2, 3],
                },
                shader_index: 0,
            },
        );
        let shaders = plain_shader_table("soup");
        let scene = assemble_scene(&surfaces, &shaders, &[]);

        let indices = &scene.geometries[&0].indices;
        assert_eq!(indices, &vec![3, 2, 0, 2, 1, 0]);
        // Each output triangle is an input triangle with its winding
        // reversed.
        for output in indices.chunks(3) {
            let reversed = [output[2] as i32, output[1] as i32, output[0] as i32];
            let found = [0, 1, 2, 0, 2, 3]
                .chunks(3)
                .any(|input| input == reversed);
            assert!(found, "no source triangle for {:?}", output);
        }
    }
}

//! Map cooking: shader-lump materials, typed surface primitives, patch
//! tessellation, and the assembled render scene.
#![forbid(unsafe_code)]

pub mod geometry;
pub mod material;
pub mod scene;
pub mod triangulate;

pub use geometry::{build_surfaces, Primitive, Surface};
pub use material::resolve_materials;
pub use scene::{
    assemble_scene, transform_normal, transform_point, Geometry, Light, LightKind, Material,
    Scene, Sky, IDENTITY_TRANSFORM, QUAKE_UNITS_TO_METERS,
};
pub use triangulate::{triangulate, TriMesh, DEFAULT_PATCH_SUBDIVISIONS};

use std::collections::BTreeMap;

use compat_q3::bsp::{DrawVert, FaceRecord, SurfaceKind};
use exporter_core::logging;

/// A face's geometric payload in one of the three renderable kinds. Indices
/// are face-local, i.e. relative to the face's own vertex slice.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Polygon {
        vertices: Vec<DrawVert>,
        indices: Vec<i32>,
    },
    TriangleSoup {
        vertices: Vec<DrawVert>,
        indices: Vec<i32>,
    },
    Patch {
        width: i32,
        height: i32,
        control_points: Vec<DrawVert>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub primitive: Primitive,
    /// Index into the shader lump, the surface's material key.
    pub shader_index: usize,
}

/// Builds a typed primitive for every face whose ranges check out, keyed by
/// the face's ordinal in the lump. Faces with out-of-range slices, bad
/// patch dimensions, or non-renderable kinds are dropped.
pub fn build_surfaces(
    faces: &[FaceRecord],
    vertices: &[DrawVert],
    meshverts: &[i32],
) -> BTreeMap<usize, Surface> {
    let mut surfaces = BTreeMap::new();
    for (ordinal, face) in faces.iter().enumerate() {
        if let Some(surface) = build_surface(ordinal, face, vertices, meshverts) {
            surfaces.insert(ordinal, surface);
        }
    }
    surfaces
}

fn build_surface(
    ordinal: usize,
    face: &FaceRecord,
    vertices: &[DrawVert],
    meshverts: &[i32],
) -> Option<Surface> {
    let shader_index = match usize::try_from(face.shader_num) {
        Ok(index) => index,
        Err(_) => {
            logging::warn(format!("face {} has negative shader index", ordinal));
            return None;
        }
    };

    let first_vert = usize::try_from(face.first_vert).ok()?;
    let num_verts = usize::try_from(face.num_verts).ok()?;
    let vert_end = first_vert.checked_add(num_verts)?;
    if vert_end > vertices.len() {
        logging::warn(format!(
            "face {} vertex range {}..{} exceeds vertex lump ({})",
            ordinal,
            first_vert,
            vert_end,
            vertices.len()
        ));
        return None;
    }
    let face_vertices = vertices[first_vert..vert_end].to_vec();

    let primitive = match face.surface_kind() {
        Some(SurfaceKind::Planar) | Some(SurfaceKind::TriangleSoup) => {
            let indices = face_indices(ordinal, face, num_verts, meshverts)?;
            if face.surface_kind() == Some(SurfaceKind::Planar) {
                Primitive::Polygon {
                    vertices: face_vertices,
                    indices,
                }
            } else {
                Primitive::TriangleSoup {
                    vertices: face_vertices,
                    indices,
                }
            }
        }
        Some(SurfaceKind::Patch) => {
            let expected = usize::try_from(face.patch_width)
                .ok()
                .and_then(|w| usize::try_from(face.patch_height).ok().map(|h| (w, h)))
                .and_then(|(w, h)| w.checked_mul(h));
            if expected != Some(num_verts) {
                logging::warn(format!(
                    "face {} patch dimensions {}x{} do not cover its {} vertices",
                    ordinal, face.patch_width, face.patch_height, num_verts
                ));
                return None;
            }
            Primitive::Patch {
                width: face.patch_width,
                height: face.patch_height,
                control_points: face_vertices,
            }
        }
        // BAD, FLARE and unknown kinds carry nothing renderable.
        _ => return None,
    };

    Some(Surface {
        primitive,
        shader_index,
    })
}

/// Copies and validates the face's slice of the meshvert lump. Every value
/// must land inside the face's own vertex slice.
fn face_indices(
    ordinal: usize,
    face: &FaceRecord,
    num_verts: usize,
    meshverts: &[i32],
) -> Option<Vec<i32>> {
    let first_index = usize::try_from(face.first_index).ok()?;
    let num_indexes = usize::try_from(face.num_indexes).ok()?;
    let index_end = first_index.checked_add(num_indexes)?;
    if index_end > meshverts.len() {
        logging::warn(format!(
            "face {} index range {}..{} exceeds meshvert lump ({})",
            ordinal,
            first_index,
            index_end,
            meshverts.len()
        ));
        return None;
    }

    let indices = meshverts[first_index..index_end].to_vec();
    for &index in &indices {
        if index < 0 || index as usize >= num_verts {
            logging::warn(format!(
                "face {} meshvert {} outside its {} vertices",
                ordinal, index, num_verts
            ));
            return None;
        }
    }
    Some(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vert(x: f32) -> DrawVert {
        DrawVert {
            xyz: [x, 0.0, 0.0],
            ..DrawVert::default()
        }
    }

    fn planar_face(first_vert: i32, num_verts: i32, first_index: i32, num_indexes: i32) -> FaceRecord {
        FaceRecord {
            shader_num: 0,
            surface_type: 1,
            first_vert,
            num_verts,
            first_index,
            num_indexes,
            ..FaceRecord::default()
        }
    }

    #[test]
    fn builds_polygon_and_soup() {
        let vertices = vec![vert(0.0), vert(1.0), vert(2.0), vert(3.0)];
        let meshverts = vec![0, 1, 2, 0, 2, 1];
        let mut soup = planar_face(1, 3, 3, 3);
        soup.surface_type = 3;
        let faces = vec![planar_face(0, 4, 0, 3), soup];

        let surfaces = build_surfaces(&faces, &vertices, &meshverts);
        assert_eq!(surfaces.len(), 2);
        match &surfaces[&0].primitive {
            Primitive::Polygon { vertices, indices } => {
                assert_eq!(vertices.len(), 4);
                assert_eq!(indices, &vec![0, 1, 2]);
            }
            other => panic!("expected polygon, got {:?}", other),
        }
        match &surfaces[&1].primitive {
            Primitive::TriangleSoup { vertices, indices } => {
                assert_eq!(vertices[0].xyz[0], 1.0);
                assert_eq!(indices, &vec![0, 2, 1]);
            }
            other => panic!("expected triangle soup, got {:?}", other),
        }
    }

    #[test]
    fn builds_patch() {
        let vertices: Vec<DrawVert> = (0..9).map(|i| vert(i as f32)).collect();
        let face = FaceRecord {
            surface_type: 2,
            num_verts: 9,
            patch_width: 3,
            patch_height: 3,
            ..FaceRecord::default()
        };

        let surfaces = build_surfaces(&[face], &vertices, &[]);
        match &surfaces[&0].primitive {
            Primitive::Patch {
                width,
                height,
                control_points,
            } => {
                assert_eq!((*width, *height), (3, 3));
                assert_eq!(control_points.len(), 9);
            }
            other => panic!("expected patch, got {:?}", other),
        }
    }

    #[test]
    fn drops_bad_and_flare_kinds() {
        let vertices = vec![vert(0.0); 3];
        let mut bad = planar_face(0, 3, 0, 0);
        bad.surface_type = 0;
        let mut flare = planar_face(0, 3, 0, 0);
        flare.surface_type = 4;
        let mut unknown = planar_face(0, 3, 0, 0);
        unknown.surface_type = 9;

        let surfaces = build_surfaces(&[bad, flare, unknown], &vertices, &[]);
        assert!(surfaces.is_empty());
    }

    #[test]
    fn drops_out_of_range_vertex_slice() {
        let vertices = vec![vert(0.0); 3];
        let faces = vec![planar_face(2, 3, 0, 0), planar_face(-1, 3, 0, 0)];
        let surfaces = build_surfaces(&faces, &vertices, &[0, 1, 2]);
        assert!(surfaces.is_empty());
    }

    #[test]
    fn drops_out_of_range_index_slice() {
        let vertices = vec![vert(0.0); 3];
        let meshverts = vec![0, 1, 2];
        let faces = vec![planar_face(0, 3, 1, 3)];
        let surfaces = build_surfaces(&faces, &vertices, &meshverts);
        assert!(surfaces.is_empty());
    }

    #[test]
    fn drops_face_local_index_outside_vertex_slice() {
        let vertices = vec![vert(0.0); 3];
        let meshverts = vec![0, 1, 3];
        let surfaces = build_surfaces(&[planar_face(0, 3, 0, 3)], &vertices, &meshverts);
        assert!(surfaces.is_empty());
    }

    #[test]
    fn drops_patch_with_mismatched_dimensions() {
        let vertices = vec![vert(0.0); 9];
        let face = FaceRecord {
            surface_type: 2,
            num_verts: 9,
            patch_width: 5,
            patch_height: 3,
            ..FaceRecord::default()
        };
        let surfaces = build_surfaces(&[face], &vertices, &[]);
        assert!(surfaces.is_empty());
    }
}

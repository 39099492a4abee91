use compat_q3::bsp::DrawVert;

use crate::geometry::Primitive;

pub const DEFAULT_PATCH_SUBDIVISIONS: usize = 7;

/// An indexed triangle list in map space, still carrying full vertex
/// attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriMesh {
    pub vertices: Vec<DrawVert>,
    pub indices: Vec<i32>,
}

/// Converts any primitive into an indexed triangle mesh. Triangle soups
/// pass through unchanged; polygons fan; patches tessellate on a fixed
/// subdivision grid.
pub fn triangulate(primitive: &Primitive, subdivisions: usize) -> TriMesh {
    match primitive {
        Primitive::Polygon { vertices, .. } => triangulate_polygon(vertices),
        Primitive::TriangleSoup { vertices, indices } => TriMesh {
            vertices: vertices.clone(),
            indices: indices.clone(),
        },
        Primitive::Patch {
            width,
            height,
            control_points,
        } => tessellate_patch(*width, *height, control_points, subdivisions),
    }
}

/// Fans a convex polygon: triangles (0, i, i+1) for i in 1..n-1.
pub fn triangulate_polygon(vertices: &[DrawVert]) -> TriMesh {
    let mut mesh = TriMesh {
        vertices: vertices.to_vec(),
        indices: Vec::new(),
    };
    if vertices.len() < 3 {
        return mesh;
    }
    for i in 1..vertices.len() - 1 {
        mesh.indices.push(0);
        mesh.indices.push(i as i32);
        mesh.indices.push(i as i32 + 1);
    }
    mesh
}

/// Tessellates a biquadratic Bezier patch.
///
/// A WxH control grid (odd dimensions, at least 3) splits into
/// (W-1)/2 x (H-1)/2 three-by-three sub-patches. Each sub-patch fills an
/// (S+1)x(S+1) window of one global vertex grid; shared edges land on the
/// same global cells and overwrite with identical values. Invalid
/// dimensions yield an empty mesh.
pub fn tessellate_patch(
    width: i32,
    height: i32,
    control_points: &[DrawVert],
    subdivisions: usize,
) -> TriMesh {
    let mut mesh = TriMesh::default();
    if width < 3 || height < 3 || width % 2 == 0 || height % 2 == 0 || subdivisions == 0 {
        return mesh;
    }
    let width = width as usize;
    let height = height as usize;
    if control_points.len() != width * height {
        return mesh;
    }

    let sub_patches_x = (width - 1) / 2;
    let sub_patches_y = (height - 1) / 2;
    let grid_width = sub_patches_x * subdivisions + 1;
    let grid_height = sub_patches_y * subdivisions + 1;

    mesh.vertices = vec![DrawVert::default(); grid_width * grid_height];

    for py in 0..sub_patches_y {
        for px in 0..sub_patches_x {
            // This sub-patch's 3x3 window into the control grid.
            let base_x = px * 2;
            let base_y = py * 2;
            let row = |r: usize| {
                let start = (base_y + r) * width + base_x;
                &control_points[start..start + 3]
            };
            let rows = [row(0), row(1), row(2)];

            for vy in 0..=subdivisions {
                for vx in 0..=subdivisions {
                    let tx = vx as f32 / subdivisions as f32;
                    let ty = vy as f32 / subdivisions as f32;

                    let mid = [
                        bezier(&rows[0][0], &rows[0][1], &rows[0][2], tx),
                        bezier(&rows[1][0], &rows[1][1], &rows[1][2], tx),
                        bezier(&rows[2][0], &rows[2][1], &rows[2][2], tx),
                    ];
                    let vertex = bezier(&mid[0], &mid[1], &mid[2], ty);

                    let global_x = px * subdivisions + vx;
                    let global_y = py * subdivisions + vy;
                    mesh.vertices[global_y * grid_width + global_x] = vertex;
                }
            }
        }
    }

    for y in 0..grid_height - 1 {
        for x in 0..grid_width - 1 {
            let v0 = (y * grid_width + x) as i32;
            let v1 = (y * grid_width + x + 1) as i32;
            let v2 = ((y + 1) * grid_width + x + 1) as i32;
            let v3 = ((y + 1) * grid_width + x) as i32;

            mesh.indices.extend_from_slice(&[v0, v2, v1]);
            mesh.indices.extend_from_slice(&[v0, v3, v2]);
        }
    }

    mesh
}

/// Evaluates the quadratic Bezier basis over every vertex attribute.
/// Normals go through the same basis and are renormalized after.
fn bezier(p0: &DrawVert, p1: &DrawVert, p2: &DrawVert, t: f32) -> DrawVert {
    let b0 = (1.0 - t) * (1.0 - t);
    let b1 = 2.0 * (1.0 - t) * t;
    let b2 = t * t;

    let mut out = DrawVert::default();
    for i in 0..3 {
        out.xyz[i] = p0.xyz[i] * b0 + p1.xyz[i] * b1 + p2.xyz[i] * b2;
        out.normal[i] = p0.normal[i] * b0 + p1.normal[i] * b1 + p2.normal[i] * b2;
    }
    for i in 0..2 {
        out.st[i] = p0.st[i] * b0 + p1.st[i] * b1 + p2.st[i] * b2;
        out.lightmap[i] = p0.lightmap[i] * b0 + p1.lightmap[i] * b1 + p2.lightmap[i] * b2;
    }
    for i in 0..4 {
        out.color[i] =
            (p0.color[i] as f32 * b0 + p1.color[i] as f32 * b1 + p2.color[i] as f32 * b2) as u8;
    }

    let length = (out.normal[0] * out.normal[0]
        + out.normal[1] * out.normal[1]
        + out.normal[2] * out.normal[2])
        .sqrt();
    if length > 0.0 {
        for i in 0..3 {
            out.normal[i] /= length;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vert_at(x: f32, y: f32, z: f32) -> DrawVert {
        DrawVert {
            xyz: [x, y, z],
            normal: [0.0, 0.0, 1.0],
            ..DrawVert::default()
        }
    }

    /// A flat 3x3 control grid spanning a 2-unit square on z=0.
    fn flat_patch_3x3() -> Vec<DrawVert> {
        let mut points = Vec::with_capacity(9);
        for y in 0..3 {
            for x in 0..3 {
                let mut vertex = vert_at(x as f32, y as f32, 0.0);
                vertex.st = [x as f32 / 2.0, y as f32 / 2.0];
                points.push(vertex);
            }
        }
        points
    }

    #[test]
    fn fan_a_square() {
        let square = vec![
            vert_at(0.0, 0.0, 0.0),
            vert_at(1.0, 0.0, 0.0),
            vert_at(1.0, 1.0, 0.0),
            vert_at(0.0, 1.0, 0.0),
        ];
        let mesh = triangulate_polygon(&square);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn fan_a_triangle() {
        let mesh = triangulate_polygon(&[vert_at(0.0, 0.0, 0.0); 3]);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn fan_needs_three_vertices() {
        let mesh = triangulate_polygon(&[vert_at(0.0, 0.0, 0.0); 2]);
        assert_eq!(mesh.vertices.len(), 2);
        assert!(mesh.indices.is_empty());
    }

    #[test]
    fn tessellate_flat_patch() {
        let mesh = tessellate_patch(3, 3, &flat_patch_3x3(), 2);
        // One sub-patch, 2 subdivisions: a 3x3 vertex grid.
        assert_eq!(mesh.vertices.len(), 9);
        // 2x2 quads, two triangles each.
        assert_eq!(mesh.indices.len(), 24);

        // The grid center sits at the patch center.
        let center = &mesh.vertices[4];
        assert!((center.xyz[0] - 1.0).abs() < 1e-5);
        assert!((center.xyz[1] - 1.0).abs() < 1e-5);
        assert!(center.xyz[2].abs() < 1e-5);
        assert!((center.st[0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn tessellate_curved_patch() {
        let mut points = flat_patch_3x3();
        points[4].xyz[2] = 2.0;
        let mesh = tessellate_patch(3, 3, &points, 2);
        // Quadratic midpoint of (0, 2, 0) rows then columns: 0.5.
        assert!((mesh.vertices[4].xyz[2] - 0.5).abs() < 1e-5);
        // Interpolated normals stay unit length.
        for vertex in &mesh.vertices {
            let n = vertex.normal;
            let length = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((length - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn tessellate_multi_sub_patch_grid() {
        // 5x3 control points: two sub-patches wide, one high.
        let points = vec![vert_at(0.0, 0.0, 0.0); 15];
        let mesh = tessellate_patch(5, 3, &points, 2);
        // Grid is (2*2+1) x (1*2+1) vertices.
        assert_eq!(mesh.vertices.len(), 15);
        assert_eq!(mesh.indices.len(), 4 * 2 * 2 * 3);
    }

    #[test]
    fn reject_invalid_patches() {
        let points = vec![vert_at(0.0, 0.0, 0.0); 6];
        assert!(tessellate_patch(2, 3, &points, 7).vertices.is_empty());
        assert!(tessellate_patch(3, 2, &points, 7).vertices.is_empty());
        assert!(tessellate_patch(1, 1, &points, 7).vertices.is_empty());
        // Control-point count must match the declared grid.
        assert!(tessellate_patch(3, 3, &points, 7).vertices.is_empty());
    }

    #[test]
    fn triangle_counts_match_face_kinds() {
        let square = vec![vert_at(0.0, 0.0, 0.0); 4];
        let polygon = Primitive::Polygon {
            vertices: square.clone(),
            indices: vec![0, 1, 2, 0, 2, 3],
        };
        let fan = triangulate(&polygon, DEFAULT_PATCH_SUBDIVISIONS);
        assert_eq!(fan.indices.len() / 3, square.len() - 2);

        let soup = Primitive::TriangleSoup {
            vertices: square,
            indices: vec![0, 1, 2, 0, 2, 3],
        };
        let soup_mesh = triangulate(&soup, DEFAULT_PATCH_SUBDIVISIONS);
        assert_eq!(soup_mesh.indices.len() / 3, 2);

        let patch = Primitive::Patch {
            width: 3,
            height: 3,
            control_points: flat_patch_3x3(),
        };
        let patch_mesh = triangulate(&patch, DEFAULT_PATCH_SUBDIVISIONS);
        let grid = DEFAULT_PATCH_SUBDIVISIONS + 1;
        assert_eq!(patch_mesh.indices.len() / 3, 2 * (grid - 1) * (grid - 1));
    }
}

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use tracing::debug;

use super::depth_field::{DepthField, DepthRaster, grid_uv};

/// Gradient magnitude above which a vertex is considered to sit on a depth edge.
pub const EDGE_GRADIENT_THRESHOLD: f32 = 0.08;
pub const SMOOTH_ITERATIONS: usize = 2;
/// Distance of the flat-view camera from the plane; the perspective
/// compensation of displaced vertices is relative to it.
pub const CAMERA_DISTANCE: f32 = 4.0;

/// Per-vertex layout consumed by the displacement pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub depth: f32,
}

/// Tessellated plane displaced along +z by a depth field.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementMesh {
    cols: u32,
    rows: u32,
    plane_width: f32,
    plane_height: f32,
    positions: Vec<Vec3>,
    uvs: Vec<[f32; 2]>,
    depths: Vec<f32>,
    normals: Vec<Vec3>,
    indices: Vec<u32>,
}

impl DisplacementMesh {
    /// Builds the mesh for a (dilated) depth raster.
    ///
    /// The grid has `min(resolution, width)` by `min(resolution, height)`
    /// vertices over a plane of size `(width / height, 1)` centred on the
    /// origin, so the plane aspect follows the raster regardless of
    /// resolution.
    pub fn build(raster: &DepthRaster, resolution: u32, mesh_depth: f32) -> Self {
        let resolution = resolution.max(1);
        let cols = resolution.min(raster.width()).max(1);
        let rows = resolution.min(raster.height()).max(1);
        let plane_width = raster.aspect();
        let plane_height = 1.0;
        let field = DepthField::sample(raster, cols, rows);

        let count = cols as usize * rows as usize;
        let mut positions = Vec::with_capacity(count);
        let mut uvs = Vec::with_capacity(count);
        let mut depths = Vec::with_capacity(count);
        for iy in 0..rows {
            for ix in 0..cols {
                let (u, v) = grid_uv(ix, iy, cols, rows);
                let d = field.at(ix, iy);
                let z = d * mesh_depth;
                let perspective = (CAMERA_DISTANCE - z) / CAMERA_DISTANCE;
                let x = (u - 0.5) * plane_width * perspective;
                let y = (v - 0.5) * plane_height * perspective;
                positions.push(Vec3::new(x, y, z));
                uvs.push([u, v]);
                depths.push(d);
            }
        }

        let smoothed = smooth_edges(&mut positions, &field);
        let indices = grid_indices(cols, rows);
        let normals = vertex_normals(&positions, &indices);
        debug!(
            cols,
            rows,
            triangles = indices.len() / 3,
            smoothed,
            "built displacement mesh"
        );

        Self {
            cols,
            rows,
            plane_width,
            plane_height,
            positions,
            uvs,
            depths,
            normals,
            indices,
        }
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn plane_width(&self) -> f32 {
        self.plane_width
    }

    pub fn plane_height(&self) -> f32 {
        self.plane_height
    }

    pub fn plane_aspect(&self) -> f32 {
        self.plane_width / self.plane_height
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn uvs(&self) -> &[[f32; 2]] {
        &self.uvs
    }

    pub fn depths(&self) -> &[f32] {
        &self.depths
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Interleaved vertex data for upload.
    pub fn vertices(&self) -> Vec<MeshVertex> {
        self.positions
            .iter()
            .zip(&self.uvs)
            .zip(&self.depths)
            .map(|((p, uv), d)| MeshVertex {
                position: p.to_array(),
                uv: *uv,
                depth: *d,
            })
            .collect()
    }
}

/// Replaces vertices on steep depth edges with the mean of their 3x3
/// neighbourhood. Updates are in place, so later vertices see earlier
/// results within the same iteration. Returns the number of edge vertices.
fn smooth_edges(positions: &mut [Vec3], field: &DepthField) -> usize {
    let cols = field.cols() as i64;
    let rows = field.rows() as i64;
    let edges: Vec<usize> = (0..positions.len())
        .filter(|&i| {
            let ix = (i as i64 % cols) as u32;
            let iy = (i as i64 / cols) as u32;
            field.gradient_magnitude(ix, iy) > EDGE_GRADIENT_THRESHOLD
        })
        .collect();
    for _ in 0..SMOOTH_ITERATIONS {
        for &i in &edges {
            let x = i as i64 % cols;
            let y = i as i64 / cols;
            let mut sum = Vec3::ZERO;
            let mut count = 0u32;
            for ny in (y - 1)..=(y + 1) {
                for nx in (x - 1)..=(x + 1) {
                    if nx < 0 || ny < 0 || nx >= cols || ny >= rows {
                        continue;
                    }
                    sum += positions[(ny * cols + nx) as usize];
                    count += 1;
                }
            }
            if count > 0 {
                positions[i] = sum / count as f32;
            }
        }
    }
    edges.len()
}

/// Two counter-clockwise triangles per grid cell.
pub fn grid_indices(cols: u32, rows: u32) -> Vec<u32> {
    if cols < 2 || rows < 2 {
        return Vec::new();
    }
    let mut indices = Vec::with_capacity((cols as usize - 1) * (rows as usize - 1) * 6);
    for iy in 0..rows - 1 {
        for ix in 0..cols - 1 {
            let a = ix + cols * iy;
            let b = ix + cols * (iy + 1);
            let c = (ix + 1) + cols * (iy + 1);
            let d = (ix + 1) + cols * iy;
            indices.extend_from_slice(&[a, b, d, b, c, d]);
        }
    }
    indices
}

fn vertex_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Z))
        .collect()
}

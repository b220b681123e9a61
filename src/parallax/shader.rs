//! Uniform layout of the displacement shader and a CPU rendition of its
//! vertex stage.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Fraction of the texture width/height over which displacement fades out
/// toward the border.
pub const EDGE_WIDTH: f32 = 0.02;

/// Mirrors `Uniforms` in `parallax.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParallaxUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub mouse_delta: [f32; 2],
    pub focus: f32,
    pub mesh_depth: f32,
    pub sensitivity: f32,
    pub edge_width: f32,
    pub _pad: [f32; 2],
}

impl ParallaxUniforms {
    pub fn new(view_proj: Mat4, model: Mat4, params: &DisplacementParams) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            model: model.to_cols_array_2d(),
            mouse_delta: params.mouse_delta.to_array(),
            focus: params.focus,
            mesh_depth: params.mesh_depth,
            sensitivity: params.sensitivity,
            edge_width: params.edge_width,
            _pad: [0.0; 2],
        }
    }
}

/// Per-frame inputs of the vertex displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacementParams {
    pub mouse_delta: Vec2,
    pub focus: f32,
    pub mesh_depth: f32,
    pub sensitivity: f32,
    pub edge_width: f32,
}

impl Default for DisplacementParams {
    fn default() -> Self {
        Self {
            mouse_delta: Vec2::ZERO,
            focus: 0.25,
            mesh_depth: 1.0,
            sensitivity: 0.5,
            edge_width: EDGE_WIDTH,
        }
    }
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// 0 on the texture border, 1 once `edge_width` inside it on both axes.
pub fn edge_factor(uv: [f32; 2], edge_width: f32) -> f32 {
    let fx = smoothstep(0.0, edge_width, uv[0]) * smoothstep(0.0, edge_width, 1.0 - uv[0]);
    let fy = smoothstep(0.0, edge_width, uv[1]) * smoothstep(0.0, edge_width, 1.0 - uv[1]);
    fx * fy
}

/// Displaced model-space position of one vertex, as computed by `vs_main`.
///
/// Vertices at the focal depth stay put; the shift grows with the distance
/// from it in either direction.
pub fn displace(position: Vec3, uv: [f32; 2], depth: f32, params: &DisplacementParams) -> Vec3 {
    let actual = depth * params.mesh_depth;
    let focus_depth = params.focus * params.mesh_depth;
    let rotate = params.mouse_delta
        * params.sensitivity
        * (1.0 - params.focus)
        * (actual - focus_depth)
        * Vec2::new(-1.0, 1.0);
    let shift = rotate * edge_factor(uv, params.edge_width);
    Vec3::new(position.x + shift.x, position.y + shift.y, position.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::depth_field::DepthRaster;
    use crate::processing::mesh::DisplacementMesh;

    #[test]
    fn uniform_block_is_160_bytes() {
        assert_eq!(std::mem::size_of::<ParallaxUniforms>(), 160);
    }

    #[test]
    fn border_vertices_never_move() {
        let params = DisplacementParams {
            mouse_delta: Vec2::new(1.0, 1.0),
            focus: 0.0,
            ..Default::default()
        };
        let p = Vec3::new(0.3, 0.2, 1.0);
        assert_eq!(displace(p, [0.0, 0.5], 1.0, &params), p);
        assert_eq!(displace(p, [0.5, 1.0], 1.0, &params), p);
    }

    #[test]
    fn focal_depth_stays_still() {
        let params = DisplacementParams {
            mouse_delta: Vec2::new(0.7, -0.4),
            focus: 0.5,
            ..Default::default()
        };
        let p = Vec3::new(0.1, 0.1, 0.5);
        assert_eq!(displace(p, [0.5, 0.5], 0.5, &params), p);
    }

    #[test]
    fn horizontal_shift_opposes_pointer_for_near_vertices() {
        let params = DisplacementParams {
            mouse_delta: Vec2::new(1.0, 0.0),
            focus: 0.0,
            ..Default::default()
        };
        let moved = displace(Vec3::ZERO, [0.5, 0.5], 1.0, &params);
        assert!((moved.x + 0.5).abs() < 1e-6);
        assert_eq!(moved.y, 0.0);
    }

    #[test]
    fn raising_focus_reduces_displacement_to_zero() {
        let mut data = vec![0u8; 32 * 32];
        for (i, px) in data.iter_mut().enumerate() {
            *px = ((i % 32) * 8) as u8;
        }
        let raster = DepthRaster::new(32, 32, data).unwrap();
        let mesh = DisplacementMesh::build(&raster, 32, 1.0);

        let max_shift = |focus: f32| {
            let params = DisplacementParams {
                mouse_delta: Vec2::new(0.4, 0.3),
                focus,
                ..Default::default()
            };
            mesh.positions()
                .iter()
                .zip(mesh.uvs())
                .zip(mesh.depths())
                .map(|((p, uv), d)| (displace(*p, *uv, *d, &params) - *p).length())
                .fold(0.0f32, f32::max)
        };

        let mut previous = f32::INFINITY;
        for step in 0..=10 {
            let shift = max_shift(step as f32 / 10.0);
            assert!(shift <= previous + 1e-6, "focus {step}/10: {shift} > {previous}");
            previous = shift;
        }
        assert!(max_shift(1.0).abs() < 1e-6);
    }
}

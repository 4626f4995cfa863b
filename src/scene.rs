// Scene data - the square and its transform
//
// Everything here is plain CPU-side data: the vertex layout shared with the
// vertex shader, the index list, and the camera/model matrices uploaded to
// the uniform buffer every frame.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Vertex layout consumed by `shaders/square.vert`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 2],
}

/// Unit square in the XY plane, corners colored by their UV coordinate
pub const SQUARE_VERTICES: [Vertex; 4] = [
    Vertex { position: [-1.0, -1.0, 0.0], color: [0.0, 0.0] },
    Vertex { position: [1.0, -1.0, 0.0], color: [1.0, 0.0] },
    Vertex { position: [-1.0, 1.0, 0.0], color: [0.0, 1.0] },
    Vertex { position: [1.0, 1.0, 0.0], color: [1.0, 1.0] },
];

/// Two counter-clockwise triangles sharing the 1-2 diagonal
pub const SQUARE_INDICES: [u32; 6] = [0, 1, 2, 2, 1, 3];

const EYE: Vec3 = Vec3::new(0.0, 3.0, 5.0);
const FOV_Y_DEGREES: f32 = 45.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 100.0;

/// Model/view/projection state for the spinning square
#[derive(Debug, Clone)]
pub struct Transform {
    model: Mat4,
    view: Mat4,
    projection: Mat4,
    rotation_step: f32,
}

impl Transform {
    pub fn new(width: u32, height: u32, rotation_step: f32) -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Y),
            projection: projection(width, height),
            rotation_step,
        }
    }

    /// Spin the model around +Z by one step
    pub fn advance(&mut self) {
        self.model *= Mat4::from_rotation_z(self.rotation_step);
    }

    /// Recompute the projection for a new surface size. Zero sizes are ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.projection = projection(width, height);
        }
    }

    /// Matrix written to the uniform buffer
    pub fn mvp(&self) -> Mat4 {
        self.projection * self.view * self.model
    }

    #[cfg(test)]
    pub fn model(&self) -> Mat4 {
        self.model
    }
}

/// Perspective with zero-to-one depth and Y flipped for Vulkan clip space
fn projection(width: u32, height: u32) -> Mat4 {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let mut projection =
        Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
    projection.y_axis.y *= -1.0;
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn vertex_matches_shader_stride() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(std::mem::offset_of!(Vertex, color), 12);
    }

    #[test]
    fn indices_stay_inside_vertex_array() {
        assert!(SQUARE_INDICES.iter().all(|&i| (i as usize) < SQUARE_VERTICES.len()));
    }

    #[test]
    fn advance_rotates_model_about_z() {
        let mut transform = Transform::new(640, 360, 0.025);
        for _ in 0..4 {
            transform.advance();
        }

        let x = transform.model() * Vec4::X;
        assert_relative_eq!(x.x, 0.1_f32.cos(), epsilon = 1e-5);
        assert_relative_eq!(x.y, 0.1_f32.sin(), epsilon = 1e-5);
        assert_relative_eq!(x.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn origin_projects_to_screen_center() {
        let transform = Transform::new(640, 360, 0.025);
        let clip = transform.mvp() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let transform = Transform::new(640, 360, 0.025);
        // A point above the focus lands in the upper half, which is -Y in Vulkan NDC
        let clip = transform.mvp() * Vec4::new(0.0, 0.5, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn zero_viewport_keeps_previous_projection() {
        let mut transform = Transform::new(640, 360, 0.025);
        let before = transform.mvp();
        transform.set_viewport(0, 360);
        assert_eq!(before, transform.mvp());

        transform.set_viewport(360, 360);
        assert_ne!(before, transform.mvp());
    }
}

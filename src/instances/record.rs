//! GPU layout of one instance slot

use crate::resources::ModelAsset;
use crate::scene::Transform;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec3, Vec4};

/// Slot holds a live object. Zeroed slots are skipped by culling.
pub const INSTANCE_LIVE: u32 = 1 << 0;
/// Object is drawn into the shadow cascades
pub const INSTANCE_CASTS_SHADOWS: u32 = 1 << 1;

/// Surface parameters of one object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub metallic: f32,
    pub roughness: f32,
    pub ambient_occlusion: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            metallic: 0.0,
            roughness: 0.5,
            ambient_occlusion: 1.0,
        }
    }
}

impl Material {
    pub fn new(metallic: f32, roughness: f32, ambient_occlusion: f32) -> Self {
        Self {
            metallic,
            roughness,
            ambient_occlusion,
        }
    }
}

/// One entry of an instance buffer, read by culling and every geometry pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub world: Mat4,
    /// Inverse transpose of `world`
    pub normal: Mat4,
    /// xyz = model offset, w = model scale
    pub offset_scale: Vec4,
    /// World-space bounding sphere, w = radius
    pub bounds: Vec4,
    /// x = metallic, y = roughness, z = ambient occlusion
    pub material: Vec4,
    /// x = `INSTANCE_*` flags
    pub flags: UVec4,
}

impl InstanceRecord {
    pub const SIZE: u64 = std::mem::size_of::<InstanceRecord>() as u64;

    pub fn new(
        transform: &Transform,
        material: &Material,
        model: &ModelAsset,
        cast_shadows: bool,
    ) -> Self {
        let world = transform.matrix();
        let center = world.transform_point3(model.bounds_center);
        let max_scale = transform.scale.abs().max_element();

        let mut flags = INSTANCE_LIVE;
        if cast_shadows {
            flags |= INSTANCE_CASTS_SHADOWS;
        }

        Self {
            world,
            normal: transform.normal_matrix(),
            offset_scale: model.offset.extend(model.scale),
            bounds: center.extend(model.bounds_radius * max_scale),
            material: Vec4::new(
                material.metallic,
                material.roughness,
                material.ambient_occlusion,
                0.0,
            ),
            flags: UVec4::new(flags, 0, 0, 0),
        }
    }

    pub fn is_live(&self) -> bool {
        self.flags.x & INSTANCE_LIVE != 0
    }

    pub fn casts_shadows(&self) -> bool {
        self.flags.x & INSTANCE_CASTS_SHADOWS != 0
    }

    pub fn bounds_center(&self) -> Vec3 {
        self.bounds.truncate()
    }

    pub fn bounds_radius(&self) -> f32 {
        self.bounds.w
    }
}

/// Per-collection block read by the culling shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CullParams {
    /// x = slots to test, y = capacity (visible list stride), z = render contexts
    pub counts: UVec4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{IndexFormat, RecordingBackend};
    use crate::backend::GraphicsBackend;
    use crate::resources::MeshData;

    #[test]
    fn test_record_layout() {
        assert_eq!(InstanceRecord::SIZE, 192);
        assert_eq!(std::mem::size_of::<CullParams>(), 16);
    }

    #[test]
    fn test_bounds_follow_transform() {
        let mut backend = RecordingBackend::new(8, 8);
        let layout = backend.create_bind_group_layout(&[]).unwrap();
        let model = ModelAsset::upload(&mut backend, layout, "cube", &MeshData::cube()).unwrap();
        assert_eq!(model.index_format, IndexFormat::Uint16);

        let transform = Transform::from_position(Vec3::new(1.0, 2.0, -3.0))
            .with_scale(Vec3::new(1.0, -4.0, 2.0));
        let record = InstanceRecord::new(&transform, &Material::default(), &model, false);

        assert!(record.is_live());
        assert!(!record.casts_shadows());
        assert!((record.bounds_center() - Vec3::new(1.0, 2.0, -3.0)).length() < 1e-5);
        assert!((record.bounds_radius() - model.bounds_radius * 4.0).abs() < 1e-5);
        assert_eq!(record.offset_scale.w, 1.0);
    }
}

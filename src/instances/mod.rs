//! Instance registry
//!
//! Objects are grouped into collections, one per (model, usage) pair, held in
//! an arena and addressed by index. Every collection owns its instance buffer,
//! one visible-index list per render context and one indirect draw record per
//! render context. Context 0 is the main camera, context `i + 1` is shadow
//! cascade `i`.

mod collection;
mod record;

pub use collection::{InstanceCollection, CAPACITY_GRANULE};
pub use record::*;

use crate::backend::*;
use crate::config::{InstanceConfig, StaticCullPolicy};
use crate::resources::{ModelId, ModelStore};
use crate::scene::{Frustum, Transform};

/// How often a collection's objects change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    /// Rarely mutated; re-uploaded only when changed
    Static,
    /// Re-uploaded and culled every frame
    Dynamic,
}

/// Index of a collection in the registry arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(pub(crate) u32);

impl CollectionId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Handle to a placed object. The generation guards against reuse of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub collection: CollectionId,
    pub slot: u32,
    pub(crate) generation: u32,
}

/// Per-object state owned by its collection
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub transform: Transform,
    pub material: Material,
    pub cast_shadows: bool,
}

impl SceneObject {
    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            material: Material::default(),
            cast_shadows: true,
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }
}

/// Layouts and shared buffers the collections build their bind groups from
#[derive(Debug, Clone, Copy)]
pub struct RegistryBindings {
    pub cull_layout: BindGroupLayoutHandle,
    pub draw_layout: BindGroupLayoutHandle,
    /// Uniform array of every context's view
    pub views_buffer: BufferHandle,
}

/// Everything needed to issue one indirect draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawBatch {
    pub draw_bind_group: BindGroupHandle,
    pub mesh_bind_group: BindGroupHandle,
    pub index_buffer: BufferHandle,
    pub index_format: IndexFormat,
    pub indirect_buffer: BufferHandle,
    pub indirect_offset: u64,
}

/// Owner of every collection
pub struct InstanceRegistry {
    config: InstanceConfig,
    contexts: u32,
    bindings: RegistryBindings,
    collections: Vec<InstanceCollection>,
}

impl InstanceRegistry {
    pub fn new(config: &InstanceConfig, contexts: usize, bindings: RegistryBindings) -> Self {
        Self {
            config: config.clone(),
            contexts: contexts as u32,
            bindings,
            collections: Vec::new(),
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn context_count(&self) -> usize {
        self.contexts as usize
    }

    pub fn collections(&self) -> &[InstanceCollection] {
        &self.collections
    }

    pub fn collection(&self, id: CollectionId) -> Option<&InstanceCollection> {
        self.collections.get(id.index())
    }

    pub fn find_collection(&self, model: ModelId, usage: Usage) -> Option<CollectionId> {
        self.collections
            .iter()
            .position(|c| c.model() == model && c.usage() == usage)
            .map(|i| CollectionId(i as u32))
    }

    pub fn object_count(&self) -> u32 {
        self.collections.iter().map(|c| c.live_count()).sum()
    }

    /// Place an object in the collection for `(model, usage)`, creating the
    /// collection on first use.
    pub fn add_object<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        models: &ModelStore,
        model: ModelId,
        usage: Usage,
        object: SceneObject,
    ) -> BackendResult<ObjectHandle> {
        let id = match self.find_collection(model, usage) {
            Some(id) => id,
            None => {
                let collection = InstanceCollection::new(
                    backend,
                    &self.bindings,
                    model,
                    usage,
                    self.config.default_capacity,
                    self.contexts,
                )?;
                self.collections.push(collection);
                CollectionId(self.collections.len() as u32 - 1)
            }
        };

        let bindings = self.bindings;
        let collection = &mut self.collections[id.index()];
        let (slot, generation) = collection.insert(backend, &bindings, models.get(model), object)?;

        Ok(ObjectHandle {
            collection: id,
            slot,
            generation,
        })
    }

    /// Free the object's slot for reuse. Returns false for stale handles.
    pub fn remove_object<B: GraphicsBackend>(&mut self, backend: &mut B, handle: ObjectHandle) -> bool {
        self.collections
            .get_mut(handle.collection.index())
            .is_some_and(|c| c.remove(backend, handle.slot, handle.generation))
    }

    pub fn object(&self, handle: ObjectHandle) -> Option<&SceneObject> {
        self.collections
            .get(handle.collection.index())?
            .object(handle.slot, handle.generation)
    }

    /// Mutable access; marks the collection for re-upload
    pub fn object_mut(&mut self, handle: ObjectHandle) -> Option<&mut SceneObject> {
        self.collections
            .get_mut(handle.collection.index())?
            .object_mut(handle.slot, handle.generation)
    }

    /// Any collection of `usage` changed since its last upload
    pub fn needs_update(&self, usage: Usage) -> bool {
        self.collections
            .iter()
            .any(|c| c.usage() == usage && (c.is_dirty() || !c.is_ready()))
    }

    /// Force a re-upload of every collection drawing `model`, e.g. once it finished loading
    pub fn mark_model_dirty(&mut self, model: ModelId) {
        for collection in self.collections.iter_mut().filter(|c| c.model() == model) {
            collection.mark_dirty();
        }
    }

    /// Full rewrite and upload of every collection of `usage`.
    /// Collections whose model is not ready yet are left untouched.
    pub fn update_instance_data<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        models: &ModelStore,
        usage: Usage,
    ) {
        let always_visible =
            usage == Usage::Static && self.config.static_policy == StaticCullPolicy::AlwaysVisible;
        for collection in self.collections.iter_mut().filter(|c| c.usage() == usage) {
            collection.rewrite(backend, models.get(collection.model()), always_visible);
        }
    }

    /// Choose the collections culled this frame: every dynamic one, and static
    /// ones only under `CullOnChange` when they or the views changed.
    pub fn prepare_culling(&mut self, views_changed: bool) {
        let policy = self.config.static_policy;
        for collection in &mut self.collections {
            let cull = match collection.usage() {
                Usage::Dynamic => true,
                Usage::Static => match policy {
                    StaticCullPolicy::AlwaysVisible => false,
                    StaticCullPolicy::CullOnChange => views_changed || collection.needs_cull(),
                },
            };
            collection.select_for_culling(cull);
        }
    }

    /// Run the frustum test on the CPU for the collections picked by
    /// `prepare_culling`. `frustums` holds one entry per context.
    pub fn cull_on_host<B: GraphicsBackend>(&self, backend: &mut B, frustums: &[Frustum]) {
        for collection in self.collections.iter().filter(|c| c.culled_this_frame()) {
            collection.cull_on_host(backend, frustums);
        }
    }

    /// Indirect draws for one render context
    pub fn draw_batches(&self, models: &ModelStore, context: usize) -> Vec<DrawBatch> {
        self.collections
            .iter()
            .filter(|c| c.is_ready() && c.high_water() > 0)
            .filter_map(|c| {
                let model = models.get(c.model())?;
                Some(DrawBatch {
                    draw_bind_group: c.draw_bind_group(context)?,
                    mesh_bind_group: model.mesh_bind_group,
                    index_buffer: model.index_buffer,
                    index_format: model.index_format,
                    indirect_buffer: c.indirect_buffer(),
                    indirect_offset: c.indirect_offset(context),
                })
            })
            .collect()
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for collection in self.collections.drain(..) {
            collection.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AssetSlot, MeshData};
    use glam::Vec3;

    struct Fixture {
        backend: RecordingBackend,
        models: ModelStore,
        cube: ModelId,
        registry: InstanceRegistry,
    }

    fn fixture(config: InstanceConfig) -> Fixture {
        let mut backend = RecordingBackend::new(64, 64);
        let layout = backend.create_bind_group_layout(&[]).unwrap();
        let views_buffer = backend
            .create_buffer(&BufferDescriptor::new("views", 2560, BufferUsage::UNIFORM))
            .unwrap();
        let mut models = ModelStore::new();
        let cube = models.register("cube", AssetSlot::from_value(MeshData::cube()));
        models.poll(&mut backend, layout).unwrap();

        let registry = InstanceRegistry::new(
            &config,
            2,
            RegistryBindings {
                cull_layout: layout,
                draw_layout: layout,
                views_buffer,
            },
        );
        Fixture {
            backend,
            models,
            cube,
            registry,
        }
    }

    fn at(x: f32) -> SceneObject {
        SceneObject::new(Transform::from_position(Vec3::new(x, 0.0, 0.0)))
    }

    #[test]
    fn test_collections_keyed_by_model_and_usage() {
        let mut f = fixture(InstanceConfig::default());
        let a = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Static, at(0.0))
            .unwrap();
        let b = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Dynamic, at(1.0))
            .unwrap();
        let c = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Static, at(2.0))
            .unwrap();

        assert_eq!(a.collection, c.collection);
        assert_ne!(a.collection, b.collection);
        assert_eq!((a.slot, c.slot), (0, 1));
        assert_eq!(f.registry.object_count(), 3);
    }

    #[test]
    fn test_removed_slot_is_reused_and_old_handle_rejected() {
        let mut f = fixture(InstanceConfig::default());
        let first = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Dynamic, at(0.0))
            .unwrap();
        let second = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Dynamic, at(1.0))
            .unwrap();

        assert!(f.registry.remove_object(&mut f.backend, first));
        assert!(!f.registry.remove_object(&mut f.backend, first));
        assert!(f.registry.object(first).is_none());

        let collection = f.registry.collection(first.collection).unwrap();
        assert!(!collection.record(first.slot).unwrap().is_live());
        assert_eq!(collection.high_water(), 2);

        let third = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Dynamic, at(2.0))
            .unwrap();
        assert_eq!(third.slot, first.slot);
        assert_ne!(third, first);
        assert!(f.registry.object(first).is_none());
        assert_eq!(
            f.registry.object(second).unwrap().transform.position,
            Vec3::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_static_always_visible_counts() {
        let mut f = fixture(InstanceConfig::default());
        let caster = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Static, at(0.0))
            .unwrap();
        f.registry
            .add_object(
                &mut f.backend,
                &f.models,
                f.cube,
                Usage::Static,
                at(5.0).with_shadows(false),
            )
            .unwrap();

        assert!(f.registry.needs_update(Usage::Static));
        f.registry
            .update_instance_data(&mut f.backend, &f.models, Usage::Static);
        assert!(!f.registry.needs_update(Usage::Static));

        let collection = f.registry.collection(caster.collection).unwrap();
        let args: Vec<DrawIndexedIndirectArgs> = f.backend.read_buffer(collection.indirect_buffer());
        assert_eq!(args[0].index_count, 36);
        assert_eq!(args[0].instance_count, 2);
        assert_eq!(args[1].instance_count, 1);

        f.registry.prepare_culling(true);
        assert!(!f.registry.collection(caster.collection).unwrap().culled_this_frame());
    }

    #[test]
    fn test_cull_on_change_policy() {
        let mut f = fixture(InstanceConfig {
            static_policy: StaticCullPolicy::CullOnChange,
            ..Default::default()
        });
        let handle = f
            .registry
            .add_object(&mut f.backend, &f.models, f.cube, Usage::Static, at(0.0))
            .unwrap();
        f.registry
            .update_instance_data(&mut f.backend, &f.models, Usage::Static);

        f.registry.prepare_culling(false);
        assert!(f.registry.collection(handle.collection).unwrap().culled_this_frame());
        f.registry.prepare_culling(false);
        assert!(!f.registry.collection(handle.collection).unwrap().culled_this_frame());
        f.registry.prepare_culling(true);
        assert!(f.registry.collection(handle.collection).unwrap().culled_this_frame());

        f.registry.object_mut(handle).unwrap().transform.position.y = 3.0;
        f.registry
            .update_instance_data(&mut f.backend, &f.models, Usage::Static);
        f.registry.prepare_culling(false);
        assert!(f.registry.collection(handle.collection).unwrap().culled_this_frame());
    }

    #[test]
    fn test_unready_model_defers_upload() {
        let mut f = fixture(InstanceConfig::default());
        let pending = f.models.register("pending", AssetSlot::new());
        let handle = f
            .registry
            .add_object(&mut f.backend, &f.models, pending, Usage::Dynamic, at(0.0))
            .unwrap();
        f.registry
            .update_instance_data(&mut f.backend, &f.models, Usage::Dynamic);

        let collection = f.registry.collection(handle.collection).unwrap();
        assert!(!collection.is_ready());
        assert!(f.registry.draw_batches(&f.models, 0).is_empty());
        f.registry.prepare_culling(false);
        assert!(!f.registry.collection(handle.collection).unwrap().culled_this_frame());
    }
}

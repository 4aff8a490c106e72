//! GPU-resident instance storage for one (model, usage) pair

use crate::backend::*;
use crate::instances::record::{CullParams, InstanceRecord};
use crate::instances::{RegistryBindings, SceneObject, Usage};
use crate::resources::{ModelAsset, ModelId};
use crate::scene::Frustum;
use bytemuck::Zeroable;
use glam::UVec4;

/// Buffers are sized in whole multiples of this many slots, which keeps every
/// per-context visible list on a 256-byte storage offset boundary.
pub const CAPACITY_GRANULE: u32 = 64;

pub(crate) fn round_capacity(capacity: u32) -> u32 {
    capacity.max(1).div_ceil(CAPACITY_GRANULE) * CAPACITY_GRANULE
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<SceneObject>,
}

/// Everything that is reallocated when a collection grows
#[derive(Debug)]
struct CollectionBuffers {
    instances: BufferHandle,
    visible: BufferHandle,
    indirect: BufferHandle,
    params: BufferHandle,
    cull_bind_group: BindGroupHandle,
    draw_bind_groups: Vec<BindGroupHandle>,
}

impl CollectionBuffers {
    fn allocate<B: GraphicsBackend>(
        backend: &mut B,
        bindings: &RegistryBindings,
        label: &str,
        capacity: u32,
        contexts: u32,
    ) -> BackendResult<Self> {
        let capacity = capacity as u64;
        let contexts = contexts as u64;
        let list_bytes = capacity * 4;

        let instances = backend.create_buffer(&BufferDescriptor::new(
            &format!("{} instances", label),
            capacity * InstanceRecord::SIZE,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        ))?;
        let visible = backend.create_buffer(&BufferDescriptor::new(
            &format!("{} visible", label),
            list_bytes * contexts,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        ))?;
        let indirect = backend.create_buffer(&BufferDescriptor::new(
            &format!("{} indirect", label),
            DrawIndexedIndirectArgs::SIZE * contexts,
            BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_DST,
        ))?;
        let params = backend.create_buffer(&BufferDescriptor::new(
            &format!("{} cull params", label),
            std::mem::size_of::<CullParams>() as u64,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        ))?;

        let cull_bind_group = backend.create_bind_group(
            bindings.cull_layout,
            &[
                (0, BindGroupEntry::buffer(bindings.views_buffer)),
                (1, BindGroupEntry::buffer(instances)),
                (2, BindGroupEntry::buffer(visible)),
                (3, BindGroupEntry::buffer(indirect)),
                (4, BindGroupEntry::buffer(params)),
            ],
        )?;

        let draw_bind_groups = (0..contexts)
            .map(|context| {
                backend.create_bind_group(
                    bindings.draw_layout,
                    &[
                        (0, BindGroupEntry::buffer(instances)),
                        (
                            1,
                            BindGroupEntry::buffer_range(visible, context * list_bytes, list_bytes),
                        ),
                    ],
                )
            })
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(Self {
            instances,
            visible,
            indirect,
            params,
            cull_bind_group,
            draw_bind_groups,
        })
    }

    fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_buffer(self.instances);
        backend.destroy_buffer(self.visible);
        backend.destroy_buffer(self.indirect);
        backend.destroy_buffer(self.params);
    }
}

/// Instances of one model with one usage class.
///
/// Slot indices are stable for an object's lifetime. Removed slots are zeroed
/// and reused by later insertions; buffers double when every slot is taken and
/// never shrink.
#[derive(Debug)]
pub struct InstanceCollection {
    model: ModelId,
    usage: Usage,
    label: String,
    contexts: u32,
    capacity: u32,
    allocations: u32,
    buffers: CollectionBuffers,

    /// Host copy of the instance buffer, `capacity` records
    mirror: Vec<InstanceRecord>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: u32,

    /// Host data changed since the last full upload
    dirty: bool,
    /// Content changed since the last cull
    stale_cull: bool,
    cull_this_frame: bool,
    /// Draw arguments have been written for a ready model
    ready: bool,
    warned_unready: bool,
}

impl InstanceCollection {
    pub(crate) fn new<B: GraphicsBackend>(
        backend: &mut B,
        bindings: &RegistryBindings,
        model: ModelId,
        usage: Usage,
        capacity: u32,
        contexts: u32,
    ) -> BackendResult<Self> {
        let capacity = round_capacity(capacity);
        let label = format!("model {} {:?}", model.index(), usage);
        let buffers = CollectionBuffers::allocate(backend, bindings, &label, capacity, contexts)?;

        log::debug!("Created collection '{}' with {} slots", label, capacity);

        Ok(Self {
            model,
            usage,
            label,
            contexts,
            capacity,
            allocations: 1,
            buffers,
            mirror: vec![InstanceRecord::zeroed(); capacity as usize],
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            dirty: true,
            stale_cull: true,
            cull_this_frame: false,
            ready: false,
            warned_unready: false,
        })
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of buffer allocations so far, the first one included
    pub fn allocations(&self) -> u32 {
        self.allocations
    }

    pub fn live_count(&self) -> u32 {
        self.live
    }

    /// Slots ever handed out; culling tests this many
    pub fn high_water(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn instance_buffer(&self) -> BufferHandle {
        self.buffers.instances
    }

    pub fn visible_buffer(&self) -> BufferHandle {
        self.buffers.visible
    }

    pub fn indirect_buffer(&self) -> BufferHandle {
        self.buffers.indirect
    }

    /// Byte offset of the draw arguments for `context`
    pub fn indirect_offset(&self, context: usize) -> u64 {
        context as u64 * DrawIndexedIndirectArgs::SIZE
    }

    pub fn cull_bind_group(&self) -> BindGroupHandle {
        self.buffers.cull_bind_group
    }

    pub fn draw_bind_group(&self, context: usize) -> Option<BindGroupHandle> {
        self.buffers.draw_bind_groups.get(context).copied()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Selected for culling by the last `prepare_culling`
    pub fn culled_this_frame(&self) -> bool {
        self.cull_this_frame
    }

    pub fn record(&self, slot: u32) -> Option<&InstanceRecord> {
        self.mirror.get(slot as usize)
    }

    pub(crate) fn object(&self, slot: u32, generation: u32) -> Option<&SceneObject> {
        let entry = self.slots.get(slot as usize)?;
        if entry.generation != generation {
            return None;
        }
        entry.object.as_ref()
    }

    pub(crate) fn object_mut(&mut self, slot: u32, generation: u32) -> Option<&mut SceneObject> {
        let entry = self.slots.get_mut(slot as usize)?;
        if entry.generation != generation {
            return None;
        }
        let object = entry.object.as_mut()?;
        self.dirty = true;
        self.stale_cull = true;
        Some(object)
    }

    /// Place an object, growing the buffers when every slot is taken.
    /// The record is written straight away when the model is already uploaded.
    pub(crate) fn insert<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        bindings: &RegistryBindings,
        model: Option<&ModelAsset>,
        object: SceneObject,
    ) -> BackendResult<(u32, u32)> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                if self.high_water() == self.capacity {
                    self.grow(backend, bindings, self.capacity * 2)?;
                }
                self.slots.push(Slot {
                    generation: 0,
                    object: None,
                });
                self.high_water() - 1
            }
        };

        if let Some(model) = model {
            let record = InstanceRecord::new(
                &object.transform,
                &object.material,
                model,
                object.cast_shadows,
            );
            self.mirror[slot as usize] = record;
            backend.write_buffer(
                self.buffers.instances,
                slot as u64 * InstanceRecord::SIZE,
                bytemuck::bytes_of(&record),
            );
        }

        let entry = &mut self.slots[slot as usize];
        entry.object = Some(object);
        self.live += 1;
        self.dirty = true;
        self.stale_cull = true;
        Ok((slot, entry.generation))
    }

    /// Free a slot. Stale generations are rejected.
    pub(crate) fn remove<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        slot: u32,
        generation: u32,
    ) -> bool {
        let Some(entry) = self.slots.get_mut(slot as usize) else {
            return false;
        };
        if entry.generation != generation || entry.object.is_none() {
            return false;
        }

        entry.object = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
        self.live -= 1;

        let cleared = InstanceRecord::zeroed();
        self.mirror[slot as usize] = cleared;
        backend.write_buffer(
            self.buffers.instances,
            slot as u64 * InstanceRecord::SIZE,
            bytemuck::bytes_of(&cleared),
        );
        self.dirty = true;
        self.stale_cull = true;
        true
    }

    /// Reallocate at `new_capacity` and re-upload the host mirror.
    ///
    /// The copy goes through the queue rather than a GPU copy: queue writes
    /// issued earlier in the frame land before any recorded copy would, and a
    /// copy from the old buffer would overwrite them.
    fn grow<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        bindings: &RegistryBindings,
        new_capacity: u32,
    ) -> BackendResult<()> {
        let new_capacity = round_capacity(new_capacity);
        let buffers =
            CollectionBuffers::allocate(backend, bindings, &self.label, new_capacity, self.contexts)?;

        self.mirror
            .resize(new_capacity as usize, InstanceRecord::zeroed());
        backend.write_buffer(buffers.instances, 0, bytemuck::cast_slice(&self.mirror));

        let old = std::mem::replace(&mut self.buffers, buffers);
        old.destroy(backend);

        log::debug!(
            "Collection '{}' grew from {} to {} slots",
            self.label,
            self.capacity,
            new_capacity
        );
        self.capacity = new_capacity;
        self.allocations += 1;
        // Draw arguments and visible lists live in the new buffers now
        self.ready = false;
        self.dirty = true;
        self.stale_cull = true;
        Ok(())
    }

    /// Rewrite every record from the live objects and upload the whole mirror,
    /// together with the cull parameters and the draw arguments of every context.
    ///
    /// With `always_visible` the visible lists are filled on the host with every
    /// live slot (shadow casters only for the cascade contexts).
    pub(crate) fn rewrite<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        model: Option<&ModelAsset>,
        always_visible: bool,
    ) {
        let Some(model) = model else {
            if !self.warned_unready {
                log::warn!(
                    "Collection '{}' has {} objects but its model is not ready",
                    self.label,
                    self.live
                );
                self.warned_unready = true;
            }
            return;
        };

        self.mirror.fill(InstanceRecord::zeroed());
        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(object) = &entry.object {
                self.mirror[slot] = InstanceRecord::new(
                    &object.transform,
                    &object.material,
                    model,
                    object.cast_shadows,
                );
            }
        }
        backend.write_buffer(self.buffers.instances, 0, bytemuck::cast_slice(&self.mirror));

        let params = CullParams {
            counts: UVec4::new(self.high_water(), self.capacity, self.contexts, 0),
        };
        backend.write_buffer(self.buffers.params, 0, bytemuck::bytes_of(&params));

        let base = DrawIndexedIndirectArgs {
            index_count: model.index_count,
            ..Default::default()
        };
        let args = vec![base; self.contexts as usize];
        backend.write_buffer(self.buffers.indirect, 0, bytemuck::cast_slice(&args));

        if always_visible {
            let lists = self.visible_lists(|_, _| true);
            self.write_visible(backend, &lists);
        }

        self.ready = true;
        self.warned_unready = false;
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.stale_cull = true;
    }

    /// Pick this collection for culling this frame
    pub(crate) fn select_for_culling(&mut self, cull: bool) {
        self.cull_this_frame = cull && self.ready;
        if self.cull_this_frame {
            self.stale_cull = false;
        }
    }

    pub(crate) fn needs_cull(&self) -> bool {
        self.stale_cull
    }

    /// Host rendition of the culling shader
    pub(crate) fn cull_on_host<B: GraphicsBackend>(&self, backend: &mut B, frustums: &[Frustum]) {
        let lists = self.visible_lists(|context, record| {
            frustums
                .get(context)
                .is_some_and(|f| f.intersects_sphere(record.bounds_center(), record.bounds_radius()))
        });
        self.write_visible(backend, &lists);
    }

    fn visible_lists(&self, mut accept: impl FnMut(usize, &InstanceRecord) -> bool) -> Vec<Vec<u32>> {
        let mut lists = vec![Vec::new(); self.contexts as usize];
        for (slot, record) in self.mirror[..self.slots.len()].iter().enumerate() {
            if !record.is_live() {
                continue;
            }
            for (context, list) in lists.iter_mut().enumerate() {
                if context > 0 && !record.casts_shadows() {
                    continue;
                }
                if accept(context, record) {
                    list.push(slot as u32);
                }
            }
        }
        lists
    }

    fn write_visible<B: GraphicsBackend>(&self, backend: &mut B, lists: &[Vec<u32>]) {
        let stride = self.capacity as u64 * 4;
        for (context, list) in lists.iter().enumerate() {
            if !list.is_empty() {
                backend.write_buffer(
                    self.buffers.visible,
                    context as u64 * stride,
                    bytemuck::cast_slice(list),
                );
            }
            let count = list.len() as u32;
            backend.write_buffer(
                self.buffers.indirect,
                self.indirect_offset(context) + DrawIndexedIndirectArgs::INSTANCE_COUNT_WORD * 4,
                bytemuck::bytes_of(&count),
            );
        }
    }

    pub(crate) fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        self.buffers.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(round_capacity(0), 64);
        assert_eq!(round_capacity(64), 64);
        assert_eq!(round_capacity(65), 128);
        assert_eq!(round_capacity(1000), 1024);
    }
}

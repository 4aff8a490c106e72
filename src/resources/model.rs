//! GPU-resident models
//!
//! Vertices stay in their packed word form and are fetched by the vertex shaders
//! from a storage buffer, so a model is two buffers plus a small parameter block.

use crate::backend::*;
use crate::error::AssetError;
use crate::resources::loading::{AssetSlot, LoadState};
use crate::resources::mesh_stream::MeshData;
use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec3};

/// Stable index of a model in the [`ModelStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub(crate) u32);

impl ModelId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Per-model block read by the vertex fetch code
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshParams {
    /// x = words per vertex, y = component mask
    pub layout: UVec4,
}

/// Immutable model after upload
#[derive(Debug, Clone)]
pub struct ModelAsset {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub params_buffer: BufferHandle,
    /// Group 2 of every geometry pipeline
    pub mesh_bind_group: BindGroupHandle,
    pub index_format: IndexFormat,
    pub vertex_count: u32,
    pub index_count: u32,
    pub triangle_count: u32,
    pub components: u8,
    pub scale: f32,
    pub offset: Vec3,
    /// Object-space bounding sphere
    pub bounds_center: Vec3,
    pub bounds_radius: f32,
}

impl ModelAsset {
    /// Upload decoded mesh data; 8-bit indices are widened to 16 bits
    pub fn upload<B: GraphicsBackend>(
        backend: &mut B,
        mesh_layout: BindGroupLayoutHandle,
        name: &str,
        mesh: &MeshData,
    ) -> BackendResult<Self> {
        let vertex_data: &[u8] = if mesh.vertex_words.is_empty() {
            &[0; 4]
        } else {
            bytemuck::cast_slice(&mesh.vertex_words)
        };
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor::new(
                &format!("{} vertices", name),
                vertex_data.len() as u64,
                BufferUsage::STORAGE | BufferUsage::COPY_DST,
            ),
            vertex_data,
        )?;

        let (index_format, index_bytes) = if mesh.index_width == 4 {
            (
                IndexFormat::Uint32,
                bytemuck::cast_slice::<u32, u8>(&mesh.indices).to_vec(),
            )
        } else {
            let mut narrow: Vec<u16> = mesh.indices.iter().map(|&i| i as u16).collect();
            // Keep the buffer size a multiple of four bytes
            if narrow.len() % 2 == 1 {
                narrow.push(0);
            }
            (
                IndexFormat::Uint16,
                bytemuck::cast_slice::<u16, u8>(&narrow).to_vec(),
            )
        };
        let index_data: &[u8] = if index_bytes.is_empty() {
            &[0; 4]
        } else {
            &index_bytes
        };
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor::new(
                &format!("{} indices", name),
                index_data.len() as u64,
                BufferUsage::INDEX | BufferUsage::COPY_DST,
            ),
            index_data,
        )?;

        let params = MeshParams {
            layout: UVec4::new(mesh.words_per_vertex() as u32, mesh.components as u32, 0, 0),
        };
        let params_buffer = backend.create_buffer_init(
            &BufferDescriptor::new(
                &format!("{} mesh params", name),
                std::mem::size_of::<MeshParams>() as u64,
                BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            ),
            bytemuck::bytes_of(&params),
        )?;

        let mesh_bind_group = backend.create_bind_group(
            mesh_layout,
            &[
                (0, BindGroupEntry::buffer(vertex_buffer)),
                (1, BindGroupEntry::buffer(params_buffer)),
            ],
        )?;

        let (bounds_center, bounds_radius) = mesh.bounding_sphere();
        Ok(Self {
            vertex_buffer,
            index_buffer,
            params_buffer,
            mesh_bind_group,
            index_format,
            vertex_count: mesh.vertex_count() as u32,
            index_count: mesh.index_count() as u32,
            triangle_count: mesh.triangle_count() as u32,
            components: mesh.components,
            scale: mesh.scale as f32,
            offset: mesh.offset,
            bounds_center,
            bounds_radius,
        })
    }

    pub fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
        backend.destroy_buffer(self.params_buffer);
    }
}

struct ModelEntry {
    name: String,
    source: AssetSlot<MeshData>,
    state: LoadState<ModelAsset>,
}

/// Arena of models indexed by [`ModelId`]
#[derive(Default)]
pub struct ModelStore {
    entries: Vec<ModelEntry>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a model whose mesh arrives through `source`
    pub fn register(&mut self, name: &str, source: AssetSlot<MeshData>) -> ModelId {
        let id = ModelId(self.entries.len() as u32);
        self.entries.push(ModelEntry {
            name: name.to_string(),
            source,
            state: LoadState::Loading,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Upload every model whose decode finished since the last poll.
    /// Returns the models that became ready.
    pub fn poll<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        mesh_layout: BindGroupLayoutHandle,
    ) -> BackendResult<Vec<ModelId>> {
        let mut ready = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if !entry.state.is_pending() {
                continue;
            }
            match entry.source.take_finished() {
                None => {}
                Some(Ok(mesh)) => {
                    let asset = ModelAsset::upload(backend, mesh_layout, &entry.name, &mesh)?;
                    log::info!(
                        "Model '{}' ready: {} vertices, {} triangles",
                        entry.name,
                        asset.vertex_count,
                        asset.triangle_count
                    );
                    entry.state = LoadState::Ready(asset);
                    ready.push(ModelId(index as u32));
                }
                Some(Err(err)) => {
                    log::error!("Model '{}' failed to load: {}", entry.name, err);
                    entry.state = LoadState::Failed(err);
                }
            }
        }
        Ok(ready)
    }

    pub fn get(&self, id: ModelId) -> Option<&ModelAsset> {
        self.entries.get(id.index())?.state.ready()
    }

    pub fn state(&self, id: ModelId) -> Option<&LoadState<ModelAsset>> {
        self.entries.get(id.index()).map(|e| &e.state)
    }

    pub fn error(&self, id: ModelId) -> Option<&AssetError> {
        self.state(id)?.error()
    }

    pub fn name(&self, id: ModelId) -> Option<&str> {
        self.entries.get(id.index()).map(|e| e.name.as_str())
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for entry in &self.entries {
            if let Some(asset) = entry.state.ready() {
                asset.destroy(backend);
            }
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_uploads_ready_models() {
        let mut backend = RecordingBackend::new(64, 64);
        let layout = backend.create_bind_group_layout(&[]).unwrap();
        let mut store = ModelStore::new();

        let cube = store.register("cube", AssetSlot::from_value(MeshData::cube()));
        let broken = store.register("broken", AssetSlot::new());
        store.entries[broken.index()].source.complete(Err(AssetError::Truncated));

        let ready = store.poll(&mut backend, layout).unwrap();
        assert_eq!(ready, vec![cube]);

        let asset = store.get(cube).unwrap();
        assert_eq!(asset.index_count, 36);
        assert_eq!(asset.index_format, IndexFormat::Uint16);
        assert_eq!(backend.read_buffer::<u16>(asset.index_buffer).len(), 36);
        assert!(matches!(store.error(broken), Some(AssetError::Truncated)));

        // Nothing new on the next poll
        assert!(store.poll(&mut backend, layout).unwrap().is_empty());
    }
}

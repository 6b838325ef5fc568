//! Mesh resource management.

use std::collections::HashMap;
use std::sync::Arc;

use cv_core::Geometry;
use wgpu::util::DeviceExt;

use crate::vertex::MeshVertex;

/// Handle to a mesh stored in the MeshManager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshHandle(u64);

impl MeshHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// GPU copy of one geometry.
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: Option<wgpu::Buffer>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some() && self.index_count > 0
    }

    fn upload(device: &wgpu::Device, geometry: &Geometry) -> Self {
        let vertices = MeshVertex::from_geometry(geometry);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = geometry.indices.as_ref().filter(|i| !i.is_empty()).map(|indices| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Index Buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: geometry.indices.as_ref().map_or(0, |i| i.len() as u32),
        }
    }
}

struct MeshEntry {
    // Held so the address key cannot be reused while the entry lives.
    geometry: Arc<Geometry>,
    mesh: GpuMesh,
}

/// Manager for GPU mesh resources, keyed by shared geometry identity.
#[derive(Default)]
pub struct MeshManager {
    handles: HashMap<usize, MeshHandle>,
    meshes: HashMap<MeshHandle, MeshEntry>,
    next_handle: u64,
}

fn geometry_key(geometry: &Arc<Geometry>) -> usize {
    Arc::as_ptr(geometry) as usize
}

impl MeshManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `geometry`, uploading it on first use.
    pub fn upload(&mut self, device: &wgpu::Device, geometry: &Arc<Geometry>) -> MeshHandle {
        let key = geometry_key(geometry);
        if let Some(handle) = self.handles.get(&key) {
            return *handle;
        }
        self.next_handle += 1;
        let handle = MeshHandle(self.next_handle);
        let mesh = GpuMesh::upload(device, geometry);
        tracing::debug!(
            handle = handle.0,
            vertices = mesh.vertex_count,
            indices = mesh.index_count,
            "mesh uploaded"
        );
        self.handles.insert(key, handle);
        self.meshes.insert(
            handle,
            MeshEntry {
                geometry: Arc::clone(geometry),
                mesh,
            },
        );
        handle
    }

    pub fn handle_of(&self, geometry: &Arc<Geometry>) -> Option<MeshHandle> {
        self.handles.get(&geometry_key(geometry)).copied()
    }

    pub fn get(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(&handle).map(|e| &e.mesh)
    }

    /// Destroys the buffers of `geometry`. Returns false if it was never
    /// uploaded.
    pub fn release(&mut self, geometry: &Arc<Geometry>) -> bool {
        let Some(handle) = self.handles.remove(&geometry_key(geometry)) else {
            return false;
        };
        if let Some(entry) = self.meshes.remove(&handle) {
            entry.mesh.vertex_buffer.destroy();
            if let Some(index_buffer) = &entry.mesh.index_buffer {
                index_buffer.destroy();
            }
            tracing::debug!(handle = handle.0, refs = Arc::strong_count(&entry.geometry), "mesh released");
        }
        true
    }

    /// Releases every mesh whose geometry is no longer referenced outside
    /// the manager. Returns how many were released.
    pub fn release_unused(&mut self) -> usize {
        let unused: Vec<Arc<Geometry>> = self
            .meshes
            .values()
            .filter(|e| Arc::strong_count(&e.geometry) == 1)
            .map(|e| Arc::clone(&e.geometry))
            .collect();
        unused.iter().filter(|g| self.release(g)).count()
    }

    pub fn clear(&mut self) {
        for entry in self.meshes.values() {
            entry.mesh.vertex_buffer.destroy();
            if let Some(index_buffer) = &entry.mesh.index_buffer {
                index_buffer.destroy();
            }
        }
        self.meshes.clear();
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

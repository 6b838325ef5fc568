//! Draw lists and the painter that records them.
//!
//! The engine flattens the scene into [`DrawCommand`]s: one per visible
//! drawable material, plus the stencil counting, cap and stencil reset
//! draws of every cap pass. Pick passes flatten a [`PickScene`] the same
//! way. Commands are stably sorted by render order, so caps staggered by
//! object and plane composite in a fixed sequence after the meshes.

use std::sync::Arc;

use cv_core::{
    CapPass, DrawableKind, Geometry, Material, PickScene, SceneChild, SceneNode, ShaderProgram, Side,
};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::context::{RenderContext, create_uniform_bind_group};
use crate::programs::{PipelineKey, ProgramCache, Shape, TargetKind};
use crate::resources::{MeshHandle, MeshManager};
use crate::uniforms::{DRAW_UNIFORM_STRIDE, DrawUniform};
use crate::vertex::MeshVertex;

/// What a command rasterizes.
#[derive(Debug, Clone)]
pub enum DrawShape {
    Geometry {
        geometry: Arc<Geometry>,
        kind: DrawableKind,
    },
    /// Four coplanar corners, drawn as two triangles.
    Quad([Vec3; 4]),
    /// Zeroes the stencil over the whole target.
    StencilClear,
}

#[derive(Debug, Clone)]
pub struct DrawCommand {
    pub shape: DrawShape,
    /// Drawable space to world space.
    pub world: Mat4,
    pub material: Material,
    pub pick_id: u32,
}

impl DrawCommand {
    pub fn render_order(&self) -> f32 {
        self.material.params.render_order
    }

    fn pipeline_shape(&self) -> Shape {
        match &self.shape {
            DrawShape::Geometry {
                kind: DrawableKind::Points,
                ..
            } => Shape::Points,
            DrawShape::Geometry { .. } | DrawShape::Quad(_) => Shape::Mesh,
            DrawShape::StencilClear => Shape::FullScreen,
        }
    }

    pub fn pipeline_key(&self, target: TargetKind) -> PipelineKey {
        match self.shape {
            DrawShape::StencilClear => PipelineKey::stencil_clear(target),
            _ => PipelineKey::new(&self.material, self.pipeline_shape(), target),
        }
    }
}

fn sort_by_render_order(commands: &mut [DrawCommand]) {
    commands.sort_by(|a, b| a.render_order().total_cmp(&b.render_order()));
}

/// Draws for one cap pass: stencil counting over every part, then the cap
/// quad, then a stencil reset. `cap` is the quad material.
fn cap_commands(pass: &CapPass, cap: Material, pick_id: u32, out: &mut Vec<DrawCommand>) {
    for side in [Side::Back, Side::Front] {
        let material = pass.stencil_material(side);
        for part in &pass.parts {
            out.push(DrawCommand {
                shape: DrawShape::Geometry {
                    geometry: Arc::clone(&part.geometry),
                    kind: DrawableKind::Mesh,
                },
                world: pass.model * part.local,
                material: material.clone(),
                pick_id: 0,
            });
        }
    }
    let clear_order = cap.params.render_order + 0.1;
    out.push(DrawCommand {
        shape: DrawShape::Quad(pass.quad),
        world: pass.model,
        material: cap,
        pick_id,
    });
    out.push(DrawCommand {
        shape: DrawShape::StencilClear,
        world: Mat4::IDENTITY,
        material: Material::new(ShaderProgram::StencilFront).with_render_order(clear_order),
        pick_id: 0,
    });
}

/// Visible drawables of the model group, followed by cap passes.
pub fn scene_commands(group: &SceneNode, model: Mat4, caps: &[CapPass]) -> Vec<DrawCommand> {
    let mut commands = Vec::new();
    for child in &group.children {
        let SceneChild::Node(object) = child else {
            continue;
        };
        object.visit_drawables(&object.name, model, group.visible, &mut |visit| {
            if !visit.visible {
                return;
            }
            for material in &visit.drawable.materials {
                commands.push(DrawCommand {
                    shape: DrawShape::Geometry {
                        geometry: Arc::clone(&visit.drawable.geometry),
                        kind: visit.drawable.kind,
                    },
                    world: visit.world,
                    material: material.clone(),
                    pick_id: 0,
                });
            }
        });
    }
    for pass in caps {
        cap_commands(pass, pass.cap_material(), 0, &mut commands);
    }
    sort_by_render_order(&mut commands);
    commands
}

/// The derived pick scene as draws. Caps write their id through the same
/// stencil sequence the visible frame uses.
pub fn pick_commands(scene: &PickScene) -> Vec<DrawCommand> {
    let mut commands = Vec::new();
    for item in scene.items() {
        commands.push(DrawCommand {
            shape: DrawShape::Geometry {
                geometry: Arc::clone(&item.geometry),
                kind: item.kind,
            },
            world: item.world,
            material: item.material.clone(),
            pick_id: item.id,
        });
    }
    for cap in scene.caps() {
        let material = cap.pass.cap_material().derive(scene.mode().program());
        cap_commands(&cap.pass, material, cap.id, &mut commands);
    }
    sort_by_render_order(&mut commands);
    commands
}

/// Two triangles with a face normal, in corner order 0-1-2, 0-2-3.
fn quad_vertices(quad: &[Vec3; 4]) -> [MeshVertex; 6] {
    let normal = (quad[1] - quad[0])
        .cross(quad[2] - quad[0])
        .try_normalize()
        .unwrap_or(Vec3::Z)
        .to_array();
    [0, 1, 2, 0, 2, 3].map(|i| MeshVertex {
        position: quad[i].to_array(),
        normal,
        value: 0.0,
    })
}

#[derive(Debug, Clone, Copy)]
enum PreparedShape {
    Mesh(MeshHandle),
    Points(MeshHandle),
    Quad { first: u32 },
    FullScreen,
}

#[derive(Debug, Clone, Copy)]
struct PreparedDraw {
    key: PipelineKey,
    uniform_offset: u32,
    stencil_reference: u32,
    shape: PreparedShape,
}

/// A command list with uniforms and buffers in place, ready to record.
#[derive(Debug, Default)]
pub struct PreparedFrame {
    draws: Vec<PreparedDraw>,
}

impl PreparedFrame {
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

/// Owns the pipelines, GPU meshes and per-draw uniforms used to record
/// scene and pick passes.
pub struct ScenePainter {
    programs: ProgramCache,
    meshes: MeshManager,
    uniform_buffer: wgpu::Buffer,
    uniform_capacity: u64,
    uniform_bind_group: wgpu::BindGroup,
    quad_buffer: Option<wgpu::Buffer>,
}

const INITIAL_DRAW_CAPACITY: u64 = 64;

impl ScenePainter {
    pub fn new(ctx: &RenderContext) -> Self {
        let (uniform_buffer, uniform_bind_group) = Self::create_uniforms(ctx, INITIAL_DRAW_CAPACITY);
        Self {
            programs: ProgramCache::new(ctx),
            meshes: MeshManager::new(),
            uniform_buffer,
            uniform_capacity: INITIAL_DRAW_CAPACITY,
            uniform_bind_group,
            quad_buffer: None,
        }
    }

    fn create_uniforms(ctx: &RenderContext, capacity: u64) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer"),
            size: capacity * DRAW_UNIFORM_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = create_uniform_bind_group(
            ctx.device(),
            ctx.draw_bind_group_layout(),
            &buffer,
            wgpu::BufferSize::new(std::mem::size_of::<DrawUniform>() as u64),
            "Draw",
        );
        (buffer, bind_group)
    }

    pub fn meshes(&self) -> &MeshManager {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut MeshManager {
        &mut self.meshes
    }

    pub fn pipeline_count(&self) -> usize {
        self.programs.len()
    }

    /// Uploads uniforms, geometry and quads for `commands`, building any
    /// missing pipelines. Must be followed by a submit before the next
    /// prepare, since the uniform buffer is reused.
    pub fn prepare(
        &mut self,
        ctx: &RenderContext,
        commands: &[DrawCommand],
        target: TargetKind,
    ) -> PreparedFrame {
        let count = commands.len() as u64;
        if count > self.uniform_capacity {
            let capacity = count.next_power_of_two();
            let (buffer, bind_group) = Self::create_uniforms(ctx, capacity);
            self.uniform_buffer.destroy();
            self.uniform_buffer = buffer;
            self.uniform_bind_group = bind_group;
            self.uniform_capacity = capacity;
        }

        let stride = DRAW_UNIFORM_STRIDE as usize;
        let mut uniform_bytes = vec![0u8; commands.len() * stride];
        let mut quad_vertices_all: Vec<MeshVertex> = Vec::new();
        let mut draws = Vec::with_capacity(commands.len());

        for (index, command) in commands.iter().enumerate() {
            let uniform = DrawUniform::new(command.world, &command.material, command.pick_id);
            let start = index * stride;
            uniform_bytes[start..start + std::mem::size_of::<DrawUniform>()]
                .copy_from_slice(bytemuck::bytes_of(&uniform));

            let shape = match &command.shape {
                DrawShape::Geometry { geometry, kind } => {
                    let handle = self.meshes.upload(ctx.device(), geometry);
                    match kind {
                        DrawableKind::Mesh => PreparedShape::Mesh(handle),
                        DrawableKind::Points => PreparedShape::Points(handle),
                    }
                }
                DrawShape::Quad(quad) => {
                    let first = quad_vertices_all.len() as u32;
                    quad_vertices_all.extend_from_slice(&quad_vertices(quad));
                    PreparedShape::Quad { first }
                }
                DrawShape::StencilClear => PreparedShape::FullScreen,
            };

            let key = command.pipeline_key(target);
            self.programs.prepare(ctx, key);
            draws.push(PreparedDraw {
                key,
                uniform_offset: (index as u64 * DRAW_UNIFORM_STRIDE) as u32,
                stencil_reference: command.material.params.stencil.map_or(0, |s| s.reference),
                shape,
            });
        }

        if !uniform_bytes.is_empty() {
            ctx.queue().write_buffer(&self.uniform_buffer, 0, &uniform_bytes);
        }
        if let Some(old) = self.quad_buffer.take() {
            old.destroy();
        }
        if !quad_vertices_all.is_empty() {
            self.quad_buffer = Some(ctx.device().create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Cap Quad Buffer"),
                contents: bytemuck::cast_slice(&quad_vertices_all),
                usage: wgpu::BufferUsages::VERTEX,
            }));
        }
        PreparedFrame { draws }
    }

    /// Records a prepared frame. The pass must target the format `prepare`
    /// was called with and carry a depth-stencil attachment.
    pub fn paint(&self, pass: &mut wgpu::RenderPass<'_>, camera: &wgpu::BindGroup, frame: &PreparedFrame) {
        pass.set_bind_group(0, camera, &[]);
        for draw in &frame.draws {
            let Some(pipeline) = self.programs.get(&draw.key) else {
                continue;
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, &self.uniform_bind_group, &[draw.uniform_offset]);
            pass.set_stencil_reference(draw.stencil_reference);
            match draw.shape {
                PreparedShape::Mesh(handle) => {
                    let Some(mesh) = self.meshes.get(handle) else {
                        continue;
                    };
                    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    match &mesh.index_buffer {
                        Some(index_buffer) if mesh.is_indexed() => {
                            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                        }
                        _ => pass.draw(0..mesh.vertex_count - mesh.vertex_count % 3, 0..1),
                    }
                }
                PreparedShape::Points(handle) => {
                    let Some(mesh) = self.meshes.get(handle) else {
                        continue;
                    };
                    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    pass.draw(0..4, 0..mesh.vertex_count);
                }
                PreparedShape::Quad { first } => {
                    let Some(buffer) = &self.quad_buffer else {
                        continue;
                    };
                    pass.set_vertex_buffer(0, buffer.slice(..));
                    pass.draw(first..first + 6, 0..1);
                }
                PreparedShape::FullScreen => pass.draw(0..3, 0..1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::{BoundingBox, ClipBox, ClipDirection, Drawable, MeshEvent, PickMode, StencilOp};

    fn cube_geometry() -> Geometry {
        let p = [
            [-1.0, -1.0, -1.0],
            [1.0, -1.0, -1.0],
            [1.0, 1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ];
        Geometry::new(p.to_vec()).with_indices(vec![
            0, 2, 1, 0, 3, 2, 4, 5, 6, 4, 6, 7, 0, 1, 5, 0, 5, 4, 2, 3, 7, 2, 7, 6, 1, 2, 6, 1, 6, 5, 0,
            4, 7, 0, 7, 3,
        ])
    }

    fn group() -> SceneNode {
        let mut group = SceneNode::new("model");
        let cube = Drawable::mesh("cube", cube_geometry(), Material::lit([0.5, 0.5, 0.9, 1.0]));
        group.add_node(SceneNode::from(cube)).unwrap();
        let mut hidden = SceneNode::from(Drawable::mesh(
            "hidden",
            cube_geometry(),
            Material::lit([1.0; 4]),
        ));
        hidden.visible = false;
        group.add_node(hidden).unwrap();
        group
    }

    fn cap_pass() -> CapPass {
        let mut clip = ClipBox::with_domain(BoundingBox::new(Vec3::splat(-1.0), Vec3::ONE));
        let direction = ClipDirection::XPositive;
        clip.update(direction, 0.0);
        let group = group();
        let event = MeshEvent::from_node(group.child_node("cube").unwrap());
        let world = clip.world_planes(&Mat4::IDENTITY);
        CapPass {
            object: "cube".into(),
            direction,
            plane: world[direction.index()],
            other_planes: ClipDirection::ALL
                .iter()
                .filter(|d| **d != direction)
                .map(|d| world[d.index()])
                .collect(),
            parts: event.parts,
            quad: clip.cap_quad(direction, 0.05).unwrap(),
            model: Mat4::IDENTITY,
            color: [0.5, 0.5, 0.9, 1.0],
            render_order: 1.0,
        }
    }

    #[test]
    fn test_hidden_objects_are_not_drawn() {
        let commands = scene_commands(&group(), Mat4::IDENTITY, &[]);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].material.program, ShaderProgram::Lit);
    }

    #[test]
    fn test_cap_sequence_follows_meshes() {
        let commands = scene_commands(&group(), Mat4::IDENTITY, &[cap_pass()]);
        let programs: Vec<ShaderProgram> = commands.iter().map(|c| c.material.program).collect();
        assert_eq!(
            programs,
            vec![
                ShaderProgram::Lit,
                ShaderProgram::StencilBack,
                ShaderProgram::StencilFront,
                ShaderProgram::Cap,
                ShaderProgram::StencilFront,
            ]
        );
        assert!(matches!(commands[4].shape, DrawShape::StencilClear));
        let back = commands[1].material.params.stencil.unwrap();
        assert_eq!(back.op, StencilOp::IncrementWrap);
        assert_eq!(commands[1].material.params.clip_planes.len(), 1);
        assert_eq!(commands[3].material.params.clip_planes.len(), 5);
    }

    #[test]
    fn test_pick_commands_carry_ids() {
        let scene = PickScene::build(&group(), Mat4::IDENTITY, PickMode::Identity, &[cap_pass()]);
        let commands = pick_commands(&scene);
        assert_eq!(commands[0].pick_id, 1);
        assert_eq!(commands[0].material.program, ShaderProgram::PickIdentity);
        let cap = commands
            .iter()
            .find(|c| matches!(c.shape, DrawShape::Quad(_)))
            .unwrap();
        assert_eq!(cap.material.program, ShaderProgram::PickIdentity);
        assert!(cap.material.params.stencil.is_some());
        assert_eq!(cap.pick_id, 3);
    }

    #[test]
    fn test_quad_vertices_face_normal() {
        let quad = [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y];
        let vertices = quad_vertices(&quad);
        assert_eq!(vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(vertices[5].position, [0.0, 1.0, 0.0]);
    }
}

//! Mesh particles: one host-owned mesh drawn per particle.
//!
//! Mesh emitters do not use the fill pipeline. `render` builds every
//! particle's transform directly and issues one draw per mesh element, or a
//! single instanced draw when an instanced vertex factory is held.

use std::sync::Arc;

use glam::{EulerRot, Mat4, Quat, Vec3, Vec4};
use tracing::trace;

use flare_common::{EmitterInstanceId, MaterialProxyId, ParticleId};

use crate::culling::apply_camera_offset;
use crate::dynamic_data::{EmitterBinding, SpriteRenderState};
use crate::emitters::PackParams;
use crate::host::{
    DrawInterface, MaterialRef, MeshBatch, MeshElementParams, PrimitiveType, SceneView, ViewFamily,
};
use crate::payload::{ParticleRef, PayloadWarner};
use crate::render_context::RenderContext;
use crate::replay::{EmitterRenderMode, MeshFacing, MeshReplay, ReplayBase, ScreenAlignment, SubUvInterpMethod};
use crate::scene_proxy::{MotionBlurCache, PrimitiveInfo};
use crate::vertex::{push_vertex, MeshInstance};
use crate::vertex_factory::VertexFactoryKind;

/// Rotation taking `from` onto `to`; identity for zero-length input.
fn find_between(from: Vec3, to: Vec3) -> Quat {
    match (from.try_normalize(), to.try_normalize()) {
        (Some(a), Some(b)) => Quat::from_rotation_arc(a, b),
        _ => Quat::IDENTITY,
    }
}

fn axis_angle(axis: Vec3, angle: f32) -> Quat {
    axis.try_normalize()
        .map_or(Quat::IDENTITY, |axis| Quat::from_axis_angle(axis, angle))
}

/// Rotation from euler degrees `(roll, pitch, yaw)` about X, Y and Z.
#[must_use]
pub fn euler_degrees(roll_pitch_yaw: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::ZYX,
        roll_pitch_yaw.z.to_radians(),
        roll_pitch_yaw.y.to_radians(),
        roll_pitch_yaw.x.to_radians(),
    )
}

/// Yaw and pitch turning +X onto `dir`, without roll.
fn point_without_roll(dir: Vec3) -> Quat {
    let yaw = dir.y.atan2(dir.x);
    let pitch = -dir.z.clamp(-1.0, 1.0).asin();
    Quat::from_euler(EulerRot::ZYX, yaw, pitch, 0.0)
}

fn dir_to_camera(view: &SceneView, location: Vec3) -> Vec3 {
    let dir = (view.origin - location).normalize_or_zero();
    if dir.length_squared() < 0.5 {
        Vec3::X
    } else {
        dir
    }
}

/// World transform of one mesh particle.
pub fn mesh_particle_transform(
    source: &MeshReplay,
    params: &PackParams,
    view: &SceneView,
    particle: &ParticleRef<'_>,
    warner: &mut PayloadWarner,
) -> Mat4 {
    let sprite = &source.sprite;
    let base = particle.base();
    let rotation = base.rotation;

    let mut position = base.location();
    if let Some(camera) = warner.read(particle, sprite.camera_payload_offset) {
        let local_to_world = sprite.use_local_space.then_some(&params.local_to_world);
        position = apply_camera_offset(
            position,
            position,
            camera.offset,
            view.origin,
            local_to_world,
            params.behind_camera_push_scale,
        );
    }

    let mut translation = position;
    let mut local_to_world = sprite.use_local_space.then_some(params.local_to_world);
    let mut mesh_rotation = Quat::IDENTITY;
    let mut locked_rotation = None;

    if let Some(facing) = source.camera_facing {
        let mut location = position;
        let mut velocity_dir = base.velocity().normalize_or_zero();
        if let Some(m) = local_to_world {
            location = m.transform_point3(location);
            if facing.is_velocity_aligned() {
                velocity_dir = m.transform_vector3(velocity_dir);
            }
            if facing.is_x_axis() || facing.is_velocity_aligned() {
                translation = location;
                local_to_world = None;
            }
        }
        let to_camera = dir_to_camera(view, location);

        locked_rotation = Some(match facing.op_vector() {
            None => axis_angle(to_camera, rotation) * find_between(Vec3::X, to_camera),
            Some(op) => {
                let locked_axis = source.effective_locked_axis().unwrap_or(Vec3::X);
                let (point_to, facing_dir, desired_dir) = if facing.is_velocity_aligned() {
                    (find_between(Vec3::X, velocity_dir), velocity_dir, to_camera)
                } else if facing.is_x_axis() {
                    (find_between(Vec3::X, to_camera), to_camera, Vec3::Z)
                } else {
                    (find_between(Vec3::X, locked_axis), locked_axis, to_camera)
                };
                let in_plane = (desired_dir - desired_dir.dot(facing_dir) * facing_dir).normalize_or_zero();
                let point_to = find_between(point_to * op, in_plane) * point_to;
                if !source.apply_particle_rotation_as_spin {
                    axis_angle(to_camera, rotation) * point_to
                } else if facing.is_velocity_aligned() && velocity_dir.length_squared() < 1e-8 {
                    point_to
                } else {
                    axis_angle(facing_dir, rotation) * point_to
                }
            },
        });
    } else if let Some(axis) = source.locked_axis {
        locked_rotation = Some(axis_angle(axis, rotation) * find_between(Vec3::X, axis));
    } else if sprite.screen_alignment == ScreenAlignment::TypeSpecific {
        let mut location = position;
        if let Some(m) = local_to_world.take() {
            location = m.transform_point3(location);
            translation = location;
        }
        let to_camera = dir_to_camera(view, location);
        mesh_rotation = match source.mesh_alignment {
            MeshFacing::FaceCameraWithLockedAxis => {
                let axis = source.effective_locked_axis().unwrap_or(Vec3::X);
                let point_to_up = find_between(Vec3::Z, axis);
                let in_plane = (to_camera - to_camera.dot(axis) * axis).normalize_or_zero();
                find_between(point_to_up * Vec3::X, in_plane) * point_to_up
            },
            MeshFacing::FaceCameraWithSpin => {
                let mut tangent = Vec3::Z.cross(to_camera).normalize_or_zero();
                if tangent.length_squared() < 0.5 {
                    tangent = Vec3::X;
                }
                axis_angle(tangent, rotation) * point_without_roll(to_camera)
            },
            MeshFacing::FaceCameraWithRoll => axis_angle(to_camera, rotation) * point_without_roll(to_camera),
        };
    } else if source.mesh_rotation_active {
        mesh_rotation = warner
            .read(particle, source.mesh_rotation_offset)
            .map_or(Quat::IDENTITY, |payload| euler_degrees(payload.rotation()));
    } else {
        mesh_rotation = euler_degrees(Vec3::splat(rotation.to_degrees()));
    }

    let scaled_size = base.size() * sprite.base.scale;
    let mut transform = Mat4::from_translation(translation) * Mat4::from_quat(mesh_rotation);
    if let Some(locked) = locked_rotation {
        transform *= Mat4::from_quat(locked);
    }
    transform *= Mat4::from_scale(scaled_size);
    if let Some(pre_rotation) = source.pre_rotation {
        transform *= Mat4::from_quat(euler_degrees(pre_rotation));
    }

    if let Some(orbit) = warner.read(particle, sprite.orbit_offset) {
        let offset = if sprite.use_local_space {
            orbit.offset()
        } else {
            params.local_to_world.transform_vector3(orbit.offset())
        };
        transform = Mat4::from_translation(offset) * transform;
    }

    match local_to_world {
        Some(m) => m * transform,
        None => transform,
    }
}

/// Material parameters of one mesh particle draw.
pub fn mesh_element_params(
    source: &MeshReplay,
    particle: &ParticleRef<'_>,
    warner: &mut PayloadWarner,
) -> MeshElementParams {
    let mut params = MeshElementParams {
        vertex_color: particle.base().color(),
        ..MeshElementParams::default()
    };
    if source.sub_uv_interp_method != SubUvInterpMethod::None {
        let sub_uv = warner.read(particle, source.sub_uv_offset).unwrap_or_default();
        params.texture_offset = sub_uv.image_hv().extend(0.0);
        let image2 = sub_uv.image2_hv();
        params.texture_offset1 = Vec4::new(image2.x, image2.y, 0.0, 0.0);
        if source.scale_uv {
            params.texture_scale = Vec4::new(
                1.0 / source.sub_images_horizontal.max(1) as f32,
                1.0 / source.sub_images_vertical.max(1) as f32,
                0.0,
                0.0,
            );
        }
    }
    if let Some(dynamic) = warner.read(particle, source.sprite.dynamic_parameter_offset) {
        params.dynamic_parameter = dynamic.value();
    }
    params
}

/// Instance record of a particle transform.
#[must_use]
pub fn mesh_instance(transform: &Mat4, color: Vec4) -> MeshInstance {
    MeshInstance {
        location: transform.w_axis.truncate().to_array(),
        x_axis: transform.x_axis.truncate().to_array(),
        y_axis: transform.y_axis.truncate().to_array(),
        z_axis: transform.z_axis.truncate().to_array(),
        color: color.to_array(),
    }
}

/// Dynamic data of a mesh emitter.
#[derive(Debug)]
pub struct MeshDynamicData {
    /// Shared render state
    pub state: SpriteRenderState,
    source: Arc<MeshReplay>,
    emitter_id: EmitterInstanceId,
    material: Option<MaterialRef>,
    element_materials: Vec<Option<MaterialRef>>,
    element_proxies: Vec<[Option<MaterialProxyId>; 2]>,
    selected: bool,
    instances: Vec<u8>,
}

impl MeshDynamicData {
    /// Wraps a snapshot with its element materials.
    #[must_use]
    pub fn new(source: Arc<MeshReplay>, binding: EmitterBinding) -> Self {
        let uses_dynamic_parameter = source.sprite.dynamic_parameter_offset.is_some();
        Self {
            state: SpriteRenderState::new(binding.material.clone(), uses_dynamic_parameter),
            source,
            emitter_id: binding.emitter_id,
            material: binding.material,
            element_materials: binding.element_materials,
            element_proxies: Vec::new(),
            selected: false,
            instances: Vec::new(),
        }
    }

    /// Snapshot.
    #[must_use]
    pub fn source(&self) -> &MeshReplay {
        &self.source
    }

    /// Shared particle data.
    #[must_use]
    pub fn source_base(&self) -> &ReplayBase {
        &self.source.sprite.base
    }

    /// Resolves the emitter material.
    pub fn init(&mut self, selected: bool) {
        self.selected = selected;
        self.state.init(selected);
    }

    /// Instanced layout when the snapshot asks for instancing, else `None`.
    #[must_use]
    pub fn vertex_factory_kind(&self) -> Option<VertexFactoryKind> {
        self.source.instancing.then_some(VertexFactoryKind::MeshInstanced)
    }

    /// Resolves the `[normal, selected]` proxy of every mesh element; an
    /// element without its own material falls back to the emitter's.
    pub fn pre_render_view(
        &mut self,
        _ctx: &mut RenderContext,
        _primitive: &PrimitiveInfo,
        _family: &ViewFamily,
        _visibility_mask: u32,
    ) {
        if self.source.sprite.render_mode != EmitterRenderMode::Normal {
            return;
        }
        let element_count = self.source.mesh.elements.len();
        self.element_proxies = (0..element_count)
            .map(|i| {
                let material = self
                    .element_materials
                    .get(i)
                    .and_then(Option::as_ref)
                    .or(self.material.as_ref());
                material.map_or([None, None], |m| [m.render_proxy(false), m.render_proxy(self.selected)])
            })
            .collect();
    }

    /// Draws every live particle into `view`; returns the number of draws.
    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        primitive: &PrimitiveInfo,
        pdi: &mut dyn DrawInterface,
        view: &SceneView,
        motion_blur: &mut MotionBlurCache,
    ) -> usize {
        let source = Arc::clone(&self.source);
        if source.sprite.render_mode != EmitterRenderMode::Normal {
            return 0;
        }
        let params = PackParams::new(&ctx.config, primitive.local_to_world);
        if self.state.vertex_factory_id().is_some() {
            return self.render_instanced(&source, &params, primitive, pdi, view);
        }

        let selection = usize::from(self.selected && view.show_flags.selection);
        let valid_elements: Vec<(usize, MaterialProxyId)> = source
            .mesh
            .elements
            .iter()
            .enumerate()
            .filter(|(_, element)| element.num_triangles > 0)
            .filter_map(|(i, _)| {
                let proxy = self.element_proxies.get(i)?[selection]?;
                (view.show_flags.wireframe || !pdi.is_material_ignored(proxy)).then_some((i, proxy))
            })
            .collect();
        if valid_elements.is_empty() {
            return 0;
        }

        let use_motion_blur =
            pdi.is_rendering_velocities() && source.allow_motion_blur && source.mesh_type_offset.is_some();
        let reverse_culling = (primitive.local_to_world.determinant() < 0.0) != source.mesh.reverse_culling;
        let mut warner = PayloadWarner::new("Mesh");
        let mut draws = 0;

        for i in (0..source.sprite.draw_count()).rev() {
            let Some(particle) = source.sprite.base.particle(i) else {
                continue;
            };
            if particle.base().relative_time >= 1.0 {
                continue;
            }
            let transform = mesh_particle_transform(&source, &params, view, &particle, &mut warner);
            let element_params = mesh_element_params(&source, &particle, &mut warner);

            let mut previous = None;
            if use_motion_blur {
                if let Some(id) = warner.read(&particle, source.mesh_type_offset) {
                    let id = ParticleId::new(id.particle_id);
                    previous = motion_blur.previous(view.id, self.emitter_id, id);
                    motion_blur.record(view.id, self.emitter_id, id, transform);
                }
            }

            for &(element_index, proxy) in &valid_elements {
                let element = &source.mesh.elements[element_index];
                let mut batch = MeshBatch::dynamic(proxy, PrimitiveType::TriangleList, &[], 0, &[], element.num_triangles);
                batch.first_index = element.first_index;
                batch.min_vertex_index = element.min_vertex_index;
                batch.max_vertex_index = element.max_vertex_index;
                batch.local_to_world = transform;
                batch.previous_local_to_world = previous;
                batch.element_params = Some(element_params);
                batch.depth_priority_group = primitive.depth_priority_group;
                batch.reverse_culling = reverse_culling;
                batch.cast_shadow = primitive.cast_shadow;
                draws += pdi.draw_mesh(&batch);
            }
        }
        trace!("Mesh emitter issued {draws} draws");
        draws
    }

    fn render_instanced(
        &mut self,
        source: &MeshReplay,
        params: &PackParams,
        primitive: &PrimitiveInfo,
        pdi: &mut dyn DrawInterface,
        view: &SceneView,
    ) -> usize {
        let Some(proxy) = self.state.drawable_proxy(pdi, view) else {
            return 0;
        };
        let mut warner = PayloadWarner::new("Mesh");
        self.instances.clear();
        let mut instance_count = 0u32;
        for i in (0..source.sprite.draw_count()).rev() {
            let Some(particle) = source.sprite.base.particle(i) else {
                continue;
            };
            let base = particle.base();
            if base.relative_time >= 1.0 {
                continue;
            }
            let transform = mesh_particle_transform(source, params, view, &particle, &mut warner);
            push_vertex(&mut self.instances, &mesh_instance(&transform, base.color()));
            instance_count += 1;
        }
        if instance_count == 0 {
            return 0;
        }

        let elements = &source.mesh.elements;
        let num_triangles = elements.iter().map(|e| e.num_triangles).sum();
        let mut batch = MeshBatch::dynamic(
            proxy,
            PrimitiveType::TriangleList,
            &self.instances,
            VertexFactoryKind::MeshInstanced.stride(),
            &[],
            num_triangles,
        );
        batch.vertex_factory = self.state.vertex_factory_id();
        batch.instance_count = instance_count;
        batch.min_vertex_index = 0;
        batch.max_vertex_index = elements.iter().map(|e| e.max_vertex_index).max().unwrap_or(0);
        batch.depth_priority_group = primitive.depth_priority_group;
        batch.cast_shadow = primitive.cast_shadow;
        pdi.draw_mesh(&batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitters::test_support::{buffer_with, material, view_from};
    use crate::host::RecordingDrawInterface;
    use crate::particle::BaseParticle;
    use crate::payload::{
        DynamicParameterPayload, MeshTypePayload, OrbitPayload, PayloadKind, PayloadLayout, SubUvPayload,
    };
    use crate::replay::{EmitterKind, MeshCameraFacing, MeshDescription, MeshElement, SpriteReplay};
    use flare_common::ViewId;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    fn mesh_with(elements: &[u32]) -> MeshDescription {
        MeshDescription {
            elements: elements
                .iter()
                .map(|&num_triangles| MeshElement {
                    num_triangles,
                    max_vertex_index: num_triangles * 3,
                    ..MeshElement::default()
                })
                .collect(),
            reverse_culling: false,
        }
    }

    fn source_with(particles: &[BaseParticle]) -> MeshReplay {
        let buffer = buffer_with(&PayloadLayout::new(), particles);
        MeshReplay {
            sprite: SpriteReplay::from_buffer(EmitterKind::Mesh, &buffer),
            mesh: mesh_with(&[12]),
            ..MeshReplay::default()
        }
    }

    /// View whose origin may sit on the up axis; only the origin is used.
    fn view_at(origin: Vec3) -> SceneView {
        let mut view = view_from(Vec3::Z * 10.0);
        view.origin = origin;
        view
    }

    fn transform_of(source: &MeshReplay, view: &SceneView) -> Mat4 {
        let particle = source.sprite.base.particle(0).expect("particle");
        mesh_particle_transform(source, &PackParams::default(), view, &particle, &mut PayloadWarner::new("test"))
    }

    fn data_for(source: MeshReplay, materials: Vec<Option<MaterialRef>>) -> MeshDynamicData {
        let binding = EmitterBinding::new(EmitterInstanceId::new(), Some(material(1))).with_element_materials(materials);
        let mut data = MeshDynamicData::new(Arc::new(source), binding);
        data.init(false);
        data
    }

    fn draw(data: &mut MeshDynamicData, pdi: &mut RecordingDrawInterface, motion_blur: &mut MotionBlurCache) -> usize {
        let mut ctx = RenderContext::inline();
        let primitive = PrimitiveInfo::default();
        let family = ViewFamily::single(view_from(Vec3::new(10.0, 0.0, 0.0)), 1);
        data.pre_render_view(&mut ctx, &primitive, &family, 1);
        data.render(&mut ctx, &primitive, pdi, &family.views[0], motion_blur)
    }

    #[test]
    fn test_plain_transform() {
        let source = source_with(&[BaseParticle::at(Vec3::new(1.0, 2.0, 3.0)).with_size(Vec3::splat(2.0))]);
        let m = transform_of(&source, &view_from(Vec3::Z * 10.0));
        assert!(approx(m.transform_point3(Vec3::X), Vec3::new(3.0, 2.0, 3.0)));
    }

    #[test]
    fn test_pre_rotation_applies_first() {
        let mut source = source_with(&[BaseParticle::at(Vec3::ZERO).with_size(Vec3::new(2.0, 1.0, 1.0))]);
        source.pre_rotation = Some(Vec3::new(0.0, 0.0, 90.0));
        let m = transform_of(&source, &view_from(Vec3::Z * 10.0));
        assert!(approx(m.transform_vector3(Vec3::X), Vec3::Y));
        assert!(approx(m.transform_vector3(Vec3::Y), Vec3::new(-2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_camera_facing_points_x_at_camera() {
        let mut source = source_with(&[BaseParticle::at(Vec3::ZERO).with_rotation(0.7)]);
        source.camera_facing = Some(MeshCameraFacing::XAxisNoUp);
        let eye = Vec3::new(3.0, 4.0, 0.0);
        let m = transform_of(&source, &view_from(eye));
        assert!(approx(m.transform_vector3(Vec3::X), eye.normalize()));
    }

    #[test]
    fn test_camera_facing_with_up() {
        let mut source = source_with(&[BaseParticle::at(Vec3::ZERO)]);
        source.camera_facing = Some(MeshCameraFacing::XAxisZUp);
        source.apply_particle_rotation_as_spin = true;
        let m = transform_of(&source, &view_at(Vec3::new(0.0, 10.0, 0.0)));
        assert!(approx(m.transform_vector3(Vec3::X), Vec3::Y));
        assert!(approx(m.transform_vector3(Vec3::Z), Vec3::Z));
    }

    #[test]
    fn test_locked_axis() {
        let mut source = source_with(&[BaseParticle::at(Vec3::ZERO)]);
        source.locked_axis = Some(Vec3::Y);
        let m = transform_of(&source, &view_from(Vec3::Z * 10.0));
        assert!(approx(m.transform_vector3(Vec3::X), Vec3::Y));
    }

    #[test]
    fn test_face_camera_with_roll() {
        let mut source = source_with(&[BaseParticle::at(Vec3::ZERO)]);
        source.sprite.screen_alignment = ScreenAlignment::TypeSpecific;
        let m = transform_of(&source, &view_at(Vec3::new(0.0, -5.0, 0.0)));
        assert!(approx(m.transform_vector3(Vec3::X), Vec3::NEG_Y));
    }

    #[test]
    fn test_world_space_orbit_uses_emitter_rotation() {
        let mut layout = PayloadLayout::new();
        let orbit = layout.push::<OrbitPayload>(PayloadKind::Orbit);
        let mut buffer = buffer_with(&layout, &[BaseParticle::at(Vec3::ZERO)]);
        let payload = OrbitPayload {
            offset: [1.0, 0.0, 0.0],
            ..OrbitPayload::default()
        };
        buffer.write_payload(0, orbit.get(), &payload).expect("in bounds");
        let mut source = MeshReplay {
            sprite: SpriteReplay::from_buffer(EmitterKind::Mesh, &buffer),
            ..MeshReplay::default()
        };
        source.sprite.orbit_offset = Some(orbit);

        let params = PackParams {
            local_to_world: Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2),
            ..PackParams::default()
        };
        let particle = source.sprite.base.particle(0).expect("particle");
        let m = mesh_particle_transform(
            &source,
            &params,
            &view_from(Vec3::Z * 10.0),
            &particle,
            &mut PayloadWarner::new("test"),
        );
        assert!(approx(m.w_axis.truncate(), Vec3::Y));
    }

    #[test]
    fn test_element_params() {
        let mut layout = PayloadLayout::new();
        let sub_uv = layout.push::<SubUvPayload>(PayloadKind::SubUv);
        let dynamic = layout.push::<DynamicParameterPayload>(PayloadKind::DynamicParameter);
        let mut buffer = buffer_with(&layout, &[BaseParticle::at(Vec3::ZERO).with_color(Vec4::new(1.0, 0.0, 0.0, 1.0))]);
        let payload = SubUvPayload {
            random_image_time: 0.0,
            image_hv_interp_uv_offset: [1.0, 2.0, 0.5],
            image2_hv_uv2_offset: [3.0, 4.0, 0.0],
        };
        buffer.write_payload(0, sub_uv.get(), &payload).expect("in bounds");
        let dyn_payload = DynamicParameterPayload {
            value: [0.1, 0.2, 0.3, 0.4],
            time_index: 0,
        };
        buffer.write_payload(0, dynamic.get(), &dyn_payload).expect("in bounds");

        let mut source = MeshReplay {
            sprite: SpriteReplay::from_buffer(EmitterKind::Mesh, &buffer),
            sub_uv_interp_method: SubUvInterpMethod::Linear,
            sub_uv_offset: Some(sub_uv),
            sub_images_horizontal: 4,
            sub_images_vertical: 2,
            scale_uv: true,
            ..MeshReplay::default()
        };
        source.sprite.dynamic_parameter_offset = Some(dynamic);
        let particle = source.sprite.base.particle(0).expect("particle");
        let params = mesh_element_params(&source, &particle, &mut PayloadWarner::new("test"));
        assert_eq!(params.vertex_color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(params.texture_offset, Vec4::new(1.0, 2.0, 0.5, 0.0));
        assert_eq!(params.texture_offset1, Vec4::new(3.0, 4.0, 0.0, 0.0));
        assert_eq!(params.texture_scale, Vec4::new(0.25, 0.5, 0.0, 0.0));
        assert_eq!(params.dynamic_parameter, Vec4::new(0.1, 0.2, 0.3, 0.4));
    }

    #[test]
    fn test_render_skips_dead_particles_and_bad_elements() {
        let mut source = source_with(&[
            BaseParticle::at(Vec3::ZERO),
            BaseParticle::at(Vec3::X).with_relative_time(1.0),
            BaseParticle::at(Vec3::Y),
        ]);
        source.mesh = mesh_with(&[12, 0, 6]);
        let opaque = crate::emitters::test_support::opaque_material(9);
        let mut data = data_for(source, vec![None, None, Some(opaque)]);
        let mut pdi = RecordingDrawInterface::new();
        let draws = draw(&mut data, &mut pdi, &mut MotionBlurCache::new());
        assert_eq!(draws, 4);
        assert_eq!(pdi.draws[0].material, MaterialProxyId::new(1));
        assert_eq!(pdi.draws[1].material, MaterialProxyId::new(9));
        assert_eq!(pdi.draws[1].num_primitives, 6);
        assert!(pdi.draws.iter().all(|d| d.element_params.is_some()));
    }

    #[test]
    fn test_ignored_materials_draw_nothing() {
        let mut data = data_for(source_with(&[BaseParticle::at(Vec3::ZERO)]), Vec::new());
        let mut pdi = RecordingDrawInterface::new();
        pdi.ignored.push(MaterialProxyId::new(1));
        assert_eq!(draw(&mut data, &mut pdi, &mut MotionBlurCache::new()), 0);
    }

    #[test]
    fn test_motion_blur_uses_last_pass() {
        let mut layout = PayloadLayout::new();
        let id = layout.push::<MeshTypePayload>(PayloadKind::MeshType);
        let mut buffer = buffer_with(&layout, &[BaseParticle::at(Vec3::new(0.0, 0.0, 1.0))]);
        buffer
            .write_payload(0, id.get(), &MeshTypePayload { particle_id: 42 })
            .expect("in bounds");
        let source = MeshReplay {
            sprite: SpriteReplay::from_buffer(EmitterKind::Mesh, &buffer),
            mesh: mesh_with(&[2]),
            mesh_type_offset: Some(id),
            allow_motion_blur: true,
            ..MeshReplay::default()
        };
        let mut data = data_for(source, Vec::new());
        let mut cache = MotionBlurCache::new();
        let mut pdi = RecordingDrawInterface::new();
        pdi.rendering_velocities = true;

        draw(&mut data, &mut pdi, &mut cache);
        assert_eq!(pdi.draws[0].previous_local_to_world, None);
        cache.end_pass(ViewId::new(0));

        draw(&mut data, &mut pdi, &mut cache);
        assert_eq!(pdi.draws[1].previous_local_to_world, Some(pdi.draws[0].local_to_world));
    }

    #[test]
    fn test_instanced_single_draw() {
        let mut source = source_with(&[
            BaseParticle::at(Vec3::ZERO),
            BaseParticle::at(Vec3::X),
            BaseParticle::at(Vec3::Y).with_relative_time(2.0),
        ]);
        source.mesh = mesh_with(&[4, 6]);
        source.instancing = true;
        let mut data = data_for(source, Vec::new());
        assert_eq!(data.vertex_factory_kind(), Some(VertexFactoryKind::MeshInstanced));

        let mut ctx = RenderContext::inline();
        data.state.create_render_resources(&mut ctx.vertex_factories, VertexFactoryKind::MeshInstanced);
        let primitive = PrimitiveInfo::default();
        let view = view_from(Vec3::Z * 10.0);
        let mut pdi = RecordingDrawInterface::new();
        let draws = data.render(&mut ctx, &primitive, &mut pdi, &view, &mut MotionBlurCache::new());
        assert_eq!(draws, 1);
        assert_eq!(pdi.draws[0].instance_count, 2);
        assert_eq!(pdi.draws[0].num_primitives, 10);
        assert_eq!(pdi.draws[0].vertex_count, 2);
    }

    #[test]
    fn test_instance_axes() {
        let m = Mat4::from_scale_rotation_translation(Vec3::splat(2.0), Quat::IDENTITY, Vec3::new(1.0, 2.0, 3.0));
        let instance = mesh_instance(&m, Vec4::ONE);
        assert_eq!(instance.location, [1.0, 2.0, 3.0]);
        assert_eq!(instance.x_axis, [2.0, 0.0, 0.0]);
    }
}

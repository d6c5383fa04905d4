//! Per-frame reports over a replay capture.
//!
//! [`summarize`] only reads the snapshots. [`render_offline`] also hands
//! each frame to a scene proxy and runs every packer against one camera,
//! attributing recorded draws to emitters by material proxy.

use glam::Vec3;
use serde::Serialize;
use tracing::{debug, info};

use flare_common::{EmitterInstanceId, MaterialProxyId, ViewId};
use flare_render::{
    EmitterBinding, EmitterReplay, ParticleDynamicData, ParticleSystemSceneProxy, PrimitiveInfo,
    RecordingDrawInterface, RenderConfig, RenderContext, ReplayCapture, SceneView, StaticMaterial, ViewFamily,
};

/// One emitter in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmitterReport {
    /// Emitter kind name
    pub kind: String,
    /// Live particles in the snapshot
    pub active_particles: usize,
    /// Draws issued, when rendered
    pub draws: usize,
    /// Primitives drawn, when rendered
    pub primitives: u64,
    /// Vertices submitted, when rendered
    pub vertices: usize,
}

/// One frame of a capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    /// Frame number
    pub frame: u64,
    /// Emitters in capture order
    pub emitters: Vec<EmitterReport>,
}

impl FrameReport {
    /// Live particles across all emitters.
    #[must_use]
    pub fn active_particles(&self) -> usize {
        self.emitters.iter().map(|e| e.active_particles).sum()
    }

    /// Primitives across all emitters.
    #[must_use]
    pub fn primitives(&self) -> u64 {
        self.emitters.iter().map(|e| e.primitives).sum()
    }
}

/// Report over a whole capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    /// Capture label
    pub label: String,
    /// Whether packers ran
    pub rendered: bool,
    /// Frames in capture order
    pub frames: Vec<FrameReport>,
}

impl ReplayReport {
    /// Plain-text rendering of the report.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = format!("Replay '{}' ({} frames)\n", self.label, self.frames.len());
        for frame in &self.frames {
            out.push_str(&format!(
                "frame {}: {} particles, {} primitives\n",
                frame.frame,
                frame.active_particles(),
                frame.primitives()
            ));
            for (i, emitter) in frame.emitters.iter().enumerate() {
                out.push_str(&format!("  [{i}] {:<10} {:>6} particles", emitter.kind, emitter.active_particles));
                if self.rendered {
                    out.push_str(&format!(
                        " {:>3} draws {:>7} primitives {:>7} vertices",
                        emitter.draws, emitter.primitives, emitter.vertices
                    ));
                }
                out.push('\n');
            }
        }
        out
    }
}

fn emitter_report(replay: &EmitterReplay) -> EmitterReport {
    EmitterReport {
        kind: replay.kind().name().to_string(),
        active_particles: replay.base().active_count(),
        ..EmitterReport::default()
    }
}

/// Counts particles per emitter without packing anything.
#[must_use]
pub fn summarize(capture: &ReplayCapture) -> ReplayReport {
    ReplayReport {
        label: capture.metadata.label.clone(),
        rendered: false,
        frames: capture
            .frames
            .iter()
            .map(|frame| FrameReport {
                frame: frame.frame,
                emitters: frame.emitters.iter().map(emitter_report).collect(),
            })
            .collect(),
    }
}

/// Material proxy that marks draws of emitter `index`.
fn emitter_material(index: usize) -> MaterialProxyId {
    MaterialProxyId::new(index as u32 + 1)
}

/// Packs and draws every frame as seen from `eye`, looking at the origin.
///
/// Emitter `i` keeps the same instance id in every frame.
pub fn render_offline(capture: &ReplayCapture, config: RenderConfig, eye: Vec3) -> ReplayReport {
    let mut ctx = RenderContext::new(config);
    let mut proxy = ParticleSystemSceneProxy::new(PrimitiveInfo::default());
    let up = if eye.cross(Vec3::Y).length_squared() > 1e-6 { Vec3::Y } else { Vec3::Z };
    let view = SceneView::look_at(ViewId::new(0), eye, Vec3::ZERO, up);
    let mut emitter_ids: Vec<EmitterInstanceId> = Vec::new();

    let mut report = summarize(capture);
    report.rendered = true;
    for (frame, frame_report) in capture.frames.iter().zip(&mut report.frames) {
        while emitter_ids.len() < frame.emitters.len() {
            emitter_ids.push(EmitterInstanceId::new());
        }
        let mut replays = Vec::with_capacity(frame.emitters.len());
        for (i, replay) in frame.emitters.iter().enumerate() {
            let material = StaticMaterial::translucent(emitter_material(i)).into_ref();
            replays.push((replay.clone(), EmitterBinding::new(emitter_ids[i], Some(material))));
        }
        proxy.update_data_render_thread(&mut ctx, Some(ParticleDynamicData::from_replays(replays)));

        let family = ViewFamily::single(view.clone(), frame.frame);
        proxy.pre_render_view(&mut ctx, &family, family.all_visible(), frame.frame);
        let mut pdi = RecordingDrawInterface::new();
        let group = proxy.primitive.depth_priority_group;
        let (draws, emitters_drawn) = proxy.draw_dynamic_elements(&mut ctx, &mut pdi, &family.views[0], group);
        debug!("Frame {}: {} draws from {} emitters", frame.frame, draws, emitters_drawn);

        for (i, emitter) in frame_report.emitters.iter_mut().enumerate() {
            let material = emitter_material(i);
            for draw in pdi.draws.iter().filter(|d| d.material == material) {
                emitter.draws += 1;
                emitter.primitives += u64::from(draw.num_primitives) * u64::from(draw.instance_count.max(1));
                emitter.vertices += draw.vertex_count;
            }
        }
    }
    proxy.release(&mut ctx);
    ctx.shutdown();
    info!("Rendered {} frames offline", report.frames.len());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_render::{BaseParticle, EmitterKind, ParticleBuffer, SpriteReplay};

    fn sprite_capture() -> ReplayCapture {
        let mut buffer = ParticleBuffer::new(8, 0).expect("valid capacity");
        for x in [-20.0, 0.0, 20.0] {
            buffer
                .spawn(BaseParticle::at(Vec3::new(x, 0.0, 0.0)).with_size(Vec3::splat(5.0)))
                .expect("room");
        }
        let sprite = SpriteReplay::from_buffer(EmitterKind::Sprite, &buffer);
        let mut capture = ReplayCapture::new("sprites");
        capture.push_frame(1, vec![EmitterReplay::Sprite(sprite.clone())]);
        capture.push_frame(2, vec![EmitterReplay::Sprite(sprite.clone()), EmitterReplay::Sprite(sprite)]);
        capture
    }

    #[test]
    fn test_summarize_counts_particles() {
        let report = summarize(&sprite_capture());
        assert_eq!(report.label, "sprites");
        assert!(!report.rendered);
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.frames[0].active_particles(), 3);
        assert_eq!(report.frames[1].active_particles(), 6);
        assert_eq!(report.frames[1].emitters[0].kind, "Sprite");
    }

    #[test]
    fn test_render_offline_attributes_draws() {
        let config = RenderConfig {
            fill_worker_threads: 0,
            ..RenderConfig::default()
        };
        let report = render_offline(&sprite_capture(), config, Vec3::new(0.0, 0.0, 200.0));
        assert!(report.rendered);
        let second = &report.frames[1];
        for emitter in &second.emitters {
            assert_eq!(emitter.draws, 1);
            assert_eq!(emitter.primitives, 6);
            assert_eq!(emitter.vertices, 12);
        }
    }

    #[test]
    fn test_text_report() {
        let text = summarize(&sprite_capture()).to_text();
        assert!(text.starts_with("Replay 'sprites' (2 frames)"));
        assert!(text.contains("frame 2: 6 particles"));
        assert!(!text.contains("draws"));
    }
}

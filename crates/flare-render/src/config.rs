//! Render core configuration.
//!
//! Worker threads, pool sizes and the numeric knobs the packers use. Loaded
//! from a TOML file; anything missing falls back to the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::culling::DEFAULT_CULL_ALPHA_THRESHOLD;
use crate::replay::{MAX_BEAMS, MAX_INTERPOLATION_POINTS, MAX_NOISE_FREQUENCY};

/// Default file name of the render configuration.
pub const CONFIG_FILE: &str = "flare.toml";

/// Push applied to camera-offset particles that would end up behind the
/// camera. Half the world extent.
pub const HALF_WORLD_MAX: f32 = 524_288.0;

/// Render core configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    // === Fill Pipeline ===
    /// Fill worker threads (0 = fill on the render thread)
    pub fill_worker_threads: usize,
    /// Pending fill jobs before submission falls back to inline filling
    pub fill_queue_capacity: usize,
    /// Build one fill buffer and share it across all views
    pub single_view_fill: bool,

    // === Pools ===
    /// Minimum capacity of the particle order scratch pool
    pub order_pool_min_capacity: usize,

    // === Sprites ===
    /// Scale of the push for particles offset past the camera
    pub behind_camera_push_scale: f32,
    /// Alpha under which distance-faded particles collapse to zero size
    pub cull_alpha_threshold: f32,

    // === Beams ===
    /// Most beams per emitter
    pub max_beams: u32,
    /// Most interpolation points per beam
    pub max_interpolation_points: u32,
    /// Most noise points per beam
    pub max_noise_frequency: u32,

    // === Meshes ===
    /// Allow the instanced mesh path
    pub allow_mesh_instancing: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            // Fill pipeline
            fill_worker_threads: 2,
            fill_queue_capacity: 64,
            single_view_fill: false,

            // Pools
            order_pool_min_capacity: 64,

            // Sprites
            behind_camera_push_scale: HALF_WORLD_MAX,
            cull_alpha_threshold: DEFAULT_CULL_ALPHA_THRESHOLD,

            // Beams
            max_beams: MAX_BEAMS,
            max_interpolation_points: MAX_INTERPOLATION_POINTS,
            max_noise_frequency: MAX_NOISE_FREQUENCY,

            // Meshes
            allow_mesh_instancing: true,
        }
    }
}

impl RenderConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Render config not found, using defaults");
            return Self::default();
        }

        let mut contents = String::new();
        if let Err(e) = fs::File::open(path).and_then(|mut file| file.read_to_string(&mut contents)) {
            warn!("Failed to read render config: {e}");
            return Self::default();
        }

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded render config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse render config: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved render config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.fill_worker_threads = self.fill_worker_threads.min(64);
        self.fill_queue_capacity = self.fill_queue_capacity.clamp(1, 4096);
        self.order_pool_min_capacity = self.order_pool_min_capacity.clamp(1, 1 << 20);

        if !self.behind_camera_push_scale.is_finite() || self.behind_camera_push_scale < 0.0 {
            self.behind_camera_push_scale = HALF_WORLD_MAX;
        }
        self.cull_alpha_threshold = self.cull_alpha_threshold.clamp(0.0, 1.0);

        self.max_beams = self.max_beams.clamp(1, MAX_BEAMS);
        self.max_interpolation_points = self.max_interpolation_points.min(MAX_INTERPOLATION_POINTS);
        self.max_noise_frequency = self.max_noise_frequency.clamp(1, MAX_NOISE_FREQUENCY);
    }

    /// Whether fills run on worker threads.
    #[must_use]
    pub fn uses_fill_workers(&self) -> bool {
        self.fill_worker_threads > 0
    }
}

//! Render-thread owner of the shared pools.

use tracing::{info, warn};

use crate::config::RenderConfig;
use crate::fill::FillWorkerPool;
use crate::sort::ParticleOrderPool;
use crate::vertex_factory::VertexFactoryPool;

/// Everything the emitters share on the render thread.
///
/// Accessed through `&mut` only, so the pools need no locking.
#[derive(Debug)]
pub struct RenderContext {
    /// Active configuration
    pub config: RenderConfig,
    /// Vertex factory free lists
    pub vertex_factories: VertexFactoryPool,
    /// Sort scratch
    pub order_pool: ParticleOrderPool,
    /// Fill workers, absent when filling on the render thread
    pub fill_pool: Option<FillWorkerPool>,
}

impl RenderContext {
    /// Creates the pools described by `config`.
    ///
    /// A worker pool that fails to start leaves the context filling inline.
    pub fn new(mut config: RenderConfig) -> Self {
        config.validate();
        let fill_pool = if config.uses_fill_workers() {
            match FillWorkerPool::new(config.fill_worker_threads, config.fill_queue_capacity) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!("Fill workers unavailable, filling inline: {e}");
                    None
                },
            }
        } else {
            None
        };
        info!(
            "Render context ready ({} fill workers)",
            fill_pool.as_ref().map_or(0, FillWorkerPool::worker_count)
        );
        Self {
            order_pool: ParticleOrderPool::new(config.order_pool_min_capacity),
            vertex_factories: VertexFactoryPool::new(),
            fill_pool,
            config,
        }
    }

    /// Context that fills on the calling thread.
    pub fn inline() -> Self {
        Self::new(RenderConfig {
            fill_worker_threads: 0,
            ..RenderConfig::default()
        })
    }

    /// Stops the fill workers and destroys every pooled vertex factory.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.fill_pool.take() {
            pool.shutdown();
        }
        self.vertex_factories.free_pool();
        info!("Render context shut down");
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex_factory::VertexFactoryKind;

    #[test]
    fn test_inline_context_has_no_workers() {
        let ctx = RenderContext::inline();
        assert!(ctx.fill_pool.is_none());
    }

    #[test]
    fn test_worker_context() {
        let mut ctx = RenderContext::new(RenderConfig {
            fill_worker_threads: 2,
            ..RenderConfig::default()
        });
        assert_eq!(ctx.fill_pool.as_ref().map(FillWorkerPool::worker_count), Some(2));
        ctx.shutdown();
        assert!(ctx.fill_pool.is_none());
    }

    #[test]
    fn test_shutdown_frees_factories() {
        let mut ctx = RenderContext::inline();
        let handle = ctx.vertex_factories.acquire(VertexFactoryKind::Sprite);
        ctx.shutdown();
        assert_eq!(ctx.vertex_factories.in_use_count(), 0);
        assert!(ctx.vertex_factories.release(handle).is_err());
    }
}

//! Per-view particle ordering.
//!
//! Translucent particles must be drawn back to front. The sort computes one
//! key per active particle and orders the keys descending, so the farthest
//! (or oldest, for the age modes) particle is packed first.

use std::cmp::Ordering;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::payload::ParticleRef;

/// Minimum capacity of the order scratch pool.
pub const MIN_ORDER_POOL_CAPACITY: usize = 64;

/// How particles of an emitter are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortMode {
    /// Index order
    #[default]
    None,
    /// Depth after the view-projection transform
    ViewProjDepth,
    /// Squared distance to the view origin
    DistanceToView,
    /// Oldest particles first
    AgeOldestFirst,
    /// Newest particles first
    AgeNewestFirst,
}

impl SortMode {
    /// Whether this mode orders by age and must sort regardless of blending.
    #[must_use]
    pub const fn is_age_mode(self) -> bool {
        matches!(self, Self::AgeOldestFirst | Self::AgeNewestFirst)
    }
}

/// One sorted entry: position in the snapshot index array plus its key.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParticleOrder {
    /// Position in the snapshot index array
    pub particle_index: u32,
    /// Sort key
    pub key: f32,
}

/// Everything a sort key depends on.
#[derive(Debug, Clone, Copy)]
pub struct SortContext {
    /// Sort mode
    pub mode: SortMode,
    /// View origin in world space
    pub view_origin: Vec3,
    /// World to clip transform
    pub view_projection: Mat4,
    /// Applied to particle locations of local-space emitters
    pub local_to_world: Option<Mat4>,
}

impl SortContext {
    /// Key of one particle.
    #[must_use]
    pub fn key(&self, particle: &ParticleRef<'_>) -> f32 {
        let base = particle.base();
        let world = |location: Vec3| match &self.local_to_world {
            Some(m) => m.transform_point3(location),
            None => location,
        };
        match self.mode {
            SortMode::None => 0.0,
            SortMode::ViewProjDepth => (self.view_projection * world(base.location()).extend(1.0)).z,
            SortMode::DistanceToView => world(base.location()).distance_squared(self.view_origin),
            SortMode::AgeOldestFirst => base.relative_time,
            SortMode::AgeNewestFirst => 1.0 - base.relative_time,
        }
    }
}

/// Descending by key, then ascending by particle index.
///
/// The secondary key makes the order a total order, so sorting an already
/// sorted array reproduces it exactly.
fn compare(a: &ParticleOrder, b: &ParticleOrder) -> Ordering {
    b.key
        .total_cmp(&a.key)
        .then_with(|| a.particle_index.cmp(&b.particle_index))
}

/// Sorts `orders` in place.
pub fn sort_orders(orders: &mut [ParticleOrder]) {
    orders.sort_unstable_by(compare);
}

/// Computes the keys of `count` particles and sorts them into `out`.
///
/// `particle_at(i)` resolves position `i` of the snapshot index array.
/// Positions that fail to resolve sort with key 0. `out` is cleared first;
/// nothing is allocated when `count` is zero.
pub fn sort_particles<'a, F>(context: &SortContext, count: usize, particle_at: F, out: &mut Vec<ParticleOrder>)
where
    F: Fn(usize) -> Option<ParticleRef<'a>>,
{
    out.clear();
    if count == 0 {
        return;
    }
    out.extend((0..count).map(|i| ParticleOrder {
        particle_index: i as u32,
        key: particle_at(i).map_or(0.0, |p| context.key(&p)),
    }));
    if context.mode != SortMode::None {
        sort_orders(out);
    }
}

/// Grow-only scratch storage for particle orders.
///
/// Owned by the render context and used from the render thread only.
#[derive(Debug)]
pub struct ParticleOrderPool {
    orders: Vec<ParticleOrder>,
    min_capacity: usize,
}

impl Default for ParticleOrderPool {
    fn default() -> Self {
        Self::new(MIN_ORDER_POOL_CAPACITY)
    }
}

impl ParticleOrderPool {
    /// Creates an empty pool that grows to at least `min_capacity`.
    #[must_use]
    pub fn new(min_capacity: usize) -> Self {
        Self {
            orders: Vec::new(),
            min_capacity: min_capacity.max(1),
        }
    }

    /// Ensures room for `count` entries; never shrinks.
    pub fn reserve(&mut self, count: usize) {
        let wanted = count.max(self.min_capacity);
        if wanted > self.orders.capacity() {
            debug!("Growing particle order pool to {}", wanted);
            self.orders.reserve_exact(wanted - self.orders.len());
        }
    }

    /// Largest capacity reached so far.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.orders.capacity()
    }

    /// Sorts into the pool and returns the sorted entries.
    ///
    /// An empty emitter returns an empty slice without touching the pool.
    pub fn sort<'a, F>(&mut self, context: &SortContext, count: usize, particle_at: F) -> &[ParticleOrder]
    where
        F: Fn(usize) -> Option<ParticleRef<'a>>,
    {
        if count == 0 {
            self.orders.clear();
            return &[];
        }
        self.reserve(count);
        sort_particles(context, count, particle_at, &mut self.orders);
        &self.orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{BaseParticle, ParticleBuffer};
    use proptest::prelude::*;

    fn context(mode: SortMode) -> SortContext {
        SortContext {
            mode,
            view_origin: Vec3::ZERO,
            view_projection: Mat4::IDENTITY,
            local_to_world: None,
        }
    }

    fn pool_with(locations: &[Vec3], ages: &[f32]) -> ParticleBuffer {
        let mut buffer = ParticleBuffer::new(locations.len().max(1), 0).expect("valid capacity");
        for (location, age) in locations.iter().zip(ages) {
            buffer.spawn(BaseParticle::at(*location).with_relative_time(*age));
        }
        buffer
    }

    fn resolve<'a>(buffer: &'a ParticleBuffer) -> impl Fn(usize) -> Option<ParticleRef<'a>> + 'a {
        move |i| {
            buffer
                .active_indices()
                .get(i)
                .and_then(|&slot| buffer.particle_ref(slot))
        }
    }

    #[test]
    fn test_distance_back_to_front() {
        let buffer = pool_with(
            &[Vec3::new(1.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0)],
            &[0.0; 3],
        );
        let mut out = Vec::new();
        sort_particles(&context(SortMode::DistanceToView), 3, resolve(&buffer), &mut out);
        let order: Vec<u32> = out.iter().map(|o| o.particle_index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_age_modes() {
        let buffer = pool_with(&[Vec3::ZERO; 3], &[0.2, 0.9, 0.5]);
        let mut out = Vec::new();
        sort_particles(&context(SortMode::AgeOldestFirst), 3, resolve(&buffer), &mut out);
        assert_eq!(out[0].particle_index, 1);
        sort_particles(&context(SortMode::AgeNewestFirst), 3, resolve(&buffer), &mut out);
        assert_eq!(out[0].particle_index, 0);
    }

    #[test]
    fn test_local_space_key() {
        let buffer = pool_with(&[Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)], &[0.0; 2]);
        let mut ctx = context(SortMode::DistanceToView);
        ctx.local_to_world = Some(Mat4::from_translation(Vec3::new(-10.0, 0.0, 0.0)));
        let mut out = Vec::new();
        sort_particles(&ctx, 2, resolve(&buffer), &mut out);
        // world positions -10 and -7
        assert_eq!(out[0].particle_index, 0);
        assert!((out[0].key - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_ties_break_by_index() {
        let buffer = pool_with(&[Vec3::ONE; 4], &[0.0; 4]);
        let mut out = Vec::new();
        sort_particles(&context(SortMode::DistanceToView), 4, resolve(&buffer), &mut out);
        let order: Vec<u32> = out.iter().map(|o| o.particle_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_empty_does_not_allocate() {
        let mut pool = ParticleOrderPool::default();
        let sorted = pool.sort(&context(SortMode::DistanceToView), 0, |_| None);
        assert!(sorted.is_empty());
        assert_eq!(pool.high_water(), 0);
    }

    #[test]
    fn test_pool_grow_only() {
        let mut pool = ParticleOrderPool::new(64);
        pool.reserve(10);
        assert!(pool.high_water() >= 64);
        pool.reserve(200);
        let grown = pool.high_water();
        assert!(grown >= 200);
        pool.reserve(5);
        assert_eq!(pool.high_water(), grown);
    }

    proptest! {
        #[test]
        fn prop_sort_is_idempotent(keys in proptest::collection::vec(-1000.0f32..1000.0, 0..200)) {
            let mut orders: Vec<ParticleOrder> = keys
                .iter()
                .enumerate()
                .map(|(i, &key)| ParticleOrder { particle_index: i as u32, key })
                .collect();
            sort_orders(&mut orders);
            let once = orders.clone();
            sort_orders(&mut orders);
            prop_assert_eq!(&once, &orders);
            for pair in orders.windows(2) {
                prop_assert!(pair[0].key >= pair[1].key);
            }
        }
    }
}

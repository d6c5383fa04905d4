//! Asynchronous vertex/index buffer filling.
//!
//! Each emitter owns an [`AsyncFill`]: one scratch [`FillBuffer`] per visible
//! view and at most one outstanding fill task. Buffers move into the task
//! and come back through a channel, so the render thread can only read a
//! buffer after the task is done with it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info};

use flare_common::{FlareResult, RenderError, ViewId};

use crate::host::{SceneView, ViewFamily};
use crate::sort::ParticleOrder;

/// Largest vertex index addressable by the 16-bit index buffers.
pub const MAX_INDEXED_VERTICES: usize = u16::MAX as usize + 1;

/// Scratch vertex/index storage for one view.
///
/// Storage is grow-only: refilling with the same or fewer vertices reuses
/// the allocation.
#[derive(Debug, Clone)]
pub struct FillBuffer {
    /// View the data is built for
    pub view: SceneView,
    /// Vertices the buffer is sized for
    pub vertex_count: usize,
    /// Bytes per vertex
    pub vertex_stride: usize,
    /// Packed vertices
    pub vertices: Vec<u8>,
    /// Indices written by the last fill
    pub index_count: usize,
    /// Index data
    pub indices: Vec<u16>,
    /// Draw order for the packer, empty for index order
    pub order: Vec<ParticleOrder>,
    /// Triangles written, including degenerates
    pub out_triangle_count: u32,
    /// Degenerate stitching triangles written
    pub out_degenerate_triangle_count: u32,
}

impl FillBuffer {
    /// Creates an empty buffer for `view`.
    #[must_use]
    pub fn new(view: SceneView) -> Self {
        Self {
            view,
            vertex_count: 0,
            vertex_stride: 0,
            vertices: Vec::new(),
            index_count: 0,
            indices: Vec::new(),
            order: Vec::new(),
            out_triangle_count: 0,
            out_degenerate_triangle_count: 0,
        }
    }

    /// Retargets the buffer and makes room for `vertex_count` vertices.
    pub fn prepare(&mut self, view: &SceneView, vertex_count: usize, vertex_stride: usize) {
        self.view = view.clone();
        if self.vertex_stride != 0 && self.vertex_stride != vertex_stride {
            debug!(
                "Fill buffer stride changed from {} to {}",
                self.vertex_stride, vertex_stride
            );
        }
        if vertex_count > self.vertex_count || vertex_stride != self.vertex_stride {
            self.vertices.clear();
            self.vertices.reserve(vertex_count * vertex_stride);
            self.vertex_count = vertex_count.max(self.vertex_count);
        }
        self.vertex_stride = vertex_stride;
        self.reset_output();
    }

    /// Clears the output of the previous fill, keeping allocations.
    pub fn reset_output(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.index_count = 0;
        self.out_triangle_count = 0;
        self.out_degenerate_triangle_count = 0;
    }

    /// Vertices written by the last fill.
    #[must_use]
    pub fn written_vertex_count(&self) -> usize {
        if self.vertex_stride == 0 {
            0
        } else {
            self.vertices.len() / self.vertex_stride
        }
    }

    /// Bytes reserved for vertices.
    #[must_use]
    pub fn vertex_capacity_bytes(&self) -> usize {
        self.vertices.capacity()
    }
}

/// Packs one emitter's vertex and index data into a buffer.
///
/// Runs on fill workers, so implementations only read immutable snapshot
/// data (or state behind their own lock) and must absorb every error
/// locally.
pub trait BufferFiller: Send + Sync {
    /// Fills `buffer` for `buffer.view`.
    fn fill(&self, buffer: &mut FillBuffer);
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Named rayon threads that run fill jobs, with a cap on jobs in flight.
pub struct FillWorkerPool {
    pool: Option<ThreadPool>,
    in_flight: Arc<AtomicUsize>,
    queue_capacity: usize,
}

impl std::fmt::Debug for FillWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillWorkerPool")
            .field("workers", &self.worker_count())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

/// Releases a fill slot when the job ends, panicking or not.
struct InFlightSlot(Arc<AtomicUsize>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl FillWorkerPool {
    /// Starts `threads` workers accepting up to `queue_capacity` jobs at once.
    ///
    /// With zero threads every job is handed back to run inline.
    pub fn new(threads: usize, queue_capacity: usize) -> FlareResult<Self> {
        let pool = if threads == 0 {
            None
        } else {
            let pool = ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("flare-fill-{i}"))
                .panic_handler(|_| error!("Fill job panicked; its buffers are dropped"))
                .build()
                .map_err(|err| RenderError::WorkerPool(err.to_string()))?;
            Some(pool)
        };
        info!("Started {} fill workers", threads);
        Ok(Self {
            pool,
            in_flight: Arc::new(AtomicUsize::new(0)),
            queue_capacity: queue_capacity.max(1),
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, ThreadPool::current_num_threads)
    }

    /// Jobs submitted and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Queues a job.
    ///
    /// Hands the job back when there is nobody to run it or the queue is
    /// full, so the caller runs it inline.
    fn submit(&self, job: Job) -> Result<(), (RenderError, Job)> {
        let Some(pool) = self.pool.as_ref() else {
            return Err((RenderError::NoWorkers, job));
        };
        let taken = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.queue_capacity).then_some(n + 1));
        if taken.is_err() {
            return Err((RenderError::FillQueueFull(self.queue_capacity), job));
        }
        let slot = InFlightSlot(Arc::clone(&self.in_flight));
        pool.spawn(move || {
            let _slot = slot;
            job();
        });
        Ok(())
    }

    /// Stops accepting jobs. Jobs already queued still run to completion.
    pub fn shutdown(&mut self) {
        if self.pool.take().is_some() {
            debug!("Fill workers released with {} jobs in flight", self.in_flight());
        }
    }
}

/// Per-emitter fill state: per-view buffers and the outstanding task.
#[derive(Debug, Default)]
pub struct AsyncFill {
    buffers: Vec<FillBuffer>,
    task: Option<Receiver<Vec<FillBuffer>>>,
}

impl AsyncFill {
    /// Creates state with no buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fill task has not been waited on yet.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.task.is_some()
    }

    /// Buffers currently held, empty while a worker task owns them.
    #[must_use]
    pub fn buffers(&self) -> &[FillBuffer] {
        &self.buffers
    }

    /// Builds one buffer per visible view and submits a fill task.
    ///
    /// An outstanding task is completed first. Bit `i` of `visibility_mask`
    /// selects view `i` of the family; with `single_view` only the first
    /// visible view gets a buffer and it is shared by all views.
    /// `order_for_view` writes the draw order for a view into the buffer.
    /// Runs the fill inline when there is no pool or it has no workers; an
    /// inline fill is complete on return.
    pub fn build_view_fill_data_and_submit<O>(
        &mut self,
        pool: Option<&FillWorkerPool>,
        family: &ViewFamily,
        visibility_mask: u32,
        single_view: bool,
        vertex_count: usize,
        vertex_stride: usize,
        filler: Arc<dyn BufferFiller>,
        mut order_for_view: O,
    ) where
        O: FnMut(&SceneView, &mut Vec<ParticleOrder>),
    {
        self.complete();

        let mut used = 0;
        for (view_index, view) in family.views.iter().enumerate().take(32) {
            if visibility_mask & (1 << view_index) == 0 {
                continue;
            }
            if used >= self.buffers.len() {
                self.buffers.push(FillBuffer::new(view.clone()));
            }
            let buffer = &mut self.buffers[used];
            buffer.prepare(view, vertex_count, vertex_stride);
            buffer.order.clear();
            order_for_view(view, &mut buffer.order);
            used += 1;
            if single_view {
                break;
            }
        }
        self.buffers.truncate(used);
        if used == 0 {
            return;
        }

        let mut buffers = std::mem::take(&mut self.buffers);
        let (done_tx, done_rx) = bounded(1);
        let job: Job = Box::new(move || {
            for buffer in &mut buffers {
                filler.fill(buffer);
                buffer.index_count = buffer.indices.len();
            }
            // The receiver is gone only when the emitter was dropped.
            let _ = done_tx.send(buffers);
        });

        let job = match pool {
            Some(pool) => match pool.submit(job) {
                Ok(()) => None,
                Err((err, job)) => {
                    debug!("Filling inline: {}", err);
                    Some(job)
                },
            },
            None => Some(job),
        };
        self.task = Some(done_rx);
        if let Some(job) = job {
            job();
            self.complete();
        }
    }

    /// Waits for the outstanding task, if any, and takes its buffers back.
    pub fn complete(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        match task.recv() {
            Ok(buffers) => self.buffers = buffers,
            Err(_) => {
                error!("Fill task ended without returning its buffers");
                self.buffers.clear();
            },
        }
    }

    /// Completes the outstanding task and returns the buffer for `view`.
    ///
    /// Without an exact match the last buffer is returned, which is the
    /// shared buffer in single-view mode. `None` when nothing was built.
    pub fn ensure_fill_completion(&mut self, view: ViewId) -> Option<&FillBuffer> {
        self.complete();
        let last = self.buffers.len().checked_sub(1)?;
        let index = self.buffers[..last]
            .iter()
            .position(|b| b.view.id == view)
            .unwrap_or(last);
        self.buffers.get(index)
    }
}

impl Drop for AsyncFill {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFiller {
        calls: AtomicUsize,
        vertices: usize,
    }

    impl BufferFiller for CountingFiller {
        fn fill(&self, buffer: &mut FillBuffer) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            buffer
                .vertices
                .resize(self.vertices * buffer.vertex_stride, 0xab);
            buffer.indices.extend(0..self.vertices as u16);
            buffer.out_triangle_count = (self.vertices / 2) as u32;
        }
    }

    fn family(views: u32) -> ViewFamily {
        ViewFamily {
            views: (0..views)
                .map(|i| SceneView::look_at(ViewId::new(i), Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y))
                .collect(),
            frame_number: 1,
            current_time: 0.0,
        }
    }

    fn filler(vertices: usize) -> Arc<CountingFiller> {
        Arc::new(CountingFiller {
            calls: AtomicUsize::new(0),
            vertices,
        })
    }

    #[test]
    fn test_inline_fill_without_pool() {
        let mut fill = AsyncFill::new();
        let f = filler(4);
        fill.build_view_fill_data_and_submit(None, &family(1), 0b1, false, 4, 16, f.clone(), |_, _| {});
        assert!(!fill.is_outstanding());
        assert_eq!(fill.buffers().len(), 1);
        assert_eq!(fill.buffers()[0].index_count, 4);
        let buffer = fill.ensure_fill_completion(ViewId::new(0)).expect("built");
        assert_eq!(buffer.written_vertex_count(), 4);
        assert_eq!(buffer.index_count, 4);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_fill_per_view() {
        let pool = FillWorkerPool::new(2, 8).expect("spawn workers");
        let mut fill = AsyncFill::new();
        let f = filler(6);
        fill.build_view_fill_data_and_submit(Some(&pool), &family(3), 0b101, false, 6, 16, f.clone(), |_, _| {});
        assert!(fill.is_outstanding());
        let buffer = fill.ensure_fill_completion(ViewId::new(2)).expect("built");
        assert_eq!(buffer.view.id, ViewId::new(2));
        assert_eq!(fill.buffers().len(), 2);
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_single_view_shares_last_buffer() {
        let mut fill = AsyncFill::new();
        fill.build_view_fill_data_and_submit(None, &family(3), 0b111, true, 4, 16, filler(4), |_, _| {});
        assert_eq!(fill.buffers().len(), 1);
        let buffer = fill.ensure_fill_completion(ViewId::new(2)).expect("built");
        assert_eq!(buffer.view.id, ViewId::new(0));
    }

    #[test]
    fn test_double_submit_forces_completion() {
        let pool = FillWorkerPool::new(1, 4).expect("spawn workers");
        let mut fill = AsyncFill::new();
        let first = filler(8);
        let second = filler(64);
        let fam = family(1);
        fill.build_view_fill_data_and_submit(Some(&pool), &fam, 0b1, false, 8, 16, first.clone(), |_, _| {});
        fill.build_view_fill_data_and_submit(Some(&pool), &fam, 0b1, false, 64, 16, second.clone(), |_, _| {});
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        let buffer = fill.ensure_fill_completion(ViewId::new(0)).expect("built");
        assert!(buffer.vertex_count >= 64);
        assert!(buffer.vertex_capacity_bytes() >= 64 * 16);
        assert_eq!(buffer.written_vertex_count(), 64);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffers_are_grow_only() {
        let mut fill = AsyncFill::new();
        let fam = family(1);
        fill.build_view_fill_data_and_submit(None, &fam, 0b1, false, 32, 16, filler(32), |_, _| {});
        fill.complete();
        fill.build_view_fill_data_and_submit(None, &fam, 0b1, false, 4, 16, filler(4), |_, _| {});
        let buffer = fill.ensure_fill_completion(ViewId::new(0)).expect("built");
        assert_eq!(buffer.vertex_count, 32);
        assert_eq!(buffer.written_vertex_count(), 4);
    }

    #[test]
    fn test_nothing_visible() {
        let mut fill = AsyncFill::new();
        fill.build_view_fill_data_and_submit(None, &family(2), 0, false, 4, 16, filler(4), |_, _| {});
        assert!(fill.ensure_fill_completion(ViewId::new(0)).is_none());
    }

    #[test]
    fn test_order_written_per_view() {
        let mut fill = AsyncFill::new();
        fill.build_view_fill_data_and_submit(None, &family(2), 0b11, false, 4, 16, filler(4), |view, order| {
            order.push(ParticleOrder {
                particle_index: view.id.raw(),
                key: 0.0,
            });
        });
        let buffer = fill.ensure_fill_completion(ViewId::new(1)).expect("built");
        assert_eq!(buffer.order[0].particle_index, 1);
    }

    struct PanickingFiller;

    impl BufferFiller for PanickingFiller {
        fn fill(&self, _buffer: &mut FillBuffer) {
            panic!("filler failed");
        }
    }

    fn wait_until_idle(pool: &FillWorkerPool) {
        for _ in 0..200 {
            if pool.in_flight() == 0 {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("fill jobs still in flight");
    }

    #[test]
    fn test_full_queue_hands_job_back() {
        let pool = FillWorkerPool::new(1, 1).expect("spawn workers");
        let (release_tx, release_rx) = bounded::<()>(0);
        assert!(pool
            .submit(Box::new(move || {
                let _ = release_rx.recv();
            }))
            .is_ok());
        assert_eq!(pool.in_flight(), 1);

        match pool.submit(Box::new(|| {})) {
            Err((RenderError::FillQueueFull(1), job)) => job(),
            Err((err, _)) => panic!("unexpected error {err}"),
            Ok(()) => panic!("queue should be full"),
        }
        release_tx.send(()).expect("blocked job is waiting");
        wait_until_idle(&pool);
    }

    #[test]
    fn test_panicking_fill_drops_buffers() {
        let pool = FillWorkerPool::new(1, 4).expect("spawn workers");
        let mut fill = AsyncFill::new();
        fill.build_view_fill_data_and_submit(
            Some(&pool),
            &family(1),
            0b1,
            false,
            4,
            16,
            Arc::new(PanickingFiller),
            |_, _| {},
        );
        assert!(fill.ensure_fill_completion(ViewId::new(0)).is_none());
        wait_until_idle(&pool);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn test_shutdown_releases_workers() {
        let mut pool = FillWorkerPool::new(2, 4).expect("spawn workers");
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
        assert!(matches!(pool.submit(Box::new(|| {})), Err((RenderError::NoWorkers, _))));
    }

    #[test]
    fn test_zero_worker_pool_runs_inline() {
        let pool = FillWorkerPool::new(0, 4).expect("no threads to spawn");
        assert_eq!(pool.worker_count(), 0);
        let mut fill = AsyncFill::new();
        let f = filler(4);
        fill.build_view_fill_data_and_submit(Some(&pool), &family(1), 0b1, false, 4, 16, f.clone(), |_, _| {});
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert!(!fill.is_outstanding());
        assert_eq!(fill.buffers().len(), 1);
    }
}

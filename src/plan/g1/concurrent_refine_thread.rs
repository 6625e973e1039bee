use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use atomic::Atomic;

use super::dirty_card_queue::DirtyCardQueueSet;
use super::g1remset::G1RefineCardClosure;
use crate::context::G1RefinementContext;
use crate::scheduler::WorkerShouldExit;
use crate::util::constants::YOUNG_RS_SAMPLING_YIELD_INTERVAL;
use crate::util::lock_rank::{RankedCondvar, RankedMutex, WorkerMonitorRank};
use crate::util::os;
use crate::vm::VMBinding;

/// One concurrent refinement thread.
///
/// Refinement workers form a cascade: worker `i` wakes worker `i + 1` when the number of
/// completed buffers exceeds the latter's threshold, and a worker other than the first goes
/// back to sleep once the backlog drops to its deactivation threshold. Worker 0 waits on the
/// monitor of the dirty card queue set, so mutators wake it directly when they hand off
/// enough buffers. The thread past the last worker samples the remembered set lengths of
/// the young regions instead.
pub struct ConcurrentG1RefineThread {
    worker_id: usize,
    /// The worker this one activates. Index into the thread arena.
    next: Option<usize>,
    sampler: bool,
    threshold: AtomicUsize,
    deactivation_threshold: AtomicUsize,
    /// Guards `active`. Worker 0 keeps its activation in the queue set instead.
    monitor: RankedMutex<bool, WorkerMonitorRank>,
    monitor_cond: RankedCondvar,
    active: AtomicBool,
    should_terminate: AtomicBool,
    activations: AtomicUsize,
    vtime_accum: Atomic<f64>,
}

impl ConcurrentG1RefineThread {
    pub(crate) fn new(worker_id: usize, next: Option<usize>, sampler: bool) -> Self {
        Self {
            worker_id,
            next,
            sampler,
            threshold: AtomicUsize::new(0),
            deactivation_threshold: AtomicUsize::new(0),
            monitor: RankedMutex::new(false),
            monitor_cond: RankedCondvar::new(),
            active: AtomicBool::new(false),
            should_terminate: AtomicBool::new(false),
            activations: AtomicUsize::new(0),
            vtime_accum: Atomic::new(0.0),
        }
    }

    pub(crate) fn initialize(&self, threshold: usize, deactivation_threshold: usize) {
        self.threshold.store(threshold, Ordering::Relaxed);
        self.deactivation_threshold
            .store(deactivation_threshold, Ordering::Relaxed);
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn next(&self) -> Option<usize> {
        self.next
    }

    pub fn is_sampler(&self) -> bool {
        self.sampler
    }

    /// Activate this worker when the number of completed buffers goes above this.
    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Deactivate this worker when the number of completed buffers drops to this.
    pub fn deactivation_threshold(&self) -> usize {
        self.deactivation_threshold.load(Ordering::Relaxed)
    }

    /// How many times the worker woke up to process buffers.
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::Relaxed)
    }

    /// CPU seconds spent by the thread so far. Zero if the platform cannot tell.
    pub fn vtime_accum(&self) -> f64 {
        self.vtime_accum.load(Ordering::Relaxed)
    }

    pub fn should_terminate(&self) -> bool {
        self.should_terminate.load(Ordering::SeqCst)
    }

    pub fn is_active(&self, dcqs: &DirtyCardQueueSet) -> bool {
        if self.worker_id > 0 {
            self.active.load(Ordering::SeqCst)
        } else {
            dcqs.process_completed_buffers()
        }
    }

    pub(crate) fn activate(&self, dcqs: &DirtyCardQueueSet, trace: bool) {
        if self.worker_id > 0 {
            let mut active = self.monitor.lock();
            if trace {
                info!(
                    "G1-Refine-activated worker {}, on threshold {}, current {}",
                    self.worker_id,
                    self.threshold(),
                    dcqs.completed_buffers_num()
                );
            }
            *active = true;
            self.active.store(true, Ordering::SeqCst);
            self.monitor_cond.notify_all();
        } else {
            dcqs.set_process_completed(true);
        }
    }

    pub(crate) fn deactivate(&self, dcqs: &DirtyCardQueueSet, trace: bool) {
        if self.worker_id > 0 {
            let mut active = self.monitor.lock();
            if trace {
                info!(
                    "G1-Refine-deactivated worker {}, off threshold {}, current {}",
                    self.worker_id,
                    self.deactivation_threshold(),
                    dcqs.completed_buffers_num()
                );
            }
            *active = false;
            self.active.store(false, Ordering::SeqCst);
        } else {
            dcqs.set_process_completed(false);
        }
    }

    /// Park until activated or asked to terminate.
    fn wait_for_completed_buffers(&self, dcqs: &DirtyCardQueueSet) -> Result<(), WorkerShouldExit> {
        if self.worker_id == 0 {
            dcqs.wait_for_process_completed(|| self.should_terminate());
        } else {
            let mut active = self.monitor.lock();
            while !self.should_terminate() && !*active {
                active = self.monitor_cond.wait(active);
            }
        }
        if self.should_terminate() {
            Err(WorkerShouldExit)
        } else {
            Ok(())
        }
    }

    /// Ask the thread to exit and wake it up. The caller joins the OS thread.
    pub(crate) fn stop(&self, dcqs: &DirtyCardQueueSet) {
        self.should_terminate.store(true, Ordering::SeqCst);
        if self.worker_id == 0 && !self.sampler {
            dcqs.notify_all();
        } else {
            let _monitor = self.monitor.lock();
            self.monitor_cond.notify_all();
        }
    }
}

/// The body of a refinement thread.
pub(crate) fn run_service<VM: VMBinding>(ctx: &G1RefinementContext<VM>, index: usize) {
    let cg1r = ctx.concurrent_refine();
    let this = cg1r.thread(index);
    let vtime_start = os::thread_cpu_time_seconds();
    debug!("Refinement thread {} started", index);

    if this.is_sampler() {
        run_young_rs_sampling(ctx, this, vtime_start);
        debug!("Young RSet sampling thread exited");
        return;
    }

    let dcqs = ctx.dirty_card_queue_set();
    let trace = cg1r.trace_refinement();
    let closure = G1RefineCardClosure::for_worker(ctx);
    let worker_id = this.worker_id() + cg1r.worker_id_offset();

    while this.wait_for_completed_buffers(dcqs).is_ok() {
        this.activations.fetch_add(1, Ordering::Relaxed);
        {
            let _sts = ctx.suspendible_thread_set().join();
            loop {
                let n = dcqs.completed_buffers_num();
                if dcqs.completed_queue_padding() > 0 && n <= cg1r.yellow_zone() {
                    dcqs.set_completed_queue_padding(0);
                }
                if this.worker_id() > 0 && n <= this.deactivation_threshold() {
                    this.deactivate(dcqs, trace);
                    break;
                }
                if let Some(next) = this.next().map(|i| cg1r.thread(i)) {
                    if !next.is_active(dcqs) && n > next.threshold() {
                        next.activate(dcqs, trace);
                    }
                }
                if !dcqs.apply_closure_to_completed_buffer(&closure, worker_id, cg1r.green_zone()) {
                    break;
                }
            }
            if this.is_active(dcqs) {
                this.deactivate(dcqs, trace);
            }
        }
        if os::supports_vtime() {
            this.vtime_accum
                .store(os::thread_cpu_time_seconds() - vtime_start, Ordering::Relaxed);
        }
    }
    debug!("Refinement worker {} exited", this.worker_id());
}

fn run_young_rs_sampling<VM: VMBinding>(
    ctx: &G1RefinementContext<VM>,
    this: &ConcurrentG1RefineThread,
    vtime_start: f64,
) {
    let interval = Duration::from_millis(ctx.options().g1_conc_refinement_service_interval_millis);
    while !this.should_terminate() {
        sample_young_list_rs_lengths(ctx);
        if os::supports_vtime() {
            this.vtime_accum
                .store(os::thread_cpu_time_seconds() - vtime_start, Ordering::Relaxed);
        }
        let monitor = this.monitor.lock();
        if this.should_terminate() {
            break;
        }
        let _ = this.monitor_cond.wait_timeout(monitor, interval);
    }
}

fn sample_young_list_rs_lengths<VM: VMBinding>(ctx: &G1RefinementContext<VM>) {
    let sts = ctx.suspendible_thread_set().join();
    let binding = ctx.binding();
    if !binding.adaptive_young_list_length() {
        return;
    }
    let mut rs_lengths = 0;
    let mut regions_visited = 0;
    for region in ctx.regions().young_regions() {
        rs_lengths += region.rem_set().occupied();
        regions_visited += 1;
        if regions_visited == YOUNG_RS_SAMPLING_YIELD_INTERVAL {
            if sts.should_yield() {
                sts.yield_now();
                // The young list may have changed under the pause. Use what we have.
                break;
            }
            regions_visited = 0;
        }
    }
    trace!("Sampled young RSet lengths: {}", rs_lengths);
    binding.revise_young_list_target_length_if_necessary(rs_lengths);
}

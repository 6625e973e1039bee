use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use enum_map::{enum_map, Enum, EnumMap};
use strum_macros::EnumIter;

use super::concurrent_refine_thread::{run_service, ConcurrentG1RefineThread};
use super::dirty_card_queue::DirtyCardQueueSet;
use crate::context::G1RefinementContext;
use crate::util::lock_rank::{LeafRank, RankedMutex};
use crate::util::options::{ConfigError, Options, ThresholdStep};
use crate::vm::VMBinding;

/// The backlog of completed buffers is measured against three zones.
///
/// * Below green, no refinement thread runs; the buffers are left for the next pause.
/// * Between green and yellow, more and more refinement workers are activated.
/// * Above red, mutators refine their own buffers instead of handing them off.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumIter)]
pub enum Zone {
    Green,
    Yellow,
    Red,
}

/// Concurrent refinement: the zones, the workers' thresholds and the thread arena.
///
/// The arena holds `G1ConcRefinementThreads` refinement workers followed by one young RSet
/// sampling thread. Workers refer to the next worker of the cascade by index.
pub struct ConcurrentG1Refine {
    zones: EnumMap<Zone, AtomicUsize>,
    threshold_step: ThresholdStep,
    thread_threshold_step: AtomicUsize,
    n_worker_threads: usize,
    /// Added to worker ids handed to refinement closures, past the par ids of mutators.
    worker_id_offset: usize,
    threads: Box<[ConcurrentG1RefineThread]>,
    use_adaptive: bool,
    trace: bool,
    handles: RankedMutex<Vec<JoinHandle<()>>, LeafRank>,
}

impl ConcurrentG1Refine {
    pub fn new(options: &Options, worker_id_offset: usize) -> Result<Self, ConfigError> {
        let green = options.g1_conc_refinement_green_zone;
        let yellow = options.g1_conc_refinement_yellow_zone;
        let red = options.g1_conc_refinement_red_zone;
        if !(green <= yellow && yellow <= red) {
            return Err(ConfigError::ZonesOutOfOrder { green, yellow, red });
        }
        if options.g1_conc_refinement_threshold_step == ThresholdStep::Fixed(0) {
            return Err(ConfigError::ZeroThresholdStep);
        }

        let n_worker_threads = match options.g1_conc_refinement_threads {
            0 => num_cpus::get(),
            n => n,
        };
        let threads = (0..=n_worker_threads)
            .map(|i| {
                let next = (i + 1 < n_worker_threads).then_some(i + 1);
                ConcurrentG1RefineThread::new(i, next, i == n_worker_threads)
            })
            .collect();

        let cg1r = Self {
            zones: enum_map! {
                Zone::Green => AtomicUsize::new(green),
                Zone::Yellow => AtomicUsize::new(yellow),
                Zone::Red => AtomicUsize::new(red),
            },
            threshold_step: options.g1_conc_refinement_threshold_step,
            thread_threshold_step: AtomicUsize::new(1),
            n_worker_threads,
            worker_id_offset,
            threads,
            use_adaptive: options.g1_use_adaptive_conc_refinement,
            trace: options.g1_trace_conc_refinement,
            handles: RankedMutex::new(vec![]),
        };
        cg1r.reinitialize_threads();
        Ok(cg1r)
    }

    pub fn zone(&self, zone: Zone) -> usize {
        self.zones[zone].load(Ordering::Relaxed)
    }

    pub fn set_zone(&self, zone: Zone, value: usize) {
        self.zones[zone].store(value, Ordering::Relaxed);
    }

    pub fn green_zone(&self) -> usize {
        self.zone(Zone::Green)
    }

    pub fn yellow_zone(&self) -> usize {
        self.zone(Zone::Yellow)
    }

    pub fn red_zone(&self) -> usize {
        self.zone(Zone::Red)
    }

    /// The zone a backlog of `completed_buffers` falls into.
    pub fn zone_of(&self, completed_buffers: usize) -> Zone {
        if completed_buffers >= self.red_zone() {
            Zone::Red
        } else if completed_buffers > self.green_zone() {
            Zone::Yellow
        } else {
            Zone::Green
        }
    }

    pub fn thread_threshold_step(&self) -> usize {
        self.thread_threshold_step.load(Ordering::Relaxed)
    }

    fn reset_threshold_step(&self) {
        let step = match self.threshold_step {
            ThresholdStep::Auto => ((self.yellow_zone() - self.green_zone())
                / (self.n_worker_threads + 1))
                .max(1),
            ThresholdStep::Fixed(step) => step,
        };
        self.thread_threshold_step.store(step, Ordering::Relaxed);
    }

    /// Recompute the step and every worker's thresholds from the current zones.
    pub fn reinitialize_threads(&self) {
        self.reset_threshold_step();
        let step = self.thread_threshold_step();
        let green = self.green_zone();
        let yellow = self.yellow_zone();
        for thread in self.threads.iter().filter(|t| !t.is_sampler()) {
            let threshold = (green + thread.worker_id() * step).min(yellow);
            let deactivation_threshold = threshold.saturating_sub(step).max(green);
            thread.initialize(threshold, deactivation_threshold);
        }
    }

    /// Number of refinement workers, not counting the sampling thread.
    pub fn worker_thread_num(&self) -> usize {
        self.n_worker_threads
    }

    /// Number of threads, including the sampling thread.
    pub fn thread_num(&self) -> usize {
        self.threads.len()
    }

    pub fn worker_id_offset(&self) -> usize {
        self.worker_id_offset
    }

    pub fn thread(&self, index: usize) -> &ConcurrentG1RefineThread {
        &self.threads[index]
    }

    pub fn threads_do<F: FnMut(&ConcurrentG1RefineThread)>(&self, f: F) {
        self.threads.iter().for_each(f)
    }

    pub fn sampling_thread(&self) -> &ConcurrentG1RefineThread {
        &self.threads[self.n_worker_threads]
    }

    pub fn trace_refinement(&self) -> bool {
        self.trace
    }

    pub fn use_adaptive(&self) -> bool {
        self.use_adaptive
    }

    /// CPU seconds spent by all refinement threads.
    pub fn total_vtime(&self) -> f64 {
        self.threads.iter().map(|t| t.vtime_accum()).sum()
    }

    pub fn print_worker_threads(&self, dcqs: &DirtyCardQueueSet) {
        info!(
            "Concurrent refinement zones: green {}, yellow {}, red {}, step {}",
            self.green_zone(),
            self.yellow_zone(),
            self.red_zone(),
            self.thread_threshold_step()
        );
        for thread in self.threads.iter() {
            if thread.is_sampler() {
                info!(
                    "  G1 Young RemSet Sampling: vtime {:.3}s",
                    thread.vtime_accum()
                );
            } else {
                info!(
                    "  G1 Refine#{}: active {}, threshold {}, deactivation threshold {}, \
                     activations {}, vtime {:.3}s",
                    thread.worker_id(),
                    thread.is_active(dcqs),
                    thread.threshold(),
                    thread.deactivation_threshold(),
                    thread.activations(),
                    thread.vtime_accum()
                );
            }
        }
    }

    /// Refresh the queue set's mutator-side thresholds from the zones.
    pub fn update_dcqs_thresholds(&self, dcqs: &DirtyCardQueueSet) {
        dcqs.set_process_completed_threshold((self.green_zone() + 1).min(self.yellow_zone()));
        dcqs.set_max_completed_queue(self.red_zone());
    }

    /// Adapt the zones to the last pause.
    ///
    /// `update_rs_time_ms` is how long the pause spent refining the leftover buffers, of which
    /// there were `processed_buffers`. If that took longer than `goal_ms`, more refinement is
    /// moved out of the pause by lowering the green zone; if it was well within the goal and
    /// the pause processed more buffers than the green zone, the green zone grows.
    pub fn adjust(
        &self,
        update_rs_time_ms: f64,
        processed_buffers: usize,
        goal_ms: f64,
        dcqs: &DirtyCardQueueSet,
    ) {
        if self.use_adaptive {
            const K_GY: usize = 3;
            const K_GR: usize = 6;
            const INC_K: f64 = 1.1;
            const DEC_K: f64 = 0.9;

            let mut green = self.green_zone();
            if update_rs_time_ms > goal_ms {
                // May become 0: mutators do all the refinement.
                green = (green as f64 * DEC_K) as usize;
            } else if update_rs_time_ms < goal_ms && processed_buffers > green {
                green = ((green as f64 * INC_K) as usize).max(green + 1);
            }
            self.set_zone(Zone::Green, green);
            self.set_zone(Zone::Yellow, green * K_GY);
            self.set_zone(Zone::Red, green * K_GR);
            self.reinitialize_threads();
            self.update_dcqs_thresholds(dcqs);
            debug!(
                "Adjusted refinement zones: green {}, yellow {}, red {}",
                green,
                green * K_GY,
                green * K_GR
            );
        }
        self.update_padding(dcqs);
        dcqs.notify_if_necessary();
    }

    /// Leave headroom for mutators while a backlog past the yellow zone is worked off.
    pub fn update_padding(&self, dcqs: &DirtyCardQueueSet) {
        let n = dcqs.completed_buffers_num();
        dcqs.set_completed_queue_padding(if n >= self.yellow_zone() { n } else { 0 });
    }

    /// Spawn every refinement thread. Does nothing if they are already running.
    pub(crate) fn start_threads<VM: VMBinding>(
        &self,
        ctx: &Arc<G1RefinementContext<VM>>,
    ) -> std::io::Result<()> {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return Ok(());
        }
        for (index, thread) in self.threads.iter().enumerate() {
            let name = if thread.is_sampler() {
                "G1 Young RemSet Sampling".to_string()
            } else {
                format!("G1 Refine#{}", thread.worker_id())
            };
            let ctx = ctx.clone();
            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || run_service(&ctx, index))?;
            handles.push(handle);
        }
        debug!("Started {} refinement threads", handles.len());
        Ok(())
    }

    /// Ask every thread to terminate and wait for them.
    pub(crate) fn stop(&self, dcqs: &DirtyCardQueueSet) {
        for thread in self.threads.iter() {
            thread.stop(dcqs);
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("A refinement thread panicked");
            }
        }
    }
}

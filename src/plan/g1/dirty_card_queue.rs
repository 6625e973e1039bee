//! Dirty card queues and the queue set they hand their buffers to.
//!
//! Every mutator owns a [`DirtyCardQueue`]. The write barrier pushes the cards it dirties onto
//! that queue; once the queue's buffer is full it is handed to the [`DirtyCardQueueSet`] as a
//! completed buffer, where refinement workers pick it up. Threads that are not mutators share a
//! single queue owned by the queue set.
//!
//! Queue cursors count bytes and run downwards: a queue with `index == 0` is full, and a queue
//! whose `index` equals its capacity is empty.

use std::collections::LinkedList;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::policy::region::Card;
use crate::util::constants::BYTES_IN_CARD_SLOT;
use crate::util::free_id_set::FreeIdSet;
use crate::util::lock_rank::*;

/// The storage of a dirty card queue. Empty slots hold `None`.
pub type CardBuffer = Box<[Option<Card>]>;

/// Applied to the cards of a buffer, with the id of the applying worker.
///
/// Returning false asks the caller to stop processing, e.g. because a pause wants the
/// applying thread to yield.
pub trait CardTableEntryClosure {
    fn do_card_ptr(&self, card: Card, worker_id: usize) -> bool;
}

impl<F: Fn(Card, usize) -> bool> CardTableEntryClosure for F {
    fn do_card_ptr(&self, card: Card, worker_id: usize) -> bool {
        self(card, worker_id)
    }
}

/// What a queue consults when its buffer fills up.
pub trait CardQueueHooks {
    /// Should a card stay in a full buffer? Only asked when buffer filtering is enabled.
    fn retain_card(&self, _card: Card) -> bool {
        true
    }

    /// The closure a mutator uses to refine a full buffer itself under back-pressure. `None`
    /// for threads that are not mutators; they always hand their buffers off.
    fn mutator_closure(&self) -> Option<&dyn CardTableEntryClosure> {
        None
    }
}

/// Hooks for threads that are not mutators and do not filter.
pub struct NonMutatorHooks;

impl CardQueueHooks for NonMutatorHooks {}

#[inline(always)]
const fn byte_index_to_index(index: usize) -> usize {
    index / BYTES_IN_CARD_SLOT
}

/// Apply `cl` to the entries of `buf` starting at byte index `index`. With `consume`, every
/// entry is cleared before the closure sees it, so a buffer that is re-enqueued after a yield
/// resumes where it stopped.
pub fn apply_closure_to_buffer(
    cl: &dyn CardTableEntryClosure,
    buf: &mut [Option<Card>],
    index: usize,
    consume: bool,
    worker_id: usize,
) -> bool {
    for slot in buf[byte_index_to_index(index)..].iter_mut() {
        if let Some(card) = *slot {
            if consume {
                *slot = None;
            }
            if !cl.do_card_ptr(card, worker_id) {
                return false;
            }
        }
    }
    true
}

/// A buffer in the completed list, with the byte index of its first entry.
pub struct BufferNode {
    index: usize,
    buffer: CardBuffer,
}

impl BufferNode {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cards(&self) -> impl Iterator<Item = Card> + '_ {
        self.buffer[byte_index_to_index(self.index)..]
            .iter()
            .filter_map(|slot| *slot)
    }
}

/// A thread-local log of dirtied cards.
#[derive(Default)]
pub struct DirtyCardQueue {
    buf: Option<CardBuffer>,
    /// Byte index of the last pushed entry.
    index: usize,
    /// Capacity of `buf` in bytes.
    sz: usize,
}

impl DirtyCardQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `card`. Hands the buffer off through `qset` first if it is full.
    pub fn enqueue(&mut self, card: Card, qset: &DirtyCardQueueSet, hooks: &dyn CardQueueHooks) {
        if !qset.is_active() {
            return;
        }
        while self.index == 0 {
            self.handle_zero_index(qset, hooks);
        }
        self.push(card);
    }

    #[inline(always)]
    fn push(&mut self, card: Card) {
        debug_assert!(self.index >= BYTES_IN_CARD_SLOT);
        self.index -= BYTES_IN_CARD_SLOT;
        let i = byte_index_to_index(self.index);
        if let Some(buf) = self.buf.as_mut() {
            buf[i] = Some(card);
        }
    }

    fn install(&mut self, buf: CardBuffer) {
        self.sz = buf.len() * BYTES_IN_CARD_SLOT;
        self.index = self.sz;
        self.buf = Some(buf);
    }

    fn handle_zero_index(&mut self, qset: &DirtyCardQueueSet, hooks: &dyn CardQueueHooks) {
        if self.buf.is_some() && !self.should_enqueue_buffer(qset, hooks) {
            // Filtering freed enough room; keep the buffer.
            return;
        }
        if let Some(buf) = self.buf.take() {
            let index = std::mem::replace(&mut self.index, 0);
            if let Some(buf) = qset.process_or_enqueue_complete_buffer(buf, index, hooks) {
                // Refined in place by the mutator. Reuse it.
                self.install(buf);
                return;
            }
        }
        self.install(qset.allocate_buffer());
    }

    /// Drop the entries of a full buffer whose cards `hooks` no longer wants, compacting the
    /// survivors towards the end. Returns whether the buffer should still be handed off.
    fn should_enqueue_buffer(&mut self, qset: &DirtyCardQueueSet, hooks: &dyn CardQueueHooks) -> bool {
        if !qset.filter_buffers {
            return true;
        }
        let Some(buf) = self.buf.as_mut() else {
            return true;
        };
        let mut dst = buf.len();
        for src in (byte_index_to_index(self.index)..buf.len()).rev() {
            if let Some(card) = buf[src].take() {
                if hooks.retain_card(card) {
                    dst -= 1;
                    buf[dst] = Some(card);
                }
            }
        }
        self.index = dst * BYTES_IN_CARD_SLOT;
        if self.index == 0 {
            return true;
        }
        let percent_used = (self.sz - self.index) * 100 / self.sz;
        percent_used > qset.enqueue_threshold_percent
    }

    /// Number of cards in the queue.
    pub fn size(&self) -> usize {
        if self.buf.is_some() {
            byte_index_to_index(self.sz - self.index)
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Discard the logged cards but keep the buffer.
    pub fn reset(&mut self) {
        if self.buf.is_some() {
            self.index = self.sz;
        }
    }

    fn take_buffer(&mut self) -> Option<(CardBuffer, usize)> {
        let buf = self.buf.take()?;
        Some((buf, std::mem::replace(&mut self.index, 0)))
    }

    /// Hand a partially filled buffer to `qset`, or give an empty one back to its free list.
    pub fn flush(&mut self, qset: &DirtyCardQueueSet) {
        if let Some((buf, index)) = self.take_buffer() {
            qset.complete_partial_buffer(buf, index);
        }
    }
}

/// The completed buffers, oldest first. Guarded by the queue set's monitor.
#[derive(Default)]
struct CompletedBufferList {
    buffers: LinkedList<BufferNode>,
}

/// Thresholds given to a [`DirtyCardQueueSet`] at creation.
#[derive(Clone, Debug)]
pub struct DirtyCardQueueSetConfig {
    /// Card slots per buffer.
    pub buffer_size: usize,
    /// Backlog from which `process_completed` is raised. `usize::MAX`: never.
    pub process_completed_threshold: usize,
    /// Backlog from which mutators refine their own buffers. `usize::MAX`: never.
    pub max_completed_queue: usize,
    /// Notify the monitor when `process_completed` is raised.
    pub notify_when_complete: bool,
    /// Number of ids mutators may claim for in-place refinement. Zero disables the mutator path.
    pub num_par_ids: usize,
    pub filter_buffers: bool,
    pub enqueue_threshold_percent: usize,
}

/// A set of dirty card queues: the list of completed buffers, the buffer free list, the shared
/// queue, and the thresholds that decide who processes buffers.
pub struct DirtyCardQueueSet {
    buffer_size: usize,
    /// The completed buffer list. Its condition variable is also the monitor refinement worker 0
    /// waits on.
    cbl_mon: RankedMutex<CompletedBufferList, CompletedBufferListRank>,
    cbl_cond: RankedCondvar,
    /// Length of the completed list. Only written under `cbl_mon`.
    n_completed_buffers: AtomicUsize,
    /// Set when the backlog reached `process_completed_threshold`; cleared when a worker drains
    /// down to its stop point. Only written under `cbl_mon`.
    process_completed: AtomicBool,
    process_completed_threshold: AtomicUsize,
    max_completed_queue: AtomicUsize,
    /// Extra backlog tolerated before mutators refine, e.g. right after a pause.
    completed_queue_padding: AtomicUsize,
    notify_when_complete: bool,
    all_active: AtomicBool,
    free_list: RankedMutex<Vec<CardBuffer>, FreeListRank>,
    free_ids: Option<FreeIdSet>,
    shared_dcq: RankedMutex<DirtyCardQueue, SharedQueueRank>,
    processed_buffers_mut: AtomicUsize,
    processed_buffers_rs_thread: AtomicUsize,
    filter_buffers: bool,
    enqueue_threshold_percent: usize,
}

impl DirtyCardQueueSet {
    pub fn new(config: DirtyCardQueueSetConfig) -> Self {
        assert!(config.buffer_size > 0);
        Self {
            buffer_size: config.buffer_size,
            cbl_mon: RankedMutex::default(),
            cbl_cond: RankedCondvar::new(),
            n_completed_buffers: AtomicUsize::new(0),
            process_completed: AtomicBool::new(false),
            process_completed_threshold: AtomicUsize::new(config.process_completed_threshold),
            max_completed_queue: AtomicUsize::new(config.max_completed_queue),
            completed_queue_padding: AtomicUsize::new(0),
            notify_when_complete: config.notify_when_complete,
            all_active: AtomicBool::new(true),
            free_list: RankedMutex::default(),
            free_ids: (config.num_par_ids > 0).then(|| FreeIdSet::new(config.num_par_ids)),
            shared_dcq: RankedMutex::new(DirtyCardQueue::new()),
            processed_buffers_mut: AtomicUsize::new(0),
            processed_buffers_rs_thread: AtomicUsize::new(0),
            filter_buffers: config.filter_buffers,
            enqueue_threshold_percent: config.enqueue_threshold_percent,
        }
    }

    /// Card slots per buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn num_par_ids(&self) -> usize {
        self.free_ids.as_ref().map_or(0, |ids| ids.size())
    }

    pub fn is_active(&self) -> bool {
        self.all_active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.all_active.store(active, Ordering::Relaxed);
    }

    // Buffer pool

    pub fn allocate_buffer(&self) -> CardBuffer {
        let recycled = self.free_list.lock().pop();
        recycled.unwrap_or_else(|| vec![None; self.buffer_size].into_boxed_slice())
    }

    pub fn deallocate_buffer(&self, buf: CardBuffer) {
        debug_assert_eq!(buf.len(), self.buffer_size);
        self.free_list.lock().push(buf);
    }

    pub fn free_list_len(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Release half of the free list.
    pub fn reduce_free_list(&self) {
        let mut free_list = self.free_list.lock();
        let keep = free_list.len() - free_list.len() / 2;
        free_list.truncate(keep);
        free_list.shrink_to_fit();
    }

    // Completed buffers

    pub fn completed_buffers_num(&self) -> usize {
        self.n_completed_buffers.load(Ordering::SeqCst)
    }

    /// Refine a full buffer on the calling mutator if the backlog is past the red zone;
    /// otherwise hand it to the completed list. Returns the buffer if the caller may reuse it.
    pub fn process_or_enqueue_complete_buffer(
        &self,
        mut buf: CardBuffer,
        index: usize,
        hooks: &dyn CardQueueHooks,
    ) -> Option<CardBuffer> {
        if let Some(cl) = hooks.mutator_closure() {
            let max = self.max_completed_queue();
            let limit = max.saturating_add(self.completed_queue_padding());
            if max == 0 || self.completed_buffers_num() >= limit {
                if self.mut_process_buffer(&mut buf, index, cl) {
                    return Some(buf);
                }
            }
        }
        self.enqueue_complete_buffer(buf, index);
        None
    }

    /// Refine a buffer on the calling mutator under a claimed par id.
    fn mut_process_buffer(
        &self,
        buf: &mut [Option<Card>],
        index: usize,
        cl: &dyn CardTableEntryClosure,
    ) -> bool {
        let Some(free_ids) = self.free_ids.as_ref() else {
            return false;
        };
        let worker_id = free_ids.claim_par_id();
        let processed = apply_closure_to_buffer(cl, buf, index, false, worker_id);
        if processed {
            self.processed_buffers_mut.fetch_add(1, Ordering::Relaxed);
        }
        free_ids.release_par_id(worker_id);
        processed
    }

    pub fn enqueue_complete_buffer(&self, buffer: CardBuffer, index: usize) {
        debug_assert_eq!(buffer.len(), self.buffer_size);
        let mut cbl = self.cbl_mon.lock();
        cbl.buffers.push_back(BufferNode { index, buffer });
        let n = self.n_completed_buffers.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert_eq!(cbl.buffers.len(), n);
        if !self.process_completed.load(Ordering::SeqCst)
            && n >= self.process_completed_threshold.load(Ordering::Relaxed)
        {
            self.process_completed.store(true, Ordering::SeqCst);
            if self.notify_when_complete {
                self.cbl_cond.notify_all();
            }
        }
    }

    /// Null out the unused slots of a partially filled buffer and hand it off, or give an
    /// empty buffer back to the free list.
    fn complete_partial_buffer(&self, mut buf: CardBuffer, index: usize) {
        let sz = buf.len() * BYTES_IN_CARD_SLOT;
        if index == sz {
            self.deallocate_buffer(buf);
        } else {
            for slot in buf[..byte_index_to_index(index)].iter_mut() {
                *slot = None;
            }
            self.enqueue_complete_buffer(buf, index);
        }
    }

    fn get_completed_buffer(&self, stop_at: usize) -> Option<BufferNode> {
        let mut cbl = self.cbl_mon.lock();
        if self.n_completed_buffers.load(Ordering::SeqCst) <= stop_at {
            self.process_completed.store(false, Ordering::SeqCst);
            return None;
        }
        let node = cbl.buffers.pop_front();
        if node.is_some() {
            self.n_completed_buffers.fetch_sub(1, Ordering::SeqCst);
        }
        debug_assert_eq!(cbl.buffers.len(), self.completed_buffers_num());
        node
    }

    /// Take one completed buffer, provided more than `stop_at` are queued, and apply `cl` to
    /// it. Returns true if a whole buffer was processed. If `cl` asks to stop, the rest of the
    /// buffer goes back on the completed list and false is returned.
    pub fn apply_closure_to_completed_buffer(
        &self,
        cl: &dyn CardTableEntryClosure,
        worker_id: usize,
        stop_at: usize,
    ) -> bool {
        let Some(BufferNode { index, mut buffer }) = self.get_completed_buffer(stop_at) else {
            return false;
        };
        if apply_closure_to_buffer(cl, &mut buffer, index, true, worker_id) {
            self.deallocate_buffer(buffer);
            self.processed_buffers_rs_thread
                .fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.enqueue_complete_buffer(buffer, index);
            false
        }
    }

    /// Apply `f` to every card of every completed buffer without removing anything.
    pub fn apply_closure_to_all_completed_buffers<F: FnMut(Card)>(&self, mut f: F) {
        let cbl = self.cbl_mon.lock();
        for node in cbl.buffers.iter() {
            node.cards().for_each(&mut f);
        }
    }

    /// Move every completed buffer of `src` to the end of this set's list.
    pub fn merge_bufferlists(&self, src: &DirtyCardQueueSet) {
        debug_assert!(!std::ptr::eq(self, src));
        let mut taken = {
            let mut src_cbl = src.cbl_mon.lock();
            src.n_completed_buffers.store(0, Ordering::SeqCst);
            std::mem::take(&mut src_cbl.buffers)
        };
        let mut cbl = self.cbl_mon.lock();
        let n = taken.len();
        cbl.buffers.append(&mut taken);
        self.n_completed_buffers.fetch_add(n, Ordering::SeqCst);
        debug_assert_eq!(cbl.buffers.len(), self.completed_buffers_num());
    }

    /// Discard every completed buffer.
    pub fn clear(&self) {
        let drained = {
            let mut cbl = self.cbl_mon.lock();
            self.n_completed_buffers.store(0, Ordering::SeqCst);
            std::mem::take(&mut cbl.buffers)
        };
        for node in drained {
            self.deallocate_buffer(node.buffer);
        }
    }

    #[cfg(feature = "extreme_assertions")]
    pub fn verify_completed_buffers(&self) {
        let cbl = self.cbl_mon.lock();
        assert_eq!(cbl.buffers.len(), self.completed_buffers_num());
        for node in cbl.buffers.iter() {
            assert!(node.index <= node.buffer.len() * BYTES_IN_CARD_SLOT);
        }
    }

    // Activation of processing

    pub fn process_completed_buffers(&self) -> bool {
        self.process_completed.load(Ordering::SeqCst)
    }

    /// Raise or clear `process_completed`. Raising it wakes threads waiting on the monitor.
    pub fn set_process_completed(&self, value: bool) {
        let _cbl = self.cbl_mon.lock();
        self.process_completed.store(value, Ordering::SeqCst);
        if value {
            self.cbl_cond.notify_all();
        }
    }

    pub fn notify_if_necessary(&self) {
        let _cbl = self.cbl_mon.lock();
        if self.completed_buffers_num() >= self.process_completed_threshold()
            || self.max_completed_queue() == 0
        {
            self.process_completed.store(true, Ordering::SeqCst);
            if self.notify_when_complete {
                self.cbl_cond.notify_all();
            }
        }
    }

    /// Wake every thread waiting on the monitor, e.g. to let it observe a termination request.
    pub fn notify_all(&self) {
        let _cbl = self.cbl_mon.lock();
        self.cbl_cond.notify_all();
    }

    /// Block on the monitor until `process_completed` is raised or `should_stop` holds.
    /// `should_stop` is evaluated under the monitor.
    pub fn wait_for_process_completed<F: Fn() -> bool>(&self, should_stop: F) {
        let mut cbl = self.cbl_mon.lock();
        while !should_stop() && !self.process_completed.load(Ordering::SeqCst) {
            cbl = self.cbl_cond.wait(cbl);
        }
    }

    pub fn process_completed_threshold(&self) -> usize {
        self.process_completed_threshold.load(Ordering::Relaxed)
    }

    pub fn set_process_completed_threshold(&self, threshold: usize) {
        self.process_completed_threshold
            .store(threshold, Ordering::Relaxed);
    }

    pub fn max_completed_queue(&self) -> usize {
        self.max_completed_queue.load(Ordering::Relaxed)
    }

    pub fn set_max_completed_queue(&self, max: usize) {
        self.max_completed_queue.store(max, Ordering::Relaxed);
    }

    pub fn completed_queue_padding(&self) -> usize {
        self.completed_queue_padding.load(Ordering::Relaxed)
    }

    pub fn set_completed_queue_padding(&self, padding: usize) {
        self.completed_queue_padding
            .store(padding, Ordering::Relaxed);
    }

    pub fn processed_buffers_mut(&self) -> usize {
        self.processed_buffers_mut.load(Ordering::Relaxed)
    }

    pub fn processed_buffers_rs_thread(&self) -> usize {
        self.processed_buffers_rs_thread.load(Ordering::Relaxed)
    }

    // The shared queue

    /// Log `card` on the queue shared by all threads that are not mutators.
    pub fn enqueue_shared(&self, card: Card, hooks: &dyn CardQueueHooks) {
        if !self.is_active() {
            return;
        }
        let mut dcq = self.shared_dcq.lock();
        while dcq.index == 0 {
            if dcq.buf.is_some() && !dcq.should_enqueue_buffer(self, hooks) {
                continue;
            }
            if let Some((buf, index)) = dcq.take_buffer() {
                // The completed list ranks below the shared queue lock.
                drop(dcq);
                self.enqueue_complete_buffer(buf, index);
                dcq = self.shared_dcq.lock();
                if dcq.buf.is_some() {
                    // Another thread installed a buffer meanwhile. Use it.
                    continue;
                }
            }
            let buf = self.allocate_buffer();
            dcq.install(buf);
        }
        dcq.push(card);
    }

    /// Hand the shared queue's partial buffer off.
    pub fn flush_shared_dirty_card_queue(&self) {
        let taken = self.shared_dcq.lock().take_buffer();
        if let Some((buf, index)) = taken {
            self.complete_partial_buffer(buf, index);
        }
    }

    pub fn shared_dirty_card_queue_size(&self) -> usize {
        self.shared_dcq.lock().size()
    }

    pub fn reset_shared_dirty_card_queue(&self) {
        self.shared_dcq.lock().reset();
    }
}

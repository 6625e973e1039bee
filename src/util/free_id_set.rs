use crate::util::lock_rank::{LeafRank, RankedCondvar, RankedMutex};

/// A set of small integer ids, `0..size`, that threads claim for the duration of some parallel
/// work and then give back. Mutators use it to get a worker id while they refine a buffer
/// themselves, so per-worker statistics never see two threads with the same id.
pub struct FreeIdSet {
    size: usize,
    free: RankedMutex<Vec<usize>, LeafRank>,
    id_released: RankedCondvar,
}

impl FreeIdSet {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "FreeIdSet needs at least one id");
        Self {
            size,
            // Lowest ids are handed out first.
            free: RankedMutex::new((0..size).rev().collect()),
            id_released: RankedCondvar::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Claim an id, blocking until one is available.
    pub fn claim_par_id(&self) -> usize {
        let mut free = self.free.lock();
        loop {
            if let Some(id) = free.pop() {
                return id;
            }
            free = self.id_released.wait(free);
        }
    }

    /// Claim an id without blocking.
    pub fn try_claim_par_id(&self) -> Option<usize> {
        self.free.lock().pop()
    }

    pub fn release_par_id(&self, id: usize) {
        debug_assert!(id < self.size);
        let mut free = self.free.lock();
        debug_assert!(!free.contains(&id), "par id {} released twice", id);
        free.push(id);
        self.id_released.notify_one();
    }

    pub fn num_free(&self) -> usize {
        self.free.lock().len()
    }
}

//! Byte accounting model of a paced heap.
//!
//! A VM reports allocations through [`AccountingHeap::record_allocation`], collects
//! when told to and reports the size marking found reachable through
//! [`AccountingHeap::finish_cycle`]. The heap turns the pacing ratio and the memory
//! ceiling into the next collection threshold, and runs cycle hooks at the end of
//! every cycle. It implements every collector trait the pacer needs.

use std::sync::atomic::{AtomicI32, AtomicU64};

use atomic::{Atomic, Ordering};
use parking_lot::Mutex;

use crate::{
    calculator::DEFAULT_RATIO,
    collector::{CollectorApplier, CycleEvents, CycleHook, Unsupported},
    error::ProbeError,
    probe::MemoryProbe,
    util::{formatted_size, MB},
};

pub struct HeapOptions {
    /// Memory the heap may use in total. `None` asks the system.
    pub capacity: Option<u64>,
    /// The collection threshold never drops under this.
    pub min_heap_size: u64,
    pub initial_ratio: i32,
    /// Honour an absolute memory ceiling next to the ratio.
    pub memory_ceiling: bool,
    /// Log every cycle.
    pub verbose: bool,
}

impl Default for HeapOptions {
    fn default() -> Self {
        Self {
            capacity: None,
            min_heap_size: 4 * MB,
            initial_ratio: DEFAULT_RATIO,
            memory_ceiling: false,
            verbose: false,
        }
    }
}

pub struct AccountingHeap {
    /// Live bytes after the last cycle plus everything allocated since.
    allocated: AtomicU64,
    live: AtomicU64,
    ratio: AtomicI32,
    ceiling: Atomic<Option<u64>>,
    total_cycles: AtomicU64,
    hooks: Mutex<Vec<CycleHook>>,
    capacity: Option<u64>,
    min_heap_size: u64,
    supports_ceiling: bool,
    verbose: bool,
}

impl AccountingHeap {
    pub fn new(options: HeapOptions) -> Self {
        Self {
            allocated: AtomicU64::new(0),
            live: AtomicU64::new(0),
            ratio: AtomicI32::new(options.initial_ratio),
            ceiling: Atomic::new(None),
            total_cycles: AtomicU64::new(0),
            hooks: Mutex::new(vec![]),
            capacity: options.capacity,
            min_heap_size: options.min_heap_size,
            supports_ceiling: options.memory_ceiling,
            verbose: options.verbose,
        }
    }

    /// Accounts `bytes` of new allocation. Returns `true` once a collection is due.
    pub fn record_allocation(&self, bytes: u64) -> bool {
        let allocated = self.allocated.fetch_add(bytes, Ordering::AcqRel) + bytes;
        allocated >= self.next_collection_threshold()
    }

    pub fn should_collect(&self) -> bool {
        self.allocated() >= self.next_collection_threshold()
    }

    /// Heap size at which the next cycle starts: `live + live * ratio / 100`,
    /// at least `min_heap_size`, at most the memory ceiling.
    pub fn next_collection_threshold(&self) -> u64 {
        let live = self.live() as u128;
        let ratio = self.ratio.load(Ordering::Acquire);
        let by_ratio = if ratio < 0 {
            u64::MAX
        } else {
            let threshold = live + live * ratio as u128 / 100;
            threshold.min(u64::MAX as u128) as u64
        };
        let threshold = by_ratio.max(self.min_heap_size);
        match self.ceiling.load(Ordering::Acquire) {
            Some(ceiling) => threshold.min(ceiling),
            None => threshold,
        }
    }

    /// Ends a collection cycle. `live` is what marking found reachable.
    pub fn finish_cycle(&self, live: u64) {
        self.live.store(live, Ordering::Release);
        self.allocated.store(live, Ordering::Release);
        let cycle = self.total_cycles.fetch_add(1, Ordering::AcqRel);
        if self.verbose {
            tracing::info!(
                target: "comet_pacer",
                "[gc] GC({}) live {} next threshold {}",
                cycle,
                formatted_size(live),
                formatted_size(self.next_collection_threshold())
            );
        }
        // Hooks may register new hooks; run them with the lock released.
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn live(&self) -> u64 {
        self.live.load(Ordering::Acquire)
    }

    pub fn cycles(&self) -> u64 {
        self.total_cycles.load(Ordering::Acquire)
    }

    pub fn pacing_ratio(&self) -> i32 {
        self.ratio.load(Ordering::Acquire)
    }

    pub fn memory_ceiling(&self) -> Option<u64> {
        self.ceiling.load(Ordering::Acquire)
    }
}

impl Default for AccountingHeap {
    fn default() -> Self {
        Self::new(HeapOptions::default())
    }
}

impl MemoryProbe for AccountingHeap {
    fn total_memory_limit(&self) -> Result<u64, ProbeError> {
        match self.capacity {
            Some(capacity) => Ok(capacity),
            None => crate::system::memory_limit(),
        }
    }

    fn live_dataset_size(&self) -> u64 {
        self.live()
    }
}

impl CollectorApplier for AccountingHeap {
    fn set_pacing_ratio(&self, ratio: i32) -> i32 {
        self.ratio.swap(ratio, Ordering::AcqRel)
    }

    fn supports_memory_ceiling(&self) -> bool {
        self.supports_ceiling
    }

    fn set_memory_ceiling(&self, ceiling: Option<u64>) -> Option<u64> {
        if !self.supports_ceiling {
            return None;
        }
        self.ceiling.swap(ceiling, Ordering::AcqRel)
    }
}

impl CycleEvents for AccountingHeap {
    fn register_cycle_hook(&self, hook: CycleHook) -> Result<(), Unsupported> {
        self.hooks.lock().push(hook);
        Ok(())
    }
}

// Sync primitives for the counter tree, from `loom` under `cfg(loom)` and
// from `std` otherwise.
//
// Counter atomics, node state and the registry mutex must all come from here:
// those are the accesses the loom models in `metaspace::loom_tests` explore.
// Test threads and the start `Barrier` are routed here too so stress tests
// and loom models share one spelling.
#![allow(unused_imports)]

// ---------------------------------------------------------------------------
// atomic
// ---------------------------------------------------------------------------
pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
}

// ---------------------------------------------------------------------------
// sync (Mutex, Arc, Weak)
//
// loom's `Arc` has no `Weak` counterpart, and counter nodes link to their
// parent weakly.  Node ownership therefore stays on std's `Arc`/`Weak` in
// both configurations; loom still sees every counter access because the
// atomics inside the nodes come from loom.
// ---------------------------------------------------------------------------
#[cfg(loom)]
pub(crate) use loom::sync::Mutex;

#[cfg(not(loom))]
pub(crate) use std::sync::Mutex;

pub(crate) use std::sync::{Arc, Weak};

// ---------------------------------------------------------------------------
// thread
// ---------------------------------------------------------------------------
pub(crate) mod thread {
    #[cfg(loom)]
    pub(crate) use loom::thread::{JoinHandle, spawn, yield_now};

    #[cfg(not(loom))]
    pub(crate) use std::thread::{JoinHandle, spawn, yield_now};
}

// ---------------------------------------------------------------------------
// Barrier: std's under normal tests, an atomic countdown under loom.
// ---------------------------------------------------------------------------
pub(crate) mod barrier {
    #[cfg(not(loom))]
    pub(crate) use std::sync::Barrier;

    /// Spin-barrier on loom atomics; releases once `total` threads arrived.
    #[cfg(loom)]
    #[allow(dead_code)]
    pub(crate) struct Barrier {
        total: usize,
        count: super::atomic::AtomicUsize,
    }

    #[cfg(loom)]
    #[allow(dead_code)]
    impl Barrier {
        pub(crate) fn new(n: usize) -> Self {
            Self {
                total: n,
                count: super::atomic::AtomicUsize::new(0),
            }
        }

        pub(crate) fn wait(&self) {
            use super::atomic::Ordering;
            let arrived = self.count.fetch_add(1, Ordering::AcqRel) + 1;
            if arrived < self.total {
                while self.count.load(Ordering::Acquire) < self.total {
                    loom::thread::yield_now();
                }
            }
        }
    }
}

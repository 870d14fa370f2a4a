//! Lifecycle of the Heap: boot, fork, and exit.
//!
//! Boot runs once, under the init lock, in the following order:
//!
//! 1.  Profiler defaults, then the options, from the compiled-in, symbolic link and environment strings.
//! 2.  Size classes, bins, chunks and base, then the profiler options.
//! 3.  Arena 0, in a single slot on the stack, so that anything allocating from then on is served.
//! 4.  Profiler table.
//! 5.  With the init lock released: the number of CPUs, and the process hooks, either of which may allocate.
//! 6.  The number of automatic arenas, and the arena array, which replaces the stack slot.

use core::{
    alloc::Layout,
    cmp,
    ptr::NonNull,
    sync::atomic::Ordering,
};

use crate::{
    configuration::{DssPrecedence, TCACHE},
    BootError, Heap, Options, Platform, SizeClasses,
};
use crate::api::heap::Globals;
use crate::internals::{
    arena_pool::ArenaSlot,
    bins::BinInfos,
    diagnostics::diagnostic,
    init::Booting,
    stats,
    tcache,
};

/// Capacity of the symbolic link configuration string.
const CONF_LINK_CAPACITY: usize = 4096;

/// Number of arenas which may be created explicitly, beyond the automatic ones.
const EXPLICIT_ARENAS: usize = 256;

impl<P: Platform> Heap<P> {
    /// Acquires all the locks of the heap, ahead of a fork.
    ///
    /// Does nothing if the heap is not initialized.
    pub fn prefork(&self) {
        if !self.is_initialized() {
            return;
        }

        self.ctl.prefork();
        self.prof.prefork();
        self.pool.prefork();
        self.chunks.prefork();
        self.base.prefork();
        self.huge.prefork();

        self.forking.store(true, Ordering::Relaxed);
    }

    /// Releases all the locks of the heap, in the parent, after a fork.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `prefork` was called, by this thread, and that no other thread forked since.
    pub unsafe fn postfork_parent(&self) {
        if !self.forking.swap(false, Ordering::Relaxed) {
            return;
        }

        self.huge.postfork_parent();
        self.base.postfork_parent();
        self.chunks.postfork_parent();
        self.pool.postfork_parent();
        self.prof.postfork_parent();
        self.ctl.postfork_parent();
    }

    /// Releases all the locks of the heap, in the child, after a fork.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `prefork` was called, by this thread, and that no other thread forked since.
    pub unsafe fn postfork_child(&self) {
        if !self.forking.swap(false, Ordering::Relaxed) {
            return;
        }

        self.huge.postfork_child();
        self.base.postfork_child();
        self.chunks.postfork_child();
        self.pool.postfork_child();
        self.prof.postfork_child();
        self.ctl.postfork_child();
    }

    /// Runs the exit-time reports: statistics, and leaks, if so configured.
    pub fn at_exit(&self) {
        let options = match self.options() {
            Some(options) => options,
            None => return,
        };

        if options.stats_print {
            self.stats_print();
        }

        if options.prof_leak {
            self.prof.leak_summary(&self.platform);
        }
    }

    /// Prints a summary of the statistics, through the diagnostics of the platform.
    ///
    /// Does nothing if the heap is not initialized.
    pub fn stats_print(&self) {
        if !self.is_initialized() {
            return;
        }

        let _guard = self.ctl.lock();

        stats::print(&self.context());
    }

    /// Boots the heap, see the module documentation.
    pub(crate) fn boot(&self, booting: &mut Booting<'_>) -> Result<(), BootError> {
        self.prof.boot0();

        let options = self.read_options();

        //  Out-of-range values were clipped while parsing.
        let classes = SizeClasses::new(options.lg_chunk as u32).unwrap_or(SizeClasses::DEFAULT);
        let chunk = classes.chunk_size();

        self.base.boot(chunk);

        if !self.chunks.boot(&self.platform, chunk) {
            return Err(BootError::Chunks);
        }

        self.prof.boot1(&options);

        let tcache_nbins = if TCACHE && options.tcache { tcache::nbins(options.lg_tcache_max) } else { 0 };

        //  Safety:
        //  -   Only the booting thread accesses the globals until initialized.
        unsafe {
            *self.globals.get() = Globals { options, classes, bins: BinInfos::new(options.redzone), tcache_nbins };
        }

        let bootstrap = ArenaSlot::new();

        //  Safety:
        //  -   `bootstrap` outlives its installation: it is replaced by the arena array, or uninstalled, below.
        unsafe { self.pool.install(NonNull::from(&bootstrap), 1, 1) };

        let result = self.boot_arenas(booting);

        if result.is_err() {
            self.pool.reset();
        }

        result
    }

    fn read_options(&self) -> Options {
        let mut options = Options::DEFAULT;

        if P::SUPPORTS_DSS {
            options.dss = DssPrecedence::Secondary;
        }

        let mut link = [0u8; CONF_LINK_CAPACITY];

        let sources = [self.platform.default_conf(), self.platform.conf_link(&mut link), self.platform.conf_env()];

        for conf in sources.iter() {
            options.apply_conf(conf, P::SUPPORTS_DSS, |report| diagnostic!(&self.platform, "{}", report));
        }

        options
    }

    fn boot_arenas(&self, booting: &mut Booting<'_>) -> Result<(), BootError> {
        {
            let ctx = self.context();
            ctx.pool.get_or_create(&ctx, 0).ok_or(BootError::Arena)?;
        }

        if !self.prof.boot2(&self.platform, &self.base) {
            return Err(BootError::Profiler);
        }

        let hooks = self.exit_hook_needed();

        let (ncpus, exit_hook, fork_handlers) = booting.unlocked(|| {
            let ncpus = self.platform.ncpus();
            let exit_hook = !hooks || self.platform.register_exit_hook();
            let fork_handlers = self.platform.register_fork_handlers();

            (ncpus, exit_hook, fork_handlers)
        });

        self.exit_hook.store(hooks && exit_hook, Ordering::Relaxed);

        if !exit_hook {
            self.context().warn(format_args!("Error in atexit()"));
        }

        if !fork_handlers {
            self.context().warn(format_args!("Error in pthread_atfork()"));
        }

        let limit = ArenaSlot::capacity_within(self.globals().classes.chunk_size().value());
        let narenas = self.narenas_auto_for(ncpus, limit);

        //  Safety:
        //  -   Only the booting thread accesses the globals until initialized, and no reference into them is live.
        unsafe { (*self.globals.get()).options.narenas = narenas };

        let capacity = cmp::min(limit, narenas.saturating_add(EXPLICIT_ARENAS));

        let layout = Layout::array::<ArenaSlot>(capacity).map_err(|_| BootError::ArenaArray)?;
        let slots = self.base.alloc(&self.platform, layout).ok_or(BootError::ArenaArray)?;

        //  Safety:
        //  -   `slots` is zero-filled, which is an array of empty slots, of `capacity` elements.
        //  -   `narenas` is at least 1, and at most `capacity`.
        unsafe {
            let slots = slots.cast();

            self.pool.copy_into(slots, 1);
            self.pool.install(slots, capacity, narenas);
        }

        Ok(())
    }

    fn exit_hook_needed(&self) -> bool {
        let options = &self.globals().options;

        options.stats_print || options.prof_leak
    }

    //  An explicit number of arenas is used as is, otherwise 4 per CPU, or 1 on a single CPU. Either is clipped to
    //  the number of slots fitting within a chunk.
    fn narenas_auto_for(&self, ncpus: usize, limit: usize) -> usize {
        let narenas = match self.globals().options.narenas {
            0 if ncpus > 1 => ncpus.saturating_mul(4),
            0 => 1,
            narenas => narenas,
        };

        if narenas > limit {
            diagnostic!(&self.platform, "Reducing narenas to limit ({})", limit);
            return limit;
        }

        narenas
    }
}

#[cfg(test)]
mod tests {

use std::{
    sync::{atomic::AtomicUsize, Arc, Barrier},
    thread,
};

use super::*;
use crate::internals::test::{TestHeap, TestPlatform};
use crate::{AllocError, InitError, MallocxFlags, ThreadState};

#[test]
fn boot_defaults() {
    let heap = TestHeap::new(TestPlatform::default());

    assert!(!heap.is_initialized());
    assert_eq!(None, heap.options());

    assert_eq!(Ok(()), heap.initialize());

    let options = heap.options().unwrap();

    assert_eq!(22, options.lg_chunk);
    assert_eq!(1, options.narenas);
    assert_eq!(1, heap.narenas_auto());
    assert_eq!(1, heap.narenas_total());
    assert_eq!(Some(0), heap.arena_nthreads(0));

    //  No statistics at exit, only the fork handlers.
    assert_eq!((0, 1), heap.platform().hooks());
    assert!(heap.platform().diagnostics().is_empty());
}

#[test]
fn boot_narenas_from_ncpus() {
    let heap = TestHeap::new(TestPlatform::default().with_ncpus(3));
    heap.initialize().unwrap();

    assert_eq!(12, heap.narenas_auto());
    assert_eq!(12, heap.options().unwrap().narenas);
}

#[test]
fn boot_narenas_clipped() {
    let heap = TestHeap::with_conf("lg_chunk:16,narenas:100000");

    let limit = ArenaSlot::capacity_within(64 * 1024);

    assert_eq!(limit, heap.narenas_auto());
    assert_eq!(
        vec![format!("<arenalloc>: Reducing narenas to limit ({})\n", limit)],
        heap.platform().diagnostics()
    );
}

#[test]
fn boot_conf_precedence() {
    let platform = TestPlatform::default().with_confs("narenas:2,junk:true", "narenas:3", "narenas:4,zero:true");
    let heap = TestHeap::new(platform);
    heap.initialize().unwrap();

    let options = heap.options().unwrap();

    assert_eq!(4, options.narenas);
    assert!(options.junk);
    assert!(options.zero);
}

#[test]
fn boot_malformed_conf_keeps_defaults() {
    let platform = TestPlatform::default().with_confs("", "", "abort:maybe,lg_chunk:20,narenas:2,");
    let heap = TestHeap::new(platform);
    heap.initialize().unwrap();

    let options = heap.options().unwrap();

    assert_eq!(Options::DEFAULT.abort, options.abort);
    assert_eq!(20, options.lg_chunk);
    assert_eq!(2, options.narenas);

    assert_eq!(
        vec![
            "<arenalloc>: Invalid conf value: abort:maybe\n".to_string(),
            "<arenalloc>: Conf string ends with comma\n".to_string(),
        ],
        heap.platform().diagnostics()
    );
}

#[test]
fn boot_registers_exit_hook_when_needed() {
    let heap = TestHeap::with_conf("stats_print:true");

    assert_eq!((1, 1), heap.platform().hooks());
    assert!(heap.exit_hook.load(Ordering::Relaxed));
}

#[test]
fn boot_hook_failures_warn() {
    let platform = TestPlatform::default().with_confs("", "", "stats_print:true,abort:false");
    platform.fail_hooks(true);

    let heap = TestHeap::new(platform);
    heap.initialize().unwrap();

    assert_eq!(
        vec!["<arenalloc>: Error in atexit()\n".to_string(), "<arenalloc>: Error in pthread_atfork()\n".to_string()],
        heap.platform().diagnostics()
    );
}

#[test]
fn boot_recoverable_failure() {
    let heap = TestHeap::new(TestPlatform::default());
    heap.platform().fail_boot(true);

    let mut thread = ThreadState::transient(crate::ThreadStatus::Reentrant);

    assert_eq!(Err(InitError::Boot(BootError::Chunks)), heap.initialize());
    assert_eq!(Err(AllocError::OutOfMemory), unsafe { heap.malloc(&mut thread, 8) });
    assert_eq!(0, heap.nallocx(8, MallocxFlags::NONE));

    heap.platform().fail_boot(false);

    assert_eq!(Ok(()), heap.initialize());
    assert_eq!(16, heap.nallocx(9, MallocxFlags::NONE));
}

#[test]
fn boot_fatal_failure() {
    let platform = TestPlatform::default().with_confs("", "", "abort:false");
    platform.fail_reservations(true);

    let heap = TestHeap::new(platform);

    assert_eq!(Err(InitError::Boot(BootError::Arena)), heap.initialize());
    assert_eq!(vec!["<arenalloc>: Error initializing arena\n".to_string()], heap.platform().diagnostics());

    heap.platform().fail_reservations(false);

    assert_eq!(Err(InitError::Failed), heap.initialize());
    assert_eq!(0, heap.narenas_total());
}

#[test]
fn boot_concurrent_first_calls() {
    const THREADS: usize = 8;

    let heap = Arc::new(TestHeap::new(TestPlatform::default().with_confs("", "", "narenas:8")));
    let barrier = Arc::new(Barrier::new(THREADS));
    let successes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS).map(|_| {
        let (heap, barrier, successes) = (heap.clone(), barrier.clone(), successes.clone());

        thread::spawn(move || {
            let state = {
                barrier.wait();
                heap.acquire_thread_state().unwrap()
            };

            unsafe {
                let thread = &mut *state.as_ptr();

                let pointer = heap.malloc(thread, 100).unwrap();
                heap.free(thread, Some(pointer));

                successes.fetch_add(1, Ordering::Relaxed);

                heap.release_thread_state(state);
            }
        })
    }).collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(THREADS, successes.load(Ordering::Relaxed));
    assert_eq!((0, 1), heap.platform().hooks());

    for index in 0..heap.narenas_total() {
        assert_eq!(Some(0), heap.pool.nthreads(index));
    }
}

#[test]
fn fork_hooks_release_all_locks() {
    let heap = TestHeap::with_conf("narenas:2");
    let mut thread = ThreadState::new();

    unsafe {
        heap.pool.extend(&heap.context()).unwrap();

        heap.prefork();

        assert!(heap.ctl.is_locked());

        heap.postfork_child();

        assert!(!heap.ctl.is_locked());

        //  Every lock is available again.
        let pointer = heap.malloc(&mut thread, 100).unwrap();
        heap.free(&mut thread, Some(pointer));

        let pointer = heap.malloc(&mut thread, 10 * 1024 * 1024).unwrap();
        heap.free(&mut thread, Some(pointer));

        heap.prefork();
        heap.postfork_parent();

        heap.stats_print();

        heap.retire_thread(&mut thread);
    }
}

#[test]
fn fork_hooks_before_init_are_noops() {
    let heap = TestHeap::new(TestPlatform::default());

    heap.prefork();
    heap.initialize().unwrap();

    //  The locks were not taken, and must not be released.
    unsafe { heap.postfork_parent() };

    assert!(!heap.ctl.is_locked());
    assert!(!heap.forking.load(Ordering::Relaxed));
}

#[test]
fn at_exit_reports() {
    let heap = TestHeap::with_conf("stats_print:true,prof:true,prof_leak:true,lg_prof_sample:0");
    let mut thread = ThreadState::new();

    let pointer = unsafe { heap.malloc(&mut thread, 100).unwrap() };

    heap.platform().clear_diagnostics();
    heap.at_exit();

    let diagnostics = heap.platform().diagnostics();

    assert_eq!("___ Begin arenalloc statistics ___\n", diagnostics[0]);
    assert!(diagnostics.contains(&"  opt.stats_print: true\n".to_string()), "{:?}", diagnostics);
    assert_eq!("<arenalloc>: Leak summary: 112 bytes, 1 object\n", diagnostics[diagnostics.len() - 1]);

    unsafe {
        heap.free(&mut thread, Some(pointer));
        heap.retire_thread(&mut thread);
    }
}

}

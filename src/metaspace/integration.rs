#[cfg(all(test, not(loom)))]
mod tests {
    use crate::metaspace::reader::Usage;
    use crate::metaspace::registry::{Registry, RegistryConfig};
    use crate::sync::Arc;
    use crate::sync::atomic::{AtomicU8, Ordering};
    use crate::sync::barrier::Barrier;
    use crate::sync::thread;

    #[test]
    fn test_integration_loader_groups_roll_up() {
        // Process total -> two loader groups -> three arenas each.
        let registry = Registry::new();
        let groups: Vec<_> = (0..2).map(|_| registry.create_node(None).unwrap()).collect();
        let mut arenas = Vec::new();
        for &group in &groups {
            for _ in 0..3 {
                arenas.push(registry.create_node(Some(group)).unwrap());
            }
        }

        for (i, &arena) in arenas.iter().enumerate() {
            let bytes = 1024 * (i as u64 + 1);
            registry.node(arena).unwrap().allocate(bytes);
        }

        let report = registry.report();
        assert_eq!(report.rows.len(), 1 + groups.len() + arenas.len());
        assert_eq!(report.sum_at_depth(2), report.total());
        assert_eq!(report.sum_at_depth(1), report.total());
        assert_eq!(report.total().used, 1024 * (1 + 2 + 3 + 4 + 5 + 6));

        // Tear down the first group bottom-up.
        for &arena in &arenas[..3] {
            registry.destroy_node(arena).unwrap();
        }
        registry.destroy_node(groups[0]).unwrap();

        let total = registry.reader(registry.root()).unwrap().usage();
        assert_eq!(total, registry.reader(groups[1]).unwrap().usage());
        assert_eq!(total.used, 1024 * (4 + 5 + 6));
        assert!(total.is_invariant_satisfied());
    }

    #[test]
    fn test_integration_concurrent_arena_churn() {
        let threads = 8usize;
        let rounds = 200u64;
        let registry = Arc::new(Registry::with_config(RegistryConfig {
            max_depth: 2,
            ..RegistryConfig::default()
        }));
        let group = registry.create_node(None).unwrap();
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let r = Arc::clone(&registry);
                let b = Arc::clone(&barrier);
                thread::spawn(move || {
                    // Long-lived arena owned by this thread.
                    let own = r.create_node(Some(group)).unwrap();
                    let own_node = r.node(own).unwrap();
                    b.wait();

                    for i in 0..rounds {
                        let bytes = 64 + (i + t as u64) % 512;
                        own_node.allocate(bytes);

                        // Short-lived arena, destroyed while still holding memory.
                        let temp = r.create_node(Some(group)).unwrap();
                        let temp_node = r.node(temp).unwrap();
                        temp_node.allocate(bytes * 2);
                        temp_node.release(bytes);
                        let residual = r.destroy_node(temp).unwrap();
                        assert_eq!(residual.used, bytes);
                    }
                    own
                })
            })
            .collect();

        let owned: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let leaf_total: Usage = owned
            .iter()
            .map(|&id| registry.reader(id).unwrap().usage())
            .sum();
        let group_usage = registry.reader(group).unwrap().usage();
        let root_usage = registry.reader(registry.root()).unwrap().usage();

        assert_eq!(group_usage, leaf_total);
        assert_eq!(root_usage, leaf_total);
        assert!(root_usage.is_invariant_satisfied(), "{root_usage}");
        assert_eq!(registry.len(), 2 + threads);
        assert_eq!(registry.child_count(group), Ok(threads));
    }

    #[test]
    fn test_integration_readers_never_block_or_see_torn_leaves() {
        let registry = Arc::new(Registry::new());
        let arena = registry.create_node(None).unwrap();
        let done = Arc::new(AtomicU8::new(0));

        let writer = {
            let node = registry.node(arena).unwrap();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..20_000u64 {
                    node.allocate(8 + i % 128);
                    if i % 3 == 0 {
                        node.release(8 + i % 128);
                    }
                }
                done.store(1, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let r = Arc::clone(&registry);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let leaf = r.reader(arena).unwrap();
                    let mut observations = 0u64;
                    while done.load(Ordering::Acquire) == 0 {
                        // Leaf reads go used -> committed -> reserved and the
                        // leaf only grows headroom, so no window is visible.
                        assert!(leaf.is_invariant_satisfied(), "{}", leaf.usage());
                        r.for_each(|node| {
                            let _ = node.usage();
                        });
                        observations += 1;
                    }
                    observations
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }

        let root = registry.reader(registry.root()).unwrap();
        assert_eq!(root.usage(), registry.reader(arena).unwrap().usage());
        assert!(root.is_invariant_satisfied());
    }

    #[test]
    fn test_integration_group_allocates_while_arenas_churn() {
        let threads = 4usize;
        let registry = Arc::new(Registry::new());
        let group = registry.create_node(None).unwrap();
        let group_node = registry.node(group).unwrap();
        let barrier = Arc::new(Barrier::new(threads + 1));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let r = Arc::clone(&registry);
                let b = Arc::clone(&barrier);
                thread::spawn(move || {
                    b.wait();
                    for i in 0..200u64 {
                        let arena = r.create_node(Some(group)).unwrap();
                        let node = r.node(arena).unwrap();
                        node.reserve(4096);
                        node.commit(1024 + (i + t as u64) % 1024);
                        node.allocate(512);
                        node.release(512);
                        r.destroy_node(arena).unwrap();
                    }
                })
            })
            .collect();

        barrier.wait();
        for _ in 0..500 {
            group_node.allocate(16);
        }
        for h in handles {
            h.join().unwrap();
        }

        let own = Usage::new(16 * 500, 16 * 500, 16 * 500);
        assert_eq!(group_node.own_usage(), own);
        assert_eq!(registry.reader(group).unwrap().usage(), own);
        assert_eq!(registry.reader(registry.root()).unwrap().usage(), own);
    }
}

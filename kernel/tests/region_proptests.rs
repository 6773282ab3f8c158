//! Randomized invariant checks over mmap/munmap/fault sequences.

use kernel::mm::{AddressSpace, KERNBASE, MMAPBASE, PAGE_SIZE};
use kernel::posix::{MapFlags, ProtFlags};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Map { hint_pages: usize, len_pages: usize, fixed: bool },
    Unmap { pick: usize, len_pages: usize },
    Fault { pick: usize, page: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..1100, 1usize..6, any::<bool>()).prop_map(|(hint_pages, len_pages, fixed)| {
            Op::Map { hint_pages, len_pages, fixed }
        }),
        (any::<usize>(), 1usize..6).prop_map(|(pick, len_pages)| Op::Unmap { pick, len_pages }),
        (any::<usize>(), 0usize..6).prop_map(|(pick, page)| Op::Fault { pick, page }),
    ]
}

/// Live regions are ordered, page-disjoint, in bounds and page-aligned.
fn check_invariants(aspace: &AddressSpace) {
    let regions: Vec<_> = aspace.regions().iter().collect();
    for r in &regions {
        assert!(r.base >= MMAPBASE, "base below MMAPBASE");
        assert!(r.page_end() <= KERNBASE, "region runs past KERNBASE");
        assert_eq!(r.base % PAGE_SIZE, 0, "unaligned base");
        assert!(r.length > 0, "empty region");
    }
    for pair in regions.windows(2) {
        assert!(pair[0].base < pair[1].base, "table out of order");
        assert!(
            pair[0].page_end() <= pair[1].base,
            "regions overlap: [{:#x},{:#x}) and [{:#x},{:#x})",
            pair[0].base,
            pair[0].end(),
            pair[1].base,
            pair[1].end()
        );
    }
}

fn table_snapshot(aspace: &AddressSpace) -> Vec<(usize, usize)> {
    aspace.regions().iter().map(|r| (r.base, r.length)).collect()
}

proptest! {
    #[test]
    fn random_op_sequences_hold_invariants(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut aspace = AddressSpace::new().expect("aspace");
        for op in ops {
            match op {
                Op::Map { hint_pages, len_pages, fixed } => {
                    let addr = if hint_pages == 0 {
                        0
                    } else {
                        MMAPBASE + hint_pages * PAGE_SIZE
                    };
                    let mut flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
                    if fixed {
                        flags |= MapFlags::FIXED;
                    }
                    let before = table_snapshot(&aspace);
                    let result = aspace.mmap(
                        addr,
                        None,
                        len_pages * PAGE_SIZE,
                        0,
                        flags,
                        ProtFlags::READ | ProtFlags::WRITE,
                    );
                    if result.is_err() {
                        // A failing mmap leaves the table untouched.
                        prop_assert_eq!(table_snapshot(&aspace), before);
                    }
                }
                Op::Unmap { pick, len_pages } => {
                    let total = aspace.regions().total();
                    if total == 0 {
                        prop_assert!(aspace.munmap(MMAPBASE, PAGE_SIZE).is_err());
                    } else {
                        let r = aspace.regions().get(pick % total).expect("live");
                        let (base, _len) = (r.base, r.length);
                        aspace.munmap(base, len_pages * PAGE_SIZE).expect("unmap");
                    }
                }
                Op::Fault { pick, page } => {
                    let total = aspace.regions().total();
                    if total == 0 {
                        prop_assert!(aspace.handle_fault(MMAPBASE).is_err());
                    } else {
                        let r = aspace.regions().get(pick % total).expect("live");
                        let (base, len) = (r.base, r.length);
                        let va = base + (page * PAGE_SIZE) % len;
                        aspace.handle_fault(va).expect("fault");
                        prop_assert!(aspace.translate(va).is_some());
                    }
                }
            }
            check_invariants(&aspace);
        }
        aspace.teardown();
        prop_assert_eq!(aspace.regions().total(), 0);
    }
}

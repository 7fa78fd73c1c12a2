use std::ffi::c_void;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::numa::{self, bind_to_node};
use crate::{AccessPattern, Error};

/// Every element holds the address of the next one in the chain.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<u64>();

/// An anonymous mapping placed on one NUMA node. Each element stores the
/// address of its successor so that one traversal touches every element once.
pub struct MemoryWorkload {
    ptr: *mut u64,
    mapped_len: usize,
    size: usize,
    elements: usize,
    node: u32,
    node_bound: bool,
    pattern: Option<AccessPattern>,
}

impl MemoryWorkload {
    /// Maps `size` bytes and binds them to `node`. If the binding is refused
    /// the mapping keeps the default policy and `verify_placement` decides
    /// whether the run can go on.
    pub fn allocate(size: usize, node: u32) -> Result<Self, Error> {
        let elements = size / ELEMENT_SIZE;
        if elements == 0 {
            return Err(Error::InvalidSize(size));
        }

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let mapped_len = size.div_ceil(page_size) * page_size;

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(Error::Alloc {
                size,
                source: std::io::Error::last_os_error(),
            });
        }

        let node_bound = match bind_to_node(addr, mapped_len, node) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("mbind to node {node} failed, using the default policy: {err}");
                false
            }
        };

        log::debug!("allocated {size} bytes ({elements} elements) at {addr:p}");

        Ok(MemoryWorkload {
            ptr: addr as *mut u64,
            mapped_len,
            size,
            elements,
            node,
            node_bound,
            pattern: None,
        })
    }

    /// Chains the elements in `pattern` order, shuffling with a freshly
    /// seeded generator for [`AccessPattern::Random`].
    pub fn fill(&mut self, pattern: AccessPattern) {
        let mut rng = SmallRng::from_os_rng();
        self.fill_with(pattern, &mut rng);
    }

    pub fn fill_with<R: Rng + ?Sized>(&mut self, pattern: AccessPattern, rng: &mut R) {
        let n = self.elements;
        let base = self.start_address();
        let chain = self.as_mut_slice();
        let address = |index: usize| base + (index * ELEMENT_SIZE) as u64;

        match pattern {
            AccessPattern::Sequential => {
                for i in 0..n {
                    chain[i] = address((i + 1) % n);
                }
            }
            AccessPattern::Random => {
                let mut order: Vec<usize> = (0..n).collect();
                order.shuffle(rng);
                for i in 0..n {
                    chain[order[i]] = address(order[(i + 1) % n]);
                }
            }
        }

        self.pattern = Some(pattern);
    }

    /// Walks the chain once, starting and ending at the first element, and
    /// returns the last address loaded.
    pub fn traverse(&self) -> Result<u64, Error> {
        if self.pattern.is_none() {
            return Err(Error::NotFilled);
        }

        Ok(unsafe { chase(self.ptr as *const u64, self.elements) })
    }

    /// Checks that the first page sits on the requested node. The page must
    /// already be faulted in, so call this after filling.
    pub fn verify_placement(&self) -> Result<u32, Error> {
        let actual = numa::node_of_address(self.ptr as *const c_void)?;
        numa::check_placement(self.node, actual)?;
        Ok(actual)
    }

    pub fn start_address(&self) -> u64 {
        self.ptr as u64
    }

    pub fn end_address(&self) -> u64 {
        self.start_address() + self.size as u64
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    pub fn pattern(&self) -> Option<AccessPattern> {
        self.pattern
    }

    pub fn is_node_bound(&self) -> bool {
        self.node_bound
    }

    fn as_mut_slice(&mut self) -> &mut [u64] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.elements) }
    }
}

impl Drop for MemoryWorkload {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut c_void, self.mapped_len);
        }
    }
}

/// The measured loop. Kept out of line and free of stores so the only memory
/// traffic inside it is the chain itself.
#[inline(never)]
unsafe fn chase(start: *const u64, steps: usize) -> u64 {
    let mut p = start;

    for _ in 0..steps / 8 {
        unsafe {
            p = std::ptr::read_volatile(p) as *const u64;
            p = std::ptr::read_volatile(p) as *const u64;
            p = std::ptr::read_volatile(p) as *const u64;
            p = std::ptr::read_volatile(p) as *const u64;
            p = std::ptr::read_volatile(p) as *const u64;
            p = std::ptr::read_volatile(p) as *const u64;
            p = std::ptr::read_volatile(p) as *const u64;
            p = std::ptr::read_volatile(p) as *const u64;
        }
    }

    for _ in 0..steps % 8 {
        p = unsafe { std::ptr::read_volatile(p) } as *const u64;
    }

    p as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visits(workload: &mut MemoryWorkload) -> Vec<usize> {
        let start = workload.start_address();
        let chain = workload.as_mut_slice().to_vec();

        let mut seen = vec![0usize; chain.len()];
        let mut index = 0;
        for _ in 0..chain.len() {
            seen[index] += 1;
            index = ((chain[index] - start) as usize) / ELEMENT_SIZE;
        }
        assert_eq!(index, 0, "chain must close on the first element");
        seen
    }

    #[test]
    fn sequential_chain_touches_every_element_once() {
        let mut workload = MemoryWorkload::allocate(64 * 1024, 0).unwrap();
        workload.fill(AccessPattern::Sequential);

        assert_eq!(workload.elements(), 8192);
        assert!(visits(&mut workload).iter().all(|&count| count == 1));

        let chain = workload.as_mut_slice();
        let base = chain.as_ptr() as u64;
        assert_eq!(chain[0], base + 8);
        assert_eq!(chain[8191], base);
    }

    #[test]
    fn random_chain_is_a_single_cycle() {
        let mut workload = MemoryWorkload::allocate(10_000 * ELEMENT_SIZE, 0).unwrap();
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        workload.fill_with(AccessPattern::Random, &mut rng);

        assert_eq!(workload.pattern(), Some(AccessPattern::Random));
        assert!(visits(&mut workload).iter().all(|&count| count == 1));
    }

    #[test]
    fn traversal_ends_where_it_started() {
        // 13 elements exercises the remainder loop
        for pattern in [AccessPattern::Sequential, AccessPattern::Random] {
            let mut workload = MemoryWorkload::allocate(13 * ELEMENT_SIZE, 0).unwrap();
            assert!(matches!(workload.traverse(), Err(Error::NotFilled)));

            workload.fill(pattern);
            assert_eq!(workload.traverse().unwrap(), workload.start_address());
        }
    }

    #[test]
    fn rejects_buffers_without_a_whole_element() {
        assert!(matches!(
            MemoryWorkload::allocate(7, 0),
            Err(Error::InvalidSize(7))
        ));
    }

    #[test]
    fn address_range_covers_the_requested_size() {
        let workload = MemoryWorkload::allocate(3 * 4096 + 8, 0).unwrap();
        assert_eq!(workload.end_address() - workload.start_address(), 3 * 4096 + 8);
        assert_eq!(workload.size(), 3 * 4096 + 8);
        assert_eq!(workload.node(), 0);
    }

    #[test]
    fn memory_off_the_requested_node_fails_verification() {
        let mut workload = MemoryWorkload::allocate(64 * 1024, 999).unwrap();
        assert!(!workload.is_node_bound());
        workload.fill(AccessPattern::Sequential);

        match workload.verify_placement() {
            Err(err @ Error::PlacementMismatch { expected: 999, .. }) => {
                assert!(err.to_string().contains("expected 999 vs current"));
            }
            // move_pages is not available everywhere
            Err(Error::PlacementQuery(err)) => eprintln!("skipping: {err}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

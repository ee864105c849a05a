//! A two-level segregated fit (TLSF) allocator.
//!
//! Grounded on `VEngine2/src/utility/TLSFAllocator.{h,cpp}`: a backing
//! range of `memory_size` bytes is partitioned into a doubly-linked list
//! of physical [`span::Span`]s. Free spans are additionally linked into
//! one of many free-lists, indexed by size class, with two bitsets (plus
//! a small-bucket bitset for sizes below `SMALL_BLOCK`) driving O(1)
//! first-fit search. Allocation and free are both O(1); free coalesces
//! with physically adjacent free spans.
//!
//! Span bookkeeping lives in a [`spin_handle::HandleManager`] rather than
//! being individually heap-allocated — the same role `DynamicObjectPool<Span>`
//! plays in the original, and the reason `alloc()` hands back an opaque
//! [`spin_handle::Handle`] instead of a raw pointer.

mod error;
mod mapping;
mod span;

pub use error::TlsfError;
use spin_handle::{Handle, HandleManager};
use span::Span;

use mapping::{
    align_down, align_up, find_first_set_bit, mapping_insert, mapping_search, MAX_FIRST_LEVELS,
    MAX_SECOND_LEVELS, SMALL_BLOCK,
};

/// The state of a physical span, as reported by [`Tlsf::debug_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanState {
    Free,
    Used,
    Wasted,
}

/// One entry of [`Tlsf::debug_info`]'s output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanDebugInfo {
    pub offset: u32,
    pub size: u32,
    pub state: SpanState,
}

pub struct Tlsf {
    memory_size: u32,
    page_size: u32,

    spans: HandleManager<Span>,
    first_physical: Option<Handle>,

    first_level_bitset: u32,
    second_level_bitsets: [u32; MAX_FIRST_LEVELS as usize],
    small_bitset: u32,
    free_lists: Vec<[Option<Handle>; MAX_SECOND_LEVELS as usize]>,
    small_free_lists: [Option<Handle>; SMALL_BLOCK as usize],

    allocation_count: u32,
    free_size: u32,
    used_size: u32,
}

impl Tlsf {
    /// Constructs a TLSF allocator over `memory_size` bytes, with one
    /// initial free span covering the whole range.
    ///
    /// `page_size` is the granularity at which allocation split points
    /// must lie (spec.md §3's "page size" — conceptually an alignment
    /// floor, not necessarily the OS page size).
    pub fn new(memory_size: u32, page_size: u32) -> Result<Self, TlsfError> {
        if memory_size == 0 {
            return Err(TlsfError::ZeroMemorySize);
        }
        if !page_size.is_power_of_two() {
            return Err(TlsfError::PageSizeNotPowerOfTwo);
        }
        if memory_size % page_size != 0 {
            return Err(TlsfError::MemorySizeNotPageAligned(memory_size, page_size));
        }

        let mut tlsf = Tlsf {
            memory_size,
            page_size,
            spans: HandleManager::new(),
            first_physical: None,
            first_level_bitset: 0,
            second_level_bitsets: [0; MAX_FIRST_LEVELS as usize],
            small_bitset: 0,
            free_lists: vec![[None; MAX_SECOND_LEVELS as usize]; MAX_FIRST_LEVELS as usize],
            small_free_lists: [None; SMALL_BLOCK as usize],
            allocation_count: 0,
            free_size: memory_size,
            used_size: 0,
        };

        let initial = tlsf.spans.insert(Span {
            offset: 0,
            size: memory_size,
            used_offset: 0,
            used_size: 0,
            prev_free: None,
            next_free: None,
            prev_physical: None,
            next_physical: None,
        });
        tlsf.first_physical = Some(initial);
        tlsf.add_span_to_free_list(initial);

        Ok(tlsf)
    }

    pub fn memory_size(&self) -> u32 {
        self.memory_size
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn allocation_count(&self) -> u32 {
        self.allocation_count
    }

    pub fn free_used_wasted_sizes(&self) -> (u32, u32, u32) {
        (self.free_size, self.used_size, self.memory_size - self.free_size - self.used_size)
    }

    /// Finds a span big enough for `size`, aligns within it, splitting
    /// off page-aligned begin/end margins as needed, and marks the
    /// (possibly trimmed) span used. Returns the aligned offset and a
    /// handle identifying the span for a later [`Tlsf::free`].
    pub fn alloc(&mut self, size: u32, alignment: u32) -> Option<(u32, Handle)> {
        let result = self.alloc_inner(size, alignment);
        if result.is_none() {
            log::warn!(
                "tlsf pool exhausted: no span fits {size} bytes aligned to {alignment} \
                 ({} bytes free across the pool)",
                self.free_size
            );
        }
        result
    }

    fn alloc_inner(&mut self, size: u32, alignment: u32) -> Option<(u32, Handle)> {
        assert!(size > 0, "alloc size must be nonzero");
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");

        let mut chosen = None;
        for attempt in 0..2 {
            let probe_size = if attempt == 0 {
                size
            } else {
                size.checked_add(alignment - 1)?
            };
            let handle = self.find_free_span(probe_size)?;
            let span = self.span(handle);
            let aligned = align_up(span.offset, alignment);
            if aligned + size <= span.offset + span.size {
                chosen = Some(handle);
                break;
            }
        }
        let handle = chosen?;

        self.remove_span_from_free_list(handle);

        let (offset, span_size) = {
            let span = self.span(handle);
            (span.offset, span.size)
        };
        let aligned = align_up(offset, alignment);

        let next_lower_page = align_down(aligned, self.page_size);
        let next_upper_page = align_up(aligned + size, self.page_size);

        let begin_margin = next_lower_page - offset;
        let end_margin = offset + span_size - next_upper_page;

        let mut cur_offset = offset;
        let mut cur_size = span_size;
        let mut prev_physical = self.span(handle).prev_physical;
        let mut next_physical = self.span(handle).next_physical;

        if begin_margin >= self.page_size {
            let begin_handle = self.spans.insert(Span {
                offset: cur_offset,
                size: begin_margin,
                used_offset: 0,
                used_size: 0,
                prev_free: None,
                next_free: None,
                prev_physical,
                next_physical: Some(handle),
            });
            match prev_physical {
                Some(prev) => self.span_mut(prev).next_physical = Some(begin_handle),
                None => self.first_physical = Some(begin_handle),
            }
            cur_offset += begin_margin;
            cur_size -= begin_margin;
            prev_physical = Some(begin_handle);
            self.add_span_to_free_list(begin_handle);
        }

        if end_margin >= self.page_size {
            let end_handle = self.spans.insert(Span {
                offset: next_upper_page,
                size: end_margin,
                used_offset: 0,
                used_size: 0,
                prev_free: None,
                next_free: None,
                prev_physical: Some(handle),
                next_physical,
            });
            if let Some(next) = next_physical {
                self.span_mut(next).prev_physical = Some(end_handle);
            }
            next_physical = Some(end_handle);
            cur_size -= end_margin;
            self.add_span_to_free_list(end_handle);
        }

        {
            let span = self.span_mut(handle);
            span.offset = cur_offset;
            span.size = cur_size;
            span.prev_physical = prev_physical;
            span.next_physical = next_physical;
            span.used_offset = aligned;
            span.used_size = size;
        }

        self.allocation_count += 1;
        self.free_size -= cur_size;
        self.used_size += size;

        Some((aligned, handle))
    }

    /// Frees a span previously returned by [`Tlsf::alloc`], coalescing
    /// with physically adjacent free neighbors (next, then previous).
    pub fn free(&mut self, handle: Handle) {
        let used_size = self.span(handle).used_size;
        let mut size = self.span(handle).size;

        self.free_size += size;
        self.used_size -= used_size;

        let mut surviving = handle;

        if let Some(next) = self.span(surviving).next_physical {
            if self.span(next).is_free() {
                self.remove_span_from_free_list(next);
                let next_size = self.span(next).size;
                let next_next = self.span(next).next_physical;

                size += next_size;
                if let Some(nn) = next_next {
                    self.span_mut(nn).prev_physical = Some(surviving);
                }
                self.span_mut(surviving).next_physical = next_next;
                self.span_mut(surviving).size = size;
                self.spans.remove(next);
            }
        }

        if let Some(prev) = self.span(surviving).prev_physical {
            if self.span(prev).is_free() {
                self.remove_span_from_free_list(prev);

                let merged_offset = self.span(prev).offset;
                let merged_size = self.span(prev).size + size;
                let surviving_next = self.span(surviving).next_physical;

                if let Some(sn) = surviving_next {
                    self.span_mut(sn).prev_physical = Some(prev);
                }
                {
                    let prev_span = self.span_mut(prev);
                    prev_span.offset = merged_offset;
                    prev_span.size = merged_size;
                    prev_span.next_physical = surviving_next;
                }

                self.spans.remove(surviving);
                size = merged_size;
                surviving = prev;
            }
        }

        self.add_span_to_free_list(surviving);
        self.allocation_count -= 1;
    }

    /// Yields `(offset, size, state)` for every physical span, splitting
    /// used spans into up to three entries: a wasted prefix (alignment
    /// padding before `used_offset`), the used core, and a wasted suffix.
    pub fn debug_info(&self) -> Vec<SpanDebugInfo> {
        let mut out = Vec::new();
        let mut cursor = self.first_physical;
        while let Some(handle) = cursor {
            let span = self.span(handle);
            if span.is_free() {
                out.push(SpanDebugInfo {
                    offset: span.offset,
                    size: span.size,
                    state: SpanState::Free,
                });
            } else {
                if span.used_offset > span.offset {
                    out.push(SpanDebugInfo {
                        offset: span.offset,
                        size: span.used_offset - span.offset,
                        state: SpanState::Wasted,
                    });
                }
                out.push(SpanDebugInfo {
                    offset: span.used_offset,
                    size: span.used_size,
                    state: SpanState::Used,
                });
                let used_end = span.used_offset + span.used_size;
                let span_end = span.offset + span.size;
                if span_end > used_end {
                    out.push(SpanDebugInfo {
                        offset: used_end,
                        size: span_end - used_end,
                        state: SpanState::Wasted,
                    });
                }
            }
            cursor = span.next_physical;
        }
        out
    }

    fn span(&self, handle: Handle) -> &Span {
        self.spans.get(handle).expect("stale or foreign span handle")
    }

    fn span_mut(&mut self, handle: Handle) -> &mut Span {
        self.spans.get_mut(handle).expect("stale or foreign span handle")
    }

    fn find_free_list_bucket(&self, fl: u32, sl: u32) -> Option<(u32, u32)> {
        let masked = self.second_level_bitsets[fl as usize] & (!0u32 << sl);
        if let Some(found_sl) = find_first_set_bit(masked) {
            return Some((fl, found_sl));
        }

        if fl + 1 >= MAX_FIRST_LEVELS {
            return None;
        }
        let fl_mask = self.first_level_bitset & (!0u32 << (fl + 1));
        let found_fl = find_first_set_bit(fl_mask)?;
        let found_sl =
            find_first_set_bit(self.second_level_bitsets[found_fl as usize]).expect("bit claims non-empty list");
        Some((found_fl, found_sl))
    }

    fn find_free_span(&self, size: u32) -> Option<Handle> {
        if size < SMALL_BLOCK {
            if self.small_bitset == 0 {
                return None;
            }
            let index = find_first_set_bit(self.small_bitset & (!0u32 << size))?;
            return self.small_free_lists[index as usize];
        }

        let (fl0, sl0) = mapping_search(size);
        let mut fl = fl0;
        let mut sl = sl0;

        for attempt in 0..2 {
            if attempt != 0 {
                // Check the bucket just below the search result: a span
                // that fits may reside there even though mapping_search
                // rounds upward (notably the very first allocation out
                // of a freshly constructed pool).
                if sl == 0 {
                    if fl == 0 {
                        break;
                    }
                    fl -= 1;
                    sl = MAX_SECOND_LEVELS - 1;
                } else {
                    sl -= 1;
                }
            }

            if let Some((found_fl, found_sl)) = self.find_free_list_bucket(fl, sl) {
                if let Some(candidate) = self.free_lists[found_fl as usize][found_sl as usize] {
                    if self.span(candidate).size >= size {
                        return Some(candidate);
                    }
                }
            }
        }

        None
    }

    fn add_span_to_free_list(&mut self, handle: Handle) {
        let size = self.span(handle).size;

        let prev_head = if size < SMALL_BLOCK {
            self.small_bitset |= 1 << size;
            let prev_head = self.small_free_lists[size as usize];
            self.small_free_lists[size as usize] = Some(handle);
            prev_head
        } else {
            let (fl, sl) = mapping_insert(size);
            self.second_level_bitsets[fl as usize] |= 1 << sl;
            self.first_level_bitset |= 1 << fl;
            let prev_head = self.free_lists[fl as usize][sl as usize];
            self.free_lists[fl as usize][sl as usize] = Some(handle);
            prev_head
        };

        {
            let span = self.span_mut(handle);
            span.prev_free = None;
            span.next_free = prev_head;
            span.used_offset = 0;
            span.used_size = 0;
        }
        if let Some(prev) = prev_head {
            self.span_mut(prev).prev_free = Some(handle);
        }
    }

    fn remove_span_from_free_list(&mut self, handle: Handle) {
        let (size, prev_free, next_free) = {
            let span = self.span(handle);
            (span.size, span.prev_free, span.next_free)
        };

        if let Some(prev) = prev_free {
            self.span_mut(prev).next_free = next_free;
        } else if size < SMALL_BLOCK {
            self.small_free_lists[size as usize] = next_free;
            if next_free.is_none() {
                self.small_bitset &= !(1 << size);
            }
        } else {
            let (fl, sl) = mapping_insert(size);
            self.free_lists[fl as usize][sl as usize] = next_free;
            if next_free.is_none() {
                self.second_level_bitsets[fl as usize] &= !(1 << sl);
                if self.second_level_bitsets[fl as usize] == 0 {
                    self.first_level_bitset &= !(1 << fl);
                }
            }
        }

        if let Some(next) = next_free {
            self.span_mut(next).prev_free = prev_free;
        }

        let span = self.span_mut(handle);
        span.prev_free = None;
        span.next_free = None;
        span.used_offset = span.offset;
        span.used_size = span.size;
    }

    /// Walks the physical span list, asserting the universal invariants
    /// from spec.md §8: exact tiling, no two adjacent free spans, and
    /// free+used+wasted summing to `memory_size`. Intended for tests.
    #[cfg(any(test, feature = "check-integrity"))]
    pub fn check_integrity(&self) {
        let mut cursor = self.first_physical;
        let mut expected_offset = 0u32;
        let mut free = 0u32;
        let mut used = 0u32;
        let mut wasted = 0u32;
        let mut prev_was_free = false;
        while let Some(handle) = cursor {
            let span = self.span(handle);
            assert_eq!(span.offset, expected_offset, "physical spans must tile without gaps");
            expected_offset += span.size;
            if span.is_free() {
                assert!(!prev_was_free, "two adjacent physical spans are both free");
                free += span.size;
            } else {
                used += span.used_size;
                wasted += span.size - span.used_size;
            }
            prev_was_free = span.is_free();
            cursor = span.next_physical;
        }
        assert_eq!(expected_offset, self.memory_size);
        assert_eq!(free, self.free_size);
        assert_eq!(used, self.used_size);
        assert_eq!(free + used + wasted, self.memory_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_allocation_is_aligned_and_accounted() {
        // S4: TLSF(memory=1 MiB, page=256). alloc(size=100, align=64).
        let mut tlsf = Tlsf::new(1 << 20, 256).unwrap();
        let (offset, handle) = tlsf.alloc(100, 64).unwrap();
        assert_eq!(offset % 64, 0);
        let (free, used, wasted) = tlsf.free_used_wasted_sizes();
        assert_eq!(free + used + wasted, 1 << 20);
        tlsf.check_integrity();

        tlsf.free(handle);
        let (free, used, wasted) = tlsf.free_used_wasted_sizes();
        assert_eq!(free, 1 << 20);
        assert_eq!(used, 0);
        assert_eq!(wasted, 0);
        tlsf.check_integrity();
    }

    #[test]
    fn construction_rejects_bad_parameters() {
        assert_eq!(Tlsf::new(0, 256).unwrap_err(), TlsfError::ZeroMemorySize);
        assert_eq!(Tlsf::new(1024, 3).unwrap_err(), TlsfError::PageSizeNotPowerOfTwo);
        assert_eq!(
            Tlsf::new(1000, 256).unwrap_err(),
            TlsfError::MemorySizeNotPageAligned(1000, 256)
        );
    }

    #[test]
    fn exhausts_and_then_free_recovers_whole_pool() {
        let mut tlsf = Tlsf::new(4096, 256).unwrap();
        assert!(tlsf.alloc(4096, 1).is_some());
        assert!(tlsf.alloc(1, 1).is_none(), "pool is fully used");
    }

    #[test]
    fn debug_info_sums_to_memory_size() {
        let mut tlsf = Tlsf::new(8192, 256).unwrap();
        let (_offset, handle) = tlsf.alloc(100, 16).unwrap();
        let info = tlsf.debug_info();
        let total: u32 = info.iter().map(|s| s.size).sum();
        assert_eq!(total, 8192);
        tlsf.free(handle);
    }

    #[test]
    fn coalesces_on_free() {
        let mut tlsf = Tlsf::new(4096, 256).unwrap();
        let (_, a) = tlsf.alloc(512, 256).unwrap();
        let (_, b) = tlsf.alloc(512, 256).unwrap();
        let (_, c) = tlsf.alloc(512, 256).unwrap();
        tlsf.free(a);
        tlsf.free(b);
        tlsf.free(c);
        let (free, used, wasted) = tlsf.free_used_wasted_sizes();
        assert_eq!(free, 4096);
        assert_eq!(used, 0);
        assert_eq!(wasted, 0);
        assert_eq!(tlsf.debug_info().len(), 1, "fully freed pool should coalesce to one span");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Alloc { size: u32, align_log2: u8 },
        Free { which: usize },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..=65536, 0u8..=12).prop_map(|(size, align_log2)| Op::Alloc { size, align_log2 }),
            (0usize..64).prop_map(|which| Op::Free { which }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // S5 + invariants 4-7: random alloc/free workload maintains
        // TLSF's structural invariants at every step.
        #[test]
        fn random_workload_maintains_invariants(ops in proptest::collection::vec(op_strategy(), 0..256)) {
            let mut tlsf = Tlsf::new(1 << 20, 256).unwrap();
            let mut live: Vec<(u32, spin_handle::Handle)> = Vec::new();

            for op in ops {
                match op {
                    Op::Alloc { size, align_log2 } => {
                        let alignment = 1u32 << (align_log2 as u32).min(12);
                        if let Some((offset, handle)) = tlsf.alloc(size, alignment) {
                            prop_assert_eq!(offset % alignment, 0);
                            live.push((offset, handle));
                        }
                    }
                    Op::Free { which } => {
                        if !live.is_empty() {
                            let (_, handle) = live.remove(which % live.len());
                            tlsf.free(handle);
                        }
                    }
                }

                let (free, used, wasted) = tlsf.free_used_wasted_sizes();
                prop_assert_eq!(free + used + wasted, tlsf.memory_size());
            }
            tlsf.check_integrity();
        }
    }
}

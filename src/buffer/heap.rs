//! Per-context linear (bump) heap.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::device::CompletionToken;
use crate::errors::Result;
use crate::utils::format_bytes;

use super::page::{DynamicAllocation, DynamicPage};
use super::provider::PageProvider;

/// Round `value` up to the next multiple of `alignment`, or `None` when the
/// rounding would wrap.
fn align_up(value: u64, alignment: u64) -> Option<u64> {
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}

/// Per-rendering-context bump allocator over [`PageProvider`] pages.
///
/// Not thread-safe by design: one rendering context is driven by one thread,
/// and the `&mut self` API enforces that statically. All pages consumed
/// during a frame are handed back in one batch by [`Self::finish_frame`];
/// there is no individual free.
pub struct LinearHeap {
    provider: Arc<PageProvider>,
    name: String,
    base_page_size: u64,

    /// Pages consumed this frame; the last one is the current bump target.
    pages: SmallVec<[DynamicPage; 4]>,
    /// Byte cursor inside the current page. Meaningless while `pages` is
    /// empty.
    cursor: u64,
    /// Remaining capacity of the current page.
    available_size: u64,

    curr_allocated_size: u64,
    curr_used_size: u64,
    peak_allocated_size: u64,
    peak_used_size: u64,
    frame_index: u64,
}

impl LinearHeap {
    /// Create a heap that grows in pages of at least `base_page_size` bytes.
    ///
    /// # Panics
    /// Panics if `base_page_size` is zero.
    #[must_use]
    pub fn new(provider: Arc<PageProvider>, name: &str, base_page_size: u64) -> Self {
        assert!(base_page_size > 0, "base page size must be non-zero");
        Self {
            provider,
            name: name.to_string(),
            base_page_size,
            pages: SmallVec::new(),
            cursor: 0,
            available_size: 0,
            curr_allocated_size: 0,
            curr_used_size: 0,
            peak_allocated_size: 0,
            peak_used_size: 0,
            frame_index: 0,
        }
    }

    /// Bump-allocate `size` bytes at the given alignment.
    ///
    /// Zero-byte requests are legal: they consume no capacity but still
    /// resolve to a valid aligned offset. The returned allocation must not
    /// outlive the frame — it references a page that
    /// [`Self::finish_frame`] will hand back for recycling.
    ///
    /// # Panics
    /// Panics if `alignment` is not a power of two.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<DynamicAllocation> {
        assert!(
            alignment.is_power_of_two(),
            "alignment ({alignment}) must be a power of two"
        );

        if self.current_fit(size, alignment).is_none() {
            let page = self.provider.allocate_page(self.grown_page_size(size))?;
            self.cursor = 0;
            self.available_size = page.size();
            self.curr_allocated_size += page.size();
            self.peak_allocated_size = self.peak_allocated_size.max(self.curr_allocated_size);
            self.pages.push(page);
        }

        let (aligned_offset, adjusted_size) = self
            .current_fit(size, alignment)
            .expect("a freshly fetched page fits the request");
        self.available_size -= adjusted_size;
        self.cursor += adjusted_size;

        self.curr_used_size += size;
        self.peak_used_size = self.peak_used_size.max(self.curr_used_size);

        let page = self
            .pages
            .last()
            .expect("a current page exists after a successful fit check");
        Ok(DynamicAllocation {
            buffer: page.handle(),
            offset: aligned_offset,
            size,
            cpu_ptr: page.cpu_address(aligned_offset),
            gpu_address: page.gpu_address(aligned_offset),
            #[cfg(debug_assertions)]
            frame_index: self.frame_index,
        })
    }

    /// Hand every page consumed this frame back to the provider, tagged with
    /// the frame's completion token, and reset the heap to its empty state.
    ///
    /// Must be called exactly once per frame per context, and before the
    /// heap is dropped.
    pub fn finish_frame(&mut self, token: CompletionToken) {
        let pages = std::mem::take(&mut self.pages);
        if !pages.is_empty() {
            log::trace!(
                "{}: frame {} done, discarding {} pages (token {token})",
                self.name,
                self.frame_index,
                pages.len()
            );
            self.provider.discard_pages(pages, token);
        }
        self.cursor = 0;
        self.available_size = 0;
        self.curr_allocated_size = 0;
        self.curr_used_size = 0;
        self.frame_index += 1;
    }

    /// Peak of the per-frame sum of requested bytes.
    #[must_use]
    pub fn peak_used_size(&self) -> u64 {
        self.peak_used_size
    }

    /// Peak of the per-frame sum of page bytes held.
    #[must_use]
    pub fn peak_allocated_size(&self) -> u64 {
        self.peak_allocated_size
    }

    /// Pages held by the current frame.
    #[must_use]
    pub fn active_page_count(&self) -> usize {
        self.pages.len()
    }

    /// `(aligned_offset, adjusted_size)` if the request fits in the current
    /// page. Any overflow in the cursor math means it cannot fit.
    fn current_fit(&self, size: u64, alignment: u64) -> Option<(u64, u64)> {
        self.pages.last()?;
        let aligned_offset = align_up(self.cursor, alignment)?;
        let adjusted_size = size.checked_add(aligned_offset - self.cursor)?;
        (adjusted_size <= self.available_size).then_some((aligned_offset, adjusted_size))
    }

    /// Smallest power-of-two multiple of the base page size that can hold
    /// `size` (on multiply overflow, fall back to the exact request).
    fn grown_page_size(&self, size: u64) -> u64 {
        let mut page_size = self.base_page_size;
        while page_size < size {
            page_size = match page_size.checked_mul(2) {
                Some(doubled) => doubled,
                None => size,
            };
        }
        page_size
    }
}

impl Drop for LinearHeap {
    fn drop(&mut self) {
        if !self.pages.is_empty() {
            if std::thread::panicking() {
                log::error!(
                    "{}: dropped with {} pages still allocated; finish_frame() was not called",
                    self.name,
                    self.pages.len()
                );
                return;
            }
            panic!(
                "{}: dropped with pages still allocated; finish_frame() was not called",
                self.name
            );
        }
        let utilization = self.peak_used_size as f64
            / self.peak_allocated_size.max(1) as f64
            * 100.0;
        log::info!(
            "{} usage stats: peak used/allocated {} / {} ({utilization:.1}% utilization)",
            self.name,
            format_bytes(self.peak_used_size),
            format_bytes(self.peak_allocated_size)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn align_up_rounds_to_power_of_two_multiples() {
        assert_eq!(align_up(0, 1), Some(0));
        assert_eq!(align_up(0, 256), Some(0));
        assert_eq!(align_up(1, 256), Some(256));
        assert_eq!(align_up(256, 256), Some(256));
        assert_eq!(align_up(257, 256), Some(512));
        assert_eq!(align_up(300, 4), Some(300));
        assert_eq!(align_up(301, 4), Some(304));
    }

    #[test]
    fn align_up_reports_wrapping_instead_of_overflowing() {
        assert_eq!(align_up(u64::MAX, 1), Some(u64::MAX));
        assert_eq!(align_up(u64::MAX, 2), None);
        assert_eq!(align_up(u64::MAX - 200, 256), None);
    }
}

//! Thread-safe page provider.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{BufferDevice, CompletionToken};
use crate::errors::{FramePoolError, Result};
use crate::utils::format_bytes;

use super::page::DynamicPage;

/// A page awaiting safe reuse: discarded by a heap at frame end, not yet
/// confirmed finished by the GPU.
struct StalePageInfo {
    page: DynamicPage,
    token: CompletionToken,
}

#[derive(Default)]
struct PageIndex {
    /// Available pages keyed by capacity, ascending. Selection among pages
    /// of equal size is unspecified.
    available: BTreeMap<u64, Vec<DynamicPage>>,
    /// Append-ordered, so completion tokens are non-decreasing front to
    /// back.
    stale: VecDeque<StalePageInfo>,
}

/// Thread-safe owner of every dynamic memory page.
///
/// Satisfies page requests smallest-sufficient-first, creates pages on
/// demand through the [`BufferDevice`] collaborator, and recycles discarded
/// pages once the externally reported completion counter passes their token.
///
/// A single mutex guards both the available index and the stale queue; the
/// critical sections cover index mutation only, never a device call.
pub struct PageProvider {
    device: Arc<dyn BufferDevice>,
    index: Mutex<PageIndex>,
}

impl PageProvider {
    /// Create a provider and pre-reserve `pages_to_reserve` pages of
    /// `page_size` bytes each. Reservation failures are logged and skipped;
    /// pages will be created on demand instead.
    #[must_use]
    pub fn new(device: Arc<dyn BufferDevice>, pages_to_reserve: u32, page_size: u64) -> Self {
        let provider = Self {
            device,
            index: Mutex::new(PageIndex::default()),
        };
        for _ in 0..pages_to_reserve {
            match provider.create_page(page_size) {
                Ok(page) => {
                    let mut index = provider.index.lock();
                    index.available.entry(page.size()).or_default().push(page);
                }
                Err(err) => {
                    log::warn!("page reservation stopped early: {err}");
                    break;
                }
            }
        }
        provider
    }

    /// Hand out a page of at least `size` bytes.
    ///
    /// The smallest available page with sufficient capacity is removed from
    /// the index and returned; if none exists, a new page of exactly `size`
    /// bytes is created through the device. Ownership transfers to the
    /// caller either way.
    pub fn allocate_page(&self, size: u64) -> Result<DynamicPage> {
        {
            let mut index = self.index.lock();
            let key = index.available.range(size..).next().map(|(&k, _)| k);
            if let Some(key) = key {
                if let Entry::Occupied(mut entry) = index.available.entry(key) {
                    let page = entry.get_mut().pop();
                    if entry.get().is_empty() {
                        entry.remove();
                    }
                    if let Some(page) = page {
                        return Ok(page);
                    }
                }
            }
        }
        self.create_page(size)
    }

    /// Move a batch of pages (typically one context's full frame) into the
    /// stale queue, tagged with the frame's completion token.
    ///
    /// Tokens must be non-decreasing across calls; the release scan relies
    /// on the queue staying sorted by insertion order.
    pub fn discard_pages(
        &self,
        pages: impl IntoIterator<Item = DynamicPage>,
        token: CompletionToken,
    ) {
        let mut index = self.index.lock();
        debug_assert!(
            index.stale.back().is_none_or(|back| back.token <= token),
            "completion tokens must be non-decreasing"
        );
        for page in pages {
            index.stale.push_back(StalePageInfo { page, token });
        }
    }

    /// Recycle every stale page whose token is `<= last_completed` back into
    /// the available index.
    ///
    /// Stops at the first still-pending entry: tokens only grow toward the
    /// back, so the scan is O(newly eligible), not O(queue).
    pub fn release_stale_pages(&self, last_completed: CompletionToken) {
        let mut index = self.index.lock();
        loop {
            let ready = index
                .stale
                .front()
                .is_some_and(|front| front.token <= last_completed);
            if !ready {
                break;
            }
            if let Some(info) = index.stale.pop_front() {
                log::trace!(
                    "recycling {} page (token {})",
                    format_bytes(info.page.size()),
                    info.token
                );
                index.available.entry(info.page.size()).or_default().push(info.page);
            }
        }
    }

    /// Tear the provider down, destroying every page through the device.
    ///
    /// `last_completed` must cover every token ever passed to
    /// [`Self::discard_pages`] — the device must be idled first.
    ///
    /// # Panics
    /// Panics if stale pages are still awaiting completion.
    pub fn destroy(&self, last_completed: CompletionToken) {
        self.release_stale_pages(last_completed);
        let available = {
            let mut index = self.index.lock();
            assert!(
                index.stale.is_empty(),
                "stale pages are still in use; the device must be idled before destroy()"
            );
            std::mem::take(&mut index.available)
        };

        let mut total_bytes = 0u64;
        for (_, bucket) in available {
            for page in bucket {
                total_bytes += page.size();
                self.device.destroy_buffer(page.handle());
            }
        }
        log::info!(
            "page provider usage stats: total allocated memory {}",
            format_bytes(total_bytes)
        );
    }

    /// Number of pages currently sitting in the available index.
    #[must_use]
    pub fn available_page_count(&self) -> usize {
        self.index.lock().available.values().map(Vec::len).sum()
    }

    /// Number of pages awaiting GPU completion.
    #[must_use]
    pub fn stale_page_count(&self) -> usize {
        self.index.lock().stale.len()
    }

    /// Total bytes of every page the provider currently owns (available or
    /// stale; pages out in heaps are not counted).
    #[must_use]
    pub fn total_resident_bytes(&self) -> u64 {
        let index = self.index.lock();
        let available: u64 = index
            .available
            .values()
            .flat_map(|bucket| bucket.iter())
            .map(DynamicPage::size)
            .sum();
        let stale: u64 = index.stale.iter().map(|info| info.page.size()).sum();
        available + stale
    }

    fn create_page(&self, size: u64) -> Result<DynamicPage> {
        match self.device.create_buffer(size) {
            Ok(buffer) => {
                log::debug!(
                    "created dynamic page: {} at GPU address {:#x}",
                    format_bytes(size),
                    buffer.gpu_address
                );
                Ok(DynamicPage::new(buffer, size))
            }
            Err(source) => {
                log::error!("failed to create a {}-byte dynamic page: {source}", size);
                Err(FramePoolError::PageCreation { size, source })
            }
        }
    }
}

impl Drop for PageProvider {
    fn drop(&mut self) {
        let index = self.index.get_mut();
        if !index.stale.is_empty() {
            if std::thread::panicking() {
                log::error!(
                    "page provider dropped with {} stale pages still in flight",
                    index.stale.len()
                );
            } else {
                panic!(
                    "page provider dropped with stale pages still in flight; \
                     call destroy() after idling the device"
                );
            }
        }
        for (_, bucket) in std::mem::take(&mut index.available) {
            for page in bucket {
                self.device.destroy_buffer(page.handle());
            }
        }
    }
}

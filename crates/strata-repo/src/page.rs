//! Identifier allocation and the paged slot arena.
//!
//! Ids come from one atomic counter and decompose into `(page, offset)`.
//! Pages are allocated on first use and never move or shrink, so a slot
//! reference stays valid for the lifetime of the table.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use strata_types::{Rid, PAGE_SIZE};
use tracing::debug;

use crate::error::{RepoError, RepoResult};
use crate::storage::ResourceStorage;

type Page = Box<[ResourceStorage]>;

pub(crate) struct PageTable {
    counter: AtomicU64,
    pages: Box<[OnceLock<Page>]>,
    grow: Mutex<()>,
    allocated: AtomicUsize,
}

impl PageTable {
    pub(crate) fn new(max_pages: usize) -> Self {
        let pages = (0..max_pages).map(|_| OnceLock::new()).collect();
        Self {
            // Id 0 is the null rid and is never handed out.
            counter: AtomicU64::new(1),
            pages,
            grow: Mutex::new(()),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Allocate the next id and make sure its page exists.
    pub(crate) fn new_id(&self) -> RepoResult<Rid> {
        let id = self.counter.fetch_add(1, Ordering::AcqRel);
        let rid = Rid::from_raw(id);
        if rid.page() as usize >= self.pages.len() {
            return Err(RepoError::CapacityExhausted {
                max_pages: self.pages.len(),
            });
        }
        self.ensure_page(rid.page() as usize);
        Ok(rid)
    }

    fn ensure_page(&self, page: usize) -> &Page {
        if let Some(slots) = self.pages[page].get() {
            return slots;
        }
        let _guard = self.grow.lock();
        self.pages[page].get_or_init(|| {
            self.allocated.fetch_add(1, Ordering::AcqRel);
            debug!(page, slots = PAGE_SIZE, "slot page allocated");
            (0..PAGE_SIZE).map(|_| ResourceStorage::vacant()).collect()
        })
    }

    /// The slot addressed by `rid`.
    ///
    /// Fails for the null id and for ids never handed out. The slot may
    /// belong to a destroyed resource; callers compare its stored rid.
    pub(crate) fn slot(&self, rid: Rid) -> RepoResult<&ResourceStorage> {
        if rid.is_null() || rid.as_u64() >= self.counter.load(Ordering::Acquire) {
            return Err(RepoError::InvalidRid(rid));
        }
        self.pages
            .get(rid.page() as usize)
            .and_then(OnceLock::get)
            .map(|slots| &slots[rid.offset() as usize])
            .ok_or(RepoError::InvalidRid(rid))
    }

    /// Every slot of every allocated page, in id order.
    pub(crate) fn slots(&self) -> impl Iterator<Item = &ResourceStorage> + '_ {
        self.pages
            .iter()
            .filter_map(OnceLock::get)
            .flat_map(|slots| slots.iter())
    }

    pub(crate) fn page_count(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub(crate) fn max_pages(&self) -> usize {
        self.pages.len()
    }
}

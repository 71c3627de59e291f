//! Client-side pagination of the row-error preview.
//!
//! The preview is bounded by the server, so paging is a pure slice over
//! memory. Page numbers are 1-indexed and always clamped; no operation
//! here can panic on an out-of-range page.

use std::sync::Arc;

use crate::import::ImportRowError;

/// Number of row errors shown per page.
pub const ERROR_PAGE_SIZE: usize = 10;

/// Number of pages needed for `len` items (0 for an empty list).
pub fn total_pages(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    len.div_ceil(page_size)
}

/// Clamp a requested page into `[1, max(1, total_pages)]`.
pub fn clamp_page(page: usize, total_pages: usize) -> usize {
    page.max(1).min(total_pages.max(1))
}

/// Pager over a shared error preview.
///
/// Holds the preview by `Arc` so a new import attempt (a new allocation)
/// can be told apart from a re-render of the same one.
#[derive(Debug, Clone)]
pub struct ErrorPaginator {
    errors: Arc<[ImportRowError]>,
    page: usize,
}

impl Default for ErrorPaginator {
    fn default() -> Self {
        Self::new(Arc::from(Vec::new()))
    }
}

impl ErrorPaginator {
    pub fn new(errors: Arc<[ImportRowError]>) -> Self {
        Self { errors, page: 1 }
    }

    /// Point the pager at `errors`, going back to page 1 if it is a
    /// different list than the one currently held.
    pub fn sync(&mut self, errors: &Arc<[ImportRowError]>) {
        if !Arc::ptr_eq(&self.errors, errors) {
            self.errors = Arc::clone(errors);
            self.page = 1;
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.errors.len(), ERROR_PAGE_SIZE)
    }

    /// Number of errors in the preview.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Jump to `page`, clamped. Returns the page actually selected.
    pub fn set_page(&mut self, page: usize) -> usize {
        self.page = clamp_page(page, self.total_pages());
        self.page
    }

    pub fn next(&mut self) -> usize {
        self.set_page(self.page.saturating_add(1))
    }

    pub fn prev(&mut self) -> usize {
        self.set_page(self.page.saturating_sub(1))
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    /// Errors on the current page.
    pub fn page_items(&self) -> &[ImportRowError] {
        match self.range() {
            Some((first, last)) => &self.errors[first - 1..last],
            None => &[],
        }
    }

    /// 1-indexed inclusive bounds of the current page, `None` when empty.
    pub fn range(&self) -> Option<(usize, usize)> {
        if self.errors.is_empty() {
            return None;
        }
        let first = (self.page - 1) * ERROR_PAGE_SIZE + 1;
        let last = (first + ERROR_PAGE_SIZE - 1).min(self.errors.len());
        Some((first, last))
    }

    /// Caption in the form `"11–20 of 34"`.
    pub fn caption(&self) -> String {
        match self.range() {
            Some((first, last)) => format!("{first}–{last} of {}", self.errors.len()),
            None => "0 of 0".to_string(),
        }
    }
}

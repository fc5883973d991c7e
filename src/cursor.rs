//! Pull-based iteration over a store's entries.
//!
//! Every driver exposes its entries as an [`EntryCursor`] in the backend's
//! native order. A cursor is created per call, so each `keys()` or
//! `iterate()` starts from the beginning. Engines without a borrowing
//! iterator page through their data with [`PagedCursor`].

use std::collections::VecDeque;

use crate::errors::KvResult;
use crate::value::Value;

/// A lazily evaluated sequence of `(key, value)` entries.
pub type EntryCursor<'a> = Box<dyn Iterator<Item = KvResult<(String, Value)>> + Send + 'a>;

/// One page of entries plus the position the next page starts after.
pub struct Page<P> {
    pub entries: Vec<(String, Value)>,
    /// `None` once the last page has been served.
    pub next: Option<P>,
}

impl<P> Page<P> {
    pub fn last(entries: Vec<(String, Value)>) -> Self {
        Self {
            entries,
            next: None,
        }
    }
}

/// A cursor that pulls pages on demand.
///
/// `fetch` receives the position returned with the previous page (`None`
/// for the first one). An error from `fetch` is yielded once and ends the
/// cursor.
pub struct PagedCursor<P, F> {
    fetch: F,
    position: Option<P>,
    buffered: VecDeque<(String, Value)>,
    done: bool,
}

impl<P, F> PagedCursor<P, F>
where
    F: FnMut(Option<&P>) -> KvResult<Page<P>>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            position: None,
            buffered: VecDeque::new(),
            done: false,
        }
    }
}

impl<P, F> Iterator for PagedCursor<P, F>
where
    F: FnMut(Option<&P>) -> KvResult<Page<P>>,
{
    type Item = KvResult<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffered.is_empty() {
            if self.done {
                return None;
            }
            match (self.fetch)(self.position.as_ref()) {
                Ok(page) => {
                    self.done = page.next.is_none();
                    self.position = page.next;
                    self.buffered.extend(page.entries);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffered.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KvError;

    fn entries(range: std::ops::Range<i64>) -> Vec<(String, Value)> {
        range.map(|i| (format!("k{i}"), Value::Int(i))).collect()
    }

    #[test]
    fn pulls_pages_until_exhausted() {
        let mut calls = 0;
        let cursor = PagedCursor::new(|pos: Option<&i64>| {
            calls += 1;
            let start = pos.copied().unwrap_or(0);
            if start >= 5 {
                return Ok(Page::last(entries(start..start.min(5))));
            }
            let end = (start + 2).min(5);
            Ok(Page {
                entries: entries(start..end),
                next: if end < 5 { Some(end) } else { None },
            })
        });
        let keys: Vec<_> = cursor.map(|e| e.unwrap().0).collect();
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);
        assert_eq!(calls, 3);
    }

    #[test]
    fn stops_after_error() {
        let mut cursor = PagedCursor::new(|_: Option<&()>| -> KvResult<Page<()>> {
            Err(KvError::Storage("gone".into()))
        });
        assert!(matches!(cursor.next(), Some(Err(_))));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn lazy_until_pulled() {
        let mut calls = 0;
        {
            let _cursor = PagedCursor::new(|_: Option<&()>| {
                calls += 1;
                Ok(Page::last(Vec::new()))
            });
        }
        assert_eq!(calls, 0);
    }
}

use crate::error::{HierarchyError, HierarchyResult};
use crate::model::{PageWindow, ProcessedNode, Row};
use crate::store::traits::RowStream;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts rows produced for one hierarchy level, across every query the level
/// runs (hidden node children included), and stops the level once a ceiling is
/// exceeded.
#[derive(Debug, Clone)]
pub struct RowLimiter {
    limit: Option<usize>,
    produced: Arc<AtomicUsize>,
}

impl RowLimiter {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    /// Account for one more row
    pub fn count_row(&self) -> HierarchyResult<()> {
        let produced = self.produced.fetch_add(1, Ordering::SeqCst) + 1;
        match self.limit {
            Some(limit) if produced > limit => Err(HierarchyError::ResultSetTooLarge { limit: Some(limit) }),
            _ => Ok(()),
        }
    }

    /// Wrap a row stream so it fails on the first row past the ceiling. Nothing is
    /// pulled from `rows` after that.
    pub fn guard(&self, rows: RowStream) -> BoxStream<'static, HierarchyResult<Row>> {
        let limiter = self.clone();
        Box::pin(async_stream::stream! {
            let mut rows = rows;
            while let Some(row) = rows.next().await {
                let row = match row {
                    Ok(row) => row,
                    Err(err) => {
                        yield Err(HierarchyError::from(err));
                        return;
                    }
                };
                if let Err(err) = limiter.count_row() {
                    yield Err(err);
                    return;
                }
                yield Ok(row);
            }
        })
    }
}

/// One page of a level together with the level's size
#[derive(Debug, Clone, PartialEq)]
pub struct PageSlice {
    pub total: usize,
    pub nodes: Vec<ProcessedNode>,
}

pub struct Paginator;

impl Paginator {
    /// Slice `nodes` to `page` while counting them, in a single pass. No window
    /// returns everything.
    pub fn slice<'a>(nodes: impl IntoIterator<Item = &'a ProcessedNode>, page: Option<PageWindow>) -> PageSlice {
        let (start, end) = match page {
            Some(page) => (page.start, page.start.saturating_add(page.size)),
            None => (0, usize::MAX),
        };

        let mut total = 0;
        let mut selected = Vec::new();
        for node in nodes {
            if total >= start && total < end {
                selected.push(node.clone());
            }
            total += 1;
        }

        PageSlice {
            total,
            nodes: selected,
        }
    }
}

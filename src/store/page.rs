//! Offset/tail pagination over ordered collections

use serde::{Deserialize, Serialize};

/// Which slice of a collection to return
///
/// - `offset >= 0`: start at position `offset`, take `length` items
/// - `offset < 0`: tail mode, the last `|offset|` items (capped by `length`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Start position, or negative tail count
    pub offset: i64,
    /// Maximum number of items
    pub length: usize,
}

impl PageRequest {
    /// Start at `offset`, take at most `length`
    #[must_use]
    pub const fn new(offset: i64, length: usize) -> Self {
        Self { offset, length }
    }

    /// The last `count` items
    #[must_use]
    pub const fn tail(count: usize) -> Self {
        Self {
            offset: -(count as i64),
            length: count,
        }
    }

    /// Everything
    #[must_use]
    pub const fn all() -> Self {
        Self {
            offset: 0,
            length: usize::MAX,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 100)
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in collection order
    pub items: Vec<T>,
    /// Size of the whole collection
    pub total: usize,
    /// Whether items exist beyond this page
    pub has_more: bool,
}

impl<T: Clone> Page<T> {
    /// Slice an ordered collection
    pub fn slice(items: &[T], request: PageRequest) -> Self {
        let total = items.len();
        if request.offset >= 0 {
            let start = usize::try_from(request.offset).unwrap_or(usize::MAX).min(total);
            let page: Vec<T> = items[start..].iter().take(request.length).cloned().collect();
            let has_more = start + page.len() < total;
            Self {
                items: page,
                total,
                has_more,
            }
        } else {
            let tail = usize::try_from(request.offset.unsigned_abs())
                .unwrap_or(usize::MAX)
                .min(request.length)
                .min(total);
            Self {
                items: items[total - tail..].to_vec(),
                total,
                has_more: false,
            }
        }
    }
}

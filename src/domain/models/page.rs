//! Pagination envelope for task listings.

use serde::{Deserialize, Serialize};

use crate::domain::models::Task;

/// 1-based range description of a page within a filtered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    /// 1-based index of the first item in this page; 0 when the page is empty.
    pub range_start: u64,
    /// 1-based index of the last item in this page; 0 when the page is empty.
    pub range_end: u64,
    pub has_more: bool,
}

impl PageInfo {
    pub fn new(total: u64, offset: u64, limit: u64, returned: u64) -> Self {
        let (range_start, range_end) = if returned == 0 {
            (0, 0)
        } else {
            (offset + 1, offset + returned)
        };
        Self {
            total,
            offset,
            limit,
            range_start,
            range_end,
            has_more: offset + returned < total,
        }
    }
}

/// One page of tasks plus its pagination envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub pagination: PageInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middle_page() {
        let info = PageInfo::new(250, 100, 50, 50);
        assert_eq!(info.range_start, 101);
        assert_eq!(info.range_end, 150);
        assert!(info.has_more);
    }

    #[test]
    fn test_last_partial_page() {
        let info = PageInfo::new(105, 100, 50, 5);
        assert_eq!(info.range_start, 101);
        assert_eq!(info.range_end, 105);
        assert!(!info.has_more);
    }

    #[test]
    fn test_empty_page() {
        let info = PageInfo::new(10, 50, 50, 0);
        assert_eq!(info.range_start, 0);
        assert_eq!(info.range_end, 0);
        assert!(!info.has_more);
    }
}

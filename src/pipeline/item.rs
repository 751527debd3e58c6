use crate::crawler::sniff_html;
use crate::queue::DeliveryHandle;
use url::Url;

/// A URL travelling through the pipeline together with its delivery
///
/// Exactly one stage owns an item at a time; it moves from stage to stage
/// through the inter-stage queues and its handle is settled exactly once.
#[derive(Debug)]
pub struct WorkItem {
    pub url: Url,
    pub body: Vec<u8>,
    pub handle: DeliveryHandle,
    /// The last stage that completed for this item
    pub state: ItemState,
}

impl WorkItem {
    /// Creates an item with an empty body for an admitted delivery
    pub fn new(url: Url, handle: DeliveryHandle) -> Self {
        Self {
            url,
            body: Vec::new(),
            handle,
            state: ItemState::Admitted,
        }
    }

    /// Returns true if the fetched body looks like HTML
    pub fn is_html(&self) -> bool {
        sniff_html(&self.body)
    }
}

/// Position of a work item in its lifecycle
///
/// `Admitted -> Fetched -> Persisted -> Extracted -> Acknowledged`, with
/// the other variants as failure exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    // ===== Active States =====
    Admitted,
    Fetched,
    Persisted,
    Extracted,

    // ===== Terminal States =====
    /// Fully processed and acknowledged
    Acknowledged,
    /// Turned away at admission as blacklisted, duplicate or invalid
    Rejected,
    /// Returned to the broker for another attempt
    Requeued,
    /// Acknowledged without completing, because retrying cannot help
    Dropped,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Acknowledged | Self::Rejected | Self::Requeued | Self::Dropped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(body: &str) -> WorkItem {
        let mut item = WorkItem::new(
            Url::parse("https://example.test/").unwrap(),
            DeliveryHandle::new(1, "https://example.test/"),
        );
        item.body = body.as_bytes().to_vec();
        item
    }

    #[test]
    fn test_new_item_has_empty_body() {
        let item = WorkItem::new(
            Url::parse("https://example.test/").unwrap(),
            DeliveryHandle::new(1, "https://example.test/"),
        );
        assert!(item.body.is_empty());
        assert!(!item.is_html());
        assert_eq!(item.state, ItemState::Admitted);
    }

    #[test]
    fn test_is_html_sniffs_body() {
        assert!(item("<html><body></body></html>").is_html());
        assert!(!item("plain text").is_html());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ItemState::Admitted.is_terminal());
        assert!(!ItemState::Extracted.is_terminal());
        assert!(ItemState::Acknowledged.is_terminal());
        assert!(ItemState::Requeued.is_terminal());
        assert!(ItemState::Dropped.is_terminal());
        assert!(ItemState::Rejected.is_terminal());
    }
}

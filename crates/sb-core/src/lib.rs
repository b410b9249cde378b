//! sigmaboard/crates/sb-core/src/lib.rs
//!
//! The central domain logic and interface definitions for Sigmaboard.

pub mod error;
pub mod models;
pub mod traits;
pub mod validation;
pub mod voting;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;
pub use voting::{transition, Transition, VoteCommand};

#[cfg(test)]
mod tests {
    use super::models::*;

    #[test]
    fn test_sort_param_mapping() {
        assert_eq!(SortMode::from_param(None, MediaFilter::All), SortMode::Latest);
        assert_eq!(SortMode::from_param(Some("best"), MediaFilter::Media), SortMode::Best);
        assert_eq!(
            SortMode::from_param(Some("hottest"), MediaFilter::Text),
            SortMode::Engagement
        );
        assert_eq!(SortMode::from_param(Some("hottest"), MediaFilter::All), SortMode::Best);
        assert_eq!(SortMode::from_param(Some("nope"), MediaFilter::Text), SortMode::Latest);
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let q = FeedQuery {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(q.search_term(), None);
    }
}

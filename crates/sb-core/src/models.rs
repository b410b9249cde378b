//! # Domain Models
//!
//! These structs represent the core entities of Sigmaboard.
//! Rows are passed around as named records, never as positional tuples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An anonymous participant, known only by the alias handed to its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Numeric string, e.g. "4821"
    pub alias: String,
    pub joined_at: DateTime<Utc>,
    /// Cumulative score ("sigma") received on owned posts and comments
    pub sigma: i64,
}

/// Counters derived per request for the caller's header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub posts: i64,
    pub comments: i64,
    /// Sum of the current scores of the user's posts
    pub post_score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author: String,
    pub title: Option<String>,
    pub body: Option<String>,
    /// Stored media filename; empty when the post is text-only
    pub media: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

/// A post as listed for a particular viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostView {
    pub post: Post,
    pub comment_count: i64,
    pub user_vote: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

/// A comment as listed for a particular viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentView {
    pub comment: Comment,
    pub user_vote: Option<Direction>,
}

/// Input for a new post. Validated by [`NewPost::validate`] before it reaches a store.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub author: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub media: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: i64,
    pub author: String,
    pub body: String,
}

/// Vote direction as stored in the `direction` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }

    /// Score contribution of a standing vote in this direction.
    pub fn weight(self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

/// The two votable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    Comment,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
        }
    }
}

/// Which subset of posts a listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaFilter {
    #[default]
    All,
    /// Posts with a media file
    Media,
    /// Posts without one
    Text,
}

/// Listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Descending creation time
    #[default]
    Latest,
    /// Descending score
    Best,
    /// Descending comment count
    Engagement,
}

impl SortMode {
    /// Maps the `sort` query parameter onto an order for a listing.
    ///
    /// `hottest` means engagement on text listings and score everywhere else;
    /// unknown or missing values fall back to recency.
    pub fn from_param(param: Option<&str>, filter: MediaFilter) -> Self {
        match param {
            Some("best") => Self::Best,
            Some("hottest") if filter == MediaFilter::Text => Self::Engagement,
            Some("hottest") => Self::Best,
            _ => Self::Latest,
        }
    }
}

/// Parameters of a feed read.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    /// Case-insensitive substring over author, title and body
    pub search: Option<String>,
    pub sort: SortMode,
    pub filter: MediaFilter,
}

impl FeedQuery {
    /// The search term, trimmed, or `None` when blank.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Result of a committed vote transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub kind: ItemKind,
    pub item_id: i64,
    /// Parent post of a voted comment; the post itself for post votes
    pub post_id: i64,
    pub new_score: i64,
    pub author: String,
    pub author_sigma: i64,
    pub state: Option<Direction>,
}

//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Comment, CommentView, FeedQuery, NewComment, NewPost, Post, PostView, User, UserStats,
    VoteOutcome,
};
use crate::voting::VoteCommand;

/// Data persistence contract for users, posts, comments and votes.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    // User Operations
    async fn find_user(&self, alias: &str) -> Result<Option<User>>;
    /// Fails with `AppError::Conflict` when the alias is already taken.
    async fn insert_user(&self, alias: &str, joined_at: DateTime<Utc>) -> Result<User>;
    async fn user_stats(&self, alias: &str) -> Result<UserStats>;

    // Post Operations
    async fn create_post(&self, post: NewPost) -> Result<Post>;
    async fn get_post(&self, id: i64) -> Result<Option<Post>>;
    async fn list_posts(&self, query: &FeedQuery, viewer: Option<&str>) -> Result<Vec<PostView>>;
    /// A single post with its comment count and the viewer's vote on it.
    async fn get_post_view(&self, id: i64, viewer: Option<&str>) -> Result<Option<PostView>>;
    /// Removes the post and everything hanging off it. Only the author may do this.
    /// Returns the deleted row so the caller can drop its media file.
    async fn delete_post(&self, id: i64, requester: &str) -> Result<Post>;

    // Comment Operations
    async fn add_comment(&self, comment: NewComment) -> Result<Comment>;
    async fn get_comment(&self, id: i64) -> Result<Option<Comment>>;
    /// Oldest first.
    async fn list_comments(&self, post_id: i64, viewer: Option<&str>) -> Result<Vec<CommentView>>;
    async fn delete_comment(&self, id: i64, requester: &str) -> Result<Comment>;

    // Votes
    /// Applies one voting transition atomically: vote row, item score and author sigma.
    async fn cast_vote(&self, vote: VoteCommand, voter: &str) -> Result<VoteOutcome>;
}

/// Media storage contract for uploaded files.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Saves raw bytes under a name derived from the author and the
    /// original filename. Returns the stored filename.
    async fn save_upload(&self, alias: &str, original_name: &str, data: &[u8]) -> Result<String>;
    /// Removes a stored file. A file that is already gone is not an error.
    async fn delete(&self, filename: &str) -> Result<()>;
    /// Returns the public URL of a stored file.
    fn url(&self, filename: &str) -> String;
}

/// Session identity contract: alias generation and cookie signing.
pub trait IdentityProvider: Send + Sync {
    /// Draws a candidate alias from the configured keyspace.
    fn generate_alias(&self) -> String;

    /// How many candidates the assigner may draw before failing closed.
    fn max_attempts(&self) -> u32;

    /// Fresh anti-forgery token for a session.
    fn new_csrf_token(&self) -> String;

    /// Appends a signature to a session payload.
    fn sign(&self, payload: &str) -> String;

    /// Returns the payload of a correctly signed value.
    fn verify(&self, signed: &str) -> Option<String>;
}

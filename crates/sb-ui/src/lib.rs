//! # sb-ui
//!
//! Askama templates for the feed, post detail and upload pages, plus the
//! flat view records they render. Entities are converted into these
//! records once, so templates only ever see named fields.

use askama::Template;
use chrono::{DateTime, Utc};
use sb_core::models::{CommentView, Direction, PostView, User, UserStats};
use sb_core::traits::MediaStore;
use sb_core::validation::{is_video, ALLOWED_EXTENSIONS};

/// Client script: vote buttons and the realtime socket.
pub const APP_JS: &str = include_str!("../static/app.js");
pub const APP_CSS: &str = include_str!("../static/app.css");

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn vote_classes(vote: Option<Direction>) -> (&'static str, &'static str) {
    match vote {
        Some(Direction::Up) => ("active", ""),
        Some(Direction::Down) => ("", "active"),
        None => ("", ""),
    }
}

/// The caller's identity strip at the top of every page.
#[derive(Debug, Clone, Default)]
pub struct Header {
    /// Empty when the request carries no valid identity
    pub alias: String,
    pub sigma: i64,
    pub posts: i64,
    pub comments: i64,
    pub post_score: i64,
    pub joined: String,
    pub csrf_token: String,
}

impl Header {
    pub fn new(user: Option<&User>, stats: UserStats, csrf_token: &str) -> Self {
        Self {
            alias: user.map(|u| u.alias.clone()).unwrap_or_default(),
            sigma: user.map_or(0, |u| u.sigma),
            posts: stats.posts,
            comments: stats.comments,
            post_score: stats.post_score,
            joined: user.map(|u| timestamp(u.joined_at)).unwrap_or_default(),
            csrf_token: csrf_token.to_string(),
        }
    }
}

/// A transient message shown once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// `success` or `error`
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PostCard {
    pub id: i64,
    pub author: String,
    pub title: String,
    pub body: String,
    /// Empty for text posts
    pub media_url: String,
    pub is_video: bool,
    pub score: i64,
    pub comment_count: i64,
    pub created: String,
    pub up_class: &'static str,
    pub down_class: &'static str,
    pub owned: bool,
}

impl PostCard {
    pub fn new(view: &PostView, viewer: Option<&str>, store: &dyn MediaStore) -> Self {
        let post = &view.post;
        let (up_class, down_class) = vote_classes(view.user_vote);
        Self {
            id: post.id,
            author: post.author.clone(),
            title: post.title.clone().unwrap_or_default(),
            body: post.body.clone().unwrap_or_default(),
            media_url: if post.has_media() {
                store.url(&post.media)
            } else {
                String::new()
            },
            is_video: is_video(&post.media),
            score: post.score,
            comment_count: view.comment_count,
            created: timestamp(post.created_at),
            up_class,
            down_class,
            owned: viewer == Some(post.author.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: i64,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created: String,
    pub up_class: &'static str,
    pub down_class: &'static str,
    pub owned: bool,
}

impl CommentRow {
    pub fn new(view: &CommentView, viewer: Option<&str>) -> Self {
        let comment = &view.comment;
        let (up_class, down_class) = vote_classes(view.user_vote);
        Self {
            id: comment.id,
            author: comment.author.clone(),
            body: comment.body.clone(),
            score: comment.score,
            created: timestamp(comment.created_at),
            up_class,
            down_class,
            owned: viewer == Some(comment.author.as_str()),
        }
    }
}

/// Renders a post listing (`/feed`, `/photos`, `/text`).
#[derive(Template)]
#[template(path = "feed.html")]
pub struct FeedTemplate {
    pub header: Header,
    pub notices: Vec<Notice>,
    pub heading: String,
    /// Path of this listing, used as the search form target
    pub path: String,
    pub posts: Vec<PostCard>,
    pub sort: String,
    pub view: String,
    pub q: String,
}

/// Renders a post with its comments.
#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub header: Header,
    pub notices: Vec<Notice>,
    pub post: PostCard,
    pub comments: Vec<CommentRow>,
}

/// Renders the upload form.
#[derive(Template)]
#[template(path = "create_post.html")]
pub struct CreatePostTemplate {
    pub header: Header,
    pub notices: Vec<Notice>,
    pub max_upload_mib: usize,
    pub allowed: String,
}

impl CreatePostTemplate {
    pub fn new(header: Header, notices: Vec<Notice>, max_upload_bytes: usize) -> Self {
        Self {
            header,
            notices,
            max_upload_mib: max_upload_bytes / (1024 * 1024),
            allowed: ALLOWED_EXTENSIONS.join(", "),
        }
    }
}

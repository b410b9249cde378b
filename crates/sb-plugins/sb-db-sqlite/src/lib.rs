//! # sb-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `sb-core` domain models.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sb_core::error::{AppError, Result};
use sb_core::models::{
    Comment, CommentView, Direction, FeedQuery, ItemKind, MediaFilter, NewComment, NewPost, Post,
    PostView, SortMode, User, UserStats, VoteOutcome,
};
use sb_core::traits::ContentRepo;
use sb_core::voting::{transition, VoteCommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

pub struct SqliteContentRepo {
    pool: SqlitePool,
}

const POST_COLUMNS: &str = "p.id, p.author, p.title, p.body, p.media, p.score, p.created_at";
const COMMENT_COLUMNS: &str = "c.id, c.post_id, c.author, c.body, c.score, c.created_at";

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Write transactions take the lock up front so concurrent writers queue
/// on `BUSY_TIMEOUT` instead of failing on a read-to-write upgrade.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// Table names for one votable kind.
struct VoteTables {
    item: &'static str,
    votes: &'static str,
    item_fk: &'static str,
}

impl VoteTables {
    fn for_kind(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Post => Self {
                item: "posts",
                votes: "votes",
                item_fk: "post_id",
            },
            ItemKind::Comment => Self {
                item: "comments",
                votes: "comment_votes",
                item_fk: "comment_id",
            },
        }
    }
}

// Helper for error classification
fn db_err(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(db.message().to_string())
        }
        sqlx::Error::RowNotFound => AppError::NotFound("Record".into(), "unknown".into()),
        _ => AppError::Internal(err.to_string()),
    }
}

fn post_from_row(row: &SqliteRow) -> sqlx::Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        author: row.try_get("author")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        media: row.try_get("media")?,
        score: row.try_get("score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn comment_from_row(row: &SqliteRow) -> sqlx::Result<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        author: row.try_get("author")?,
        body: row.try_get("body")?,
        score: row.try_get("score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> sqlx::Result<Option<Direction>> {
    let raw: Option<String> = row.try_get("user_vote")?;
    Ok(raw.as_deref().and_then(Direction::parse))
}

/// `SELECT` of post views, open for further `AND` clauses.
fn post_view_query(viewer: Option<&str>) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {POST_COLUMNS}, \
         (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count, \
         (SELECT v.direction FROM votes v WHERE v.post_id = p.id AND v.voter = "
    ));
    // An absent viewer matches no vote row.
    qb.push_bind(viewer.unwrap_or("").to_string());
    qb.push(") AS user_vote FROM posts p WHERE 1 = 1");
    qb
}

fn post_view_from_row(row: &SqliteRow) -> sqlx::Result<PostView> {
    Ok(PostView {
        post: post_from_row(row)?,
        comment_count: row.try_get("comment_count")?,
        user_vote: vote_from_row(row)?,
    })
}

/// Escapes `%`, `_` and `\` so user text matches literally inside LIKE.
///
/// Folds ASCII only, the same as SQLite's `LOWER()` on the column side.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl SqliteContentRepo {
    /// Opens (creating if needed) the database and applies migrations.
    ///
    /// In-memory URLs are pinned to a single long-lived connection, since
    /// every SQLite connection would otherwise see its own empty database.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        let pool = pool_options.connect_with(options).await.map_err(db_err)?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("migration failed: {e}")))?;
        tracing::debug!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ContentRepo for SqliteContentRepo {
    async fn find_user(&self, alias: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT alias, joined_at, sigma FROM users WHERE alias = ?")
            .bind(alias)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(User {
                alias: row.try_get("alias")?,
                joined_at: row.try_get("joined_at")?,
                sigma: row.try_get("sigma")?,
            })
        })
        .transpose()
        .map_err(db_err)
    }

    async fn insert_user(&self, alias: &str, joined_at: DateTime<Utc>) -> Result<User> {
        sqlx::query("INSERT INTO users (alias, joined_at, sigma) VALUES (?, ?, 0)")
            .bind(alias)
            .bind(joined_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(User {
            alias: alias.to_string(),
            joined_at,
            sigma: 0,
        })
    }

    async fn user_stats(&self, alias: &str) -> Result<UserStats> {
        let row = sqlx::query(
            "SELECT \
                (SELECT COUNT(*) FROM posts WHERE author = ?) AS posts, \
                (SELECT COUNT(*) FROM comments WHERE author = ?) AS comments, \
                (SELECT COALESCE(SUM(score), 0) FROM posts WHERE author = ?) AS post_score",
        )
        .bind(alias)
        .bind(alias)
        .bind(alias)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(UserStats {
            posts: row.try_get("posts").map_err(db_err)?,
            comments: row.try_get("comments").map_err(db_err)?,
            post_score: row.try_get("post_score").map_err(db_err)?,
        })
    }

    async fn create_post(&self, post: NewPost) -> Result<Post> {
        let post = post.validate()?;
        let created_at = Utc::now();
        let media = post.media.unwrap_or_default();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO posts (author, title, body, media, score, created_at) \
             VALUES (?, ?, ?, ?, 0, ?) RETURNING id",
        )
        .bind(&post.author)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&media)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Post {
            id,
            author: post.author,
            title: post.title,
            body: post.body,
            media,
            score: 0,
            created_at,
        })
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(post_from_row).transpose().map_err(db_err)
    }

    async fn list_posts(&self, query: &FeedQuery, viewer: Option<&str>) -> Result<Vec<PostView>> {
        let mut qb = post_view_query(viewer);

        match query.filter {
            MediaFilter::All => {}
            MediaFilter::Media => {
                qb.push(" AND p.media <> ''");
            }
            MediaFilter::Text => {
                qb.push(" AND p.media = ''");
            }
        }

        if let Some(term) = query.search_term() {
            let pattern = like_pattern(term);
            qb.push(" AND (LOWER(p.author) LIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" ESCAPE '\\' OR LOWER(COALESCE(p.title, '')) LIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" ESCAPE '\\' OR LOWER(COALESCE(p.body, '')) LIKE ");
            qb.push_bind(pattern);
            qb.push(" ESCAPE '\\')");
        }

        qb.push(match query.sort {
            SortMode::Latest => " ORDER BY p.created_at DESC, p.id DESC",
            SortMode::Best => " ORDER BY p.score DESC, p.created_at DESC, p.id DESC",
            SortMode::Engagement => " ORDER BY comment_count DESC, p.created_at DESC, p.id DESC",
        });

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter()
            .map(post_view_from_row)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(db_err)
    }

    async fn get_post_view(&self, id: i64, viewer: Option<&str>) -> Result<Option<PostView>> {
        let mut qb = post_view_query(viewer);
        qb.push(" AND p.id = ");
        qb.push_bind(id);
        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(post_view_from_row).transpose().map_err(db_err)
    }

    /// Deletes a post with its comments and votes in one transaction.
    ///
    /// # Developer Note
    /// Scores leave with their items: the post's score comes off its author's
    /// sigma and each cascaded comment's score off that comment's author, so
    /// sigma always equals the sum of a user's live item scores.
    async fn delete_post(&self, id: i64, requester: &str) -> Result<Post> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(db_err)?;

        let sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ?");
        let post = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(post_from_row)
            .transpose()
            .map_err(db_err)?
            .ok_or_else(|| AppError::not_found("Post", id))?;

        if post.author != requester {
            return Err(AppError::Unauthorized(
                "you can only delete your own posts".into(),
            ));
        }

        sqlx::query(
            "UPDATE users SET sigma = sigma - \
                (SELECT COALESCE(SUM(c.score), 0) FROM comments c \
                 WHERE c.post_id = ? AND c.author = users.alias) \
             WHERE alias IN (SELECT author FROM comments WHERE post_id = ?)",
        )
        .bind(id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("UPDATE users SET sigma = sigma - ? WHERE alias = ?")
            .bind(post.score)
            .bind(&post.author)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // Comments, votes and comment votes go with it via ON DELETE CASCADE.
        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(post)
    }

    async fn add_comment(&self, comment: NewComment) -> Result<Comment> {
        let comment = comment.validate()?;
        let created_at = Utc::now();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO comments (post_id, author, body, score, created_at) \
             SELECT id, ?, ?, 0, ? FROM posts WHERE id = ? RETURNING id",
        )
        .bind(&comment.author)
        .bind(&comment.body)
        .bind(created_at)
        .bind(comment.post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::not_found("Post", comment.post_id))?;

        Ok(Comment {
            id,
            post_id: comment.post_id,
            author: comment.author,
            body: comment.body,
            score: 0,
            created_at,
        })
    }

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(comment_from_row).transpose().map_err(db_err)
    }

    async fn list_comments(&self, post_id: i64, viewer: Option<&str>) -> Result<Vec<CommentView>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS}, \
             (SELECT v.direction FROM comment_votes v WHERE v.comment_id = c.id AND v.voter = ?) \
                AS user_vote \
             FROM comments c WHERE c.post_id = ? ORDER BY c.created_at ASC, c.id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(viewer.unwrap_or(""))
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok::<_, sqlx::Error>(CommentView {
                    comment: comment_from_row(row)?,
                    user_vote: vote_from_row(row)?,
                })
            })
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(db_err)
    }

    async fn delete_comment(&self, id: i64, requester: &str) -> Result<Comment> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(db_err)?;

        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = ?");
        let comment = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(comment_from_row)
            .transpose()
            .map_err(db_err)?
            .ok_or_else(|| AppError::not_found("Comment", id))?;

        if comment.author != requester {
            return Err(AppError::Unauthorized(
                "you can only delete your own comments".into(),
            ));
        }

        sqlx::query("UPDATE users SET sigma = sigma - ? WHERE alias = ?")
            .bind(comment.score)
            .bind(&comment.author)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(comment)
    }

    /// Atomic voting transition.
    ///
    /// # Developer Note
    /// The vote row, the item score and the author's sigma move together or
    /// not at all: any early return drops `tx`, which rolls back.
    async fn cast_vote(&self, vote: VoteCommand, voter: &str) -> Result<VoteOutcome> {
        let tables = VoteTables::for_kind(vote.kind);
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(db_err)?;

        // 1. Resolve the item's author (and parent post for comments)
        let target_sql = match vote.kind {
            ItemKind::Post => "SELECT author, id AS post_id FROM posts WHERE id = ?",
            ItemKind::Comment => "SELECT author, post_id FROM comments WHERE id = ?",
        };
        let target = sqlx::query(target_sql)
            .bind(vote.item_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| {
                let kind = match vote.kind {
                    ItemKind::Post => "Post",
                    ItemKind::Comment => "Comment",
                };
                AppError::not_found(kind, vote.item_id)
            })?;
        let author: String = target.try_get("author").map_err(db_err)?;
        let post_id: i64 = target.try_get("post_id").map_err(db_err)?;

        // 2. Current state of this voter on this item
        let current_sql = format!(
            "SELECT direction FROM {} WHERE {} = ? AND voter = ?",
            tables.votes, tables.item_fk
        );
        let current: Option<String> = sqlx::query_scalar(&current_sql)
            .bind(vote.item_id)
            .bind(voter)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let current = current.as_deref().and_then(Direction::parse);

        let step = transition(current, vote.direction);

        // 3. Persist the new vote state
        match (current, step.next) {
            (_, None) => {
                let sql = format!(
                    "DELETE FROM {} WHERE {} = ? AND voter = ?",
                    tables.votes, tables.item_fk
                );
                sqlx::query(&sql)
                    .bind(vote.item_id)
                    .bind(voter)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            (None, Some(next)) => {
                let sql = format!(
                    "INSERT INTO {} ({}, voter, direction, created_at) VALUES (?, ?, ?, ?)",
                    tables.votes, tables.item_fk
                );
                sqlx::query(&sql)
                    .bind(vote.item_id)
                    .bind(voter)
                    .bind(next.as_str())
                    .bind(Utc::now())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            (Some(_), Some(next)) => {
                let sql = format!(
                    "UPDATE {} SET direction = ? WHERE {} = ? AND voter = ?",
                    tables.votes, tables.item_fk
                );
                sqlx::query(&sql)
                    .bind(next.as_str())
                    .bind(vote.item_id)
                    .bind(voter)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        // 4. Apply the delta to the item and to its author
        let score_sql = format!(
            "UPDATE {} SET score = score + ? WHERE id = ? RETURNING score",
            tables.item
        );
        let new_score: i64 = sqlx::query_scalar(&score_sql)
            .bind(step.delta)
            .bind(vote.item_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        let author_sigma: i64 =
            sqlx::query_scalar("UPDATE users SET sigma = sigma + ? WHERE alias = ? RETURNING sigma")
                .bind(step.delta)
                .bind(&author)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        tracing::debug!(
            item = vote.kind.as_str(),
            item_id = vote.item_id,
            %voter,
            delta = step.delta,
            new_score,
            "vote applied"
        );

        Ok(VoteOutcome {
            kind: vote.kind,
            item_id: vote.item_id,
            post_id,
            new_score,
            author,
            author_sigma,
            state: step.next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> SqliteContentRepo {
        SqliteContentRepo::new("sqlite::memory:", 1).await.unwrap()
    }

    async fn user(repo: &SqliteContentRepo, alias: &str) {
        repo.insert_user(alias, Utc::now()).await.unwrap();
    }

    async fn text_post(repo: &SqliteContentRepo, author: &str, title: &str) -> Post {
        repo.create_post(NewPost {
            author: author.into(),
            title: Some(title.into()),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    fn up(kind: ItemKind, item_id: i64) -> VoteCommand {
        VoteCommand {
            kind,
            item_id,
            direction: Direction::Up,
        }
    }

    fn down(kind: ItemKind, item_id: i64) -> VoteCommand {
        VoteCommand {
            kind,
            item_id,
            direction: Direction::Down,
        }
    }

    /// Sigma must always equal the sum of the user's live post and comment scores.
    async fn assert_sigma_consistent(repo: &SqliteContentRepo, alias: &str) {
        let owned: i64 = sqlx::query_scalar(
            "SELECT (SELECT COALESCE(SUM(score), 0) FROM posts WHERE author = ?) + \
                    (SELECT COALESCE(SUM(score), 0) FROM comments WHERE author = ?)",
        )
        .bind(alias)
        .bind(alias)
        .fetch_one(repo.pool())
        .await
        .unwrap();
        let sigma = repo.find_user(alias).await.unwrap().unwrap().sigma;
        assert_eq!(sigma, owned, "sigma drifted for {alias}");
    }

    #[tokio::test]
    async fn test_duplicate_alias_is_conflict() {
        let repo = repo().await;
        user(&repo, "1234").await;
        let err = repo.insert_user("1234", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_empty_post_rejected_title_only_accepted() {
        let repo = repo().await;
        user(&repo, "1000").await;

        let err = repo
            .create_post(NewPost {
                author: "1000".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);

        let post = text_post(&repo, "1000", "just a title").await;
        assert_eq!(post.title.as_deref(), Some("just a title"));
        assert!(!post.has_media());
    }

    #[tokio::test]
    async fn test_vote_walkthrough() {
        let repo = repo().await;
        for alias in ["1000", "2000", "3000"] {
            user(&repo, alias).await;
        }
        let p = text_post(&repo, "1000", "P").await;

        // A upvotes: 0 -> 1
        let out = repo.cast_vote(up(ItemKind::Post, p.id), "2000").await.unwrap();
        assert_eq!((out.new_score, out.state), (1, Some(Direction::Up)));
        assert_eq!(out.author_sigma, 1);

        // A upvotes again: 1 -> 0, vote cleared
        let out = repo.cast_vote(up(ItemKind::Post, p.id), "2000").await.unwrap();
        assert_eq!((out.new_score, out.state), (0, None));

        // A downvotes: 0 -> -1
        let out = repo.cast_vote(down(ItemKind::Post, p.id), "2000").await.unwrap();
        assert_eq!((out.new_score, out.state), (-1, Some(Direction::Down)));

        // B upvotes: -1 -> 0
        let out = repo.cast_vote(up(ItemKind::Post, p.id), "3000").await.unwrap();
        assert_eq!(out.new_score, 0);

        // A flips to up: 0 -> 2
        let out = repo.cast_vote(up(ItemKind::Post, p.id), "2000").await.unwrap();
        assert_eq!((out.new_score, out.state), (2, Some(Direction::Up)));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE post_id = ?")
            .bind(p.id)
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(rows, 2, "one row per (post, voter)");

        let listed = repo.list_posts(&FeedQuery::default(), Some("2000")).await.unwrap();
        assert_eq!(listed[0].user_vote, Some(Direction::Up));

        let single = repo.get_post_view(p.id, Some("2000")).await.unwrap().unwrap();
        assert_eq!(single, listed[0]);
        let anonymous = repo.get_post_view(p.id, None).await.unwrap().unwrap();
        assert_eq!(anonymous.user_vote, None);
        assert!(repo.get_post_view(p.id + 1, None).await.unwrap().is_none());
        assert_sigma_consistent(&repo, "1000").await;
    }

    #[tokio::test]
    async fn test_comment_votes_report_parent_post() {
        let repo = repo().await;
        user(&repo, "1000").await;
        user(&repo, "2000").await;
        let p = text_post(&repo, "1000", "P").await;
        let c = repo
            .add_comment(NewComment {
                post_id: p.id,
                author: "2000".into(),
                body: "first".into(),
            })
            .await
            .unwrap();

        let out = repo.cast_vote(down(ItemKind::Comment, c.id), "1000").await.unwrap();
        assert_eq!(out.post_id, p.id);
        assert_eq!(out.new_score, -1);
        assert_eq!(out.author, "2000");
        assert_eq!(out.author_sigma, -1);

        let comments = repo.list_comments(p.id, Some("1000")).await.unwrap();
        assert_eq!(comments[0].user_vote, Some(Direction::Down));
        let comments = repo.list_comments(p.id, None).await.unwrap();
        assert_eq!(comments[0].user_vote, None);
    }

    #[tokio::test]
    async fn test_vote_on_missing_item_changes_nothing() {
        let repo = repo().await;
        user(&repo, "1000").await;
        let err = repo.cast_vote(up(ItemKind::Post, 42), "1000").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(..)));
        let err = repo.cast_vote(up(ItemKind::Comment, 42), "1000").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(..)));
        assert_eq!(repo.find_user("1000").await.unwrap().unwrap().sigma, 0);
    }

    #[tokio::test]
    async fn test_delete_post_cascades_and_keeps_sigma_consistent() {
        let repo = repo().await;
        for alias in ["1000", "2000", "3000"] {
            user(&repo, alias).await;
        }
        let keep = text_post(&repo, "1000", "keep").await;
        let doomed = text_post(&repo, "1000", "doomed").await;
        let c = repo
            .add_comment(NewComment {
                post_id: doomed.id,
                author: "2000".into(),
                body: "hi".into(),
            })
            .await
            .unwrap();

        repo.cast_vote(up(ItemKind::Post, keep.id), "3000").await.unwrap();
        repo.cast_vote(up(ItemKind::Post, doomed.id), "3000").await.unwrap();
        repo.cast_vote(up(ItemKind::Comment, c.id), "3000").await.unwrap();
        repo.cast_vote(up(ItemKind::Comment, c.id), "1000").await.unwrap();

        // Not the author: nothing changes.
        let err = repo.delete_post(doomed.id, "2000").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(repo.get_post(doomed.id).await.unwrap().is_some());

        repo.delete_post(doomed.id, "1000").await.unwrap();
        assert!(repo.get_post(doomed.id).await.unwrap().is_none());
        assert!(repo.get_comment(c.id).await.unwrap().is_none());

        for table in ["votes", "comment_votes"] {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let n: i64 = sqlx::query_scalar(&sql).fetch_one(repo.pool()).await.unwrap();
            let expected = if table == "votes" { 1 } else { 0 };
            assert_eq!(n, expected, "{table}");
        }

        for alias in ["1000", "2000", "3000"] {
            assert_sigma_consistent(&repo, alias).await;
        }
        assert_eq!(repo.find_user("1000").await.unwrap().unwrap().sigma, 1);
        assert_eq!(repo.find_user("2000").await.unwrap().unwrap().sigma, 0);
    }

    #[tokio::test]
    async fn test_delete_comment_author_only() {
        let repo = repo().await;
        user(&repo, "1000").await;
        user(&repo, "2000").await;
        let p = text_post(&repo, "1000", "P").await;
        let c = repo
            .add_comment(NewComment {
                post_id: p.id,
                author: "2000".into(),
                body: "mine".into(),
            })
            .await
            .unwrap();
        repo.cast_vote(up(ItemKind::Comment, c.id), "1000").await.unwrap();

        let err = repo.delete_comment(c.id, "1000").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(repo.get_comment(c.id).await.unwrap().is_some());

        repo.delete_comment(c.id, "2000").await.unwrap();
        assert!(repo.get_comment(c.id).await.unwrap().is_none());
        assert_sigma_consistent(&repo, "2000").await;
    }

    #[tokio::test]
    async fn test_comment_on_missing_post() {
        let repo = repo().await;
        user(&repo, "1000").await;
        let err = repo
            .add_comment(NewComment {
                post_id: 99,
                author: "1000".into(),
                body: "hello".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(..)));
    }

    #[tokio::test]
    async fn test_listing_filters_search_and_sort() {
        let repo = repo().await;
        user(&repo, "1000").await;
        user(&repo, "2000").await;

        let text = text_post(&repo, "1000", "Rust Tips").await;
        let media = repo
            .create_post(NewPost {
                author: "2000".into(),
                media: Some("2000_1_cat.png".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let chatty = repo
            .create_post(NewPost {
                author: "2000".into(),
                body: Some("50% off_sale".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.add_comment(NewComment {
            post_id: chatty.id,
            author: "1000".into(),
            body: "nice".into(),
        })
        .await
        .unwrap();
        repo.cast_vote(up(ItemKind::Post, text.id), "2000").await.unwrap();

        let ids = |views: Vec<PostView>| views.into_iter().map(|v| v.post.id).collect::<Vec<_>>();

        let latest = repo.list_posts(&FeedQuery::default(), None).await.unwrap();
        assert_eq!(ids(latest), vec![chatty.id, media.id, text.id]);

        let photos = FeedQuery {
            filter: MediaFilter::Media,
            ..Default::default()
        };
        assert_eq!(ids(repo.list_posts(&photos, None).await.unwrap()), vec![media.id]);

        let hottest_text = FeedQuery {
            filter: MediaFilter::Text,
            sort: SortMode::Engagement,
            ..Default::default()
        };
        let listed = repo.list_posts(&hottest_text, None).await.unwrap();
        assert_eq!(listed[0].post.id, chatty.id);
        assert_eq!(listed[0].comment_count, 1);
        assert_eq!(listed.len(), 2);

        let best = FeedQuery {
            sort: SortMode::Best,
            ..Default::default()
        };
        assert_eq!(repo.list_posts(&best, None).await.unwrap()[0].post.id, text.id);

        let search = |s: &str| FeedQuery {
            search: Some(s.into()),
            ..Default::default()
        };
        assert_eq!(ids(repo.list_posts(&search("rust tips"), None).await.unwrap()), vec![text.id]);
        assert_eq!(repo.list_posts(&search("2000"), None).await.unwrap().len(), 2);
        // LIKE wildcards in the term are literal.
        assert_eq!(ids(repo.list_posts(&search("50%"), None).await.unwrap()), vec![chatty.id]);
        assert!(repo.list_posts(&search("ff%s"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_keeps_non_ascii_terms_intact() {
        let repo = repo().await;
        user(&repo, "1000").await;
        let p = text_post(&repo, "1000", "Élan vital").await;

        let search = |s: &str| FeedQuery {
            search: Some(s.into()),
            ..Default::default()
        };
        for term in ["Élan", "ÉLAN VITAL", "élan vital"] {
            let hits = repo.list_posts(&search(term), None).await.unwrap();
            let ids: Vec<i64> = hits.into_iter().map(|v| v.post.id).collect();
            // SQLite folds ASCII letters only, so "é" never matches "É".
            let expected = if term.starts_with('É') { vec![p.id] } else { vec![] };
            assert_eq!(ids, expected, "search {term:?}");
        }
    }

    #[tokio::test]
    async fn test_failed_vote_rolls_back_every_write() {
        let repo = repo().await;
        for alias in ["1000", "2000", "3000"] {
            user(&repo, alias).await;
        }
        let p = text_post(&repo, "1000", "P").await;
        repo.cast_vote(up(ItemKind::Post, p.id), "3000").await.unwrap();

        // Fails on the last write, after the vote row and item score moved.
        sqlx::query(
            "CREATE TRIGGER freeze_sigma BEFORE UPDATE OF sigma ON users \
             BEGIN SELECT RAISE(ABORT, 'sigma frozen'); END",
        )
        .execute(repo.pool())
        .await
        .unwrap();

        let err = repo.cast_vote(down(ItemKind::Post, p.id), "2000").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        let err = repo.cast_vote(down(ItemKind::Post, p.id), "3000").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        sqlx::query("DROP TRIGGER freeze_sigma")
            .execute(repo.pool())
            .await
            .unwrap();

        let votes: Vec<(String, String)> =
            sqlx::query_as("SELECT voter, direction FROM votes WHERE post_id = ? ORDER BY voter")
                .bind(p.id)
                .fetch_all(repo.pool())
                .await
                .unwrap();
        assert_eq!(votes, vec![("3000".to_string(), "up".to_string())]);
        assert_eq!(repo.get_post(p.id).await.unwrap().unwrap().score, 1);
        assert_eq!(repo.find_user("1000").await.unwrap().unwrap().sigma, 1);
        assert_sigma_consistent(&repo, "1000").await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("votes.db").display());
        let repo = std::sync::Arc::new(SqliteContentRepo::new(&url, 5).await.unwrap());

        user(&repo, "1000").await;
        let voters: Vec<String> = (0..40).map(|i| (5000 + i).to_string()).collect();
        for voter in &voters {
            user(&repo, voter).await;
        }
        let p = text_post(&repo, "1000", "busy").await;
        let post_id = p.id;

        let tasks: Vec<_> = voters
            .into_iter()
            .map(|voter| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.cast_vote(up(ItemKind::Post, post_id), &voter).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(repo.get_post(p.id).await.unwrap().unwrap().score, 40);
        assert_eq!(repo.find_user("1000").await.unwrap().unwrap().sigma, 40);
        assert_sigma_consistent(&repo, "1000").await;
    }

    #[tokio::test]
    async fn test_user_stats() {
        let repo = repo().await;
        user(&repo, "1000").await;
        user(&repo, "2000").await;
        let p = text_post(&repo, "1000", "a").await;
        text_post(&repo, "1000", "b").await;
        repo.add_comment(NewComment {
            post_id: p.id,
            author: "1000".into(),
            body: "self reply".into(),
        })
        .await
        .unwrap();
        repo.cast_vote(down(ItemKind::Post, p.id), "2000").await.unwrap();

        let stats = repo.user_stats("1000").await.unwrap();
        assert_eq!(
            stats,
            UserStats {
                posts: 2,
                comments: 1,
                post_score: -1
            }
        );
        assert_eq!(repo.user_stats("2000").await.unwrap(), UserStats::default());
    }
}

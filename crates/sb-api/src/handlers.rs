//! # sb-api Handlers
//!
//! Page endpoints. They coordinate between HTTP requests and the core
//! traits, and report every outcome to the user as a flash notice.

use askama::Template;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use axum_extra::extract::cookie::CookieJar;
use sb_core::error::{AppError, Result};
use sb_core::models::{Comment, FeedQuery, MediaFilter, NewComment, NewPost, SortMode};
use sb_core::validation::check_upload;
use sb_ui::{
    CommentRow, CreatePostTemplate, FeedTemplate, Notice, PostCard, PostTemplate, APP_CSS, APP_JS,
};
use serde::Deserialize;

use crate::error::{log_error, notice_text};
use crate::identity::Caller;
use crate::session::{flash, take_flash};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListingParams {
    pub sort: Option<String>,
    pub view: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    #[serde(default)]
    pub csrf_token: String,
}

fn render(template: &impl Template) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "template rendering failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong").into_response()
        }
    }
}

fn redirect_with(jar: CookieJar, category: &str, message: &str, to: &str) -> Response {
    (flash(jar, category, message), Redirect::to(to)).into_response()
}

fn redirect_with_error(jar: CookieJar, err: &AppError, to: &str) -> Response {
    log_error(err);
    redirect_with(jar, "error", &notice_text(err), to)
}

/// Path ids that are not integers name nothing that could exist.
fn parse_id(raw: &str, kind: &str) -> Result<i64> {
    raw.parse().map_err(|_| AppError::not_found(kind, raw))
}

// --- Listings ---

/// `GET /` and `GET /feed`
pub async fn feed(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    Query(params): Query<ListingParams>,
) -> Response {
    listing(state, caller, jar, params, MediaFilter::All, "Feed", "/feed").await
}

/// `GET /photos`
pub async fn photos(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    Query(params): Query<ListingParams>,
) -> Response {
    listing(state, caller, jar, params, MediaFilter::Media, "Photos", "/photos").await
}

/// `GET /text`
pub async fn text(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    Query(params): Query<ListingParams>,
) -> Response {
    listing(state, caller, jar, params, MediaFilter::Text, "Text", "/text").await
}

async fn listing(
    state: AppState,
    caller: Caller,
    jar: CookieJar,
    params: ListingParams,
    filter: MediaFilter,
    heading: &str,
    path: &str,
) -> Response {
    let (jar, mut notices) = take_flash(jar);
    let query = FeedQuery {
        search: params.q.clone(),
        sort: SortMode::from_param(params.sort.as_deref(), filter),
        filter,
    };
    let viewer = caller.alias();

    // A failed read still renders the page, just empty.
    let posts = match state.repo.list_posts(&query, viewer).await {
        Ok(posts) => posts,
        Err(e) => {
            log_error(&e);
            notices.push(Notice {
                category: "error".into(),
                message: notice_text(&e),
            });
            Vec::new()
        }
    };

    let sort = match params.sort.as_deref() {
        Some(s @ ("best" | "hottest")) => s,
        _ => "latest",
    };
    let view = match params.view.as_deref() {
        Some("list") => "list",
        _ => "grid",
    };

    let page = FeedTemplate {
        header: caller.header(),
        notices,
        heading: heading.to_string(),
        path: path.to_string(),
        posts: posts
            .iter()
            .map(|p| PostCard::new(p, viewer, state.store.as_ref()))
            .collect(),
        sort: sort.to_string(),
        view: view.to_string(),
        q: params.q.unwrap_or_default(),
    };
    (jar, render(&page)).into_response()
}

// --- Post detail ---

/// `GET /post/{id}`
pub async fn view_post(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    Path(raw_id): Path<String>,
) -> Response {
    let (jar, notices) = take_flash(jar);
    let id = match parse_id(&raw_id, "Post") {
        Ok(id) => id,
        Err(e) => return redirect_with_error(jar, &e, "/feed"),
    };
    let viewer = caller.alias();

    let post = match state.repo.get_post_view(id, viewer).await {
        Ok(Some(post)) => post,
        Ok(None) => return redirect_with_error(jar, &AppError::not_found("Post", id), "/feed"),
        Err(e) => return redirect_with_error(jar, &e, "/feed"),
    };
    let comments = match state.repo.list_comments(id, viewer).await {
        Ok(comments) => comments,
        Err(e) => return redirect_with_error(jar, &e, "/feed"),
    };

    let page = PostTemplate {
        header: caller.header(),
        notices,
        post: PostCard::new(&post, viewer, state.store.as_ref()),
        comments: comments.iter().map(|c| CommentRow::new(c, viewer)).collect(),
    };
    (jar, render(&page)).into_response()
}

// --- Posting ---

/// `GET /create_post`
pub async fn create_post_form(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
) -> Response {
    let (jar, notices) = take_flash(jar);
    let page = CreatePostTemplate::new(caller.header(), notices, state.max_upload_bytes);
    (jar, render(&page)).into_response()
}

#[derive(Debug, Default)]
struct UploadForm {
    title: Option<String>,
    body: Option<String>,
    /// Original filename and contents
    file: Option<(String, Vec<u8>)>,
}

fn multipart_err(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::ValidationError("upload too large".into())
    } else {
        AppError::ValidationError(format!("malformed form: {}", err.body_text()))
    }
}

/// Reads the multipart form, enforcing the file checks while streaming so a
/// rejected upload is never buffered whole.
async fn read_upload_form(multipart: &mut Multipart, max_bytes: usize) -> Result<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => form.title = Some(field.text().await.map_err(multipart_err)?),
            "body" => form.body = Some(field.text().await.map_err(multipart_err)?),
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                // Browsers send an empty part when no file was chosen.
                if filename.is_empty() {
                    continue;
                }
                check_upload(&filename, 0, max_bytes)?;
                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_err)? {
                    data.extend_from_slice(&chunk);
                    check_upload(&filename, data.len(), max_bytes)?;
                }
                if !data.is_empty() {
                    form.file = Some((filename, data));
                }
            }
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }
    Ok(form)
}

/// `POST /create_post`
pub async fn create_post(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Response {
    match publish_post(&state, &caller, &mut multipart).await {
        Ok(id) => {
            tracing::info!(post_id = id, author = ?caller.alias(), "post created");
            redirect_with(jar, "success", "Post uploaded successfully", "/feed")
        }
        Err(e) => redirect_with_error(jar, &e, "/create_post"),
    }
}

async fn publish_post(state: &AppState, caller: &Caller, multipart: &mut Multipart) -> Result<i64> {
    let author = caller.require_alias()?.to_string();
    let form = read_upload_form(multipart, state.max_upload_bytes).await?;

    let draft = NewPost {
        author: author.clone(),
        title: form.title,
        body: form.body,
        media: form.file.as_ref().map(|(name, _)| name.clone()),
    }
    .validate()?;

    let Some((original_name, data)) = form.file else {
        return Ok(state.repo.create_post(draft).await?.id);
    };

    let stored = state.store.save_upload(&author, &original_name, &data).await?;
    let draft = NewPost {
        media: Some(stored.clone()),
        ..draft
    };
    match state.repo.create_post(draft).await {
        Ok(post) => Ok(post.id),
        Err(e) => {
            // Do not leave an orphaned file behind.
            if let Err(cleanup) = state.store.delete(&stored).await {
                tracing::warn!(error = %cleanup, file = %stored, "failed to remove orphaned upload");
            }
            Err(e)
        }
    }
}

// --- Comments ---

/// `POST /post/{id}/add_comment`
pub async fn add_comment(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    Path(raw_id): Path<String>,
    Form(form): Form<CommentForm>,
) -> Response {
    let post_id = match parse_id(&raw_id, "Post") {
        Ok(id) => id,
        Err(e) => return redirect_with_error(jar, &e, "/feed"),
    };
    let back = format!("/post/{post_id}");
    let result = post_comment(&state, &caller, post_id, form.body).await;

    match result {
        Ok(comment) => {
            tracing::info!(comment_id = comment.id, post_id, "comment added");
            redirect_with(jar, "success", "Comment added", &back)
        }
        Err(e @ AppError::NotFound(..)) => redirect_with_error(jar, &e, "/feed"),
        Err(e) => redirect_with_error(jar, &e, &back),
    }
}

async fn post_comment(
    state: &AppState,
    caller: &Caller,
    post_id: i64,
    body: String,
) -> Result<Comment> {
    let comment = NewComment {
        post_id,
        author: caller.require_alias()?.to_string(),
        body,
    }
    .validate()?;
    state.repo.add_comment(comment).await
}

// --- Deletion ---

/// Checks the form token and the caller's identity before a destructive action.
fn authorize<'a>(caller: &'a Caller, form: &DeleteForm) -> Result<&'a str> {
    caller.check_csrf(&form.csrf_token)?;
    caller.require_alias()
}

/// `POST /delete_post/{id}`
pub async fn delete_post(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    Path(raw_id): Path<String>,
    Form(form): Form<DeleteForm>,
) -> Response {
    let id = match parse_id(&raw_id, "Post") {
        Ok(id) => id,
        Err(e) => return redirect_with_error(jar, &e, "/feed"),
    };
    let result = match authorize(&caller, &form) {
        Ok(alias) => state.repo.delete_post(id, alias).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(post) => {
            if post.has_media() {
                if let Err(e) = state.store.delete(&post.media).await {
                    tracing::warn!(error = %e, file = %post.media, "failed to remove media file");
                }
            }
            tracing::info!(post_id = id, "post deleted");
            redirect_with(jar, "success", "Post deleted", "/feed")
        }
        Err(e @ AppError::NotFound(..)) => redirect_with_error(jar, &e, "/feed"),
        Err(e) => redirect_with_error(jar, &e, &format!("/post/{id}")),
    }
}

/// `POST /delete_comment/{id}`
pub async fn delete_comment(
    State(state): State<AppState>,
    caller: Caller,
    jar: CookieJar,
    Path(raw_id): Path<String>,
    Form(form): Form<DeleteForm>,
) -> Response {
    let id = match parse_id(&raw_id, "Comment") {
        Ok(id) => id,
        Err(e) => return redirect_with_error(jar, &e, "/feed"),
    };
    let result = match authorize(&caller, &form) {
        Ok(alias) => state.repo.delete_comment(id, alias).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(comment) => {
            tracing::info!(comment_id = id, post_id = comment.post_id, "comment deleted");
            redirect_with(jar, "success", "Comment deleted", &format!("/post/{}", comment.post_id))
        }
        Err(e) => {
            let back = match state.repo.get_comment(id).await {
                Ok(Some(comment)) => format!("/post/{}", comment.post_id),
                _ => "/feed".to_string(),
            };
            redirect_with_error(jar, &e, &back)
        }
    }
}

// --- Assets ---

pub async fn app_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript; charset=utf-8")], APP_JS)
}

pub async fn app_css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], APP_CSS)
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}

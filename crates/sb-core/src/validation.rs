//! Input rules shared by every front end: what a post must contain, which
//! uploads are accepted and how stored media files are named.

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{NewComment, NewPost};

/// Extensions accepted for media uploads (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "mp4", "webm", "ogg"];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogg"];

/// Default upload ceiling, 16 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

pub fn is_allowed_file(filename: &str) -> bool {
    extension(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_video(filename: &str) -> bool {
    extension(filename).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Reduces a client-supplied filename to a safe ASCII basename.
///
/// Path separators become word breaks, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9._-]` is dropped, and leading/trailing dots and
/// underscores are stripped so the result can never escape the upload dir.
pub fn secure_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .filter(char::is_ascii)
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Stored name for an upload: `{alias}_{timestamp}_{original filename}`.
pub fn media_filename(alias: &str, now: DateTime<Utc>, original: &str) -> String {
    format!(
        "{}_{}_{}",
        alias,
        now.format("%Y%m%d%H%M%S%6f"),
        secure_filename(original)
    )
}

/// Checks an upload's name and size before any bytes are written.
pub fn check_upload(filename: &str, len: usize, max_bytes: usize) -> Result<()> {
    if !is_allowed_file(filename) {
        return Err(AppError::ValidationError(format!(
            "file type not allowed, use one of: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    if secure_filename(filename).is_empty() {
        return Err(AppError::ValidationError("invalid file name".into()));
    }
    if len > max_bytes {
        return Err(AppError::ValidationError(format!(
            "file too large (limit is {} MiB)",
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl NewPost {
    /// Trims every field, turns blanks into `None`, and rejects a post that
    /// ends up with no title, no body and no media.
    pub fn validate(self) -> Result<Self> {
        let post = Self {
            author: self.author,
            title: non_blank(self.title),
            body: non_blank(self.body),
            media: non_blank(self.media),
        };
        if post.title.is_none() && post.body.is_none() && post.media.is_none() {
            return Err(AppError::ValidationError(
                "a post needs a title, some text or a file".into(),
            ));
        }
        Ok(post)
    }
}

impl NewComment {
    pub fn validate(self) -> Result<Self> {
        let body = self.body.trim().to_string();
        if body.is_empty() {
            return Err(AppError::ValidationError("comment cannot be empty".into()));
        }
        Ok(Self { body, ..self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extension_allow_list() {
        assert!(is_allowed_file("cat.PNG"));
        assert!(is_allowed_file("clip.webm"));
        assert!(is_allowed_file("a.b.jpeg"));
        assert!(!is_allowed_file("setup.exe"));
        assert!(!is_allowed_file("png"));
        assert!(!is_allowed_file("archive.png.exe"));
    }

    #[test]
    fn exe_rejected_regardless_of_size() {
        for len in [0, 1, DEFAULT_MAX_UPLOAD_BYTES] {
            assert!(check_upload("tool.exe", len, DEFAULT_MAX_UPLOAD_BYTES).is_err());
        }
    }

    #[test]
    fn oversized_upload_rejected() {
        assert!(check_upload("a.gif", DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MAX_UPLOAD_BYTES).is_ok());
        let err = check_upload("a.gif", DEFAULT_MAX_UPLOAD_BYTES + 1, DEFAULT_MAX_UPLOAD_BYTES)
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn secure_filename_strips_paths() {
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("my cat photo.jpg"), "my_cat_photo.jpg");
        assert_eq!(secure_filename("naïve.png"), "nave.png");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn media_filename_is_salted() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(
            media_filename("4821", now, "a b.png"),
            "4821_20240301123005000000_a_b.png"
        );
    }

    #[test]
    fn post_needs_some_content() {
        let empty = NewPost {
            author: "1000".into(),
            title: Some("  ".into()),
            body: None,
            media: None,
        };
        assert!(empty.validate().is_err());

        let title_only = NewPost {
            author: "1000".into(),
            title: Some(" hello ".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(title_only.title.as_deref(), Some("hello"));
    }

    #[test]
    fn comment_body_required() {
        let c = NewComment {
            post_id: 1,
            author: "1000".into(),
            body: "   ".into(),
        };
        assert!(c.validate().is_err());
    }
}

//! Per-request identity.
//!
//! Every page and API request passes through [`assign_identity`], which
//! makes sure the session names an alias that exists in the store,
//! allocating a new one when needed, and hands the result to handlers as a
//! [`Caller`]. Allocation failures never fail the request: the caller just
//! proceeds without an identity.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use sb_core::error::{AppError, Result};
use sb_core::models::{User, UserStats};
use sb_core::traits::{ContentRepo, IdentityProvider};
use sb_ui::Header;

use crate::error::ApiError;
use crate::session::SessionState;
use crate::state::AppState;

/// Who is making the request.
#[derive(Debug, Clone)]
pub struct Caller {
    /// `None` when no valid identity could be established
    pub user: Option<User>,
    pub stats: UserStats,
    pub csrf_token: String,
}

impl Caller {
    pub fn alias(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.alias.as_str())
    }

    pub fn require_alias(&self) -> Result<&str> {
        self.alias().ok_or(AppError::NoIdentity)
    }

    /// Compares a submitted anti-forgery token with the session's.
    pub fn check_csrf(&self, submitted: &str) -> Result<()> {
        if submitted.is_empty() || submitted != self.csrf_token {
            return Err(AppError::Unauthorized("Invalid or missing form token".into()));
        }
        Ok(())
    }

    pub fn header(&self) -> Header {
        Header::new(self.user.as_ref(), self.stats, &self.csrf_token)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<Caller>().cloned().ok_or_else(|| {
            ApiError(AppError::Internal(
                "identity middleware is not installed on this route".into(),
            ))
        })
    }
}

/// Two-phase alias resolution against the content store.
pub struct IdentityAssigner<'a> {
    repo: &'a dyn ContentRepo,
    identity: &'a dyn IdentityProvider,
}

impl<'a> IdentityAssigner<'a> {
    pub fn new(repo: &'a dyn ContentRepo, identity: &'a dyn IdentityProvider) -> Self {
        Self { repo, identity }
    }

    /// Phase one: keeps the session's alias if the store knows it,
    /// otherwise clears it.
    pub async fn validate_or_reset(&self, session: &mut SessionState) -> Result<Option<User>> {
        let Some(alias) = session.alias.clone() else {
            return Ok(None);
        };
        match self.repo.find_user(&alias).await? {
            Some(user) => Ok(Some(user)),
            None => {
                tracing::info!(%alias, "session alias unknown, resetting");
                session.alias = None;
                Ok(None)
            }
        }
    }

    /// Phase two: draws candidates until one is free, then records it.
    /// Gives up after the provider's attempt budget.
    pub async fn create(&self, session: &mut SessionState) -> Result<User> {
        let attempts = self.identity.max_attempts();
        for _ in 0..attempts {
            let candidate = self.identity.generate_alias();
            if self.repo.find_user(&candidate).await?.is_some() {
                continue;
            }
            // A concurrent insert of the same alias surfaces as Conflict.
            let user = self.repo.insert_user(&candidate, Utc::now()).await?;
            tracing::info!(alias = %user.alias, "assigned new alias");
            session.alias = Some(user.alias.clone());
            return Ok(user);
        }
        Err(AppError::IdentityExhausted(attempts))
    }

    /// Runs both phases and loads the caller's stats.
    pub async fn resolve(&self, session: &mut SessionState) -> Caller {
        let user = match self.validate_or_reset(session).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => self.create(session).await,
            Err(e) => Err(e),
        };

        match user {
            Ok(user) => {
                let stats = self.repo.user_stats(&user.alias).await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, alias = %user.alias, "failed to load user stats");
                    UserStats::default()
                });
                Caller {
                    user: Some(user),
                    stats,
                    csrf_token: session.csrf_token.clone(),
                }
            }
            Err(e) => {
                crate::error::log_error(&e);
                tracing::warn!("request continues without identity");
                Caller {
                    user: None,
                    stats: UserStats::default(),
                    csrf_token: session.csrf_token.clone(),
                }
            }
        }
    }
}

/// Middleware: resolves the caller and keeps the session cookie current.
pub async fn assign_identity(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = state.identity.as_ref();
    let loaded = SessionState::from_jar(&jar, identity);
    let mut session = loaded
        .clone()
        .unwrap_or_else(|| SessionState::fresh(identity));

    let caller = IdentityAssigner::new(state.repo.as_ref(), identity)
        .resolve(&mut session)
        .await;
    req.extensions_mut().insert(caller);

    let response = next.run(req).await;
    if loaded.as_ref() == Some(&session) {
        response
    } else {
        let jar = CookieJar::new().add(session.to_cookie(identity));
        (jar, response).into_response()
    }
}

//! Session and flash cookies.
//!
//! The session cookie carries `{alias}.{csrf}` signed by the identity
//! provider. A session that has not been granted an alias yet stores the
//! literal `none` in the alias slot. Flash notices ride in a second cookie
//! that is cleared as soon as a page shows them.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sb_core::traits::IdentityProvider;
use sb_ui::Notice;

pub const SESSION_COOKIE: &str = "sb_session";
pub const FLASH_COOKIE: &str = "sb_flash";
const NO_ALIAS: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub alias: Option<String>,
    pub csrf_token: String,
}

impl SessionState {
    /// A session with no alias and a fresh anti-forgery token.
    pub fn fresh(identity: &dyn IdentityProvider) -> Self {
        Self {
            alias: None,
            csrf_token: identity.new_csrf_token(),
        }
    }

    /// Reads the session cookie. Missing, unsigned or malformed cookies yield `None`.
    pub fn from_jar(jar: &CookieJar, identity: &dyn IdentityProvider) -> Option<Self> {
        let payload = identity.verify(jar.get(SESSION_COOKIE)?.value())?;
        let (alias, csrf_token) = payload.split_once('.')?;
        if csrf_token.is_empty() || alias.is_empty() {
            return None;
        }
        Some(Self {
            alias: (alias != NO_ALIAS).then(|| alias.to_string()),
            csrf_token: csrf_token.to_string(),
        })
    }

    pub fn to_cookie(&self, identity: &dyn IdentityProvider) -> Cookie<'static> {
        let payload = format!(
            "{}.{}",
            self.alias.as_deref().unwrap_or(NO_ALIAS),
            self.csrf_token
        );
        Cookie::build((SESSION_COOKIE, identity.sign(&payload)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }
}

/// Queues a notice for the next rendered page.
pub fn flash(jar: CookieJar, category: &str, message: &str) -> CookieJar {
    let value = URL_SAFE_NO_PAD.encode(format!("{category}:{message}"));
    jar.add(
        Cookie::build((FLASH_COOKIE, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax),
    )
}

/// Takes the pending notice, if any, and clears the cookie.
pub fn take_flash(jar: CookieJar) -> (CookieJar, Vec<Notice>) {
    let Some(raw) = jar.get(FLASH_COOKIE).map(|c| c.value().to_string()) else {
        return (jar, Vec::new());
    };
    let jar = jar.remove(Cookie::build(FLASH_COOKIE).path("/"));
    (jar, decode_flash(&raw).into_iter().collect())
}

/// Decodes a raw flash cookie value.
pub fn decode_flash(raw: &str) -> Option<Notice> {
    let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (category, message) = text.split_once(':')?;
    Some(Notice {
        category: category.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Signs by appending the payload length; good enough to exercise parsing.
    struct LengthSigner;

    impl IdentityProvider for LengthSigner {
        fn generate_alias(&self) -> String {
            "1000".into()
        }
        fn max_attempts(&self) -> u32 {
            1
        }
        fn new_csrf_token(&self) -> String {
            "tok".into()
        }
        fn sign(&self, payload: &str) -> String {
            format!("{payload}.{}", payload.len())
        }
        fn verify(&self, signed: &str) -> Option<String> {
            let (payload, sig) = signed.rsplit_once('.')?;
            (sig == payload.len().to_string()).then(|| payload.to_string())
        }
    }

    #[test]
    fn session_cookie_round_trip() {
        let signer = LengthSigner;
        let anonymous = SessionState::fresh(&signer);
        let jar = CookieJar::new().add(anonymous.to_cookie(&signer));
        assert_eq!(SessionState::from_jar(&jar, &signer), Some(anonymous));

        let named = SessionState {
            alias: Some("4821".into()),
            csrf_token: "abc".into(),
        };
        let cookie = named.to_cookie(&signer);
        assert_eq!(cookie.value(), "4821.abc.8");
        let jar = CookieJar::new().add(cookie);
        assert_eq!(SessionState::from_jar(&jar, &signer), Some(named));
    }

    #[test]
    fn bad_session_cookies_are_ignored() {
        let signer = LengthSigner;
        for value in ["4821.abc.99", "4821.3", ".abc.4", "garbage"] {
            let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, value));
            assert_eq!(SessionState::from_jar(&jar, &signer), None, "{value}");
        }
    }

    #[test]
    fn flash_is_read_once() {
        let jar = flash(CookieJar::new(), "error", "Post not found: 12");
        let (jar, notices) = take_flash(jar);
        assert_eq!(
            notices,
            vec![Notice {
                category: "error".into(),
                message: "Post not found: 12".into(),
            }]
        );
        assert!(jar.get(FLASH_COOKIE).is_none());
        assert_eq!(decode_flash("%%%"), None);
    }
}

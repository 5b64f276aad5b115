//! Share-link lifecycle.
//!
//! A link starts `Active` and moves to exactly one terminal state:
//!
//! ```text
//! Active ──now ≥ expires_at──────▶ Expired (only when an expiry was set)
//!        ──view_count ≥ max_views▶ Exhausted
//!        ──revoke────────────────▶ Revoked
//! ```
//!
//! Transitions to `Expired` and `Exhausted` happen lazily, on the first
//! resolve that observes the condition. Callers outside the store only ever
//! see "served" or "gone"; the reason is kept in [`GoneReason`] for logging.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::error::{ArchiveError, Result};
use crate::models::{Document, ShareLink, ShareState};

pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Caller-supplied bounds for a new link.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShareOptions {
    /// Lifetime in days; `None` means the link never expires.
    pub ttl_days: Option<i64>,
    /// View bound; `None` means unlimited.
    pub max_views: Option<u32>,
}

/// Why a link no longer serves. Internal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoneReason {
    Expired,
    Exhausted,
    Revoked,
}

impl GoneReason {
    pub fn state(self) -> ShareState {
        match self {
            Self::Expired => ShareState::Expired,
            Self::Exhausted => ShareState::Exhausted,
            Self::Revoked => ShareState::Revoked,
        }
    }

    fn from_state(state: ShareState) -> Option<Self> {
        match state {
            ShareState::Active => None,
            ShareState::Expired => Some(Self::Expired),
            ShareState::Exhausted => Some(Self::Exhausted),
            ShareState::Revoked => Some(Self::Revoked),
        }
    }
}

/// Outcome of inspecting a link at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Active and within bounds: count one view and serve.
    Serve,
    /// Active but a bound has been reached: persist the new state, deny.
    Retire(GoneReason),
    /// Already terminal.
    Dead(GoneReason),
}

/// What a store returns from an atomic resolve.
#[derive(Debug, Clone)]
pub enum ShareResolution {
    Served { link: ShareLink, document: Document },
    NotFound,
    Gone(GoneReason),
}

impl ShareResolution {
    /// Collapses the outcome into the public result, hiding the reason.
    pub fn into_result(self) -> Result<(ShareLink, Document)> {
        match self {
            Self::Served { link, document } => Ok((link, document)),
            Self::NotFound => Err(ArchiveError::not_found("share link")),
            Self::Gone(reason) => {
                tracing::debug!(?reason, "share link refused");
                Err(ArchiveError::Gone)
            }
        }
    }
}

impl ShareLink {
    /// Builds a new `Active` link with a fresh token.
    pub fn issue(
        document_id: Uuid,
        options: ShareOptions,
        token_bytes: usize,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if options.max_views == Some(0) {
            return Err(ArchiveError::validation("max_views must be at least 1"));
        }
        // ttl ≤ 0 yields an expiry at or before `now`, i.e. already elapsed
        let expires_at = options
            .ttl_days
            .map(|ttl| now + Duration::days(ttl.clamp(-36_500, 36_500)));

        Ok(Self {
            id: Uuid::new_v4(),
            document_id,
            token: generate_token(token_bytes),
            expires_at,
            max_views: options.max_views,
            view_count: 0,
            state: ShareState::Active,
            created_at: now,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_views.is_some_and(|m| self.view_count >= m)
    }

    /// Decides what a resolve at `now` does, without changing anything.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Access {
        if let Some(reason) = GoneReason::from_state(self.state) {
            return Access::Dead(reason);
        }
        if self.is_expired(now) {
            return Access::Retire(GoneReason::Expired);
        }
        if self.is_exhausted() {
            return Access::Retire(GoneReason::Exhausted);
        }
        Access::Serve
    }

    /// Evaluates and applies the outcome in place. Stores call this while
    /// holding whatever lock makes the check-and-update atomic.
    pub fn apply(&mut self, now: DateTime<Utc>) -> Access {
        let access = self.evaluate(now);
        match access {
            Access::Serve => self.view_count += 1,
            Access::Retire(reason) => self.state = reason.state(),
            Access::Dead(_) => {}
        }
        access
    }

    /// Public path for this link under `base_url`.
    pub fn public_url(&self, base_url: &str) -> String {
        format!("{}/share/{}", base_url.trim_end_matches('/'), self.token)
    }
}

/// Random hex token of `bytes` random bytes (at least 16).
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes.max(16)];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(max_views: Option<u32>, ttl_days: Option<i64>) -> (ShareLink, DateTime<Utc>) {
        let now = Utc::now();
        let opts = ShareOptions {
            ttl_days,
            max_views,
        };
        (
            ShareLink::issue(Uuid::new_v4(), opts, DEFAULT_TOKEN_BYTES, now).unwrap(),
            now,
        )
    }

    #[test]
    fn max_views_bound_serves_exactly_n() {
        let (mut l, now) = link(Some(2), None);
        assert_eq!(l.apply(now), Access::Serve);
        assert_eq!(l.apply(now), Access::Serve);
        assert_eq!(l.apply(now), Access::Retire(GoneReason::Exhausted));
        assert_eq!(l.state, ShareState::Exhausted);
        assert_eq!(l.view_count, 2);
        assert_eq!(l.apply(now), Access::Dead(GoneReason::Exhausted));
        assert_eq!(l.view_count, 2);
    }

    #[test]
    fn elapsed_ttl_expires_on_first_resolve() {
        let (mut l, now) = link(None, Some(0));
        assert_eq!(l.apply(now), Access::Retire(GoneReason::Expired));
        assert_eq!(l.state, ShareState::Expired);
        assert_eq!(l.view_count, 0);

        let (mut past, now) = link(Some(5), Some(-3));
        assert!(past.is_expired(now));
        assert_eq!(past.apply(now), Access::Retire(GoneReason::Expired));
    }

    #[test]
    fn expiry_is_inclusive_of_the_instant() {
        let (l, now) = link(None, Some(1));
        let at = l.expires_at.unwrap();
        assert!(!l.is_expired(at - Duration::milliseconds(1)));
        assert!(l.is_expired(at));
        assert!(!l.is_expired(now));
    }

    #[test]
    fn expiry_checked_before_view_bound() {
        let (mut l, now) = link(Some(1), Some(1));
        l.view_count = 1;
        let later = now + Duration::days(2);
        assert_eq!(l.evaluate(later), Access::Retire(GoneReason::Expired));
    }

    #[test]
    fn revoked_is_terminal() {
        let (mut l, now) = link(None, None);
        l.state = ShareState::Revoked;
        assert_eq!(l.apply(now), Access::Dead(GoneReason::Revoked));
        assert_eq!(l.view_count, 0);
    }

    #[test]
    fn zero_max_views_is_rejected() {
        let opts = ShareOptions {
            ttl_days: None,
            max_views: Some(0),
        };
        let err = ShareLink::issue(Uuid::new_v4(), opts, 32, Utc::now()).unwrap_err();
        assert!(matches!(err, ArchiveError::Validation(_)));
    }

    #[test]
    fn absent_ttl_never_expires() {
        let (mut l, now) = link(None, None);
        assert_eq!(l.expires_at, None);
        assert_eq!(l.state, ShareState::Active);
        let much_later = now + Duration::days(3650);
        assert!(!l.is_expired(much_later));
        assert_eq!(l.apply(much_later), Access::Serve);
        assert_eq!(l.view_count, 1);
    }

    #[test]
    fn ttl_sets_expiry_days_ahead() {
        let (l, now) = link(None, Some(7));
        assert_eq!(l.expires_at.unwrap() - now, Duration::days(7));
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = generate_token(32);
        let b = generate_token(32);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(generate_token(4).len(), 32);
    }

    #[test]
    fn public_url_joins_cleanly() {
        let (l, _) = link(None, None);
        assert_eq!(
            l.public_url("http://localhost:7410/"),
            format!("http://localhost:7410/share/{}", l.token)
        );
    }

    #[test]
    fn gone_resolution_hides_reason() {
        let err = ShareResolution::Gone(GoneReason::Revoked)
            .into_result()
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Gone));
        let err = ShareResolution::NotFound.into_result().unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }
}

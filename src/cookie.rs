use std::fmt;

/// Transaction identifier handed out by [`Prepared::submit`](crate::Prepared::submit).
///
/// Valid cookies are strictly positive. Zero marks a child descriptor and
/// negative values are sentinels for chains that are not submitted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cookie(i32);

impl Cookie {
    pub const MIN: Cookie = Cookie(1);
    /// Carried by the first descriptor of a prepared, unsubmitted chain.
    pub const PENDING: Cookie = Cookie(-16);
    /// Carried by child descriptors and free descriptors.
    pub const NONE: Cookie = Cookie(0);

    pub const fn from_raw(raw: i32) -> Cookie {
        Cookie(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 >= Self::MIN.0
    }

    fn next(self) -> Cookie {
        let next = self.0.wrapping_add(1);
        if next < Self::MIN.0 {
            Self::MIN
        } else {
            Cookie(next)
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-channel cookie bookkeeping. Lives inside the channel lock.
#[derive(Debug, Clone)]
pub(crate) struct CookieTracker {
    last_used: Cookie,
    last_completed: Cookie,
}

impl CookieTracker {
    pub(crate) fn new() -> CookieTracker {
        CookieTracker {
            last_used: Cookie::MIN,
            last_completed: Cookie::MIN,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = CookieTracker::new();
    }

    pub(crate) fn assign(&mut self) -> Cookie {
        self.last_used = self.last_used.next();
        self.last_used
    }

    pub(crate) fn complete(&mut self, cookie: Cookie) {
        debug_assert!(cookie.is_valid(), "completing unsubmitted cookie {cookie}");
        self.last_completed = cookie;
    }

    pub(crate) fn last_used(&self) -> Cookie {
        self.last_used
    }

    pub(crate) fn last_completed(&self) -> Cookie {
        self.last_completed
    }

    /// Completion test against the `(last_completed, last_used]` window,
    /// which may straddle the wrap point.
    /// Sentinel cookies are never complete.
    pub(crate) fn is_complete(&self, cookie: Cookie) -> bool {
        if !cookie.is_valid() {
            return false;
        }
        let done = self.last_completed.0;
        let used = self.last_used.0;
        let c = cookie.0;
        if done <= used {
            c <= done || c > used
        } else {
            c <= done && c > used
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_increase_from_min() {
        let mut t = CookieTracker::new();
        let a = t.assign();
        let b = t.assign();
        assert!(a.is_valid());
        assert!(b > a);
        assert_eq!(b.raw(), a.raw() + 1);
    }

    #[test]
    fn cookie_wraps_to_min() {
        let mut t = CookieTracker::new();
        t.last_used = Cookie(i32::MAX);
        assert_eq!(t.assign(), Cookie::MIN);
    }

    #[test]
    fn pending_is_not_complete_until_retired() {
        let mut t = CookieTracker::new();
        let a = t.assign();
        let b = t.assign();
        assert!(!t.is_complete(a));
        assert!(!t.is_complete(b));
        t.complete(a);
        assert!(t.is_complete(a));
        assert!(!t.is_complete(b));
        t.complete(b);
        assert!(t.is_complete(b));
    }

    #[test]
    fn completion_window_across_wrap() {
        let mut t = CookieTracker::new();
        t.last_used = Cookie(i32::MAX - 1);
        t.last_completed = Cookie(i32::MAX - 1);
        let a = t.assign();
        let b = t.assign();
        assert_eq!(b, Cookie::MIN);
        assert!(!t.is_complete(a));
        assert!(!t.is_complete(b));
        t.complete(a);
        assert!(t.is_complete(a));
        assert!(!t.is_complete(b));
        t.complete(b);
        assert!(t.is_complete(a));
        assert!(t.is_complete(b));
    }

    #[test]
    fn sentinels_are_invalid() {
        assert!(!Cookie::PENDING.is_valid());
        assert!(!Cookie::NONE.is_valid());
    }

    #[test]
    fn sentinels_never_complete() {
        let mut t = CookieTracker::new();
        let a = t.assign();
        t.complete(a);
        assert!(t.is_complete(a));
        assert!(!t.is_complete(Cookie::PENDING));
        assert!(!t.is_complete(Cookie::NONE));
    }
}

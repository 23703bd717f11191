//! Free, local rejection of addresses that are not worth a paid verification.

use std::collections::HashSet;
use std::fmt;

const ROLE_PREFIXES: &[&str] = &[
    "info", "admin", "support", "sales", "contact", "hello", "help", "service", "billing",
    "office", "team", "hr", "marketing", "press", "media", "webmaster", "postmaster", "noreply",
    "no-reply", "do-not-reply", "donotreply", "abuse", "spam", "mailer-daemon", "root",
    "hostmaster", "accounts", "enquiry", "enquiries", "feedback", "general", "careers", "jobs",
    "recruitment", "newsletter", "subscribe", "unsubscribe", "notifications", "alerts",
    "updates", "orders", "invoices", "payments", "returns", "reception", "security",
    "compliance", "legal", "privacy", "customerservice", "customer-service", "cs", "it", "tech",
    "techsupport", "helpdesk", "ops", "operations", "mail", "email", "test", "testing", "demo",
    "example", "null", "void", "nobody", "none", "temp", "temporary", "user", "default", "www",
    "ftp", "server", "system", "sysadmin", "administrator",
];

const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com", "guerrillamail.com", "guerrillamail.de", "tempmail.com",
    "throwaway.email", "yopmail.com", "trashmail.com", "sharklasers.com", "grr.la",
    "guerrillamailblock.com", "maildrop.cc", "dispostable.com", "temp-mail.org",
    "fakeinbox.com", "getnada.com", "mailnesia.com", "tempail.com", "tempr.email",
    "discard.email", "mailsac.com", "mohmal.com", "burnermail.io", "inboxkitten.com",
    "minutemail.com", "example.com", "example.org", "example.net", "test.com", "test.org",
    "localhost", "invalid.com", "noemail.com", "email.com", "none.com", "na.com", "nomail.com",
    "fake.com", "null.com",
];

const DISALLOWED_CHARS: &str = ",;!#$%^&*()=+[]{}|\\<>/\"'";

/// The rule that rejected an address, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRejection {
    MalformedAddress,
    DisallowedCharacter,
    LocalPartTooShort,
    RoleAccount,
    DisposableDomain,
    FakePattern,
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FilterRejection::MalformedAddress => "malformed address or invalid TLD",
            FilterRejection::DisallowedCharacter => "disallowed character",
            FilterRejection::LocalPartTooShort => "local part too short",
            FilterRejection::RoleAccount => "role account",
            FilterRejection::DisposableDomain => "disposable or test domain",
            FilterRejection::FakePattern => "repeated or numeric local part",
        };
        f.write_str(label)
    }
}

/// Immutable rule tables for the pre-verification filter.
///
/// Defaults carry the built-in role prefixes and disposable domains; both
/// sets can be extended without touching the filter logic.
#[derive(Debug, Clone)]
pub struct FilterRules {
    role_prefixes: HashSet<String>,
    disposable_domains: HashSet<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            role_prefixes: ROLE_PREFIXES.iter().map(|s| s.to_string()).collect(),
            disposable_domains: DISPOSABLE_DOMAINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FilterRules {
    /// Rule tables with no role prefixes and no disposable domains.
    pub fn empty() -> Self {
        Self {
            role_prefixes: HashSet::new(),
            disposable_domains: HashSet::new(),
        }
    }

    pub fn with_role_prefixes<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, prefixes: I) -> Self {
        self.role_prefixes
            .extend(prefixes.into_iter().map(|p| p.as_ref().trim().to_lowercase()));
        self
    }

    pub fn with_disposable_domains<I: IntoIterator<Item = S>, S: AsRef<str>>(
        mut self,
        domains: I,
    ) -> Self {
        self.disposable_domains
            .extend(domains.into_iter().map(|d| d.as_ref().trim().to_lowercase()));
        self
    }

    /// Checks one address against every rule; the first failing rule wins.
    pub fn check(&self, email: &str) -> Option<FilterRejection> {
        let at_idx = match email.find('@') {
            Some(idx) if idx >= 1 => idx,
            _ => return Some(FilterRejection::MalformedAddress),
        };
        let local_part = &email[..at_idx];
        let domain = &email[at_idx + 1..];

        match domain.rfind('.') {
            Some(dot) if dot >= 1 && domain.len() - dot - 1 >= 2 => {}
            _ => return Some(FilterRejection::MalformedAddress),
        }

        if email
            .chars()
            .any(|c| c.is_whitespace() || DISALLOWED_CHARS.contains(c))
        {
            return Some(FilterRejection::DisallowedCharacter);
        }

        if local_part.chars().count() < 2 {
            return Some(FilterRejection::LocalPartTooShort);
        }

        let local_lower = local_part.to_lowercase();
        let local_stripped: String = local_lower
            .chars()
            .filter(|c| !matches!(c, '.' | '_' | '-' | '+') && !c.is_ascii_digit())
            .collect();
        if self.role_prefixes.contains(&local_lower) || self.role_prefixes.contains(&local_stripped)
        {
            return Some(FilterRejection::RoleAccount);
        }

        if self.disposable_domains.contains(&domain.to_lowercase()) {
            return Some(FilterRejection::DisposableDomain);
        }

        if is_repeated_char(local_part, 5) || local_part.chars().all(|c| c.is_ascii_digit()) {
            return Some(FilterRejection::FakePattern);
        }

        None
    }

    pub fn passes(&self, email: &str) -> bool {
        self.check(email).is_none()
    }
}

/// True when `s` is one character repeated at least `min` times.
fn is_repeated_char(s: &str, min: usize) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    s.chars().count() >= min && chars.all(|c| c == first)
}

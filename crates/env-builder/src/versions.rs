//! Version normalization and PHP companion lookup.
//!
//! Both functions are pure. An input that cannot be coerced is an expected
//! outcome and comes back as `None`, never as an error.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Version, VersionReq};

/// Number of components kept by [`normalize`] when callers do not care.
pub const DEFAULT_COMPONENTS: usize = 3;

/// PHP version used when no rule in [`COMPANION_RULES`] matches.
pub const FALLBACK_COMPANION: &str = "7.0";

/// Ordered from newest to oldest; the first matching requirement wins.
const COMPANION_RULES: [(&str, &str); 1] = [(">=2.3.0", "7.1")];

// First run of up to three numeric components, each bounded to 16 digits.
static COERCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d])(\d{1,16})(?:\.(\d{1,16}))?(?:\.(\d{1,16}))?(?:$|[^\d])")
        .expect("coerce pattern is valid")
});

/// Coerce a loosely formatted version into `major.minor.patch`, then keep the
/// first `max_components` components (clamped into `1..=3`).
///
/// ```
/// use env_builder::versions::normalize;
///
/// assert_eq!(normalize("2.3", 3).as_deref(), Some("2.3.0"));
/// assert_eq!(normalize("v7.1.33", 2).as_deref(), Some("7.1"));
/// assert_eq!(normalize("not-a-version", 3), None);
/// ```
pub fn normalize(raw: &str, max_components: usize) -> Option<String> {
    let version = coerce(raw)?;
    let keep = max_components.clamp(1, 3);

    let canonical = version.to_string();
    Some(
        canonical
            .split('.')
            .take(keep)
            .collect::<Vec<_>>()
            .join("."),
    )
}

/// Derive the PHP version that matches a Magento version.
///
/// Total over every input: anything that cannot be coerced, or that no rule
/// covers, gets [`FALLBACK_COMPANION`].
pub fn companion_version(primary: &str) -> &'static str {
    let Some(version) = coerce(primary) else {
        return FALLBACK_COMPANION;
    };

    COMPANION_RULES
        .iter()
        .find(|(requirement, _)| {
            VersionReq::parse(requirement)
                .map(|req| req.matches(&version))
                .unwrap_or(false)
        })
        .map(|(_, companion)| *companion)
        .unwrap_or(FALLBACK_COMPANION)
}

fn coerce(raw: &str) -> Option<Version> {
    let captures = COERCE.captures(raw)?;
    let component = |index: usize| -> Option<u64> {
        match captures.get(index) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    Some(Version::new(component(1)?, component(2)?, component(3)?))
}

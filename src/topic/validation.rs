//! Topic name and filter validation and matching
//!
//! Rules enforced here:
//! - Topic names are nonempty, contain no NUL and no wildcards
//! - `#` must occupy a whole segment and must be the final segment
//! - `+` must occupy a whole segment
//! - Shared filters have the shape `$share/<ShareName>/<filter>` where
//!   ShareName is nonempty and contains no '/', '+' or '#'
//! - Topics whose first segment starts with `$` only match filters whose
//!   first segment also starts with `$`

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }
    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }
    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }
    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }
    Ok(())
}

/// Split a shared filter into (share name, inner filter).
///
/// Returns `None` for non-shared filters. Does not validate the inner filter.
pub fn parse_shared_filter(filter: &str) -> Option<(&str, &str)> {
    let rest = filter.strip_prefix("$share/")?;
    let slash = rest.find('/')?;
    let (group, inner) = (&rest[..slash], &rest[slash + 1..]);
    if group.is_empty()
        || group.contains('+')
        || group.contains('#')
        || inner.is_empty()
    {
        return None;
    }
    Some((group, inner))
}

/// Validate a topic filter (used in SUBSCRIBE/UNSUBSCRIBE)
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }
    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }
    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let inner = if filter.starts_with("$share/") {
        match parse_shared_filter(filter) {
            Some((_, inner)) => inner,
            None => return Err("invalid shared subscription filter"),
        }
    } else {
        filter
    };

    let segments: Vec<&str> = inner.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.contains('#') {
            if *segment != "#" {
                return Err("multi-level wildcard must occupy entire segment");
            }
            if i != segments.len() - 1 {
                return Err("multi-level wildcard must be the final segment");
            }
        }
        if segment.contains('+') && *segment != "+" {
            return Err("single-level wildcard must occupy entire segment");
        }
    }

    Ok(())
}

/// Check whether a topic filter matches a topic name.
///
/// Segment-wise: `#` matches all remaining segments (including none), `+`
/// matches exactly one segment. The filter must not be a `$share` form; strip
/// the share prefix first.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    // $-topics never match wildcard filters at the root
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_segments = topic.split('/');
    let mut filter_segments = filter.split('/');

    loop {
        match (filter_segments.next(), topic_segments.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_rules() {
        assert!(validate_topic_name("a").is_ok());
        assert!(validate_topic_name("a/b/c").is_ok());
        assert!(validate_topic_name("/leading").is_ok());
        assert!(validate_topic_name("trailing/").is_ok());
        assert!(validate_topic_name("$SYS/uptime").is_ok());

        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a\0b").is_err());
        assert!(validate_topic_name("a/+/c").is_err());
        assert!(validate_topic_name("a/#").is_err());
        assert!(validate_topic_name("a+b").is_err());
    }

    #[test]
    fn topic_filter_rules() {
        assert!(validate_topic_filter("a").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("+").is_ok());
        assert!(validate_topic_filter("a/#").is_ok());
        assert!(validate_topic_filter("+/+/+").is_ok());
        assert!(validate_topic_filter("a/+/c").is_ok());

        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("a#").is_err());
        assert!(validate_topic_filter("a/#/b").is_err());
        assert!(validate_topic_filter("a+").is_err());
        assert!(validate_topic_filter("a\0").is_err());
    }

    #[test]
    fn shared_filter_rules() {
        assert_eq!(parse_shared_filter("$share/g/a/b"), Some(("g", "a/b")));
        assert_eq!(parse_shared_filter("$share/g/#"), Some(("g", "#")));
        assert_eq!(parse_shared_filter("a/b"), None);
        assert_eq!(parse_shared_filter("$share//a"), None);
        assert_eq!(parse_shared_filter("$share/g"), None);
        assert_eq!(parse_shared_filter("$share/g+/a"), None);

        assert!(validate_topic_filter("$share/workers/jobs/+").is_ok());
        assert!(validate_topic_filter("$share//jobs").is_err());
        assert!(validate_topic_filter("$share/g").is_err());
        assert!(validate_topic_filter("$share/g/").is_err());
    }

    #[test]
    fn matching() {
        assert!(topic_matches_filter("a/b", "a/b"));
        assert!(!topic_matches_filter("a", "a/b"));
        assert!(!topic_matches_filter("a/b", "a"));

        assert!(topic_matches_filter("a/b", "a/+"));
        assert!(topic_matches_filter("a/b", "+/b"));
        assert!(topic_matches_filter("a/b/c", "+/+/+"));
        assert!(!topic_matches_filter("a/b", "+/+/+"));
        assert!(!topic_matches_filter("a/b/c/d", "+/+/+"));

        assert!(topic_matches_filter("a", "#"));
        assert!(topic_matches_filter("a/b/c", "#"));
        assert!(topic_matches_filter("a", "a/#"));
        assert!(topic_matches_filter("a/b/c", "a/#"));
        assert!(!topic_matches_filter("b/c", "a/#"));

        // $-prefixed topics only match $-prefixed filters
        assert!(!topic_matches_filter("$SYS/uptime", "#"));
        assert!(!topic_matches_filter("$SYS/uptime", "+/uptime"));
        assert!(topic_matches_filter("$SYS/uptime", "$SYS/#"));
        assert!(topic_matches_filter("$SYS/uptime", "$SYS/+"));
    }
}

//! Topic names and filters.
//!
//! Filters are matched level by level: `+` matches exactly one level,
//! `#` as the final level matches any remainder including the parent
//! itself. Filters beginning with a wildcard never match topics that
//! start with `$` (MQTT-4.7.2-1), keeping broker-internal topics out of
//! catch-all subscriptions.

/// Returns true if `topic` matches the subscription `filter`.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    let topic_is_system = topic_levels.first().is_some_and(|l| l.starts_with('$'));
    let filter_starts_with_wildcard = filter_levels
        .first()
        .is_some_and(|l| *l == "#" || *l == "+");
    if topic_is_system && filter_starts_with_wildcard {
        return false;
    }

    let mut ti = 0;
    let mut fi = 0;

    while fi < filter_levels.len() {
        let filter_level = filter_levels[fi];

        if filter_level == "#" {
            // Matches the remainder, and the parent level itself.
            return true;
        }

        if ti >= topic_levels.len() {
            return false;
        }

        if filter_level == "+" || filter_level == topic_levels[ti] {
            ti += 1;
            fi += 1;
        } else {
            return false;
        }
    }

    ti == topic_levels.len()
}

/// Returns true if `filter` is a well-formed subscription filter:
/// nonempty, short enough for its length prefix, `#` only as the final
/// level and alone in it, `+` alone in its level.
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > u16::MAX as usize {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return false;
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }

    true
}

/// Returns true if `topic` is a well-formed publish topic: nonempty,
/// short enough for its length prefix, and free of wildcard characters.
pub fn valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= u16::MAX as usize
        && !topic.contains('+')
        && !topic.contains('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches_filter("a/b/c", "a/b/c"));
        assert!(!topic_matches_filter("a/b/c", "a/b"));
        assert!(!topic_matches_filter("a/b", "a/b/c"));
        assert!(!topic_matches_filter("a/b/c", "a/b/x"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches_filter("sensors/room1/temp", "sensors/+/temp"));
        assert!(!topic_matches_filter("sensors/room1/hum", "sensors/+/temp"));
        assert!(!topic_matches_filter("sensors/a/b/temp", "sensors/+/temp"));
        assert!(topic_matches_filter("a/b", "+/+"));
        assert!(!topic_matches_filter("a", "+/+"));
        // An empty level is still a level.
        assert!(topic_matches_filter("sensors//temp", "sensors/+/temp"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches_filter("a", "a/#"));
        assert!(topic_matches_filter("a/b", "a/#"));
        assert!(topic_matches_filter("a/b/c/d", "a/#"));
        assert!(!topic_matches_filter("b/c", "a/#"));
        assert!(topic_matches_filter("anything/at/all", "#"));
    }

    #[test]
    fn test_system_topics_hidden_from_root_wildcards() {
        assert!(!topic_matches_filter("$SYS/broker/load", "#"));
        assert!(!topic_matches_filter("$SYS/broker/load", "+/broker/load"));
        assert!(topic_matches_filter("$SYS/broker/load", "$SYS/#"));
        assert!(topic_matches_filter("$SYS/broker/load", "$SYS/broker/+"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(valid_filter("a/b/c"));
        assert!(valid_filter("#"));
        assert!(valid_filter("a/#"));
        assert!(valid_filter("+/b/+"));
        assert!(valid_filter("sport/"));

        assert!(!valid_filter(""));
        assert!(!valid_filter("a/#/b"));
        assert!(!valid_filter("a/b#"));
        assert!(!valid_filter("a/b+/c"));
        assert!(!valid_filter("a/+b/c"));

        // A filter must fit its u16 length prefix.
        assert!(valid_filter(&"a".repeat(65535)));
        assert!(!valid_filter(&"a".repeat(65536)));
    }

    #[test]
    fn test_topic_validation() {
        assert!(valid_topic("a/b/c"));
        assert!(valid_topic("$SYS/internal"));
        assert!(!valid_topic(""));
        assert!(!valid_topic("a/+/c"));
        assert!(!valid_topic("a/#"));

        // A topic must fit its u16 length prefix.
        assert!(valid_topic(&"a".repeat(65535)));
        assert!(!valid_topic(&"a".repeat(65536)));
    }
}

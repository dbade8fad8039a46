//! Key-name conventions (spec §6 "Key-name conventions"). A primitive's
//! user-visible name deterministically fixes every key it touches, so two
//! client instances naming the same primitive always agree on its keys
//! without any coordination beyond the name itself.

/// The root key for a primitive named `name`.
pub fn root(name: &str) -> String {
    name.to_string()
}

/// An auxiliary key for `name`, e.g. `aux(name, "timeout")`. Names that
/// already carry an explicit hash tag are used as-is so the auxiliary key
/// still lands on the same slot as the root.
pub fn aux(name: &str, suffix: &str) -> String {
    if has_hash_tag(name) {
        format!("{name}:{suffix}")
    } else {
        format!("{{{name}}}:{suffix}")
    }
}

/// The pub/sub channel a primitive wakes waiters on.
pub fn channel(name: &str) -> String {
    if has_hash_tag(name) {
        format!("redisson_sc:{name}")
    } else {
        format!("redisson_sc:{{{name}}}")
    }
}

fn has_hash_tag(name: &str) -> bool {
    name.contains('{') && name.contains('}')
}

pub const KEYSPACE_EXPIRED_PATTERN: &str = "__keyevent@*:expired";
pub const KEYSPACE_DEL_PATTERN: &str = "__keyevent@*:del";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aux_wraps_a_plain_name_in_a_hash_tag() {
        assert_eq!(aux("my-lock", "timeout"), "{my-lock}:timeout");
    }

    #[test]
    fn aux_leaves_an_explicit_hash_tag_untouched() {
        assert_eq!(aux("{my-lock}", "timeout"), "{my-lock}:timeout");
    }

    #[test]
    fn channel_name_matches_the_documented_prefix() {
        assert_eq!(channel("L"), "redisson_sc:{L}");
    }
}

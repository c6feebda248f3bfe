use alloc::string::String;
use alloc::vec::Vec;

use regex::Regex;

use crate::{BOOL_TAG, FLOAT_TAG, INT_TAG, MAP_TAG, NULL_TAG, SEQ_TAG, STR_TAG, TIMESTAMP_TAG};

/// The tag used for the YAML 1.1 merge key (`<<`).
pub const MERGE_TAG: &str = "tag:yaml.org,2002:merge";
/// The tag used for the YAML 1.1 complex-key value indicator (`=`).
pub const VALUE_TAG: &str = "tag:yaml.org,2002:value";

/// A single implicit-tag resolution rule.
///
/// The resolver tries rules in registration order; the first whose
/// `first_chars` set contains the scalar's first character and whose
/// pattern matches the whole scalar wins.
#[derive(Clone, Debug)]
struct Rule {
    tag: &'static str,
    first_chars: &'static str,
    pattern: Regex,
}

/// Maps untagged scalars to implicit tags via an ordered set of regex rules.
///
/// Mirrors the resolver found in PyYAML/SnakeYAML: scalars that carry no
/// explicit tag are matched against this table to guess their type.
/// Sequences and mappings without an explicit tag always resolve to
/// [`SEQ_TAG`] and [`MAP_TAG`] respectively and do not consult this table.
#[derive(Clone, Debug)]
pub struct Resolver {
    rules: Vec<Rule>,
}

impl Resolver {
    /// Build the default resolver with the standard YAML 1.1 implicit rules:
    /// `bool`, `int`, `float`, `null`, `timestamp`, `merge`, and `value`.
    #[must_use]
    pub fn new() -> Self {
        let mut rules = Vec::with_capacity(8);
        rules.push(Rule {
            tag: BOOL_TAG,
            first_chars: "yYnNtTfFoO",
            pattern: Regex::new(
                r"^(?i:yes|no|true|false|on|off)$",
            )
            .unwrap(),
        });
        rules.push(Rule {
            tag: INT_TAG,
            first_chars: "-+0123456789",
            pattern: Regex::new(
                r"^(?:[-+]?0b[0-1_]+|[-+]?0[0-7_]+|[-+]?(?:0|[1-9][0-9_]*)|[-+]?0x[0-9a-fA-F_]+|[-+]?[1-9][0-9_]*(?::[0-5]?[0-9])+)$",
            )
            .unwrap(),
        });
        rules.push(Rule {
            tag: FLOAT_TAG,
            first_chars: "-+0123456789.",
            pattern: Regex::new(
                r"^(?:[-+]?(?:[0-9][0-9_]*)\.[0-9_]*(?:[eE][-+]?[0-9]+)?|\.[0-9][0-9_]*(?:[eE][-+]?[0-9]+)?|[-+]?[0-9][0-9_]*(?::[0-5]?[0-9])+\.[0-9_]*|[-+]?\.(?:inf|Inf|INF)|\.(?:nan|NaN|NAN))$",
            )
            .unwrap(),
        });
        rules.push(Rule {
            tag: MERGE_TAG,
            first_chars: "<",
            pattern: Regex::new(r"^<<$").unwrap(),
        });
        rules.push(Rule {
            tag: NULL_TAG,
            first_chars: "~nN\0",
            pattern: Regex::new(r"^(?:~|null|Null|NULL|)$").unwrap(),
        });
        rules.push(Rule {
            tag: TIMESTAMP_TAG,
            first_chars: "0123456789",
            pattern: Regex::new(
                r"^[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9](?:[Tt]|[ \t]+)[0-9][0-9]?:[0-9][0-9]:[0-9][0-9](?:\.[0-9]*)?(?:[ \t]*(?:Z|[-+][0-9][0-9]?(?::[0-9][0-9])?))?$|^[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]$",
            )
            .unwrap(),
        });
        rules.push(Rule {
            tag: VALUE_TAG,
            first_chars: "=",
            pattern: Regex::new(r"^=$").unwrap(),
        });
        Resolver { rules }
    }

    /// Register an additional implicit-tag rule, tried after all built-in
    /// rules.
    pub fn add_rule(&mut self, tag: &'static str, first_chars: &'static str, pattern: &str) {
        self.rules.push(Rule {
            tag,
            first_chars,
            pattern: Regex::new(pattern).expect("invalid resolver pattern"),
        });
    }

    /// Resolve the implicit tag of a plain scalar.
    ///
    /// Non-plain scalars (quoted, literal, folded) are never implicitly
    /// resolved by the YAML 1.1 grammar and always default to [`STR_TAG`];
    /// callers should only invoke this for scalars whose style allows
    /// implicit tagging.
    #[must_use]
    pub fn resolve_scalar(&self, value: &str) -> &'static str {
        let first = value.chars().next().unwrap_or('\0');
        for rule in &self.rules {
            if rule.first_chars.contains(first) && rule.pattern.is_match(value) {
                return rule.tag;
            }
        }
        STR_TAG
    }

    /// The implicit tag of a sequence node: always [`SEQ_TAG`].
    #[must_use]
    pub fn resolve_sequence(&self) -> &'static str {
        SEQ_TAG
    }

    /// The implicit tag of a mapping node: always [`MAP_TAG`].
    #[must_use]
    pub fn resolve_mapping(&self) -> &'static str {
        MAP_TAG
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_bool() {
        let resolver = Resolver::new();
        assert_eq!(resolver.resolve_scalar("true"), BOOL_TAG);
        assert_eq!(resolver.resolve_scalar("Off"), BOOL_TAG);
    }

    #[test]
    fn resolves_int_and_float() {
        let resolver = Resolver::new();
        assert_eq!(resolver.resolve_scalar("42"), INT_TAG);
        assert_eq!(resolver.resolve_scalar("-0x1A"), INT_TAG);
        assert_eq!(resolver.resolve_scalar("3.14"), FLOAT_TAG);
        assert_eq!(resolver.resolve_scalar(".inf"), FLOAT_TAG);
    }

    #[test]
    fn resolves_null_and_merge() {
        let resolver = Resolver::new();
        assert_eq!(resolver.resolve_scalar(""), NULL_TAG);
        assert_eq!(resolver.resolve_scalar("~"), NULL_TAG);
        assert_eq!(resolver.resolve_scalar("<<"), MERGE_TAG);
    }

    #[test]
    fn falls_back_to_str() {
        let resolver = Resolver::new();
        assert_eq!(resolver.resolve_scalar("hello world"), STR_TAG);
    }
}

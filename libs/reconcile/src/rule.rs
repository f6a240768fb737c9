//! Range rules: operator-authored predicates over revision numbers.
//!
//! A rule is persisted as its source text, so the grammar below is a stable
//! contract:
//!
//! ```text
//! rule        = alternative *( "||" alternative )
//! alternative = clause *( "," clause )          ; every clause must hold
//! clause      = "*"                             ; any revision
//!             | version " - " version           ; inclusive range
//!             | [op] version                    ; op: = == != > >= < <= ^ ~
//!             | wildcard                        ; 1.* , 1.0.* , 1.x
//! ```
//!
//! - `^1.2.3` means `>=1.2.3, <2`; `^0.2.3` means `>=0.2.3, <0.3`
//! - `~1.2.3` means `>=1.2.3, <1.3`; `~1` means `>=1, <2`
//! - a bare version is an exact match by order key (`2` matches `2.0`)
//!
//! Parsing happens once, when the rule is edited. Evaluating a parsed rule
//! is pure and total.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{parse_numeric, parse_pre, split_release, OrderKey, PreIdent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("range rule cannot be empty")]
    Empty,

    #[error("invalid clause '{clause}': {reason}")]
    InvalidClause { clause: String, reason: String },
}

impl RuleError {
    fn clause(clause: &str, reason: impl Into<String>) -> Self {
        RuleError::InvalidClause {
            clause: clause.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Caret,
    Tilde,
}

// Longest operators first so `>=` is not read as `>`.
const OPERATORS: &[(&str, Op)] = &[
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("=", Op::Eq),
    ("^", Op::Caret),
    ("~", Op::Tilde),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    Any,
    Compare(Op, OrderKey),
    /// Lower bound inclusive, upper bound exclusive.
    HalfOpen(OrderKey, OrderKey),
    /// Both bounds inclusive.
    Between(OrderKey, OrderKey),
    Prefix(Vec<u64>),
}

impl Clause {
    fn matches(&self, key: &OrderKey) -> bool {
        match self {
            Clause::Any => true,
            Clause::Compare(op, bound) => match op {
                Op::Eq => key == bound,
                Op::Ne => key != bound,
                Op::Gt => key > bound,
                Op::Ge => key >= bound,
                Op::Lt => key < bound,
                Op::Le => key <= bound,
                // Expanded into HalfOpen at parse time.
                Op::Caret | Op::Tilde => false,
            },
            Clause::HalfOpen(lower, upper) => key >= lower && key < upper,
            Clause::Between(lower, upper) => key >= lower && key <= upper,
            Clause::Prefix(prefix) => prefix
                .iter()
                .enumerate()
                .all(|(i, component)| key.component(i) == *component),
        }
    }
}

/// A parsed range rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RangeRule {
    source: String,
    alternatives: Vec<Vec<Clause>>,
}

impl RangeRule {
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let source = text.trim();
        if source.is_empty() {
            return Err(RuleError::Empty);
        }

        let alternatives = source
            .split("||")
            .map(|alternative| {
                alternative
                    .split(',')
                    .map(parse_clause)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// The rule as the operator wrote it (trimmed).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, key: &OrderKey) -> bool {
        self.alternatives
            .iter()
            .any(|clauses| clauses.iter().all(|clause| clause.matches(key)))
    }
}

impl std::fmt::Display for RangeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for RangeRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RangeRule {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RangeRule> for String {
    fn from(rule: RangeRule) -> Self {
        rule.source
    }
}

/// A version as written in a rule, possibly ending in wildcards.
struct RuleVersion {
    components: Vec<u64>,
    pre: Vec<PreIdent>,
    wildcard: bool,
}

impl RuleVersion {
    fn key(&self) -> OrderKey {
        OrderKey::new(self.components.clone(), self.pre.clone())
    }
}

fn parse_clause(raw: &str) -> Result<Clause, RuleError> {
    let clause = raw.trim();
    if clause.is_empty() {
        return Err(RuleError::clause(raw, "empty clause"));
    }

    if clause == "*" {
        return Ok(Clause::Any);
    }

    if let Some((lower, upper)) = clause.split_once(" - ") {
        let lower = parse_exact_version(clause, lower.trim())?;
        let upper = parse_exact_version(clause, upper.trim())?;
        if lower > upper {
            return Err(RuleError::clause(clause, "range lower bound exceeds upper bound"));
        }
        return Ok(Clause::Between(lower, upper));
    }

    let (op, rest) = OPERATORS
        .iter()
        .find_map(|(token, op)| clause.strip_prefix(token).map(|rest| (Some(*op), rest)))
        .unwrap_or((None, clause));

    let version = parse_rule_version(clause, rest.trim())?;

    if version.wildcard {
        return match op {
            None | Some(Op::Eq) => Ok(Clause::Prefix(version.components)),
            Some(_) => Err(RuleError::clause(
                clause,
                "wildcards can only be used without an operator",
            )),
        };
    }

    let lower = version.key();
    Ok(match op {
        None => Clause::Compare(Op::Eq, lower),
        Some(Op::Caret) => Clause::HalfOpen(lower, caret_upper(&version.components)),
        Some(Op::Tilde) => Clause::HalfOpen(lower, tilde_upper(&version.components)),
        Some(op) => Clause::Compare(op, lower),
    })
}

fn parse_exact_version(clause: &str, text: &str) -> Result<OrderKey, RuleError> {
    let version = parse_rule_version(clause, text)?;
    if version.wildcard {
        return Err(RuleError::clause(clause, "range bounds cannot contain wildcards"));
    }
    Ok(version.key())
}

fn parse_rule_version(clause: &str, text: &str) -> Result<RuleVersion, RuleError> {
    if text.is_empty() {
        return Err(RuleError::clause(clause, "missing version"));
    }
    if text.contains(char::is_whitespace) {
        return Err(RuleError::clause(clause, "unexpected whitespace in version"));
    }

    let (release, pre) = split_release(text).map_err(|reason| RuleError::clause(clause, reason))?;

    let mut components = Vec::new();
    let mut wildcard = false;
    for part in release.split('.') {
        if matches!(part, "*" | "x" | "X") {
            wildcard = true;
            continue;
        }
        if wildcard {
            return Err(RuleError::clause(clause, "wildcards must be trailing"));
        }
        components.push(parse_numeric(part).map_err(|reason| RuleError::clause(clause, reason))?);
    }

    let pre = match pre {
        Some(_) if wildcard => {
            return Err(RuleError::clause(clause, "wildcards cannot have a pre-release"))
        }
        Some(pre) => parse_pre(pre).map_err(|reason| RuleError::clause(clause, reason))?,
        None => Vec::new(),
    };

    Ok(RuleVersion {
        components,
        pre,
        wildcard,
    })
}

/// Bumps the first non-zero component (or the last one if all are zero).
fn caret_upper(components: &[u64]) -> OrderKey {
    let index = components
        .iter()
        .position(|c| *c != 0)
        .unwrap_or(components.len().saturating_sub(1));
    bump(components, index)
}

fn tilde_upper(components: &[u64]) -> OrderKey {
    bump(components, if components.len() >= 2 { 1 } else { 0 })
}

fn bump(components: &[u64], index: usize) -> OrderKey {
    let mut upper: Vec<u64> = components.iter().take(index + 1).copied().collect();
    upper.resize(index + 1, 0);
    upper[index] = upper[index].saturating_add(1);
    OrderKey::new(upper, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::RevisionNumber;
    use proptest::prelude::*;
    use rstest::rstest;

    fn matches(rule: &str, number: &str) -> bool {
        let key = RevisionNumber::parse(number).unwrap().order_key().clone();
        RangeRule::parse(rule).unwrap().matches(&key)
    }

    #[rstest]
    #[case(">=2", "2", true)]
    #[case(">=2", "1.9", false)]
    #[case(">= 2", "3", true)]
    #[case(">2", "2.0", false)]
    #[case("<2", "2-rc.1", true)]
    #[case("<=2", "2.0.0", true)]
    #[case("2", "2.0", true)]
    #[case("=2", "2.1", false)]
    #[case("==2.1", "2.1", true)]
    #[case("!=2", "3", true)]
    #[case("!=2", "2", false)]
    #[case("*", "0.0.1", true)]
    #[case("1.0.*", "1.0", true)]
    #[case("1.0.*", "1.0.7", true)]
    #[case("1.0.*", "1.1", false)]
    #[case("1.x", "1.9.9", true)]
    #[case("1.x", "2", false)]
    #[case("1.2 - 1.5", "1.5", true)]
    #[case("1.2 - 1.5", "1.2", true)]
    #[case("1.2 - 1.5", "1.5.1", false)]
    #[case("^1.2.3", "1.9", true)]
    #[case("^1.2.3", "2", false)]
    #[case("^1.2.3", "1.2.2", false)]
    #[case("^0.2.3", "0.2.9", true)]
    #[case("^0.2.3", "0.3", false)]
    #[case("^0.0.3", "0.0.4", false)]
    #[case("~1.2.3", "1.2.9", true)]
    #[case("~1.2.3", "1.3", false)]
    #[case("~1", "1.9", true)]
    #[case("~1", "2", false)]
    #[case(">=1, <2", "1.5", true)]
    #[case(">=1, <2", "2", false)]
    #[case("1.* || >=3", "3.1", true)]
    #[case("1.* || >=3", "2", false)]
    fn test_matches(#[case] rule: &str, #[case] number: &str, #[case] expected: bool) {
        assert_eq!(matches(rule, number), expected, "{rule} vs {number}");
    }

    #[rstest]
    #[case("<<bad>>")]
    #[case(">=")]
    #[case("1..2")]
    #[case(">=1,")]
    #[case("|| 1")]
    #[case(">1.*")]
    #[case("1.*.2")]
    #[case("1.* -rc")]
    #[case("2 - 1")]
    #[case("1 - 2.*")]
    #[case("latest")]
    #[case(">=1 <2")]
    fn test_rejects_invalid(#[case] rule: &str) {
        assert!(
            matches!(RangeRule::parse(rule), Err(RuleError::InvalidClause { .. })),
            "{rule}"
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t\n")]
    fn test_rejects_blank(#[case] rule: &str) {
        assert_eq!(RangeRule::parse(rule), Err(RuleError::Empty));
    }

    #[test]
    fn test_source_is_preserved() {
        let rule = RangeRule::parse("  >=1, <2 ").unwrap();
        assert_eq!(rule.as_str(), ">=1, <2");
        assert_eq!(serde_json::to_string(&rule).unwrap(), "\">=1, <2\"");
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_pure(
            bound in 0u64..20,
            parts in proptest::collection::vec(0u64..20, 1..4),
        ) {
            let rule = RangeRule::parse(&format!(">={bound}")).unwrap();
            let number = parts.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
            let key = RevisionNumber::parse(&number).unwrap().order_key().clone();
            let first = rule.matches(&key);
            prop_assert_eq!(first, rule.matches(&key));
            prop_assert_eq!(first, key.component(0) >= bound);
        }
    }
}

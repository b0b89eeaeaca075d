// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Label requirements and selector composition.
//!
//! Kubernetes filters list and watch calls server-side through label selectors. This module
//! parses the user-supplied selector text into [`Requirement`] values, merges them with the
//! per-kind built-in requirements, and renders the composed [`Selector`] back into the canonical
//! query text sent to the cluster. Requirements can also be evaluated locally against a label
//! map, which the tests rely on.

use crate::{Error, Result};

use std::{collections::BTreeMap, fmt};

/// Comparison operator of a single label requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Label must exist with the given value.
    Equals,

    /// Label must not exist with the given value.
    NotEquals,

    /// Label must exist with one of the given values.
    In,

    /// Label must not exist with any of the given values.
    NotIn,

    /// Label must exist, value does not matter.
    Exists,

    /// Label must not exist at all.
    DoesNotExist,
}

/// A single label requirement, e.g. `environment in (prod, staging)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    /// Construct a new requirement.
    ///
    /// # Errors
    ///
    /// - Will fail if the key is empty.
    /// - Will fail if a value-less operator is given values, or a valued operator is given none.
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let key = key.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();

        if key.is_empty() {
            return Err(Error::Selector {
                selector: String::new(),
                reason: "requirement key cannot be empty".into(),
            });
        }

        let arity_ok = match operator {
            Operator::Equals | Operator::NotEquals => values.len() == 1,
            Operator::In | Operator::NotIn => !values.is_empty(),
            Operator::Exists | Operator::DoesNotExist => values.is_empty(),
        };
        if !arity_ok {
            return Err(Error::Selector {
                selector: key,
                reason: format!("operator {operator:?} given {} values", values.len()),
            });
        }

        Ok(Self { key, operator, values })
    }

    /// Shorthand for a `DoesNotExist` requirement on the given key.
    ///
    /// # Panics
    ///
    /// Panics if the key is empty. All call sites pass literal keys.
    pub fn absent(key: &str) -> Self {
        Self::new(key, Operator::DoesNotExist, Vec::<String>::new())
            .expect("literal key is never empty")
    }

    /// Evaluate the requirement against a label map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => {
                value.is_some_and(|v| self.values.iter().any(|expect| expect == v))
            }
            Operator::NotEquals | Operator::NotIn => {
                value.is_none_or(|v| !self.values.iter().any(|expect| expect == v))
            }
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, self.values[0]),
            Operator::NotEquals => write!(f, "{}!={}", self.key, self.values[0]),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// An ordered conjunction of label requirements.
///
/// The rendered text is what list and watch calls carry to the cluster. The selected set is
/// independent of requirement order, since requirements are ANDed together.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selector(Vec<Requirement>);

impl Selector {
    /// Construct an empty selector that matches everything.
    pub fn everything() -> Self {
        Selector::default()
    }

    /// Parse selector text following the Kubernetes label selector grammar.
    ///
    /// Supported terms: `key`, `!key`, `key=value`, `key==value`, `key!=value`,
    /// `key in (a,b)`, and `key notin (a,b)`, joined by commas.
    ///
    /// # Errors
    ///
    /// - Will fail if any term does not follow the grammar above.
    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in split_terms(selector) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_term(selector, term)?);
        }

        Ok(Self(requirements))
    }

    /// Append additional requirements to the selector.
    pub fn extend(&mut self, requirements: impl IntoIterator<Item = Requirement>) {
        self.0.extend(requirements);
    }

    /// Whether the selector has no requirements at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluate the selector against a label map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|requirement| requirement.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", terms.join(","))
    }
}

/// Merge the user-supplied selector text with per-kind built-in requirements.
///
/// The per-kind requirements are owned values moved into the selector, so nothing here can
/// accidentally alias state that changes between kinds.
///
/// # Errors
///
/// - Will fail if the user selector does not parse.
pub fn compose(
    user_selector: Option<&str>,
    requirements: impl IntoIterator<Item = Requirement>,
) -> Result<Selector> {
    let mut selector = match user_selector {
        Some(text) => Selector::parse(text)?,
        None => Selector::everything(),
    };
    selector.extend(requirements);

    Ok(selector)
}

/// Split selector text on commas that are not nested inside a value set.
fn split_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (at, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..at]);
                start = at + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);

    terms
}

fn parse_term(selector: &str, term: &str) -> Result<Requirement> {
    let invalid = |reason: &str| Error::Selector {
        selector: selector.to_string(),
        reason: format!("{reason} in term {term:?}"),
    };

    if let Some(key) = term.strip_prefix('!') {
        return Requirement::new(key.trim(), Operator::DoesNotExist, Vec::<String>::new());
    }

    if let Some((key, rest)) = term.split_once("!=") {
        return Requirement::new(key.trim(), Operator::NotEquals, [rest.trim()]);
    }

    if let Some((key, rest)) = term.split_once("==").or_else(|| term.split_once('=')) {
        if rest.contains('=') {
            return Err(invalid("unexpected '='"));
        }
        return Requirement::new(key.trim(), Operator::Equals, [rest.trim()]);
    }

    for (word, operator) in [(" notin ", Operator::NotIn), (" in ", Operator::In)] {
        if let Some(at) = term.find(word) {
            let key = term[..at].trim();
            let rest = term[at + word.len()..].trim();
            let values = rest
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| invalid("value set must be parenthesized"))?;
            let values: Vec<&str> =
                values.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
            return Requirement::new(key, operator, values);
        }
    }

    if term.contains(char::is_whitespace) {
        return Err(invalid("unexpected whitespace"));
    }

    Requirement::new(term, Operator::Exists, Vec::<String>::new())
}

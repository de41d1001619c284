use handlebars::Handlebars;
use regex::Regex;

use crate::domain::alert::alert_record::Labels;
use crate::domain::alert::matcher::{LabelPredicate, NodeIdentity, NodeMatcher};
use crate::errors::MatchError;

const TEMPLATE_NAME: &str = "node_filters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchType {
    fn is_negative(&self) -> bool {
        matches!(self, Self::NotEqual | Self::NotRegex)
    }
}

/// One `name <op> value` clause.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub match_type: MatchType,
    pub value: String,
    regex: Option<Regex>,
}

impl LabelMatcher {
    pub fn new(name: &str, match_type: MatchType, value: &str) -> Result<Self, MatchError> {
        let regex = match match_type {
            MatchType::Regex | MatchType::NotRegex => {
                let anchored = format!("^(?:{value})$");
                Some(Regex::new(&anchored).map_err(|source| MatchError::Regex {
                    pattern: value.to_string(),
                    source,
                })?)
            }
            MatchType::Equal | MatchType::NotEqual => None,
        };

        Ok(Self {
            name: name.to_string(),
            match_type,
            value: value.to_string(),
            regex,
        })
    }

    /// Raw operator semantics against a value; absent labels are passed as "".
    pub fn matches_value(&self, value: &str) -> bool {
        match (self.match_type, &self.regex) {
            (MatchType::Equal, _) => value == self.value,
            (MatchType::NotEqual, _) => value != self.value,
            (MatchType::Regex, Some(re)) => re.is_match(value),
            (MatchType::NotRegex, Some(re)) => !re.is_match(value),
            (_, None) => false,
        }
    }

    /// Applies the matcher to a label set, treating an empty matcher value as
    /// "label absent" for positive operators and "label present" for negative ones.
    pub fn matches_labels(&self, labels: &Labels) -> bool {
        let existing = labels.get(&self.name);

        if self.match_type.is_negative() {
            if self.value.is_empty() && existing.is_some() {
                return true;
            }
            return self.matches_value(existing.map(String::as_str).unwrap_or_default());
        }

        match existing {
            None => self.value.is_empty(),
            Some(v) => self.matches_value(v),
        }
    }
}

/// True when any matcher accepts the labels.
pub fn any_matches(matchers: &[LabelMatcher], labels: &Labels) -> bool {
    matchers.iter().any(|m| m.matches_labels(labels))
}

/// Parses a matcher list such as `{job="node", instance=~"web-.*"}`.
/// Braces are optional and values may be quoted or bare.
pub fn parse_matchers(input: &str) -> Result<Vec<LabelMatcher>, MatchError> {
    let trimmed = input.trim();
    let body = match (trimmed.starts_with('{'), trimmed.ends_with('}')) {
        (true, true) => &trimmed[1..trimmed.len() - 1],
        (false, false) => trimmed,
        _ => {
            return Err(MatchError::Matcher {
                input: input.to_string(),
                reason: "unbalanced braces".into(),
            })
        }
    };

    split_outside_quotes(body, input)?
        .into_iter()
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(parse_matcher)
        .collect()
}

fn split_outside_quotes<'a>(body: &'a str, input: &str) -> Result<Vec<&'a str>, MatchError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(MatchError::Matcher {
            input: input.to_string(),
            reason: "unterminated quoted value".into(),
        });
    }
    parts.push(&body[start..]);
    Ok(parts)
}

fn parse_matcher(clause: &str) -> Result<LabelMatcher, MatchError> {
    let invalid = |reason: &str| MatchError::Matcher {
        input: clause.to_string(),
        reason: reason.to_string(),
    };

    let op_start = clause
        .find(['=', '!'])
        .ok_or_else(|| invalid("missing operator"))?;
    let name = clause[..op_start].trim();
    if !is_valid_label_name(name) {
        return Err(invalid("invalid label name"));
    }

    let rest = &clause[op_start..];
    let (match_type, op_len) = if rest.starts_with("=~") {
        (MatchType::Regex, 2)
    } else if rest.starts_with("!~") {
        (MatchType::NotRegex, 2)
    } else if rest.starts_with("!=") {
        (MatchType::NotEqual, 2)
    } else if rest.starts_with('=') {
        (MatchType::Equal, 1)
    } else {
        return Err(invalid("unknown operator"));
    };

    let raw_value = rest[op_len..].trim();
    let value = if let Some(quoted) = raw_value.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .ok_or_else(|| invalid("unterminated quoted value"))?;
        unescape(inner)
    } else {
        raw_value.to_string()
    };

    LabelMatcher::new(name, match_type, &value)
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        // Only \\, \" and \n are escapes; anything else is kept for regexes.
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(c @ ('"' | '\\')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Template-driven filter builder: renders `{{FullName}}` / `{{ShortName}}`
/// into a matcher list per node, then ORs the resulting matchers.
pub struct LabelMatcherTemplate {
    registry: Handlebars<'static>,
}

impl LabelMatcherTemplate {
    pub fn compile(template: &str) -> Result<Self, MatchError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(|e| MatchError::Template(e.to_string()))?;

        // Unknown variables and malformed matchers fail here, not per node.
        let compiled = Self { registry };
        parse_matchers(&compiled.render(&NodeIdentity::new("node.example"))?)?;
        Ok(compiled)
    }

    pub fn render(&self, node: &NodeIdentity) -> Result<String, MatchError> {
        self.registry
            .render(TEMPLATE_NAME, node)
            .map_err(|e| MatchError::Template(e.to_string()))
    }
}

struct BoundMatchers(Vec<LabelMatcher>);

impl LabelPredicate for BoundMatchers {
    fn test(&self, labels: &Labels) -> Result<bool, MatchError> {
        Ok(any_matches(&self.0, labels))
    }
}

impl NodeMatcher for LabelMatcherTemplate {
    fn bind<'a>(&'a self, node: &NodeIdentity) -> Result<Box<dyn LabelPredicate + 'a>, MatchError> {
        let rendered = self.render(node)?;
        Ok(Box::new(BoundMatchers(parse_matchers(&rendered)?)))
    }
}

//! Parsing of `${var.NAME}` and `${ref.RESOURCE.ATTRIBUTE}` attribute
//! expressions.

use std::fmt;

/// One parsed segment of an attribute expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExprSegment {
    /// Literal text copied through unchanged.
    Literal(String),
    /// Reference to a variable binding.
    Var(String),
    /// Reference to another declaration's runtime attribute.
    Ref {
        /// Logical name of the referenced declaration.
        resource: String,
        /// Attribute read from the referenced declaration's snapshot.
        attribute: String,
    },
}

/// Errors raised while parsing an attribute expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExprError {
    /// A `${` opener without a matching `}`.
    Unterminated,
    /// An expression whose body is empty or whitespace.
    Empty,
    /// An expression that is neither `var.NAME` nor `ref.RESOURCE.ATTRIBUTE`.
    Malformed(String),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unterminated => write!(f, "unterminated ${{...}} expression"),
            Self::Empty => write!(f, "empty ${{...}} expression"),
            Self::Malformed(body) => write!(
                f,
                "malformed expression '{body}': expected var.NAME or ref.RESOURCE.ATTRIBUTE"
            ),
        }
    }
}

impl std::error::Error for ExprError {}

/// Parses `raw` into literal and expression segments.
///
/// Text outside `${...}` markers is preserved verbatim; a `$` not followed
/// by `{` is a literal dollar sign.
///
/// # Errors
///
/// Returns [`ExprError`] when an expression is unterminated, empty, or has
/// an unknown namespace.
pub fn parse(raw: &str) -> Result<Vec<ExprSegment>, ExprError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            if !literal.is_empty() {
                segments.push(ExprSegment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_body(&mut chars)?);
        } else {
            literal.push(ch);
        }
    }

    if !literal.is_empty() {
        segments.push(ExprSegment::Literal(literal));
    }
    Ok(segments)
}

/// Returns `true` when `raw` contains at least one `${...}` expression.
#[must_use]
pub fn contains_expression(raw: &str) -> bool {
    parse(raw)
        .map(|segments| {
            segments
                .iter()
                .any(|segment| !matches!(segment, ExprSegment::Literal(_)))
        })
        .unwrap_or(true)
}

fn parse_body(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<ExprSegment, ExprError> {
    let mut body = String::new();
    loop {
        match chars.next() {
            Some('}') => break,
            Some(ch) => body.push(ch),
            None => return Err(ExprError::Unterminated),
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }

    let mut parts = trimmed.split('.');
    let namespace = parts.next().unwrap_or_default();
    match namespace {
        "var" => {
            let name = parts.next().filter(|part| !part.is_empty());
            match (name, parts.next()) {
                (Some(name), None) => Ok(ExprSegment::Var(name.to_owned())),
                _ => Err(ExprError::Malformed(trimmed.to_owned())),
            }
        }
        "ref" => {
            let resource = parts.next().filter(|part| !part.is_empty());
            let attribute = parts.next().filter(|part| !part.is_empty());
            match (resource, attribute, parts.next()) {
                (Some(resource), Some(attribute), None) => Ok(ExprSegment::Ref {
                    resource: resource.to_owned(),
                    attribute: attribute.to_owned(),
                }),
                _ => Err(ExprError::Malformed(trimmed.to_owned())),
            }
        }
        _ => Err(ExprError::Malformed(trimmed.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_one_literal() {
        let segments = parse("10.0.0.0/16").unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(
            segments,
            vec![ExprSegment::Literal(String::from("10.0.0.0/16"))]
        );
    }

    #[test]
    fn var_expression_parses() {
        let segments = parse("${var.subnet_cidr}").unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(segments, vec![ExprSegment::Var(String::from("subnet_cidr"))]);
    }

    #[test]
    fn ref_expression_parses() {
        let segments = parse("${ref.network.id}").unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(
            segments,
            vec![ExprSegment::Ref {
                resource: String::from("network"),
                attribute: String::from("id"),
            }]
        );
    }

    #[test]
    fn mixed_literal_and_expression() {
        let segments =
            parse("subnet-${var.env}-a").unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(
            segments,
            vec![
                ExprSegment::Literal(String::from("subnet-")),
                ExprSegment::Var(String::from("env")),
                ExprSegment::Literal(String::from("-a")),
            ]
        );
    }

    #[test]
    fn lone_dollar_is_literal() {
        let segments = parse("cost-$5").unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(segments, vec![ExprSegment::Literal(String::from("cost-$5"))]);
    }

    #[test]
    fn unterminated_expression_is_rejected() {
        assert_eq!(parse("${var.name"), Err(ExprError::Unterminated));
    }

    #[test]
    fn empty_expression_is_rejected() {
        assert_eq!(parse("${ }"), Err(ExprError::Empty));
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let err = parse("${data.thing}").expect_err("namespace should be rejected");
        assert!(matches!(err, ExprError::Malformed(_)));
    }

    #[test]
    fn trailing_ref_component_is_rejected() {
        let err = parse("${ref.network.id.extra}").expect_err("extra component should be rejected");
        assert!(matches!(err, ExprError::Malformed(_)));
    }

    #[test]
    fn contains_expression_detects_expressions() {
        assert!(contains_expression("${var.x}"));
        assert!(!contains_expression("plain"));
    }
}

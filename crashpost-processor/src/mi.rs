// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A parser for GDB/MI result records.
//!
//! Only the value grammar is supported, there are no record prefixes:
//!
//! ```text
//! results := result ( "," result )*
//! result  := variable "=" value
//! value   := const | tuple | list
//! tuple   := "{}" | "{" results "}"
//! list    := "[]" | "[" value ( "," value )* "]" | "[" results "]"
//! ```

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, take_while1};
use nom::character::complete::{anychar, char};
use nom::combinator::{all_consuming, map, opt, value};
use nom::error::ErrorKind;
use nom::multi::{separated_list0, separated_list1};
use nom::sequence::{delimited, separated_pair};
use nom::IResult;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    Const(String),
    Tuple(Vec<(String, MiValue)>),
    List(Vec<MiValue>),
    /// A list whose elements are `name=value` results.
    ResultList(Vec<(String, MiValue)>),
}

impl MiValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a field of a tuple.
    pub fn get(&self, name: &str) -> Option<&MiValue> {
        match self {
            MiValue::Tuple(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed result list at offset {offset} ({kind:?})")]
pub struct MiError {
    pub offset: usize,
    pub kind: ErrorKind,
}

// A C string with backslash escapes. `escaped_transform` rejects empty
// contents, hence the `opt`.
fn c_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value('\n', char('n')),
                    value('\t', char('t')),
                    value('\r', char('r')),
                    anychar,
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn variable(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(input)
}

fn result(input: &str) -> IResult<&str, (String, MiValue)> {
    map(separated_pair(variable, char('='), mi_value), |(name, value)| {
        (name.to_string(), value)
    })(input)
}

fn results(input: &str) -> IResult<&str, Vec<(String, MiValue)>> {
    separated_list1(char(','), result)(input)
}

fn tuple(input: &str) -> IResult<&str, MiValue> {
    map(
        delimited(char('{'), separated_list0(char(','), result), char('}')),
        MiValue::Tuple,
    )(input)
}

fn list(input: &str) -> IResult<&str, MiValue> {
    delimited(
        char('['),
        alt((
            map(results, MiValue::ResultList),
            map(separated_list0(char(','), mi_value), MiValue::List),
        )),
        char(']'),
    )(input)
}

fn mi_value(input: &str) -> IResult<&str, MiValue> {
    alt((map(c_string, MiValue::Const), tuple, list))(input)
}

/// Parse a comma separated list of results, e.g. `frame={level="0"},frame={level="1"}`.
pub fn parse_results(input: &str) -> Result<Vec<(String, MiValue)>, MiError> {
    match all_consuming(results)(input) {
        Ok((_, results)) => Ok(results),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(MiError {
            offset: input.len() - e.input.len(),
            kind: e.code,
        }),
        Err(nom::Err::Incomplete(_)) => Err(MiError {
            offset: input.len(),
            kind: ErrorKind::Eof,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tuple_and_lists() {
        let results =
            parse_results(r#"a="1",b={c="x\"y",d=[]},e=["p","q"],f=[g="h",g="i"]"#).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0], ("a".to_string(), MiValue::Const("1".to_string())));
        assert_eq!(results[1].1.get("c").and_then(MiValue::as_str), Some("x\"y"));
        assert_eq!(results[1].1.get("d"), Some(&MiValue::List(vec![])));
        assert_eq!(
            results[2].1,
            MiValue::List(vec![
                MiValue::Const("p".to_string()),
                MiValue::Const("q".to_string())
            ])
        );
        match &results[3].1 {
            MiValue::ResultList(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_errors() {
        assert!(parse_results("").is_err());
        assert!(parse_results("a=").is_err());
        assert!(parse_results(r#"a="unterminated"#).is_err());
        assert!(parse_results(r#"a={b="c""#).is_err());
        assert!(parse_results(r#"a="b"."#).is_err());
    }

    #[test]
    fn test_error_offset() {
        let err = parse_results(r#"a="b",c={d="e"}."#).unwrap_err();
        assert_eq!(err.offset, 15);
        assert_eq!(err.kind, ErrorKind::Eof);
    }

    #[test]
    fn test_strings() {
        let results = parse_results(r#"empty="",esc="a\\b\tc""#).unwrap();
        assert_eq!(results[0].1.as_str(), Some(""));
        assert_eq!(results[1].1.as_str(), Some("a\\b\tc"));
    }
}

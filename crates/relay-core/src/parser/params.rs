//! Requested-block extraction from parsed parameters.

use serde_json::Value;

use crate::block::{self, NOT_APPLICABLE};
use crate::spec::{BlockParser, ParserFunc};

use super::ParserError;

/// Runs an api's block parser against the message parameters and returns the
/// requested block in wire encoding.
///
/// Apis without a block argument yield `NOT_APPLICABLE`. A parser that fails
/// to locate its argument falls back to the directive's default value when
/// one is declared; a located but unparsable value is an error.
pub fn extract_requested_block(
    block_parsing: &BlockParser,
    params: Option<&Value>,
) -> Result<i64, ParserError> {
    match block_parsing.parser_func {
        ParserFunc::Empty => Ok(NOT_APPLICABLE),
        ParserFunc::Default => parse_default(block_parsing),
        ParserFunc::ParseByArg => match locate_by_arg(block_parsing, params) {
            Some(value) => parse_value(&value),
            None => parse_default(block_parsing),
        },
        ParserFunc::ParseCanonical => match locate_canonical(block_parsing, params) {
            Some(value) => parse_value(&value),
            None => parse_default(block_parsing),
        },
        ParserFunc::ParseDictionary => match locate_dictionary(block_parsing, params) {
            Some(value) => parse_value(&value),
            None => parse_default(block_parsing),
        },
    }
}

fn parse_default(block_parsing: &BlockParser) -> Result<i64, ParserError> {
    if block_parsing.default_value.is_empty() {
        return Ok(NOT_APPLICABLE);
    }
    Ok(block::parse_block_parameter(&block_parsing.default_value)?)
}

fn parse_value(value: &Value) -> Result<i64, ParserError> {
    match value {
        Value::String(s) => Ok(block::parse_block_parameter(s)?),
        Value::Number(n) => n
            .as_i64()
            .filter(|v| *v >= 0)
            .ok_or_else(|| ParserError::MalformedRequest(format!("invalid block number {n}"))),
        other => Err(ParserError::MalformedRequest(format!("unexpected block argument {other}"))),
    }
}

fn arg_index(block_parsing: &BlockParser) -> Option<usize> {
    block_parsing.parser_arg.first().and_then(|arg| arg.parse::<usize>().ok())
}

fn locate_by_arg(block_parsing: &BlockParser, params: Option<&Value>) -> Option<Value> {
    let index = arg_index(block_parsing)?;
    match params? {
        Value::Array(values) => values.get(index).cloned(),
        // A bare scalar parameter acts as a single-element list.
        scalar if index == 0 => Some(scalar.clone()),
        _ => None,
    }
}

fn locate_canonical(block_parsing: &BlockParser, params: Option<&Value>) -> Option<Value> {
    let params = params?;
    let nested_keys = block_parsing.parser_arg.get(1..).unwrap_or(&[]);
    let (start, keys) = match params {
        Value::Array(values) => {
            let index = arg_index(block_parsing)?;
            (values.get(index)?, nested_keys)
        }
        Value::Object(_) => (params, nested_keys),
        _ => return None,
    };
    let mut current = start;
    for key in keys {
        current = current.get(key)?;
    }
    Some(current.clone())
}

fn locate_dictionary(block_parsing: &BlockParser, params: Option<&Value>) -> Option<Value> {
    let key = block_parsing.parser_arg.first()?;
    match params? {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(values) => {
            let separator = block_parsing.parser_arg.get(1).map(String::as_str).unwrap_or("=");
            values.iter().find_map(|entry| {
                let text = entry.as_str()?;
                let (name, value) = text.split_once(separator)?;
                (name == key).then(|| Value::String(value.to_string()))
            })
        }
        _ => None,
    }
}

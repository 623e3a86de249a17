use crate::models::InvoiceExtraction;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in model reply")]
    NoJsonFound,

    #[error("model reply contains no well-formed JSON object: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("JSON object does not match the invoice envelope: {0}")]
    Schema(#[source] serde_json::Error),
}

/// 从模型的自由文本回复中取出第一个完整的 JSON 对象并按信封结构解析
///
/// 依次尝试每个 `{`，做括号配平 (跳过字符串内的括号与转义)，
/// 第一个符合信封结构的候选即为载荷；都不符合时报告第一个结构错误。
pub fn parse_validator_reply(reply: &str) -> Result<InvoiceExtraction, ParseError> {
    let mut first_error = None;
    let mut schema_error = None;

    for (start, _) in reply.match_indices('{') {
        let Some(end) = balanced_end(&reply[start..]) else {
            continue;
        };
        let candidate = &reply[start..start + end];
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value) => match serde_json::from_value(value) {
                Ok(extraction) => return Ok(extraction),
                Err(e) => {
                    schema_error.get_or_insert(e);
                }
            },
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = schema_error {
        return Err(ParseError::Schema(e));
    }
    match (first_error, reply.find('{')) {
        (Some(e), _) => Err(ParseError::MalformedJson(e)),
        // 有 `{` 但始终没有配平
        (None, Some(start)) => Err(ParseError::MalformedJson(unbalanced(&reply[start..]))),
        (None, None) => Err(ParseError::NoJsonFound),
    }
}

fn unbalanced(tail: &str) -> serde_json::Error {
    match serde_json::from_str::<serde_json::Value>(tail) {
        Err(e) => e,
        Ok(_) => <serde_json::Error as serde::de::Error>::custom("unbalanced braces"),
    }
}

/// 返回与开头 `{` 配对的 `}` 之后的字节偏移
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

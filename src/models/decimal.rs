use bigdecimal::BigDecimal;
use serde::de::{self, Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

/// 宽松解析金额/数量: 接受 JSON 数字、数字字符串 (允许 `$` 前缀和千分位逗号) 或 null
///
/// JSON 数字由 serde_json 以 f64 保存，转换时取其最短十进制表示，
/// 因此 `0.1` 得到精确的 0.1，但超过约 15 位有效数字的金额会丢精度；
/// 这类金额需以字符串形式给出，字符串按原文解析。
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string())
            .map(Some)
            .map_err(de::Error::custom),
        Some(Value::String(s)) => {
            let cleaned: String = s
                .trim()
                .trim_start_matches('$')
                .chars()
                .filter(|c| *c != ',')
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            BigDecimal::from_str(&cleaned)
                .map(Some)
                .map_err(de::Error::custom)
        }
        Some(other) => Err(de::Error::custom(format!(
            "expected a number, found {}",
            other
        ))),
    }
}

/// 将 null 视为默认值
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

use crate::llm::Usage;
use crate::models::NewTokenUsage;
use uuid::Uuid;

/// 每 1K token 的价格 (USD)
const INPUT_PRICE_PER_1K: f64 = 0.03;
const OUTPUT_PRICE_PER_1K: f64 = 0.06;

const AVERAGE_TOKENS_PER_WORD: f64 = 1.3;

/// 无厂商用量时按词数估算
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    (words * AVERAGE_TOKENS_PER_WORD).ceil() as u32
}

pub fn estimate_cost(input_tokens: u32, output_tokens: u32) -> f64 {
    input_tokens as f64 / 1000.0 * INPUT_PRICE_PER_1K
        + output_tokens as f64 / 1000.0 * OUTPUT_PRICE_PER_1K
}

/// 生成一次校验调用的用量记录
pub fn usage_record(
    invoice_id: Uuid,
    reported: Option<Usage>,
    prompt: &str,
    reply: &str,
) -> NewTokenUsage {
    let usage = reported.unwrap_or_else(|| Usage {
        prompt_tokens: estimate_tokens(prompt),
        completion_tokens: estimate_tokens(reply),
    });

    NewTokenUsage {
        invoice_id,
        input_tokens: usage.prompt_tokens as i64,
        output_tokens: usage.completion_tokens as i64,
        total_tokens: usage.total_tokens() as i64,
        estimated_cost: estimate_cost(usage.prompt_tokens, usage.completion_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_uses_per_thousand_prices() {
        let cost = estimate_cost(1000, 500);
        assert!((cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn reported_usage_wins_over_estimate() {
        let id = Uuid::new_v4();
        let record = usage_record(
            id,
            Some(Usage { prompt_tokens: 2000, completion_tokens: 1000 }),
            "ignored",
            "ignored",
        );
        assert_eq!(record.invoice_id, id);
        assert_eq!(record.total_tokens, 3000);
        assert!((record.estimated_cost - 0.12).abs() < 1e-9);
    }

    #[test]
    fn missing_usage_is_estimated_from_words() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 4);
        let record = usage_record(Uuid::new_v4(), None, "a b c d e f g h i j", "x");
        assert_eq!(record.input_tokens, 13);
        assert_eq!(record.output_tokens, 2);
    }
}

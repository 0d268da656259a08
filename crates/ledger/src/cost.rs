//! The deterministic SPU cost function of each metered operation.
//! Each operation's cost is computed in exactly one place.

/// Dollar value of one SPU, used to convert LLM token cost into SPUs.
pub const PRICE_PER_SPU_USD: f64 = 0.001;

/// SPUs charged per telemetry record (trace, metric, or log).
pub const TELEMETRY_RECORD_SPUS: f64 = 1.0;

/// SPUs charged per Claude log or hook batch.
pub const CLAUDE_BATCH_SPUS: f64 = 0.1;

/// OCR charges one SPU per processed page.
pub fn ocr_spus(n_pages: u32) -> f64 {
    n_pages as f64
}

/// LLM charges the dollar token cost converted to SPUs, with a one-SPU floor.
pub fn llm_spus(
    input_tokens: u64,
    output_tokens: u64,
    input_cost_per_token: f64,
    output_cost_per_token: f64,
) -> f64 {
    let usd =
        input_tokens as f64 * input_cost_per_token + output_tokens as f64 * output_cost_per_token;
    (usd / PRICE_PER_SPU_USD).ceil().max(1.0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ocr_cost_is_per_page() {
        assert_eq!(ocr_spus(1), 1.0);
        assert_eq!(ocr_spus(17), 17.0);
    }

    #[test]
    fn test_llm_cost_floors_at_one_spu() {
        // Tiny request: well under one SPU of token cost.
        assert_eq!(llm_spus(10, 10, 1e-7, 4e-7), 1.0);
        // 1M input tokens at $2.50/M plus 10k output at $10/M = $2.60 = 2600 SPUs.
        assert_eq!(llm_spus(1_000_000, 10_000, 2.5e-6, 1e-5), 2600.0);
    }

    #[test]
    fn test_llm_cost_rounds_up() {
        // $0.0011 of tokens is 1.1 SPUs, charged as 2.
        assert_eq!(llm_spus(1_100, 0, 1e-6, 0.0), 2.0);
    }
}

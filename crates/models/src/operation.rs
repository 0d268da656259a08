/// Operation is the closed set of metered activities recognized by the
/// credit ledger and usage reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Llm,
    Ocr,
    ClaudeLog,
    ClaudeHook,
    TelemetryTrace,
    TelemetryMetric,
    TelemetryLog,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Llm => "llm",
            Operation::Ocr => "ocr",
            Operation::ClaudeLog => "claude_log",
            Operation::ClaudeHook => "claude_hook",
            Operation::TelemetryTrace => "telemetry_trace",
            Operation::TelemetryMetric => "telemetry_metric",
            Operation::TelemetryLog => "telemetry_log",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown operation {0:?}")]
pub struct UnknownOperation(pub String);

impl std::str::FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "llm" => Operation::Llm,
            "ocr" => Operation::Ocr,
            "claude_log" => Operation::ClaudeLog,
            "claude_hook" => Operation::ClaudeHook,
            "telemetry_trace" => Operation::TelemetryTrace,
            "telemetry_metric" => Operation::TelemetryMetric,
            "telemetry_log" => Operation::TelemetryLog,
            other => return Err(UnknownOperation(other.to_string())),
        })
    }
}

#[cfg(test)]
mod test {
    use super::Operation;

    #[test]
    fn test_operation_round_trip() {
        for op in [
            Operation::Llm,
            Operation::Ocr,
            Operation::ClaudeLog,
            Operation::ClaudeHook,
            Operation::TelemetryTrace,
            Operation::TelemetryMetric,
            Operation::TelemetryLog,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            assert_eq!(
                serde_json::to_value(op).unwrap(),
                serde_json::Value::String(op.as_str().to_string())
            );
        }
    }
}

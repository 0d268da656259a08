/// Severity is the coarse log level stored with telemetry log records,
/// derived from the OTLP severity_number when ingesting over gRPC.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Map an OTLP severity_number onto a Severity.
    /// Numbers outside the defined 1..=24 range fall back to INFO.
    pub fn from_severity_number(n: i32) -> Severity {
        match n {
            1..=4 => Severity::Trace,
            5..=8 => Severity::Debug,
            9..=12 => Severity::Info,
            13..=16 => Severity::Warn,
            17..=20 => Severity::Error,
            21..=24 => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::Severity;

    #[test]
    fn test_severity_number_bands() {
        assert_eq!(Severity::from_severity_number(1), Severity::Trace);
        assert_eq!(Severity::from_severity_number(4), Severity::Trace);
        assert_eq!(Severity::from_severity_number(5), Severity::Debug);
        assert_eq!(Severity::from_severity_number(9), Severity::Info);
        assert_eq!(Severity::from_severity_number(13), Severity::Warn);
        assert_eq!(Severity::from_severity_number(17), Severity::Error);
        assert_eq!(Severity::from_severity_number(21), Severity::Fatal);
        assert_eq!(Severity::from_severity_number(24), Severity::Fatal);

        // Unspecified and out-of-range default to INFO.
        assert_eq!(Severity::from_severity_number(0), Severity::Info);
        assert_eq!(Severity::from_severity_number(25), Severity::Info);
        assert_eq!(Severity::from_severity_number(-3), Severity::Info);
    }
}

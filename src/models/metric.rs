use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric category, one per detection domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Generic,
    Evasion,
    Payload,
    Exfiltration,
    Crypto,
    Account,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Generic,
        Self::Evasion,
        Self::Payload,
        Self::Exfiltration,
        Self::Crypto,
        Self::Account,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Evasion => "evasion",
            Self::Payload => "payload",
            Self::Exfiltration => "exfiltration",
            Self::Crypto => "crypto",
            Self::Account => "account",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every numeric per-version metric that is averaged and compared.
///
/// This enum is the accessor key into `VersionMetrics`, `AggregateVersionMetrics`
/// and `Flags`, so rule paths resolve through a `match` instead of string lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumericMetric {
    TotalFiles,
    TotalSizeBytes,
    TotalSizeChars,
    BlankSpaceRatio,
    ShannonEntropy,
    LongestLineLength,
    ObfuscationPatterns,
    PlatformDetections,
    TimingDelays,
    EvalFunction,
    ShellCommands,
    ScanFunctions,
    SensitiveElements,
    DataTransmission,
    CryptoAddresses,
    CryptocurrencyNames,
    WalletDetection,
    ReplacedAddresses,
    HookProvider,
    Maintainers,
}

impl NumericMetric {
    pub const ALL: [NumericMetric; 20] = [
        Self::TotalFiles,
        Self::TotalSizeBytes,
        Self::TotalSizeChars,
        Self::BlankSpaceRatio,
        Self::ShannonEntropy,
        Self::LongestLineLength,
        Self::ObfuscationPatterns,
        Self::PlatformDetections,
        Self::TimingDelays,
        Self::EvalFunction,
        Self::ShellCommands,
        Self::ScanFunctions,
        Self::SensitiveElements,
        Self::DataTransmission,
        Self::CryptoAddresses,
        Self::CryptocurrencyNames,
        Self::WalletDetection,
        Self::ReplacedAddresses,
        Self::HookProvider,
        Self::Maintainers,
    ];

    pub fn category(self) -> Category {
        match self {
            Self::TotalFiles
            | Self::TotalSizeBytes
            | Self::TotalSizeChars
            | Self::BlankSpaceRatio
            | Self::ShannonEntropy
            | Self::LongestLineLength => Category::Generic,
            Self::ObfuscationPatterns | Self::PlatformDetections => Category::Evasion,
            Self::TimingDelays | Self::EvalFunction | Self::ShellCommands => Category::Payload,
            Self::ScanFunctions | Self::SensitiveElements | Self::DataTransmission => {
                Category::Exfiltration
            }
            Self::CryptoAddresses
            | Self::CryptocurrencyNames
            | Self::WalletDetection
            | Self::ReplacedAddresses
            | Self::HookProvider => Category::Crypto,
            Self::Maintainers => Category::Account,
        }
    }

    /// Field name within its category.
    pub fn field(self) -> &'static str {
        match self {
            Self::TotalFiles => "total_files",
            Self::TotalSizeBytes => "total_size_bytes",
            Self::TotalSizeChars => "total_size_chars",
            Self::BlankSpaceRatio => "blank_space_ratio",
            Self::ShannonEntropy => "shannon_entropy",
            Self::LongestLineLength => "longest_line_length",
            Self::ObfuscationPatterns => "obfuscation_patterns",
            Self::PlatformDetections => "platform_detections",
            Self::TimingDelays => "timing_delays",
            Self::EvalFunction => "eval_function",
            Self::ShellCommands => "shell_commands",
            Self::ScanFunctions => "scan_functions",
            Self::SensitiveElements => "sensitive_elements",
            Self::DataTransmission => "data_transmission",
            Self::CryptoAddresses => "crypto_addresses",
            Self::CryptocurrencyNames => "cryptocurrency_names",
            Self::WalletDetection => "wallet_detection",
            Self::ReplacedAddresses => "replaced_addresses",
            Self::HookProvider => "hook_provider",
            Self::Maintainers => "maintainers",
        }
    }

    /// Dotted key, e.g. `payload.eval_function`.
    pub fn key(self) -> String {
        format!("{}.{}", self.category(), self.field())
    }

    pub fn from_key(category: &str, field: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.category().as_str() == category && m.field() == field)
    }
}

impl fmt::Display for NumericMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category(), self.field())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_unique() {
        let keys: HashSet<String> = NumericMetric::ALL.iter().map(|m| m.key()).collect();
        assert_eq!(keys.len(), NumericMetric::ALL.len());
    }

    #[test]
    fn test_from_key_roundtrips_every_metric() {
        for m in NumericMetric::ALL {
            assert_eq!(NumericMetric::from_key(m.category().as_str(), m.field()), Some(m));
        }
        assert_eq!(NumericMetric::from_key("payload", "nope"), None);
    }

    #[test]
    fn test_every_category_has_a_metric() {
        for c in Category::ALL {
            assert!(NumericMetric::ALL.iter().any(|m| m.category() == c), "{c}");
        }
    }
}

use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::account::AccountData;
use crate::models::file_metrics::CodeType;
use crate::models::metric::NumericMetric;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenericVersionMetrics {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub total_size_chars: u64,
    /// Char-weighted over non-derived files
    pub weighted_blank_space_ratio: f64,
    /// Char-weighted over non-derived files
    pub weighted_shannon_entropy: f64,
    pub longest_line_length: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvasionVersionMetrics {
    pub code_types: BTreeSet<CodeType>,
    pub obfuscation_patterns_count: u64,
    pub platform_detections_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayloadVersionMetrics {
    pub timing_delays_count: u64,
    pub eval_count: u64,
    pub shell_commands_count: u64,
    pub install_scripts: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExfiltrationVersionMetrics {
    pub scan_functions_count: u64,
    pub sensitive_elements_count: u64,
    pub data_transmission_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CryptoVersionMetrics {
    pub crypto_addresses_count: u64,
    pub crypto_addresses: BTreeSet<String>,
    pub cryptocurrency_names_count: u64,
    pub wallet_detection_count: u64,
    pub replaced_addresses_count: u64,
    pub hook_provider_count: u64,
}

/// Snapshot of one released version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionMetrics {
    pub package: String,
    pub version: String,
    pub generic: GenericVersionMetrics,
    pub evasion: EvasionVersionMetrics,
    pub payload: PayloadVersionMetrics,
    pub exfiltration: ExfiltrationVersionMetrics,
    pub crypto: CryptoVersionMetrics,
    pub account: AccountData,
}

impl VersionMetrics {
    pub fn new(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            generic: GenericVersionMetrics::default(),
            evasion: EvasionVersionMetrics::default(),
            payload: PayloadVersionMetrics::default(),
            exfiltration: ExfiltrationVersionMetrics::default(),
            crypto: CryptoVersionMetrics::default(),
            account: AccountData::empty(),
        }
    }

    /// Numeric value of `metric` in this snapshot.
    pub fn value(&self, metric: NumericMetric) -> f64 {
        match metric {
            NumericMetric::TotalFiles => self.generic.total_files as f64,
            NumericMetric::TotalSizeBytes => self.generic.total_size_bytes as f64,
            NumericMetric::TotalSizeChars => self.generic.total_size_chars as f64,
            NumericMetric::BlankSpaceRatio => self.generic.weighted_blank_space_ratio,
            NumericMetric::ShannonEntropy => self.generic.weighted_shannon_entropy,
            NumericMetric::LongestLineLength => self.generic.longest_line_length as f64,
            NumericMetric::ObfuscationPatterns => self.evasion.obfuscation_patterns_count as f64,
            NumericMetric::PlatformDetections => self.evasion.platform_detections_count as f64,
            NumericMetric::TimingDelays => self.payload.timing_delays_count as f64,
            NumericMetric::EvalFunction => self.payload.eval_count as f64,
            NumericMetric::ShellCommands => self.payload.shell_commands_count as f64,
            NumericMetric::ScanFunctions => self.exfiltration.scan_functions_count as f64,
            NumericMetric::SensitiveElements => self.exfiltration.sensitive_elements_count as f64,
            NumericMetric::DataTransmission => self.exfiltration.data_transmission_count as f64,
            NumericMetric::CryptoAddresses => self.crypto.crypto_addresses_count as f64,
            NumericMetric::CryptocurrencyNames => self.crypto.cryptocurrency_names_count as f64,
            NumericMetric::WalletDetection => self.crypto.wallet_detection_count as f64,
            NumericMetric::ReplacedAddresses => self.crypto.replaced_addresses_count as f64,
            NumericMetric::HookProvider => self.crypto.hook_provider_count as f64,
            NumericMetric::Maintainers => self.account.maintainer_count as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_reads_matching_field() {
        let mut v = VersionMetrics::new("pkg", "1.0.0");
        v.payload.eval_count = 25;
        v.generic.weighted_shannon_entropy = 4.5;
        v.account.maintainer_count = 2;

        assert_eq!(v.value(NumericMetric::EvalFunction), 25.0);
        assert_eq!(v.value(NumericMetric::ShannonEntropy), 4.5);
        assert_eq!(v.value(NumericMetric::Maintainers), 2.0);
        assert_eq!(v.value(NumericMetric::ShellCommands), 0.0);
    }
}

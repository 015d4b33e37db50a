use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::file_metrics::CodeType;
use crate::models::metric::NumericMetric;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenericAverages {
    pub avg_total_files: f64,
    pub avg_total_size_bytes: f64,
    pub avg_total_size_chars: f64,
    pub avg_weighted_blank_space_ratio: f64,
    pub avg_weighted_shannon_entropy: f64,
    pub avg_longest_line_length: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvasionAverages {
    pub code_types: BTreeSet<CodeType>,
    pub avg_obfuscation_patterns_count: f64,
    pub avg_platform_detections_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayloadAverages {
    pub avg_timing_delays_count: f64,
    pub avg_eval_count: f64,
    pub avg_shell_commands_count: f64,
    pub install_scripts: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExfiltrationAverages {
    pub avg_scan_functions_count: f64,
    pub avg_sensitive_elements_count: f64,
    pub avg_data_transmission_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CryptoAverages {
    pub avg_crypto_addresses_count: f64,
    pub crypto_addresses: BTreeSet<String>,
    pub avg_cryptocurrency_names_count: f64,
    pub avg_wallet_detection_count: f64,
    pub avg_replaced_addresses_count: f64,
    pub avg_hook_provider_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountAverages {
    pub avg_maintainer_count: f64,
}

/// Running summary of every version seen before the current one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateVersionMetrics {
    pub package: String,
    /// Human-readable version range
    pub label: String,
    #[serde(skip)]
    pub(crate) count: u64,
    #[serde(skip)]
    pub(crate) last_version: Option<String>,
    pub generic: GenericAverages,
    pub evasion: EvasionAverages,
    pub payload: PayloadAverages,
    pub exfiltration: ExfiltrationAverages,
    pub crypto: CryptoAverages,
    pub account: AccountAverages,
}

impl AggregateVersionMetrics {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            label: String::new(),
            count: 0,
            last_version: None,
            generic: GenericAverages::default(),
            evasion: EvasionAverages::default(),
            payload: PayloadAverages::default(),
            exfiltration: ExfiltrationAverages::default(),
            crypto: CryptoAverages::default(),
            account: AccountAverages::default(),
        }
    }

    /// Number of versions folded in so far.
    pub fn versions_seen(&self) -> u64 {
        self.count
    }

    pub fn last_version(&self) -> Option<&str> {
        self.last_version.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn average(&self, metric: NumericMetric) -> f64 {
        match metric {
            NumericMetric::TotalFiles => self.generic.avg_total_files,
            NumericMetric::TotalSizeBytes => self.generic.avg_total_size_bytes,
            NumericMetric::TotalSizeChars => self.generic.avg_total_size_chars,
            NumericMetric::BlankSpaceRatio => self.generic.avg_weighted_blank_space_ratio,
            NumericMetric::ShannonEntropy => self.generic.avg_weighted_shannon_entropy,
            NumericMetric::LongestLineLength => self.generic.avg_longest_line_length,
            NumericMetric::ObfuscationPatterns => self.evasion.avg_obfuscation_patterns_count,
            NumericMetric::PlatformDetections => self.evasion.avg_platform_detections_count,
            NumericMetric::TimingDelays => self.payload.avg_timing_delays_count,
            NumericMetric::EvalFunction => self.payload.avg_eval_count,
            NumericMetric::ShellCommands => self.payload.avg_shell_commands_count,
            NumericMetric::ScanFunctions => self.exfiltration.avg_scan_functions_count,
            NumericMetric::SensitiveElements => self.exfiltration.avg_sensitive_elements_count,
            NumericMetric::DataTransmission => self.exfiltration.avg_data_transmission_count,
            NumericMetric::CryptoAddresses => self.crypto.avg_crypto_addresses_count,
            NumericMetric::CryptocurrencyNames => self.crypto.avg_cryptocurrency_names_count,
            NumericMetric::WalletDetection => self.crypto.avg_wallet_detection_count,
            NumericMetric::ReplacedAddresses => self.crypto.avg_replaced_addresses_count,
            NumericMetric::HookProvider => self.crypto.avg_hook_provider_count,
            NumericMetric::Maintainers => self.account.avg_maintainer_count,
        }
    }

    pub(crate) fn average_mut(&mut self, metric: NumericMetric) -> &mut f64 {
        match metric {
            NumericMetric::TotalFiles => &mut self.generic.avg_total_files,
            NumericMetric::TotalSizeBytes => &mut self.generic.avg_total_size_bytes,
            NumericMetric::TotalSizeChars => &mut self.generic.avg_total_size_chars,
            NumericMetric::BlankSpaceRatio => &mut self.generic.avg_weighted_blank_space_ratio,
            NumericMetric::ShannonEntropy => &mut self.generic.avg_weighted_shannon_entropy,
            NumericMetric::LongestLineLength => &mut self.generic.avg_longest_line_length,
            NumericMetric::ObfuscationPatterns => &mut self.evasion.avg_obfuscation_patterns_count,
            NumericMetric::PlatformDetections => &mut self.evasion.avg_platform_detections_count,
            NumericMetric::TimingDelays => &mut self.payload.avg_timing_delays_count,
            NumericMetric::EvalFunction => &mut self.payload.avg_eval_count,
            NumericMetric::ShellCommands => &mut self.payload.avg_shell_commands_count,
            NumericMetric::ScanFunctions => &mut self.exfiltration.avg_scan_functions_count,
            NumericMetric::SensitiveElements => &mut self.exfiltration.avg_sensitive_elements_count,
            NumericMetric::DataTransmission => &mut self.exfiltration.avg_data_transmission_count,
            NumericMetric::CryptoAddresses => &mut self.crypto.avg_crypto_addresses_count,
            NumericMetric::CryptocurrencyNames => &mut self.crypto.avg_cryptocurrency_names_count,
            NumericMetric::WalletDetection => &mut self.crypto.avg_wallet_detection_count,
            NumericMetric::ReplacedAddresses => &mut self.crypto.avg_replaced_addresses_count,
            NumericMetric::HookProvider => &mut self.crypto.avg_hook_provider_count,
            NumericMetric::Maintainers => &mut self.account.avg_maintainer_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_mut_and_average_agree() {
        let mut agg = AggregateVersionMetrics::new("pkg");
        for (i, m) in NumericMetric::ALL.into_iter().enumerate() {
            *agg.average_mut(m) = i as f64 + 0.5;
        }
        for (i, m) in NumericMetric::ALL.into_iter().enumerate() {
            assert_eq!(agg.average(m), i as f64 + 0.5, "{m}");
        }
    }

    #[test]
    fn test_new_is_empty() {
        let agg = AggregateVersionMetrics::new("pkg");
        assert!(agg.is_empty());
        assert_eq!(agg.versions_seen(), 0);
        assert!(agg.last_version().is_none());
        assert!(agg.label.is_empty());
    }
}

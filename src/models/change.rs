use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::metric::{Category, NumericMetric};

/// Delta between a current value and a baseline.
///
/// At most one side is populated. Both empty means there was no baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeMetric {
    pub absolute: Option<f64>,
    pub percentage: Option<f64>,
}

impl ChangeMetric {
    pub const NO_BASELINE: ChangeMetric = ChangeMetric {
        absolute: None,
        percentage: None,
    };

    pub fn introduced(delta: f64) -> Self {
        Self {
            absolute: Some(delta),
            percentage: None,
        }
    }

    pub fn relative(percentage: f64) -> Self {
        Self {
            absolute: None,
            percentage: Some(percentage),
        }
    }

    pub fn is_no_baseline(&self) -> bool {
        self.absolute.is_none() && self.percentage.is_none()
    }
}

/// Which baseline a change was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Baseline {
    /// The immediately preceding version
    Previous,
    /// The rolling aggregate of all earlier versions
    History,
}

impl Baseline {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Previous => "previous",
            Self::History => "history",
        }
    }
}

/// A metric compared against both baselines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricChange {
    pub previous: ChangeMetric,
    pub history: ChangeMetric,
}

impl MetricChange {
    pub const NO_BASELINE: MetricChange = MetricChange {
        previous: ChangeMetric::NO_BASELINE,
        history: ChangeMetric::NO_BASELINE,
    };

    pub fn get(&self, baseline: Baseline) -> ChangeMetric {
        match baseline {
            Baseline::Previous => self.previous,
            Baseline::History => self.history,
        }
    }
}

/// Boolean change signals. `None` inside `Flags` means no baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    ObfuscatedCodeIntroduced,
    MinifiedCodeIntroduced,
    InstallScriptsIntroduced,
    InstallScriptsChanged,
    CryptoAddressesChanged,
    PackageReactivation,
    CommitMismatch,
}

impl Signal {
    pub const ALL: [Signal; 7] = [
        Self::ObfuscatedCodeIntroduced,
        Self::MinifiedCodeIntroduced,
        Self::InstallScriptsIntroduced,
        Self::InstallScriptsChanged,
        Self::CryptoAddressesChanged,
        Self::PackageReactivation,
        Self::CommitMismatch,
    ];

    pub fn category(self) -> Category {
        match self {
            Self::ObfuscatedCodeIntroduced | Self::MinifiedCodeIntroduced => Category::Evasion,
            Self::InstallScriptsIntroduced | Self::InstallScriptsChanged => Category::Payload,
            Self::CryptoAddressesChanged => Category::Crypto,
            Self::PackageReactivation | Self::CommitMismatch => Category::Account,
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            Self::ObfuscatedCodeIntroduced => "obfuscated_code_introduced",
            Self::MinifiedCodeIntroduced => "minified_code_introduced",
            Self::InstallScriptsIntroduced => "install_scripts_introduced",
            Self::InstallScriptsChanged => "install_scripts_changed",
            Self::CryptoAddressesChanged => "crypto_addresses_changed",
            Self::PackageReactivation => "package_reactivation",
            Self::CommitMismatch => "commit_mismatch",
        }
    }
}

/// Typed path into a `Flags` record.
///
/// Spelled `category.field.baseline` for metric changes and
/// `category.field` for boolean signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FlagPath {
    Change(NumericMetric, Baseline),
    Signal(Signal),
}

impl FlagPath {
    pub fn category(self) -> Category {
        match self {
            Self::Change(m, _) => m.category(),
            Self::Signal(s) => s.category(),
        }
    }
}

impl fmt::Display for FlagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Change(m, b) => write!(f, "{}.{}.{}", m.category(), m.field(), b.as_str()),
            Self::Signal(s) => write!(f, "{}.{}", s.category(), s.field()),
        }
    }
}

impl FromStr for FlagPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [category, field] => Signal::ALL
                .into_iter()
                .find(|sig| sig.category().as_str() == *category && sig.field() == *field)
                .map(FlagPath::Signal)
                .ok_or_else(|| format!("Unknown signal path: {s}")),
            [category, field, baseline] => {
                let metric = NumericMetric::from_key(category, field)
                    .ok_or_else(|| format!("Unknown metric path: {s}"))?;
                let baseline = match *baseline {
                    "previous" => Baseline::Previous,
                    "history" => Baseline::History,
                    other => return Err(format!("Unknown baseline '{other}' in path: {s}")),
                };
                Ok(FlagPath::Change(metric, baseline))
            }
            _ => Err(format!("Malformed metric path: {s}")),
        }
    }
}

impl TryFrom<String> for FlagPath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FlagPath> for String {
    fn from(path: FlagPath) -> Self {
        path.to_string()
    }
}

/// Value found at a `FlagPath`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedValue {
    Boolean(Option<bool>),
    Change(ChangeMetric),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenericChanges {
    pub total_files: MetricChange,
    pub total_size_bytes: MetricChange,
    pub total_size_chars: MetricChange,
    pub blank_space_ratio: MetricChange,
    pub shannon_entropy: MetricChange,
    pub longest_line_length: MetricChange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvasionChanges {
    pub obfuscated_code_introduced: Option<bool>,
    pub minified_code_introduced: Option<bool>,
    pub obfuscation_patterns: MetricChange,
    pub platform_detections: MetricChange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayloadChanges {
    pub timing_delays: MetricChange,
    pub eval_function: MetricChange,
    pub shell_commands: MetricChange,
    pub install_scripts_introduced: Option<bool>,
    pub install_scripts_changed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExfiltrationChanges {
    pub scan_functions: MetricChange,
    pub sensitive_elements: MetricChange,
    pub data_transmission: MetricChange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CryptoChanges {
    pub crypto_addresses: MetricChange,
    pub crypto_addresses_changed: Option<bool>,
    pub cryptocurrency_names: MetricChange,
    pub wallet_detection: MetricChange,
    pub replaced_addresses: MetricChange,
    pub hook_provider: MetricChange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountChanges {
    pub maintainers: MetricChange,
    pub package_reactivation: Option<bool>,
    pub commit_mismatch: Option<bool>,
}

/// Change signals for one version transition.
///
/// Triggered rules are derived from this record, not stored in it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flags {
    pub package: String,
    pub version: String,
    /// Version compared against, `None` for the first version
    pub previous_version: Option<String>,
    pub generic: GenericChanges,
    pub evasion: EvasionChanges,
    pub payload: PayloadChanges,
    pub exfiltration: ExfiltrationChanges,
    pub crypto: CryptoChanges,
    pub account: AccountChanges,
}

impl Flags {
    /// Every comparative field in the "no baseline" state.
    pub fn no_baseline(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            previous_version: None,
            generic: GenericChanges::default(),
            evasion: EvasionChanges::default(),
            payload: PayloadChanges::default(),
            exfiltration: ExfiltrationChanges::default(),
            crypto: CryptoChanges::default(),
            account: AccountChanges::default(),
        }
    }

    pub fn change(&self, metric: NumericMetric) -> &MetricChange {
        match metric {
            NumericMetric::TotalFiles => &self.generic.total_files,
            NumericMetric::TotalSizeBytes => &self.generic.total_size_bytes,
            NumericMetric::TotalSizeChars => &self.generic.total_size_chars,
            NumericMetric::BlankSpaceRatio => &self.generic.blank_space_ratio,
            NumericMetric::ShannonEntropy => &self.generic.shannon_entropy,
            NumericMetric::LongestLineLength => &self.generic.longest_line_length,
            NumericMetric::ObfuscationPatterns => &self.evasion.obfuscation_patterns,
            NumericMetric::PlatformDetections => &self.evasion.platform_detections,
            NumericMetric::TimingDelays => &self.payload.timing_delays,
            NumericMetric::EvalFunction => &self.payload.eval_function,
            NumericMetric::ShellCommands => &self.payload.shell_commands,
            NumericMetric::ScanFunctions => &self.exfiltration.scan_functions,
            NumericMetric::SensitiveElements => &self.exfiltration.sensitive_elements,
            NumericMetric::DataTransmission => &self.exfiltration.data_transmission,
            NumericMetric::CryptoAddresses => &self.crypto.crypto_addresses,
            NumericMetric::CryptocurrencyNames => &self.crypto.cryptocurrency_names,
            NumericMetric::WalletDetection => &self.crypto.wallet_detection,
            NumericMetric::ReplacedAddresses => &self.crypto.replaced_addresses,
            NumericMetric::HookProvider => &self.crypto.hook_provider,
            NumericMetric::Maintainers => &self.account.maintainers,
        }
    }

    pub(crate) fn change_mut(&mut self, metric: NumericMetric) -> &mut MetricChange {
        match metric {
            NumericMetric::TotalFiles => &mut self.generic.total_files,
            NumericMetric::TotalSizeBytes => &mut self.generic.total_size_bytes,
            NumericMetric::TotalSizeChars => &mut self.generic.total_size_chars,
            NumericMetric::BlankSpaceRatio => &mut self.generic.blank_space_ratio,
            NumericMetric::ShannonEntropy => &mut self.generic.shannon_entropy,
            NumericMetric::LongestLineLength => &mut self.generic.longest_line_length,
            NumericMetric::ObfuscationPatterns => &mut self.evasion.obfuscation_patterns,
            NumericMetric::PlatformDetections => &mut self.evasion.platform_detections,
            NumericMetric::TimingDelays => &mut self.payload.timing_delays,
            NumericMetric::EvalFunction => &mut self.payload.eval_function,
            NumericMetric::ShellCommands => &mut self.payload.shell_commands,
            NumericMetric::ScanFunctions => &mut self.exfiltration.scan_functions,
            NumericMetric::SensitiveElements => &mut self.exfiltration.sensitive_elements,
            NumericMetric::DataTransmission => &mut self.exfiltration.data_transmission,
            NumericMetric::CryptoAddresses => &mut self.crypto.crypto_addresses,
            NumericMetric::CryptocurrencyNames => &mut self.crypto.cryptocurrency_names,
            NumericMetric::WalletDetection => &mut self.crypto.wallet_detection,
            NumericMetric::ReplacedAddresses => &mut self.crypto.replaced_addresses,
            NumericMetric::HookProvider => &mut self.crypto.hook_provider,
            NumericMetric::Maintainers => &mut self.account.maintainers,
        }
    }

    pub fn signal(&self, signal: Signal) -> Option<bool> {
        match signal {
            Signal::ObfuscatedCodeIntroduced => self.evasion.obfuscated_code_introduced,
            Signal::MinifiedCodeIntroduced => self.evasion.minified_code_introduced,
            Signal::InstallScriptsIntroduced => self.payload.install_scripts_introduced,
            Signal::InstallScriptsChanged => self.payload.install_scripts_changed,
            Signal::CryptoAddressesChanged => self.crypto.crypto_addresses_changed,
            Signal::PackageReactivation => self.account.package_reactivation,
            Signal::CommitMismatch => self.account.commit_mismatch,
        }
    }

    pub(crate) fn signal_mut(&mut self, signal: Signal) -> &mut Option<bool> {
        match signal {
            Signal::ObfuscatedCodeIntroduced => &mut self.evasion.obfuscated_code_introduced,
            Signal::MinifiedCodeIntroduced => &mut self.evasion.minified_code_introduced,
            Signal::InstallScriptsIntroduced => &mut self.payload.install_scripts_introduced,
            Signal::InstallScriptsChanged => &mut self.payload.install_scripts_changed,
            Signal::CryptoAddressesChanged => &mut self.crypto.crypto_addresses_changed,
            Signal::PackageReactivation => &mut self.account.package_reactivation,
            Signal::CommitMismatch => &mut self.account.commit_mismatch,
        }
    }

    pub fn resolve(&self, path: FlagPath) -> ResolvedValue {
        match path {
            FlagPath::Change(metric, baseline) => {
                ResolvedValue::Change(self.change(metric).get(baseline))
            }
            FlagPath::Signal(signal) => ResolvedValue::Boolean(self.signal(signal)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_path_display_and_parse() {
        let p = FlagPath::Change(NumericMetric::EvalFunction, Baseline::Previous);
        assert_eq!(p.to_string(), "payload.eval_function.previous");
        assert_eq!("payload.eval_function.previous".parse::<FlagPath>().unwrap(), p);

        let s = FlagPath::Signal(Signal::PackageReactivation);
        assert_eq!(s.to_string(), "account.package_reactivation");
        assert_eq!("account.package_reactivation".parse::<FlagPath>().unwrap(), s);
    }

    #[test]
    fn test_flag_path_rejects_unknown() {
        assert!("payload.eval_function.yesterday".parse::<FlagPath>().is_err());
        assert!("payload.nothing".parse::<FlagPath>().is_err());
        assert!("payload".parse::<FlagPath>().is_err());
        assert!("a.b.c.d".parse::<FlagPath>().is_err());
    }

    #[test]
    fn test_no_baseline_resolves_empty_everywhere() {
        let flags = Flags::no_baseline("pkg", "1.0.0");
        for m in NumericMetric::ALL {
            for b in [Baseline::Previous, Baseline::History] {
                match flags.resolve(FlagPath::Change(m, b)) {
                    ResolvedValue::Change(c) => assert!(c.is_no_baseline()),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
        for s in Signal::ALL {
            assert_eq!(flags.resolve(FlagPath::Signal(s)), ResolvedValue::Boolean(None));
        }
    }

    #[test]
    fn test_change_mut_targets_same_field() {
        let mut flags = Flags::no_baseline("pkg", "1.0.1");
        flags.change_mut(NumericMetric::ShellCommands).previous = ChangeMetric::introduced(3.0);
        assert_eq!(flags.payload.shell_commands.previous.absolute, Some(3.0));

        *flags.signal_mut(Signal::CommitMismatch) = Some(true);
        assert_eq!(flags.account.commit_mismatch, Some(true));
    }

    #[test]
    fn test_flag_path_serde_as_string() {
        let p: FlagPath = serde_json::from_str("\"crypto.hook_provider.history\"").unwrap();
        assert_eq!(p, FlagPath::Change(NumericMetric::HookProvider, Baseline::History));
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            "\"crypto.hook_provider.history\""
        );
    }
}

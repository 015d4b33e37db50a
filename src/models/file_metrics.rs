use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an analyzed file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTag {
    Vcs,
    LocalArchive,
    DownloadedArchive,
    /// Synthetic output of the deobfuscation pass.
    Derived,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vcs => write!(f, "vcs"),
            Self::LocalArchive => write!(f, "local-archive"),
            Self::DownloadedArchive => write!(f, "downloaded-archive"),
            Self::Derived => write!(f, "derived"),
        }
    }
}

/// Code classification of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    Clear,
    Minified,
    Obfuscated,
    Deobfuscated,
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => write!(f, "clear"),
            Self::Minified => write!(f, "minified"),
            Self::Obfuscated => write!(f, "obfuscated"),
            Self::Deobfuscated => write!(f, "deobfuscated"),
        }
    }
}

/// Identity of the file handed to a signal source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    pub package: String,
    pub version: String,
    /// Path relative to the version root
    pub path: Utf8PathBuf,
    pub source: SourceTag,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericFileMetrics {
    pub size_bytes: u64,
    pub size_chars: u64,
    /// Whitespace characters over total characters
    pub blank_space_ratio: f64,
    pub shannon_entropy: f64,
    pub longest_line_length: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvasionFileMetrics {
    /// `None` for empty content
    pub code_type: Option<CodeType>,
    pub obfuscation_patterns_count: u64,
    pub obfuscation_patterns: Vec<String>,
    pub platform_detections_count: u64,
    pub platform_detections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadFileMetrics {
    pub timing_delays_count: u64,
    pub timing_delays: Vec<String>,
    pub eval_count: u64,
    pub evals: Vec<String>,
    pub shell_commands_count: u64,
    pub shell_commands: Vec<String>,
    /// Install-time lifecycle scripts, formatted `hook: command`
    pub install_scripts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExfiltrationFileMetrics {
    pub scan_functions_count: u64,
    pub scan_functions: Vec<String>,
    pub sensitive_elements_count: u64,
    pub sensitive_elements: Vec<String>,
    pub data_transmission_count: u64,
    pub data_transmissions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CryptoFileMetrics {
    pub crypto_addresses_count: u64,
    pub crypto_addresses: Vec<String>,
    pub cryptocurrency_names_count: u64,
    pub cryptocurrency_names: Vec<String>,
    pub wallet_detection_count: u64,
    pub wallet_detections: Vec<String>,
    pub replaced_addresses_count: u64,
    pub hook_provider_count: u64,
}

/// Signals extracted from one file of one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub package: String,
    pub version: String,
    pub path: Utf8PathBuf,
    pub source: SourceTag,
    pub generic: GenericFileMetrics,
    pub evasion: EvasionFileMetrics,
    pub payload: PayloadFileMetrics,
    pub exfiltration: ExfiltrationFileMetrics,
    pub crypto: CryptoFileMetrics,
}

impl FileMetrics {
    /// Empty metrics for the given file.
    pub fn empty(ctx: &FileContext) -> Self {
        Self {
            package: ctx.package.clone(),
            version: ctx.version.clone(),
            path: ctx.path.clone(),
            source: ctx.source,
            generic: GenericFileMetrics::default(),
            evasion: EvasionFileMetrics::default(),
            payload: PayloadFileMetrics::default(),
            exfiltration: ExfiltrationFileMetrics::default(),
            crypto: CryptoFileMetrics::default(),
        }
    }

    /// Synthetic deobfuscation output, excluded from weighted ratios.
    pub fn is_derived(&self) -> bool {
        self.source == SourceTag::Derived || self.evasion.code_type == Some(CodeType::Deobfuscated)
    }
}

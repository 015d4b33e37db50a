//! Per-file signal extraction.

use std::collections::HashMap;

use aho_corasick::{AhoCorasick, MatchKind};
use anyhow::Result;
use regex::Regex;

use crate::models::file_metrics::{CodeType, FileContext, FileMetrics, SourceTag};

/// Produces category-tagged metrics for one file's content.
///
/// Implementations must be deterministic and free of side effects.
pub trait FileSignalSource: Sync {
    fn analyze_file(&self, content: &str, ctx: &FileContext) -> FileMetrics;
}

/// Upper bound on distinct matches listed per signal.
const MAX_LISTED: usize = 32;
/// `_0x` identifiers needed to classify a file as obfuscated.
const OBFUSCATED_HEX_IDENTIFIERS: u64 = 8;
/// Longest line and whitespace ratio thresholds for minified code.
const MINIFIED_LINE_LENGTH: u64 = 500;
const MINIFIED_BLANK_RATIO: f64 = 0.1;

const PLATFORM_TOKENS: &[&str] = &[
    "process.platform",
    "process.arch",
    "os.platform()",
    "os.type()",
    "os.arch()",
    "os.release()",
    "navigator.userAgent",
];

const TIMING_TOKENS: &[&str] = &["setTimeout(", "setInterval(", "setImmediate("];

const EVAL_TOKENS: &[&str] = &[
    "eval(",
    "new Function(",
    "vm.runInNewContext",
    "vm.runInThisContext",
    "vm.Script(",
];

const SHELL_TOKENS: &[&str] = &[
    "child_process",
    "exec(",
    "execSync(",
    "execFile(",
    "spawn(",
    "spawnSync(",
    "fork(",
];

const SCAN_TOKENS: &[&str] = &[
    "readdirSync(",
    "readdir(",
    "glob.sync(",
    "os.homedir()",
    "os.userInfo()",
    "os.hostname()",
    "os.networkInterfaces()",
];

const SENSITIVE_TOKENS: &[&str] = &[
    ".npmrc",
    ".ssh",
    "id_rsa",
    ".aws/credentials",
    ".gitconfig",
    ".bash_history",
    "/etc/passwd",
    "process.env",
    "wallet.dat",
    "Local Storage/leveldb",
];

const TRANSMISSION_TOKENS: &[&str] = &[
    "fetch(",
    "http.request(",
    "https.request(",
    "http.get(",
    "https.get(",
    "XMLHttpRequest",
    "axios.post(",
    "WebSocket(",
    "net.connect(",
    "net.createConnection(",
    "dgram.createSocket(",
    "dns.lookup(",
    "discord.com/api/webhooks",
];

const WALLET_TOKENS: &[&str] = &[
    "typeof window !== 'undefined'",
    "window.ethereum",
    "ethereum.isMetaMask",
    "ethereum.request",
];

const HOOK_TOKENS: &[&str] = &[
    "eth_sendTransaction",
    "solana_signTransaction",
    "solana_signAndSendTransaction",
];

const OBFUSCATION_PATTERNS: &[(&str, &str)] = &[
    ("hex-identifier", r"\b_0x[0-9a-fA-F]{4,}\b"),
    ("hex-escape", r"(?:\\x[0-9a-fA-F]{2}){4,}"),
    ("unicode-escape", r"(?:\\u[0-9a-fA-F]{4}){4,}"),
    ("char-code", r"String\.fromCharCode\s*\("),
    ("base64-decode", r"\batob\s*\("),
    ("base64-literal", r#"["'][A-Za-z0-9+/]{120,}={0,2}["']"#),
];

const ADDRESS_PATTERNS: &[(&str, &str)] = &[
    ("eth", r"\b0x[a-fA-F0-9]{40}\b"),
    ("btc-legacy", r"\b1[a-km-zA-HJ-NP-Z1-9]{25,34}\b"),
    (
        "btc-segwit",
        r"\b(?:3[a-km-zA-HJ-NP-Z1-9]{25,34}|bc1[qpzry9x8gf2tvdw0s3jn54khce6mua7l]{11,71})\b",
    ),
    ("bch", r"bitcoincash:[qp][a-zA-Z0-9]{41}"),
];

const CURRENCY_PATTERN: &str =
    r"(?i)\b(?:ethereum|eth|bitcoin-cash|bitcoin|btc|bch|tron|trx|litecoin|ltc|solana|sol)\b";

/// `if (<expr> == '<symbol>' ...) { ... .replace(`, spanning lines.
const REPLACE_PATTERN: &str = r#"(?is)if\s*\(\s*[^=]+={2,3}\s*['"](?:ethereum|eth|bitcoinlegacy|bitcoinsegwit|bitcoin-cash|bitcoin|btc|tron|trx|bch|litecoin|ltc2|ltc|solana2|solana3|solana|sol)['"][^)]*\)\s*\{[^}]*?\.replace\s*\("#;

const INSTALL_HOOKS: &[&str] = &["preinstall", "install", "postinstall"];

/// Count plus distinct matched values in first-seen order.
#[derive(Debug, PartialEq)]
struct Hits {
    count: u64,
    matched: Vec<String>,
    limit: usize,
}

impl Default for Hits {
    fn default() -> Self {
        Self {
            count: 0,
            matched: Vec::new(),
            limit: MAX_LISTED,
        }
    }
}

impl Hits {
    /// Keeps every distinct value; used where the list feeds set comparisons.
    fn unbounded() -> Self {
        Self {
            limit: usize::MAX,
            ..Self::default()
        }
    }

    fn record(&mut self, value: &str) {
        self.count += 1;
        if self.matched.len() < self.limit && !self.matched.iter().any(|m| m == value) {
            self.matched.push(value.to_string());
        }
    }
}

/// Literal tokens matched in one pass.
struct TokenGroup {
    tokens: &'static [&'static str],
    automaton: AhoCorasick,
}

impl TokenGroup {
    fn build(tokens: &'static [&'static str]) -> Result<Self> {
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(tokens)?;
        Ok(Self { tokens, automaton })
    }

    fn scan(&self, content: &str) -> Hits {
        let mut hits = Hits::default();
        for m in self.automaton.find_iter(content) {
            hits.record(self.tokens[m.pattern().as_usize()]);
        }
        hits
    }
}

/// Labeled regular expressions.
struct PatternGroup {
    patterns: Vec<(&'static str, Regex)>,
}

impl PatternGroup {
    fn build(specs: &[(&'static str, &str)]) -> Result<Self> {
        let patterns = specs
            .iter()
            .map(|(label, src)| Ok::<_, anyhow::Error>((*label, Regex::new(src)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Counts every match, listing the labels that fired.
    fn scan_labels(&self, content: &str) -> (Hits, HashMap<&'static str, u64>) {
        let mut hits = Hits::default();
        let mut per_label = HashMap::new();
        for (label, re) in &self.patterns {
            for _ in re.find_iter(content) {
                hits.record(label);
                *per_label.entry(*label).or_insert(0) += 1;
            }
        }
        (hits, per_label)
    }

    /// Counts every match, listing all distinct matched text.
    fn scan_values(&self, content: &str) -> Hits {
        let mut hits = Hits::unbounded();
        for (_, re) in &self.patterns {
            for m in re.find_iter(content) {
                hits.record(m.as_str());
            }
        }
        hits
    }
}

/// Token and pattern based signal source for JavaScript packages.
pub struct PatternSignalSource {
    platform: TokenGroup,
    timing: TokenGroup,
    eval: TokenGroup,
    shell: TokenGroup,
    scan: TokenGroup,
    sensitive: TokenGroup,
    transmission: TokenGroup,
    wallet: TokenGroup,
    hook: TokenGroup,
    obfuscation: PatternGroup,
    addresses: PatternGroup,
    currency: Regex,
    replace: Regex,
}

impl PatternSignalSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            platform: TokenGroup::build(PLATFORM_TOKENS)?,
            timing: TokenGroup::build(TIMING_TOKENS)?,
            eval: TokenGroup::build(EVAL_TOKENS)?,
            shell: TokenGroup::build(SHELL_TOKENS)?,
            scan: TokenGroup::build(SCAN_TOKENS)?,
            sensitive: TokenGroup::build(SENSITIVE_TOKENS)?,
            transmission: TokenGroup::build(TRANSMISSION_TOKENS)?,
            wallet: TokenGroup::build(WALLET_TOKENS)?,
            hook: TokenGroup::build(HOOK_TOKENS)?,
            obfuscation: PatternGroup::build(OBFUSCATION_PATTERNS)?,
            addresses: PatternGroup::build(ADDRESS_PATTERNS)?,
            currency: Regex::new(CURRENCY_PATTERN)?,
            replace: Regex::new(REPLACE_PATTERN)?,
        })
    }
}

impl FileSignalSource for PatternSignalSource {
    fn analyze_file(&self, content: &str, ctx: &FileContext) -> FileMetrics {
        let mut m = FileMetrics::empty(ctx);

        // generic
        let chars = content.chars().count() as u64;
        m.generic.size_bytes = content.len() as u64;
        m.generic.size_chars = chars;
        m.generic.blank_space_ratio = blank_space_ratio(content, chars);
        m.generic.shannon_entropy = shannon_entropy(content, chars);
        m.generic.longest_line_length = longest_line_length(content);

        // evasion
        let (obfuscation, per_label) = self.obfuscation.scan_labels(content);
        let hex_identifiers = per_label.get("hex-identifier").copied().unwrap_or(0);
        m.evasion.code_type = classify(
            content,
            ctx.source,
            hex_identifiers,
            m.generic.longest_line_length,
            m.generic.blank_space_ratio,
        );
        m.evasion.obfuscation_patterns_count = obfuscation.count;
        m.evasion.obfuscation_patterns = obfuscation.matched;
        let platform = self.platform.scan(content);
        m.evasion.platform_detections_count = platform.count;
        m.evasion.platform_detections = platform.matched;

        // payload
        let timing = self.timing.scan(content);
        m.payload.timing_delays_count = timing.count;
        m.payload.timing_delays = timing.matched;
        let eval = self.eval.scan(content);
        m.payload.eval_count = eval.count;
        m.payload.evals = eval.matched;
        let shell = self.shell.scan(content);
        m.payload.shell_commands_count = shell.count;
        m.payload.shell_commands = shell.matched;
        if ctx.path.file_name() == Some("package.json") {
            m.payload.install_scripts = install_scripts(content);
        }

        // exfiltration
        let scan = self.scan.scan(content);
        m.exfiltration.scan_functions_count = scan.count;
        m.exfiltration.scan_functions = scan.matched;
        let sensitive = self.sensitive.scan(content);
        m.exfiltration.sensitive_elements_count = sensitive.count;
        m.exfiltration.sensitive_elements = sensitive.matched;
        let transmission = self.transmission.scan(content);
        m.exfiltration.data_transmission_count = transmission.count;
        m.exfiltration.data_transmissions = transmission.matched;

        // crypto
        let addresses = self.addresses.scan_values(content);
        m.crypto.crypto_addresses_count = addresses.count;
        m.crypto.crypto_addresses = addresses.matched;
        let mut names = Hits::default();
        for found in self.currency.find_iter(content) {
            names.record(&found.as_str().to_ascii_lowercase());
        }
        m.crypto.cryptocurrency_names_count = names.count;
        m.crypto.cryptocurrency_names = names.matched;
        let wallet = self.wallet.scan(content);
        m.crypto.wallet_detection_count = wallet.count;
        m.crypto.wallet_detections = wallet.matched;
        m.crypto.replaced_addresses_count = self.replace.find_iter(content).count() as u64;
        m.crypto.hook_provider_count = self.hook.scan(content).count;

        m
    }
}

fn blank_space_ratio(content: &str, chars: u64) -> f64 {
    if chars == 0 {
        return 0.0;
    }
    let blanks = content.chars().filter(|c| c.is_whitespace()).count();
    blanks as f64 / chars as f64
}

/// Shannon entropy over characters, in bits.
fn shannon_entropy(content: &str, chars: u64) -> f64 {
    if chars == 0 {
        return 0.0;
    }
    let mut freq: HashMap<char, u64> = HashMap::new();
    for c in content.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }
    let total = chars as f64;
    freq.values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn longest_line_length(content: &str) -> u64 {
    let bytes = content.as_bytes();
    let mut start = 0;
    let mut longest = 0;
    for end in memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len())) {
        let line = content[start..end].trim_end_matches('\r');
        longest = longest.max(line.chars().count() as u64);
        start = end + 1;
    }
    longest
}

fn classify(
    content: &str,
    source: SourceTag,
    hex_identifiers: u64,
    longest_line: u64,
    blank_ratio: f64,
) -> Option<CodeType> {
    if content.trim().is_empty() {
        return None;
    }
    if source == SourceTag::Derived {
        return Some(CodeType::Deobfuscated);
    }
    if hex_identifiers >= OBFUSCATED_HEX_IDENTIFIERS {
        return Some(CodeType::Obfuscated);
    }
    if longest_line >= MINIFIED_LINE_LENGTH && blank_ratio < MINIFIED_BLANK_RATIO {
        return Some(CodeType::Minified);
    }
    Some(CodeType::Clear)
}

/// Lifecycle scripts of a `package.json`, formatted `hook: command`.
fn install_scripts(content: &str) -> Vec<String> {
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(content) else {
        return Vec::new();
    };
    let Some(scripts) = manifest.get("scripts").and_then(|s| s.as_object()) else {
        return Vec::new();
    };
    INSTALL_HOOKS
        .iter()
        .filter_map(|hook| {
            let command = scripts.get(*hook)?.as_str()?;
            Some(format!("{hook}: {command}"))
        })
        .collect()
}

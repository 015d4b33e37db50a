use crate::models::account::AccountData;
use crate::models::file_metrics::FileMetrics;
use crate::models::version_metrics::VersionMetrics;

/// Running reduction of per-file metrics into one version snapshot.
///
/// `absorb` and `merge` are order-independent, so partial accumulators from
/// parallel workers can be combined in any order.
#[derive(Debug, Clone)]
pub struct SnapshotAccumulator {
    metrics: VersionMetrics,
    weighted_blank: f64,
    weighted_entropy: f64,
    weight_chars: f64,
}

impl SnapshotAccumulator {
    pub fn new(package: &str, version: &str) -> Self {
        Self {
            metrics: VersionMetrics::new(package, version),
            weighted_blank: 0.0,
            weighted_entropy: 0.0,
            weight_chars: 0.0,
        }
    }

    pub fn absorb(&mut self, file: &FileMetrics) {
        let m = &mut self.metrics;

        m.generic.total_files += 1;
        m.generic.total_size_bytes += file.generic.size_bytes;
        m.generic.total_size_chars += file.generic.size_chars;
        m.generic.longest_line_length = m
            .generic
            .longest_line_length
            .max(file.generic.longest_line_length);
        if !file.is_derived() {
            let chars = file.generic.size_chars as f64;
            self.weighted_blank += file.generic.blank_space_ratio * chars;
            self.weighted_entropy += file.generic.shannon_entropy * chars;
            self.weight_chars += chars;
        }

        if let Some(code_type) = file.evasion.code_type {
            m.evasion.code_types.insert(code_type);
        }
        m.evasion.obfuscation_patterns_count += file.evasion.obfuscation_patterns_count;
        m.evasion.platform_detections_count += file.evasion.platform_detections_count;

        m.payload.timing_delays_count += file.payload.timing_delays_count;
        m.payload.eval_count += file.payload.eval_count;
        m.payload.shell_commands_count += file.payload.shell_commands_count;
        m.payload
            .install_scripts
            .extend(file.payload.install_scripts.iter().cloned());

        m.exfiltration.scan_functions_count += file.exfiltration.scan_functions_count;
        m.exfiltration.sensitive_elements_count += file.exfiltration.sensitive_elements_count;
        m.exfiltration.data_transmission_count += file.exfiltration.data_transmission_count;

        m.crypto.crypto_addresses_count += file.crypto.crypto_addresses_count;
        m.crypto
            .crypto_addresses
            .extend(file.crypto.crypto_addresses.iter().cloned());
        m.crypto.cryptocurrency_names_count += file.crypto.cryptocurrency_names_count;
        m.crypto.wallet_detection_count += file.crypto.wallet_detection_count;
        m.crypto.replaced_addresses_count += file.crypto.replaced_addresses_count;
        m.crypto.hook_provider_count += file.crypto.hook_provider_count;
    }

    pub fn merge(mut self, other: Self) -> Self {
        let (a, b) = (&mut self.metrics, other.metrics);

        a.generic.total_files += b.generic.total_files;
        a.generic.total_size_bytes += b.generic.total_size_bytes;
        a.generic.total_size_chars += b.generic.total_size_chars;
        a.generic.longest_line_length = a
            .generic
            .longest_line_length
            .max(b.generic.longest_line_length);
        self.weighted_blank += other.weighted_blank;
        self.weighted_entropy += other.weighted_entropy;
        self.weight_chars += other.weight_chars;

        a.evasion.code_types.extend(b.evasion.code_types);
        a.evasion.obfuscation_patterns_count += b.evasion.obfuscation_patterns_count;
        a.evasion.platform_detections_count += b.evasion.platform_detections_count;

        a.payload.timing_delays_count += b.payload.timing_delays_count;
        a.payload.eval_count += b.payload.eval_count;
        a.payload.shell_commands_count += b.payload.shell_commands_count;
        a.payload.install_scripts.extend(b.payload.install_scripts);

        a.exfiltration.scan_functions_count += b.exfiltration.scan_functions_count;
        a.exfiltration.sensitive_elements_count += b.exfiltration.sensitive_elements_count;
        a.exfiltration.data_transmission_count += b.exfiltration.data_transmission_count;

        a.crypto.crypto_addresses_count += b.crypto.crypto_addresses_count;
        a.crypto.crypto_addresses.extend(b.crypto.crypto_addresses);
        a.crypto.cryptocurrency_names_count += b.crypto.cryptocurrency_names_count;
        a.crypto.wallet_detection_count += b.crypto.wallet_detection_count;
        a.crypto.replaced_addresses_count += b.crypto.replaced_addresses_count;
        a.crypto.hook_provider_count += b.crypto.hook_provider_count;

        self
    }

    pub fn finish(self, account: AccountData) -> VersionMetrics {
        let mut metrics = self.metrics;
        // zero weight means no original content; ratios are defined as 0
        if self.weight_chars > 0.0 {
            metrics.generic.weighted_blank_space_ratio = self.weighted_blank / self.weight_chars;
            metrics.generic.weighted_shannon_entropy = self.weighted_entropy / self.weight_chars;
        }
        metrics.account = account;
        metrics
    }
}

/// Reduce every file of one version into its snapshot.
pub fn aggregate_version(
    package: &str,
    version: &str,
    files: &[FileMetrics],
    account: AccountData,
) -> VersionMetrics {
    let mut acc = SnapshotAccumulator::new(package, version);
    for file in files {
        acc.absorb(file);
    }
    acc.finish(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file_metrics::{CodeType, FileContext, SourceTag};

    fn file(path: &str, source: SourceTag) -> FileMetrics {
        FileMetrics::empty(&FileContext {
            package: "pkg".into(),
            version: "1.0.0".into(),
            path: path.into(),
            source,
        })
    }

    fn sample_files() -> Vec<FileMetrics> {
        let mut a = file("a.js", SourceTag::Vcs);
        a.generic.size_bytes = 100;
        a.generic.size_chars = 100;
        a.generic.shannon_entropy = 3.0;
        a.generic.blank_space_ratio = 0.2;
        a.generic.longest_line_length = 80;
        a.evasion.code_type = Some(CodeType::Clear);
        a.payload.eval_count = 2;
        a.crypto.crypto_addresses = vec!["0xabc".into()];
        a.crypto.crypto_addresses_count = 1;

        let mut b = file("b.js", SourceTag::Vcs);
        b.generic.size_bytes = 300;
        b.generic.size_chars = 300;
        b.generic.shannon_entropy = 5.0;
        b.generic.blank_space_ratio = 0.1;
        b.generic.longest_line_length = 4000;
        b.evasion.code_type = Some(CodeType::Minified);
        b.payload.eval_count = 1;
        b.payload.install_scripts = vec!["postinstall: node x.js".into()];
        b.crypto.crypto_addresses = vec!["0xabc".into(), "0xdef".into()];
        b.crypto.crypto_addresses_count = 2;

        vec![a, b]
    }

    #[test]
    fn test_counts_are_summed_and_max_taken() {
        let v = aggregate_version("pkg", "1.0.0", &sample_files(), AccountData::empty());
        assert_eq!(v.generic.total_files, 2);
        assert_eq!(v.generic.total_size_bytes, 400);
        assert_eq!(v.generic.longest_line_length, 4000);
        assert_eq!(v.payload.eval_count, 3);
        assert_eq!(v.crypto.crypto_addresses_count, 3);
    }

    #[test]
    fn test_weighted_ratios_use_char_counts() {
        let v = aggregate_version("pkg", "1.0.0", &sample_files(), AccountData::empty());
        // (3*100 + 5*300) / 400
        assert!((v.generic.weighted_shannon_entropy - 4.5).abs() < 1e-12);
        assert!((v.generic.weighted_blank_space_ratio - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_derived_file_is_excluded_from_weighted_entropy() {
        let mut derived = file("a.js-deobfuscated.js", SourceTag::Derived);
        derived.generic.size_chars = 500;
        derived.generic.shannon_entropy = 7.9;
        derived.evasion.code_type = Some(CodeType::Deobfuscated);

        let mut original = file("a.js", SourceTag::Vcs);
        original.generic.size_chars = 1000;
        original.generic.shannon_entropy = 4.0;

        let v = aggregate_version("pkg", "1.0.0", &[derived, original], AccountData::empty());
        assert_eq!(v.generic.weighted_shannon_entropy, 4.0);
        // derived files still count toward totals
        assert_eq!(v.generic.total_size_chars, 1500);
        assert_eq!(v.generic.total_files, 2);
    }

    #[test]
    fn test_zero_chars_gives_zero_ratio() {
        let empty = file("empty.js", SourceTag::Vcs);
        let v = aggregate_version("pkg", "1.0.0", &[empty], AccountData::empty());
        assert_eq!(v.generic.weighted_shannon_entropy, 0.0);
        assert_eq!(v.generic.weighted_blank_space_ratio, 0.0);

        let none = aggregate_version("pkg", "1.0.0", &[], AccountData::empty());
        assert_eq!(none.generic.weighted_shannon_entropy, 0.0);
        assert!(!none.generic.weighted_shannon_entropy.is_nan());
    }

    #[test]
    fn test_set_fields_are_deduplicated() {
        let v = aggregate_version("pkg", "1.0.0", &sample_files(), AccountData::empty());
        assert_eq!(v.crypto.crypto_addresses.len(), 2);
        assert_eq!(v.evasion.code_types.len(), 2);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let files = sample_files();
        let once = aggregate_version("pkg", "1.0.0", &files, AccountData::empty());
        let doubled: Vec<FileMetrics> = files.iter().chain(files.iter()).cloned().collect();
        let twice = aggregate_version("pkg", "1.0.0", &doubled, AccountData::empty());

        assert_eq!(once.crypto.crypto_addresses, twice.crypto.crypto_addresses);
        assert_eq!(once.payload.install_scripts, twice.payload.install_scripts);
        assert_eq!(once.evasion.code_types, twice.evasion.code_types);
    }

    #[test]
    fn test_order_does_not_matter() {
        let files = sample_files();
        let forward = aggregate_version("pkg", "1.0.0", &files, AccountData::empty());
        let reversed: Vec<FileMetrics> = files.iter().rev().cloned().collect();
        let backward = aggregate_version("pkg", "1.0.0", &reversed, AccountData::empty());
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_merge_matches_sequential_absorb() {
        let files = sample_files();
        let sequential = aggregate_version("pkg", "1.0.0", &files, AccountData::empty());

        let mut left = SnapshotAccumulator::new("pkg", "1.0.0");
        left.absorb(&files[0]);
        let mut right = SnapshotAccumulator::new("pkg", "1.0.0");
        right.absorb(&files[1]);
        let merged = right.merge(left).finish(AccountData::empty());

        assert_eq!(sequential, merged);
    }

    #[test]
    fn test_account_data_is_attached() {
        let account = AccountData {
            maintainer_count: 3,
            ..AccountData::empty()
        };
        let v = aggregate_version("pkg", "1.0.0", &[], account);
        assert_eq!(v.account.maintainer_count, 3);
    }
}

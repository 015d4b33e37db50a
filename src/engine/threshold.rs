use std::path::Path;

use anyhow::{Context, Result};

use crate::error::{ErrorCode, SightError};
use crate::models::change::{Baseline, FlagPath, Flags, ResolvedValue, Signal};
use crate::models::metric::{Category, NumericMetric};
use crate::models::rule::{Comparison, ThresholdConfig, ThresholdRule, Trigger, TriggeredRule};

const EQUAL_EPSILON: f64 = 1e-9;

/// Evaluate every rule against `flags`, in rule order.
pub fn evaluate(rules: &[ThresholdRule], flags: &Flags) -> Vec<TriggeredRule> {
    rules
        .iter()
        .filter_map(|rule| {
            evaluate_rule(rule, flags).map(|trigger| TriggeredRule {
                name: rule.name.clone(),
                description: rule.config.description.clone(),
                path: rule.path,
                symbol: rule.config.symbol,
                trigger,
            })
        })
        .collect()
}

/// Evaluate one rule. `None` means not triggered.
pub fn evaluate_rule(rule: &ThresholdRule, flags: &Flags) -> Option<Trigger> {
    let config = &rule.config;
    let resolved = flags.resolve(rule.path);

    if let Some(expected) = config.boolean {
        return match resolved {
            ResolvedValue::Boolean(Some(value)) if value == expected => {
                Some(Trigger::Boolean { value })
            }
            _ => None,
        };
    }

    let ResolvedValue::Change(change) = resolved else {
        return None;
    };
    if config.symbol == Comparison::None || change.is_no_baseline() {
        return None;
    }

    if let (Some(value), Some(threshold)) = (change.percentage, config.percentage)
        && value.is_finite()
    {
        return compare(config.symbol, value, threshold)
            .then_some(Trigger::Percentage { value, threshold });
    }

    if let (Some(value), Some(threshold)) = (change.absolute, config.absolute) {
        return compare(config.symbol, value, threshold)
            .then_some(Trigger::Absolute { value, threshold });
    }

    None
}

fn compare(symbol: Comparison, value: f64, threshold: f64) -> bool {
    match symbol {
        Comparison::None => false,
        Comparison::GreaterOrEqual => value >= threshold,
        Comparison::LessOrEqual => value <= threshold,
        Comparison::Equal => (value - threshold).abs() <= EQUAL_EPSILON,
    }
}

// ---------------------------------------------------------------------------
// Rule tables
// ---------------------------------------------------------------------------

fn change_rule(
    name: &str,
    metric: NumericMetric,
    baseline: Baseline,
    symbol: Comparison,
    percentage: Option<f64>,
    absolute: Option<f64>,
    description: &str,
) -> ThresholdRule {
    ThresholdRule {
        name: name.to_string(),
        path: FlagPath::Change(metric, baseline),
        config: ThresholdConfig {
            percentage,
            absolute,
            boolean: None,
            symbol,
            description: description.to_string(),
        },
    }
}

fn signal_rule(name: &str, signal: Signal, description: &str) -> ThresholdRule {
    ThresholdRule {
        name: name.to_string(),
        path: FlagPath::Signal(signal),
        config: ThresholdConfig {
            percentage: None,
            absolute: None,
            boolean: Some(true),
            symbol: Comparison::None,
            description: description.to_string(),
        },
    }
}

fn introduced(name: &str, metric: NumericMetric, description: &str) -> ThresholdRule {
    change_rule(
        name,
        metric,
        Baseline::Previous,
        Comparison::GreaterOrEqual,
        None,
        Some(1.0),
        description,
    )
}

fn generic_rules() -> Vec<ThresholdRule> {
    use Baseline::*;
    use Comparison::{GreaterOrEqual, LessOrEqual};
    use NumericMetric::*;
    vec![
        change_rule(
            "Package size surge",
            TotalSizeBytes,
            Previous,
            GreaterOrEqual,
            Some(100.0),
            None,
            "total size at least doubled since the previous version",
        ),
        change_rule(
            "Package size above history",
            TotalSizeBytes,
            History,
            GreaterOrEqual,
            Some(200.0),
            None,
            "total size is three times the historical average",
        ),
        change_rule(
            "File count surge",
            TotalFiles,
            History,
            GreaterOrEqual,
            Some(200.0),
            None,
            "file count is three times the historical average",
        ),
        change_rule(
            "Entropy spike",
            ShannonEntropy,
            Previous,
            GreaterOrEqual,
            Some(20.0),
            None,
            "weighted Shannon entropy rose by 20% or more",
        ),
        change_rule(
            "Entropy above history",
            ShannonEntropy,
            History,
            GreaterOrEqual,
            Some(25.0),
            None,
            "weighted Shannon entropy is 25% above the historical average",
        ),
        change_rule(
            "Whitespace collapse",
            BlankSpaceRatio,
            Previous,
            LessOrEqual,
            Some(-50.0),
            None,
            "whitespace ratio halved, typical of packed code",
        ),
        change_rule(
            "Longest line growth",
            LongestLineLength,
            Previous,
            GreaterOrEqual,
            Some(300.0),
            None,
            "longest line grew fourfold",
        ),
    ]
}

fn evasion_rules() -> Vec<ThresholdRule> {
    use Baseline::*;
    use Comparison::GreaterOrEqual;
    use NumericMetric::*;
    vec![
        signal_rule(
            "Obfuscated code introduced",
            Signal::ObfuscatedCodeIntroduced,
            "a file is classified as obfuscated for the first time",
        ),
        signal_rule(
            "Minified code introduced",
            Signal::MinifiedCodeIntroduced,
            "a file is classified as minified for the first time",
        ),
        introduced(
            "Obfuscation patterns introduced",
            ObfuscationPatterns,
            "obfuscation patterns appear where there were none",
        ),
        change_rule(
            "Obfuscation patterns increase",
            ObfuscationPatterns,
            History,
            GreaterOrEqual,
            Some(100.0),
            None,
            "obfuscation patterns doubled against the historical average",
        ),
        introduced(
            "Platform detection introduced",
            PlatformDetections,
            "code started fingerprinting the host platform",
        ),
    ]
}

fn payload_rules() -> Vec<ThresholdRule> {
    use Baseline::*;
    use Comparison::GreaterOrEqual;
    use NumericMetric::*;
    vec![
        introduced(
            "Eval introduced",
            EvalFunction,
            "dynamic code evaluation appears for the first time",
        ),
        change_rule(
            "Eval increase",
            EvalFunction,
            Previous,
            GreaterOrEqual,
            Some(50.0),
            None,
            "dynamic code evaluation grew by half",
        ),
        introduced(
            "Shell commands introduced",
            ShellCommands,
            "child process execution appears for the first time",
        ),
        change_rule(
            "Shell commands increase",
            ShellCommands,
            Previous,
            GreaterOrEqual,
            Some(50.0),
            None,
            "child process execution grew by half",
        ),
        introduced(
            "Timing delays introduced",
            TimingDelays,
            "delayed execution appears for the first time",
        ),
        signal_rule(
            "Install scripts introduced",
            Signal::InstallScriptsIntroduced,
            "an install-time lifecycle script was added",
        ),
        signal_rule(
            "Install scripts changed",
            Signal::InstallScriptsChanged,
            "install-time lifecycle scripts were modified",
        ),
    ]
}

fn exfiltration_rules() -> Vec<ThresholdRule> {
    use Baseline::*;
    use Comparison::GreaterOrEqual;
    use NumericMetric::*;
    vec![
        introduced(
            "Filesystem scanning introduced",
            ScanFunctions,
            "directory or host enumeration appears for the first time",
        ),
        introduced(
            "Sensitive data access introduced",
            SensitiveElements,
            "credentials or secrets are referenced for the first time",
        ),
        change_rule(
            "Sensitive data access increase",
            SensitiveElements,
            History,
            GreaterOrEqual,
            Some(100.0),
            None,
            "references to secrets doubled against the historical average",
        ),
        introduced(
            "Data transmission introduced",
            DataTransmission,
            "outbound network transmission appears for the first time",
        ),
    ]
}

fn crypto_rules() -> Vec<ThresholdRule> {
    use NumericMetric::*;
    vec![
        introduced(
            "Crypto addresses introduced",
            CryptoAddresses,
            "hard-coded wallet addresses appear for the first time",
        ),
        signal_rule(
            "Crypto addresses changed",
            Signal::CryptoAddressesChanged,
            "wallet addresses never seen in earlier versions",
        ),
        introduced(
            "Cryptocurrency names introduced",
            CryptocurrencyNames,
            "cryptocurrency names appear for the first time",
        ),
        introduced(
            "Wallet detection introduced",
            WalletDetection,
            "browser wallet probing appears for the first time",
        ),
        introduced(
            "Address replacement introduced",
            ReplacedAddresses,
            "code rewrites wallet addresses in transit",
        ),
        introduced(
            "Provider hook introduced",
            HookProvider,
            "wallet provider transaction methods are intercepted",
        ),
    ]
}

fn account_rules() -> Vec<ThresholdRule> {
    use Baseline::*;
    use Comparison::{GreaterOrEqual, LessOrEqual};
    use NumericMetric::*;
    vec![
        signal_rule(
            "Package reactivation",
            Signal::PackageReactivation,
            "first release after more than two years of inactivity",
        ),
        signal_rule(
            "Commit hash mismatch",
            Signal::CommitMismatch,
            "registry commit differs from the tagged commit in source history",
        ),
        change_rule(
            "Maintainer set shrank",
            Maintainers,
            Previous,
            LessOrEqual,
            Some(-50.0),
            None,
            "half of the maintainers were removed",
        ),
    ]
}

/// Built-in rules for one category.
pub fn rules_for(category: Category) -> Vec<ThresholdRule> {
    match category {
        Category::Generic => generic_rules(),
        Category::Evasion => evasion_rules(),
        Category::Payload => payload_rules(),
        Category::Exfiltration => exfiltration_rules(),
        Category::Crypto => crypto_rules(),
        Category::Account => account_rules(),
    }
}

/// The full built-in rule table, grouped by category.
pub fn default_rules() -> Vec<ThresholdRule> {
    Category::ALL.into_iter().flat_map(rules_for).collect()
}

/// Load a rule table from a YAML file, replacing the built-in one.
pub fn load_rules_from_file(path: &Path) -> Result<Vec<ThresholdRule>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
    let rules: Vec<ThresholdRule> = serde_yaml::from_str(&content).map_err(|e| {
        SightError::new(
            ErrorCode::RuleError,
            format!("Invalid rules file {}: {e}", path.display()),
        )
    })?;
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::change::ChangeMetric;

    fn percentage_rule(path: FlagPath, symbol: Comparison, threshold: f64) -> ThresholdRule {
        ThresholdRule {
            name: "pct".into(),
            path,
            config: ThresholdConfig {
                percentage: Some(threshold),
                symbol,
                ..Default::default()
            },
        }
    }

    fn eval_prev() -> FlagPath {
        FlagPath::Change(NumericMetric::EvalFunction, Baseline::Previous)
    }

    fn flags_with_eval(change: ChangeMetric) -> Flags {
        let mut f = Flags::no_baseline("pkg", "1.0.1");
        f.payload.eval_function.previous = change;
        f
    }

    #[test]
    fn test_boolean_rule_triggers_only_on_exact_true() {
        let rule = signal_rule("r", Signal::PackageReactivation, "d");
        let mut flags = Flags::no_baseline("pkg", "1.0.1");

        assert_eq!(evaluate_rule(&rule, &flags), None);
        flags.account.package_reactivation = Some(false);
        assert_eq!(evaluate_rule(&rule, &flags), None);
        flags.account.package_reactivation = Some(true);
        assert_eq!(
            evaluate_rule(&rule, &flags),
            Some(Trigger::Boolean { value: true })
        );
    }

    #[test]
    fn test_boolean_rule_on_change_path_never_triggers() {
        let mut rule = signal_rule("r", Signal::PackageReactivation, "d");
        rule.path = eval_prev();
        let flags = flags_with_eval(ChangeMetric::introduced(5.0));
        assert_eq!(evaluate_rule(&rule, &flags), None);
    }

    #[test]
    fn test_percentage_rule_greater_or_equal() {
        let rule = percentage_rule(eval_prev(), Comparison::GreaterOrEqual, 50.0);
        assert!(evaluate_rule(&rule, &flags_with_eval(ChangeMetric::relative(50.0))).is_some());
        assert!(evaluate_rule(&rule, &flags_with_eval(ChangeMetric::relative(49.9))).is_none());
        // new introduction has no percentage and the rule has no absolute threshold
        assert!(evaluate_rule(&rule, &flags_with_eval(ChangeMetric::introduced(100.0))).is_none());
    }

    #[test]
    fn test_percentage_rule_less_or_equal_and_equal() {
        let le = percentage_rule(eval_prev(), Comparison::LessOrEqual, -50.0);
        assert!(evaluate_rule(&le, &flags_with_eval(ChangeMetric::relative(-60.0))).is_some());
        assert!(evaluate_rule(&le, &flags_with_eval(ChangeMetric::relative(-10.0))).is_none());

        let eq = percentage_rule(eval_prev(), Comparison::Equal, 0.0);
        assert!(evaluate_rule(&eq, &flags_with_eval(ChangeMetric::relative(0.0))).is_some());
        assert!(evaluate_rule(&eq, &flags_with_eval(ChangeMetric::relative(0.1))).is_none());
    }

    #[test]
    fn test_no_symbol_never_triggers() {
        let rule = percentage_rule(eval_prev(), Comparison::None, 0.0);
        assert!(evaluate_rule(&rule, &flags_with_eval(ChangeMetric::relative(500.0))).is_none());
    }

    #[test]
    fn test_absolute_fallback() {
        let rule = introduced("Eval introduced", NumericMetric::EvalFunction, "d");
        assert_eq!(
            evaluate_rule(&rule, &flags_with_eval(ChangeMetric::introduced(25.0))),
            Some(Trigger::Absolute {
                value: 25.0,
                threshold: 1.0
            })
        );
        // relative change present but no percentage threshold
        assert!(evaluate_rule(&rule, &flags_with_eval(ChangeMetric::relative(80.0))).is_none());
    }

    #[test]
    fn test_percentage_preferred_when_both_configured() {
        let rule = ThresholdRule {
            name: "both".into(),
            path: eval_prev(),
            config: ThresholdConfig {
                percentage: Some(10.0),
                absolute: Some(1000.0),
                symbol: Comparison::GreaterOrEqual,
                ..Default::default()
            },
        };
        assert_eq!(
            evaluate_rule(&rule, &flags_with_eval(ChangeMetric::relative(20.0))),
            Some(Trigger::Percentage {
                value: 20.0,
                threshold: 10.0
            })
        );
        assert!(evaluate_rule(&rule, &flags_with_eval(ChangeMetric::introduced(20.0))).is_none());
    }

    #[test]
    fn test_no_baseline_flags_trigger_nothing() {
        let flags = Flags::no_baseline("pkg", "1.0.0");
        assert!(evaluate(&default_rules(), &flags).is_empty());
    }

    #[test]
    fn test_evaluate_preserves_rule_order() {
        let mut flags = flags_with_eval(ChangeMetric::introduced(25.0));
        flags.payload.install_scripts_introduced = Some(true);
        let triggered = evaluate(&payload_rules(), &flags);
        let names: Vec<&str> = triggered.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Eval introduced", "Install scripts introduced"]);
        assert_eq!(triggered[0].path, eval_prev());
    }

    #[test]
    fn test_default_rules_cover_every_category() {
        let rules = default_rules();
        for c in Category::ALL {
            assert!(rules.iter().any(|r| r.path.category() == c), "{c}");
            assert!(!rules_for(c).is_empty());
        }
        let mut names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), rules.len(), "rule names must be unique");
    }

    #[test]
    fn test_load_rules_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(
            &path,
            "- name: Entropy\n  path: generic.shannon_entropy.history\n  percentage: 10\n  symbol: \">=\"\n",
        )
        .unwrap();

        let rules = load_rules_from_file(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0].path,
            FlagPath::Change(NumericMetric::ShannonEntropy, Baseline::History)
        );
    }

    #[test]
    fn test_load_rules_rejects_unknown_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, "- name: Bad\n  path: generic.nope.history\n").unwrap();

        let err = load_rules_from_file(&path).unwrap_err();
        let se = err.downcast_ref::<SightError>().unwrap();
        assert_eq!(se.code, ErrorCode::RuleError);
    }

    #[test]
    fn test_default_rules_roundtrip_through_yaml() {
        let yaml = serde_yaml::to_string(&default_rules()).unwrap();
        let parsed: Vec<ThresholdRule> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, default_rules());
    }
}

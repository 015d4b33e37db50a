use time::Duration;

use crate::models::aggregate::AggregateVersionMetrics;
use crate::models::change::{ChangeMetric, Flags, MetricChange, Signal};
use crate::models::file_metrics::CodeType;
use crate::models::metric::NumericMetric;
use crate::models::version_metrics::VersionMetrics;

/// Tunables for boolean change predicates.
#[derive(Debug, Clone, Copy)]
pub struct ChangePolicy {
    /// Release gap after which a new release counts as a reactivation
    pub reactivation_gap: Duration,
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self {
            reactivation_gap: Duration::days(2 * 365),
        }
    }
}

/// Delta of `current` against `baseline`.
///
/// A zero baseline with a positive current value is a new introduction and
/// only carries the absolute delta.
pub fn change_metric(current: f64, baseline: f64) -> ChangeMetric {
    if baseline == 0.0 && current > 0.0 {
        return ChangeMetric::introduced(current - baseline);
    }
    let percentage = if baseline > 0.0 {
        ((current - baseline) / baseline) * 100.0
    } else {
        0.0
    };
    ChangeMetric::relative(percentage)
}

/// Compare `current` against the previous snapshot and the rolling history.
///
/// `history` must not yet include `current`.
pub fn compare(
    previous: Option<&VersionMetrics>,
    history: &AggregateVersionMetrics,
    current: &VersionMetrics,
    policy: &ChangePolicy,
) -> Flags {
    let mut flags = Flags::no_baseline(&current.package, &current.version);
    let Some(previous) = previous else {
        return flags;
    };
    if history.is_empty() {
        return flags;
    }
    flags.previous_version = Some(previous.version.clone());

    for metric in NumericMetric::ALL {
        let value = current.value(metric);
        *flags.change_mut(metric) = MetricChange {
            previous: change_metric(value, previous.value(metric)),
            history: change_metric(value, history.average(metric)),
        };
    }

    for signal in Signal::ALL {
        *flags.signal_mut(signal) = Some(evaluate_signal(signal, previous, history, current, policy));
    }

    flags
}

fn evaluate_signal(
    signal: Signal,
    previous: &VersionMetrics,
    history: &AggregateVersionMetrics,
    current: &VersionMetrics,
    policy: &ChangePolicy,
) -> bool {
    let introduced = |code: CodeType| {
        current.evasion.code_types.contains(&code) && !previous.evasion.code_types.contains(&code)
    };

    match signal {
        Signal::ObfuscatedCodeIntroduced => introduced(CodeType::Obfuscated),
        Signal::MinifiedCodeIntroduced => introduced(CodeType::Minified),
        Signal::InstallScriptsIntroduced => {
            previous.payload.install_scripts.is_empty() && !current.payload.install_scripts.is_empty()
        }
        Signal::InstallScriptsChanged => {
            !previous.payload.install_scripts.is_empty()
                && !current.payload.install_scripts.is_empty()
                && previous.payload.install_scripts != current.payload.install_scripts
        }
        Signal::CryptoAddressesChanged => {
            let seen = &history.crypto.crypto_addresses;
            !seen.is_empty()
                && current
                    .crypto
                    .crypto_addresses
                    .iter()
                    .any(|addr| !seen.contains(addr))
        }
        Signal::PackageReactivation => {
            previous.account.has_release_timestamp()
                && current.account.has_release_timestamp()
                && current.account.release_timestamp - previous.account.release_timestamp
                    > policy.reactivation_gap
        }
        Signal::CommitMismatch => {
            let registry = &current.account.registry_commit;
            let history_commit = &current.account.history_commit;
            !registry.is_empty() && !history_commit.is_empty() && registry != history_commit
        }
    }
}

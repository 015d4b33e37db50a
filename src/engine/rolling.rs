use crate::models::aggregate::AggregateVersionMetrics;
use crate::models::metric::NumericMetric;
use crate::models::version_metrics::VersionMetrics;

/// Fold `current` into the running history.
///
/// Uses the incremental mean `avg + (x - avg) / (n + 1)`, so history is never
/// replayed. Weighted ratios are averaged unweighted across versions, exactly
/// like every other field.
pub fn roll_forward(history: &mut AggregateVersionMetrics, current: &VersionMetrics) {
    let n = history.count;

    if n == 0 {
        for metric in NumericMetric::ALL {
            *history.average_mut(metric) = current.value(metric);
        }
        history.label = format!("all up to {} (included)", current.version);
    } else {
        let divisor = (n + 1) as f64;
        for metric in NumericMetric::ALL {
            let avg = history.average_mut(metric);
            *avg += (current.value(metric) - *avg) / divisor;
        }
        let last = history.last_version.as_deref().unwrap_or_default();
        history.label = format!(
            "all up to {last} (included) + {} (included)",
            current.version
        );
    }

    history
        .evasion
        .code_types
        .extend(current.evasion.code_types.iter().copied());
    history
        .payload
        .install_scripts
        .extend(current.payload.install_scripts.iter().cloned());
    history
        .crypto
        .crypto_addresses
        .extend(current.crypto.crypto_addresses.iter().cloned());

    history.last_version = Some(current.version.clone());
    history.count = n + 1;
}

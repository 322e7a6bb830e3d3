use crate::features::Dataset;

/// Equal-frequency time groups over the train pool.
///
/// Pool members are ranked by acquisition day (ties by pool position). A day
/// takes the group of the rank its first observation holds, so observations
/// sharing a day always share a group and only whole days are balanced across
/// groups. Returns one group id per pool entry, aligned with `pool`. Group 0
/// is the earliest; a group may stay empty when one day spans several quantiles.
pub fn time_groups(dataset: &Dataset, pool: &[usize], n_groups: usize) -> Vec<usize> {
    let n = pool.len();
    let n_groups = n_groups.max(1);
    let day = |p: usize| dataset.observation(pool[p]).day_ordinal();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&p| (day(p), p));

    let mut groups = vec![0; n];
    let mut current: Option<(i64, usize)> = None;
    for (rank, &p) in order.iter().enumerate() {
        let d = day(p);
        let group = match current {
            Some((cd, g)) if cd == d => g,
            _ => rank * n_groups / n,
        };
        current = Some((d, group));
        groups[p] = group;
    }
    groups
}

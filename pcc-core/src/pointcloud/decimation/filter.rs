/// Index-based decimation applied before any geometric transform.
///
/// Composition order is fixed: `skip_every` drops every N-th source point
/// (1-based, so N = 3 drops indices 2, 5, 8, ...), `keep_every` then keeps
/// the first survivor and every M-th survivor after it, and `limit` caps the
/// final count. A value of 0 or 1 disables the corresponding stage.
#[derive(Debug, Clone, Default)]
pub struct DecimationFilter {
    skip_every: u64,
    keep_every: u64,
    limit: u64,
    survivors: u64,
    kept: u64,
}

impl DecimationFilter {
    pub fn new(skip_every: u64, keep_every: u64, limit: u64) -> Self {
        Self {
            skip_every,
            keep_every,
            limit,
            survivors: 0,
            kept: 0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.skip_every < 2 && self.keep_every < 2 && self.limit == 0
    }

    /// Decides the fate of the source point at `index` (0-based file order).
    /// Must be called once per index, in order.
    pub fn admit(&mut self, index: u64) -> bool {
        if self.skip_every >= 2 && (index + 1) % self.skip_every == 0 {
            return false;
        }
        let survivor = self.survivors;
        self.survivors += 1;
        if self.keep_every >= 2 && survivor % self.keep_every != 0 {
            return false;
        }
        if self.limit > 0 && self.kept >= self.limit {
            return false;
        }
        self.kept += 1;
        true
    }

    /// True once `limit` is reached; the caller may stop reading early.
    pub fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.kept >= self.limit
    }

    pub fn kept(&self) -> u64 {
        self.kept
    }

    /// Post-decimation count for `total` source points, without iterating.
    pub fn effective_count(&self, total: u64) -> u64 {
        let mut count = total;
        if self.skip_every >= 2 {
            count -= total / self.skip_every;
        }
        if self.keep_every >= 2 {
            count = count.div_ceil(self.keep_every);
        }
        if self.limit > 0 {
            count = count.min(self.limit);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut DecimationFilter, total: u64) -> Vec<u64> {
        (0..total).filter(|&i| filter.admit(i)).collect()
    }

    #[test]
    fn passthrough_admits_everything() {
        let mut filter = DecimationFilter::new(0, 0, 0);
        assert!(filter.is_passthrough());
        assert_eq!(run(&mut filter, 10).len(), 10);
    }

    #[test]
    fn skip_drops_every_nth() {
        let mut filter = DecimationFilter::new(3, 0, 0);
        let kept = run(&mut filter, 9);
        assert_eq!(kept, vec![0, 1, 3, 4, 6, 7]);
        assert_eq!(filter.effective_count(9), 6);
    }

    #[test]
    fn keep_retains_first_then_every_mth_survivor() {
        let mut filter = DecimationFilter::new(0, 2, 0);
        let kept = run(&mut filter, 7);
        assert_eq!(kept, vec![0, 2, 4, 6]);
        assert_eq!(filter.effective_count(7), 4);
    }

    #[test]
    fn limit_caps_and_exhausts() {
        let mut filter = DecimationFilter::new(0, 0, 3);
        let kept = run(&mut filter, 10);
        assert_eq!(kept, vec![0, 1, 2]);
        assert!(filter.is_exhausted());
    }

    #[test]
    fn skip_then_keep_composition_matches_effective_count() {
        // 1000 points, skip every 3rd, then keep every 2nd survivor.
        let mut filter = DecimationFilter::new(3, 2, 0);
        let kept = run(&mut filter, 1000);
        assert_eq!(kept.len() as u64, filter.effective_count(1000));
        assert_eq!(kept.len(), 334); // ceil((1000 - 333) / 2)
    }

    #[test]
    fn effective_count_matches_admit_for_many_shapes() {
        for &(skip, keep, limit) in &[
            (0u64, 0u64, 0u64),
            (2, 0, 0),
            (0, 3, 0),
            (5, 4, 0),
            (2, 2, 10),
            (7, 3, 1),
        ] {
            for total in [0u64, 1, 2, 99, 1000] {
                let mut filter = DecimationFilter::new(skip, keep, limit);
                let kept = run(&mut filter, total).len() as u64;
                let predicted = DecimationFilter::new(skip, keep, limit).effective_count(total);
                assert_eq!(kept, predicted, "skip={skip} keep={keep} limit={limit} total={total}");
            }
        }
    }
}

//! Equal-count quantile tiers over normalized scores

use ndarray::ArrayView1;
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::error::{CltvError, Result};

/// Ordered tier; `tier == 0` is the highest-value group ("A").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Segment {
    pub tier: usize,
}

impl Segment {
    pub fn label(&self) -> String {
        char::from(b'A' + self.tier as u8).to_string()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Higher value compares greater: `A > B > C > D`.
impl Ord for Segment {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.tier.cmp(&self.tier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    segments: usize,
}

/// Tier assignment for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// One entry per input score, in input order
    pub segments: Vec<Segment>,
    /// Highest score of each non-empty tier below the top one, ascending
    pub boundaries: Vec<f64>,
    /// `(score, customer_id)` ascending
    ranking: Vec<(f64, i64)>,
    count: usize,
}

/// Equal-count bin of rank `position` among `n`, `0` lowest.
fn bin(position: usize, n: usize, k: usize) -> usize {
    ((position + 1) * k - 1) / n
}

impl Segmenter {
    pub fn new(segments: usize) -> Result<Self> {
        if !(1..=26).contains(&segments) {
            return Err(CltvError::Config(format!(
                "segment count must be between 1 and 26, got {}",
                segments
            )));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Rank customers by `(score, customer_id)` ascending and cut the ranking
    /// into `k` equal-count bins: position `p` of `n` lands in bin
    /// `⌊((p + 1)·k − 1) / n⌋`, so the top-ranked customer is always in tier "A".
    ///
    /// Equal scores on either side of a cut are split by customer id, so tier
    /// sizes differ by at most one and every tier is non-empty when `n >= k`.
    pub fn assign(&self, customer_ids: &[i64], scores: ArrayView1<'_, f64>) -> Result<Segmentation> {
        let n = scores.len();
        if customer_ids.len() != n {
            return Err(CltvError::InvalidInput(format!(
                "{} customer ids for {} scores",
                customer_ids.len(),
                n
            )));
        }
        if n == 0 {
            return Err(CltvError::EmptyCohort { stage: "segmentation" });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(CltvError::InvalidInput(
                "cannot segment non-finite scores".to_string(),
            ));
        }

        let k = self.segments;
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| {
            scores[i]
                .total_cmp(&scores[j])
                .then(customer_ids[i].cmp(&customer_ids[j]))
        });

        let mut segments = vec![Segment { tier: 0 }; n];
        let mut boundaries = Vec::with_capacity(k - 1);
        for (position, &index) in order.iter().enumerate() {
            let b = bin(position, n, k);
            segments[index] = Segment { tier: k - 1 - b };
            let last_in_bin = position + 1 == n || bin(position + 1, n, k) != b;
            if last_in_bin && b + 1 < k {
                boundaries.push(scores[index]);
            }
        }
        let ranking = order.iter().map(|&i| (scores[i], customer_ids[i])).collect();

        let segmentation = Segmentation {
            segments,
            boundaries,
            ranking,
            count: k,
        };
        info!(sizes = ?segmentation.sizes(), "assigned segments");
        Ok(segmentation)
    }
}

impl Segmentation {
    /// Customers per tier, highest tier first.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.count];
        for segment in &self.segments {
            sizes[segment.tier] += 1;
        }
        sizes
    }

    /// Tier of a score placed by rank among this run's `(score, customer_id)`
    /// pairs. A customer of the run gets back its own tier; any other takes
    /// the tier of the rank position it would be inserted at.
    pub fn tier_for(&self, score: f64, customer_id: i64) -> Segment {
        let n = self.ranking.len();
        let position = self
            .ranking
            .partition_point(|&(s, id)| s.total_cmp(&score).then(id.cmp(&customer_id)).is_lt())
            .min(n.saturating_sub(1));
        Segment {
            tier: self.count - 1 - bin(position, n.max(1), self.count),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

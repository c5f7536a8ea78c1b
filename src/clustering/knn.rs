//! Distance-weighted k-nearest-neighbour classifier.

use std::collections::BTreeMap;

use crate::geo_utils::PlanarPoint;
use crate::spatial_index::PointIndex;

#[derive(Debug, Clone)]
pub struct KnnClassifier {
    index: PointIndex,
    labels: Vec<usize>,
}

impl KnnClassifier {
    /// `labels[i]` is the class of `points[i]`.
    pub fn fit(points: &[PlanarPoint], labels: Vec<usize>) -> Self {
        Self {
            index: PointIndex::new(points),
            labels,
        }
    }

    /// Class with the largest summed inverse distance among the `k` nearest
    /// training points. Training points at zero distance outvote everything
    /// else. Ties go to the lowest label.
    pub fn predict(&self, point: &PlanarPoint, k: usize) -> Option<usize> {
        let neighbors = self.index.k_nearest(point, k);
        let exact = neighbors.iter().any(|nb| nb.distance == 0.0);

        let mut votes: BTreeMap<usize, f64> = BTreeMap::new();
        for nb in &neighbors {
            let weight = match (exact, nb.distance == 0.0) {
                (true, true) => 1.0,
                (true, false) => 0.0,
                _ => 1.0 / nb.distance,
            };
            *votes.entry(self.labels[nb.index]).or_default() += weight;
        }

        votes
            .into_iter()
            .fold(None, |best: Option<(usize, f64)>, (label, weight)| match best {
                Some((_, top)) if top >= weight => best,
                _ => Some((label, weight)),
            })
            .map(|(label, _)| label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> PlanarPoint {
        PlanarPoint::new(x, y)
    }

    #[test]
    fn test_nearer_class_outweighs_majority() {
        let points = vec![p(1.0, 0.0), p(20.0, 0.0), p(21.0, 0.0), p(22.0, 0.0)];
        let knn = KnnClassifier::fit(&points, vec![0, 1, 1, 1]);

        // 1/1 against 1/20 + 1/21 + 1/22
        assert_eq!(knn.predict(&p(0.0, 0.0), 4), Some(0));
        // With only the three nearest, class 1 still has two votes at ~20m
        assert_eq!(knn.predict(&p(0.0, 0.0), 3), Some(0));
    }

    #[test]
    fn test_exact_match_dominates() {
        let points = vec![p(0.0, 0.0), p(0.5, 0.0), p(0.5, 0.1)];
        let knn = KnnClassifier::fit(&points, vec![2, 1, 1]);
        assert_eq!(knn.predict(&p(0.0, 0.0), 3), Some(2));
    }

    #[test]
    fn test_tie_goes_to_lowest_label() {
        let points = vec![p(-5.0, 0.0), p(5.0, 0.0)];
        let knn = KnnClassifier::fit(&points, vec![3, 1]);
        assert_eq!(knn.predict(&p(0.0, 0.0), 2), Some(1));
    }

    #[test]
    fn test_empty_training_set() {
        let knn = KnnClassifier::fit(&[], Vec::new());
        assert_eq!(knn.predict(&p(0.0, 0.0), 5), None);
    }
}

//! Route sequencing for a single crew: nearest-neighbor construction followed
//! by 2-opt improvement over a travel-time matrix whose index 0 is the depot.

use tracing::debug;

use crate::defaults::TWO_OPT_MAX_ITERATIONS;
use crate::services::routing::TravelTimeMatrix;

/// Visiting order plus the drive legs it implies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOrder {
    /// Matrix indices 1..N in visiting order
    pub order: Vec<usize>,
    /// depot -> first, ..., last -> depot; empty when there are no stops
    pub legs: Vec<u64>,
    pub total_seconds: u64,
}

impl RouteOrder {
    pub fn empty() -> Self {
        Self {
            order: vec![],
            legs: vec![],
            total_seconds: 0,
        }
    }
}

/// Order the stops of `matrix` to approximately minimize round-trip time.
pub fn sequence(matrix: &TravelTimeMatrix) -> RouteOrder {
    sequence_with_limit(matrix, TWO_OPT_MAX_ITERATIONS)
}

pub fn sequence_with_limit(matrix: &TravelTimeMatrix, max_iterations: usize) -> RouteOrder {
    if matrix.size() <= 1 {
        return RouteOrder::empty();
    }

    let initial = nearest_neighbor(matrix);
    let initial_seconds = tour_seconds(matrix, &initial);
    let order = two_opt(matrix, initial, max_iterations);
    let legs = tour_legs(matrix, &order);
    let total_seconds = sum_saturating(&legs);

    debug!(
        "Sequenced {} stops: nearest-neighbor {}s, after 2-opt {}s",
        order.len(),
        initial_seconds,
        total_seconds
    );

    RouteOrder {
        order,
        legs,
        total_seconds,
    }
}

/// Greedy construction from the depot; ties go to the lowest index.
pub fn nearest_neighbor(matrix: &TravelTimeMatrix) -> Vec<usize> {
    let n = matrix.size();
    if n <= 1 {
        return vec![];
    }

    let mut order = Vec::with_capacity(n - 1);
    let mut visited = vec![false; n];
    visited[0] = true;
    let mut current = 0;

    while order.len() < n - 1 {
        let mut best_next = None;
        let mut best_seconds = u64::MAX;

        for candidate in 1..n {
            if visited[candidate] {
                continue;
            }
            let seconds = matrix.get(current, candidate);
            if seconds < best_seconds {
                best_seconds = seconds;
                best_next = Some(candidate);
            }
        }

        match best_next {
            Some(next) => {
                order.push(next);
                visited[next] = true;
                current = next;
            }
            None => break,
        }
    }

    order
}

/// 2-opt local search.
///
/// Each candidate reversal is priced over the whole round trip (including the
/// return to depot), so asymmetric matrices are handled exactly and a move is
/// only taken when it strictly shortens the tour.
pub fn two_opt(matrix: &TravelTimeMatrix, mut order: Vec<usize>, max_iterations: usize) -> Vec<usize> {
    let n = order.len();
    if n < 2 {
        return order;
    }

    let mut best = tour_seconds(matrix, &order);
    let mut improved = true;
    let mut iterations = 0;

    while improved && iterations < max_iterations {
        improved = false;
        iterations += 1;

        for i in 0..n - 1 {
            for j in i + 1..n {
                order[i..=j].reverse();
                let candidate = tour_seconds(matrix, &order);
                if candidate < best {
                    best = candidate;
                    improved = true;
                } else {
                    order[i..=j].reverse();
                }
            }
        }
    }

    order
}

/// Drive legs of a round trip through `order`.
pub fn tour_legs(matrix: &TravelTimeMatrix, order: &[usize]) -> Vec<u64> {
    if order.is_empty() {
        return vec![];
    }

    let mut legs = Vec::with_capacity(order.len() + 1);
    let mut previous = 0;
    for &stop in order {
        legs.push(matrix.get(previous, stop));
        previous = stop;
    }
    legs.push(matrix.get(previous, 0));
    legs
}

pub fn tour_seconds(matrix: &TravelTimeMatrix, order: &[usize]) -> u64 {
    sum_saturating(&tour_legs(matrix, order))
}

fn sum_saturating(legs: &[u64]) -> u64 {
    legs.iter().fold(0u64, |acc, leg| acc.saturating_add(*leg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::routing::UNREACHABLE;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// NN produces 0-1-2-3-0 (17s); the better tour is 0-1-3-2-0 (13s).
    fn crossing_matrix() -> TravelTimeMatrix {
        TravelTimeMatrix::from_rows(vec![
            vec![0, 1, 5, 10],
            vec![1, 0, 2, 3],
            vec![5, 2, 0, 4],
            vec![10, 3, 4, 0],
        ])
    }

    fn random_matrix(size: usize, rng: &mut StdRng) -> TravelTimeMatrix {
        let rows = (0..size)
            .map(|_| (0..size).map(|_| rng.gen_range(60..3600)).collect())
            .collect();
        TravelTimeMatrix::from_rows(rows)
    }

    fn is_permutation_of_stops(order: &[usize], size: usize) -> bool {
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        sorted == (1..size).collect::<Vec<_>>()
    }

    #[test]
    fn nearest_neighbor_follows_closest_stop() {
        assert_eq!(nearest_neighbor(&crossing_matrix()), vec![1, 2, 3]);
    }

    #[test]
    fn nearest_neighbor_breaks_ties_by_first_found() {
        let matrix = TravelTimeMatrix::from_rows(vec![
            vec![0, 5, 5, 5],
            vec![5, 0, 5, 5],
            vec![5, 5, 0, 5],
            vec![5, 5, 5, 0],
        ]);
        assert_eq!(nearest_neighbor(&matrix), vec![1, 2, 3]);
    }

    #[test]
    fn two_opt_removes_crossing() {
        let route = sequence(&crossing_matrix());
        assert_eq!(route.order, vec![1, 3, 2]);
        assert_eq!(route.legs, vec![1, 3, 4, 5]);
        assert_eq!(route.total_seconds, 13);
    }

    #[test]
    fn two_opt_never_increases_tour_and_keeps_every_stop() {
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..200 {
            let size = rng.gen_range(2..14);
            let matrix = random_matrix(size, &mut rng);

            let initial = nearest_neighbor(&matrix);
            let before = tour_seconds(&matrix, &initial);
            let improved = two_opt(&matrix, initial, TWO_OPT_MAX_ITERATIONS);
            let after = tour_seconds(&matrix, &improved);

            assert!(after <= before, "round {}: {} > {}", round, after, before);
            assert!(is_permutation_of_stops(&improved, size), "round {}: {:?}", round, improved);
        }
    }

    #[test]
    fn iteration_cap_still_returns_valid_tour() {
        let mut rng = StdRng::seed_from_u64(7);
        let matrix = random_matrix(12, &mut rng);
        let route = sequence_with_limit(&matrix, 1);
        assert!(is_permutation_of_stops(&route.order, 12));
        assert!(route.total_seconds <= tour_seconds(&matrix, &nearest_neighbor(&matrix)));
    }

    #[test]
    fn deterministic_for_same_matrix() {
        let mut rng = StdRng::seed_from_u64(3);
        let matrix = random_matrix(10, &mut rng);
        assert_eq!(sequence(&matrix), sequence(&matrix));
    }

    #[test]
    fn empty_and_single_stop() {
        let depot_only = TravelTimeMatrix::from_rows(vec![vec![0]]);
        assert_eq!(sequence(&depot_only), RouteOrder::empty());

        let one = TravelTimeMatrix::from_rows(vec![vec![0, 300], vec![240, 0]]);
        let route = sequence(&one);
        assert_eq!(route.order, vec![1]);
        assert_eq!(route.legs, vec![300, 240]);
        assert_eq!(route.total_seconds, 540);
    }

    #[test]
    fn unreachable_matrix_keeps_input_order() {
        let route = sequence(&TravelTimeMatrix::unreachable(5));
        assert_eq!(route.order, vec![1, 2, 3, 4]);
        assert_eq!(route.legs.len(), 5);
        assert!(route.legs.iter().all(|leg| *leg == UNREACHABLE));
    }
}

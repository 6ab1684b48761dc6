//! Travel-time matrix builder
//!
//! Requests above the provider's point ceiling are split into origin x
//! destination blocks, fetched independently and stitched back so the result
//! is indexed exactly like a single request. A failed block degrades to
//! `UNREACHABLE` cells instead of failing the whole build.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::{RoutingService, TravelTimeRows};
use crate::defaults::MATRIX_POINT_CEILING;
use crate::types::Coordinates;

/// Sentinel for pairs without a route. Large, but summing a handful of them
/// with saturating arithmetic stays well defined.
pub const UNREACHABLE: u64 = u64::MAX / 4;

/// Square matrix of travel seconds; index 0 is the depot by convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelTimeMatrix {
    seconds: Vec<Vec<u64>>,
    failed_blocks: usize,
}

impl TravelTimeMatrix {
    /// Build from explicit rows. Diagonal is forced to zero.
    pub fn from_rows(mut seconds: Vec<Vec<u64>>) -> Self {
        for (i, row) in seconds.iter_mut().enumerate() {
            if let Some(cell) = row.get_mut(i) {
                *cell = 0;
            }
        }
        Self { seconds, failed_blocks: 0 }
    }

    /// Every off-diagonal pair unreachable.
    pub fn unreachable(size: usize) -> Self {
        Self::from_rows(vec![vec![UNREACHABLE; size]; size])
    }

    pub fn size(&self) -> usize {
        self.seconds.len()
    }

    pub fn get(&self, from: usize, to: usize) -> u64 {
        self.seconds[from][to]
    }

    pub fn is_reachable(&self, from: usize, to: usize) -> bool {
        self.get(from, to) < UNREACHABLE
    }

    /// Number of provider blocks that failed while building this matrix.
    pub fn failed_blocks(&self) -> usize {
        self.failed_blocks
    }

    pub fn is_degraded(&self) -> bool {
        self.failed_blocks > 0
    }

    pub fn rows(&self) -> &[Vec<u64>] {
        &self.seconds
    }
}

/// Builds travel-time matrices through a routing provider
#[derive(Clone)]
pub struct MatrixBuilder {
    service: Arc<dyn RoutingService>,
    ceiling: usize,
}

impl MatrixBuilder {
    pub fn new(service: Arc<dyn RoutingService>) -> Self {
        Self::with_ceiling(service, MATRIX_POINT_CEILING)
    }

    pub fn with_ceiling(service: Arc<dyn RoutingService>, ceiling: usize) -> Self {
        Self {
            service,
            ceiling: ceiling.max(1),
        }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    pub async fn build(&self, points: &[Coordinates]) -> TravelTimeMatrix {
        let n = points.len();
        if n <= 1 {
            return TravelTimeMatrix::from_rows(vec![vec![0; n]; n]);
        }

        let ranges: Vec<(usize, usize)> = (0..n)
            .step_by(self.ceiling)
            .map(|start| (start, (start + self.ceiling).min(n)))
            .collect();

        let blocks: Vec<((usize, usize), (usize, usize))> = ranges
            .iter()
            .flat_map(|origin| ranges.iter().map(move |dest| (*origin, *dest)))
            .collect();

        debug!(
            "Building {}x{} travel-time matrix via {} in {} block(s)",
            n,
            n,
            self.service.name(),
            blocks.len()
        );

        let responses = join_all(blocks.iter().map(|((o0, o1), (d0, d1))| {
            self.service.travel_times(&points[*o0..*o1], &points[*d0..*d1])
        }))
        .await;

        let mut seconds = vec![vec![UNREACHABLE; n]; n];
        let mut failed_blocks = 0;

        for (((o0, o1), (d0, d1)), response) in blocks.iter().zip(responses) {
            let rows = match response {
                Ok(rows) if block_shape_matches(&rows, o1 - o0, d1 - d0) => rows,
                Ok(_) => {
                    warn!(
                        "{} returned a malformed block [{}..{}]x[{}..{}]",
                        self.service.name(),
                        o0,
                        o1,
                        d0,
                        d1
                    );
                    failed_blocks += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        "{} failed for block [{}..{}]x[{}..{}]: {}",
                        self.service.name(),
                        o0,
                        o1,
                        d0,
                        d1,
                        e
                    );
                    failed_blocks += 1;
                    continue;
                }
            };

            for (i, row) in rows.into_iter().enumerate() {
                for (j, cell) in row.into_iter().enumerate() {
                    seconds[o0 + i][d0 + j] = cell.map_or(UNREACHABLE, |s| s.min(UNREACHABLE));
                }
            }
        }

        let mut matrix = TravelTimeMatrix::from_rows(seconds);
        matrix.failed_blocks = failed_blocks;
        matrix
    }
}

fn block_shape_matches(rows: &TravelTimeRows, sources: usize, targets: usize) -> bool {
    rows.len() == sources && rows.iter().all(|row| row.len() == targets)
}

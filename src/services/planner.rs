//! Async provider work against a shared [`ScheduleStore`].
//!
//! Every task captures what it needs under the store lock, releases the
//! lock for the provider call, then re-locks and applies through the
//! store's re-validating entry points. The lock is never held across an
//! await.
//!
//! The full-day pass runs geocoding, matrix build, clustering of the
//! unassigned pool and per-crew routing, in that order. A crew whose matrix
//! cannot be built is skipped and left stale; the pass goes on.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::services::geocoding::{CachedGeocoder, GeocodeOutcome};
use crate::services::routing::{MatrixBuilder, TravelTimeMatrix, UNREACHABLE};
use crate::services::sequencer::sequence;
use crate::services::store::{MutationOutcome, RouteRequest, ScheduleStore};
use crate::types::{normalize_address, Advisory, AdvisoryKind, Coordinates, DriveTime, JobId, LaneId};

pub type SharedStore = Arc<Mutex<ScheduleStore>>;

pub fn shared(store: ScheduleStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Coarse progress of a full-day pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlanProgress {
    #[serde(rename_all = "camelCase")]
    Geocoding { pending: usize },
    #[serde(rename_all = "camelCase")]
    MatrixBuild { lanes: usize },
    #[serde(rename_all = "camelCase")]
    Clustering { unassigned: usize },
    #[serde(rename_all = "camelCase")]
    Routing { lane_id: LaneId, completed: usize, total: usize },
    #[serde(rename_all = "camelCase")]
    Completed { routed: usize, skipped: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeocodeSummary {
    pub resolved: usize,
    pub not_found: usize,
    pub unavailable: usize,
    /// Results dropped because the job changed while the lookup ran
    pub stale: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Routed { total_seconds: u64 },
    /// Provider could not produce any travel times; lane left stale
    Skipped,
    /// Lane changed while the route was computed; result dropped
    Stale,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub geocoding: GeocodeSummary,
    pub clustered: usize,
    pub routed: Vec<LaneId>,
    pub skipped: Vec<LaneId>,
    pub stale: Vec<LaneId>,
}

/// Matrix for one lane: index 0 is the depot, index k the k-th located job
pub struct LaneMatrix {
    pub request: RouteRequest,
    pub matrix: TravelTimeMatrix,
    /// Positions (in `request.job_ids`) of jobs with coordinates, matrix order
    located: Vec<usize>,
}

/// Route computed off-lock, waiting to be applied
pub struct ComputedRoute {
    pub request: RouteRequest,
    pub ordered: Vec<JobId>,
    pub drive: DriveTime,
    /// Some cells could not be fetched; their legs count as zero
    pub degraded: bool,
}

pub struct Planner {
    geocoder: CachedGeocoder,
    matrix: MatrixBuilder,
    depot: Coordinates,
}

impl Planner {
    pub fn new(geocoder: CachedGeocoder, matrix: MatrixBuilder, depot: Coordinates) -> Self {
        Self { geocoder, matrix, depot }
    }

    // ---------------------------------------------------------------------
    // Geocoding
    // ---------------------------------------------------------------------

    /// Resolve coordinates for every job that has an address but none yet.
    pub async fn geocode_pending(&self, store: &SharedStore) -> GeocodeSummary {
        let pending: Vec<(JobId, String)> = {
            let store = store.lock();
            store
                .schedule()
                .all_jobs()
                .filter(|job| job.coordinates.is_none() && !job.address.trim().is_empty())
                .map(|job| (job.id, job.address.clone()))
                .collect()
        };
        if pending.is_empty() {
            return GeocodeSummary::default();
        }
        // one lookup per distinct address, fanned out to every job there
        let mut groups: Vec<(String, Vec<(JobId, String)>)> = Vec::new();
        let mut index: BTreeMap<String, usize> = BTreeMap::new();
        for (job_id, address) in pending {
            let key = normalize_address(&address);
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push((address.clone(), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push((job_id, address));
        }
        debug!("Geocoding {} distinct address(es)", groups.len());

        let outcomes = join_all(groups.iter().map(|(address, _)| self.geocoder.resolve(address))).await;

        let mut summary = GeocodeSummary::default();
        let mut outage: Option<String> = None;
        let mut store = store.lock();

        for ((_, jobs), outcome) in groups.iter().zip(outcomes) {
            match outcome {
                GeocodeOutcome::Found(coordinates) => {
                    for (job_id, address) in jobs {
                        match store.apply_coordinates(*job_id, address, coordinates) {
                            MutationOutcome::Applied => summary.resolved += 1,
                            MutationOutcome::Stale => summary.stale += 1,
                        }
                    }
                }
                GeocodeOutcome::NotFound => {
                    for (_, address) in jobs {
                        summary.not_found += 1;
                        store.push_advisory(Advisory::new(
                            AdvisoryKind::AddressNotFound,
                            format!("No location found for '{}'", address),
                        ));
                    }
                }
                GeocodeOutcome::Unavailable(message) => {
                    summary.unavailable += jobs.len();
                    outage.get_or_insert(message);
                }
            }
        }

        if let Some(message) = outage {
            store.push_advisory(Advisory::new(
                AdvisoryKind::GeocodingUnavailable,
                format!(
                    "Geocoding unavailable ({}); {} address(es) left without a location",
                    message, summary.unavailable
                ),
            ));
        }
        summary
    }

    // ---------------------------------------------------------------------
    // Routing
    // ---------------------------------------------------------------------

    /// Travel-time matrix for the lane captured in `request`.
    pub async fn build_matrix(&self, request: RouteRequest) -> LaneMatrix {
        let located: Vec<usize> = request
            .points
            .iter()
            .enumerate()
            .filter_map(|(i, point)| point.map(|_| i))
            .collect();
        let points: Vec<Coordinates> = std::iter::once(self.depot)
            .chain(located.iter().filter_map(|&i| request.points[i]))
            .collect();

        let matrix = self.matrix.build(&points).await;
        LaneMatrix { request, matrix, located }
    }

    /// Sequence a lane. `None` when the matrix holds no usable travel time.
    ///
    /// Jobs without coordinates keep their relative order after the routed
    /// jobs, with zero-length legs.
    pub fn compute_route(&self, lane: LaneMatrix) -> Option<ComputedRoute> {
        let LaneMatrix { request, matrix, located } = lane;

        if !located.is_empty() && !has_any_route(&matrix) {
            return None;
        }

        let route = sequence(&matrix);
        let mut ordered: Vec<JobId> = route
            .order
            .iter()
            .map(|&m| request.job_ids[located[m - 1]])
            .collect();
        ordered.extend(
            request
                .job_ids
                .iter()
                .enumerate()
                .filter(|(i, _)| !located.contains(i))
                .map(|(_, id)| *id),
        );

        let reachable = |seconds: u64| if seconds < UNREACHABLE { seconds } else { 0 };
        let mut legs: Vec<u64> = Vec::with_capacity(request.job_ids.len() + 1);
        if !request.job_ids.is_empty() {
            let (outbound, back) = match route.legs.split_last() {
                Some((back, outbound)) => (outbound.to_vec(), *back),
                None => (Vec::new(), 0),
            };
            legs.extend(outbound.into_iter().map(reachable));
            legs.resize(request.job_ids.len(), 0);
            legs.push(reachable(back));
        }

        Some(ComputedRoute {
            degraded: matrix.is_degraded(),
            request,
            ordered,
            drive: DriveTime::from_legs(legs),
        })
    }

    /// Write a computed route back if its lane is unchanged.
    pub fn apply_route(store: &SharedStore, computed: ComputedRoute) -> RouteOutcome {
        let mut store = store.lock();
        let lane_id = computed.request.lane_id.clone();
        let total_seconds = computed.drive.total_seconds;

        match store.apply_route(&computed.request, &computed.ordered, computed.drive) {
            MutationOutcome::Applied => {
                if computed.degraded {
                    store.push_advisory(Advisory::new(
                        AdvisoryKind::RoutingUnavailable,
                        format!("Some travel times for {} are missing; its drive time is understated", lane_id),
                    ));
                }
                RouteOutcome::Routed { total_seconds }
            }
            MutationOutcome::Stale => RouteOutcome::Stale,
        }
    }

    fn skip_lane(store: &SharedStore, lane_id: &LaneId, provider: &str) -> RouteOutcome {
        warn!("No travel times for lane {} from {}; leaving its drive time stale", lane_id, provider);
        store.lock().push_advisory(Advisory::new(
            AdvisoryKind::RoutingUnavailable,
            format!("Routing unavailable for {}; drive time not updated", lane_id),
        ));
        RouteOutcome::Skipped
    }

    /// Recompute one lane's order and drive time.
    pub async fn route_lane(&self, store: &SharedStore, lane_id: &LaneId) -> RouteOutcome {
        let request = { store.lock().route_request(lane_id) };
        let Some(request) = request else {
            return RouteOutcome::Stale;
        };
        let lane = self.build_matrix(request).await;
        self.finish_lane(store, lane)
    }

    fn finish_lane(&self, store: &SharedStore, lane: LaneMatrix) -> RouteOutcome {
        let lane_id = lane.request.lane_id.clone();
        match self.compute_route(lane) {
            Some(computed) => Self::apply_route(store, computed),
            None => Self::skip_lane(store, &lane_id, self.matrix.service_name()),
        }
    }

    /// Route every crew lane whose drive time is stale.
    pub async fn refresh_stale(&self, store: &SharedStore) -> Vec<(LaneId, RouteOutcome)> {
        let stale = { store.lock().stale_lanes() };
        let mut outcomes = Vec::with_capacity(stale.len());
        for lane_id in stale {
            let outcome = self.route_lane(store, &lane_id).await;
            outcomes.push((lane_id, outcome));
        }
        outcomes
    }

    // ---------------------------------------------------------------------
    // Full-day pass
    // ---------------------------------------------------------------------

    pub async fn optimize_day(&self, store: &SharedStore, progress: Option<&UnboundedSender<PlanProgress>>) -> PlanSummary {
        let report = |event: PlanProgress| {
            if let Some(sender) = progress {
                let _ = sender.send(event);
            }
        };
        let mut summary = PlanSummary::default();

        // geocoding
        let pending = {
            let store = store.lock();
            store
                .schedule()
                .all_jobs()
                .filter(|job| job.coordinates.is_none() && !job.address.trim().is_empty())
                .count()
        };
        report(PlanProgress::Geocoding { pending });
        summary.geocoding = self.geocode_pending(store).await;

        // matrix build, all crews at once
        let requests: Vec<RouteRequest> = {
            let store = store.lock();
            let lane_ids: Vec<LaneId> = store.schedule().crew_lanes().map(|lane| lane.id.clone()).collect();
            lane_ids.iter().filter_map(|id| store.route_request(id)).collect()
        };
        report(PlanProgress::MatrixBuild { lanes: requests.len() });
        let matrices: Vec<LaneMatrix> = join_all(requests.into_iter().map(|request| self.build_matrix(request))).await;
        let mut prebuilt: BTreeMap<LaneId, LaneMatrix> = matrices
            .into_iter()
            .map(|lane| (lane.request.lane_id.clone(), lane))
            .collect();

        // clustering of the unassigned pool
        let unassigned = { store.lock().schedule().unassigned.len() };
        report(PlanProgress::Clustering { unassigned });
        summary.clustered = { store.lock().assign_unassigned() };

        // per-crew routing
        let lane_ids: Vec<LaneId> = { store.lock().schedule().crew_lanes().map(|lane| lane.id.clone()).collect() };
        let total = lane_ids.len();
        for (i, lane_id) in lane_ids.into_iter().enumerate() {
            report(PlanProgress::Routing {
                lane_id: lane_id.clone(),
                completed: i,
                total,
            });

            let current = { store.lock().route_request(&lane_id) };
            let outcome = match (prebuilt.remove(&lane_id), current) {
                // lane unchanged since its matrix was built
                (Some(lane), Some(current)) if lane.request == current => self.finish_lane(store, lane),
                (_, Some(current)) => {
                    let lane = self.build_matrix(current).await;
                    self.finish_lane(store, lane)
                }
                (_, None) => RouteOutcome::Stale,
            };

            match outcome {
                RouteOutcome::Routed { .. } => summary.routed.push(lane_id),
                RouteOutcome::Skipped => summary.skipped.push(lane_id),
                RouteOutcome::Stale => summary.stale.push(lane_id),
            }
        }

        report(PlanProgress::Completed {
            routed: summary.routed.len(),
            skipped: summary.skipped.len(),
        });
        info!(
            "Optimized {}: {} geocoded, {} clustered, {} routed, {} skipped",
            store.lock().date(),
            summary.geocoding.resolved,
            summary.clustered,
            summary.routed.len(),
            summary.skipped.len()
        );
        summary
    }
}

/// At least one off-diagonal pair has a travel time.
fn has_any_route(matrix: &TravelTimeMatrix) -> bool {
    let n = matrix.size();
    (0..n).any(|i| (0..n).any(|j| i != j && matrix.is_reachable(i, j)))
}

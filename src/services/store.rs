//! Schedule Store
//!
//! Owns one date's `{Schedule, DriveTimeMap}` pair. Every structural edit
//! pushes the pre-edit pair onto a bounded undo stack and clears redo.
//! Results of async provider work (`apply_route`, `apply_coordinates`) are
//! re-validated against current state and dropped when their target has
//! moved on; they are not undoable edits of their own.
//!
//! Mutations never fail on a missing job or lane: they report
//! [`MutationOutcome::Stale`] and leave state and stacks untouched.

use std::collections::{BTreeSet, VecDeque};

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::defaults::UNDO_DEPTH;
use crate::services::conflicts::detect_conflicts;
use crate::services::outputs::technician_records;
use crate::services::persistence::DebouncedPersister;
use crate::services::placement::{place_lane, DayWindow, PlacedJob};
use crate::services::redistribution::{redistribute, target_lanes, TargetLane};
use crate::services::roster::build_lanes;
use crate::types::{
    normalize_job_number, Advisory, ConflictWarning, Coordinates, DriveTime, DriveTimeMap, ExternalBooking, Job,
    JobId, JobLocation, JobType, LaneId, LaneKind, Provenance, Roster, Schedule, ScheduleDocument,
    TechnicianRecord,
};

/// Full-state copy used for undo/redo
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub schedule: Schedule,
    pub drive_times: DriveTimeMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// Target job or lane is gone (or no longer matches); nothing changed
    Stale,
}

impl MutationOutcome {
    pub fn is_applied(self) -> bool {
        self == MutationOutcome::Applied
    }
}

/// Where a moved job should land
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Lane(LaneId),
    Unassigned,
}

/// Result of merging a booking feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    /// Existing manual jobs with the same job number, now tied to the booking
    pub attached: usize,
    /// Records already merged earlier
    pub skipped: usize,
}

/// Captured state of a lane for an async routing task
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub lane_id: LaneId,
    pub job_ids: Vec<JobId>,
    pub points: Vec<Option<Coordinates>>,
}

pub struct ScheduleStore {
    schedule: Schedule,
    drive_times: DriveTimeMap,
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
    undo_depth: usize,
    advisories: Vec<Advisory>,
    window: DayWindow,
    /// Bumped on every state change
    edit_revision: u64,
    /// `edit_revision` last handed to the persister; `None` if never stored
    submitted_revision: Option<u64>,
    /// Revision of the stored document this session last loaded or wrote
    stored_revision: u64,
}

impl ScheduleStore {
    pub fn new(schedule: Schedule, drive_times: DriveTimeMap, window: DayWindow) -> Self {
        Self {
            schedule,
            drive_times,
            undo: VecDeque::with_capacity(UNDO_DEPTH),
            redo: Vec::new(),
            undo_depth: UNDO_DEPTH,
            advisories: Vec::new(),
            window,
            edit_revision: 0,
            submitted_revision: None,
            stored_revision: 0,
        }
    }

    /// Empty schedule for a date with no stored data.
    pub fn empty(date: NaiveDate, roster: Roster, window: DayWindow) -> Self {
        let lanes = build_lanes(&roster);
        Self::new(Schedule::new(date, roster, lanes), DriveTimeMap::new(), window)
    }

    pub fn from_document(document: ScheduleDocument, window: DayWindow) -> Self {
        let mut store = Self::new(document.schedule, document.drive_times, window);
        store.stored_revision = document.revision;
        store.submitted_revision = Some(0);
        store
    }

    pub fn with_undo_depth(mut self, depth: usize) -> Self {
        self.undo_depth = depth.max(1);
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn drive_times(&self) -> &DriveTimeMap {
        &self.drive_times
    }

    pub fn window(&self) -> &DayWindow {
        &self.window
    }

    pub fn date(&self) -> NaiveDate {
        self.schedule.date
    }

    pub fn edit_revision(&self) -> u64 {
        self.edit_revision
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            schedule: self.schedule.clone(),
            drive_times: self.drive_times.clone(),
        }
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    // ---------------------------------------------------------------------
    // Read-only derivations
    // ---------------------------------------------------------------------

    pub fn conflicts(&self) -> Vec<ConflictWarning> {
        detect_conflicts(&self.schedule, &self.drive_times, &self.window)
    }

    pub fn placement(&self, lane_id: &LaneId) -> Vec<PlacedJob> {
        place_lane(&self.schedule, &self.drive_times, lane_id, &self.window)
    }

    /// Crew lanes whose drive time is unknown.
    pub fn stale_lanes(&self) -> Vec<LaneId> {
        self.schedule
            .crew_lanes()
            .filter(|lane| !self.drive_times.contains_key(&lane.id))
            .map(|lane| lane.id.clone())
            .collect()
    }

    /// Document for the persister; `revision` is the one last stored.
    pub fn document(&self) -> ScheduleDocument {
        ScheduleDocument {
            date: self.schedule.date,
            revision: self.stored_revision,
            schedule: self.schedule.clone(),
            drive_times: self.drive_times.clone(),
            saved_at: Utc::now(),
        }
    }

    pub fn mark_stored(&mut self, revision: u64) {
        self.stored_revision = self.stored_revision.max(revision);
    }

    /// Queue the current state if it changed since the last submit. Picks up
    /// the revision the persister last wrote for this date first, so the
    /// queued document carries it.
    pub fn persist_if_changed(&mut self, persister: &DebouncedPersister) -> bool {
        if let Some(written) = persister.written_revision(self.date()) {
            self.mark_stored(written);
        }
        if self.submitted_revision == Some(self.edit_revision) {
            return false;
        }
        persister.submit(self.document());
        self.submitted_revision = Some(self.edit_revision);
        true
    }

    // ---------------------------------------------------------------------
    // Advisories
    // ---------------------------------------------------------------------

    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    pub fn push_advisory(&mut self, advisory: Advisory) {
        info!("Advisory: {}", advisory.message);
        self.advisories.push(advisory);
    }

    pub fn dismiss_advisory(&mut self, id: Uuid) -> bool {
        let before = self.advisories.len();
        self.advisories.retain(|advisory| advisory.id != id);
        self.advisories.len() != before
    }

    // ---------------------------------------------------------------------
    // Undo / redo
    // ---------------------------------------------------------------------

    pub fn undo(&mut self) -> MutationOutcome {
        let Some(previous) = self.undo.pop_back() else {
            return MutationOutcome::Stale;
        };
        let current = self.replace_state(previous);
        self.redo.push(current);
        self.edit_revision += 1;
        MutationOutcome::Applied
    }

    pub fn redo(&mut self) -> MutationOutcome {
        let Some(next) = self.redo.pop() else {
            return MutationOutcome::Stale;
        };
        let current = self.replace_state(next);
        self.push_undo(current);
        self.edit_revision += 1;
        MutationOutcome::Applied
    }

    fn replace_state(&mut self, snapshot: Snapshot) -> Snapshot {
        Snapshot {
            schedule: std::mem::replace(&mut self.schedule, snapshot.schedule),
            drive_times: std::mem::replace(&mut self.drive_times, snapshot.drive_times),
        }
    }

    fn push_undo(&mut self, snapshot: Snapshot) {
        if self.undo.len() == self.undo_depth {
            self.undo.pop_front();
        }
        self.undo.push_back(snapshot);
    }

    /// Record the pre-edit state. Call only once the edit is known to apply.
    fn checkpoint(&mut self) {
        let snapshot = self.snapshot();
        self.push_undo(snapshot);
        self.redo.clear();
        self.edit_revision += 1;
    }

    fn invalidate(&mut self, lane_id: &LaneId) {
        self.drive_times.remove(lane_id);
    }

    fn lane_kind(&self, lane_id: &LaneId) -> Option<LaneKind> {
        self.schedule.lane(lane_id).map(|lane| lane.kind)
    }

    // ---------------------------------------------------------------------
    // Job edits
    // ---------------------------------------------------------------------

    /// Append a job to a lane, or to the unassigned pool.
    pub fn add_job(&mut self, job: Job, destination: Destination) -> MutationOutcome {
        if self.schedule.locate(job.id).is_some() || !self.accepts(&job, &destination) {
            return MutationOutcome::Stale;
        }

        self.checkpoint();
        match destination {
            Destination::Lane(lane_id) => {
                self.invalidate(&lane_id);
                self.schedule.assignments.entry(lane_id).or_default().push(job);
            }
            Destination::Unassigned => self.schedule.unassigned.push(job),
        }
        MutationOutcome::Applied
    }

    pub fn remove_job(&mut self, job_id: JobId) -> MutationOutcome {
        if self.schedule.locate(job_id).is_none() {
            return MutationOutcome::Stale;
        }

        self.checkpoint();
        if let Some((JobLocation::Lane { lane_id, .. }, _)) = self.schedule.take_job(job_id) {
            self.invalidate(&lane_id);
        }
        MutationOutcome::Applied
    }

    /// Move a job to `index` in the destination (clamped to its length).
    pub fn move_job(&mut self, job_id: JobId, destination: Destination, index: usize) -> MutationOutcome {
        let Some(job) = self.schedule.find_job(job_id) else {
            return MutationOutcome::Stale;
        };
        if !self.accepts(job, &destination) {
            return MutationOutcome::Stale;
        }

        self.checkpoint();
        let Some((from, job)) = self.schedule.take_job(job_id) else {
            return MutationOutcome::Stale;
        };
        if let JobLocation::Lane { lane_id, .. } = &from {
            self.invalidate(lane_id);
        }

        let list = match &destination {
            Destination::Lane(lane_id) => {
                self.drive_times.remove(lane_id);
                self.schedule.assignments.entry(lane_id.clone()).or_default()
            }
            Destination::Unassigned => &mut self.schedule.unassigned,
        };
        let index = index.min(list.len());
        list.insert(index, job);
        MutationOutcome::Applied
    }

    /// Edit a job in place. Changing the address clears its coordinates.
    pub fn update_job(&mut self, job_id: JobId, edit: impl FnOnce(&mut Job)) -> MutationOutcome {
        let Some(location) = self.schedule.locate(job_id) else {
            return MutationOutcome::Stale;
        };

        self.checkpoint();
        if let JobLocation::Lane { lane_id, .. } = &location {
            self.invalidate(lane_id);
        }
        if let Some(job) = self.schedule.job_mut(job_id) {
            let address = job.address.clone();
            let provenance = job.provenance.clone();
            edit(job);
            job.id = job_id;
            job.provenance = provenance;
            if job.address != address {
                job.coordinates = None;
            }
        }
        MutationOutcome::Applied
    }

    /// Put a display copy of a crew job into a manager lane.
    pub fn link_to_manager(&mut self, job_id: JobId, manager_lane: &LaneId) -> MutationOutcome {
        let in_crew_lane = matches!(
            self.schedule.locate(job_id),
            Some(JobLocation::Lane { lane_id, .. }) if self.lane_kind(&lane_id) == Some(LaneKind::Crew)
        );
        if !in_crew_lane {
            return MutationOutcome::Stale;
        }
        let Some(source) = self.schedule.find_job(job_id) else {
            return MutationOutcome::Stale;
        };
        if source.is_linked_copy() || self.lane_kind(manager_lane) != Some(LaneKind::Manager) {
            return MutationOutcome::Stale;
        }
        let copy = source.linked_copy();

        self.checkpoint();
        self.schedule.assignments.entry(manager_lane.clone()).or_default().push(copy);
        MutationOutcome::Applied
    }

    /// Linked copies only live in manager lanes; real jobs never do.
    fn accepts(&self, job: &Job, destination: &Destination) -> bool {
        match destination {
            Destination::Unassigned => !job.is_linked_copy(),
            Destination::Lane(lane_id) => match self.lane_kind(lane_id) {
                Some(LaneKind::Crew) => !job.is_linked_copy(),
                Some(LaneKind::Manager) => job.is_linked_copy(),
                None => false,
            },
        }
    }

    // ---------------------------------------------------------------------
    // Bulk edits
    // ---------------------------------------------------------------------

    /// Move every job of `source` onto the other crew lanes.
    pub fn redistribute_lane(&mut self, source: &LaneId) -> MutationOutcome {
        if self.lane_kind(source) != Some(LaneKind::Crew) || self.schedule.jobs(source).is_empty() {
            return MutationOutcome::Stale;
        }
        let plan = {
            let targets = target_lanes(&self.schedule, &self.drive_times, source);
            if targets.is_empty() {
                return MutationOutcome::Stale;
            }
            redistribute(self.schedule.jobs(source), &targets, self.window.length_hours())
        };

        self.checkpoint();
        let mut moving = self.schedule.assignments.get_mut(source).map(std::mem::take).unwrap_or_default();
        self.invalidate(source);

        for (job_id, lane_id) in plan.assignments {
            if let Some(position) = moving.iter().position(|job| job.id == job_id) {
                let job = moving.remove(position);
                self.invalidate(&lane_id);
                self.schedule.assignments.entry(lane_id).or_default().push(job);
            }
        }
        info!("Redistributed lane {} across {} crews", source, self.schedule.crew_lanes().count() - 1);
        MutationOutcome::Applied
    }

    /// Spread unassigned jobs over the crew lanes by load and geography.
    /// Jobs without coordinates stay in the pool.
    pub fn assign_unassigned(&mut self) -> usize {
        let pool: Vec<Job> = self
            .schedule
            .unassigned
            .iter()
            .filter(|job| job.coordinates.is_some())
            .cloned()
            .collect();
        if pool.is_empty() {
            return 0;
        }

        let plan = {
            let targets: Vec<TargetLane<'_>> = self
                .schedule
                .crew_lanes()
                .map(|lane| TargetLane {
                    lane_id: lane.id.clone(),
                    jobs: self.schedule.jobs(&lane.id),
                    drive_hours: self.drive_times.get(&lane.id).map_or(0.0, DriveTime::total_hours),
                })
                .collect();
            if targets.is_empty() {
                return 0;
            }
            redistribute(&pool, &targets, self.window.length_hours())
        };

        self.checkpoint();
        let mut assigned = 0;
        for (job_id, lane_id) in plan.assignments {
            if let Some(position) = self.schedule.unassigned.iter().position(|job| job.id == job_id) {
                let job = self.schedule.unassigned.remove(position);
                self.invalidate(&lane_id);
                self.schedule.assignments.entry(lane_id).or_default().push(job);
                assigned += 1;
            }
        }
        assigned
    }

    /// Exchange the job lists and drive times of two crew lanes.
    pub fn swap_lanes(&mut self, a: &LaneId, b: &LaneId) -> MutationOutcome {
        if a == b || self.lane_kind(a) != Some(LaneKind::Crew) || self.lane_kind(b) != Some(LaneKind::Crew) {
            return MutationOutcome::Stale;
        }

        self.checkpoint();
        let jobs_a = self.schedule.assignments.remove(a).unwrap_or_default();
        let jobs_b = self.schedule.assignments.remove(b).unwrap_or_default();
        self.schedule.assignments.insert(a.clone(), jobs_b);
        self.schedule.assignments.insert(b.clone(), jobs_a);

        let drive_a = self.drive_times.remove(a);
        let drive_b = self.drive_times.remove(b);
        if let Some(drive) = drive_b {
            self.drive_times.insert(a.clone(), drive);
        }
        if let Some(drive) = drive_a {
            self.drive_times.insert(b.clone(), drive);
        }
        MutationOutcome::Applied
    }

    /// Merge bookings as pinned jobs. Repeated merges of a record are no-ops.
    pub fn merge_external(&mut self, bookings: &[ExternalBooking]) -> MergeReport {
        let mut report = MergeReport::default();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let fresh: Vec<&ExternalBooking> = bookings
            .iter()
            .filter(|booking| {
                let duplicate =
                    self.schedule.contains_external_record(&booking.record_id) || !seen.insert(booking.record_id.as_str());
                if duplicate {
                    report.skipped += 1;
                }
                !duplicate
            })
            .collect();
        if fresh.is_empty() {
            return report;
        }

        self.checkpoint();
        for booking in fresh {
            if self.attach_booking(booking) {
                report.attached += 1;
                continue;
            }

            let job = job_from_booking(booking);
            let lane_id = booking
                .crew_name
                .as_deref()
                .and_then(|name| self.schedule.lane_by_name(name))
                .filter(|lane| lane.is_crew())
                .map(|lane| lane.id.clone());
            match lane_id {
                Some(lane_id) => {
                    self.invalidate(&lane_id);
                    self.schedule.assignments.entry(lane_id).or_default().push(job);
                }
                None => self.schedule.unassigned.push(job),
            }
            report.added += 1;
        }

        info!(
            "Merged booking feed for {}: {} added, {} attached, {} skipped",
            self.schedule.date, report.added, report.attached, report.skipped
        );
        report
    }

    /// Tie a booking to a manual job with the same job number, if one exists.
    fn attach_booking(&mut self, booking: &ExternalBooking) -> bool {
        let wanted = normalize_job_number(&booking.job_number);
        if wanted.is_empty() {
            return false;
        }
        let Some(job_id) = self
            .schedule
            .all_jobs()
            .find(|job| job.provenance == Provenance::Manual && normalize_job_number(&job.job_number) == wanted)
            .map(|job| job.id)
        else {
            return false;
        };

        if let Some(JobLocation::Lane { lane_id, .. }) = self.schedule.locate(job_id) {
            self.invalidate(&lane_id);
        }
        if let Some(job) = self.schedule.job_mut(job_id) {
            job.provenance = Provenance::ExternalBooking {
                record_id: booking.record_id.clone(),
            };
            if booking.appointment.is_some() {
                job.pinned_start = booking.appointment;
            }
        }
        true
    }

    /// Rebuild lanes from a new roster. Jobs in lanes that disappear go to
    /// the unassigned pool; display copies in removed manager lanes are dropped.
    pub fn set_roster(&mut self, roster: Roster) -> MutationOutcome {
        let lanes = build_lanes(&roster);
        if lanes == self.schedule.lanes && roster == self.schedule.roster {
            return MutationOutcome::Stale;
        }

        self.checkpoint();
        let kept: BTreeSet<LaneId> = lanes.iter().map(|lane| lane.id.clone()).collect();
        let removed: Vec<LaneId> = self
            .schedule
            .assignments
            .keys()
            .filter(|id| !kept.contains(*id))
            .cloned()
            .collect();

        for lane_id in removed {
            let jobs = self.schedule.assignments.remove(&lane_id).unwrap_or_default();
            debug!("Lane {} left the roster with {} jobs", lane_id, jobs.len());
            self.schedule
                .unassigned
                .extend(jobs.into_iter().filter(|job| !job.is_linked_copy()));
            self.drive_times.remove(&lane_id);
        }
        for lane in &lanes {
            self.schedule.assignments.entry(lane.id.clone()).or_default();
        }
        self.schedule.lanes = lanes;
        self.schedule.roster = roster;
        MutationOutcome::Applied
    }

    /// Mark the day final and emit technician records. Later edits do not
    /// revoke the flag.
    pub fn finalize(&mut self) -> Vec<TechnicianRecord> {
        self.checkpoint();
        self.schedule.finalized = true;
        self.schedule.finalized_at = Some(Utc::now());
        let records = technician_records(&self.schedule, &self.drive_times, &self.window);
        info!("Finalized {} with {} technician records", self.schedule.date, records.len());
        records
    }

    // ---------------------------------------------------------------------
    // Async completions
    // ---------------------------------------------------------------------

    /// Capture what a routing task needs for one lane.
    pub fn route_request(&self, lane_id: &LaneId) -> Option<RouteRequest> {
        let lane = self.schedule.lane(lane_id).filter(|lane| lane.is_crew())?;
        let jobs = self.schedule.jobs(&lane.id);
        Some(RouteRequest {
            lane_id: lane.id.clone(),
            job_ids: jobs.iter().map(|job| job.id).collect(),
            points: jobs.iter().map(|job| job.coordinates).collect(),
        })
    }

    /// Apply a computed route. `ordered` must be a permutation of the job ids
    /// captured in `request`, and the lane must still hold exactly those jobs
    /// in the captured order, at the captured coordinates.
    pub fn apply_route(&mut self, request: &RouteRequest, ordered: &[JobId], drive: DriveTime) -> MutationOutcome {
        let jobs = self.schedule.jobs(&request.lane_id);
        let current: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
        let points: Vec<Option<Coordinates>> = jobs.iter().map(|job| job.coordinates).collect();
        if self.schedule.lane(&request.lane_id).is_none() || current != request.job_ids || points != request.points {
            debug!("Discarding stale route for lane {}", request.lane_id);
            return MutationOutcome::Stale;
        }
        let mut sorted_current = current.clone();
        let mut sorted_ordered = ordered.to_vec();
        sorted_current.sort();
        sorted_ordered.sort();
        if sorted_current != sorted_ordered {
            debug!("Route for lane {} does not cover its jobs", request.lane_id);
            return MutationOutcome::Stale;
        }

        if let Some(jobs) = self.schedule.assignments.get_mut(&request.lane_id) {
            let mut remaining = std::mem::take(jobs);
            for job_id in ordered {
                if let Some(position) = remaining.iter().position(|job| job.id == *job_id) {
                    jobs.push(remaining.remove(position));
                }
            }
        }
        self.drive_times.insert(request.lane_id.clone(), drive);
        self.edit_revision += 1;
        MutationOutcome::Applied
    }

    /// Store geocoded coordinates if the job still has the address that was
    /// looked up.
    pub fn apply_coordinates(&mut self, job_id: JobId, address: &str, coordinates: Coordinates) -> MutationOutcome {
        let location = self.schedule.locate(job_id);
        let Some(job) = self.schedule.job_mut(job_id) else {
            return MutationOutcome::Stale;
        };
        if job.address != address {
            debug!("Discarding coordinates for job {}: address changed", job_id);
            return MutationOutcome::Stale;
        }
        if job.coordinates == Some(coordinates) {
            return MutationOutcome::Applied;
        }
        job.coordinates = Some(coordinates);

        if let Some(JobLocation::Lane { lane_id, .. }) = location {
            self.invalidate(&lane_id);
        }
        self.edit_revision += 1;
        MutationOutcome::Applied
    }
}

fn job_from_booking(booking: &ExternalBooking) -> Job {
    let mut job = Job::new(
        booking.job_type.unwrap_or(JobType::Inspection),
        booking.job_number.trim(),
        booking.customer_name.trim(),
        booking.address.trim(),
    );
    job.duration_hours = booking.duration_hours;
    job.pinned_start = booking.appointment;
    job.notes = booking.notes.clone();
    job.provenance = Provenance::ExternalBooking {
        record_id: booking.record_id.clone(),
    };
    job
}

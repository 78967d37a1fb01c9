//! Progress review: the loaded workout history, the inline-edit buffer and
//! the coordinators that reconcile both with the remote gateway.
//!
//! Every remote operation is split into a `begin_*` step that snapshots the
//! request into a ticket and a `finish_*` step that applies the gateway's
//! answer. Tickets remember the store generation they were issued against, so
//! an answer that lands after a reload replaced the store is dropped locally.

use crate::gateway::{ExerciseUpdate, FetchRequest, GatewayError, TypeFilter};
use crate::model::{Exercise, ExerciseField, Workout, duplicate_exercise_ids};
use crate::session::Session;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("{action} failed: {source}")]
    NetworkOrServer {
        action: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("No changes to save.")]
    EmptyOperation,
    #[error("Delete cancelled.")]
    ConfirmationDeclined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// User-visible outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.level == NoticeLevel::Success
    }
}

impl From<ProgressError> for Notice {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::EmptyOperation | ProgressError::ConfirmationDeclined => {
                Notice::info(err.to_string())
            }
            ProgressError::NetworkOrServer { .. } => Notice::error(err.to_string()),
        }
    }
}

/// Workouts currently on screen, in server order.
#[derive(Debug, Clone, Default)]
pub struct WorkoutStore {
    workouts: Vec<Workout>,
}

impl WorkoutStore {
    pub fn replace(&mut self, workouts: Vec<Workout>) {
        let dups = duplicate_exercise_ids(&workouts);
        if !dups.is_empty() {
            log::warn!("Loaded workouts share exercise ids {dups:?}; edits to them will collide");
        }
        self.workouts = workouts;
    }

    pub fn clear(&mut self) {
        self.workouts.clear();
    }

    pub fn workouts(&self) -> &[Workout] {
        &self.workouts
    }

    pub fn len(&self) -> usize {
        self.workouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workouts.is_empty()
    }

    pub fn workout(&self, workout_id: i64) -> Option<&Workout> {
        self.workouts.iter().find(|w| w.id == workout_id)
    }

    pub fn exercise(&self, workout_id: i64, exercise_id: i64) -> Option<&Exercise> {
        self.workout(workout_id)?.exercise(exercise_id)
    }

    fn exercise_mut(&mut self, workout_id: i64, exercise_id: i64) -> Option<&mut Exercise> {
        self.workouts
            .iter_mut()
            .find(|w| w.id == workout_id)?
            .exercises
            .iter_mut()
            .find(|e| e.id == exercise_id)
    }

    /// Remove an exercise from its owning workout. Returns whether it existed.
    fn remove_exercise(&mut self, workout_id: i64, exercise_id: i64) -> bool {
        let Some(workout) = self.workouts.iter_mut().find(|w| w.id == workout_id) else {
            return false;
        };
        let before = workout.exercises.len();
        workout.exercises.retain(|e| e.id != exercise_id);
        workout.exercises.len() != before
    }
}

/// Which workout row, if any, shows its exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expansion {
    #[default]
    Collapsed,
    Expanded(i64),
}

impl Expansion {
    pub fn toggle(&mut self, workout_id: i64) {
        *self = match *self {
            Expansion::Expanded(id) if id == workout_id => Expansion::Collapsed,
            _ => Expansion::Expanded(workout_id),
        };
    }

    pub fn is_expanded(&self, workout_id: i64) -> bool {
        *self == Expansion::Expanded(workout_id)
    }
}

/// Fields of one exercise changed since the last save, as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    /// Owning workout, kept for display-side lookups only.
    pub workout_id: i64,
    pub fields: BTreeMap<ExerciseField, String>,
}

/// Unsaved edits keyed by exercise id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditBuffer {
    entries: BTreeMap<i64, PendingEdit>,
}

impl EditBuffer {
    fn record(&mut self, workout_id: i64, exercise_id: i64, field: ExerciseField, raw: &str) {
        self.entries
            .entry(exercise_id)
            .or_insert_with(|| PendingEdit {
                workout_id,
                fields: BTreeMap::new(),
            })
            .fields
            .insert(field, raw.to_string());
    }

    fn remove(&mut self, exercise_id: i64) -> Option<PendingEdit> {
        self.entries.remove(&exercise_id)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, exercise_id: i64) -> Option<&PendingEdit> {
        self.entries.get(&exercise_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Batch payload: each exercise id with only its changed fields.
    pub fn updates(&self) -> Vec<ExerciseUpdate> {
        self.entries
            .iter()
            .map(|(id, edit)| ExerciseUpdate {
                id: *id,
                fields: edit.fields.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    seq: u64,
    pub request: FetchRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveTicket {
    generation: u64,
    pub updates: Vec<ExerciseUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteTicket {
    generation: u64,
    pub workout_id: i64,
    pub exercise_id: i64,
}

/// State behind the progress page for one signed-in session.
#[derive(Debug)]
pub struct ProgressView {
    session: Session,
    filter: TypeFilter,
    store: WorkoutStore,
    expansion: Expansion,
    edits: EditBuffer,
    /// Bumped whenever a fetch result replaces the store.
    generation: u64,
    /// Sequence number of the newest fetch issued.
    fetch_seq: u64,
}

impl ProgressView {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            filter: TypeFilter::All,
            store: WorkoutStore::default(),
            expansion: Expansion::Collapsed,
            edits: EditBuffer::default(),
            generation: 0,
            fetch_seq: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Give the session back for teardown.
    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn filter(&self) -> TypeFilter {
        self.filter
    }

    pub fn store(&self) -> &WorkoutStore {
        &self.store
    }

    pub fn expansion(&self) -> Expansion {
        self.expansion
    }

    pub fn edits(&self) -> &EditBuffer {
        &self.edits
    }

    pub fn total_workouts(&self) -> usize {
        self.store.len()
    }

    pub fn toggle(&mut self, workout_id: i64) {
        self.expansion.toggle(workout_id);
    }

    /// Select a workout-type filter and issue the matching fetch.
    pub fn set_filter(&mut self, filter: TypeFilter) -> FetchTicket {
        self.filter = filter;
        self.fetch_seq += 1;
        FetchTicket {
            seq: self.fetch_seq,
            request: FetchRequest {
                user_id: self.session.user_id(),
                type_id: filter,
            },
        }
    }

    /// Re-fetch the current filter.
    pub fn reload(&mut self) -> FetchTicket {
        self.set_filter(self.filter)
    }

    /// Apply a fetch result.
    ///
    /// The store, expansion and edit buffer are rebuilt from scratch; unsaved
    /// edits are discarded. On failure the store is left empty. Results of a
    /// fetch superseded by a newer one are ignored and yield no notice.
    pub fn finish_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Workout>, GatewayError>,
    ) -> Option<Notice> {
        if ticket.seq != self.fetch_seq {
            log::debug!(
                "Dropping superseded fetch for filter {}",
                ticket.request.type_id
            );
            return None;
        }
        self.generation += 1;
        self.expansion = Expansion::Collapsed;
        if !self.edits.is_empty() {
            log::info!("Discarding {} unsaved exercise edits", self.edits.len());
        }
        self.edits.clear();
        match result {
            Ok(workouts) => {
                log::info!(
                    "Loaded {} workouts for filter {}",
                    workouts.len(),
                    ticket.request.type_id
                );
                self.store.replace(workouts);
                None
            }
            Err(source) => {
                log::error!("Error fetching workouts: {source}");
                self.store.clear();
                Some(
                    ProgressError::NetworkOrServer {
                        action: "Loading workouts",
                        source,
                    }
                    .into(),
                )
            }
        }
    }

    /// Apply a keystroke to both the displayed exercise and the edit buffer.
    ///
    /// Values are kept verbatim. Returns `false` and records nothing when the
    /// exercise is not in the store.
    pub fn record_edit(
        &mut self,
        workout_id: i64,
        exercise_id: i64,
        field: ExerciseField,
        raw: &str,
    ) -> bool {
        let Some(exercise) = self.store.exercise_mut(workout_id, exercise_id) else {
            log::warn!("Ignoring edit to unknown exercise {exercise_id} in workout {workout_id}");
            return false;
        };
        exercise.set_field(field, raw);
        self.edits.record(workout_id, exercise_id, field, raw);
        true
    }

    pub fn begin_save(&self) -> Result<SaveTicket, ProgressError> {
        if self.edits.is_empty() {
            return Err(ProgressError::EmptyOperation);
        }
        Ok(SaveTicket {
            generation: self.generation,
            updates: self.edits.updates(),
        })
    }

    /// Apply the batch update result.
    ///
    /// Success clears the whole buffer, including edits made while the save
    /// was in flight. Failure leaves everything as it was.
    pub fn finish_save(&mut self, ticket: SaveTicket, result: Result<(), GatewayError>) -> Notice {
        match result {
            Ok(()) => {
                if ticket.generation == self.generation {
                    self.edits.clear();
                } else {
                    log::debug!("Save landed after a reload; nothing to clear locally");
                }
                log::info!("Saved {} exercise updates", ticket.updates.len());
                Notice::success("Changes saved!")
            }
            Err(source) => {
                log::error!("Error saving changes: {source}");
                ProgressError::NetworkOrServer {
                    action: "Saving changes",
                    source,
                }
                .into()
            }
        }
    }

    /// Start deleting an exercise; `confirmed` is the user's answer to the
    /// confirmation prompt.
    pub fn begin_delete(
        &self,
        workout_id: i64,
        exercise_id: i64,
        confirmed: bool,
    ) -> Result<DeleteTicket, ProgressError> {
        if !confirmed {
            return Err(ProgressError::ConfirmationDeclined);
        }
        Ok(DeleteTicket {
            generation: self.generation,
            workout_id,
            exercise_id,
        })
    }

    /// Apply the delete result. Any unsaved edit of the exercise goes with it.
    pub fn finish_delete(
        &mut self,
        ticket: DeleteTicket,
        result: Result<(), GatewayError>,
    ) -> Notice {
        match result {
            Ok(()) => {
                if ticket.generation == self.generation {
                    self.store
                        .remove_exercise(ticket.workout_id, ticket.exercise_id);
                    if self.edits.remove(ticket.exercise_id).is_some() {
                        log::debug!(
                            "Dropped pending edit of deleted exercise {}",
                            ticket.exercise_id
                        );
                    }
                } else {
                    log::debug!(
                        "Delete of exercise {} landed after a reload",
                        ticket.exercise_id
                    );
                }
                Notice::success("Exercise deleted.")
            }
            Err(source) => {
                log::error!("Error deleting exercise {}: {source}", ticket.exercise_id);
                ProgressError::NetworkOrServer {
                    action: "Deleting exercise",
                    source,
                }
                .into()
            }
        }
    }
}

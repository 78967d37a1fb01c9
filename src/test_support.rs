use crate::gateway::{ExerciseUpdate, FetchRequest, GatewayError, TypeFilter, WorkoutGateway};
use crate::model::Workout;
use once_cell::sync::Lazy;
use std::sync::Mutex;

/// Serializes tests that change process environment variables.
pub static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch {
        user_id: Option<i64>,
        filter: TypeFilter,
    },
    Update(serde_json::Value),
    Delete(i64),
}

/// In-memory gateway that records every call and serves a fixed workout list.
pub struct RecordingGateway {
    workouts: Vec<Workout>,
    calls: Mutex<Vec<Call>>,
    fail_next: Mutex<bool>,
}

impl RecordingGateway {
    pub fn with_workouts(workouts: serde_json::Value) -> Self {
        Self {
            workouts: serde_json::from_value(workouts).unwrap(),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(false),
        }
    }

    /// Make the next call fail with a server error.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(call);
        let mut fail = self.fail_next.lock().unwrap();
        if std::mem::take(&mut *fail) {
            Err(GatewayError::Status {
                status: 500,
                body: "injected".into(),
            })
        } else {
            Ok(())
        }
    }
}

impl WorkoutGateway for RecordingGateway {
    fn fetch_workouts(&self, request: &FetchRequest) -> Result<Vec<Workout>, GatewayError> {
        self.record(Call::Fetch {
            user_id: request.user_id,
            filter: request.type_id,
        })?;
        Ok(self.workouts.clone())
    }

    fn update_exercises(&self, updates: &[ExerciseUpdate]) -> Result<(), GatewayError> {
        self.record(Call::Update(serde_json::to_value(updates).unwrap()))
    }

    fn delete_exercise(&self, exercise_id: i64) -> Result<(), GatewayError> {
        self.record(Call::Delete(exercise_id))
    }
}

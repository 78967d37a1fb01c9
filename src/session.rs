use crate::model::WorkoutType;
use dirs_next as dirs;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

const FILE: &str = "training_arc_store.json";
const USER_ID_KEY: &str = "userId";
const WORKOUT_TYPES_KEY: &str = "workoutTypes";

/// Persisted key/value state shared with the login and workout-type flows.
///
/// The file is a flat JSON object. Only `userId` and `workoutTypes` are read
/// here; any other keys written by other flows are preserved on save.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    values: Map<String, Value>,
}

impl LocalStore {
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(FILE))
    }

    /// Read the store from disk. A missing or unreadable file is an empty store.
    pub fn load() -> Self {
        if let Some(path) = Self::path() {
            if let Ok(data) = std::fs::read_to_string(&path) {
                match serde_json::from_str::<Map<String, Value>>(&data) {
                    Ok(values) => return Self { values },
                    Err(e) => log::warn!("Ignoring unreadable {}: {e}", path.display()),
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) {
        if let Some(path) = Self::path() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(data) = serde_json::to_string_pretty(&self.values) {
                if let Err(e) = std::fs::write(&path, data) {
                    log::error!("Failed to write {}: {e}", path.display());
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// The signed-in user, stored either as a number or a numeric string.
    pub fn user_id(&self) -> Option<i64> {
        match self.get(USER_ID_KEY)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set_user_id(&mut self, user_id: i64) {
        self.set(USER_ID_KEY, Value::from(user_id));
    }

    pub fn clear_user_id(&mut self) {
        self.remove(USER_ID_KEY);
    }

    /// Workout types saved by the type-creation flow.
    ///
    /// Absent or malformed data degrades to an empty list. The value may be
    /// the array itself or a JSON string containing it.
    pub fn workout_types(&self) -> Vec<WorkoutType> {
        let parsed = match self.get(WORKOUT_TYPES_KEY) {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::String(s)) => serde_json::from_str::<Vec<WorkoutType>>(s),
            Some(v) => serde_json::from_value::<Vec<WorkoutType>>(v.clone()),
        };
        parsed.unwrap_or_else(|e| {
            log::warn!("No usable workoutTypes in local store: {e}");
            Vec::new()
        })
    }
}

/// Read-mostly list of the user's workout types, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct WorkoutTypeCache {
    types: Arc<[WorkoutType]>,
}

impl WorkoutTypeCache {
    pub fn new(types: Vec<WorkoutType>) -> Self {
        Self {
            types: types.into(),
        }
    }

    pub fn all(&self) -> &[WorkoutType] {
        &self.types
    }

    pub fn get(&self, id: i64) -> Option<&WorkoutType> {
        self.types.iter().find(|t| t.id == id)
    }
}

/// Session context handed to the progress view on sign-in.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: Option<i64>,
    workout_types: WorkoutTypeCache,
}

impl Session {
    /// Capture the signed-in user and their workout types from `store`.
    pub fn begin(store: &LocalStore) -> Self {
        let session = Self::new(store.user_id(), store.workout_types());
        log::info!(
            "Session started for user {:?} with {} workout types",
            session.user_id,
            session.workout_types.all().len()
        );
        session
    }

    pub fn new(user_id: Option<i64>, workout_types: Vec<WorkoutType>) -> Self {
        Self {
            user_id,
            workout_types: WorkoutTypeCache::new(workout_types),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn workout_types(&self) -> &WorkoutTypeCache {
        &self.workout_types
    }

    /// Tear down the session; anything built on it must be dropped with it.
    pub fn end(self) {
        log::info!("Session ended for user {:?}", self.user_id);
    }
}

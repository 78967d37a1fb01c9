use crate::model::{ExerciseField, Workout};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_BASE_URL: &str = "http://localhost:4040";

const FETCH_PATH: &str = "/api/get_user_workouts_by_type";
const UPDATE_PATH: &str = "/api/update_exercises";
const DELETE_PATH: &str = "/api/delete_exercise";

/// Determine the gateway base URL.
///
/// The `TRAINING_ARC_API_URL` environment variable takes precedence over the
/// URL stored in the application settings.
pub fn resolve_base_url(settings_url: Option<&str>) -> String {
    std::env::var("TRAINING_ARC_API_URL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| settings_url.map(|s| s.to_string()))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unreadable response: {0}")]
    Decode(#[from] std::io::Error),
    #[error("server reported failure")]
    Rejected,
}

/// Workout-type filter; `All` is sent as the string `"all"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Type(i64),
}

impl Serialize for TypeFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TypeFilter::All => serializer.serialize_str("all"),
            TypeFilter::Type(id) => serializer.serialize_i64(*id),
        }
    }
}

impl FromStr for TypeFilter {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            Ok(TypeFilter::All)
        } else {
            s.parse().map(TypeFilter::Type)
        }
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeFilter::All => f.write_str("all"),
            TypeFilter::Type(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRequest {
    pub user_id: Option<i64>,
    pub type_id: TypeFilter,
}

/// One entry of a batch update: the exercise id plus only the changed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseUpdate {
    pub id: i64,
    pub fields: BTreeMap<ExerciseField, String>,
}

impl Serialize for ExerciseUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("id", &self.id)?;
        for (field, value) in &self.fields {
            map.serialize_entry(field.as_str(), value)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    exercises: &'a [ExerciseUpdate],
}

#[derive(Serialize)]
struct DeleteRequest {
    exercise_id: i64,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    workouts: Option<Vec<Workout>>,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    success: bool,
}

/// Remote store of the user's workouts.
///
/// Calls block until the server answers; callers that must stay responsive
/// run them on a worker thread. Updates for exercise ids that no longer exist
/// are expected to be tolerated by the server.
pub trait WorkoutGateway: Send + Sync {
    fn fetch_workouts(&self, request: &FetchRequest) -> Result<Vec<Workout>, GatewayError>;
    fn update_exercises(&self, updates: &[ExerciseUpdate]) -> Result<(), GatewayError>;
    fn delete_exercise(&self, exercise_id: i64) -> Result<(), GatewayError>;
}

/// [`WorkoutGateway`] speaking JSON over HTTP POST.
pub struct HttpGateway {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn post<T, R>(&self, path: &str, body: &T) -> Result<R, GatewayError>
    where
        T: Serialize,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .agent
            .post(&url)
            .set("Accept", "application/json")
            .send_json(body);
        match response {
            Ok(r) => Ok(r.into_json()?),
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_default();
                Err(GatewayError::Status { status, body })
            }
            Err(e) => Err(GatewayError::Transport(e.to_string())),
        }
    }

    fn post_for_success<T: Serialize>(&self, path: &str, body: &T) -> Result<(), GatewayError> {
        let status: StatusResponse = self.post(path, body)?;
        if status.success {
            Ok(())
        } else {
            Err(GatewayError::Rejected)
        }
    }
}

impl WorkoutGateway for HttpGateway {
    fn fetch_workouts(&self, request: &FetchRequest) -> Result<Vec<Workout>, GatewayError> {
        log::info!(
            "Fetching workouts for user {:?} with filter {}",
            request.user_id,
            request.type_id
        );
        let response: FetchResponse = self.post(FETCH_PATH, request)?;
        Ok(response.workouts.unwrap_or_default())
    }

    fn update_exercises(&self, updates: &[ExerciseUpdate]) -> Result<(), GatewayError> {
        log::info!("Updating {} exercises", updates.len());
        self.post_for_success(UPDATE_PATH, &UpdateRequest { exercises: updates })
    }

    fn delete_exercise(&self, exercise_id: i64) -> Result<(), GatewayError> {
        log::info!("Deleting exercise {exercise_id}");
        self.post_for_success(DELETE_PATH, &DeleteRequest { exercise_id })
    }
}

// Records exchanged with the workout gateway and shown in the progress table
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A user-defined workout category such as "Cardio".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutType {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Value of a numeric exercise column.
///
/// Values loaded from the server are numbers, while values typed by the user
/// are kept verbatim as [`FieldValue::Text`] until the server accepts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// Editable exercise columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseField {
    Name,
    Sets,
    Reps,
    Weight,
    DurationMinutes,
}

impl ExerciseField {
    pub const ALL: [ExerciseField; 5] = [
        ExerciseField::Name,
        ExerciseField::Sets,
        ExerciseField::Reps,
        ExerciseField::Weight,
        ExerciseField::DurationMinutes,
    ];

    /// Key used for this field in gateway payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ExerciseField::Name => "name",
            ExerciseField::Sets => "sets",
            ExerciseField::Reps => "reps",
            ExerciseField::Weight => "weight",
            ExerciseField::DurationMinutes => "duration_minutes",
        }
    }

    /// Column header shown in the exercise table.
    pub fn label(self) -> &'static str {
        match self {
            ExerciseField::Name => "Name",
            ExerciseField::Sets => "Sets",
            ExerciseField::Reps => "Reps",
            ExerciseField::Weight => "Weight",
            ExerciseField::DurationMinutes => "Duration",
        }
    }
}

impl std::str::FromStr for ExerciseField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExerciseField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown exercise field: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub sets: Option<FieldValue>,
    #[serde(default)]
    pub reps: Option<FieldValue>,
    #[serde(default)]
    pub weight: Option<FieldValue>,
    #[serde(default)]
    pub duration_minutes: Option<FieldValue>,
}

impl Exercise {
    /// Text to show in the editor for `field`; empty values render as "".
    pub fn field_text(&self, field: ExerciseField) -> String {
        match field {
            ExerciseField::Name => self.name.clone(),
            ExerciseField::Sets => display_value(&self.sets),
            ExerciseField::Reps => display_value(&self.reps),
            ExerciseField::Weight => display_value(&self.weight),
            ExerciseField::DurationMinutes => display_value(&self.duration_minutes),
        }
    }

    /// Overwrite `field` with raw user input.
    pub fn set_field(&mut self, field: ExerciseField, raw: &str) {
        let value = Some(FieldValue::Text(raw.to_string()));
        match field {
            ExerciseField::Name => self.name = raw.to_string(),
            ExerciseField::Sets => self.sets = value,
            ExerciseField::Reps => self.reps = value,
            ExerciseField::Weight => self.weight = value,
            ExerciseField::DurationMinutes => self.duration_minutes = value,
        }
    }
}

fn display_value(value: &Option<FieldValue>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub exercises: Vec<Exercise>,
}

impl Workout {
    /// Parse the server timestamp into local time.
    ///
    /// Accepts RFC 3339, RFC 2822 (the HTTP-date form many JSON encoders emit
    /// for datetimes), naive `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS`
    /// values interpreted as local time, and bare dates.
    pub fn parsed_date(&self) -> Option<DateTime<Local>> {
        let raw = self.date.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Local));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
            return Some(dt.with_timezone(&Local));
        }
        let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        Local.from_local_datetime(&naive).earliest()
    }

    /// Date column text; falls back to the raw value when it cannot be parsed.
    pub fn display_date(&self) -> String {
        match self.parsed_date() {
            Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            None => self.date.clone(),
        }
    }

    pub fn exercise(&self, exercise_id: i64) -> Option<&Exercise> {
        self.exercises.iter().find(|e| e.id == exercise_id)
    }
}

/// Exercise ids that occur more than once across `workouts`.
///
/// Pending edits are keyed by exercise id alone, so ids must be unique over
/// the whole loaded set, not only within one workout.
pub fn duplicate_exercise_ids(workouts: &[Workout]) -> Vec<i64> {
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for ex in workouts.iter().flat_map(|w| w.exercises.iter()) {
        if !seen.insert(ex.id) && !dups.contains(&ex.id) {
            dups.push(ex.id);
        }
    }
    dups
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

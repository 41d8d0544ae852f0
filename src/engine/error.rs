use serde_json::{Map, Value, json};
use thiserror::Error;
use ulid::Ulid;

use crate::model::{ConflictingReservation, DATETIME_FORMAT};
use crate::validation::Violations;

/// Business-rule conflicts. All of them map to HTTP 409.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    InactiveRoom {
        room_id: Ulid,
    },
    TimeConflict {
        room_id: Ulid,
        conflicting: Vec<ConflictingReservation>,
    },
    DeleteConflict {
        room_id: Ulid,
        reservations_count: usize,
    },
}

impl ConflictKind {
    pub fn room_id(&self) -> Ulid {
        match self {
            ConflictKind::InactiveRoom { room_id }
            | ConflictKind::TimeConflict { room_id, .. }
            | ConflictKind::DeleteConflict { room_id, .. } => *room_id,
        }
    }

    /// Stable wire name of the conflict kind.
    pub fn conflict_type(&self) -> &'static str {
        match self {
            ConflictKind::InactiveRoom { .. } => "inactive_room",
            ConflictKind::TimeConflict { .. } => "time_conflict",
            ConflictKind::DeleteConflict { .. } => "delete_conflict",
        }
    }

    fn message(&self) -> String {
        match self {
            ConflictKind::InactiveRoom { .. } => {
                "Cannot make reservation for inactive room".to_string()
            }
            ConflictKind::TimeConflict { room_id, .. } => {
                format!("Time slot conflicts with existing reservation for room {room_id}")
            }
            ConflictKind::DeleteConflict {
                room_id,
                reservations_count,
            } => format!(
                "Cannot delete room with ID {room_id}. It has {reservations_count} existing reservation(s)"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(Violations),

    #[error("Room with ID {0} was not found")]
    RoomNotFound(Ulid),

    #[error("Reservation with ID {0} was not found")]
    ReservationNotFound(Ulid),

    #[error("{}", .0.message())]
    Conflict(ConflictKind),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Violations> for EngineError {
    fn from(v: Violations) -> Self {
        EngineError::Validation(v)
    }
}

impl EngineError {
    /// HTTP-style status for the presentation layer.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::RoomNotFound(_) | EngineError::ReservationNotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::Internal(_) => 500,
        }
    }

    pub fn violations(&self) -> Option<&Violations> {
        match self {
            EngineError::Validation(v) => Some(v),
            _ => None,
        }
    }

    pub fn conflict(&self) -> Option<&ConflictKind> {
        match self {
            EngineError::Conflict(c) => Some(c),
            _ => None,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::RoomNotFound(_) => "room_not_found",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::Conflict(c) => c.conflict_type(),
            EngineError::Internal(_) => "internal",
        }
    }

    /// Structured error body for clients. Internal details never leak.
    pub fn to_body(&self) -> Value {
        match self {
            EngineError::Validation(violations) => {
                let mut errors = Map::new();
                for v in violations.iter() {
                    let entry = errors
                        .entry(v.field.to_string())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(list) = entry {
                        list.push(Value::String(v.message.clone()));
                    }
                }
                json!({
                    "error": "Validation failed",
                    "errors": errors,
                    "code": 400,
                })
            }
            EngineError::RoomNotFound(_) | EngineError::ReservationNotFound(_) => json!({
                "error": self.to_string(),
                "code": 404,
            }),
            EngineError::Conflict(kind) => {
                let mut body = json!({
                    "error": kind.message(),
                    "room_id": kind.room_id().to_string(),
                    "conflict_type": kind.conflict_type(),
                });
                match kind {
                    ConflictKind::TimeConflict { conflicting, .. } => {
                        body["conflicting_reservations"] = conflicting
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id.to_string(),
                                    "reserved_by": c.reserved_by,
                                    "start_date_time": c.start_date_time.format(DATETIME_FORMAT).to_string(),
                                    "end_date_time": c.end_date_time.format(DATETIME_FORMAT).to_string(),
                                })
                            })
                            .collect();
                    }
                    ConflictKind::DeleteConflict {
                        reservations_count, ..
                    } => {
                        body["reservations_count"] = json!(reservations_count);
                    }
                    ConflictKind::InactiveRoom { .. } => {}
                }
                body
            }
            EngineError::Internal(_) => json!({
                "error": "Internal server error",
                "code": 500,
            }),
        }
    }
}

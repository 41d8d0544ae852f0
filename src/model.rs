use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Naive wall-clock timestamp, interpreted as UTC.
pub type Timestamp = NaiveDateTime;

/// Presentation format for timestamps (`Y-m-d H:i:s`).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Half-open interval `[start, end)`.
///
/// A span with `start >= end` is representable so that requests can be
/// checked for conflicts before the entity invariants reject them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Strict overlap: touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when the span covers no instant at all.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub reserved_by: String,
    pub reserved_by_email: Option<String>,
    pub start_date_time: Timestamp,
    pub end_date_time: Timestamp,
    pub created_at: Timestamp,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start_date_time, self.end_date_time)
    }
}

/// A room plus the reservations that reference it.
///
/// The reservation list is the store's per-room index, not an ownership
/// collection on [`Room`]. It is kept sorted by `start_date_time`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub reservations: Vec<Reservation>,
    /// Set when the room is deleted while another task waits on its lock.
    pub removed: bool,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
            removed: false,
        }
    }

    /// Insert reservation maintaining sort order by start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.start_date_time <= reservation.start_date_time);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.start_date_time < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span().overlaps(query))
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated { room: Room },
    RoomUpdated { room: Room },
    RoomDeleted { id: Ulid },
    ReservationCreated { reservation: Reservation },
    ReservationDeleted { id: Ulid, room_id: Ulid },
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Partial room update; only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Raw booking request. Dates are unparsed so that malformed input is
/// reported as a field violation rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    pub room_id: Option<Ulid>,
    pub reserved_by: Option<String>,
    pub reserved_by_email: Option<String>,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFilter {
    pub room_id: Option<Ulid>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomReservationQuery {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub include_room_details: bool,
}

impl Default for RoomReservationQuery {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            include_room_details: true,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A reservation with its room attached for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: Reservation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomReservations {
    pub room: Room,
    pub reservations: Vec<ReservationView>,
    pub total_reservations: usize,
}

/// Minimal projection of a reservation reported in a time conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingReservation {
    pub id: Ulid,
    pub reserved_by: String,
    pub start_date_time: Timestamp,
    pub end_date_time: Timestamp,
}

impl From<&Reservation> for ConflictingReservation {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            reserved_by: r.reserved_by.clone(),
            start_date_time: r.start_date_time,
            end_date_time: r.end_date_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2030, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn reservation(start: Timestamp, end: Timestamp) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            reserved_by: "Jan".into(),
            reserved_by_email: None,
            start_date_time: start,
            end_date_time: end,
            created_at: at(0, 0),
        }
    }

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            name: "A".into(),
            description: None,
            is_active: true,
            created_at: at(0, 0),
            updated_at: at(0, 0),
        })
    }

    #[test]
    fn span_basics() {
        let s = Span::new(at(9, 0), at(11, 0));
        assert!(!s.is_empty());
        assert!(Span::new(at(9, 0), at(9, 0)).is_empty());
        assert!(Span::new(at(10, 0), at(9, 0)).is_empty());
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(at(9, 0), at(11, 0));
        let b = Span::new(at(10, 0), at(12, 0));
        let c = Span::new(at(11, 0), at(12, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn span_overlap_containment() {
        let outer = Span::new(at(8, 0), at(18, 0));
        let inner = Span::new(at(9, 0), at(10, 0));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn span_overlap_symmetry_grid() {
        let points: Vec<Timestamp> = (8..14).map(|h| at(h, 0)).collect();
        let mut spans = Vec::new();
        for (i, s) in points.iter().enumerate() {
            for e in &points[i + 1..] {
                spans.push(Span::new(*s, *e));
            }
        }
        for a in &spans {
            assert!(a.overlaps(a));
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a));
                if a.end == b.start {
                    assert!(!a.overlaps(b));
                }
            }
        }
    }

    #[test]
    fn reservations_kept_sorted() {
        let mut rs = room_state();
        rs.insert_reservation(reservation(at(13, 0), at(14, 0)));
        rs.insert_reservation(reservation(at(9, 0), at(10, 0)));
        rs.insert_reservation(reservation(at(11, 0), at(12, 0)));
        let starts: Vec<_> = rs.reservations.iter().map(|r| r.start_date_time).collect();
        assert_eq!(starts, vec![at(9, 0), at(11, 0), at(13, 0)]);
    }

    #[test]
    fn overlapping_respects_half_open_bounds() {
        let mut rs = room_state();
        let early = reservation(at(8, 0), at(9, 0));
        let mid = reservation(at(9, 30), at(10, 30));
        let late = reservation(at(11, 0), at(12, 0));
        rs.insert_reservation(early.clone());
        rs.insert_reservation(mid.clone());
        rs.insert_reservation(late.clone());

        let hits: Vec<_> = rs
            .overlapping(&Span::new(at(9, 0), at(11, 0)))
            .map(|r| r.id)
            .collect();
        assert_eq!(hits, vec![mid.id]);
    }

    #[test]
    fn remove_reservation_by_id() {
        let mut rs = room_state();
        let r = reservation(at(9, 0), at(10, 0));
        rs.insert_reservation(r.clone());
        assert_eq!(rs.get_reservation(r.id), Some(&r));
        assert_eq!(rs.remove_reservation(r.id), Some(r.clone()));
        assert!(rs.remove_reservation(r.id).is_none());
        assert!(rs.reservations.is_empty());
    }

    #[test]
    fn reservation_view_flattens_room() {
        let rs = room_state();
        let view = ReservationView {
            reservation: reservation(at(9, 0), at(10, 0)),
            room: Some(rs.room.clone()),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["reservedBy"], "Jan");
        assert_eq!(json["room"]["name"], "A");

        let bare = ReservationView { room: None, ..view };
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("room").is_none());
    }

    #[test]
    fn room_reservation_query_defaults_to_room_details() {
        let q: RoomReservationQuery = serde_json::from_str("{}").unwrap();
        assert!(q.include_room_details);
        assert_eq!(q, RoomReservationQuery::default());
    }
}

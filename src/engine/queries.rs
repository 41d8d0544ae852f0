use ulid::Ulid;

use crate::model::*;
use crate::validation::{Violations, parse_filter_date};

use super::conflict::find_conflicts;
use super::{Engine, EngineError};

/// Inclusive listing window: `date_from` bounds the start, `date_to` the end.
#[derive(Debug, Clone, Copy, Default)]
struct Window {
    from: Option<Timestamp>,
    to: Option<Timestamp>,
}

impl Window {
    fn parse(date_from: Option<&str>, date_to: Option<&str>) -> Result<Self, EngineError> {
        let mut violations = Violations::new();
        let from = parse_filter_date("dateFrom", date_from, &mut violations);
        let to = parse_filter_date("dateTo", date_to, &mut violations);
        violations.into_result()?;
        Ok(Self { from, to })
    }

    fn admits(&self, r: &Reservation) -> bool {
        self.from.is_none_or(|from| r.start_date_time >= from)
            && self.to.is_none_or(|to| r.end_date_time <= to)
    }
}

fn by_start(a: &ReservationView, b: &ReservationView) -> std::cmp::Ordering {
    a.reservation
        .start_date_time
        .cmp(&b.reservation.start_date_time)
        .then(a.reservation.id.cmp(&b.reservation.id))
}

impl Engine {
    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self
            .get_room_state(&id)
            .ok_or(EngineError::RoomNotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// All rooms ordered by name, optionally only the active ones.
    pub async fn list_rooms(&self, active_only: bool) -> Vec<Room> {
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if guard.removed || (active_only && !guard.room.is_active) {
                continue;
            }
            rooms.push(guard.room.clone());
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Committed reservations of `room_id` overlapping `span`, in start
    /// order, skipping `exclude`. An unknown room has no conflicts.
    pub async fn find_conflicting_reservations(
        &self,
        room_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Vec<Reservation> {
        let Some(rs) = self.get_room_state(&room_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        find_conflicts(&guard, &span, exclude)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn has_conflicting_reservations(
        &self,
        room_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> bool {
        let Some(rs) = self.get_room_state(&room_id) else {
            return false;
        };
        let guard = rs.read().await;
        guard
            .overlapping(&span)
            .any(|r| Some(r.id) != exclude)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<ReservationView, EngineError> {
        let room_id = self
            .reservation_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let guard = rs.read().await;
        let reservation = guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        Ok(ReservationView {
            reservation,
            room: Some(guard.room.clone()),
        })
    }

    /// Reservations across rooms (or one room) within the filter window,
    /// each with its room attached, ordered by start.
    pub async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<ReservationView>, EngineError> {
        let window = Window::parse(filter.date_from.as_deref(), filter.date_to.as_deref())?;

        let states = match filter.room_id {
            Some(room_id) => self.get_room_state(&room_id).into_iter().collect(),
            None => self.room_states(),
        };

        let mut views = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            views.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| window.admits(r))
                    .map(|r| ReservationView {
                        reservation: r.clone(),
                        room: Some(guard.room.clone()),
                    }),
            );
        }
        views.sort_by(by_start);
        Ok(views)
    }

    pub async fn list_reservations_for_room(
        &self,
        room_id: Ulid,
        query: RoomReservationQuery,
    ) -> Result<RoomReservations, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let window = Window::parse(query.date_from.as_deref(), query.date_to.as_deref())?;

        let guard = rs.read().await;
        let reservations: Vec<ReservationView> = guard
            .reservations
            .iter()
            .filter(|r| window.admits(r))
            .map(|r| ReservationView {
                reservation: r.clone(),
                room: query.include_room_details.then(|| guard.room.clone()),
            })
            .collect();

        Ok(RoomReservations {
            room: guard.room.clone(),
            total_reservations: reservations.len(),
            reservations,
        })
    }
}

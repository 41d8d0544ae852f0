use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, ReservationCreated};
use crate::observability;
use crate::validation::{Violations, parse_datetime, validate_reservation, validate_room};

use super::conflict::{find_conflicts, now};
use super::{ConflictKind, Engine, EngineError, WalCommand, observed};

const INVALID_DATE_FORMAT: &str = "Invalid date format. Use Y-m-d H:i:s format";

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        observed("create_room", self.create_room_inner(new)).await
    }

    async fn create_room_inner(&self, new: NewRoom) -> Result<Room, EngineError> {
        let _catalog = self.catalog.lock().await;

        if let Some(name) = new.name.as_deref()
            && self.room_names.contains_key(name)
        {
            return Err(Violations::single("name", "Room with this name already exists").into());
        }
        validate_room(new.name.as_deref()).into_result()?;

        let now = now();
        let room = Room {
            id: Ulid::new(),
            name: new.name.unwrap_or_default(),
            description: new.description,
            is_active: new.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        self.wal_append(&Event::RoomCreated { room: room.clone() })
            .await?;
        self.room_names.insert(room.name.clone(), room.id);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        metrics::gauge!(observability::ROOMS_TOTAL).set(self.rooms.len() as f64);

        info!(room_id = %room.id, name = %room.name, "room created");
        Ok(room)
    }

    /// Apply the supplied fields of `patch`. A description can be replaced
    /// but not cleared.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        observed("update_room", self.update_room_inner(id, patch)).await
    }

    async fn update_room_inner(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let _catalog = self.catalog.lock().await;
        let rs = self
            .get_room_state(&id)
            .ok_or(EngineError::RoomNotFound(id))?;
        let mut guard = rs.write().await;

        if let Some(name) = patch.name.as_deref()
            && name != guard.room.name
            && self.room_names.contains_key(name)
        {
            return Err(Violations::single("name", "Room with this name already exists").into());
        }

        let mut room = guard.room.clone();
        if let Some(name) = patch.name {
            room.name = name;
        }
        if let Some(description) = patch.description {
            room.description = Some(description);
        }
        if let Some(is_active) = patch.is_active {
            room.is_active = is_active;
        }
        validate_room(Some(&room.name)).into_result()?;
        room.updated_at = now();

        self.wal_append(&Event::RoomUpdated { room: room.clone() })
            .await?;
        if room.name != guard.room.name {
            self.room_names.remove(&guard.room.name);
            self.room_names.insert(room.name.clone(), id);
        }
        guard.room = room.clone();

        info!(room_id = %id, name = %room.name, is_active = room.is_active, "room updated");
        Ok(room)
    }

    /// Delete a room that has no reservations. Returns the removed room.
    pub async fn delete_room(&self, id: Ulid) -> Result<Room, EngineError> {
        observed("delete_room", self.delete_room_inner(id)).await
    }

    async fn delete_room_inner(&self, id: Ulid) -> Result<Room, EngineError> {
        let _catalog = self.catalog.lock().await;
        let rs = self
            .get_room_state(&id)
            .ok_or(EngineError::RoomNotFound(id))?;
        let mut guard = rs.write().await;

        let reservations_count = guard.reservations.len();
        if reservations_count > 0 {
            return Err(EngineError::Conflict(ConflictKind::DeleteConflict {
                room_id: id,
                reservations_count,
            }));
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        // A booker already queued on this lock must see the room as gone.
        guard.removed = true;
        self.rooms.remove(&id);
        self.room_names.remove(&guard.room.name);
        metrics::gauge!(observability::ROOMS_TOTAL).set(self.rooms.len() as f64);

        info!(room_id = %id, name = %guard.room.name, "room deleted");
        Ok(guard.room.clone())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book a room. The room's write lock is held from lookup through
    /// commit, so the conflict check and the insert are one atomic step
    /// with respect to other bookings of the same room.
    pub async fn create_reservation(
        &self,
        req: NewReservation,
    ) -> Result<ReservationView, EngineError> {
        let result = observed("create_reservation", self.create_reservation_inner(req)).await;
        if let Err(e) = &result {
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => e.kind_label())
                .increment(1);
            match e {
                EngineError::Internal(_) => {}
                _ => info!(reason = e.kind_label(), "booking rejected: {e}"),
            }
        }
        result
    }

    async fn create_reservation_inner(
        &self,
        req: NewReservation,
    ) -> Result<ReservationView, EngineError> {
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        let reserved_by = present(req.reserved_by);
        let start_raw = present(req.start_date_time);
        let end_raw = present(req.end_date_time);

        let mut missing = Violations::new();
        for (field, absent) in [
            ("roomId", req.room_id.is_none()),
            ("reservedBy", reserved_by.is_none()),
            ("startDateTime", start_raw.is_none()),
            ("endDateTime", end_raw.is_none()),
        ] {
            if absent {
                missing.add(field, format!("Field '{field}' is required"));
            }
        }
        let (Some(room_id), Some(reserved_by), Some(start_raw), Some(end_raw)) =
            (req.room_id, reserved_by, start_raw, end_raw)
        else {
            return Err(missing.into());
        };

        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.removed {
            return Err(EngineError::RoomNotFound(room_id));
        }

        if !guard.room.is_active {
            return Err(EngineError::Conflict(ConflictKind::InactiveRoom { room_id }));
        }

        let (Some(start), Some(end)) = (parse_datetime(&start_raw), parse_datetime(&end_raw))
        else {
            let mut v = Violations::new();
            v.add("startDateTime", INVALID_DATE_FORMAT);
            v.add("endDateTime", INVALID_DATE_FORMAT);
            return Err(v.into());
        };
        let span = Span::new(start, end);

        let conflicting: Vec<ConflictingReservation> = find_conflicts(&guard, &span, None)
            .into_iter()
            .map(ConflictingReservation::from)
            .collect();
        if !conflicting.is_empty() {
            return Err(EngineError::Conflict(ConflictKind::TimeConflict {
                room_id,
                conflicting,
            }));
        }

        let now = now();
        let email = req.reserved_by_email.filter(|e| !e.is_empty());
        validate_reservation(&reserved_by, email.as_deref(), &span, now).into_result()?;

        let reservation = Reservation {
            id: Ulid::new(),
            room_id,
            reserved_by,
            reserved_by_email: email,
            start_date_time: start,
            end_date_time: end,
            created_at: now,
        };
        self.wal_append(&Event::ReservationCreated {
            reservation: reservation.clone(),
        })
        .await?;
        guard.insert_reservation(reservation.clone());
        self.reservation_to_room.insert(reservation.id, room_id);
        let room = guard.room.clone();
        drop(guard);

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            reservation_id = %reservation.id,
            room_id = %room_id,
            start = %start.format(DATETIME_FORMAT),
            end = %end.format(DATETIME_FORMAT),
            "reservation created"
        );

        self.publish(Notification::ReservationCreated(ReservationCreated {
            reservation_id: reservation.id,
            room_name: room.name.clone(),
            reserved_by: reservation.reserved_by.clone(),
            reserved_by_email: reservation.reserved_by_email.clone(),
            start_date_time: reservation.start_date_time,
            end_date_time: reservation.end_date_time,
            created_at: reservation.created_at,
        }));

        Ok(ReservationView {
            reservation,
            room: Some(room),
        })
    }

    /// Cancel a reservation. Returns the removed reservation.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        observed("delete_reservation", self.delete_reservation_inner(id)).await
    }

    async fn delete_reservation_inner(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room_id = self
            .reservation_to_room
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let mut guard = rs.write().await;

        // A concurrent delete may have won the lock first.
        let Some(existing) = guard.get_reservation(id).cloned() else {
            return Err(EngineError::ReservationNotFound(id));
        };

        self.wal_append(&Event::ReservationDeleted { id, room_id })
            .await?;
        guard.remove_reservation(id);
        self.reservation_to_room.remove(&id);
        let room_name = guard.room.name.clone();
        drop(guard);

        info!(reservation_id = %id, room_id = %room_id, "reservation cancelled");
        self.publish(Notification::ReservationCancelled {
            reservation_id: id,
            room_name,
        });
        Ok(existing)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as one creation event per live room and reservation.
    ///
    /// Holds the catalog lock and a read lock on every room until the new
    /// log is in place, so no mutation can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;

        let mut guards = Vec::new();
        for rs in self.room_states() {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::with_capacity(guards.len() + self.reservation_to_room.len());
        for guard in &guards {
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))?
            .map_err(|e| {
                warn!(error = %e, "WAL compaction failed");
                EngineError::Internal(format!("WAL compaction failed: {e}"))
            })?;

        info!(events = count, "WAL compacted");
        Ok(())
    }

    /// Appends written since the last compaction.
    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

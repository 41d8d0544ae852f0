use ulid::Ulid;

use crate::model::*;

/// Current naive UTC wall-clock time.
pub(crate) fn now() -> Timestamp {
    chrono::Utc::now().naive_utc()
}

/// Reservations of `rs` overlapping `span`, optionally skipping one id.
/// Returned in start order.
pub(crate) fn find_conflicts<'a>(
    rs: &'a RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Vec<&'a Reservation> {
    rs.overlapping(span)
        .filter(|r| Some(r.id) != exclude)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2030, 3, 4)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn state_with(spans: &[(u32, u32)]) -> (RoomState, Vec<Ulid>) {
        let room = Room {
            id: Ulid::new(),
            name: "Room".into(),
            description: None,
            is_active: true,
            created_at: at(0),
            updated_at: at(0),
        };
        let room_id = room.id;
        let mut rs = RoomState::new(room);
        let mut ids = Vec::new();
        for &(s, e) in spans {
            let r = Reservation {
                id: Ulid::new(),
                room_id,
                reserved_by: "Jan".into(),
                reserved_by_email: None,
                start_date_time: at(s),
                end_date_time: at(e),
                created_at: at(0),
            };
            ids.push(r.id);
            rs.insert_reservation(r);
        }
        (rs, ids)
    }

    #[test]
    fn finds_overlapping_only() {
        let (rs, ids) = state_with(&[(8, 9), (9, 11), (11, 12), (14, 15)]);
        let hits: Vec<_> = find_conflicts(&rs, &Span::new(at(10), at(12)), None)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(hits, vec![ids[1], ids[2]]);
    }

    #[test]
    fn touching_is_not_a_conflict() {
        let (rs, _) = state_with(&[(9, 11)]);
        assert!(find_conflicts(&rs, &Span::new(at(11), at(12)), None).is_empty());
        assert!(find_conflicts(&rs, &Span::new(at(7), at(9)), None).is_empty());
    }

    #[test]
    fn identical_interval_conflicts_with_itself() {
        let (rs, ids) = state_with(&[(9, 11)]);
        let hits = find_conflicts(&rs, &Span::new(at(9), at(11)), None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[0]);
    }

    #[test]
    fn exclude_skips_reservation() {
        let (rs, ids) = state_with(&[(9, 11), (10, 12)]);
        let hits: Vec<_> = find_conflicts(&rs, &Span::new(at(9), at(11)), Some(ids[0]))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(hits, vec![ids[1]]);
    }

    #[test]
    fn containing_interval_conflicts() {
        let (rs, ids) = state_with(&[(10, 11)]);
        let hits = find_conflicts(&rs, &Span::new(at(8), at(18)), None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[0]);
    }

    #[test]
    fn inverted_candidate_span() {
        let (rs, _) = state_with(&[(9, 11)]);
        // Same predicate as the store filter: a zero-length span inside a
        // booking still satisfies both strict comparisons.
        assert_eq!(find_conflicts(&rs, &Span::new(at(10), at(10)), None).len(), 1);
        assert!(find_conflicts(&rs, &Span::new(at(12), at(8)), None).is_empty());
        assert!(find_conflicts(&rs, &Span::new(at(13), at(12)), None).is_empty());
    }
}

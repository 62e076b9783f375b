//! Orden canónico de "latest trip"
//!
//! Entre los viajes de un vehículo con fecha de inicio: fecha DESC, `rank_index`
//! ASC, id DESC. El primero es el "latest". Repositorios, pipeline y
//! actualizador masivo usan exactamente esta comparación.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use std::cmp::Ordering;

use super::trip::Trip;

/// Compara dos viajes según el orden canónico; `Less` = más "latest"
///
/// Viajes sin fecha quedan al final (nunca son candidatos).
pub fn compare_latest(a: &Trip, b: &Trip) -> Ordering {
    match (a.start_date, b.start_date) {
        (Some(da), Some(db)) => db
            .cmp(&da)
            .then_with(|| a.rank_index.cmp(&b.rank_index))
            .then_with(|| b.id.cmp(&a.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.id.cmp(&a.id),
    }
}

/// Selecciona el "latest" entre los viajes con fecha de inicio
pub fn select_latest<'a, I>(trips: I) -> Option<&'a Trip>
where
    I: IntoIterator<Item = &'a Trip>,
{
    trips
        .into_iter()
        .filter(|trip| trip.start_date.is_some())
        .min_by(|a, b| compare_latest(a, b))
}

/// Ordena en sitio según el orden canónico
pub fn sort_latest_first(trips: &mut [Trip]) {
    trips.sort_by(compare_latest);
}

/// Límites [inicio, fin) del día calendario de `at` en el offset dado
pub fn day_bounds(at: DateTime<Utc>, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_day = at.with_timezone(&offset).date_naive();
    let local_midnight = local_day.and_time(NaiveTime::MIN);
    let start = offset
        .from_local_datetime(&local_midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local_midnight));
    (start, start + Duration::days(1))
}

/// `true` si `started` cae dentro de la ventana de recencia respecto de `now`
///
/// Fechas futuras cuentan como recientes.
pub fn within_recency(started: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    started >= now - window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trip::NewTrip;
    use uuid::Uuid;

    fn trip(day: u32, hour: u32, rank: i32) -> Trip {
        let start = Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap();
        let mut trip = Trip::from_new(
            NewTrip {
                vehicle_no: "GJ-01-AB-1234".to_string(),
                start_date: Some(start),
                ..Default::default()
            },
            Uuid::new_v4(),
            1,
            start,
        );
        trip.rank_index = rank;
        trip
    }

    #[test]
    fn test_later_start_date_wins() {
        let older = trip(9, 23, 0);
        let newer = trip(10, 1, 3);
        assert_eq!(select_latest([&older, &newer]).unwrap().id, newer.id);
    }

    #[test]
    fn test_rank_breaks_same_instant_ties() {
        let a = trip(10, 8, 1);
        let mut b = trip(10, 8, 0);
        b.start_date = a.start_date;
        assert_eq!(select_latest([&a, &b]).unwrap().id, b.id);
    }

    #[test]
    fn test_id_desc_is_final_tiebreak() {
        let mut a = trip(10, 8, 0);
        let mut b = trip(10, 8, 0);
        a.id = Uuid::from_u128(1);
        b.id = Uuid::from_u128(2);
        assert_eq!(select_latest([&a, &b]).unwrap().id, b.id);
    }

    #[test]
    fn test_undated_trips_are_never_latest() {
        let mut undated = trip(10, 8, 0);
        undated.start_date = None;
        assert!(select_latest([&undated]).is_none());

        let dated = trip(1, 0, 5);
        let mut all = vec![undated.clone(), dated.clone()];
        sort_latest_first(&mut all);
        assert_eq!(all[0].id, dated.id);
    }

    #[test]
    fn test_day_bounds_respect_offset() {
        let ist = FixedOffset::east_opt(330 * 60).unwrap();
        // 2024-01-09 20:00 UTC es 2024-01-10 01:30 IST
        let at = Utc.with_ymd_and_hms(2024, 1, 9, 20, 0, 0).unwrap();
        let (start, end) = day_bounds(at, ist);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 9, 18, 30, 0).unwrap());
        assert_eq!(end - start, Duration::days(1));

        let utc = FixedOffset::east_opt(0).unwrap();
        let (start, _) = day_bounds(at, utc);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_recency_window() {
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        let window = Duration::days(7);
        assert!(within_recency(now - Duration::days(6), now, window));
        assert!(!within_recency(now - Duration::days(8), now, window));
    }
}

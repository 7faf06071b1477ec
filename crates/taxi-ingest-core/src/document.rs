use crate::bitmap::Rejection;
use crate::mapper::{elapsed_hours, elapsed_minutes};
use crate::record::{ParseError, ParsedRecord};
use crate::schema::Field;
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flat document written to the document store, one per ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Column id shared with the record's bitmap bits; unset until correlated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
    pub vendor_id: String,
    pub speed_mph: f64,
    pub total_amount_dollars: f64,
    pub duration_minutes: f64,
    pub passenger_count: i64,
    pub distance_miles: f64,
    pub pickup_time: NaiveDateTime,
    /// Day of the month.
    pub pickup_day: u32,
    /// Sunday = 0.
    pub pickup_weekday: u32,
    pub pickup_month: u32,
    pub pickup_year: i32,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub drop_latitude: f64,
    pub drop_longitude: f64,
    pub drop_time: NaiveDateTime,
    pub drop_day: u32,
    pub drop_weekday: u32,
    pub drop_month: u32,
    pub drop_year: i32,
    pub cab_type: u64,
}

impl Ride {
    pub fn correlate(mut self, sequence_id: u64) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentEncoder;

impl DocumentEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Builds a ride or fails with the first field error; never a partial document.
    pub fn encode(&self, record: &ParsedRecord<'_>) -> Result<Ride, Rejection> {
        let variant = record.variant();
        let cab_type = variant
            .cab_type()
            .ok_or(ParseError::UnsupportedVariant(variant.tag()))?;

        let pickup_time = record.parse_date(Field::PickupDatetime)?;
        let drop_time = record.parse_date(Field::DropoffDatetime)?;
        let passenger_count = record.parse_int(Field::PassengerCount)?;
        let distance_miles = record.parse_float(Field::TripDistance)?;
        let pickup_latitude = record.parse_float(Field::PickupLatitude)?;
        let pickup_longitude = record.parse_float(Field::PickupLongitude)?;
        let drop_latitude = record.parse_float(Field::DropoffLatitude)?;
        let drop_longitude = record.parse_float(Field::DropoffLongitude)?;
        let total_amount_dollars = record.parse_float(Field::TotalAmount)?;
        let vendor_id = record.raw(Field::VendorId)?.to_string();

        Ok(Ride {
            id: Uuid::new_v4(),
            sequence_id: None,
            vendor_id,
            speed_mph: distance_miles / elapsed_hours(pickup_time, drop_time),
            total_amount_dollars,
            duration_minutes: elapsed_minutes(pickup_time, drop_time),
            passenger_count,
            distance_miles,
            pickup_time,
            pickup_day: pickup_time.day(),
            pickup_weekday: pickup_time.weekday().num_days_from_sunday(),
            pickup_month: pickup_time.month(),
            pickup_year: pickup_time.year(),
            pickup_latitude,
            pickup_longitude,
            drop_latitude,
            drop_longitude,
            drop_time,
            drop_day: drop_time.day(),
            drop_weekday: drop_time.weekday().num_days_from_sunday(),
            drop_month: drop_time.month(),
            drop_year: drop_time.year(),
            cab_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{GREEN_LINE, YELLOW_LINE};
    use crate::record::RawRecord;
    use crate::schema::SchemaRegistry;

    fn encode(tag: char, line: &str) -> Result<Ride, Rejection> {
        let registry = SchemaRegistry::standard();
        let raw = RawRecord::tagged(tag, line);
        let record = ParsedRecord::new(&registry, &raw).expect("record splits");
        DocumentEncoder::new().encode(&record)
    }

    #[test]
    fn builds_ride_with_derived_values() {
        let ride = encode('g', GREEN_LINE).expect("green encodes");
        assert_eq!(ride.cab_type, 0);
        assert_eq!(ride.vendor_id, "2");
        assert_eq!(ride.passenger_count, 1);
        assert_eq!(ride.duration_minutes, 30.0);
        assert_eq!(ride.speed_mph, 10.0);
        assert_eq!(ride.distance_miles, 5.0);
        assert_eq!(ride.total_amount_dollars, 23.5);
        assert_eq!(ride.pickup_day, 1);
        assert_eq!(ride.pickup_weekday, 5);
        assert_eq!((ride.drop_month, ride.drop_year), (1, 2016));
        assert_eq!(ride.pickup_longitude, -73.95);
        assert_eq!(ride.drop_latitude, 40.75);
        assert_eq!(ride.sequence_id, None);
    }

    #[test]
    fn calendar_day_is_day_of_month() {
        let line = GREEN_LINE
            .replace("2016-01-01 00:00:00", "2016-01-23 23:50:00")
            .replace("2016-01-01 00:30:00", "2016-01-24 00:20:00");
        let ride = encode('g', &line).expect("green encodes");
        assert_eq!((ride.pickup_day, ride.pickup_weekday), (23, 6));
        assert_eq!((ride.drop_day, ride.drop_weekday), (24, 0));
    }

    #[test]
    fn encoding_twice_differs_only_by_id() {
        let first = encode('y', YELLOW_LINE).expect("encodes");
        let second = encode('y', YELLOW_LINE).expect("encodes");
        assert_ne!(first.id, second.id);
        assert_eq!(Ride { id: first.id, ..second }, first);
    }

    #[test]
    fn first_field_failure_aborts() {
        let line = YELLOW_LINE.replace("2016-01-01 00:30:00", "not a date");
        let err = encode('y', &line).expect_err("bad dropoff");
        assert!(matches!(
            err,
            Rejection::Parse {
                source: ParseError::MalformedDate {
                    field: Field::DropoffDatetime,
                    ..
                },
                ..
            }
        ));

        let line = GREEN_LINE.replace(",23.5,", ",,");
        let err = encode('g', &line).expect_err("empty total");
        assert!(matches!(
            err,
            Rejection::Parse {
                source: ParseError::EmptyField {
                    field: Field::TotalAmount
                },
                ..
            }
        ));
    }

    #[test]
    fn serializes_store_field_names() {
        let ride = encode('y', YELLOW_LINE).expect("encodes").correlate(7);
        let json = serde_json::to_value(&ride).expect("ride serializes");
        assert_eq!(json["_id"], ride.id.to_string());
        assert_eq!(json["sequence_id"], 7);
        assert_eq!(json["total_amount_dollars"], 23.8);
        assert_eq!(json["pickup_time"], "2016-01-01T00:00:00");
        assert_eq!(json["cab_type"], 1);
        assert_eq!(json["pickup_day"], 1);
        assert_eq!(json["drop_weekday"], 5);
        assert!(json.get("drop_longitude").is_some());
    }
}

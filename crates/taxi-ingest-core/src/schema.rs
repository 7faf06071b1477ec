use crate::record::ParseError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordVariant {
    Green,
    Yellow,
    Unknown,
}

impl RecordVariant {
    pub fn from_tag(tag: char) -> Self {
        match tag {
            'g' => Self::Green,
            'y' => Self::Yellow,
            _ => Self::Unknown,
        }
    }

    pub fn tag(self) -> char {
        match self {
            Self::Green => 'g',
            Self::Yellow => 'y',
            Self::Unknown => 'u',
        }
    }

    /// Category id of the fixed `cab_type` dimension; `None` for unknown records.
    pub fn cab_type(self) -> Option<u64> {
        match self {
            Self::Green => Some(0),
            Self::Yellow => Some(1),
            Self::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Unknown => "unknown",
        }
    }
}

const FIELD_COUNT: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    VendorId,
    PickupDatetime,
    DropoffDatetime,
    PassengerCount,
    TripDistance,
    PickupLongitude,
    PickupLatitude,
    RatecodeId,
    StoreAndFwdFlag,
    DropoffLongitude,
    DropoffLatitude,
    PaymentType,
    FareAmount,
    Extra,
    MtaTax,
    TipAmount,
    TollsAmount,
    TotalAmount,
    ImprovementSurcharge,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::VendorId,
        Field::PickupDatetime,
        Field::DropoffDatetime,
        Field::PassengerCount,
        Field::TripDistance,
        Field::PickupLongitude,
        Field::PickupLatitude,
        Field::RatecodeId,
        Field::StoreAndFwdFlag,
        Field::DropoffLongitude,
        Field::DropoffLatitude,
        Field::PaymentType,
        Field::FareAmount,
        Field::Extra,
        Field::MtaTax,
        Field::TipAmount,
        Field::TollsAmount,
        Field::TotalAmount,
        Field::ImprovementSurcharge,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VendorId => "vendor_id",
            Self::PickupDatetime => "pickup_datetime",
            Self::DropoffDatetime => "dropoff_datetime",
            Self::PassengerCount => "passenger_count",
            Self::TripDistance => "trip_distance",
            Self::PickupLongitude => "pickup_longitude",
            Self::PickupLatitude => "pickup_latitude",
            Self::RatecodeId => "ratecode_id",
            Self::StoreAndFwdFlag => "store_and_fwd_flag",
            Self::DropoffLongitude => "dropoff_longitude",
            Self::DropoffLatitude => "dropoff_latitude",
            Self::PaymentType => "payment_type",
            Self::FareAmount => "fare_amount",
            Self::Extra => "extra",
            Self::MtaTax => "mta_tax",
            Self::TipAmount => "tip_amount",
            Self::TollsAmount => "tolls_amount",
            Self::TotalAmount => "total_amount",
            Self::ImprovementSurcharge => "improvement_surcharge",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column positions for one record variant. `None` marks a field the variant
/// does not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    variant: RecordVariant,
    indices: [Option<usize>; FIELD_COUNT],
}

impl FieldSchema {
    pub fn new(variant: RecordVariant, columns: &[(Field, usize)]) -> Self {
        let mut indices = [None; FIELD_COUNT];
        for (field, index) in columns {
            indices[field.slot()] = Some(*index);
        }
        Self { variant, indices }
    }

    pub fn green() -> Self {
        Self::new(
            RecordVariant::Green,
            &[
                (Field::VendorId, 0),
                (Field::PickupDatetime, 1),
                (Field::DropoffDatetime, 2),
                (Field::StoreAndFwdFlag, 3),
                (Field::RatecodeId, 4),
                (Field::PickupLongitude, 5),
                (Field::PickupLatitude, 6),
                (Field::DropoffLongitude, 7),
                (Field::DropoffLatitude, 8),
                (Field::PassengerCount, 9),
                (Field::TripDistance, 10),
                (Field::FareAmount, 11),
                (Field::Extra, 12),
                (Field::MtaTax, 13),
                (Field::TipAmount, 14),
                (Field::TollsAmount, 15),
                (Field::TotalAmount, 17),
                (Field::PaymentType, 18),
            ],
        )
    }

    pub fn yellow() -> Self {
        Self::new(
            RecordVariant::Yellow,
            &[
                (Field::VendorId, 0),
                (Field::PickupDatetime, 1),
                (Field::DropoffDatetime, 2),
                (Field::PassengerCount, 3),
                (Field::TripDistance, 4),
                (Field::PickupLongitude, 5),
                (Field::PickupLatitude, 6),
                (Field::RatecodeId, 7),
                (Field::StoreAndFwdFlag, 8),
                (Field::DropoffLongitude, 9),
                (Field::DropoffLatitude, 10),
                (Field::PaymentType, 11),
                (Field::FareAmount, 12),
                (Field::Extra, 13),
                (Field::MtaTax, 14),
                (Field::TipAmount, 15),
                (Field::TollsAmount, 16),
                (Field::ImprovementSurcharge, 17),
                (Field::TotalAmount, 18),
            ],
        )
    }

    pub fn variant(&self) -> RecordVariant {
        self.variant
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.indices[field.slot()]
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    green: FieldSchema,
    yellow: FieldSchema,
}

impl SchemaRegistry {
    pub fn new(green: FieldSchema, yellow: FieldSchema) -> Self {
        Self { green, yellow }
    }

    pub fn standard() -> Self {
        Self::new(FieldSchema::green(), FieldSchema::yellow())
    }

    pub fn schema(&self, variant: RecordVariant) -> Result<&FieldSchema, ParseError> {
        match variant {
            RecordVariant::Green => Ok(&self.green),
            RecordVariant::Yellow => Ok(&self.yellow),
            RecordVariant::Unknown => Err(ParseError::UnsupportedVariant(variant.tag())),
        }
    }

    pub fn index(&self, variant: RecordVariant, field: Field) -> Result<usize, ParseError> {
        self.schema(variant)?
            .get(field)
            .ok_or(ParseError::AbsentField { field, variant })
    }

    pub fn supported(&self) -> [&FieldSchema; 2] {
        [&self.green, &self.yellow]
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

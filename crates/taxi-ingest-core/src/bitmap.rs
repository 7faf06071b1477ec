//! Declarative dimension catalog and the encoder that turns one parsed record
//! into its full set of bitmap bits.

use crate::elevation::ElevationTable;
use crate::mapper::{
    Derivation, ElevationMapper, GridMapper, IntMapper, LinearFloatMapper, MapError, Mapper,
};
use crate::metrics::Outcome;
use crate::record::{ParseError, ParsedRecord, ParserKind};
use crate::schema::{Field, RecordVariant, SchemaRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub const CAB_TYPE_DIMENSION: &str = "cab_type";

pub const NYC_GRID: GridMapper = GridMapper {
    x_min: -74.27,
    x_max: -73.69,
    x_res: 100,
    y_min: 40.48,
    y_max: 40.93,
    y_res: 100,
};

/// Buckets equivalent to rounding to the nearest integer over 0..=3600.
pub const ROUNDING_BINS: LinearFloatMapper = LinearFloatMapper {
    min: -0.5,
    max: 3600.5,
    res: 3601,
};

pub const ELEVATION_BINS: LinearFloatMapper = LinearFloatMapper {
    min: -32.0,
    max: 195.0,
    res: 46,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("dimension {dimension} declares {fields} fields but {parsers} parsers")]
    ArityMismatch {
        dimension: String,
        fields: usize,
        parsers: usize,
    },
    #[error("dimension {dimension} mapper takes {expected} inputs but {declared} are declared")]
    InputCountMismatch {
        dimension: String,
        expected: usize,
        declared: usize,
    },
    #[error(
        "dimension {dimension} parses input {position} as {declared:?} but its mapper expects {expected:?}"
    )]
    ParserMismatch {
        dimension: String,
        position: usize,
        declared: ParserKind,
        expected: ParserKind,
    },
    #[error("dimension {dimension} reads {field}, which the {} schema does not carry", .variant.as_str())]
    MissingField {
        dimension: String,
        field: Field,
        variant: RecordVariant,
    },
    #[error("dimension {0} is declared more than once")]
    DuplicateDimension(String),
    #[error("dimension name {0} is reserved")]
    ReservedDimension(String),
}

/// One bitmap dimension: which cells to read, how to parse them and how to map
/// the parsed values to category ids.
#[derive(Debug, Clone)]
pub struct DimensionSpec {
    pub name: String,
    pub fields: Vec<Field>,
    pub parsers: Vec<ParserKind>,
    pub mapper: Mapper,
    /// Counter for range failures of this dimension; `None` routes them to unclassified.
    pub range_outcome: Option<Outcome>,
}

impl DimensionSpec {
    pub fn new(
        name: impl Into<String>,
        fields: &[Field],
        parsers: &[ParserKind],
        mapper: Mapper,
    ) -> Self {
        Self {
            name: name.into(),
            fields: fields.to_vec(),
            parsers: parsers.to_vec(),
            mapper,
            range_outcome: None,
        }
    }

    pub fn with_range_outcome(mut self, outcome: Outcome) -> Self {
        self.range_outcome = Some(outcome);
        self
    }
}

pub fn standard_catalog(elevations: Arc<ElevationTable>) -> Vec<DimensionSpec> {
    use Field::*;
    use ParserKind::{Float, Int, Time};

    let elevation = Mapper::Elevation(ElevationMapper {
        grid: NYC_GRID,
        table: elevations,
        bins: ELEVATION_BINS,
    });
    let duration = Mapper::Derived {
        derive: Derivation::Duration,
        bins: ROUNDING_BINS,
    };
    let speed = Mapper::Derived {
        derive: Derivation::Speed,
        bins: ROUNDING_BINS,
    };
    let time_of_day = Mapper::TimeOfDay { res: 48 };

    vec![
        DimensionSpec::new(
            "passenger_count",
            &[PassengerCount],
            &[Int],
            Mapper::Int(IntMapper { min: 0, max: 9 }),
        )
        .with_range_outcome(Outcome::OutOfRangePassengerCount),
        DimensionSpec::new(
            "total_amount_dollars",
            &[TotalAmount],
            &[Float],
            Mapper::LinearFloat(ROUNDING_BINS),
        )
        .with_range_outcome(Outcome::OutOfRangeFare),
        DimensionSpec::new("pickup_time", &[PickupDatetime], &[Time], time_of_day.clone()),
        DimensionSpec::new("pickup_day", &[PickupDatetime], &[Time], Mapper::DayOfWeek),
        DimensionSpec::new("pickup_mday", &[PickupDatetime], &[Time], Mapper::DayOfMonth),
        DimensionSpec::new("pickup_month", &[PickupDatetime], &[Time], Mapper::Month),
        DimensionSpec::new("pickup_year", &[PickupDatetime], &[Time], Mapper::Year),
        DimensionSpec::new("drop_time", &[DropoffDatetime], &[Time], time_of_day),
        DimensionSpec::new("drop_day", &[DropoffDatetime], &[Time], Mapper::DayOfWeek),
        DimensionSpec::new("drop_mday", &[DropoffDatetime], &[Time], Mapper::DayOfMonth),
        DimensionSpec::new("drop_month", &[DropoffDatetime], &[Time], Mapper::Month),
        DimensionSpec::new("drop_year", &[DropoffDatetime], &[Time], Mapper::Year),
        DimensionSpec::new(
            "dist_miles",
            &[TripDistance],
            &[Float],
            Mapper::LinearFloat(ROUNDING_BINS),
        )
        .with_range_outcome(Outcome::OutOfRangeDistance),
        DimensionSpec::new(
            "duration_minutes",
            &[PickupDatetime, DropoffDatetime],
            &[Time, Time],
            duration,
        )
        .with_range_outcome(Outcome::OutOfRangeDuration),
        DimensionSpec::new(
            "speed_mph",
            &[PickupDatetime, DropoffDatetime, TripDistance],
            &[Time, Time, Float],
            speed,
        )
        .with_range_outcome(Outcome::OutOfRangeSpeed),
        DimensionSpec::new(
            "pickup_grid_id",
            &[PickupLongitude, PickupLatitude],
            &[Float, Float],
            Mapper::Grid(NYC_GRID),
        )
        .with_range_outcome(Outcome::InvalidLocation),
        DimensionSpec::new(
            "drop_grid_id",
            &[DropoffLongitude, DropoffLatitude],
            &[Float, Float],
            Mapper::Grid(NYC_GRID),
        )
        .with_range_outcome(Outcome::InvalidLocation),
        DimensionSpec::new(
            "pickup_elevation",
            &[PickupLongitude, PickupLatitude],
            &[Float, Float],
            elevation.clone(),
        ),
        DimensionSpec::new(
            "drop_elevation",
            &[DropoffLongitude, DropoffLatitude],
            &[Float, Float],
            elevation,
        ),
    ]
}

/// A category of one dimension, before a sequence id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bit {
    pub dimension: Arc<str>,
    pub category: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitAssignment {
    pub category: u64,
    pub dimension: Arc<str>,
    pub sequence_id: u64,
}

/// Every bit of one successfully encoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<Bit>,
}

impl BitSet {
    pub fn bits(&self) -> &[Bit] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn category(&self, dimension: &str) -> Option<u64> {
        self.bits
            .iter()
            .find(|bit| &*bit.dimension == dimension)
            .map(|bit| bit.category)
    }

    pub fn stamp(self, sequence_id: u64) -> Vec<BitAssignment> {
        self.bits
            .into_iter()
            .map(|bit| BitAssignment {
                category: bit.category,
                dimension: bit.dimension,
                sequence_id,
            })
            .collect()
    }
}

/// Why a record produced no output, and which counter the failure belongs to.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("parse failed{}: {source}", dimension_suffix(.dimension))]
    Parse {
        dimension: Option<Arc<str>>,
        source: ParseError,
    },
    #[error("dimension {dimension}: {source}")]
    Map {
        dimension: Arc<str>,
        outcome: Outcome,
        source: MapError,
    },
}

fn dimension_suffix(dimension: &Option<Arc<str>>) -> String {
    dimension
        .as_deref()
        .map(|name| format!(" for dimension {name}"))
        .unwrap_or_default()
}

impl Rejection {
    /// Dimension-specific counter, on top of the shared skip counter.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Parse { .. } => None,
            Self::Map { outcome, .. } => Some(*outcome),
        }
    }
}

impl From<ParseError> for Rejection {
    fn from(source: ParseError) -> Self {
        Self::Parse {
            dimension: None,
            source,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledDimension {
    name: Arc<str>,
    inputs: Vec<(Field, ParserKind)>,
    mapper: Mapper,
    range_outcome: Option<Outcome>,
}

impl CompiledDimension {
    fn route(&self, err: &MapError) -> Outcome {
        match err {
            MapError::NullLocation => Outcome::NullLocation,
            MapError::OutOfRange { .. } | MapError::PointOutOfRange { .. } => {
                self.range_outcome.unwrap_or(Outcome::Unclassified)
            }
            MapError::MissingElevation { .. } | MapError::InputMismatch { .. } => {
                Outcome::Unclassified
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BitmapEncoder {
    dimensions: Vec<CompiledDimension>,
}

impl BitmapEncoder {
    /// Validates the catalog against the registry once, so shape errors never
    /// surface per record.
    pub fn new(registry: &SchemaRegistry, catalog: Vec<DimensionSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut dimensions = Vec::with_capacity(catalog.len());

        for spec in catalog {
            if spec.name == CAB_TYPE_DIMENSION {
                return Err(ConfigError::ReservedDimension(spec.name));
            }
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateDimension(spec.name));
            }
            if spec.fields.len() != spec.parsers.len() {
                return Err(ConfigError::ArityMismatch {
                    dimension: spec.name,
                    fields: spec.fields.len(),
                    parsers: spec.parsers.len(),
                });
            }

            let expected = spec.mapper.inputs();
            if expected.len() != spec.parsers.len() {
                return Err(ConfigError::InputCountMismatch {
                    dimension: spec.name,
                    expected: expected.len(),
                    declared: spec.parsers.len(),
                });
            }
            for (position, (declared, expected)) in spec.parsers.iter().zip(expected).enumerate() {
                if declared != expected {
                    return Err(ConfigError::ParserMismatch {
                        dimension: spec.name,
                        position,
                        declared: *declared,
                        expected: *expected,
                    });
                }
            }

            for schema in registry.supported() {
                if let Some(field) = spec.fields.iter().find(|f| schema.get(**f).is_none()) {
                    return Err(ConfigError::MissingField {
                        dimension: spec.name,
                        field: *field,
                        variant: schema.variant(),
                    });
                }
            }

            dimensions.push(CompiledDimension {
                name: Arc::from(spec.name),
                inputs: spec.fields.into_iter().zip(spec.parsers).collect(),
                mapper: spec.mapper,
                range_outcome: spec.range_outcome,
            });
        }

        Ok(Self { dimensions })
    }

    pub fn standard(
        registry: &SchemaRegistry,
        elevations: Arc<ElevationTable>,
    ) -> Result<Self, ConfigError> {
        Self::new(registry, standard_catalog(elevations))
    }

    /// Every frame this encoder can emit, `cab_type` first.
    pub fn dimension_names(&self) -> Vec<&str> {
        std::iter::once(CAB_TYPE_DIMENSION)
            .chain(self.dimensions.iter().map(|dim| &*dim.name))
            .collect()
    }

    pub fn encode(&self, record: &ParsedRecord<'_>) -> Result<BitSet, Rejection> {
        let variant = record.variant();
        let cab_type = variant
            .cab_type()
            .ok_or(ParseError::UnsupportedVariant(variant.tag()))?;

        let mut bits = Vec::with_capacity(self.dimensions.len() + 1);
        bits.push(Bit {
            dimension: Arc::from(CAB_TYPE_DIMENSION),
            category: cab_type,
        });

        let mut values = Vec::new();
        for dim in &self.dimensions {
            values.clear();
            for (field, kind) in &dim.inputs {
                let value = record
                    .parse(*field, *kind)
                    .map_err(|source| Rejection::Parse {
                        dimension: Some(dim.name.clone()),
                        source,
                    })?;
                values.push(value);
            }

            let ids = dim.mapper.map(&values).map_err(|source| Rejection::Map {
                dimension: dim.name.clone(),
                outcome: dim.route(&source),
                source,
            })?;
            bits.extend(ids.into_iter().map(|category| Bit {
                dimension: dim.name.clone(),
                category,
            }));
        }

        Ok(BitSet { bits })
    }
}

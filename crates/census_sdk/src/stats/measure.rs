use serde::{Deserialize, Serialize};

/// Numeric type of the values a measure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureKind {
    Double,
    Long,
}

/// A named quantity being recorded, e.g. request latency in milliseconds.
///
/// Measures are identified by name; two measures with the same name must agree on
/// description, unit and kind to be registered side by side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measure {
    name: String,
    description: String,
    unit: String,
    kind: MeasureKind,
}

impl Measure {
    pub fn double(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            kind: MeasureKind::Double,
        }
    }

    pub fn long(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            kind: MeasureKind::Long,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn kind(&self) -> MeasureKind {
        self.kind
    }
}

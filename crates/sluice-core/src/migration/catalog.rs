use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::{Result, SluiceError};
use crate::services::ServiceRegistry;

use super::source::MigrationSource;
use super::unit::MigrationUnit;

/// Discovered migration units, unique by version and sorted ascending.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    units: Vec<MigrationUnit>,
}

impl Catalog {
    /// Discover every unit of `source` and validate the result.
    pub fn discover(source: &dyn MigrationSource, services: &ServiceRegistry) -> Result<Self> {
        let catalog = Self::from_units(source.discover(services)?)?;
        debug!("Discovered {} migration(s)", catalog.len());
        Ok(catalog)
    }

    /// Build a catalog, rejecting duplicate versions.
    pub fn from_units(mut units: Vec<MigrationUnit>) -> Result<Self> {
        let mut seen: HashMap<i64, &str> = HashMap::with_capacity(units.len());
        for unit in &units {
            if let Some(first) = seen.insert(unit.version(), unit.description()) {
                return Err(SluiceError::DuplicateVersion {
                    version: unit.version(),
                    first: first.to_string(),
                    second: unit.description().to_string(),
                });
            }
        }

        units.sort_by_key(MigrationUnit::version);
        Ok(Self { units })
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, version: i64) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by_key(&version, MigrationUnit::version)
            .ok()
            .map(|idx| &self.units[idx])
    }

    pub fn max_version(&self) -> Option<i64> {
        self.units.last().map(MigrationUnit::version)
    }

    /// Units strictly newer than the watermark, ascending. Every unit is
    /// pending when nothing has been applied yet.
    pub fn pending_after(&self, watermark: Option<i64>) -> Vec<&MigrationUnit> {
        match watermark {
            None => self.units.iter().collect(),
            Some(max) => {
                let start = self.units.partition_point(|u| u.version() <= max);
                self.units[start..].iter().collect()
            }
        }
    }

    /// Units at or below the watermark that the ledger never recorded. They
    /// will never run and usually point at a misconfigured source.
    pub fn skipped_below(
        &self,
        watermark: Option<i64>,
        applied: &BTreeSet<i64>,
    ) -> Vec<&MigrationUnit> {
        let Some(max) = watermark else {
            return Vec::new();
        };

        self.units
            .iter()
            .take_while(|u| u.version() <= max)
            .filter(|u| !applied.contains(&u.version()))
            .collect()
    }
}

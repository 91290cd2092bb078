use crate::error::Result;
use crate::services::ServiceRegistry;

use super::unit::{Migration, MigrationUnit};

/// Anything that can enumerate migration units.
pub trait MigrationSource: Send + Sync {
    /// Produce every unit this source exposes, in any order.
    fn discover(&self, services: &ServiceRegistry) -> Result<Vec<MigrationUnit>>;
}

impl MigrationSource for Vec<MigrationUnit> {
    fn discover(&self, _services: &ServiceRegistry) -> Result<Vec<MigrationUnit>> {
        Ok(self.clone())
    }
}

/// Type alias for a boxed unit constructor.
pub type UnitFactory = Box<dyn Fn(&ServiceRegistry) -> Result<MigrationUnit> + Send + Sync>;

/// Migrations defined in code.
#[derive(Default)]
pub struct CodeSource {
    factories: Vec<UnitFactory>,
}

impl CodeSource {
    /// Create a new empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ready-made unit.
    pub fn unit(mut self, unit: MigrationUnit) -> Self {
        self.factories.push(Box::new(move |_| Ok(unit.clone())));
        self
    }

    /// Add a migration type, constructed from the registry at discovery time.
    pub fn migration<M: Migration>(mut self) -> Self {
        self.factories
            .push(Box::new(|services| Ok(M::from_services(services)?.into_unit())));
        self
    }

    /// Add a unit built by a closure with access to the registry.
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ServiceRegistry) -> Result<MigrationUnit> + Send + Sync + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl MigrationSource for CodeSource {
    fn discover(&self, services: &ServiceRegistry) -> Result<Vec<MigrationUnit>> {
        self.factories.iter().map(|factory| factory(services)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SluiceError;
    use crate::schema::ColumnType;
    use crate::services::SchemaName;

    #[test]
    fn test_code_source_factory_resolves_services() {
        let source = CodeSource::new().factory(|services| {
            let schema = services.resolve::<SchemaName>()?;
            Ok(MigrationUnit::new(0, "Baseline").up(|s| {
                s.in_schema(schema.get()).create_table("Person", |t| {
                    t.column("Uid", ColumnType::Guid).primary_key();
                });
            }))
        });

        let mut services = ServiceRegistry::new();
        services.bind(SchemaName::new(Some("zeta"))).unwrap();

        let units = source.discover(&services).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].description(), "Baseline");
    }

    #[test]
    fn test_missing_service_surfaces_unresolved_binding() {
        let source = CodeSource::new().factory(|services| {
            services.resolve::<SchemaName>()?;
            Ok(MigrationUnit::new(0, "Baseline"))
        });

        let err = source.discover(&ServiceRegistry::new()).unwrap_err();
        assert!(matches!(err, SluiceError::UnresolvedBinding(_)));
    }
}

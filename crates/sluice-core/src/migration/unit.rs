use crate::error::Result;
use crate::schema::{reverse_operations, SchemaBuilder, SchemaOperation};
use crate::services::ServiceRegistry;

/// One versioned, ordered set of schema operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    version: i64,
    description: String,
    up: Vec<SchemaOperation>,
    down: Option<Vec<SchemaOperation>>,
}

impl MigrationUnit {
    pub fn new(version: i64, description: impl Into<String>) -> Self {
        Self {
            version,
            description: description.into(),
            up: Vec::new(),
            down: None,
        }
    }

    /// Declare the forward operations.
    pub fn up<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut SchemaBuilder),
    {
        let mut schema = SchemaBuilder::new();
        build(&mut schema);
        self.up = schema.into_operations();
        self
    }

    /// Declare explicit reverse operations instead of the derived ones.
    pub fn down<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut SchemaBuilder),
    {
        let mut schema = SchemaBuilder::new();
        build(&mut schema);
        self.down = Some(schema.into_operations());
        self
    }

    pub fn with_operations(
        mut self,
        up: Vec<SchemaOperation>,
        down: Option<Vec<SchemaOperation>>,
    ) -> Self {
        self.up = up;
        self.down = down;
        self
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn up_operations(&self) -> &[SchemaOperation] {
        &self.up
    }

    /// Whether reverse operations were declared explicitly.
    pub fn has_explicit_down(&self) -> bool {
        self.down.is_some()
    }

    /// Operations that undo this unit: the explicit ones, or the reversal of
    /// `up` when every forward operation can be reversed.
    pub fn down_operations(&self) -> Option<Vec<SchemaOperation>> {
        match &self.down {
            Some(down) => Some(down.clone()),
            None => reverse_operations(&self.up),
        }
    }
}

/// A migration defined as a type.
///
/// The runner constructs it from the service registry, so it can pick up
/// whatever context the host bound (e.g. [`SchemaName`](crate::services::SchemaName)).
pub trait Migration: Sized + Send + Sync + 'static {
    const VERSION: i64;
    const DESCRIPTION: &'static str;

    fn from_services(services: &ServiceRegistry) -> Result<Self>;

    fn up(&self, schema: &mut SchemaBuilder);

    /// Reverse operations. Leaving the builder empty reverses `up` automatically.
    fn down(&self, _schema: &mut SchemaBuilder) {}

    fn into_unit(self) -> MigrationUnit {
        let mut up = SchemaBuilder::new();
        self.up(&mut up);

        let mut down = SchemaBuilder::new();
        self.down(&mut down);
        let down = (!down.is_empty()).then(|| down.into_operations());

        MigrationUnit::new(Self::VERSION, Self::DESCRIPTION)
            .with_operations(up.into_operations(), down)
    }
}

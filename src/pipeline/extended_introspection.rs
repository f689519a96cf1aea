use super::PipelineModule;
use crate::error::Error;
use crate::extended::{ExtendedSchema, add_extended_introspection};

/// Publishes the woven metadata, so that this gateway can itself be an
/// endpoint of another one.
pub struct ExtendedIntrospectionModule;

impl PipelineModule for ExtendedIntrospectionModule {
    fn name(&self) -> &'static str {
        "extended-introspection"
    }

    fn transform_extended_schema(&mut self, mut extended: ExtendedSchema) -> Result<ExtendedSchema, Error> {
        add_extended_introspection(&mut extended.schema, &extended.field_metadata)?;
        Ok(extended)
    }
}

use super::PipelineModule;
use crate::error::Error;
use crate::extended::{ExtendedSchema, FieldMetadataMap};

/// Adds the metadata configured for an endpoint to what the endpoint
/// publishes itself. Configured entries win.
pub struct AdditionalMetadataModule {
    metadata: FieldMetadataMap,
}

impl AdditionalMetadataModule {
    pub fn new(metadata: FieldMetadataMap) -> Self {
        AdditionalMetadataModule { metadata }
    }
}

impl PipelineModule for AdditionalMetadataModule {
    fn name(&self) -> &'static str {
        "additional-metadata"
    }

    fn transform_extended_schema(&mut self, schema: ExtendedSchema) -> Result<ExtendedSchema, Error> {
        for key in self.metadata.keys() {
            let known = key
                .split_once('.')
                .is_some_and(|(type_name, field_name)| schema.schema.field(type_name, field_name).is_some());
            if !known {
                tracing::warn!(key = %key, "configured metadata refers to an unknown field");
            }
        }
        Ok(schema.with_field_metadata(&self.metadata))
    }
}

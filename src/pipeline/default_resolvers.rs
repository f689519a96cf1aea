use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::PipelineModule;
use crate::error::{Error, FieldError};
use crate::errors_in_data::unwrap_field_error_value;
use crate::execution::{FieldResolver, RequestContext, ResolveInfo};
use crate::schema::{Schema, TypeDef};

/// Gives every object field without a resolver one that reads forwarded
/// data.
///
/// Forwarded queries keep the client's aliases, so values are found under
/// the response key rather than the field name. Relocated errors surface
/// here as sentinels and are raised as field errors.
pub struct DefaultResolversModule;

impl PipelineModule for DefaultResolversModule {
    fn name(&self) -> &'static str {
        "default-resolvers"
    }

    fn transform_schema(&mut self, mut schema: Schema) -> Result<Schema, Error> {
        let resolver: Arc<dyn FieldResolver> = Arc::new(ResponseKeyResolver);
        for type_def in schema.types.values_mut() {
            if let TypeDef::Object(object) = type_def {
                for field in object.fields.values_mut() {
                    field.resolver.get_or_insert_with(|| resolver.clone());
                }
            }
        }
        Ok(schema)
    }
}

struct ResponseKeyResolver;

#[async_trait]
impl FieldResolver for ResponseKeyResolver {
    async fn resolve(
        &self,
        parent: &Value,
        _args: &Map<String, Value>,
        _context: &RequestContext,
        info: &ResolveInfo<'_>,
    ) -> Result<Value, FieldError> {
        let value = parent.get(info.response_key()).cloned().unwrap_or(Value::Null);
        unwrap_field_error_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::execute;
    use crate::query::parse_document;
    use crate::response::GraphQLError;
    use crate::errors_in_data::FieldErrorValue;
    use crate::execution::resolver_fn;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn reads_values_by_alias_and_raises_sentinels() {
        let mut schema = Schema::from_sdl("type Person { name: String, age: Int } type Query { person: Person }").unwrap();
        let failed_age = FieldErrorValue::new(Value::Null, vec![GraphQLError::new("age unknown")]).to_value();
        schema
            .set_resolver(
                "Query",
                "person",
                resolver_fn(move |_, _| Ok(json!({ "n": "Ada", "age": failed_age.clone() }))),
            )
            .unwrap();
        let schema = DefaultResolversModule.transform_schema(schema).unwrap();

        let document = parse_document("{ person { n: name age } }").unwrap();
        let result = execute(&schema, &document, None, &Map::new(), &RequestContext::new()).await;

        assert_eq!(result.data, Some(json!({ "person": { "n": "Ada", "age": null } })));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "age unknown");
    }
}

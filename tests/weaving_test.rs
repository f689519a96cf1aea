use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use weaver::execution::{RequestContext, execute, resolver_fn};
use weaver::extended::{FieldMetadata, FieldMetadataMap, JoinConfig, LinkConfig};
use weaver::query::{Document, parse_document};
use weaver::response::{Location, PathSegment};
use weaver::{
    EndpointConfig, Error, ExecutionResult, FieldError, LocalUpstream, Schema, Upstream, UpstreamError,
    WeavingConfig, WeavingErrorHandlingMode, weave_schema, weave_schema_with_errors,
};

const COUNTRIES_SDL: &str = r#"
    type Country { identCode: String, isoCode: String, continent: String }
    input CountryFilter { identCode_in: [String], continent: String }
    type Query {
        country(identCode: String): Country
        allCountries(filter: CountryFilter): [Country]
    }
"#;

const PEOPLE_SDL: &str = r#"
    type Person { name: String, nationality: String }
    input PersonFilter { name: String, nationality_in: [String] }
    type Query {
        person: Person
        people(filter: PersonFilter): [Person]
    }
"#;

const TRAVELLERS_SDL: &str = r#"
    type Traveller { name: String, visited: [String] }
    type Query { traveller: Traveller }
"#;

fn countries() -> Vec<Value> {
    vec![
        json!({"identCode": "DE", "isoCode": "DEU", "continent": "Europe"}),
        json!({"identCode": "FR", "isoCode": "FRA", "continent": "Europe"}),
        json!({"identCode": "US", "isoCode": "USA", "continent": "America"}),
    ]
}

fn people() -> Vec<Value> {
    vec![
        json!({"name": "Ann", "nationality": "DE"}),
        json!({"name": "Bob", "nationality": "US"}),
        json!({"name": "Cid", "nationality": "FR"}),
        json!({"name": "Dee", "nationality": "XX"}),
    ]
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()
    })
}

/// In-process endpoints, counting the calls of `allCountries`.
struct Fixture {
    all_countries_calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            all_countries_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn countries_schema(&self) -> Schema {
        let mut schema = Schema::from_sdl(COUNTRIES_SDL).unwrap();
        schema
            .set_resolver(
                "Query",
                "country",
                resolver_fn(|_, args| {
                    let code = args.get("identCode").and_then(Value::as_str);
                    Ok(countries()
                        .into_iter()
                        .find(|country| country["identCode"].as_str() == code)
                        .unwrap_or(Value::Null))
                }),
            )
            .unwrap();
        let calls = self.all_countries_calls.clone();
        schema
            .set_resolver(
                "Query",
                "allCountries",
                resolver_fn(move |_, args| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let filter = args.get("filter");
                    let codes = string_list(filter.and_then(|filter| filter.get("identCode_in")));
                    let continent = filter
                        .and_then(|filter| filter.get("continent"))
                        .and_then(Value::as_str);
                    // Reversed, so results never come in the order asked for.
                    let matching: Vec<Value> = countries()
                        .into_iter()
                        .rev()
                        .filter(|country| {
                            let code = country["identCode"].as_str().unwrap_or_default();
                            codes.as_ref().is_none_or(|codes| codes.iter().any(|c| c == code))
                        })
                        .filter(|country| continent.is_none_or(|c| country["continent"] == c))
                        .collect();
                    Ok(Value::Array(matching))
                }),
            )
            .unwrap();
        schema
    }

    fn people_schema(&self) -> Schema {
        self.people_schema_with(PEOPLE_SDL)
    }

    fn people_schema_with(&self, sdl: &str) -> Schema {
        let mut schema = Schema::from_sdl(sdl).unwrap();
        schema
            .set_resolver("Query", "person", resolver_fn(|_, _| Ok(people()[0].clone())))
            .unwrap();
        schema
            .set_resolver(
                "Query",
                "people",
                resolver_fn(|_, args| {
                    let codes = string_list(
                        args.get("filter")
                            .and_then(|filter| filter.get("nationality_in")),
                    );
                    Ok(Value::Array(
                        people()
                            .into_iter()
                            .filter(|person| {
                                let code = person["nationality"].as_str().unwrap_or_default();
                                codes.as_ref().is_none_or(|codes| codes.iter().any(|c| c == code))
                            })
                            .collect(),
                    ))
                }),
            )
            .unwrap();
        schema
            .set_resolver(
                "Person",
                "name",
                resolver_fn(|parent, _| match parent["name"].as_str() {
                    Some("Bob") => Err(FieldError::new("name is classified")),
                    _ => Ok(parent["name"].clone()),
                }),
            )
            .unwrap();
        schema
    }

    fn calls(&self) -> usize {
        self.all_countries_calls.load(Ordering::SeqCst)
    }
}

fn nationality_link(link: LinkConfig) -> FieldMetadataMap {
    let mut metadata = FieldMetadataMap::new();
    metadata.insert(
        "Person.nationality".to_string(),
        FieldMetadata {
            link: Some(link),
            join: None,
        },
    );
    metadata
}

fn batch_link(field: &str) -> LinkConfig {
    LinkConfig {
        field: field.to_string(),
        argument: "filter.identCode_in".to_string(),
        batch_mode: true,
        key_field: Some("identCode".to_string()),
        link_field_name: None,
    }
}

/// An endpoint that cannot be reached.
struct Unreachable;

#[async_trait]
impl Upstream for Unreachable {
    async fn execute(
        &self,
        _document: &Document,
        _variables: &Map<String, Value>,
        _context: &RequestContext,
        _is_introspection: bool,
    ) -> Result<ExecutionResult, UpstreamError> {
        Err(UpstreamError::Execution("connection refused".to_string()))
    }
}

/// Answers introspection, but fails every other call with a 503.
struct Overloaded(LocalUpstream);

#[async_trait]
impl Upstream for Overloaded {
    async fn execute(
        &self,
        document: &Document,
        variables: &Map<String, Value>,
        context: &RequestContext,
        is_introspection: bool,
    ) -> Result<ExecutionResult, UpstreamError> {
        if is_introspection {
            return self.0.execute(document, variables, context, true).await;
        }
        Err(UpstreamError::Status {
            url: "http://countries.test".to_string(),
            status: 503,
            body: "down".to_string(),
        })
    }
}

fn travellers_schema() -> Schema {
    let mut schema = Schema::from_sdl(TRAVELLERS_SDL).unwrap();
    schema
        .set_resolver(
            "Query",
            "traveller",
            resolver_fn(|_, _| Ok(json!({"name": "Eve", "visited": ["DE", null, "FR"]}))),
        )
        .unwrap();
    schema
}

async fn run(schema: &Schema, query: &str) -> ExecutionResult {
    let document = parse_document(query).unwrap();
    execute(schema, &document, None, &Map::new(), &RequestContext::new()).await
}

#[tokio::test]
async fn single_endpoint_is_served_unchanged() {
    let fixture = Fixture::new();
    let source = fixture.countries_schema();
    let schema = weave_schema(WeavingConfig::new(vec![EndpointConfig::schema(source.clone())]))
        .await
        .unwrap();

    let names = |schema: &Schema| -> Vec<String> {
        let mut names: Vec<String> = schema
            .user_types()
            .map(|t| t.name().to_string())
            .filter(|name| !name.starts_with('_'))
            .collect();
        names.sort();
        names
    };
    assert_eq!(names(&schema), names(&source));

    let result = run(&schema, "{ country(identCode: \"FR\") { isoCode } }").await;
    assert_eq!(result.data, Some(json!({"country": {"isoCode": "FRA"}})));
}

#[tokio::test]
async fn root_fields_provided_twice_are_fatal() {
    let endpoint = || {
        EndpointConfig::schema(Schema::from_sdl("type Query { field: String }").unwrap())
    };
    let config = WeavingConfig::new(vec![
        endpoint().with_type_prefix("A"),
        endpoint().with_type_prefix("B"),
    ]);

    let result = weave_schema(config).await;

    assert!(matches!(
        result,
        Err(Error::DuplicateField { ref field_name, .. }) if field_name == "field"
    ));
}

#[tokio::test]
async fn failing_endpoint_aborts_weaving_by_default() {
    let config = WeavingConfig::new(vec![
        EndpointConfig::client(Arc::new(Unreachable)).with_namespace("ns"),
    ]);

    let result = weave_schema(config).await;

    assert!(matches!(result, Err(Error::Weaving(_))));
}

#[tokio::test]
async fn failing_endpoint_is_left_out_when_continuing() {
    let fixture = Fixture::new();
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::client(Arc::new(Unreachable)).with_namespace("ns"),
    ])
    .with_error_handling(WeavingErrorHandlingMode::Continue);

    let result = weave_schema_with_errors(config).await.unwrap();

    assert!(result.has_errors);
    assert_eq!(result.errors.len(), 1);
    let endpoint = result.errors[0].endpoint.as_ref().unwrap();
    assert_eq!(endpoint.namespace.as_deref(), Some("ns"));
    assert!(result.schema.field("Query", "ns").is_none());
    assert!(result.schema.field("Query", "_errors").is_none());
    assert!(result.schema.field("Query", "country").is_some());
}

#[tokio::test]
async fn failures_are_reported_in_the_schema_with_placeholders() {
    let fixture = Fixture::new();
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::client(Arc::new(Unreachable)).with_namespace("geo"),
    ])
    .with_error_handling(WeavingErrorHandlingMode::ContinueAndAddPlaceholders);

    let result = weave_schema_with_errors(config).await.unwrap();
    let response = run(&result.schema, "{ geo { _error } _errors { message endpoint } }").await;

    let message = "failed to introspect upstream: connection refused";
    assert_eq!(
        response.data,
        Some(json!({
            "geo": {"_error": message},
            "_errors": [{"message": message, "endpoint": "geo"}],
        }))
    );
}

#[tokio::test]
async fn links_resolve_across_endpoints() {
    let fixture = Fixture::new();
    let link = LinkConfig {
        field: "country".to_string(),
        argument: "identCode".to_string(),
        ..Default::default()
    };
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::schema(fixture.people_schema()).with_field_metadata(nationality_link(link)),
    ]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(&schema, "{ person { name nationality { isoCode } } }").await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.data,
        Some(json!({"person": {"name": "Ann", "nationality": {"isoCode": "DEU"}}}))
    );
}

#[tokio::test]
async fn batched_links_are_realigned_by_key_field() {
    let fixture = Fixture::new();
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::schema(fixture.people_schema())
            .with_field_metadata(nationality_link(batch_link("allCountries"))),
    ]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(
        &schema,
        "{ people(filter: { nationality_in: [\"DE\", \"FR\", \"XX\"] }) { nationality { isoCode } } }",
    )
    .await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.data,
        Some(json!({"people": [
            {"nationality": {"isoCode": "DEU"}},
            {"nationality": {"isoCode": "FRA"}},
            {"nationality": null},
        ]}))
    );
    assert_eq!(fixture.calls(), 1);
}

#[tokio::test]
async fn links_reach_into_namespaces() {
    let fixture = Fixture::new();
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()).with_namespace("geo"),
        EndpointConfig::schema(fixture.people_schema())
            .with_field_metadata(nationality_link(batch_link("geo.allCountries"))),
    ]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(&schema, "{ person { nationality { isoCode } } geo { country(identCode: \"US\") { isoCode } } }").await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.data,
        Some(json!({
            "person": {"nationality": {"isoCode": "DEU"}},
            "geo": {"country": {"isoCode": "USA"}},
        }))
    );
}

#[tokio::test]
async fn endpoint_errors_are_relocated_to_their_fields() {
    let fixture = Fixture::new();
    let schema = weave_schema(WeavingConfig::new(vec![EndpointConfig::schema(fixture.people_schema())]))
        .await
        .unwrap();

    let result = run(&schema, "{ people { name } }").await;

    assert_eq!(
        result.data,
        Some(json!({"people": [
            {"name": "Ann"},
            {"name": null},
            {"name": "Cid"},
            {"name": "Dee"},
        ]}))
    );
    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.message, "name is classified");
    assert_eq!(
        error.path,
        Some(vec!["people".into(), PathSegment::Index(1), "name".into()])
    );
    assert_eq!(error.locations, vec![Location { line: 1, column: 12 }]);
}

#[tokio::test]
async fn metadata_follows_prefixed_types() {
    let fixture = Fixture::new();
    let link = LinkConfig {
        field: "country".to_string(),
        argument: "identCode".to_string(),
        ..Default::default()
    };
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::schema(fixture.people_schema())
            .with_type_prefix("P")
            .with_field_metadata(nationality_link(link)),
    ]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(
        &schema,
        "{ person { nationality { isoCode } } _extIntrospection { types { name fields { name metadata { link { field } } } } } }",
    )
    .await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let data = result.data.unwrap();
    assert_eq!(data["person"], json!({"nationality": {"isoCode": "DEU"}}));
    assert_eq!(
        data["_extIntrospection"]["types"],
        json!([{
            "name": "PPerson",
            "fields": [{"name": "nationality", "metadata": {"link": {"field": "country"}}}],
        }])
    );
}

#[tokio::test]
async fn joins_filter_by_linked_objects() {
    let fixture = Fixture::new();
    let mut metadata = nationality_link(batch_link("allCountries"));
    metadata.insert(
        "Query.people".to_string(),
        FieldMetadata {
            link: None,
            join: Some(JoinConfig {
                link_field: "nationality".to_string(),
            }),
        },
    );
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::schema(fixture.people_schema()).with_field_metadata(metadata),
    ]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(
        &schema,
        "{ people(filter: { nationality: { continent: \"Europe\" } }) { name nationality { isoCode } } }",
    )
    .await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.data,
        Some(json!({"people": [
            {"name": "Ann", "nationality": {"isoCode": "DEU"}},
            {"name": "Cid", "nationality": {"isoCode": "FRA"}},
        ]}))
    );
}

#[tokio::test]
async fn unbatched_links_resolve_list_keys_one_by_one() {
    let fixture = Fixture::new();
    let mut metadata = FieldMetadataMap::new();
    metadata.insert(
        "Traveller.visited".to_string(),
        FieldMetadata {
            link: Some(LinkConfig {
                field: "country".to_string(),
                argument: "identCode".to_string(),
                ..Default::default()
            }),
            join: None,
        },
    );
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::schema(travellers_schema()).with_field_metadata(metadata),
    ]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(&schema, "{ traveller { name visited { isoCode } } }").await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.data,
        Some(json!({"traveller": {
            "name": "Eve",
            "visited": [{"isoCode": "DEU"}, null, {"isoCode": "FRA"}],
        }}))
    );
}

#[tokio::test]
async fn failed_upstream_calls_keep_their_original_error() {
    let fixture = Fixture::new();
    let upstream = Overloaded(LocalUpstream::new(fixture.countries_schema()));
    let config = WeavingConfig::new(vec![EndpointConfig::client(Arc::new(upstream))]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(&schema, "{ country(identCode: \"DE\") { isoCode } }").await;

    assert_eq!(result.data, Some(json!({"country": null})));
    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.message, "http://countries.test responded with status 503: down");
    assert_eq!(error.path, Some(vec!["country".into()]));
    assert!(matches!(
        error.original_error.as_deref(),
        Some(UpstreamError::Status { status: 503, .. })
    ));
    let serialized = serde_json::to_value(error).unwrap();
    assert!(serialized.get("originalError").is_none() && serialized.get("original_error").is_none());
}

#[tokio::test]
async fn joins_without_a_key_filter_drop_unmatched_items() {
    let fixture = Fixture::new();
    let mut metadata = nationality_link(batch_link("allCountries"));
    metadata.insert(
        "Query.people".to_string(),
        FieldMetadata {
            link: None,
            join: Some(JoinConfig {
                link_field: "nationality".to_string(),
            }),
        },
    );
    let sdl = PEOPLE_SDL.replace("name: String, nationality_in: [String]", "name: String");
    let config = WeavingConfig::new(vec![
        EndpointConfig::schema(fixture.countries_schema()),
        EndpointConfig::schema(fixture.people_schema_with(&sdl)).with_field_metadata(metadata),
    ]);
    let schema = weave_schema(config).await.unwrap();

    let result = run(
        &schema,
        "{ people(filter: { nationality: { continent: \"Europe\" } }) { name } }",
    )
    .await;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(
        result.data,
        Some(json!({"people": [{"name": "Ann"}, {"name": "Cid"}]}))
    );
}

//! Index schema definition and the delete-then-create lifecycle.
//!
//! The types here serialize to the Azure AI Search REST shape
//! (`api-version=2023-11-01`) so [`AzureSearchStore`](crate::store::azure::AzureSearchStore)
//! can post them as-is. [`index_schema`] declares the fields and HNSW vector
//! configuration this tool indexes into; [`recreate`] replaces whatever index
//! of that name exists.
//!
//! There is no migration path. Changing the schema means deleting the index
//! and re-ingesting everything.

use std::collections::HashSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Config;
use crate::error::SchemaError;
use crate::store::IndexStore;

/// Analyzer applied to the full-text fields.
pub const TEXT_ANALYZER: &str = "en.microsoft";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    pub name: String,
    pub fields: Vec<SearchField>,
    pub vector_search: VectorSearch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggesters: Vec<Suggester>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_options: Option<CorsOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "Edm.String")]
    String,
    #[serde(rename = "Edm.Int32")]
    Int32,
    #[serde(rename = "Edm.Int64")]
    Int64,
    #[serde(rename = "Edm.DateTimeOffset")]
    DateTimeOffset,
    #[serde(rename = "Collection(Edm.Single)")]
    SingleCollection,
    #[serde(rename = "Collection(Edm.ComplexType)")]
    ComplexCollection,
}

/// One field of the index. Unset flags are left to the service default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facetable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SearchField>,
}

impl SearchField {
    /// A scalar field, not full-text searchable.
    pub fn simple(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            key: false,
            searchable: Some(false),
            filterable: None,
            sortable: None,
            facetable: None,
            analyzer: None,
            dimensions: None,
            vector_search_profile: None,
            fields: Vec::new(),
        }
    }

    /// A full-text string field with an optional analyzer.
    pub fn text(name: &str, analyzer: Option<&str>) -> Self {
        Self {
            searchable: Some(true),
            analyzer: analyzer.map(str::to_string),
            ..Self::simple(name, FieldType::String)
        }
    }

    /// A float vector field bound to a vector-search profile.
    pub fn vector(name: &str, dimensions: i64, profile: &str) -> Self {
        Self {
            searchable: Some(true),
            dimensions: Some(dimensions),
            vector_search_profile: Some(profile.to_string()),
            ..Self::simple(name, FieldType::SingleCollection)
        }
    }

    /// A repeated nested object with the given sub-fields.
    pub fn complex_collection(name: &str, fields: Vec<SearchField>) -> Self {
        Self {
            searchable: None,
            fields,
            ..Self::simple(name, FieldType::ComplexCollection)
        }
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = Some(true);
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = Some(true);
        self
    }

    pub fn facetable(mut self) -> Self {
        self.facetable = Some(true);
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = Some(true);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearch {
    pub algorithms: Vec<HnswAlgorithm>,
    pub profiles: Vec<VectorProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswAlgorithm {
    pub name: String,
    /// Always `"hnsw"`.
    pub kind: String,
    pub hnsw_parameters: HnswParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswParameters {
    pub m: u32,
    pub ef_construction: u32,
    pub ef_search: u32,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

/// Binds a vector field to an algorithm configuration by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorProfile {
    pub name: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggester {
    pub name: String,
    pub search_mode: String,
    pub source_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsOptions {
    pub allowed_origins: Vec<String>,
    pub max_age_in_seconds: u64,
}

impl IndexSchema {
    /// Check the schema before anything is sent to the store.
    ///
    /// Rejects a missing or non-string key, duplicate field names, vector
    /// fields without positive dimensions or with an unknown profile,
    /// profiles naming unknown algorithms, HNSW parameters outside the
    /// service's accepted ranges, and suggesters over unknown fields.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::Invalid("index name is empty".into()));
        }

        let keys: Vec<&SearchField> = self.fields.iter().filter(|f| f.key).collect();
        match keys.as_slice() {
            [key] if key.field_type == FieldType::String => {}
            [key] => {
                return Err(SchemaError::Invalid(format!(
                    "key field '{}' must be Edm.String",
                    key.name
                )))
            }
            _ => {
                return Err(SchemaError::Invalid(format!(
                    "expected exactly one key field, found {}",
                    keys.len()
                )))
            }
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::Invalid(format!("duplicate field '{}'", field.name)));
            }
        }

        let algorithms: HashSet<&str> = self
            .vector_search
            .algorithms
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        for algorithm in &self.vector_search.algorithms {
            let p = &algorithm.hnsw_parameters;
            if !(4..=10).contains(&p.m) {
                return Err(SchemaError::Invalid(format!(
                    "algorithm '{}': m must be in [4, 10], got {}",
                    algorithm.name, p.m
                )));
            }
            if !(100..=1000).contains(&p.ef_construction) || !(100..=1000).contains(&p.ef_search) {
                return Err(SchemaError::Invalid(format!(
                    "algorithm '{}': efConstruction and efSearch must be in [100, 1000]",
                    algorithm.name
                )));
            }
        }

        let mut profiles = HashSet::new();
        for profile in &self.vector_search.profiles {
            if !algorithms.contains(profile.algorithm.as_str()) {
                return Err(SchemaError::Invalid(format!(
                    "profile '{}' references unknown algorithm '{}'",
                    profile.name, profile.algorithm
                )));
            }
            profiles.insert(profile.name.as_str());
        }

        for field in self
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::SingleCollection)
        {
            match field.dimensions {
                Some(d) if d > 0 => {}
                other => {
                    return Err(SchemaError::Invalid(format!(
                        "vector field '{}' needs dimensions > 0, got {:?}",
                        field.name, other
                    )))
                }
            }
            let profile = field.vector_search_profile.as_deref().unwrap_or_default();
            if !profiles.contains(profile) {
                return Err(SchemaError::Invalid(format!(
                    "vector field '{}' references unknown profile '{}'",
                    field.name, profile
                )));
            }
        }

        for suggester in &self.suggesters {
            if let Some(missing) = suggester
                .source_fields
                .iter()
                .find(|f| !names.contains(f.as_str()))
            {
                return Err(SchemaError::Invalid(format!(
                    "suggester '{}' references unknown field '{}'",
                    suggester.name, missing
                )));
            }
        }

        Ok(())
    }

    pub fn vector_dimensions(&self) -> Option<usize> {
        self.fields
            .iter()
            .find(|f| f.field_type == FieldType::SingleCollection)
            .and_then(|f| f.dimensions)
            .and_then(|d| usize::try_from(d).ok())
    }
}

/// The index this tool writes: record fields, access-control collection,
/// HNSW vector search, name suggester, and open CORS.
pub fn index_schema(config: &Config) -> IndexSchema {
    let vs = &config.vector_search;
    let dims = i64::try_from(config.embedding.dims).unwrap_or(i64::MAX);

    let fields = vec![
        SearchField::simple("id", FieldType::String)
            .key()
            .filterable()
            .sortable(),
        SearchField::simple("doc_id", FieldType::String)
            .filterable()
            .facetable()
            .sortable(),
        SearchField::simple("chunk_id", FieldType::Int32)
            .filterable()
            .sortable(),
        SearchField::text("name", Some(TEXT_ANALYZER))
            .filterable()
            .sortable(),
        SearchField::simple("created_datetime", FieldType::DateTimeOffset)
            .facetable()
            .filterable()
            .sortable(),
        SearchField::text("created_by", None).filterable().sortable(),
        SearchField::simple("size", FieldType::Int64)
            .facetable()
            .filterable()
            .sortable(),
        SearchField::simple("last_modified_datetime", FieldType::DateTimeOffset)
            .facetable()
            .filterable()
            .sortable(),
        SearchField::text("last_modified_by", None)
            .filterable()
            .sortable(),
        SearchField::simple("source", FieldType::String),
        SearchField::text("content", Some(TEXT_ANALYZER)),
        SearchField::vector("contentVector", dims, &vs.profile_name),
        SearchField::complex_collection(
            "read_access_entity",
            vec![SearchField::simple("list_item", FieldType::String)
                .searchable()
                .filterable()],
        ),
    ];

    IndexSchema {
        name: config.index.name.clone(),
        fields,
        vector_search: VectorSearch {
            algorithms: vec![HnswAlgorithm {
                name: vs.algorithm_name.clone(),
                kind: "hnsw".to_string(),
                hnsw_parameters: HnswParameters {
                    m: vs.m,
                    ef_construction: vs.ef_construction,
                    ef_search: vs.ef_search,
                    metric: vs.metric,
                },
            }],
            profiles: vec![VectorProfile {
                name: vs.profile_name.clone(),
                algorithm: vs.algorithm_name.clone(),
            }],
        },
        suggesters: vec![Suggester {
            name: "sg".to_string(),
            search_mode: "analyzingInfixMatching".to_string(),
            source_fields: vec!["name".to_string()],
        }],
        cors_options: Some(CorsOptions {
            allowed_origins: vec!["*".to_string()],
            max_age_in_seconds: 60,
        }),
    }
}

/// Delete any index named like `schema`, then create it fresh.
///
/// A failed delete (usually: the index doesn't exist) is logged and
/// ignored. Returns `false` if the schema is invalid or creation fails; an
/// invalid schema never reaches the store, so nothing is deleted or created.
pub async fn recreate(store: &dyn IndexStore, schema: &IndexSchema) -> bool {
    if let Err(e) = schema.validate() {
        error!(index = %schema.name, error = %e, "refusing to create index");
        return false;
    }

    match store.delete_index(&schema.name).await {
        Ok(()) => info!(index = %schema.name, "index deleted"),
        Err(e) => info!(index = %schema.name, error = %e, "index not deleted, continuing"),
    }

    match store.create_index(schema).await {
        Ok(created) => {
            info!(index = %created.name, "index created");
            true
        }
        Err(e) => {
            error!(index = %schema.name, error = %e, "index creation failed");
            false
        }
    }
}

/// `docidx index create`
pub async fn run_index_create(config: &Config, store: &dyn IndexStore) -> Result<()> {
    let schema = index_schema(config);
    if !recreate(store, &schema).await {
        bail!("Failed to create index '{}'", schema.name);
    }
    println!("Index {} created", schema.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config() -> Config {
        parse_config(
            r#"
[index]
name = "sp-docs"
endpoint = "https://acme.search.windows.net"

[embedding]
endpoint = "https://acme.openai.azure.com"
model = "ada"

[source]
kind = "filesystem"

[source.filesystem]
root = "."
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_reference_schema_is_valid() {
        let schema = index_schema(&config());
        schema.validate().unwrap();
        assert_eq!(schema.vector_dimensions(), Some(1536));
    }

    #[test]
    fn test_reference_schema_wire_shape() {
        let json = serde_json::to_value(index_schema(&config())).unwrap();

        let alg = &json["vectorSearch"]["algorithms"][0];
        assert_eq!(alg["name"], "myHnsw");
        assert_eq!(alg["kind"], "hnsw");
        assert_eq!(alg["hnswParameters"]["m"], 4);
        assert_eq!(alg["hnswParameters"]["efConstruction"], 400);
        assert_eq!(alg["hnswParameters"]["efSearch"], 1000);
        assert_eq!(alg["hnswParameters"]["metric"], "cosine");
        assert_eq!(json["vectorSearch"]["profiles"][0]["algorithm"], "myHnsw");

        let fields = json["fields"].as_array().unwrap();
        let field = |name: &str| fields.iter().find(|f| f["name"] == name).unwrap().clone();
        assert_eq!(field("id")["key"], true);
        assert_eq!(field("size")["type"], "Edm.Int64");
        assert_eq!(field("content")["analyzer"], "en.microsoft");
        assert_eq!(field("contentVector")["type"], "Collection(Edm.Single)");
        assert_eq!(field("contentVector")["dimensions"], 1536);
        assert_eq!(field("contentVector")["vectorSearchProfile"], "myHnswProfile");
        let acl = field("read_access_entity");
        assert_eq!(acl["type"], "Collection(Edm.ComplexType)");
        assert_eq!(acl["fields"][0]["name"], "list_item");
        assert_eq!(acl["fields"][0]["filterable"], true);

        assert_eq!(json["suggesters"][0]["sourceFields"][0], "name");
        assert_eq!(json["corsOptions"]["allowedOrigins"][0], "*");
        assert_eq!(json["corsOptions"]["maxAgeInSeconds"], 60);
    }

    #[test]
    fn test_zero_dimensions_invalid() {
        let mut schema = index_schema(&config());
        for f in &mut schema.fields {
            if f.name == "contentVector" {
                f.dimensions = Some(0);
            }
        }
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_unknown_profile_invalid() {
        let mut schema = index_schema(&config());
        schema.vector_search.profiles[0].name = "other".to_string();
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("unknown profile"));
    }

    #[test]
    fn test_hnsw_ranges_enforced() {
        let mut schema = index_schema(&config());
        schema.vector_search.algorithms[0].hnsw_parameters.m = 2;
        assert!(schema.validate().is_err());

        let mut schema = index_schema(&config());
        schema.vector_search.algorithms[0].hnsw_parameters.ef_search = 5000;
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_key_rules() {
        let mut schema = index_schema(&config());
        schema.fields[1].key = true;
        assert!(schema.validate().is_err());

        let mut schema = index_schema(&config());
        schema.fields[0].key = false;
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_schema_parses_service_echo() {
        let mut json = serde_json::to_value(index_schema(&config())).unwrap();
        json["@odata.context"] = serde_json::json!("https://acme/$metadata#indexes/$entity");
        json["fields"][0]["retrievable"] = serde_json::json!(true);
        let echo: IndexSchema = serde_json::from_value(json).unwrap();
        assert_eq!(echo, index_schema(&config()));
    }
}

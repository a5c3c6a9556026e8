// DynamoDB acquirer: paginated table scan serialized as one JSON array

use crate::artifact::Artifact;
use crate::errors::AcquireError;
use crate::models::{AwsDynamoDbConfig, Job, ProviderConfig};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

pub struct DynamoDbAcquirer;

#[async_trait]
impl Acquirer for DynamoDbAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::AwsDynamoDb(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let client = build_client(cfg).await;

        let name = format!("{}.json", job.id);
        let dest = run_ctx.temp_dir.join(&name);
        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;

        info!(table = %cfg.table_name, "Scanning DynamoDB table");

        file.write_all(b"[").await?;
        let mut first = true;
        let mut items: u64 = 0;

        let mut pages = client
            .scan()
            .table_name(&cfg.table_name)
            .into_paginator()
            .send();

        loop {
            let page = tokio::select! {
                page = pages.next() => page,
                _ = step.cancel.cancelled() => return Err(AcquireError::Cancelled),
            };
            let Some(page) = page else { break };
            let page =
                page.map_err(|e| AcquireError::Request(format!("table scan failed: {}", e)))?;

            for item in page.items() {
                if !first {
                    file.write_all(b",").await?;
                }
                let json = item_to_json(item);
                let encoded = serde_json::to_vec(&json)
                    .map_err(|e| AcquireError::Io(format!("failed to encode item: {}", e)))?;
                file.write_all(&encoded).await?;
                first = false;
                items += 1;
            }
            // One beat per scanned page keeps the engine's liveness timer fed.
            step.heartbeat.beat();
        }

        file.write_all(b"]").await?;
        file.flush().await?;

        let artifact = Artifact::describe(&dest, name, "application/json").await?;
        info!(items, size = artifact.size, "Table export complete");
        Ok(artifact)
    }
}

async fn build_client(cfg: &AwsDynamoDbConfig) -> aws_sdk_dynamodb::Client {
    let credentials = Credentials::new(
        cfg.access_key_id.clone(),
        cfg.secret_access_key.clone(),
        None,
        None,
        "job-config",
    );
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(cfg.region.clone()))
        .credentials_provider(credentials)
        .load()
        .await;
    aws_sdk_dynamodb::Client::new(&sdk_config)
}

fn item_to_json(item: &HashMap<String, AttributeValue>) -> Value {
    let mut map = Map::new();
    for (key, value) in item {
        map.insert(key.clone(), attribute_to_json(value));
    }
    Value::Object(map)
}

/// Flatten a DynamoDB attribute into plain JSON. Numbers that fit JSON stay
/// numeric; everything else degrades to strings.
fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => serde_json::from_str(n)
            .unwrap_or_else(|_| Value::String(n.clone())),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::B(blob) => Value::String(hex::encode(blob.as_ref())),
        AttributeValue::L(list) => Value::Array(list.iter().map(attribute_to_json).collect()),
        AttributeValue::M(map) => {
            let mut object = Map::new();
            for (key, value) in map {
                object.insert(key.clone(), attribute_to_json(value));
            }
            Value::Object(object)
        }
        AttributeValue::Ss(set) => {
            Value::Array(set.iter().map(|s| Value::String(s.clone())).collect())
        }
        AttributeValue::Ns(set) => Value::Array(
            set.iter()
                .map(|n| serde_json::from_str(n).unwrap_or_else(|_| Value::String(n.clone())))
                .collect(),
        ),
        AttributeValue::Bs(set) => Value::Array(
            set.iter()
                .map(|blob| Value::String(hex::encode(blob.as_ref())))
                .collect(),
        ),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_attributes() {
        assert_eq!(
            attribute_to_json(&AttributeValue::S("order-1".to_string())),
            Value::String("order-1".to_string())
        );
        assert_eq!(
            attribute_to_json(&AttributeValue::N("42".to_string())),
            serde_json::json!(42)
        );
        assert_eq!(
            attribute_to_json(&AttributeValue::N("3.25".to_string())),
            serde_json::json!(3.25)
        );
        assert_eq!(attribute_to_json(&AttributeValue::Bool(true)), Value::Bool(true));
        assert_eq!(attribute_to_json(&AttributeValue::Null(true)), Value::Null);
    }

    #[test]
    fn test_nested_attributes() {
        let nested = AttributeValue::M(HashMap::from([(
            "tags".to_string(),
            AttributeValue::L(vec![
                AttributeValue::S("a".to_string()),
                AttributeValue::N("1".to_string()),
            ]),
        )]));

        assert_eq!(
            attribute_to_json(&nested),
            serde_json::json!({"tags": ["a", 1]})
        );
    }

    #[test]
    fn test_item_serializes_as_object() {
        let item = HashMap::from([
            ("id".to_string(), AttributeValue::S("k1".to_string())),
            ("count".to_string(), AttributeValue::N("7".to_string())),
        ]);
        let json = item_to_json(&item);
        assert_eq!(json["id"], "k1");
        assert_eq!(json["count"], 7);
    }
}

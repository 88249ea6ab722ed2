use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use tracing::error;
use uuid::Uuid;
use whaleray_common::models::database::{DatabaseRecord, DbState};

#[derive(Debug, thiserror::Error)]
pub enum DalError {
    Request(String),
    Malformed(String),
}

// The `Display` impl keeps store details out of user-facing messages; the
// full error is logged where it happens.
impl fmt::Display for DalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DalError::Request(error) => {
                error!(error = %error, "database table request failed");

                "failed to interact with the database table"
            }
            DalError::Malformed(error) => {
                error!(error = %error, "stored database row is malformed");

                "stored database row is malformed"
            }
        };

        write!(f, "{msg}")
    }
}

/// Placement details attached to a row once the cluster service exists.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub service_arn: String,
    pub service_registry_id: String,
    pub task_definition_arn: String,
    pub subnet_id: String,
    pub availability_zone: String,
}

/// Seam over the durable database table.
#[async_trait]
pub trait DatabaseDal: Send + Sync {
    async fn database_for_user(&self, user_id: &str) -> Result<Option<DatabaseRecord>, DalError>;
    async fn insert_database(&self, record: &DatabaseRecord) -> Result<(), DalError>;
    async fn update_placement(
        &self,
        database_id: &Uuid,
        placement: &Placement,
    ) -> Result<(), DalError>;
    async fn update_state(&self, database_id: &Uuid, state: DbState) -> Result<(), DalError>;
    async fn delete_database(&self, database_id: &Uuid) -> Result<(), DalError>;
}

pub struct DynamoDatabases {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoDatabases {
    pub fn new(client: aws_sdk_dynamodb::Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl DatabaseDal for DynamoDatabases {
    async fn database_for_user(&self, user_id: &str) -> Result<Option<DatabaseRecord>, DalError> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .index_name("userId-index")
            .key_condition_expression("userId = :userId")
            .expression_attribute_values(":userId", AttributeValue::S(user_id.to_string()))
            .limit(1)
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output.items().first().map(record_from_item).transpose()
    }

    async fn insert_database(&self, record: &DatabaseRecord) -> Result<(), DalError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record_to_item(record)))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| DalError::Request(error.to_string()))
    }

    async fn update_placement(
        &self,
        database_id: &Uuid,
        placement: &Placement,
    ) -> Result<(), DalError> {
        self.client
            .update_item()
            .table_name(&self.table)
            .key("databaseId", AttributeValue::S(database_id.to_string()))
            .update_expression(
                "SET serviceArn = :serviceArn, serviceRegistryId = :serviceRegistryId, \
                 taskDefinitionArn = :taskDefinitionArn, subnetId = :subnetId, \
                 availabilityZone = :availabilityZone",
            )
            .expression_attribute_values(
                ":serviceArn",
                AttributeValue::S(placement.service_arn.clone()),
            )
            .expression_attribute_values(
                ":serviceRegistryId",
                AttributeValue::S(placement.service_registry_id.clone()),
            )
            .expression_attribute_values(
                ":taskDefinitionArn",
                AttributeValue::S(placement.task_definition_arn.clone()),
            )
            .expression_attribute_values(":subnetId", AttributeValue::S(placement.subnet_id.clone()))
            .expression_attribute_values(
                ":availabilityZone",
                AttributeValue::S(placement.availability_zone.clone()),
            )
            .send()
            .await
            .map(|_| ())
            .map_err(|error| DalError::Request(error.to_string()))
    }

    async fn update_state(&self, database_id: &Uuid, state: DbState) -> Result<(), DalError> {
        self.client
            .update_item()
            .table_name(&self.table)
            .key("databaseId", AttributeValue::S(database_id.to_string()))
            .update_expression("SET dbState = :dbState")
            .expression_attribute_values(":dbState", AttributeValue::S(state.to_string()))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| DalError::Request(error.to_string()))
    }

    async fn delete_database(&self, database_id: &Uuid) -> Result<(), DalError> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("databaseId", AttributeValue::S(database_id.to_string()))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| DalError::Request(error.to_string()))
    }
}

fn record_to_item(record: &DatabaseRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        (
            "databaseId".to_string(),
            AttributeValue::S(record.database_id.to_string()),
        ),
        (
            "userId".to_string(),
            AttributeValue::S(record.user_id.clone()),
        ),
        (
            "dbState".to_string(),
            AttributeValue::S(record.db_state.to_string()),
        ),
        (
            "username".to_string(),
            AttributeValue::S(record.username.clone()),
        ),
        (
            "passwordParam".to_string(),
            AttributeValue::S(record.password_param.clone()),
        ),
        (
            "createdAt".to_string(),
            AttributeValue::N(record.created_at.to_string()),
        ),
    ]);

    for (name, value) in [
        ("availabilityZone", &record.availability_zone),
        ("subnetId", &record.subnet_id),
        ("serviceArn", &record.service_arn),
        ("serviceRegistryId", &record.service_registry_id),
        ("taskDefinitionArn", &record.task_definition_arn),
    ] {
        if let Some(value) = value {
            item.insert(name.to_string(), AttributeValue::S(value.clone()));
        }
    }

    item
}

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Result<DatabaseRecord, DalError> {
    Ok(DatabaseRecord {
        database_id: Uuid::from_str(required_s(item, "databaseId")?)
            .map_err(|error| DalError::Malformed(error.to_string()))?,
        user_id: required_s(item, "userId")?.to_string(),
        db_state: DbState::from_str(required_s(item, "dbState")?)
            .map_err(|error| DalError::Malformed(error.to_string()))?,
        username: required_s(item, "username")?.to_string(),
        password_param: required_s(item, "passwordParam")?.to_string(),
        availability_zone: optional_s(item, "availabilityZone"),
        subnet_id: optional_s(item, "subnetId"),
        service_arn: optional_s(item, "serviceArn"),
        service_registry_id: optional_s(item, "serviceRegistryId"),
        task_definition_arn: optional_s(item, "taskDefinitionArn"),
        created_at: required_n(item, "createdAt")?,
    })
}

fn required_s<'a>(
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> Result<&'a str, DalError> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| DalError::Malformed(format!("missing string attribute `{name}`")))
}

fn optional_s(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
}

fn required_n(item: &HashMap<String, AttributeValue>, name: &str) -> Result<i64, DalError> {
    item.get(name)
        .and_then(|value| value.as_n().ok())
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| DalError::Malformed(format!("missing numeric attribute `{name}`")))
}

pub mod args;
pub mod cluster;
pub mod creds;
pub mod dal;
mod error;

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{instrument, warn};
use uuid::Uuid;
use whaleray_common::models::database::{
    DatabaseCreated, DatabaseEndpoints, DatabaseInfo, DatabaseRecord, DbState,
};

pub use args::Args;
pub use error::Error;

use crate::cluster::{DatabaseCluster, DatabaseServiceSpec, DatabaseTaskSpec, Registry};
use crate::creds::CredentialStore;
use crate::dal::{DatabaseDal, Placement};

const PASSWORD_LENGTH: usize = 16;
const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()_+";

/// Per-user dedicated database lifecycle: create, observe, delete.
///
/// Creation is compensating: once the password secret is written, any later
/// failure tears the secret, the row and the registry back down so a retry
/// starts clean.
pub struct DatabaseService {
    dal: Arc<dyn DatabaseDal>,
    cluster: Arc<dyn DatabaseCluster>,
    credentials: Arc<dyn CredentialStore>,
    project_name: String,
    domain_name: String,
}

impl DatabaseService {
    pub fn new(
        dal: Arc<dyn DatabaseDal>,
        cluster: Arc<dyn DatabaseCluster>,
        credentials: Arc<dyn CredentialStore>,
        project_name: impl Into<String>,
        domain_name: impl Into<String>,
    ) -> Self {
        Self {
            dal,
            cluster,
            credentials,
            project_name: project_name.into(),
            domain_name: domain_name.into(),
        }
    }

    fn password_param(&self, database_id: &Uuid) -> String {
        format!("/{}/db/{database_id}/password", self.project_name)
    }

    fn endpoints(&self, database_id: &Uuid) -> DatabaseEndpoints {
        DatabaseEndpoints {
            internal: format!("db-{database_id}.{}.local", self.project_name),
            external: format!("db.{}/{database_id}", self.domain_name),
        }
    }

    /// Look up the user's database and reconcile its state against the
    /// cluster before reporting it.
    #[instrument(skip(self))]
    pub async fn get(&self, user_id: &str) -> Result<Option<DatabaseInfo>, Error> {
        let Some(record) = self.dal.database_for_user(user_id).await? else {
            return Ok(None);
        };

        let observed = self.reconcile_state(&record).await;
        if observed != record.db_state {
            self.dal.update_state(&record.database_id, observed).await?;
        }

        Ok(Some(DatabaseInfo {
            database_id: record.database_id,
            db_state: observed,
            username: record.username,
            endpoints: self.endpoints(&record.database_id),
            created_at: record.created_at,
        }))
    }

    async fn reconcile_state(&self, record: &DatabaseRecord) -> DbState {
        let Some(service) = record.service_arn.as_deref() else {
            return record.db_state;
        };

        match self.cluster.describe_service(service).await {
            Ok(Some(counts)) => {
                if counts.running == counts.desired && counts.running > 0 {
                    DbState::Available
                } else if counts.desired == 0 {
                    DbState::Stopped
                } else if counts.running < counts.desired {
                    DbState::Creating
                } else {
                    DbState::Unknown
                }
            }
            Ok(None) => DbState::Unknown,
            Err(error) => {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "could not observe database service, keeping recorded state"
                );
                record.db_state
            }
        }
    }

    /// Create the user's database. Returns the plaintext password exactly
    /// once, in this response.
    #[instrument(skip(self))]
    pub async fn create(&self, user_id: &str) -> Result<DatabaseCreated, Error> {
        if self.dal.database_for_user(user_id).await?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let database_id = Uuid::new_v4();
        let username = format!("user_{}", &database_id.to_string()[..8]);
        let password = generate_password(PASSWORD_LENGTH);
        let password_param = self.password_param(&database_id);

        // The secret write is idempotent (overwrite); everything after it
        // compensates on failure.
        self.credentials.put(&password_param, &password).await?;

        let record = DatabaseRecord {
            database_id,
            user_id: user_id.to_string(),
            db_state: DbState::Creating,
            username: username.clone(),
            password_param: password_param.clone(),
            availability_zone: None,
            subnet_id: None,
            service_arn: None,
            service_registry_id: None,
            task_definition_arn: None,
            created_at: Utc::now().timestamp(),
        };

        if let Err(error) = self.dal.insert_database(&record).await {
            self.compensate(&database_id, &password_param, None).await;
            return Err(error.into());
        }

        let mut created_registry: Option<Registry> = None;
        match self
            .provision(&record, &password, &mut created_registry)
            .await
        {
            Ok(()) => Ok(DatabaseCreated {
                database_id,
                username,
                password,
                endpoints: self.endpoints(&database_id),
            }),
            Err(error) => {
                self.compensate(
                    &database_id,
                    &password_param,
                    created_registry.as_ref().map(|registry| registry.id.as_str()),
                )
                .await;
                Err(error)
            }
        }
    }

    async fn provision(
        &self,
        record: &DatabaseRecord,
        password: &str,
        created_registry: &mut Option<Registry>,
    ) -> Result<(), Error> {
        let service_name = format!("db-{}", record.database_id);

        let (subnet_id, availability_zone) = self.cluster.pick_subnet().await?;

        let task_definition_arn = self
            .cluster
            .register_database_task(&DatabaseTaskSpec {
                family: format!("{}-db-{}", self.project_name, record.database_id),
                username: record.username.clone(),
                password: password.to_string(),
            })
            .await?;

        let registry = self.cluster.create_registry(&service_name).await?;
        created_registry.replace(registry.clone());

        self.cluster
            .create_database_service(&DatabaseServiceSpec {
                name: service_name.clone(),
                task_definition_arn: task_definition_arn.clone(),
                registry_arn: registry.arn,
                subnet_id: subnet_id.clone(),
                database_id: record.database_id.to_string(),
                user_id: record.user_id.clone(),
            })
            .await?;

        self.dal
            .update_placement(
                &record.database_id,
                &Placement {
                    service_arn: service_name,
                    service_registry_id: registry.id,
                    task_definition_arn,
                    subnet_id,
                    availability_zone,
                },
            )
            .await?;

        Ok(())
    }

    async fn compensate(&self, database_id: &Uuid, password_param: &str, registry_id: Option<&str>) {
        if let Some(registry_id) = registry_id {
            if let Err(error) = self.cluster.delete_registry(registry_id).await {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "compensation could not delete service registry"
                );
            }
        }

        if let Err(error) = self.credentials.delete(password_param).await {
            warn!(
                error = &error as &dyn std::error::Error,
                "compensation could not delete database credentials"
            );
        }

        if let Err(error) = self.dal.delete_database(database_id).await {
            warn!(
                error = &error as &dyn std::error::Error,
                "compensation could not delete database row"
            );
        }
    }

    /// Tear the user's database down. Every step is attempted even when an
    /// earlier one fails; only losing the row itself is an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: &str) -> Result<(), Error> {
        let Some(record) = self.dal.database_for_user(user_id).await? else {
            return Err(Error::NotFound);
        };

        let service = record
            .service_arn
            .clone()
            .unwrap_or_else(|| format!("db-{}", record.database_id));
        if let Err(error) = self.cluster.delete_service(&service).await {
            warn!(
                error = &error as &dyn std::error::Error,
                "could not delete database cluster service"
            );
        }

        if let Some(registry_id) = record.service_registry_id.as_deref() {
            if let Err(error) = self.cluster.delete_registry(registry_id).await {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "could not delete database service registry"
                );
            }
        }

        if let Some(task_definition_arn) = record.task_definition_arn.as_deref() {
            if let Err(error) = self.cluster.deregister_task(task_definition_arn).await {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "could not deregister database task template"
                );
            }
        }

        if let Err(error) = self.credentials.delete(&record.password_param).await {
            warn!(
                error = &error as &dyn std::error::Error,
                "could not delete database credentials"
            );
        }

        self.dal.delete_database(&record.database_id).await?;

        Ok(())
    }

    pub fn reset_password(&self) -> Result<(), Error> {
        // Requires an in-network connection to run ALTER USER.
        Err(Error::NotImplemented)
    }
}

/// A 16-character password with at least one lowercase, one uppercase and
/// three digits.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();

    loop {
        let password: String = (0..length)
            .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
            .collect();

        let digits = password.chars().filter(char::is_ascii_digit).count();
        if password.chars().any(|c| c.is_ascii_lowercase())
            && password.chars().any(|c| c.is_ascii_uppercase())
            && digits >= 3
        {
            return password;
        }
    }
}

//! Proposal engine: batched, validated, auditable mutations.
//!
//! A proposal moves through draft -> proposed -> approved -> executing
//! -> completed | failed. Only drafts are editable; approval runs an
//! all-or-nothing validation gate against the described schema; the
//! execution pass records exactly one result per record change. The
//! external system is not transactional across records, so partial
//! application is expected and stays visible in the result set.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::credential::{CredentialResolver, System};
use crate::error::ProposalError;
use crate::gateway::{BulkKind, SchemaDescription, SystemGateway};
use crate::util::prefixed_id;

use self::store::ProposalStore;

/// Kind of change applied to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    fn bulk_kind(&self) -> BulkKind {
        match self {
            ChangeOperation::Create => BulkKind::Insert,
            ChangeOperation::Update => BulkKind::Update,
            ChangeOperation::Delete => BulkKind::Delete,
        }
    }
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeOperation::Create => write!(f, "create"),
            ChangeOperation::Update => write!(f, "update"),
            ChangeOperation::Delete => write!(f, "delete"),
        }
    }
}

/// One field-level edit within a record change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    pub after: serde_json::Value,
}

/// One intended record mutation within a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordChange {
    /// Unique within the proposal; keys the execution result.
    pub operation_id: String,
    pub operation: ChangeOperation,
    pub object_type: String,
    /// Required for update/delete, absent for create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub field_changes: Vec<FieldChange>,
    /// Model confidence in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Proposal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Draft,
    Proposed,
    Approved,
    Executing,
    Completed,
    Failed,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Executing => "executing",
            ProposalStatus::Completed => "completed",
            ProposalStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Issue found by the validation gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ValidationError {
    fn new(code: &str, message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            path,
        }
    }
}

/// Per-change outcome of an execution pass. The set of results is the
/// audit trail for a completed/failed proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub operation_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// A batched description of intended mutations, tracked through an
/// explicit approval/execution lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProposal {
    pub id: String,
    pub sub_id: String,
    pub system: System,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
    pub changes: Vec<RecordChange>,
    pub validation_errors: Vec<ValidationError>,
    pub results: Vec<ExecutionResult>,
}

impl UpdateProposal {
    pub fn new(
        id: impl Into<String>,
        sub_id: impl Into<String>,
        system: System,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sub_id: sub_id.into(),
            system,
            summary: summary.into(),
            created_at: Utc::now(),
            status: ProposalStatus::Draft,
            changes: Vec::new(),
            validation_errors: Vec::new(),
            results: Vec::new(),
        }
    }
}

/// Owns proposals for their full lifecycle.
pub struct ProposalEngine {
    store: Arc<dyn ProposalStore>,
    resolver: Arc<CredentialResolver>,
    gateway: Arc<dyn SystemGateway>,
    exec_timeout: Duration,
}

impl ProposalEngine {
    pub fn new(
        store: Arc<dyn ProposalStore>,
        resolver: Arc<CredentialResolver>,
        gateway: Arc<dyn SystemGateway>,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            gateway,
            exec_timeout,
        }
    }

    /// Create an empty draft.
    pub fn create(
        &self,
        sub_id: &str,
        system: System,
        summary: &str,
    ) -> Result<UpdateProposal, ProposalError> {
        if sub_id.trim().is_empty() {
            return Err(ProposalError::MissingIdentity);
        }
        let proposal = UpdateProposal::new(prefixed_id("prop"), sub_id, system, summary);
        self.store.put(proposal.clone());
        info!("Created proposal {} for sub {}", proposal.id, sub_id);
        Ok(proposal)
    }

    /// Add a record change. Drafts only.
    pub fn add_change(
        &self,
        proposal_id: &str,
        change: RecordChange,
    ) -> Result<UpdateProposal, ProposalError> {
        if let Some(confidence) = change.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(ProposalError::InvalidChange(format!(
                    "confidence {confidence} outside [0, 1]"
                )));
            }
        }
        self.store.update(proposal_id, &mut |p| {
            if p.status != ProposalStatus::Draft {
                return Err(ProposalError::InvalidTransition {
                    from: p.status.to_string(),
                    to: "draft edit".to_string(),
                });
            }
            if p.changes.iter().any(|c| c.operation_id == change.operation_id) {
                return Err(ProposalError::InvalidChange(format!(
                    "duplicate operation id {}",
                    change.operation_id
                )));
            }
            p.changes.push(change.clone());
            Ok(())
        })
    }

    /// Remove a record change by operation id. Drafts only.
    pub fn remove_change(
        &self,
        proposal_id: &str,
        operation_id: &str,
    ) -> Result<UpdateProposal, ProposalError> {
        self.store.update(proposal_id, &mut |p| {
            if p.status != ProposalStatus::Draft {
                return Err(ProposalError::InvalidTransition {
                    from: p.status.to_string(),
                    to: "draft edit".to_string(),
                });
            }
            let before = p.changes.len();
            p.changes.retain(|c| c.operation_id != operation_id);
            if p.changes.len() == before {
                return Err(ProposalError::InvalidChange(format!(
                    "no change with operation id {operation_id}"
                )));
            }
            Ok(())
        })
    }

    /// draft -> proposed. Requires at least one change.
    pub fn submit(&self, proposal_id: &str) -> Result<UpdateProposal, ProposalError> {
        let proposal = self
            .store
            .get(proposal_id)
            .ok_or_else(|| ProposalError::NotFound(proposal_id.to_string()))?;
        if proposal.changes.is_empty() {
            return Err(ProposalError::Empty);
        }
        self.store
            .transition(proposal_id, ProposalStatus::Draft, ProposalStatus::Proposed)
    }

    /// proposed -> approved. Runs the validation gate; any issue blocks
    /// the transition and leaves the proposal proposed with its
    /// validation errors populated.
    pub async fn approve(&self, proposal_id: &str) -> Result<UpdateProposal, ProposalError> {
        let proposal = self
            .store
            .get(proposal_id)
            .ok_or_else(|| ProposalError::NotFound(proposal_id.to_string()))?;
        if proposal.status != ProposalStatus::Proposed {
            return Err(ProposalError::InvalidTransition {
                from: proposal.status.to_string(),
                to: ProposalStatus::Approved.to_string(),
            });
        }

        let issues = self.validate(&proposal).await?;
        if !issues.is_empty() {
            warn!(
                "Proposal {} failed validation with {} issue(s)",
                proposal_id,
                issues.len()
            );
            self.store.update(proposal_id, &mut |p| {
                p.validation_errors = issues.clone();
                Ok(())
            })?;
            return Err(ProposalError::ValidationFailed(issues));
        }

        self.store.transition(
            proposal_id,
            ProposalStatus::Proposed,
            ProposalStatus::Approved,
        )?;
        // Clear any issues left by an earlier failed gate and hand the
        // caller the cleared state.
        let approved = self.store.update(proposal_id, &mut |p| {
            p.validation_errors.clear();
            Ok(())
        })?;
        info!("Proposal {} approved", proposal_id);
        Ok(approved)
    }

    async fn validate(
        &self,
        proposal: &UpdateProposal,
    ) -> Result<Vec<ValidationError>, ProposalError> {
        let creds = self
            .resolver
            .resolve(&proposal.sub_id, proposal.system)
            .await
            .map_err(|e| ProposalError::InvalidChange(e.to_string()))?;

        let mut issues = Vec::new();
        let mut schemas: std::collections::HashMap<String, Option<SchemaDescription>> =
            std::collections::HashMap::new();

        for change in &proposal.changes {
            match change.operation {
                ChangeOperation::Update | ChangeOperation::Delete => {
                    if change.record_id.as_deref().unwrap_or("").is_empty() {
                        issues.push(ValidationError::new(
                            "missing_record_id",
                            format!("{} requires a target record id", change.operation),
                            Some(change.operation_id.clone()),
                        ));
                    }
                }
                ChangeOperation::Create => {
                    if change.record_id.is_some() {
                        issues.push(ValidationError::new(
                            "unexpected_record_id",
                            "create must not carry a record id",
                            Some(change.operation_id.clone()),
                        ));
                    }
                }
            }

            // Deletes carry no field edits to check.
            if change.operation == ChangeOperation::Delete {
                continue;
            }

            let schema = match schemas.get(&change.object_type) {
                Some(cached) => cached.clone(),
                None => {
                    let described = self
                        .gateway
                        .describe_schema(&creds, Some(&change.object_type))
                        .await
                        .ok();
                    schemas.insert(change.object_type.clone(), described.clone());
                    described
                }
            };

            let object = schema
                .as_ref()
                .and_then(|s| s.object(&change.object_type).cloned());
            let Some(object) = object else {
                issues.push(ValidationError::new(
                    "unknown_object",
                    format!("object type {} is not described", change.object_type),
                    Some(change.operation_id.clone()),
                ));
                continue;
            };

            for field_change in &change.field_changes {
                let path = Some(format!(
                    "{}.{}",
                    change.operation_id, field_change.field_name
                ));
                match object.field(&field_change.field_name) {
                    None => issues.push(ValidationError::new(
                        "unknown_field",
                        format!(
                            "field {} does not exist on {}",
                            field_change.field_name, change.object_type
                        ),
                        path,
                    )),
                    Some(meta) if !meta.updateable => issues.push(ValidationError::new(
                        "field_not_mutable",
                        format!("field {} is not updateable", field_change.field_name),
                        path,
                    )),
                    Some(_) => {}
                }
            }
        }

        Ok(issues)
    }

    /// approved -> executing -> completed | failed. One-way; the
    /// transition into executing is atomic so only one caller dispatches.
    pub async fn execute(&self, proposal_id: &str) -> Result<UpdateProposal, ProposalError> {
        let proposal = self.store.transition(
            proposal_id,
            ProposalStatus::Approved,
            ProposalStatus::Executing,
        )?;
        info!(
            "Executing proposal {} ({} changes)",
            proposal_id,
            proposal.changes.len()
        );

        let creds = match self.resolver.resolve(&proposal.sub_id, proposal.system).await {
            Ok(creds) => creds,
            Err(e) => {
                // Credentials gone between approval and execution: every
                // change is recorded failed so the proposal resolves.
                let results: Vec<ExecutionResult> = proposal
                    .changes
                    .iter()
                    .map(|c| ExecutionResult {
                        operation_id: c.operation_id.clone(),
                        success: false,
                        message: Some(e.to_string()),
                        record_id: None,
                        error_code: Some("credential_error".to_string()),
                    })
                    .collect();
                return self.finalize(proposal_id, results);
            }
        };

        // Group by (operation, object type); one bulk dispatch per group.
        let mut groups: Vec<(ChangeOperation, String, Vec<&RecordChange>)> = Vec::new();
        for change in &proposal.changes {
            match groups
                .iter_mut()
                .find(|(op, obj, _)| *op == change.operation && *obj == change.object_type)
            {
                Some((_, _, members)) => members.push(change),
                None => groups.push((change.operation, change.object_type.clone(), vec![change])),
            }
        }

        let mut results: Vec<ExecutionResult> = Vec::with_capacity(proposal.changes.len());
        for (operation, object_type, members) in &groups {
            let records: Vec<serde_json::Value> =
                members.iter().map(|c| change_to_record(c)).collect();

            let dispatch = tokio::time::timeout(
                self.exec_timeout,
                self.gateway.run_bulk_operation(
                    &creds,
                    operation.bulk_kind(),
                    object_type,
                    &records,
                ),
            )
            .await;

            let group_results: Vec<ExecutionResult> = match dispatch {
                Ok(Ok(batch)) => members
                    .iter()
                    .enumerate()
                    .map(|(i, change)| match batch.outcomes.get(i) {
                        Some(outcome) => ExecutionResult {
                            operation_id: change.operation_id.clone(),
                            success: outcome.success,
                            message: outcome.message.clone(),
                            record_id: outcome
                                .record_id
                                .clone()
                                .or_else(|| change.record_id.clone()),
                            error_code: outcome.error_code.clone(),
                        },
                        None => ExecutionResult {
                            operation_id: change.operation_id.clone(),
                            success: false,
                            message: Some("no outcome reported by provider".to_string()),
                            record_id: change.record_id.clone(),
                            error_code: Some("missing_outcome".to_string()),
                        },
                    })
                    .collect(),
                Ok(Err(e)) => {
                    warn!(
                        "Bulk {} on {} failed for proposal {}: {}",
                        operation, object_type, proposal_id, e
                    );
                    members
                        .iter()
                        .map(|change| ExecutionResult {
                            operation_id: change.operation_id.clone(),
                            success: false,
                            message: Some(e.to_string()),
                            record_id: change.record_id.clone(),
                            error_code: Some("external_system_error".to_string()),
                        })
                        .collect()
                }
                Err(_) => {
                    warn!(
                        "Bulk {} on {} timed out for proposal {}",
                        operation, object_type, proposal_id
                    );
                    members
                        .iter()
                        .map(|change| ExecutionResult {
                            operation_id: change.operation_id.clone(),
                            success: false,
                            message: Some(format!(
                                "timed out after {}s",
                                self.exec_timeout.as_secs()
                            )),
                            record_id: change.record_id.clone(),
                            error_code: Some("timeout".to_string()),
                        })
                        .collect()
                }
            };

            // Persist incrementally so an interrupted pass leaves its
            // recorded results behind rather than vanishing.
            let appended = group_results.clone();
            self.store.update(proposal_id, &mut |p| {
                p.results.extend(appended.iter().cloned());
                Ok(())
            })?;
            results.extend(group_results);
        }

        self.finalize(proposal_id, results)
    }

    fn finalize(
        &self,
        proposal_id: &str,
        results: Vec<ExecutionResult>,
    ) -> Result<UpdateProposal, ProposalError> {
        let all_succeeded = results.iter().all(|r| r.success);
        let terminal = if all_succeeded {
            ProposalStatus::Completed
        } else {
            ProposalStatus::Failed
        };
        let finalized = self.store.update(proposal_id, &mut |p| {
            p.results = results.clone();
            p.status = terminal;
            Ok(())
        })?;
        info!("Proposal {} finished: {}", proposal_id, terminal);
        Ok(finalized)
    }

    /// Fetch current status and results.
    pub fn get(&self, proposal_id: &str) -> Result<UpdateProposal, ProposalError> {
        self.store
            .get(proposal_id)
            .ok_or_else(|| ProposalError::NotFound(proposal_id.to_string()))
    }
}

/// Render a record change in the wire shape the bulk API expects.
fn change_to_record(change: &RecordChange) -> serde_json::Value {
    let mut record = serde_json::Map::new();
    if let Some(id) = &change.record_id {
        record.insert("Id".to_string(), serde_json::Value::String(id.clone()));
    }
    for fc in &change.field_changes {
        record.insert(fc.field_name.clone(), fc.after.clone());
    }
    serde_json::Value::Object(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::credential::{CredentialStore, Credentials, MemoryCredentialStore, NullRefresher};
    use crate::error::GatewayError;
    use crate::gateway::{
        BatchResult, ExtractedDocument, FieldMetadata, ObjectSchema, RecordOutcome, RecordSet,
    };
    use crate::proposal::store::MemoryProposalStore;

    /// Gateway with a fixed Contact schema and scripted bulk outcomes.
    struct ScriptedGateway {
        outcomes: Mutex<Vec<Vec<RecordOutcome>>>,
        bulk_calls: Mutex<u32>,
        /// Number of describe calls that return an empty schema before
        /// the real one becomes visible.
        describe_misses: Mutex<u32>,
    }

    impl ScriptedGateway {
        fn new(outcomes: Vec<Vec<RecordOutcome>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                bulk_calls: Mutex::new(0),
                describe_misses: Mutex::new(0),
            }
        }

        fn with_describe_misses(outcomes: Vec<Vec<RecordOutcome>>, misses: u32) -> Self {
            let gateway = Self::new(outcomes);
            *gateway.describe_misses.lock().unwrap() = misses;
            gateway
        }

        fn ok(id: &str) -> RecordOutcome {
            RecordOutcome {
                success: true,
                record_id: Some(id.to_string()),
                message: None,
                error_code: None,
            }
        }

        fn fail(message: &str) -> RecordOutcome {
            RecordOutcome {
                success: false,
                record_id: None,
                message: Some(message.to_string()),
                error_code: Some("PROVIDER_ERROR".to_string()),
            }
        }
    }

    #[async_trait]
    impl SystemGateway for ScriptedGateway {
        async fn run_query(
            &self,
            _creds: &Credentials,
            _query: &str,
        ) -> Result<RecordSet, GatewayError> {
            unimplemented!()
        }

        async fn run_bulk_operation(
            &self,
            _creds: &Credentials,
            _kind: BulkKind,
            _object_type: &str,
            _records: &[serde_json::Value],
        ) -> Result<BatchResult, GatewayError> {
            *self.bulk_calls.lock().unwrap() += 1;
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Err(GatewayError::Other("no scripted outcomes left".into()));
            }
            Ok(BatchResult {
                job_id: "job-1".to_string(),
                outcomes: outcomes.remove(0),
            })
        }

        async fn describe_schema(
            &self,
            _creds: &Credentials,
            object_type: Option<&str>,
        ) -> Result<SchemaDescription, GatewayError> {
            {
                let mut misses = self.describe_misses.lock().unwrap();
                if *misses > 0 {
                    *misses -= 1;
                    return Ok(SchemaDescription { objects: vec![] });
                }
            }
            let contact = ObjectSchema {
                name: "Contact".to_string(),
                fields: vec![
                    FieldMetadata {
                        name: "Email".to_string(),
                        field_type: "string".to_string(),
                        updateable: true,
                    },
                    FieldMetadata {
                        name: "Phone".to_string(),
                        field_type: "string".to_string(),
                        updateable: true,
                    },
                    FieldMetadata {
                        name: "CreatedDate".to_string(),
                        field_type: "datetime".to_string(),
                        updateable: false,
                    },
                ],
            };
            let objects = match object_type {
                Some("Contact") | None => vec![contact],
                Some(_) => vec![],
            };
            Ok(SchemaDescription { objects })
        }

        async fn extract_document(
            &self,
            _creds: &Credentials,
            _content_base64: &str,
            _file_name: &str,
            _file_type: &str,
        ) -> Result<ExtractedDocument, GatewayError> {
            unimplemented!()
        }
    }

    fn engine_with(gateway: Arc<ScriptedGateway>) -> ProposalEngine {
        let creds_store = Arc::new(MemoryCredentialStore::new());
        creds_store.put("user-1", System::Salesforce, Credentials::new("tok"));
        let resolver = Arc::new(CredentialResolver::new(
            creds_store,
            Arc::new(NullRefresher),
        ));
        ProposalEngine::new(
            Arc::new(MemoryProposalStore::new()),
            resolver,
            gateway,
            Duration::from_secs(5),
        )
    }

    fn update_change(op_id: &str, record_id: &str, field: &str, after: &str) -> RecordChange {
        RecordChange {
            operation_id: op_id.to_string(),
            operation: ChangeOperation::Update,
            object_type: "Contact".to_string(),
            record_id: Some(record_id.to_string()),
            field_changes: vec![FieldChange {
                field_name: field.to_string(),
                before: None,
                after: serde_json::json!(after),
            }],
            confidence: Some(0.9),
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_completed() {
        let gateway = Arc::new(ScriptedGateway::new(vec![vec![
            ScriptedGateway::ok("003A"),
            ScriptedGateway::ok("003B"),
        ]]));
        let engine = engine_with(gateway.clone());

        let p = engine.create("user-1", System::Salesforce, "fix emails").unwrap();
        engine
            .add_change(&p.id, update_change("op-1", "003A", "Email", "a@x.com"))
            .unwrap();
        engine
            .add_change(&p.id, update_change("op-2", "003B", "Email", "b@x.com"))
            .unwrap();

        let p2 = engine.submit(&p.id).unwrap();
        assert_eq!(p2.status, ProposalStatus::Proposed);

        let p3 = engine.approve(&p.id).await.unwrap();
        assert_eq!(p3.status, ProposalStatus::Approved);

        let p4 = engine.execute(&p.id).await.unwrap();
        assert_eq!(p4.status, ProposalStatus::Completed);
        assert_eq!(p4.results.len(), 2);
        assert!(p4.results.iter().all(|r| r.success));
        // Both same operation+object: one bulk dispatch
        assert_eq!(*gateway.bulk_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_marks_failed_with_full_results() {
        // 3 records, record 2 fails provider-side.
        let gateway = Arc::new(ScriptedGateway::new(vec![vec![
            ScriptedGateway::ok("003A"),
            ScriptedGateway::fail("duplicate value"),
            ScriptedGateway::ok("003C"),
        ]]));
        let engine = engine_with(gateway);

        let p = engine.create("user-1", System::Salesforce, "batch update").unwrap();
        for (op_id, rec) in [("op-1", "003A"), ("op-2", "003B"), ("op-3", "003C")] {
            engine
                .add_change(&p.id, update_change(op_id, rec, "Phone", "555"))
                .unwrap();
        }
        engine.submit(&p.id).unwrap();
        engine.approve(&p.id).await.unwrap();

        let done = engine.execute(&p.id).await.unwrap();
        assert_eq!(done.status, ProposalStatus::Failed);
        assert_eq!(done.results.len(), 3);

        let failed: Vec<_> = done.results.iter().filter(|r| !r.success).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].operation_id, "op-2");
        assert!(done.results.iter().filter(|r| r.success).count() == 2);
    }

    #[tokio::test]
    async fn test_submit_requires_changes() {
        let engine = engine_with(Arc::new(ScriptedGateway::new(vec![])));
        let p = engine.create("user-1", System::Salesforce, "empty").unwrap();
        assert!(matches!(engine.submit(&p.id), Err(ProposalError::Empty)));
    }

    #[tokio::test]
    async fn test_validation_blocks_missing_record_id_and_unknown_field() {
        let engine = engine_with(Arc::new(ScriptedGateway::new(vec![])));
        let p = engine.create("user-1", System::Salesforce, "bad batch").unwrap();

        let mut no_id = update_change("op-1", "", "Email", "a@x.com");
        no_id.record_id = None;
        engine.add_change(&p.id, no_id).unwrap();
        engine
            .add_change(&p.id, update_change("op-2", "003B", "Nickname", "Bo"))
            .unwrap();
        engine
            .add_change(&p.id, update_change("op-3", "003C", "CreatedDate", "now"))
            .unwrap();
        engine.submit(&p.id).unwrap();

        let err = engine.approve(&p.id).await.unwrap_err();
        let ProposalError::ValidationFailed(issues) = err else {
            panic!("expected validation failure");
        };
        let codes: Vec<_> = issues.iter().map(|i| i.code.as_str()).collect();
        assert!(codes.contains(&"missing_record_id"));
        assert!(codes.contains(&"unknown_field"));
        assert!(codes.contains(&"field_not_mutable"));

        // Proposal remains proposed with errors populated
        let current = engine.get(&p.id).unwrap();
        assert_eq!(current.status, ProposalStatus::Proposed);
        assert_eq!(current.validation_errors.len(), issues.len());
    }

    #[tokio::test]
    async fn test_reapproval_returns_cleared_validation_errors() {
        // First describe sees no schema, so the gate fails; the schema
        // is visible on the retry.
        let gateway = Arc::new(ScriptedGateway::with_describe_misses(
            vec![vec![ScriptedGateway::ok("003A")]],
            1,
        ));
        let engine = engine_with(gateway);

        let p = engine.create("user-1", System::Salesforce, "retry").unwrap();
        engine
            .add_change(&p.id, update_change("op-1", "003A", "Email", "a@x.com"))
            .unwrap();
        engine.submit(&p.id).unwrap();

        let err = engine.approve(&p.id).await.unwrap_err();
        assert!(matches!(err, ProposalError::ValidationFailed(_)));
        assert!(!engine.get(&p.id).unwrap().validation_errors.is_empty());

        let approved = engine.approve(&p.id).await.unwrap();
        assert_eq!(approved.status, ProposalStatus::Approved);
        assert!(approved.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_draft_only_editing() {
        let engine = engine_with(Arc::new(ScriptedGateway::new(vec![])));
        let p = engine.create("user-1", System::Salesforce, "locked").unwrap();
        engine
            .add_change(&p.id, update_change("op-1", "003A", "Email", "a@x.com"))
            .unwrap();
        engine.submit(&p.id).unwrap();

        let err = engine
            .add_change(&p.id, update_change("op-2", "003B", "Email", "b@x.com"))
            .unwrap_err();
        assert!(matches!(err, ProposalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_execute_requires_approved() {
        let engine = engine_with(Arc::new(ScriptedGateway::new(vec![])));
        let p = engine.create("user-1", System::Salesforce, "early").unwrap();
        let err = engine.execute(&p.id).await.unwrap_err();
        assert!(matches!(err, ProposalError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_confidence_bounds() {
        let engine = engine_with(Arc::new(ScriptedGateway::new(vec![])));
        let p = engine.create("user-1", System::Salesforce, "conf").unwrap();
        let mut change = update_change("op-1", "003A", "Email", "a@x.com");
        change.confidence = Some(1.5);
        assert!(matches!(
            engine.add_change(&p.id, change),
            Err(ProposalError::InvalidChange(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_identity_on_create() {
        let engine = engine_with(Arc::new(ScriptedGateway::new(vec![])));
        assert!(matches!(
            engine.create("  ", System::Salesforce, "anon"),
            Err(ProposalError::MissingIdentity)
        ));
    }

    #[test]
    fn test_change_to_record_shape() {
        let change = update_change("op-1", "003A", "Email", "a@x.com");
        let record = change_to_record(&change);
        assert_eq!(record["Id"], "003A");
        assert_eq!(record["Email"], "a@x.com");
    }
}

//! Query service: startup barrier plus the `answer` entry point.

use std::sync::Arc;

use anyhow::Context;
use sq_log_tools::{FileLogSource, LogSource};
use sq_table::{
    LoadedTable, QueryableRelation, SchemaDescription, StructuredTable, TableError,
    ensure_materialized,
};

use crate::agent::QueryAgent;
use crate::answer::AnswerRecord;
use crate::config::ServiceConfig;
use crate::llm::ChatModel;
use crate::prompt::load_instructions;

/// A ready-to-answer service over one materialized log.
///
/// Cheap to share behind an `Arc`; `answer` may be called from many tasks
/// at once.
pub struct QueryService {
    loaded: LoadedTable,
    agent: QueryAgent,
    stale: bool,
}

impl QueryService {
    /// Materialize the configured log from the filesystem and build the agent.
    pub async fn start(config: &ServiceConfig, model: Arc<dyn ChatModel>) -> anyhow::Result<Self> {
        Self::start_with_source(config, &FileLogSource, model).await
    }

    /// Same as [`QueryService::start`] with an explicit log source.
    pub async fn start_with_source(
        config: &ServiceConfig,
        source: &dyn LogSource,
        model: Arc<dyn ChatModel>,
    ) -> anyhow::Result<Self> {
        let (table, stale) = materialize(config, source).await?;
        let loaded = LoadedTable::load(table, config.relation_options())
            .await
            .context("failed to load table into the query engine")?;

        let instructions = load_instructions(config.agent.system_prompt_path.as_deref());
        let agent = QueryAgent::new(
            model,
            loaded.relation.clone(),
            loaded.schema.clone(),
            &instructions,
            config.agent.limits.clone(),
        );

        tracing::info!(
            model = %agent.model_name(),
            rows = loaded.relation.row_count(),
            stale,
            "query service ready"
        );
        Ok(Self {
            loaded,
            agent,
            stale,
        })
    }

    /// Answer one question.
    pub async fn answer(&self, question: &str) -> AnswerRecord {
        self.agent.answer(question).await
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.loaded.schema
    }

    pub fn relation(&self) -> &Arc<QueryableRelation> {
        &self.loaded.relation
    }

    pub fn table(&self) -> &StructuredTable {
        &self.loaded.table
    }

    pub fn agent(&self) -> &QueryAgent {
        &self.agent
    }

    /// True if startup fell back to a previous artifact after a write failure.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Run the materializer, accepting a stale artifact when a rebuild could
/// not be written.
pub async fn materialize(
    config: &ServiceConfig,
    source: &dyn LogSource,
) -> anyhow::Result<(StructuredTable, bool)> {
    let options = config.materialize_options();
    match ensure_materialized(source, &config.data.log_path, &config.data.table_path, &options).await
    {
        Ok(table) => {
            tracing::info!(
                path = %table.path.display(),
                rows = table.row_count,
                rebuilt = table.rebuilt,
                warnings = table.warning_count,
                "table materialized"
            );
            Ok((table, false))
        }
        Err(TableError::Persistence {
            message,
            stale: Some(stale),
        }) => {
            tracing::warn!(
                error = %message,
                path = %stale.path.display(),
                rows = stale.row_count,
                "could not rebuild table; continuing with stale artifact"
            );
            Ok((*stale, true))
        }
        Err(e) => Err(e).with_context(|| {
            format!(
                "failed to materialize {} into {}",
                config.data.log_path,
                config.data.table_path.display()
            )
        }),
    }
}

use std::sync::Arc;

use tracing::{debug, warn};

use strata_core::traits::{
    GenerationRequest, OutputCleaner, QueryExecutor, QueryFeedback, QueryGenerator,
};
use strata_core::types::{Passage, QueryError, QueryErrorKind, QueryOutcome};

/// Generate, clean, execute. One attempt per call; the repair loop decides
/// whether there is another.
pub struct SqlPath {
    generator: Arc<dyn QueryGenerator>,
    cleaner: Arc<dyn OutputCleaner>,
    executor: Arc<dyn QueryExecutor>,
}

impl SqlPath {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        cleaner: Arc<dyn OutputCleaner>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            generator,
            cleaner,
            executor,
        }
    }

    /// Run one attempt. `context` is non-empty only in hybrid mode; `feedback`
    /// carries the previous attempt's query and error during repair.
    ///
    /// Every failure comes back as [`QueryOutcome::Failed`]; a query that
    /// returns zero rows is a success.
    pub async fn generate_and_execute(
        &self,
        question: &str,
        context: &[Passage],
        feedback: Option<QueryFeedback>,
    ) -> QueryOutcome {
        let request = GenerationRequest {
            question: question.to_string(),
            context: context.to_vec(),
            feedback,
        };

        let raw = match self.generator.generate(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Query generation failed");
                return QueryOutcome::Failed {
                    sql: None,
                    error: QueryError::new(QueryErrorKind::Other, e.to_string()),
                };
            }
        };

        let sql = self.cleaner.clean(&raw);
        if sql.is_empty() {
            warn!(raw_len = raw.len(), "Generator produced no executable query");
            return QueryOutcome::Failed {
                sql: None,
                error: QueryError::new(QueryErrorKind::EmptyQuery, "generator returned no query"),
            };
        }

        match self.executor.execute(&sql).await {
            Ok(rows) => {
                debug!(sql = %sql, rows = rows.len(), "Query executed");
                QueryOutcome::Rows { sql, rows }
            }
            Err(error) => {
                debug!(sql = %sql, error = %error, "Query failed");
                QueryOutcome::Failed {
                    sql: Some(sql),
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::error::StrataError;
    use strata_sql::SqlCleaner;
    use strata_test_utils::{passage, rows, syntax_error, ScriptedExecutor, ScriptedGenerator};

    fn path(gen: Arc<ScriptedGenerator>, exec: Arc<ScriptedExecutor>) -> SqlPath {
        SqlPath::new(gen, Arc::new(SqlCleaner::new()), exec)
    }

    #[tokio::test]
    async fn cleans_before_executing() {
        let gen = Arc::new(ScriptedGenerator::always("```sql\nSELECT 1 AS one;\n```"));
        let exec = Arc::new(ScriptedExecutor::always(rows(&[&[("one", json!(1))]])));
        let outcome = path(gen, exec.clone()).generate_and_execute("q", &[], None).await;
        assert_eq!(exec.queries(), vec!["SELECT 1 AS one"]);
        assert_eq!(outcome.sql(), Some("SELECT 1 AS one"));
        assert!(!outcome.is_failure());
    }

    #[tokio::test]
    async fn zero_rows_is_success() {
        let gen = Arc::new(ScriptedGenerator::always("SELECT * FROM Orders WHERE 0"));
        let exec = Arc::new(ScriptedExecutor::always(Default::default()));
        let outcome = path(gen, exec).generate_and_execute("q", &[], None).await;
        assert!(!outcome.is_failure());
        assert!(outcome.rows().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_generation_skips_executor() {
        let gen = Arc::new(ScriptedGenerator::always("   "));
        let exec = Arc::new(ScriptedExecutor::always(Default::default()));
        let outcome = path(gen, exec.clone()).generate_and_execute("q", &[], None).await;
        assert_eq!(outcome.error().unwrap().kind, QueryErrorKind::EmptyQuery);
        assert!(exec.queries().is_empty());
    }

    #[tokio::test]
    async fn executor_error_is_captured_with_query() {
        let gen = Arc::new(ScriptedGenerator::always("SELEC 1"));
        let exec = Arc::new(ScriptedExecutor::always_failing(syntax_error("near SELEC")));
        let outcome = path(gen, exec).generate_and_execute("q", &[], None).await;
        assert_eq!(outcome.sql(), Some("SELEC 1"));
        assert_eq!(outcome.error().unwrap().kind, QueryErrorKind::Syntax);
    }

    #[tokio::test]
    async fn generator_infrastructure_error_is_a_query_failure() {
        let gen = Arc::new(ScriptedGenerator::new(vec![Err(StrataError::LlmRequest(
            "connection refused".into(),
        ))]));
        let exec = Arc::new(ScriptedExecutor::always(Default::default()));
        let outcome = path(gen, exec).generate_and_execute("q", &[], None).await;
        assert_eq!(outcome.error().unwrap().kind, QueryErrorKind::Other);
    }

    #[tokio::test]
    async fn context_and_feedback_reach_generator() {
        let gen = Arc::new(ScriptedGenerator::always("SELECT 2"));
        let exec = Arc::new(ScriptedExecutor::always(Default::default()));
        let ctx = vec![passage("kpi::chunk0", "AOV = ...", 1.0)];
        let feedback = QueryFeedback {
            prior_query: Some("SELEC 2".into()),
            error: syntax_error("near SELEC"),
        };
        path(gen.clone(), exec)
            .generate_and_execute("q", &ctx, Some(feedback.clone()))
            .await;
        let req = &gen.requests()[0];
        assert_eq!(req.context, ctx);
        assert_eq!(req.feedback.as_ref(), Some(&feedback));
    }
}

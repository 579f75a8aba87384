//! Query plan explanation (`find(...).explain("executionStats")`)

use serde::Serialize;

/// How much `explain` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Chosen plan only; the query is not run
    QueryPlanner,
    /// Chosen plan plus counters from running the query
    ExecutionStats,
}

/// One node of a plan tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStage {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_multi_key: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_unique: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_bounds: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_stage: Option<Box<PlanStage>>,
}

impl PlanStage {
    pub(crate) fn new(stage: &str) -> Self {
        PlanStage {
            stage: stage.to_string(),
            filter: None,
            index_name: None,
            key_pattern: None,
            is_multi_key: None,
            is_unique: None,
            index_bounds: None,
            input_stage: None,
        }
    }

    /// The leaf stage (`IXSCAN` or `COLLSCAN`)
    pub fn leaf(&self) -> &PlanStage {
        match &self.input_stage {
            Some(input) => input.leaf(),
            None => self,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlanner {
    pub namespace: String,
    pub parsed_query: serde_json::Value,
    pub winning_plan: PlanStage,
    pub rejected_plans: Vec<PlanStage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub execution_success: bool,
    pub n_returned: usize,
    pub execution_time_millis: u64,
    pub total_keys_examined: usize,
    pub total_docs_examined: usize,
}

/// Output of `explain`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explain {
    pub query_planner: QueryPlanner,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_stats: Option<ExecutionStats>,
}

impl Explain {
    /// Leaf stage name of the winning plan
    pub fn winning_stage(&self) -> &str {
        &self.query_planner.winning_plan.leaf().stage
    }

    /// Index used by the winning plan, if any
    pub fn index_name(&self) -> Option<&str> {
        self.query_planner.winning_plan.leaf().index_name.as_deref()
    }

    pub fn uses_index(&self) -> bool {
        self.winning_stage() == "IXSCAN"
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

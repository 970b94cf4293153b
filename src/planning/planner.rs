//! Retrieval planning
//!
//! Produces one `Plan` per iteration:
//! - Iteration 1 always leads with a seed query taken straight from the
//!   question (prefixed with the antecedent topic for follow-ups)
//! - Later iterations target the previous reflection's gaps and never
//!   repeat an issued query (case and whitespace insensitive)
//! - The query list is clamped to the tier's parallel-query bound
//! - Unusable model output yields `needs_more_search = true` with the
//!   original question, so a parse failure never ends the loop

use crate::analysis::types::Reflection;
use crate::planning::types::{normalize_query, Classification, Plan, QueryTier, TierProfile};
use crate::providers::{CompletionRequest, CompletionTask};
use crate::resilience::{ResilientClient, Structured};
use crate::types::messages::clip;
use serde::Deserialize;
use std::collections::HashSet;

const PLAN_SCHEMA: &str = r#"{"needs_more_search": boolean, "queries": [string], "rationale": string, "confidence": number (0-1)}"#;

/// Characters of the question used to focus gap-derived queries
const FOCUS_CHARS: usize = 80;

/// Reformulation angles tried, in order, when a later iteration has nothing new
const FRESH_ANGLES: &[&str] = &[
    "scripture passages",
    "commentary and interpretation",
    "stories and examples",
    "historical context",
    "comparison across traditions",
];

/// Everything the planner may look at for one iteration
#[derive(Debug, Clone, Copy)]
pub struct PlanningContext<'a> {
    pub question: &'a str,
    pub classification: &'a Classification,
    pub profile: &'a TierProfile,
    /// 1-based iteration being planned
    pub iteration: usize,
    /// Every query issued in earlier iterations
    pub issued_queries: &'a [String],
    pub last_reflection: Option<&'a Reflection>,
    pub evidence_digest: &'a str,
}

impl PlanningContext<'_> {
    /// Query issued first in iteration 1
    pub fn seed_query(&self) -> String {
        match (&self.classification.tier, &self.classification.antecedent_topic) {
            (QueryTier::FollowUpClarification, Some(topic)) => {
                format!("{}: {}", topic, self.question.trim())
            }
            _ => self.question.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PlannerReply {
    #[serde(default = "default_needs_more_search")]
    needs_more_search: bool,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    confidence: f64,
}

fn default_needs_more_search() -> bool {
    true
}

/// Deduplicating query collector
struct QuerySet {
    seen: HashSet<String>,
    queries: Vec<String>,
    limit: usize,
}

impl QuerySet {
    fn new(issued: &[String], limit: usize) -> Self {
        Self {
            seen: issued.iter().map(|q| normalize_query(q)).collect(),
            queries: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Add a query unless empty, duplicate, or over the limit
    fn push(&mut self, query: &str) -> bool {
        let trimmed = query.trim();
        if trimmed.is_empty() || self.queries.len() >= self.limit {
            return false;
        }
        if !self.seen.insert(normalize_query(trimmed)) {
            return false;
        }
        self.queries.push(trimmed.to_string());
        true
    }

    fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Plans retrieval queries for each iteration
#[derive(Clone)]
pub struct Planner {
    client: ResilientClient,
}

impl Planner {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    /// Produce a plan. Never fails.
    pub async fn plan(&self, ctx: &PlanningContext<'_>) -> Structured<Plan> {
        let request = self.build_request(ctx);
        let sentinel = PlannerReply {
            needs_more_search: true,
            queries: Vec::new(),
            rationale: String::new(),
            confidence: 0.0,
        };
        let reply = self.client.structured(&request, sentinel).await;

        if reply.fell_back() {
            let plan = Self::fallback_plan(ctx);
            tracing::warn!(iteration = ctx.iteration, queries = ?plan.queries, "Planner fallback");
            return Structured {
                value: plan,
                fallback: reply.fallback,
            };
        }

        let plan = Self::shape(ctx, reply.value);
        tracing::info!(
            iteration = ctx.iteration,
            queries = ?plan.queries,
            needs_more_search = plan.needs_more_search,
            "Plan ready"
        );
        Structured::parsed(plan)
    }

    /// Fallback: search the unmodified question. Iteration 1 of a follow-up
    /// keeps its antecedent-bearing seed instead.
    pub fn fallback_plan(ctx: &PlanningContext<'_>) -> Plan {
        let mut plan = Plan::fallback(ctx.question.trim());
        if ctx.iteration == 1 {
            plan.queries = vec![ctx.seed_query()];
        }
        plan
    }

    /// Normalize, dedup and clamp the model's proposal
    fn shape(ctx: &PlanningContext<'_>, reply: PlannerReply) -> Plan {
        let limit = ctx.profile.max_parallel_queries;
        let mut set = QuerySet::new(ctx.issued_queries, limit);

        if ctx.iteration == 1 {
            set.push(&ctx.seed_query());
        }
        for query in &reply.queries {
            set.push(query);
        }

        // Model only repeated itself: aim directly at the named gaps
        if set.is_empty() {
            if let Some(reflection) = ctx.last_reflection {
                let focus = clip(ctx.question.trim(), FOCUS_CHARS);
                for gap in &reflection.gaps {
                    set.push(&format!("{}: {}", focus, gap.trim()));
                }
            }
        }

        // Still nothing: one fresh angle on the question, or give up searching
        let mut needs_more_search = reply.needs_more_search;
        if set.is_empty() && ctx.iteration > 1 {
            let focus = clip(ctx.question.trim(), FOCUS_CHARS);
            let pushed = FRESH_ANGLES
                .iter()
                .any(|angle| set.push(&format!("{}: {}", focus, angle)));
            if !pushed {
                needs_more_search = false;
            }
        }

        Plan {
            needs_more_search,
            queries: set.queries,
            rationale: reply.rationale,
            confidence: reply.confidence.clamp(0.0, 1.0),
        }
    }

    fn build_request(&self, ctx: &PlanningContext<'_>) -> CompletionRequest {
        let limit = ctx.profile.max_parallel_queries;

        let prompt = if ctx.iteration == 1 {
            let antecedent = ctx
                .classification
                .antecedent_topic
                .as_deref()
                .map(|t| format!("\nThis question follows up on an earlier topic: {}\n", t))
                .unwrap_or_default();

            format!(
                "Plan searches over a corpus of sacred and religious texts.\n\n\
                 Question: {}\n\
                 Complexity tier: {}\n{}\n\
                 The question itself will be searched as-is. Propose up to {} additional \
                 reformulated search queries covering distinct angles. If the question can be \
                 answered well without consulting the corpus, set needs_more_search to false.",
                ctx.question,
                ctx.classification.tier,
                antecedent,
                limit.saturating_sub(1)
            )
        } else {
            let gaps = ctx
                .last_reflection
                .map(|r| {
                    r.gaps
                        .iter()
                        .map(|g| format!("- {}", g))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| "- (none recorded)".to_string());

            format!(
                "Plan the next round of searches over a corpus of sacred and religious texts.\n\n\
                 Question: {}\n\
                 Iteration: {}\n\n\
                 Gaps identified in the evidence so far:\n{}\n\n\
                 Queries already issued (do not repeat them):\n{}\n\n\
                 Evidence gathered so far:\n{}\n\n\
                 Propose up to {} new search queries that target the gaps.",
                ctx.question,
                ctx.iteration,
                gaps,
                ctx.issued_queries
                    .iter()
                    .map(|q| format!("- {}", q))
                    .collect::<Vec<_>>()
                    .join("\n"),
                ctx.evidence_digest,
                limit
            )
        };

        CompletionRequest::new(CompletionTask::Plan, prompt)
            .with_system("You design precise search queries for research. Answer only with JSON.")
            .with_schema(PLAN_SCHEMA)
    }
}

//! Capability contracts: the expected tool names of each known capability.
//!
//! This table is the single source of truth for tool names. Discovery falls
//! back to it when a server does not answer `discover_tools` properly, and
//! the pipeline controller takes its tool names from the constants below.

use std::collections::HashSet;

// ─── Tool Names ─────────────────────────────────────────────────────────────

pub const EXECUTE_SQL_QUERY: &str = "Execute_SQL_Query";
pub const TEST_CONNECTION: &str = "Test_Connection";
pub const GET_OMOP_SCHEMA: &str = "Get_OMOP_Schema";

pub const GENERATE_SQL: &str = "Generate_SQL";
pub const GENERATE_EXPLANATION: &str = "Generate_Explanation";
pub const GENERATE_ANSWER: &str = "Generate_Answer";
pub const LIST_AVAILABLE_MODELS: &str = "List_Available_Models";

pub const VALIDATE_SQL_QUERY: &str = "Validate_SQL_Query";
pub const EXTERNAL_VALIDATOR: &str = "External_Validator";
pub const COMPREHENSIVE_VALIDATION: &str = "Comprehensive_Validation";
/// Only used when a validation server advertises it; never part of a fallback.
pub const REFINE_SQL: &str = "Refine_SQL";

pub const GET_AGENT_INSIGHTS: &str = "Get_Agent_Insights";
pub const GET_AVAILABLE_AGENTS: &str = "Get_Available_Agents";
pub const AGENT_HEALTH_CHECK: &str = "Agent_Health_Check";

// ─── Contract Table ─────────────────────────────────────────────────────────

/// The tools a named capability is expected to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContract {
    pub capability: &'static str,
    pub tools: &'static [&'static str],
}

/// Known capabilities and their tools.
pub const CONTRACTS: &[CapabilityContract] = &[
    CapabilityContract {
        capability: "sql",
        tools: &[EXECUTE_SQL_QUERY, TEST_CONNECTION, GET_OMOP_SCHEMA],
    },
    CapabilityContract {
        capability: "ollama",
        tools: &[
            GENERATE_SQL,
            GENERATE_EXPLANATION,
            GENERATE_ANSWER,
            LIST_AVAILABLE_MODELS,
        ],
    },
    CapabilityContract {
        capability: "validation",
        tools: &[VALIDATE_SQL_QUERY, EXTERNAL_VALIDATOR, COMPREHENSIVE_VALIDATION],
    },
    CapabilityContract {
        capability: "agent",
        tools: &[GET_AGENT_INSIGHTS, GET_AVAILABLE_AGENTS, AGENT_HEALTH_CHECK],
    },
];

/// Look up the contract of a capability by name.
pub fn contract_for(capability: &str) -> Option<&'static CapabilityContract> {
    CONTRACTS.iter().find(|c| c.capability == capability)
}

/// Fallback tool set for a capability. Unknown capabilities get an empty set.
pub fn fallback_tools(capability: &str) -> HashSet<String> {
    contract_for(capability)
        .map(|c| c.tools.iter().map(|t| t.to_string()).collect())
        .unwrap_or_default()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

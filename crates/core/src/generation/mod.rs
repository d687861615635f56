//! # Content Generation
//!
//! The seam to the language-generation collaborator. A role hands over one
//! `GenerationRequest` (system prompt, rendered input and grounding) and
//! gets text back.

pub mod openai;
pub mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::error::GenerationError;
use crate::roles::{RoleId, RoleInput, StageSpec};
use crate::search::SearchHit;

pub use openai::OpenAiCompatGenerator;

/// One content-generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub role: RoleId,
    pub system_prompt: String,
    pub prompt: String,
    /// Number of search hits folded into `prompt`
    pub grounding_count: usize,
}

impl GenerationRequest {
    /// Render a role's input and grounding into a single prompt
    pub fn for_stage(
        spec: &StageSpec,
        input: &RoleInput,
        grounding: &[SearchHit],
        project_type: &str,
    ) -> Self {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "# Project request\n\n{}\n", input.request.trim());
        let _ = writeln!(prompt, "Project type: {}\n", project_type);

        for (role, output) in &input.prior {
            let _ = writeln!(prompt, "# Output of {}\n\n{}\n", role, output.trim());
        }

        let _ = writeln!(prompt, "# Web research\n");
        if grounding.is_empty() {
            let _ = writeln!(prompt, "No web research was available for this step.");
        } else {
            for (i, hit) in grounding.iter().enumerate() {
                let _ = writeln!(prompt, "{}. [{}]({})", i + 1, hit.title, hit.url);
                if !hit.snippet.is_empty() {
                    let _ = writeln!(prompt, "   {}", hit.snippet);
                }
            }
        }

        Self {
            role: spec.role.clone(),
            system_prompt: spec.system_prompt.clone(),
            prompt,
            grounding_count: grounding.len(),
        }
    }
}

/// External generation capability
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::Roster;

    #[test]
    fn test_prompt_includes_prior_outputs_and_grounding() {
        let roster = Roster::default_pipeline();
        let spec = roster.get(&RoleId::new("architect")).unwrap();
        let input = RoleInput {
            request: "todo list app".to_string(),
            prior: vec![(
                RoleId::new("product_manager"),
                "PRD: keep a list of todos".to_string(),
            )],
        };
        let hits = vec![SearchHit {
            title: "TodoMVC".to_string(),
            snippet: "Helping you select a framework".to_string(),
            url: "https://todomvc.com".to_string(),
        }];

        let request = GenerationRequest::for_stage(spec, &input, &hits, "static_site");
        assert!(request.prompt.contains("todo list app"));
        assert!(request.prompt.contains("# Output of product_manager"));
        assert!(request.prompt.contains("[TodoMVC](https://todomvc.com)"));
        assert!(request.prompt.contains("Project type: static_site"));
        assert_eq!(request.grounding_count, 1);
        assert_eq!(request.system_prompt, prompts::ARCHITECT);
    }

    #[test]
    fn test_prompt_without_grounding_says_so() {
        let roster = Roster::default_pipeline();
        let spec = roster.get(&RoleId::new("product_manager")).unwrap();
        let input = RoleInput {
            request: "blog".to_string(),
            prior: Vec::new(),
        };
        let request = GenerationRequest::for_stage(spec, &input, &[], "static_site");
        assert!(request.prompt.contains("No web research was available"));
        assert_eq!(request.grounding_count, 0);
    }
}

//! Default system prompts bundled at compile time, one per role.

/// Product Manager - requirements from the raw request
pub const PRODUCT_MANAGER: &str = include_str!("defaults/product_manager.md");

/// Architect - structure, file list and interfaces
pub const ARCHITECT: &str = include_str!("defaults/architect.md");

/// Project Manager - ordered task breakdown
pub const PROJECT_MANAGER: &str = include_str!("defaults/project_manager.md");

/// Engineer - writes every file
pub const ENGINEER: &str = include_str!("defaults/engineer.md");

/// QA Engineer - review and corrected files
pub const QA_ENGINEER: &str = include_str!("defaults/qa_engineer.md");

/// Deployer - packaging preparation
pub const DEPLOYER: &str = include_str!("defaults/deployer.md");

/// Fallback for roles added through configuration
pub const GENERIC: &str = "You are a member of a small software team. Read the project request \
and the work of the teammates before you, then produce your own contribution as clear Markdown.";

/// All default prompts with their role slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("product_manager", PRODUCT_MANAGER),
        ("architect", ARCHITECT),
        ("project_manager", PROJECT_MANAGER),
        ("engineer", ENGINEER),
        ("qa_engineer", QA_ENGINEER),
        ("deployer", DEPLOYER),
    ]
}

/// System prompt for a role slug
pub fn for_role(slug: &str) -> &'static str {
    all_defaults()
        .into_iter()
        .find(|(s, _)| *s == slug)
        .map(|(_, prompt)| prompt)
        .unwrap_or(GENERIC)
}

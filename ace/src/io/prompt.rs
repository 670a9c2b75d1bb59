//! Role prompt rendering.
//!
//! Templates are embedded at compile time and rendered with minijinja. Each
//! prompt ends with the `### key` headings the role parser expects back.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::SampleMetadata;

const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");
const REFLECTOR_TEMPLATE: &str = include_str!("prompts/reflector.md");
const CURATOR_TEMPLATE: &str = include_str!("prompts/curator.md");

const EMPTY_PLAYBOOK: &str = "(empty playbook)";
const NOT_PROVIDED: &str = "(not provided)";
const NONE: &str = "(none)";

/// Inputs for one generator step.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorPrompt<'a> {
    pub task: &'a str,
    /// Rendered playbook (`Playbook::as_prompt`).
    pub playbook: &'a str,
    pub metadata: &'a SampleMetadata,
    /// Earlier steps of this attempt; empty on the first step.
    pub history: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct ReflectorPrompt<'a> {
    pub trajectory: &'a str,
    pub playbook: &'a str,
    pub ground_truth: Option<&'a str>,
    pub unit_tests: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct CuratorPrompt<'a> {
    pub question_context: &'a str,
    pub playbook: &'a str,
    /// Recent reflections, newest last.
    pub reflections: &'a str,
}

pub fn render_generator(input: &GeneratorPrompt<'_>, keys: &[&str]) -> Result<String> {
    let meta = input.metadata;
    render(
        "generator",
        GENERATOR_TEMPLATE,
        context! {
            playbook => or_placeholder(input.playbook, EMPTY_PLAYBOOK),
            task => input.task.trim(),
            first_name => or_placeholder(&meta.first_name, NOT_PROVIDED),
            last_name => or_placeholder(&meta.last_name, NOT_PROVIDED),
            email => or_placeholder(&meta.email, NOT_PROVIDED),
            phone_number => or_placeholder(&meta.phone_number, NOT_PROVIDED),
            history => (!input.history.trim().is_empty()).then(|| input.history.trim()),
            keys => keys,
        },
    )
}

pub fn render_reflector(input: &ReflectorPrompt<'_>, keys: &[&str]) -> Result<String> {
    render(
        "reflector",
        REFLECTOR_TEMPLATE,
        context! {
            trajectory => or_placeholder(input.trajectory, NONE),
            playbook => or_placeholder(input.playbook, EMPTY_PLAYBOOK),
            ground_truth => or_placeholder(input.ground_truth.unwrap_or_default(), NONE),
            unit_tests => or_placeholder(input.unit_tests.unwrap_or_default(), NONE),
            keys => keys,
        },
    )
}

pub fn render_curator(input: &CuratorPrompt<'_>, keys: &[&str]) -> Result<String> {
    render(
        "curator",
        CURATOR_TEMPLATE,
        context! {
            question_context => input.question_context.trim(),
            playbook => or_placeholder(input.playbook, EMPTY_PLAYBOOK),
            reflections => or_placeholder(input.reflections, NONE),
            keys => keys,
        },
    )
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { placeholder } else { trimmed }
}

fn render(name: &'static str, source: &'static str, ctx: minijinja::Value) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(name, source)
        .with_context(|| format!("load {name} template"))?;
    let rendered = env
        .get_template(name)?
        .render(ctx)
        .with_context(|| format!("render {name} template"))?;
    debug!(template = name, bytes = rendered.len(), "rendered prompt");
    Ok(rendered)
}

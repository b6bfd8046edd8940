//! Prompt templates.
//!
//! Templates use `{context}` and `{question}` placeholders (`{query}` is
//! accepted for `{question}`); `{{` and `}}` produce literal braces. Templates
//! are parsed once, so a bad placeholder is reported when configuration is
//! loaded rather than on the first question.

use std::collections::BTreeMap;

use crate::config::PromptConfig;
use crate::error::TemplateError;

/// Name of the general physiotherapy template.
pub const PHYSIOTHERAPY: &str = "physiotherapy";

/// Name of the bicep curl coaching template.
pub const BICEP_CURL: &str = "bicep_curl";

const PHYSIOTHERAPY_TEMPLATE: &str = "You are a knowledgeable and careful physiotherapy assistant. \
Answer the patient's question using the excerpts from their document below. \
If the excerpts do not contain the answer, say so plainly and suggest consulting \
a licensed physiotherapist. Do not invent dosages, diagnoses or exercise loads.

Document excerpts:
{context}

Question: {question}

Answer:";

const BICEP_CURL_TEMPLATE: &str = "You are a rehabilitation coach helping someone perform \
bicep curls safely. Use the document excerpts below to answer. Focus on form, tempo, \
range of motion, load progression and warning signs of strain. If the excerpts do not \
cover the question, say so and give only general, conservative guidance.

Document excerpts:
{context}

Question: {question}

Answer:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Context,
    Question,
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template, rejecting unknown placeholders and stray braces.
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|&(_, next)| next == '{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().is_some_and(|&(_, next)| next == '}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::UnbalancedBrace(pos));
                    }

                    let segment = match name.as_str() {
                        "context" => Segment::Context,
                        "question" | "query" => Segment::Question,
                        _ => return Err(TemplateError::UnknownVariable(name)),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                '}' => return Err(TemplateError::UnbalancedBrace(pos)),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    /// The template text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute `context` and `question`.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + context.len() + question.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Context => out.push_str(context),
                Segment::Question => out.push_str(question),
            }
        }
        out
    }
}

/// Parse `template` and fill it in one step.
pub fn assemble(template: &str, context: &str, question: &str) -> Result<String, TemplateError> {
    Ok(PromptTemplate::parse(template)?.render(context, question))
}

/// Named templates selected by configuration.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: BTreeMap<String, PromptTemplate>,
    default: String,
}

impl PromptLibrary {
    /// Built-in templates, overridden or extended by `config.templates`.
    pub fn from_config(config: &PromptConfig) -> Result<Self, TemplateError> {
        let mut templates = BTreeMap::new();
        templates.insert(
            PHYSIOTHERAPY.to_string(),
            PromptTemplate::parse(PHYSIOTHERAPY_TEMPLATE)?,
        );
        templates.insert(
            BICEP_CURL.to_string(),
            PromptTemplate::parse(BICEP_CURL_TEMPLATE)?,
        );
        for (name, source) in &config.templates {
            templates.insert(name.clone(), PromptTemplate::parse(source.as_str())?);
        }

        if !templates.contains_key(&config.default_template) {
            return Err(TemplateError::UnknownTemplate(
                config.default_template.clone(),
            ));
        }

        Ok(Self {
            templates,
            default: config.default_template.clone(),
        })
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Result<&PromptTemplate, TemplateError> {
        self.templates
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))
    }

    /// The configured default template.
    pub fn default_template(&self) -> Result<&PromptTemplate, TemplateError> {
        self.get(&self.default)
    }

    /// The named template, or the default when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<&PromptTemplate, TemplateError> {
        match name {
            Some(name) => self.get(name),
            None => self.default_template(),
        }
    }

    /// Registered template names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

//! Template engines
//!
//! The renderer talks to a [`TemplateEngine`]; the shipped implementation is
//! [`JinjaEngine`], a MiniJinja environment with Helm-compatible filters.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use kubepack_core::{Chart, TemplateContext};

use crate::error::{Result, TemplateError};
use crate::filters;
use crate::functions;

/// Output of one template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    /// Chart-relative path, e.g. `templates/deployment.yaml`
    pub name: String,
    pub content: String,
}

/// Evaluates the templates of a single chart (no subcharts)
pub trait TemplateEngine: Send + Sync {
    /// Render every non-helper template, in template path order
    ///
    /// Helper files (basename starting with `_`) are available for import
    /// but produce no output.
    fn render_chart(&self, chart: &Chart, context: &TemplateContext)
    -> Result<Vec<RenderedTemplate>>;
}

/// Per-template context entry, like Helm's `.Template`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateInfo {
    name: String,
    base_path: String,
}

/// Engine builder
pub struct JinjaEngineBuilder {
    strict: bool,
}

impl Default for JinjaEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JinjaEngineBuilder {
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Fail on undefined variables instead of rendering them empty
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> JinjaEngine {
        JinjaEngine {
            strict: self.strict,
        }
    }
}

/// MiniJinja-backed engine
///
/// By default missing values render as empty, the way Helm treats
/// `{{ .Values.missing }}`; attribute access on them is chainable.
#[derive(Debug, Clone, Default)]
pub struct JinjaEngine {
    strict: bool,
}

impl JinjaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JinjaEngineBuilder {
        JinjaEngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(if self.strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Chainable
        });
        env.set_keep_trailing_newline(true);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("toYaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("toJson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64enc", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("b64dec", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);
        env.add_filter("haskey", filters::haskey);
        env.add_filter("keys", filters::keys);
        env.add_filter("merge", filters::merge);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("sha256sum", filters::sha256sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimPrefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);
        env.add_filter("trimSuffix", filters::trimsuffix);
        env.add_filter("semver_match", filters::semver_match);

        env.add_function("fail", functions::fail);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);
        env.add_function("get", functions::get);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("tostring", functions::tostring);
        env.add_function("uuidv4", functions::uuidv4);
        env.add_function("now", functions::now);
        env.add_function("printf", functions::printf);
        env.add_function("semver_compare", filters::semver_compare);

        env
    }

    /// Render a single template string against a context
    pub fn render_string(
        &self,
        template: &str,
        context: &TemplateContext,
        template_name: &str,
    ) -> Result<String> {
        let mut env = self.create_environment();
        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template))?;
        let tmpl = env
            .get_template(template_name)
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template))?;
        tmpl.render(context_value(context, template_name, "templates"))
            .map_err(|e| TemplateError::from_minijinja(e, template_name, template).into())
    }
}

fn context_value(context: &TemplateContext, name: &str, base_path: &str) -> minijinja::Value {
    minijinja::context! {
        values => &context.values,
        release => &context.release,
        chart => &context.chart,
        capabilities => &context.capabilities,
        template => TemplateInfo {
            name: name.to_string(),
            base_path: base_path.to_string(),
        },
    }
}

fn is_helper(name: &str) -> bool {
    name.rsplit('/').next().is_some_and(|base| base.starts_with('_'))
}

impl TemplateEngine for JinjaEngine {
    fn render_chart(
        &self,
        chart: &Chart,
        context: &TemplateContext,
    ) -> Result<Vec<RenderedTemplate>> {
        let mut env = self.create_environment();
        let chart_name = chart.name();
        let qualified = |name: &str| format!("{chart_name}/{name}");

        let mut templates: Vec<(String, String)> = chart
            .templates
            .iter()
            .map(|t| (t.name.clone(), t.text()))
            .collect();
        templates.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, source) in &templates {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, &qualified(name), source))?;
        }

        let base_path = format!("{chart_name}/templates");
        let mut rendered = Vec::new();
        for (name, source) in &templates {
            if is_helper(name) {
                continue;
            }
            let tmpl = env
                .get_template(name)
                .map_err(|e| TemplateError::from_minijinja(e, &qualified(name), source))?;
            let content = tmpl
                .render(context_value(context, &qualified(name), &base_path))
                .map_err(|e| TemplateError::from_minijinja(e, &qualified(name), source))?;
            rendered.push(RenderedTemplate {
                name: name.clone(),
                content,
            });
        }

        Ok(rendered)
    }
}

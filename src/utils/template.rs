use crate::errors::TunnelError;

/// Values a template expression may pull from.
pub trait TemplateContext {
    fn env(&self, name: &str) -> Option<String>;
    fn uuid(&self) -> String;
    fn timestamp(&self) -> i64;
    fn pwd(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContext;

impl TemplateContext for ProcessContext {
    fn env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn uuid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn timestamp(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn pwd(&self) -> Option<String> {
        std::env::current_dir()
            .ok()
            .map(|dir| dir.to_string_lossy().to_string())
    }
}

fn unquote(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    for quote in ['"', '`'] {
        if let Some(inner) = raw.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return Some(inner);
        }
    }
    None
}

fn resolve_expression(expression: &str, ctx: &dyn TemplateContext) -> Result<String, TunnelError> {
    let trimmed = expression.trim();
    match trimmed {
        "uuid" => return Ok(ctx.uuid()),
        "timestamp" => return Ok(ctx.timestamp().to_string()),
        "pwd" => {
            return ctx
                .pwd()
                .ok_or_else(|| TunnelError::invalid_config("unable to determine working directory"))
        }
        _ => {}
    }
    if let Some(rest) = trimmed.strip_prefix("env ") {
        let name = unquote(rest).ok_or_else(|| {
            TunnelError::invalid_config(format!("env expects a quoted variable name: {{{{{}}}}}", trimmed))
        })?;
        return Ok(ctx.env(name).unwrap_or_default());
    }
    Err(TunnelError::invalid_config(format!(
        "unknown template expression {{{{{}}}}}",
        trimmed
    )))
}

/// Renders every `{{ ... }}` expression in `template`.
pub fn render_template(template: &str, ctx: &dyn TemplateContext) -> Result<String, TunnelError> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (prefix, tail) = rest.split_at(start);
        out.push_str(prefix);
        let end = tail
            .find("}}")
            .ok_or_else(|| TunnelError::invalid_config("unclosed template expression"))?;
        out.push_str(&resolve_expression(&tail[2..end], ctx)?);
        rest = &tail[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedContext {
        env: HashMap<&'static str, &'static str>,
    }

    impl TemplateContext for FixedContext {
        fn env(&self, name: &str) -> Option<String> {
            self.env.get(name).map(|value| value.to_string())
        }

        fn uuid(&self) -> String {
            "00000000-0000-4000-8000-000000000000".to_string()
        }

        fn timestamp(&self) -> i64 {
            1_700_000_000
        }

        fn pwd(&self) -> Option<String> {
            Some("/work".to_string())
        }
    }

    fn ctx() -> FixedContext {
        FixedContext {
            env: HashMap::from([("HOME", "/home/builder")]),
        }
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render_template("--verbose", &ctx()).unwrap(), "--verbose");
    }

    #[test]
    fn env_accepts_both_quote_styles() {
        assert_eq!(
            render_template("{{env \"HOME\"}}/.ssh", &ctx()).unwrap(),
            "/home/builder/.ssh"
        );
        assert_eq!(render_template("{{ env `HOME` }}", &ctx()).unwrap(), "/home/builder");
        assert_eq!(render_template("{{env `UNSET`}}", &ctx()).unwrap(), "");
    }

    #[test]
    fn builtins_render() {
        assert_eq!(
            render_template("run-{{timestamp}}-{{uuid}} in {{pwd}}", &ctx()).unwrap(),
            "run-1700000000-00000000-0000-4000-8000-000000000000 in /work"
        );
    }

    #[test]
    fn unknown_and_unclosed_expressions_fail() {
        assert!(render_template("{{user `x`}}", &ctx())
            .unwrap_err()
            .message
            .contains("unknown template expression"));
        assert!(render_template("{{env `HOME`", &ctx())
            .unwrap_err()
            .message
            .contains("unclosed"));
        assert!(render_template("{{env HOME}}", &ctx()).is_err());
    }

    #[test]
    fn process_context_reads_real_values() {
        let ctx = ProcessContext;
        assert_eq!(ctx.uuid().len(), 36);
        assert!(ctx.timestamp() > 0);
        assert!(ctx.pwd().is_some());
    }
}

//! Caption template rendering
//!
//! Templates use `{name}` placeholders. `{{` and `}}` produce literal braces.
//! Known placeholders: `title`, `caption`, `date`, `slot`, `platform`.

use crate::error::PublishError;
use crate::types::{PlatformKind, Slot, VideoArtifact};

pub const PLACEHOLDERS: [&str; 5] = ["title", "caption", "date", "slot", "platform"];

/// Values substituted into a template
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub title: &'a str,
    pub caption: &'a str,
    pub date: String,
    pub slot: &'a str,
    pub platform: PlatformKind,
}

impl<'a> TemplateVars<'a> {
    pub fn new(artifact: &'a VideoArtifact, slot: &'a Slot, platform: PlatformKind) -> Self {
        Self {
            title: &artifact.metadata.title,
            caption: &artifact.metadata.caption,
            date: artifact.metadata.date.format("%Y-%m-%d").to_string(),
            slot: &slot.id,
            platform,
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "title" => Some(self.title),
            "caption" => Some(self.caption),
            "date" => Some(&self.date),
            "slot" => Some(self.slot),
            "platform" => Some(self.platform.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Piece<'t> {
    Text(&'t str),
    Brace(char),
    Placeholder(&'t str),
}

fn parse(template: &str) -> Result<Vec<Piece<'_>>, String> {
    let mut pieces = Vec::new();
    let mut rest = template;

    while !rest.is_empty() {
        let Some(pos) = rest.find(['{', '}']) else {
            pieces.push(Piece::Text(rest));
            break;
        };

        if pos > 0 {
            pieces.push(Piece::Text(&rest[..pos]));
        }
        rest = &rest[pos..];

        if rest.starts_with("{{") {
            pieces.push(Piece::Brace('{'));
            rest = &rest[2..];
        } else if rest.starts_with("}}") {
            pieces.push(Piece::Brace('}'));
            rest = &rest[2..];
        } else if rest.starts_with('}') {
            return Err("unmatched '}' in template".to_string());
        } else {
            let close = rest
                .find('}')
                .ok_or_else(|| "unclosed '{' in template".to_string())?;
            let name = rest[1..close].trim();
            if name.is_empty() {
                return Err("empty placeholder '{}' in template".to_string());
            }
            pieces.push(Piece::Placeholder(name));
            rest = &rest[close + 1..];
        }
    }

    Ok(pieces)
}

/// Check a template's syntax and placeholder names without rendering it
pub fn check(template: &str) -> Result<(), String> {
    for piece in parse(template)? {
        if let Piece::Placeholder(name) = piece {
            if !PLACEHOLDERS.contains(&name) {
                return Err(format!(
                    "unknown placeholder '{{{}}}'. Valid placeholders: {}",
                    name,
                    PLACEHOLDERS.join(", ")
                ));
            }
        }
    }
    Ok(())
}

/// Render a template
///
/// # Errors
///
/// Returns `PublishError::Validation` when the template is malformed, names
/// an unknown placeholder, or a placeholder's value is empty.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> Result<String, PublishError> {
    let pieces = parse(template).map_err(PublishError::Validation)?;
    let mut out = String::with_capacity(template.len() + vars.caption.len());

    for piece in pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Brace(c) => out.push(c),
            Piece::Placeholder(name) => {
                let value = vars.lookup(name).ok_or_else(|| {
                    PublishError::Validation(format!("unknown placeholder '{{{}}}'", name))
                })?;
                if value.trim().is_empty() {
                    return Err(PublishError::Validation(format!(
                        "placeholder '{{{}}}' has no value for slot {}",
                        name, vars.slot
                    )));
                }
                out.push_str(value);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(title: &'a str, caption: &'a str) -> TemplateVars<'a> {
        TemplateVars {
            title,
            caption,
            date: "2026-10-17".to_string(),
            slot: "reel_9am",
            platform: PlatformKind::Instagram,
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let out = render("{title} ({date}) #{platform}", &vars("Sunrise", "Sunrise | 2026-10-17")).unwrap();
        assert_eq!(out, "Sunrise (2026-10-17) #instagram");
    }

    #[test]
    fn test_render_escaped_braces() {
        let out = render("{{literal}} {caption}", &vars("t", "c")).unwrap();
        assert_eq!(out, "{literal} c");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let err = render("{hashtags}", &vars("t", "c")).unwrap_err();
        assert!(matches!(err, PublishError::Validation(_)));
        assert!(err.detail().contains("hashtags"));
    }

    #[test]
    fn test_render_empty_value_is_validation_error() {
        let err = render("{title}", &vars("  ", "c")).unwrap_err();
        assert!(matches!(err, PublishError::Validation(_)));
        assert!(err.detail().contains("reel_9am"));
    }

    #[test]
    fn test_check_rejects_malformed() {
        assert!(check("{title").is_err());
        assert!(check("title}").is_err());
        assert!(check("{}").is_err());
        assert!(check("{views}").is_err());
        assert!(check("{title} | {caption} {{x}}").is_ok());
        assert!(check("no placeholders").is_ok());
    }
}

use crate::ai::error::AiError;
use crate::types::NormalizedRow;
use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}|\{|\}").expect("token pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Row prompt with `{field}` placeholders. `{{` and `}}` produce literal braces.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template, rejecting stray braces and placeholders that name no row field.
    pub fn parse(template: &str) -> Result<Self, AiError> {
        let probe = NormalizedRow::default();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in TOKEN_RE.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            literal.push_str(&template[last..whole.start()]);
            last = whole.end();

            match whole.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                "{" | "}" => {
                    return Err(AiError::Template(format!(
                        "unmatched '{}' at byte {}",
                        whole.as_str(),
                        whole.start()
                    )))
                }
                _ => {
                    let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    if probe.field(name).is_none() {
                        return Err(AiError::Template(format!("unknown field '{{{}}}'", name)));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
            }
        }
        literal.push_str(&template[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Substitute row values into the template.
    pub fn render(&self, row: &NormalizedRow) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => out.push_str(&row.field(name).unwrap_or_default()),
            }
        }
        out
    }

    /// Names of the fields this template reads, in order of appearance.
    pub fn fields(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> NormalizedRow {
        NormalizedRow {
            nct_id: "NCT04328584".into(),
            brief_title: "Folic Acid Trial".into(),
            criteria: "Inclusion Criteria: pregnant".into(),
            min_age_in_months: Some(216),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_substitutes_fields() {
        let template = PromptTemplate::parse(
            "\nNCT ID: {nct_id}\nTitle: {brief_title}\nEligibility Criteria: {criteria}\n",
        )
        .unwrap();
        assert_eq!(
            template.render(&row()),
            "\nNCT ID: NCT04328584\nTitle: Folic Acid Trial\nEligibility Criteria: Inclusion Criteria: pregnant\n"
        );
        assert_eq!(template.fields(), vec!["nct_id", "brief_title", "criteria"]);
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let template = PromptTemplate::parse("{{\"id\": \"{nct_id}\"}}").unwrap();
        assert_eq!(template.render(&row()), "{\"id\": \"NCT04328584\"}");
    }

    #[test]
    fn test_numeric_and_empty_fields_render() {
        let template = PromptTemplate::parse("{min_age_in_months}|{max_age_in_months}|{gender}").unwrap();
        assert_eq!(template.render(&row()), "216||");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = PromptTemplate::parse("Sites: {num_canadian_sites}").unwrap_err();
        assert!(matches!(err, AiError::Template(msg) if msg.contains("num_canadian_sites")));
    }

    #[test]
    fn test_stray_brace_rejected() {
        assert!(PromptTemplate::parse("open { brace").is_err());
        assert!(PromptTemplate::parse("close } brace").is_err());
        assert!(PromptTemplate::parse("{nct id}").is_err());
    }

    #[test]
    fn test_plain_text_template() {
        let template = PromptTemplate::parse("Classify this trial.").unwrap();
        assert_eq!(template.render(&row()), "Classify this trial.");
        assert!(template.fields().is_empty());
    }
}
